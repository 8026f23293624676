// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-section ticketed admission queues.
//!
//! Mirrors the ordering discipline of the original `LockFreeQueue` /
//! `EnqueueWrite` / `DequeueWrite` (shortest-job-first, ticket tie-break)
//! using a mutex-guarded `Vec` instead of a hand-rolled CAS linked list, and
//! a `tokio::sync::Notify` per queue instead of a busy-sleep loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, Notify, RwLock};

/// Identifies one write request within a single section's admission queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Outcome of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    NotYet,
}

struct WriteRequest {
    ticket: u64,
    estimated_lines: usize,
}

struct QueueInner {
    pending: Vec<WriteRequest>,
    committing: bool,
}

/// Admission queue for a single (document, section) pair.
pub struct SectionAdmission {
    inner: Mutex<QueueInner>,
    next_ticket: AtomicU64,
    notify: Notify,
}

impl Default for SectionAdmission {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionAdmission {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: Vec::new(),
                committing: false,
            }),
            next_ticket: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Assign a ticket and insert a write request ordered by
    /// `(estimated_lines ASC, ticket ASC)`.
    pub async fn enqueue(&self, estimated_lines: usize) -> Ticket {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;

        let pos = inner
            .pending
            .iter()
            .position(|req| req.estimated_lines > estimated_lines)
            .unwrap_or(inner.pending.len());
        inner
            .pending
            .insert(pos, WriteRequest { ticket, estimated_lines });
        let became_head = pos == 0;
        drop(inner);

        if became_head {
            self.notify.notify_waiters();
        }
        Ticket(ticket)
    }

    /// Grant iff `ticket` is at the head of `pending` and no other request is
    /// currently committing. On grant, removes the request from `pending`
    /// and marks the queue as committing.
    async fn try_claim(&self, ticket: Ticket) -> Admission {
        let mut inner = self.inner.lock().await;
        if inner.committing {
            return Admission::NotYet;
        }
        match inner.pending.first() {
            Some(req) if req.ticket == ticket.0 => {
                inner.pending.remove(0);
                inner.committing = true;
                Admission::Granted
            }
            _ => Admission::NotYet,
        }
    }

    /// Block until `ticket` is granted.
    pub async fn wait_for_grant(&self, ticket: Ticket) {
        loop {
            let notified = self.notify.notified();
            if self.try_claim(ticket).await == Admission::Granted {
                return;
            }
            notified.await;
        }
    }

    /// Block until `ticket` is granted, or stop waiting if `cancelled` fires
    /// first. Once granted, the commit is expected to run to completion
    /// regardless of any later cancellation.
    pub async fn wait_for_grant_or_cancel(
        &self,
        ticket: Ticket,
        cancelled: &mut oneshot::Receiver<()>,
    ) -> Admission {
        loop {
            let notified = self.notify.notified();
            if self.try_claim(ticket).await == Admission::Granted {
                return Admission::Granted;
            }
            tokio::select! {
                _ = notified => {}
                _ = &mut *cancelled => return Admission::NotYet,
            }
        }
    }

    /// Clear the committing marker and wake waiters so the next head can be
    /// considered. Called exactly once per granted claim.
    pub async fn release_after_commit(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.committing = false;
        }
        self.notify.notify_waiters();
    }

    /// Remove a pending (not yet granted) request. Used on disconnect while
    /// enqueued but not yet committing; a no-op if the ticket already left
    /// `pending` via a grant.
    pub async fn cancel(&self, ticket: Ticket) {
        let mut inner = self.inner.lock().await;
        inner.pending.retain(|req| req.ticket != ticket.0);
    }

    #[cfg(test)]
    async fn pending_tickets(&self) -> Vec<u64> {
        self.inner.lock().await.pending.iter().map(|r| r.ticket).collect()
    }
}

/// Owns one `SectionAdmission` per (document index, section index), created
/// lazily on first use.
pub struct AdmissionManager {
    queues: RwLock<HashMap<(usize, usize), Arc<SectionAdmission>>>,
}

impl Default for AdmissionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionManager {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
        }
    }

    pub async fn queue_for(&self, doc_index: usize, section_index: usize) -> Arc<SectionAdmission> {
        let key = (doc_index, section_index);
        if let Some(queue) = self.queues.read().await.get(&key) {
            return queue.clone();
        }
        let mut queues = self.queues.write().await;
        queues
            .entry(key)
            .or_insert_with(|| Arc::new(SectionAdmission::new()))
            .clone()
    }
}
