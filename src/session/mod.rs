// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection state: line framing plus the COMMAND/WRITE state machine.
//!
//! Owned exclusively by one connection task; no synchronization is needed
//! beyond what that task already imposes by processing its own bytes
//! sequentially.

use crate::admission::{AdmissionManager, SectionAdmission, Ticket};
use crate::dispatch::{self, DispatchOutcome};
use crate::store::{DocumentStore, MAX_LINES, MAX_LINE_LEN};
use crate::text::truncate_bytes;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Usable capacity of the line accumulator, in bytes. Bytes beyond this cap
/// are dropped; the line is truncated once flushed by a terminator.
pub const LINE_CAP: usize = 2047;

const END_SENTINEL: &str = "<END>";

/// Accumulates raw bytes into LF/CR-terminated lines.
pub struct LineAccumulator {
    buf: Vec<u8>,
}

impl Default for LineAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    /// Feed raw bytes, invoking `on_line` once per completed line (terminator
    /// stripped, lossily decoded as UTF-8). Both `\n` and `\r` terminate a
    /// line; consecutive terminators yield empty lines.
    pub fn feed(&mut self, bytes: &[u8], mut on_line: impl FnMut(String)) {
        for &b in bytes {
            match b {
                b'\n' | b'\r' => {
                    let line = String::from_utf8_lossy(&self.buf).into_owned();
                    self.buf.clear();
                    on_line(line);
                }
                _ if self.buf.len() < LINE_CAP => self.buf.push(b),
                _ => {}
            }
        }
    }
}

/// The two states a session can be in, per §4.3 of the design.
enum Mode {
    Command,
    Write {
        doc_index: usize,
        section_index: usize,
        staging: Vec<String>,
        pending_commit: Option<(Ticket, oneshot::Sender<()>)>,
    },
}

/// What the transport layer should do in response to one framed line.
pub enum SessionEvent {
    /// Send these bytes back to the client, stay connected.
    Reply(Vec<u8>),
    /// Send these bytes, then close the connection.
    ReplyThenClose(Vec<u8>),
    /// Nothing to send.
    None,
    /// The session enqueued a write and is now waiting its turn; the
    /// transport layer should drive `run_commit` to completion and deliver
    /// its result bytes once ready.
    Committing(CommitJob),
}

/// Everything a spawned task needs to carry a write commit through to
/// completion without holding a borrow of the owning `Session`.
pub struct CommitJob {
    queue: Arc<SectionAdmission>,
    ticket: Ticket,
    doc_index: usize,
    section_index: usize,
    staging: Vec<String>,
    cancelled: oneshot::Receiver<()>,
}

impl CommitJob {
    /// Wait for admission, commit into the store, and produce the reply
    /// bytes (or `None` if cancelled before grant).
    pub async fn run(mut self, store: &DocumentStore) -> Option<Vec<u8>> {
        match self
            .queue
            .wait_for_grant_or_cancel(self.ticket, &mut self.cancelled)
            .await
        {
            crate::admission::Admission::NotYet => None,
            crate::admission::Admission::Granted => {
                store
                    .replace_section(self.doc_index, self.section_index, self.staging)
                    .await;
                self.queue.release_after_commit().await;
                Some(b"[Write_Completed]\n".to_vec())
            }
        }
    }
}

/// Per-connection state.
pub struct Session {
    mode: Mode,
    store: Arc<DocumentStore>,
    admission: Arc<AdmissionManager>,
}

impl Session {
    pub fn new(store: Arc<DocumentStore>, admission: Arc<AdmissionManager>) -> Self {
        Self { mode: Mode::Command, store, admission }
    }

    /// Handle one completed, terminator-stripped line.
    pub async fn handle_line(&mut self, line: &str) -> SessionEvent {
        if matches!(self.mode, Mode::Command) {
            if line.is_empty() {
                return SessionEvent::None;
            }
            self.handle_command_line(line).await
        } else {
            self.handle_write_line(line).await
        }
    }

    async fn handle_command_line(&mut self, line: &str) -> SessionEvent {
        let args = dispatch::parse_args(line);
        match dispatch::dispatch(&args, &self.store).await {
            DispatchOutcome::Reply(bytes) => SessionEvent::Reply(bytes),
            DispatchOutcome::Close(bytes) => SessionEvent::ReplyThenClose(bytes),
            DispatchOutcome::EnterWrite { doc_index, section_index, reply } => {
                self.mode = Mode::Write {
                    doc_index,
                    section_index,
                    staging: Vec::new(),
                    pending_commit: None,
                };
                SessionEvent::Reply(reply)
            }
        }
    }

    async fn handle_write_line(&mut self, line: &str) -> SessionEvent {
        if line.is_empty() {
            return SessionEvent::None;
        }
        if line == END_SENTINEL {
            return self.begin_commit().await;
        }

        if let Mode::Write { staging, .. } = &mut self.mode {
            if staging.len() < MAX_LINES {
                staging.push(truncate_bytes(line, MAX_LINE_LEN));
            }
        }
        SessionEvent::Reply(b">> ".to_vec())
    }

    async fn begin_commit(&mut self) -> SessionEvent {
        let (doc_index, section_index, staging) = match &mut self.mode {
            Mode::Write { doc_index, section_index, staging, .. } => {
                (*doc_index, *section_index, std::mem::take(staging))
            }
            Mode::Command => unreachable!("begin_commit called outside WRITE mode"),
        };

        let queue = self.admission.queue_for(doc_index, section_index).await;
        let ticket = queue.enqueue(staging.len()).await;
        let (cancel_tx, cancel_rx) = oneshot::channel();

        if let Mode::Write { pending_commit, .. } = &mut self.mode {
            *pending_commit = Some((ticket, cancel_tx));
        }

        SessionEvent::Committing(CommitJob {
            queue,
            ticket,
            doc_index,
            section_index,
            staging,
            cancelled: cancel_rx,
        })
    }

    /// Called by the transport layer once a `CommitJob` it spawned finishes,
    /// reverting the session to COMMAND mode.
    pub fn finish_commit(&mut self) {
        self.mode = Mode::Command;
    }

    /// Called by the transport layer when the connection ends. Cancels any
    /// admission request that has not yet been granted; a commit already in
    /// flight past grant runs to completion untouched.
    pub async fn on_disconnect(&mut self) {
        if let Mode::Write { doc_index, section_index, pending_commit: Some((ticket, cancel_tx)), .. } =
            std::mem::replace(&mut self.mode, Mode::Command)
        {
            let queue = self.admission.queue_for(doc_index, section_index).await;
            queue.cancel(ticket).await;
            let _ = cancel_tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionManager;
    use crate::store::DocumentStore;

    fn collect_lines(acc: &mut LineAccumulator, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        acc.feed(bytes, |line| lines.push(line));
        lines
    }

    #[test]
    fn accumulator_splits_on_lf() {
        let mut acc = LineAccumulator::new();
        assert_eq!(collect_lines(&mut acc, b"hello\nworld\n"), vec!["hello", "world"]);
    }

    #[test]
    fn accumulator_treats_cr_and_lf_as_independent_terminators() {
        let mut acc = LineAccumulator::new();
        assert_eq!(
            collect_lines(&mut acc, b"hello\r\nworld\r"),
            vec!["hello", "", "world"]
        );
    }

    #[test]
    fn accumulator_truncates_overlong_lines() {
        let mut acc = LineAccumulator::new();
        let long_line = "a".repeat(LINE_CAP + 50);
        let lines = collect_lines(&mut acc, format!("{long_line}\n").as_bytes());
        assert_eq!(lines[0].len(), LINE_CAP);
    }

    fn new_session() -> Session {
        Session::new(Arc::new(DocumentStore::new()), Arc::new(AdmissionManager::new()))
    }

    #[tokio::test]
    async fn empty_line_in_command_mode_is_ignored() {
        let mut session = new_session();
        assert!(matches!(session.handle_line("").await, SessionEvent::None));
    }

    #[tokio::test]
    async fn unknown_command_produces_error_reply() {
        let mut session = new_session();
        match session.handle_line("frobnicate").await {
            SessionEvent::Reply(bytes) => assert_eq!(bytes, b"[Error] Unknown command.\n"),
            _ => panic!("expected a reply"),
        }
    }

    #[tokio::test]
    async fn bye_closes_the_session() {
        let mut session = new_session();
        match session.handle_line("bye").await {
            SessionEvent::ReplyThenClose(bytes) => assert_eq!(bytes, b"[Disconnected]\n"),
            _ => panic!("expected close"),
        }
    }

    #[tokio::test]
    async fn write_then_end_runs_a_commit_job_to_completion() {
        let store = Arc::new(DocumentStore::new());
        let admission = Arc::new(AdmissionManager::new());
        store.create("doc1", &["intro".to_string()]).await.unwrap();
        let mut session = Session::new(store.clone(), admission);

        match session.handle_line("write doc1 intro").await {
            SessionEvent::Reply(bytes) => {
                assert_eq!(bytes, b"[OK] You can start writing. Send <END> to finish.\n>> ")
            }
            _ => panic!("expected write prompt"),
        }

        assert!(matches!(session.handle_line("hello").await, SessionEvent::Reply(_)));

        let job = match session.handle_line("<END>").await {
            SessionEvent::Committing(job) => job,
            _ => panic!("expected a commit job"),
        };
        let reply = job.run(&store).await;
        session.finish_commit();
        assert_eq!(reply, Some(b"[Write_Completed]\n".to_vec()));

        let rendered = store.list_section("doc1", "intro").await.unwrap();
        assert_eq!(rendered, "doc1\n    1. intro\n       hello\n");
    }

    #[tokio::test]
    async fn disconnect_before_grant_cancels_the_pending_ticket() {
        let store = Arc::new(DocumentStore::new());
        let admission = Arc::new(AdmissionManager::new());
        store.create("doc1", &["intro".to_string()]).await.unwrap();
        let mut session = Session::new(store.clone(), admission.clone());

        session.handle_line("write doc1 intro").await;
        let job = match session.handle_line("<END>").await {
            SessionEvent::Committing(job) => job,
            _ => panic!("expected a commit job"),
        };

        session.on_disconnect().await;
        let reply = job.run(&store).await;
        assert_eq!(reply, None);

        let queue = admission.queue_for(0, 0).await;
        queue.enqueue(0).await; // queue must accept new work, proving no orphan remains blocking it
    }
}
