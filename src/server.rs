// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Document server core: TCP accept loop and per-connection handling.

use crate::admission::AdmissionManager;
use crate::config::ServerConfig;
use crate::session::{LineAccumulator, Session, SessionEvent};
use crate::store::DocumentStore;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Document server - concurrent multi-client document store over TCP.
#[derive(Clone)]
pub struct DocumentServer {
    config: Arc<ServerConfig>,
    store: Arc<DocumentStore>,
    admission: Arc<AdmissionManager>,
    shutdown: Arc<tokio::sync::Notify>,
    running: Arc<AtomicBool>,
}

impl DocumentServer {
    /// Create a new server. Validates `config` before constructing.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(DocumentStore::new()),
            admission: Arc::new(AdmissionManager::new()),
            shutdown: Arc::new(tokio::sync::Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Bind the configured address, returning the listener so callers can
    /// observe the actual bound port (useful with `port: 0` in tests).
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        info!(
            "lineboard-server listening on {}",
            listener.local_addr().map_err(|e| ServerError::Io(e.to_string()))?
        );
        self.serve(listener).await
    }

    /// Accept connections on an already-bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            info!("new connection from {}", peer_addr);
                            let store = self.store.clone();
                            let admission = self.admission.clone();
                            let shutdown = self.shutdown.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, store, admission, shutdown).await {
                                    warn!("connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!("accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Signal the server to stop accepting connections and shut down.
    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Expose the document store, for use by test harnesses driving the
    /// server in-process.
    pub fn store(&self) -> Arc<DocumentStore> {
        self.store.clone()
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    store: Arc<DocumentStore>,
    admission: Arc<AdmissionManager>,
    shutdown: Arc<tokio::sync::Notify>,
) -> std::io::Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut session = Session::new(store.clone(), admission);
    let mut accumulator = LineAccumulator::new();
    let mut buf = [0u8; 4096];

    let (commit_tx, mut commit_rx) = tokio::sync::mpsc::channel::<Vec<u8>>(1);
    let mut committing = false;

    'connection: loop {
        tokio::select! {
            result = read_half.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        info!("connection closed: {}", peer_addr);
                        break;
                    }
                    Ok(n) => {
                        let mut lines = Vec::new();
                        accumulator.feed(&buf[..n], |line| lines.push(line));

                        for line in lines {
                            if committing {
                                // protocol violation: client sent data before
                                // its prior write committed; drop it.
                                continue;
                            }

                            match session.handle_line(&line).await {
                                SessionEvent::Reply(bytes) => {
                                    write_half.write_all(&bytes).await?;
                                }
                                SessionEvent::ReplyThenClose(bytes) => {
                                    write_half.write_all(&bytes).await?;
                                    break 'connection;
                                }
                                SessionEvent::None => {}
                                SessionEvent::Committing(job) => {
                                    committing = true;
                                    let store = store.clone();
                                    let tx = commit_tx.clone();
                                    tokio::spawn(async move {
                                        if let Some(reply) = job.run(&store).await {
                                            let _ = tx.send(reply).await;
                                        }
                                    });
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("read error from {}: {}", peer_addr, e);
                        break;
                    }
                }
            }
            Some(reply) = commit_rx.recv(), if committing => {
                committing = false;
                session.finish_commit();
                write_half.write_all(&reply).await?;
            }
            _ = shutdown.notified() => {
                debug!("connection handler shutting down: {}", peer_addr);
                break;
            }
        }
    }

    session.on_disconnect().await;
    Ok(())
}

/// Server error types.
#[derive(Debug)]
pub enum ServerError {
    Config(String),
    Bind(String),
    AlreadyRunning,
    Io(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(s) => write!(f, "configuration error: {}", s),
            Self::Bind(s) => write!(f, "bind error: {}", s),
            Self::AlreadyRunning => write!(f, "server already running"),
            Self::Io(s) => write!(f, "I/O error: {}", s),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
