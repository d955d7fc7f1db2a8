//! Lifecycle events emitted by a transport.
//!
//! This module provides:
//! - [`TransportEvent`] - What happened (new file, rotation, removal, archive, error)
//! - [`EventBus`] - Broadcast fan-out shared by the controller and background tasks
//! - [`EventStream`] - Async stream of events for a single subscriber
//!
//! Events are emitted only after the I/O they describe has completed: an
//! [`TransportEvent::Archived`] is sent once the `.gz` is in place and the
//! source is gone.

use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum TransportEvent {
    /// A file was created for the first time.
    NewFile {
        /// Path of the new file.
        path: PathBuf,
    },
    /// Writing moved from one file to another.
    Rotate {
        /// File that was retired.
        old_path: PathBuf,
        /// File that is now active.
        new_path: PathBuf,
    },
    /// Retention removed a file.
    FileRemoved {
        /// Path that was removed.
        path: PathBuf,
    },
    /// A rotated file was compressed and the original removed.
    Archived {
        /// Path of the compressed file.
        path: PathBuf,
    },
    /// A non-fatal problem off the write path.
    Error {
        /// Description of the problem.
        message: String,
    },
    /// The transport entered its failed state. Sent at most once.
    Fatal {
        /// Description of the failure.
        message: String,
    },
    /// The transport shut down cleanly.
    Closed,
}

impl TransportEvent {
    /// Returns the event name as used on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewFile { .. } => "new-file",
            Self::Rotate { .. } => "rotate",
            Self::FileRemoved { .. } => "file-removed",
            Self::Archived { .. } => "archived",
            Self::Error { .. } => "error",
            Self::Fatal { .. } => "fatal",
            Self::Closed => "closed",
        }
    }
}

/// Fan-out of [`TransportEvent`]s to any number of subscribers.
///
/// Cloning an `EventBus` yields a handle to the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TransportEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl EventBus {
    /// Creates a bus holding up to `capacity` undelivered events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event and traces it.
    pub fn emit(&self, event: TransportEvent) {
        match &event {
            TransportEvent::NewFile { path } => {
                tracing::info!(target: "claw_logrotate", path = %path.display(), "new log file");
            }
            TransportEvent::Rotate { old_path, new_path } => {
                tracing::info!(
                    target: "claw_logrotate",
                    old = %old_path.display(),
                    new = %new_path.display(),
                    "rotated log file"
                );
            }
            TransportEvent::FileRemoved { path } => {
                tracing::debug!(target: "claw_logrotate", path = %path.display(), "removed log file");
            }
            TransportEvent::Archived { path } => {
                tracing::debug!(target: "claw_logrotate", path = %path.display(), "archived log file");
            }
            TransportEvent::Error { message } => {
                tracing::warn!(target: "claw_logrotate", %message, "background error");
            }
            TransportEvent::Fatal { message } => {
                tracing::error!(target: "claw_logrotate", %message, "transport failed");
            }
            TransportEvent::Closed => {
                tracing::debug!(target: "claw_logrotate", "transport closed");
            }
        }

        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    /// Publishes a non-fatal error.
    pub fn error(&self, message: impl Into<String>) {
        self.emit(TransportEvent::Error {
            message: message.into(),
        });
    }

    /// Creates a stream receiving every event emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.sender.subscribe())
    }
}

/// Async stream of transport events.
pub struct EventStream {
    receiver: broadcast::Receiver<TransportEvent>,
    closed: bool,
}

impl EventStream {
    const fn new(receiver: broadcast::Receiver<TransportEvent>) -> Self {
        Self {
            receiver,
            closed: false,
        }
    }

    /// Returns the next event without waiting, if one is queued.
    pub fn try_next(&mut self) -> Option<TransportEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "claw_logrotate", skipped, "event subscriber lagged");
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    self.closed = true;
                    return None;
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
            }
        }
    }

    /// Receives the next event asynchronously.
    async fn recv_next(&mut self) -> Option<TransportEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => {
                    self.closed = true;
                    return None;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "claw_logrotate", skipped, "event subscriber lagged");
                }
            }
        }
    }
}

impl Stream for EventStream {
    type Item = TransportEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed {
            return Poll::Ready(None);
        }

        let future = self.recv_next();
        tokio::pin!(future);

        future.poll(cx)
    }
}
