// src/shutdown.rs

//! Process-wide shutdown signal.
//!
//! The first reason recorded wins; later triggers are ignored so a fatal
//! error is never masked by an ordinary stop request that races it.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Why the node is stopping
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A client sent the shutdown command
    Requested,

    /// The process received an interrupt
    Interrupted,

    /// An invariant was violated; the process must exit with an error
    Fatal(String),
}

impl ShutdownReason {
    /// Whether the process should exit with a non-zero status
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShutdownReason::Fatal(_))
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Requested => write!(f, "shutdown requested"),
            ShutdownReason::Interrupted => write!(f, "interrupted"),
            ShutdownReason::Fatal(reason) => write!(f, "fatal: {}", reason),
        }
    }
}

/// Cloneable handle to the shutdown signal
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Records `reason` unless a reason was already recorded
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let triggered = self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.clone());
            true
        });

        if triggered {
            match &reason {
                ShutdownReason::Fatal(cause) => error!("Fatal error, shutting down: {}", cause),
                other => info!("Shutting down: {}", other),
            }
        }
        triggered
    }

    /// Recorded reason, if any
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.sender.borrow().clone()
    }

    /// Whether a reason was recorded
    pub fn is_triggered(&self) -> bool {
        self.sender.borrow().is_some()
    }

    /// Waits until a reason is recorded
    pub async fn wait(&self) -> ShutdownReason {
        let mut receiver = self.sender.subscribe();
        loop {
            let current = receiver.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }
            if receiver.changed().await.is_err() {
                return ShutdownReason::Fatal("shutdown signal dropped".to_string());
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        assert!(signal.trigger(ShutdownReason::Fatal("broken".to_string())));
        assert!(!signal.trigger(ShutdownReason::Requested));

        let reason = signal.reason().unwrap();
        assert!(reason.is_fatal());
        assert_eq!(reason.to_string(), "fatal: broken");
    }

    #[tokio::test]
    async fn test_wait_wakes_on_trigger() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.trigger(ShutdownReason::Requested);

        assert_eq!(waiter.await.unwrap(), ShutdownReason::Requested);
        assert_eq!(signal.wait().await, ShutdownReason::Requested);
    }
}
