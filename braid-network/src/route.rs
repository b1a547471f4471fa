// src/route.rs

//! A single logical channel of a connection.
//!
//! A route is a bounded FIFO queue that can be closed from either end.
//! Closing wakes every blocked producer and consumer with
//! [`NetworkError::RouteClosed`]; messages buffered before the close are
//! still handed out to the consumer first.

use crate::errors::{NetworkError, Result};
use crate::message::Message;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;

/// Bounded, closable message queue
pub struct Route {
    sender: mpsc::Sender<Message>,
    receiver: Mutex<mpsc::Receiver<Message>>,
    closed: watch::Sender<bool>,
    dequeue_timeout: Option<Duration>,
    enqueue_timeout: Option<Duration>,
}

enum Next {
    Received(Option<Message>),
    Closed,
}

impl Route {
    /// Creates a route holding at most `capacity` messages
    pub fn new(
        capacity: usize,
        dequeue_timeout: Option<Duration>,
        enqueue_timeout: Option<Duration>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);

        Self {
            sender,
            receiver: Mutex::new(receiver),
            closed,
            dequeue_timeout,
            enqueue_timeout,
        }
    }

    /// Appends a message, waiting for space while the queue is full
    pub async fn enqueue(&self, message: Message) -> Result<()> {
        if self.is_closed() {
            return Err(NetworkError::RouteClosed);
        }

        let send = async {
            tokio::select! {
                biased;
                _ = self.wait_closed() => Err(NetworkError::RouteClosed),
                sent = self.sender.send(message) => sent.map_err(|_| NetworkError::RouteClosed),
            }
        };

        match self.enqueue_timeout {
            Some(limit) => timeout(limit, send).await.map_err(|_| {
                NetworkError::Timeout(format!("enqueue did not complete within {:?}", limit))
            })?,
            None => send.await,
        }
    }

    /// Takes the next message, waiting until one arrives, the dequeue
    /// timeout fires or the route closes
    pub async fn dequeue(&self) -> Result<Message> {
        let receive = async {
            let mut receiver = self.receiver.lock().await;

            let next = tokio::select! {
                biased;
                message = receiver.recv() => Next::Received(message),
                _ = self.wait_closed() => Next::Closed,
            };

            match next {
                Next::Received(Some(message)) => Ok(message),
                Next::Received(None) => Err(NetworkError::RouteClosed),
                Next::Closed => receiver.try_recv().map_err(|_| NetworkError::RouteClosed),
            }
        };

        match self.dequeue_timeout {
            Some(limit) => timeout(limit, receive).await.map_err(|_| {
                NetworkError::Timeout(format!("no message within {:?}", limit))
            })?,
            None => receive.await,
        }
    }

    /// Closes the route; returns `false` if it was already closed
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    /// Whether the route was closed
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Number of buffered messages
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Whether no message is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once the route is closed
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.subscribe();
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use std::sync::Arc;

    fn request() -> Message {
        Message::new(MessageType::GetBlockCountRequest)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let route = Route::new(8, None, None);
        for count in 0..3u64 {
            route
                .enqueue(Message::new(MessageType::GetBlockCountResponse(Ok(count))))
                .await
                .unwrap();
        }
        assert_eq!(route.len(), 3);

        for expected in 0..3u64 {
            let message = route.dequeue().await.unwrap();
            assert_eq!(
                message.message_type,
                MessageType::GetBlockCountResponse(Ok(expected))
            );
        }
        assert!(route.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_timeout() {
        let route = Route::new(8, Some(Duration::from_millis(20)), None);
        assert!(matches!(
            route.dequeue().await,
            Err(NetworkError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_enqueue_timeout_when_full() {
        let route = Route::new(1, None, Some(Duration::from_millis(20)));
        route.enqueue(request()).await.unwrap();
        assert!(matches!(
            route.enqueue(request()).await,
            Err(NetworkError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_consumer() {
        let route = Arc::new(Route::new(8, None, None));
        let consumer = {
            let route = route.clone();
            tokio::spawn(async move { route.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(route.close());
        assert!(!route.close());

        let result = consumer.await.unwrap();
        assert!(matches!(result, Err(NetworkError::RouteClosed)));
    }

    #[tokio::test]
    async fn test_buffered_messages_drain_after_close() {
        let route = Route::new(8, None, None);
        route.enqueue(request()).await.unwrap();
        route.enqueue(request()).await.unwrap();
        route.close();

        assert!(route.dequeue().await.is_ok());
        assert!(route.dequeue().await.is_ok());
        assert!(matches!(route.dequeue().await, Err(NetworkError::RouteClosed)));
        assert!(matches!(
            route.enqueue(request()).await,
            Err(NetworkError::RouteClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_producer() {
        let route = Arc::new(Route::new(1, None, None));
        route.enqueue(request()).await.unwrap();

        let producer = {
            let route = route.clone();
            tokio::spawn(async move { route.enqueue(request()).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        route.close();
        tokio_test::assert_err!(producer.await.unwrap());
    }
}
