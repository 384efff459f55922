//! Bounded queues handed to streaming functions.
//!
//! A relay task moves values between the queue and the call channel, so the
//! queue capacity is how far a fast side may run ahead of a slow one.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;

/// The caller stopped reading; nothing more can be delivered.
#[derive(Debug, Error)]
#[error("stream closed by caller")]
pub struct StreamClosed;

/// Outbound stream: values sent here go to the caller in order.
///
/// `send` waits while the queue is full. The stream ends once every clone is
/// dropped, which normally happens when the function returns.
#[derive(Debug)]
pub struct Producer<V> {
    tx: mpsc::Sender<V>,
}

impl<V> Clone for Producer<V> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<V> Producer<V> {
    pub(crate) fn new(tx: mpsc::Sender<V>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, value: V) -> Result<(), StreamClosed> {
        self.tx.send(value).await.map_err(|_| StreamClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Inbound stream: values the caller sends after the params.
///
/// Yields `None` once the caller closes its write half.
#[derive(Debug)]
pub struct Consumer<V> {
    rx: mpsc::Receiver<V>,
}

impl<V> Consumer<V> {
    pub(crate) fn new(rx: mpsc::Receiver<V>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<V> {
        self.rx.recv().await
    }
}

impl<V> Stream for Consumer<V> {
    type Item = V;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<V>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn producer_reports_closed_consumer() {
        let (tx, rx) = mpsc::channel(1);
        let producer = Producer::new(tx);
        let mut consumer = Consumer::new(rx);

        producer.send(1).await.unwrap();
        assert_eq!(consumer.next().await, Some(1));

        drop(consumer);
        assert!(producer.is_closed());
        assert!(producer.send(2).await.is_err());
    }

    #[tokio::test]
    async fn consumer_ends_with_last_producer() {
        let (tx, rx) = mpsc::channel(4);
        let producer = Producer::new(tx);
        let other = producer.clone();
        let mut consumer = Consumer::new(rx);

        producer.send("a").await.unwrap();
        drop(producer);
        other.send("b").await.unwrap();
        drop(other);

        let got: Vec<_> = (&mut consumer).collect().await;
        assert_eq!(got, ["a", "b"]);
        assert_eq!(consumer.recv().await, None);
    }
}
