//! Subscribers that forward snapshots into a tokio channel
//!
//! Delivery never waits: when the channel is full the payload is dropped
//! (returning its block to the pool) and the write that triggered it sees a
//! [`CallbackError::would_block`] failure.

use std::{marker::PhantomData, sync::Arc};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use crate::{
    error::{CallbackError, DatastoreError},
    payload::Payload,
    subscription::{Subscriber, SubscriberRef},
    value::FamilyKind,
};

/// One delivered snapshot
#[derive(Debug)]
pub struct Notification {
    pub payload: Payload,
    pub count: usize,
}

pub struct ChannelSubscriber {
    sender: mpsc::Sender<Notification>,
}

impl ChannelSubscriber {
    pub fn new(sender: mpsc::Sender<Notification>) -> Self {
        ChannelSubscriber { sender }
    }
}

impl Subscriber for ChannelSubscriber {
    fn notify(&self, payload: Payload, count: usize) -> Result<(), CallbackError> {
        match self.sender.try_send(Notification { payload, count }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CallbackError::would_block()),
            Err(TrySendError::Closed(_)) => Err(CallbackError::closed()),
        }
    }
}

/// A subscriber and the receiving end of its channel
pub fn channel_subscriber(capacity: usize) -> (SubscriberRef, mpsc::Receiver<Notification>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Arc::new(ChannelSubscriber::new(tx)), rx)
}

/// A subscriber whose snapshots arrive already decoded as family `F`
pub fn snapshot_channel<F: FamilyKind>(capacity: usize) -> (SubscriberRef, SnapshotReceiver<F>) {
    let (subscriber, rx) = channel_subscriber(capacity);
    (subscriber, SnapshotReceiver::new(rx))
}

#[derive(Debug, Error)]
pub enum SnapshotRecvError {
    #[error("Channel closed")]
    Closed,
    #[error("Could not decode snapshot: {0}")]
    Decode(DatastoreError),
}

#[derive(Debug, Error)]
pub enum SnapshotTryRecvError {
    #[error("No snapshots outstanding")]
    Empty,
    #[error("Channel closed")]
    Closed,
    #[error("Could not decode snapshot: {0}")]
    Decode(DatastoreError),
}

impl From<TryRecvError> for SnapshotTryRecvError {
    fn from(err: TryRecvError) -> Self {
        match err {
            TryRecvError::Empty => Self::Empty,
            TryRecvError::Disconnected => Self::Closed,
        }
    }
}

/// Wraps a notification receiver, decoding each payload and handing its
/// block straight back to the pool.
pub struct SnapshotReceiver<F: FamilyKind> {
    inner: mpsc::Receiver<Notification>,
    _phantom: PhantomData<F>,
}

impl<F: FamilyKind> SnapshotReceiver<F> {
    pub fn new(inner: mpsc::Receiver<Notification>) -> Self {
        Self {
            inner,
            _phantom: PhantomData,
        }
    }

    fn decode(notification: Notification) -> Result<Vec<F::Value>, DatastoreError> {
        let values = notification.payload.values::<F>();
        notification.payload.release();
        values
    }

    /// Receive the next snapshot
    pub async fn recv(&mut self) -> Result<Vec<F::Value>, SnapshotRecvError> {
        let notification = self.inner.recv().await.ok_or(SnapshotRecvError::Closed)?;
        Self::decode(notification).map_err(SnapshotRecvError::Decode)
    }

    /// Blocking receive for synchronous contexts. Panics inside an async
    /// runtime, like [`mpsc::Receiver::blocking_recv`].
    pub fn blocking_recv(&mut self) -> Result<Vec<F::Value>, SnapshotRecvError> {
        let notification = self.inner.blocking_recv().ok_or(SnapshotRecvError::Closed)?;
        Self::decode(notification).map_err(SnapshotRecvError::Decode)
    }

    /// Try to receive a snapshot without waiting
    pub fn try_recv(&mut self) -> Result<Vec<F::Value>, SnapshotTryRecvError> {
        let notification = self.inner.try_recv()?;
        Self::decode(notification).map_err(SnapshotTryRecvError::Decode)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Number of snapshots waiting
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}
