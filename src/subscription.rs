//! Subscribers and the per-family subscription registry

use std::{fmt, sync::Arc};

use tracing::{debug, error};

use crate::{error::CallbackError, error::DatastoreError, payload::Payload, range::SubRange, value::Family};

/// Receives snapshots of a watched datapoint range.
///
/// `count` is the number of values in the payload. The payload, and the pool
/// block it holds, belongs to the subscriber from here on: dropping it is
/// how the block goes back to the pool.
///
/// Callbacks run on the thread performing the write and must not call back
/// into the datastore that is notifying them.
pub trait Subscriber: Send + Sync {
    fn notify(&self, payload: Payload, count: usize) -> Result<(), CallbackError>;
}

impl<Func> Subscriber for Func
where
    Func: Fn(Payload, usize) -> Result<(), CallbackError> + Send + Sync,
{
    fn notify(&self, payload: Payload, count: usize) -> Result<(), CallbackError> {
        self(payload, count)
    }
}

/// Shared handle to a subscriber. Its identity is the address it points at.
pub type SubscriberRef = Arc<dyn Subscriber>;

/// Wrap a closure as a [`SubscriberRef`]
pub fn subscriber_fn<Func>(callback: Func) -> SubscriberRef
where
    Func: Fn(Payload, usize) -> Result<(), CallbackError> + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Whether two handles name the same subscriber
pub fn same_subscriber(a: &SubscriberRef, b: &SubscriberRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// One registered interest in a datapoint range
#[derive(Clone)]
pub struct Subscription {
    pub range: SubRange,
    pub paused: bool,
    pub subscriber: SubscriberRef,
}

impl Subscription {
    pub fn new(range: SubRange, subscriber: SubscriberRef) -> Self {
        Subscription {
            range,
            paused: false,
            subscriber,
        }
    }

    pub fn is_for(&self, subscriber: &SubscriberRef) -> bool {
        same_subscriber(&self.subscriber, subscriber)
    }

    /// Whether a change to `id` should reach this subscription
    pub fn wants(&self, id: usize) -> bool {
        !self.paused && self.range.covers(id)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("range", &self.range)
            .field("paused", &self.paused)
            .field("subscriber", &Arc::as_ptr(&self.subscriber).cast::<()>())
            .finish()
    }
}

/// Fixed-capacity, insertion-ordered list of subscriptions for one family
#[derive(Debug)]
pub struct Registry {
    family: Family,
    entries: Vec<Subscription>,
    max_count: usize,
}

impl Registry {
    /// Reserve room for `max_count` subscriptions up front
    pub fn with_capacity(family: Family, max_count: usize) -> Result<Self, DatastoreError> {
        let mut entries = Vec::new();
        entries.try_reserve_exact(max_count).map_err(|err| {
            error!("{family}: unable to reserve {max_count} subscriptions: {err}");
            DatastoreError::OutOfMemory
        })?;
        Ok(Registry {
            family,
            entries,
            max_count,
        })
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Number of active subscriptions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Append a subscription, returning its slot
    pub fn add(&mut self, subscription: Subscription) -> Result<usize, DatastoreError> {
        if self.entries.len() + 1 > self.max_count {
            error!("{}: subscription registry is full", self.family);
            return Err(DatastoreError::Full {
                capacity: self.max_count,
            });
        }
        self.entries.push(subscription);
        Ok(self.entries.len() - 1)
    }

    /// Remove the first subscription of `subscriber`. The last entry takes
    /// its slot.
    pub fn remove(&mut self, subscriber: &SubscriberRef) -> Result<Subscription, DatastoreError> {
        let index = self.position(subscriber).ok_or(DatastoreError::NotFound)?;
        let removed = self.entries.swap_remove(index);
        debug!("{}: removed subscription at slot {index}", self.family);
        Ok(removed)
    }

    pub fn position(&self, subscriber: &SubscriberRef) -> Option<usize> {
        self.entries.iter().position(|s| s.is_for(subscriber))
    }

    pub fn get(&self, index: usize) -> Option<&Subscription> {
        self.entries.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Subscription> {
        self.entries.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    /// Unpaused subscriptions covering `id`, in registry order
    pub fn watching(&self, id: usize) -> impl Iterator<Item = &Subscription> {
        self.entries.iter().filter(move |s| s.wants(id))
    }
}
