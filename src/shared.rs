//! A datastore shared between threads

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    datastore::Datastore,
    error::DatastoreError,
    subscription::SubscriberRef,
    value::{Family, FamilyKind, FamilyValues},
};

/// Clonable handle serialising every operation through one mutex.
///
/// Subscribers are called with the lock held, so a subscriber must never
/// use the handle that is notifying it.
#[derive(Clone, Debug)]
pub struct SharedDatastore {
    inner: Arc<Mutex<Datastore>>,
}

impl SharedDatastore {
    pub fn new(datastore: Datastore) -> Self {
        SharedDatastore {
            inner: Arc::new(Mutex::new(datastore)),
        }
    }

    /// Lock the datastore for a sequence of operations
    pub fn lock(&self) -> MutexGuard<'_, Datastore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read<F: FamilyKind>(&self, start: usize, count: usize, out: &mut [F::Value]) -> Result<(), DatastoreError> {
        self.lock().read::<F>(start, count, out)
    }

    pub fn values<F: FamilyKind>(&self, start: usize, count: usize) -> Result<Vec<F::Value>, DatastoreError> {
        self.lock().values::<F>(start, count)
    }

    pub fn write<F: FamilyKind>(&self, start: usize, values: &[F::Value]) -> Result<(), DatastoreError> {
        self.lock().write::<F>(start, values)
    }

    pub fn subscribe<F: FamilyKind>(
        &self,
        start: usize,
        length: usize,
        subscriber: &SubscriberRef,
    ) -> Result<(), DatastoreError> {
        self.lock().subscribe::<F>(start, length, subscriber)
    }

    pub fn unsubscribe<F: FamilyKind>(&self, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
        self.lock().unsubscribe::<F>(subscriber)
    }

    pub fn pause<F: FamilyKind>(&self, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
        self.lock().pause::<F>(subscriber)
    }

    pub fn unpause<F: FamilyKind>(&self, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
        self.lock().unpause::<F>(subscriber)
    }

    pub fn read_values(&self, family: Family, start: usize, count: usize) -> Result<FamilyValues, DatastoreError> {
        self.lock().read_values(family, start, count)
    }

    pub fn write_values(&self, start: usize, values: &FamilyValues) -> Result<(), DatastoreError> {
        self.lock().write_values(start, values)
    }

    /// Take the datastore back if this is the last handle
    pub fn into_inner(self) -> Result<Datastore, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(mutex.into_inner().unwrap_or_else(PoisonError::into_inner)),
            Err(inner) => Err(SharedDatastore { inner }),
        }
    }
}

impl From<Datastore> for SharedDatastore {
    fn from(datastore: Datastore) -> Self {
        SharedDatastore::new(datastore)
    }
}
