//! Snapshot delivery

use std::{sync::Arc, time::Duration};

use tracing::{error, trace};

use crate::{
    error::DatastoreError,
    payload::Payload,
    pool::BufferPool,
    subscription::Subscription,
    table::DatapointTable,
    value::FamilyKind,
};

/// Copies a subscription's range into a pool block and hands it over
pub(crate) struct NotificationEngine {
    pool: Arc<dyn BufferPool>,
    alloc_timeout: Duration,
}

impl NotificationEngine {
    pub(crate) fn new(pool: Arc<dyn BufferPool>, alloc_timeout: Duration) -> Self {
        NotificationEngine {
            pool,
            alloc_timeout,
        }
    }

    pub(crate) fn pool(&self) -> &Arc<dyn BufferPool> {
        &self.pool
    }

    /// Send the current values of `subscription`'s range to its subscriber.
    ///
    /// The subscriber's own failure is returned as-is.
    pub(crate) fn deliver<F: FamilyKind>(
        &self,
        table: &DatapointTable,
        subscription: &Subscription,
    ) -> Result<(), DatastoreError> {
        let range = subscription.range;
        let values = table.slice::<F>(range.start, range.length)?;
        let Some(block) = self.pool.alloc(self.alloc_timeout) else {
            error!("{}: unable to allocate a payload buffer", F::FAMILY);
            return Err(DatastoreError::PoolExhausted);
        };
        let payload = Payload::fill::<F>(self.pool.clone(), block, values)?;
        trace!(
            "{}: delivering {} values from {}",
            F::FAMILY,
            range.length,
            range.start
        );
        subscription
            .subscriber
            .notify(payload, range.length)
            .map_err(|err| {
                error!("{}: subscriber failed: {err}", F::FAMILY);
                DatastoreError::Callback(err)
            })
    }
}
