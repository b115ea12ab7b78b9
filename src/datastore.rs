//! The datastore façade
//!
//! [`Datastore`] owns the datapoint table, one subscription registry per
//! family and the payload pool. Every mutating operation validates its
//! arguments before touching any state; a write that changes at least one
//! value then fans out snapshots to the subscriptions watching the written
//! ids.
//!
//! Operations come in three shapes:
//!
//! - per family, e.g. [`Datastore::write_float`] and
//!   [`Datastore::subscribe_binary`]
//! - generic over a family marker, e.g. `datastore.write::<Float>(..)`
//! - dynamic, taking a runtime [`Family`] and [`FamilyValues`]

use std::{fmt, sync::Arc};

use tracing::{debug, error, info, trace, warn};

use crate::{
    config::{ChangeDetection, DatastoreConfig},
    error::DatastoreError,
    notify::NotificationEngine,
    payload::HEADER_LEN,
    pool::{BufferPool, MemoryPool},
    range::{SubRange, check_bounds},
    schema::{DatapointDef, Schema},
    subscription::{Registry, SubscriberRef, Subscription},
    table::DatapointTable,
    value::{
        Binary, Button, ButtonState, DatapointValue, FAMILY_COUNT, Family, FamilyKind,
        FamilyValues, Float, Int, MultiState, Uint, with_family,
    },
};

/// Builds a [`Datastore`], optionally around a caller-supplied pool
pub struct DatastoreBuilder {
    schema: Schema,
    config: DatastoreConfig,
    pool: Option<Arc<dyn BufferPool>>,
}

impl DatastoreBuilder {
    pub fn new(schema: Schema) -> Self {
        DatastoreBuilder {
            schema,
            config: DatastoreConfig::default(),
            pool: None,
        }
    }

    pub fn config(mut self, config: DatastoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Take payload blocks from `pool` instead of a private [`MemoryPool`]
    pub fn pool(mut self, pool: Arc<dyn BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn build(self) -> Result<Datastore, DatastoreError> {
        let table = DatapointTable::from_schema(&self.schema);
        let buffer_size = Family::ALL
            .into_iter()
            .map(|family| {
                with_family!(family, F => {
                    table.column::<F>().len() * <<F as FamilyKind>::Value as DatapointValue>::SIZE
                })
            })
            .max()
            .unwrap_or(0);
        let block_size = HEADER_LEN + buffer_size;

        let pool: Arc<dyn BufferPool> = match self.pool {
            Some(pool) if pool.block_size() < block_size => {
                error!(
                    "{} blocks of {} bytes cannot hold {block_size} byte payloads",
                    pool.id(),
                    pool.block_size()
                );
                return Err(DatastoreError::InvalidArg("pool blocks too small for payloads"));
            }
            Some(pool) => pool,
            None => Arc::new(
                MemoryPool::try_new(self.config.buffer_count, block_size)
                    .ok_or(DatastoreError::OutOfMemory)?,
            ),
        };

        let mut registries = Vec::with_capacity(FAMILY_COUNT);
        for family in Family::ALL {
            registries.push(Registry::with_capacity(
                family,
                self.config.max_subscriptions[family.index()],
            )?);
        }
        let registries: [Registry; FAMILY_COUNT] = registries
            .try_into()
            .map_err(|_| DatastoreError::OutOfMemory)?;

        info!(
            "Datastore ready with {:?} datapoints, {buffer_size} byte snapshots from {}",
            table.counts(),
            pool.id()
        );
        Ok(Datastore {
            table,
            registries,
            engine: NotificationEngine::new(pool, self.config.alloc_timeout),
            buffer_size,
            change_detection: self.config.change_detection,
        })
    }
}

pub struct Datastore {
    table: DatapointTable,
    registries: [Registry; FAMILY_COUNT],
    engine: NotificationEngine,
    buffer_size: usize,
    change_detection: ChangeDetection,
}

macro_rules! family_api {
    ($marker:ty, $value:ty, $label:literal,
     $read:ident, $write:ident, $subscribe:ident, $unsubscribe:ident, $pause:ident, $unpause:ident) => {
        #[doc = concat!("Copy `count` ", $label, " values starting at `start` into `out`")]
        pub fn $read(&self, start: usize, count: usize, out: &mut [$value]) -> Result<(), DatastoreError> {
            self.read::<$marker>(start, count, out)
        }

        #[doc = concat!("Store ", $label, " values from `start` on and notify subscribers")]
        pub fn $write(&mut self, start: usize, values: &[$value]) -> Result<(), DatastoreError> {
            self.write::<$marker>(start, values)
        }

        #[doc = concat!("Watch `length` ", $label, " datapoints from `start`")]
        pub fn $subscribe(
            &mut self,
            start: usize,
            length: usize,
            subscriber: &SubscriberRef,
        ) -> Result<(), DatastoreError> {
            self.subscribe::<$marker>(start, length, subscriber)
        }

        pub fn $unsubscribe(&mut self, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
            self.unsubscribe::<$marker>(subscriber)
        }

        pub fn $pause(&mut self, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
            self.pause::<$marker>(subscriber)
        }

        pub fn $unpause(&mut self, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
            self.unpause::<$marker>(subscriber)
        }
    };
}

impl Datastore {
    /// Create a datastore with every datapoint of `schema` at its default
    pub fn init(schema: Schema, config: &DatastoreConfig) -> Result<Self, DatastoreError> {
        DatastoreBuilder::new(schema).config(config.clone()).build()
    }

    pub fn builder(schema: Schema) -> DatastoreBuilder {
        DatastoreBuilder::new(schema)
    }

    /// Largest snapshot any family can produce, in bytes
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Smallest pool block able to carry any snapshot
    pub fn required_block_size(&self) -> usize {
        HEADER_LEN + self.buffer_size
    }

    pub fn pool(&self) -> &Arc<dyn BufferPool> {
        self.engine.pool()
    }

    pub fn table(&self) -> &DatapointTable {
        &self.table
    }

    pub fn change_detection(&self) -> ChangeDetection {
        self.change_detection
    }

    pub fn count(&self, family: Family) -> usize {
        self.table.count(family)
    }

    pub fn registry(&self, family: Family) -> &Registry {
        &self.registries[family.index()]
    }

    pub fn subscriptions<F: FamilyKind>(&self) -> &Registry {
        self.registry(F::FAMILY)
    }

    /// Name, flags and default of one datapoint
    pub fn datapoint<F: FamilyKind>(&self, id: usize) -> Option<&DatapointDef<F::Value>> {
        self.table.definition::<F>(id)
    }

    /// Id of the datapoint of family `F` called `name`
    pub fn find<F: FamilyKind>(&self, name: &str) -> Option<usize> {
        self.table.column::<F>().find(name)
    }

    pub fn read<F: FamilyKind>(
        &self,
        start: usize,
        count: usize,
        out: &mut [F::Value],
    ) -> Result<(), DatastoreError> {
        self.table
            .read::<F>(start, count, out)
            .inspect_err(|err| error!("{}: read rejected: {err}", F::FAMILY))
    }

    /// The stored values of `start..start + count`
    pub fn values<F: FamilyKind>(
        &self,
        start: usize,
        count: usize,
    ) -> Result<Vec<F::Value>, DatastoreError> {
        Ok(self.table.slice::<F>(start, count)?.to_vec())
    }

    /// Store `values` from `start` on.
    ///
    /// If anything changed, every unpaused subscription covering a written id
    /// receives one snapshot per covered id, in ascending id order and then
    /// registry order. The first failed delivery stops the fan-out and is
    /// returned; the new values stay stored either way.
    pub fn write<F: FamilyKind>(
        &mut self,
        start: usize,
        values: &[F::Value],
    ) -> Result<(), DatastoreError> {
        check_bounds(start, values.len(), self.table.count(F::FAMILY))
            .inspect_err(|err| error!("{}: write rejected: {err}", F::FAMILY))?;
        if values.is_empty() {
            return Ok(());
        }
        let changes = self.table.write::<F>(start, values)?;
        if !changes.any() {
            trace!("{}: write at {start} changed nothing", F::FAMILY);
            return Ok(());
        }
        debug!("{}: {} values changed at {start}", F::FAMILY, values.len());

        let registry = &self.registries[F::FAMILY.index()];
        let every_id = self.change_detection == ChangeDetection::WriteWide;
        for id in changes.ids().filter(|id| every_id || changes.is_changed(*id)) {
            for subscription in registry.watching(id) {
                self.engine.deliver::<F>(&self.table, subscription)?;
            }
        }
        Ok(())
    }

    /// Register `subscriber` for `length` datapoints from `start`, then send
    /// it the current values.
    ///
    /// If that first delivery fails the subscription stays registered and the
    /// failure is returned.
    pub fn subscribe<F: FamilyKind>(
        &mut self,
        start: usize,
        length: usize,
        subscriber: &SubscriberRef,
    ) -> Result<(), DatastoreError> {
        if length == 0 {
            error!("{}: refusing an empty subscription", F::FAMILY);
            return Err(DatastoreError::InvalidArg("subscription length must be at least 1"));
        }
        check_bounds(start, length, self.table.count(F::FAMILY))
            .inspect_err(|err| error!("{}: subscription rejected: {err}", F::FAMILY))?;

        let subscription = Subscription::new(SubRange::new(start, length), subscriber.clone());
        let slot = self.registries[F::FAMILY.index()].add(subscription.clone())?;
        debug!(
            "{}: subscription to {start}+{length} in slot {slot}",
            F::FAMILY
        );
        self.engine.deliver::<F>(&self.table, &subscription)
    }

    pub fn unsubscribe<F: FamilyKind>(
        &mut self,
        subscriber: &SubscriberRef,
    ) -> Result<(), DatastoreError> {
        self.registries[F::FAMILY.index()]
            .remove(subscriber)
            .inspect_err(|_| warn!("{}: unsubscribe of an unknown subscriber", F::FAMILY))?;
        info!("{}: subscription removed", F::FAMILY);
        Ok(())
    }

    /// Stop deliveries to `subscriber` until it is unpaused
    pub fn pause<F: FamilyKind>(&mut self, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
        self.set_paused::<F>(subscriber, true)
    }

    /// Resume deliveries to `subscriber`. Leaving the paused state sends the
    /// current snapshot; unpausing an active subscription does nothing.
    pub fn unpause<F: FamilyKind>(&mut self, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
        self.set_paused::<F>(subscriber, false)
    }

    fn set_paused<F: FamilyKind>(
        &mut self,
        subscriber: &SubscriberRef,
        paused: bool,
    ) -> Result<(), DatastoreError> {
        let registry = &mut self.registries[F::FAMILY.index()];
        let Some(index) = registry.position(subscriber) else {
            warn!("{}: unknown subscriber, cannot change its pause state", F::FAMILY);
            return Err(DatastoreError::NotFound);
        };
        let entry = registry.get_mut(index).ok_or(DatastoreError::NotFound)?;
        let resumed = entry.paused && !paused;
        entry.paused = paused;
        info!(
            "{}: subscription {}",
            F::FAMILY,
            if paused { "paused" } else { "unpaused" }
        );
        if resumed {
            let entry = entry.clone();
            return self.engine.deliver::<F>(&self.table, &entry);
        }
        Ok(())
    }

    /// Put every datapoint of family `F` back to its default, notifying like
    /// any other write
    pub fn restore_defaults<F: FamilyKind>(&mut self) -> Result<(), DatastoreError> {
        let defaults = self.table.column::<F>().defaults();
        if defaults.is_empty() {
            return Ok(());
        }
        self.write::<F>(0, &defaults)
    }

    pub fn read_values(
        &self,
        family: Family,
        start: usize,
        count: usize,
    ) -> Result<FamilyValues, DatastoreError> {
        with_family!(family, F => self.values::<F>(start, count).map(F::wrap))
    }

    pub fn write_values(&mut self, start: usize, values: &FamilyValues) -> Result<(), DatastoreError> {
        with_family!(values.family(), F => {
            let values = F::unwrap(values).ok_or(DatastoreError::InvalidArg("family mismatch"))?;
            self.write::<F>(start, values)
        })
    }

    pub fn subscribe_family(
        &mut self,
        family: Family,
        start: usize,
        length: usize,
        subscriber: &SubscriberRef,
    ) -> Result<(), DatastoreError> {
        with_family!(family, F => self.subscribe::<F>(start, length, subscriber))
    }

    pub fn unsubscribe_family(
        &mut self,
        family: Family,
        subscriber: &SubscriberRef,
    ) -> Result<(), DatastoreError> {
        with_family!(family, F => self.unsubscribe::<F>(subscriber))
    }

    pub fn pause_family(&mut self, family: Family, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
        with_family!(family, F => self.pause::<F>(subscriber))
    }

    pub fn unpause_family(&mut self, family: Family, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
        with_family!(family, F => self.unpause::<F>(subscriber))
    }

    family_api!(Binary, bool, "binary",
        read_binary, write_binary, subscribe_binary, unsubscribe_binary, pause_binary, unpause_binary);
    family_api!(Button, ButtonState, "button",
        read_button, write_button, subscribe_button, unsubscribe_button, pause_button, unpause_button);
    family_api!(Float, f32, "float",
        read_float, write_float, subscribe_float, unsubscribe_float, pause_float, unpause_float);
    family_api!(Int, i32, "signed integer",
        read_int, write_int, subscribe_int, unsubscribe_int, pause_int, unpause_int);
    family_api!(MultiState, u32, "multi-state",
        read_multi_state, write_multi_state, subscribe_multi_state, unsubscribe_multi_state,
        pause_multi_state, unpause_multi_state);
    family_api!(Uint, u32, "unsigned integer",
        read_uint, write_uint, subscribe_uint, unsubscribe_uint, pause_uint, unpause_uint);
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("datapoints", &self.table.counts())
            .field(
                "subscriptions",
                &self.registries.each_ref().map(|r| r.len()),
            )
            .field("pool", &self.pool().id())
            .field("buffer_size", &self.buffer_size)
            .field("change_detection", &self.change_detection)
            .finish()
    }
}
