//! A typed datapoint store with range subscriptions, for realtime control
//! firmware.
//!
//! The store holds a fixed table of datapoints in six value families: binary,
//! button state, float, signed integer, multi-state and unsigned integer. The
//! table layout comes from a [`Schema`], and every datapoint starts at its
//! default value.
//!
//! Components register a [`Subscriber`] for a contiguous run of datapoint ids
//! in one family. Whenever a write changes something, each unpaused
//! subscription covering a written id gets a [`Payload`]: a snapshot of its
//! whole range, copied into a block borrowed from a [`BufferPool`]. Dropping
//! the payload returns the block.
//!
//! The crate is split into:
//!
//! - [`Datastore`], the single-owner store and its per-family API
//!   (`write_float`, `subscribe_binary`, ...), generic API
//!   (`write::<Float>`) and dynamic API ([`FamilyValues`]).
//! - [`SharedDatastore`], a clonable mutex-guarded handle for threads.
//! - [`DatastoreService`], which runs a datastore as a tokio task behind a
//!   bounded request queue and hands out async [`ServiceClient`]s.
//! - [`channel`], subscribers that forward snapshots into tokio channels.
//!
//! ## Example
//!
//! ```
//! use datastore::{Datastore, DatastoreConfig, Float, Schema, channel::snapshot_channel};
//!
//! let mut store = Datastore::init(Schema::firmware(), &DatastoreConfig::default()).unwrap();
//! let (subscriber, mut updates) = snapshot_channel::<Float>(8);
//!
//! store.subscribe_float(0, 2, &subscriber).unwrap();
//! assert_eq!(updates.try_recv().unwrap(), [0.0, 1.0]);
//!
//! store.write_float(1, &[4.5]).unwrap();
//! assert_eq!(updates.try_recv().unwrap(), [0.0, 4.5]);
//!
//! // Writing the same value again notifies nobody
//! store.write_float(1, &[4.5]).unwrap();
//! assert!(updates.try_recv().is_err());
//! ```

pub mod channel;
pub mod config;
mod datastore;
pub mod error;
mod notify;
pub mod payload;
pub mod pool;
pub mod range;
pub mod schema;
pub mod service;
mod shared;
pub mod subscription;
pub mod table;
pub mod value;

pub use crate::config::{ChangeDetection, DatastoreConfig};
pub use crate::datastore::{Datastore, DatastoreBuilder};
pub use crate::error::{CallbackError, DatastoreError};
pub use crate::payload::Payload;
pub use crate::pool::{BufferPool, MemoryPool, PoolId};
pub use crate::range::{SubRange, in_bounds};
pub use crate::schema::{DatapointDef, DatapointFlags, Schema};
pub use crate::service::{DatastoreService, ServiceClient};
pub use crate::shared::SharedDatastore;
pub use crate::subscription::{Subscriber, SubscriberRef, subscriber_fn};
pub use crate::value::{
    Binary, Button, ButtonState, Family, FamilyKind, FamilyValues, Float, Int, MultiState, Uint,
};
