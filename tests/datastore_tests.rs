use std::sync::{Arc, Mutex};

use datastore::{
    Binary, BufferPool, ButtonState, CallbackError, ChangeDetection, Datastore, DatastoreConfig,
    DatastoreError, Family, FamilyKind, FamilyValues, Float, Int, MemoryPool, MultiState, Payload,
    Schema, SubRange, Subscriber, SubscriberRef, Uint, in_bounds, payload::HEADER_LEN,
    subscription::same_subscriber,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::TestWriter;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_writer(TestWriter::new())
        .try_init();
}

/// Remembers every snapshot it is handed
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(FamilyValues, usize, usize)>>,
}

impl Recorder {
    fn new() -> (Arc<Recorder>, SubscriberRef) {
        let recorder = Arc::new(Recorder::default());
        let subscriber: SubscriberRef = recorder.clone();
        (recorder, subscriber)
    }

    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn values(&self) -> Vec<FamilyValues> {
        self.seen.lock().unwrap().iter().map(|(v, _, _)| v.clone()).collect()
    }

    fn last(&self) -> Option<(FamilyValues, usize, usize)> {
        self.seen.lock().unwrap().last().cloned()
    }
}

impl Subscriber for Recorder {
    fn notify(&self, payload: Payload, count: usize) -> Result<(), CallbackError> {
        let values = payload.to_family_values().map_err(|_| CallbackError::io())?;
        self.seen
            .lock()
            .unwrap()
            .push((values, count, payload.data_length()));
        Ok(())
    }
}

fn config() -> DatastoreConfig {
    DatastoreConfig::default()
}

#[test]
fn simple_binary_fan_out() {
    init_logging();
    let schema = Schema::new().with_uniform::<Binary>(4, false);
    let mut store = Datastore::init(schema, &config()).unwrap();
    let (k, subscriber) = Recorder::new();

    store.subscribe_binary(0, 2, &subscriber).unwrap();
    assert_eq!(k.values(), [FamilyValues::Binary(vec![false, false])]);

    store.write_binary(0, &[true, true, false, false]).unwrap();
    assert_eq!(
        k.values(),
        [
            FamilyValues::Binary(vec![false, false]),
            FamilyValues::Binary(vec![true, true]),
            FamilyValues::Binary(vec![true, true]),
        ]
    );
}

#[test]
fn out_of_range_write_rejected() {
    init_logging();
    let schema = Schema::new().with_uniform::<Binary>(4, false);
    let mut store = Datastore::init(schema, &config()).unwrap();
    let (k, subscriber) = Recorder::new();
    store.subscribe_binary(0, 4, &subscriber).unwrap();

    assert_eq!(
        store.write_binary(3, &[true, true]),
        Err(DatastoreError::InvalidRange {
            start: 3,
            count: 2,
            total: 4
        })
    );
    assert_eq!(store.values::<Binary>(0, 4).unwrap(), [false; 4]);
    assert_eq!(k.count(), 1);
}

#[test]
fn multi_state_unpause_replays_snapshot() {
    init_logging();
    let schema = Schema::new().with_uniform::<MultiState>(2, 0);
    let mut store = Datastore::init(schema, &config()).unwrap();
    let (k, subscriber) = Recorder::new();

    store.subscribe_multi_state(0, 2, &subscriber).unwrap();
    assert_eq!(k.values(), [FamilyValues::MultiState(vec![0, 0])]);
    store.pause_multi_state(&subscriber).unwrap();
    store.write_multi_state(0, &[5, 5]).unwrap();
    assert_eq!(k.count(), 1);

    store.unpause_multi_state(&subscriber).unwrap();
    assert_eq!(k.count(), 2);
    assert_eq!(k.last().unwrap().0, FamilyValues::MultiState(vec![5, 5]));
}

#[test]
fn capacity_boundary_and_compaction() {
    init_logging();
    let mut max = [8; 6];
    max[Family::Float.index()] = 3;
    let config = DatastoreConfig {
        max_subscriptions: max,
        ..config()
    };
    let mut store = Datastore::init(Schema::firmware(), &config).unwrap();
    let subs: Vec<_> = (0..5).map(|_| Recorder::new().1).collect();
    let [a, b, c, d, e] = &subs[..] else {
        unreachable!()
    };

    for s in [a, b, c] {
        store.subscribe_float(0, 1, s).unwrap();
    }
    assert_eq!(
        store.subscribe_float(0, 1, d),
        Err(DatastoreError::Full { capacity: 3 })
    );
    assert_eq!(store.subscriptions::<Float>().len(), 3);

    store.unsubscribe_float(b).unwrap();
    let order = |store: &Datastore| -> Vec<SubscriberRef> {
        store
            .subscriptions::<Float>()
            .iter()
            .map(|s| s.subscriber.clone())
            .collect()
    };
    let remaining = order(&store);
    assert_eq!(remaining.len(), 2);
    assert!(same_subscriber(&remaining[0], a));
    assert!(same_subscriber(&remaining[1], c));

    store.subscribe_float(0, 1, e).unwrap();
    let remaining = order(&store);
    assert_eq!(remaining.len(), 3);
    assert!(same_subscriber(&remaining[2], e));
    assert_eq!(store.unsubscribe_float(b), Err(DatastoreError::NotFound));
}

#[test]
fn no_op_write_is_silent() {
    init_logging();
    let mut store = Datastore::init(Schema::firmware(), &config()).unwrap();
    let (k, subscriber) = Recorder::new();
    store.subscribe_uint(0, 4, &subscriber).unwrap();
    store.write_uint(0, &[0, 1, 2, 3]).unwrap();
    store.write_uint(2, &[2]).unwrap();
    assert_eq!(k.count(), 1);
}

#[test]
fn range_predicate_totality() {
    for total in 0..5usize {
        for start in 0..7usize {
            for count in 0..7usize {
                assert_eq!(
                    in_bounds(start, count, total),
                    start < total && start + count <= total
                );
            }
        }
    }
    let range = SubRange::new(1, 2);
    assert!(range.covers(2));
    assert!(!range.covers(3));
}

fn round_trip<F: FamilyKind>(store: &mut Datastore, values: &[F::Value]) {
    store.write::<F>(0, values).unwrap();
    let mut out = values.to_vec();
    store.read::<F>(0, values.len(), &mut out).unwrap();
    for (written, read) in values.iter().zip(&out) {
        assert!(
            datastore::value::DatapointValue::same_as(written, read),
            "{}: wrote {written:?}, read {read:?}",
            F::FAMILY
        );
    }
}

#[test]
fn every_family_round_trips() {
    let mut store = Datastore::init(Schema::firmware(), &config()).unwrap();
    round_trip::<Binary>(&mut store, &[false, true, true, false]);
    round_trip::<datastore::Button>(
        &mut store,
        &[ButtonState::LongPressed, ButtonState::ShortPressed],
    );
    round_trip::<Float>(&mut store, &[-0.0, f32::NAN, f32::INFINITY, 1e-40]);
    round_trip::<Int>(&mut store, &[i32::MIN, -1, i32::MAX]);
    round_trip::<MultiState>(&mut store, &[7, 0]);
    round_trip::<Uint>(&mut store, &[u32::MAX, 0, 1, 2]);
}

#[test]
fn fan_out_counts_overlap() {
    init_logging();
    let schema = Schema::new().with_uniform::<Uint>(10, 0);
    let mut store = Datastore::init(schema, &config()).unwrap();

    let mut value = 0u32;
    for (sub_start, sub_len) in [(0, 3), (2, 4), (5, 5), (9, 1)] {
        for (start, count) in [(0, 10), (1, 2), (4, 3), (9, 1)] {
            let (k, subscriber) = Recorder::new();
            store.subscribe_uint(sub_start, sub_len, &subscriber).unwrap();
            value += 1;
            store.write_uint(start, &vec![value; count]).unwrap();
            let expected = SubRange::new(sub_start, sub_len).overlap(start, count);
            assert_eq!(
                k.count() - 1,
                expected,
                "sub {sub_start}+{sub_len}, write {start}+{count}"
            );
            store.unsubscribe_uint(&subscriber).unwrap();
        }
    }
}

#[test]
fn paused_subscriptions_hear_nothing() {
    let mut store = Datastore::init(Schema::firmware(), &config()).unwrap();
    let (k, subscriber) = Recorder::new();
    store.subscribe_int(0, 4, &subscriber).unwrap();
    store.pause_int(&subscriber).unwrap();
    store.pause_int(&subscriber).unwrap();
    for i in 0..5 {
        store.write_int(0, &[i + 10; 4]).unwrap();
    }
    assert_eq!(k.count(), 1);
}

#[test]
fn initial_delivery_carries_range() {
    let mut store = Datastore::init(Schema::firmware(), &config()).unwrap();
    let (k, subscriber) = Recorder::new();
    store.subscribe_float(1, 3, &subscriber).unwrap();
    let (values, count, data_length) = k.last().unwrap();
    assert_eq!(values, FamilyValues::Float(vec![1.0, 2.0, 3.0]));
    assert_eq!(count, 3);
    assert_eq!(data_length, 12);
}

#[test]
fn unpause_delivers_once() {
    let mut store = Datastore::init(Schema::firmware(), &config()).unwrap();
    let (k, subscriber) = Recorder::new();
    store.subscribe_uint(0, 2, &subscriber).unwrap();
    store.unpause_uint(&subscriber).unwrap();
    assert_eq!(k.count(), 1);
    store.pause_uint(&subscriber).unwrap();
    store.unpause_uint(&subscriber).unwrap();
    assert_eq!(k.count(), 2);
    store.unpause_uint(&subscriber).unwrap();
    assert_eq!(k.count(), 2);

    let (_, stranger) = Recorder::new();
    assert_eq!(store.pause_uint(&stranger), Err(DatastoreError::NotFound));
    assert_eq!(store.unpause_uint(&stranger), Err(DatastoreError::NotFound));
}

#[test]
fn removal_keeps_order() {
    let mut store = Datastore::init(Schema::firmware(), &config()).unwrap();
    let (_, a) = Recorder::new();
    let (_, b) = Recorder::new();
    let (_, c) = Recorder::new();
    for s in [&a, &b, &c] {
        store.subscribe_int(0, 1, s).unwrap();
    }
    store.unsubscribe_int(&b).unwrap();
    let registry = store.subscriptions::<Int>();
    assert_eq!(registry.len(), 2);
    assert!(registry.get(0).unwrap().is_for(&a));
    assert!(registry.get(1).unwrap().is_for(&c));
}

#[test]
fn exhausted_pool_keeps_subscription() {
    init_logging();
    let pool = Arc::new(MemoryPool::new(1, HEADER_LEN + 16));
    let mut store = Datastore::builder(Schema::firmware())
        .config(config())
        .pool(pool.clone())
        .build()
        .unwrap();
    let held = pool.alloc(std::time::Duration::ZERO).unwrap();

    let (k, subscriber) = Recorder::new();
    assert_eq!(
        store.subscribe_binary(0, 1, &subscriber),
        Err(DatastoreError::PoolExhausted)
    );
    assert_eq!(store.subscriptions::<Binary>().len(), 1);
    assert_eq!(k.count(), 0);

    pool.free(held);
    store.write_binary(0, &[false]).unwrap();
    assert_eq!(k.count(), 1);
}

#[test]
fn blocks_return_after_delivery() {
    let pool = Arc::new(MemoryPool::new(2, HEADER_LEN + 16));
    let mut store = Datastore::builder(Schema::firmware())
        .pool(pool.clone())
        .build()
        .unwrap();
    let held: Arc<Mutex<Vec<Payload>>> = Arc::default();
    let holder = held.clone();
    let subscriber = datastore::subscriber_fn(move |payload, _| {
        holder.lock().unwrap().push(payload);
        Ok(())
    });
    store.subscribe_int(0, 4, &subscriber).unwrap();
    store.write_int(0, &[9, 9]).unwrap_err();
    // both blocks are held by the subscriber, so the second delivery of the
    // write found the pool empty
    assert_eq!(pool.in_use(), 2);
    held.lock().unwrap().clear();
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn callback_error_aborts_fan_out() {
    let mut store = Datastore::init(Schema::firmware(), &config()).unwrap();
    let (first, first_ref) = Recorder::new();
    let failing = datastore::subscriber_fn(|_, _| Err(CallbackError::new(-71)));
    let (last, last_ref) = Recorder::new();

    store.subscribe_uint(0, 1, &first_ref).unwrap();
    assert_eq!(
        store.subscribe_uint(0, 1, &failing).unwrap_err().code(),
        -71
    );
    store.subscribe_uint(0, 1, &last_ref).unwrap();

    let err = store.write_uint(0, &[42]).unwrap_err();
    assert_eq!(err, DatastoreError::Callback(CallbackError::new(-71)));
    assert_eq!(first.count(), 2);
    assert_eq!(last.count(), 1);
    // the value is committed regardless
    assert_eq!(store.values::<Uint>(0, 1).unwrap(), [42]);
}

#[test]
fn per_datapoint_change_detection() {
    let config = config().with_change_detection(ChangeDetection::PerDatapoint);
    let mut store = Datastore::init(Schema::new().with_uniform::<Uint>(4, 0), &config).unwrap();
    let (k, subscriber) = Recorder::new();
    store.subscribe_uint(0, 4, &subscriber).unwrap();

    store.write_uint(0, &[0, 5, 0, 6]).unwrap();
    assert_eq!(k.count(), 3);
    assert_eq!(k.last().unwrap().0, FamilyValues::Uint(vec![0, 5, 0, 6]));

    let mut wide = Datastore::init(Schema::new().with_uniform::<Uint>(4, 0), &DatastoreConfig::default()).unwrap();
    let (k, subscriber) = Recorder::new();
    wide.subscribe_uint(0, 4, &subscriber).unwrap();
    wide.write_uint(0, &[0, 5, 0, 6]).unwrap();
    assert_eq!(k.count(), 5);
}

#[test]
fn button_values_decode() {
    let mut store = Datastore::init(Schema::firmware(), &config()).unwrap();
    let (k, subscriber) = Recorder::new();
    store.subscribe_button(2, 2, &subscriber).unwrap();
    store
        .write_button(3, &[ButtonState::ShortPressed])
        .unwrap();
    assert_eq!(
        k.last().unwrap().0,
        FamilyValues::Button(vec![ButtonState::Unpressed, ButtonState::ShortPressed])
    );
    let mut out = [ButtonState::default(); 4];
    store.read_button(0, 4, &mut out).unwrap();
    assert_eq!(out[3], ButtonState::ShortPressed);
}

#[test]
fn fan_out_walks_ids_before_subscriptions() {
    init_logging();
    let schema = Schema::new().with_uniform::<Uint>(3, 0);
    let mut store = Datastore::init(schema, &config()).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let labelled = |label: &'static str| {
        let order = order.clone();
        datastore::subscriber_fn(move |_, _| {
            order.lock().unwrap().push(label);
            Ok(())
        })
    };
    let a = labelled("A");
    let b = labelled("B");
    store.subscribe_uint(1, 2, &a).unwrap();
    store.subscribe_uint(0, 2, &b).unwrap();
    order.lock().unwrap().clear();

    store.write_uint(0, &[1, 2, 3]).unwrap();
    assert_eq!(*order.lock().unwrap(), ["B", "A", "B", "A"]);
}

#[test]
fn init_without_memory_fails_cleanly() {
    let config = DatastoreConfig::default().with_max_subscriptions(usize::MAX);
    assert_eq!(
        Datastore::init(Schema::firmware(), &config).unwrap_err(),
        DatastoreError::OutOfMemory
    );
    let config = DatastoreConfig {
        buffer_count: usize::MAX,
        ..DatastoreConfig::default()
    };
    assert_eq!(
        Datastore::init(Schema::firmware(), &config).unwrap_err(),
        DatastoreError::OutOfMemory
    );
}
