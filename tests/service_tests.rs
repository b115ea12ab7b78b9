use std::time::Duration;

use datastore::{
    Datastore, DatastoreConfig, DatastoreError, DatastoreService, Family, Float, Int, Schema, Uint,
    channel::{channel_subscriber, snapshot_channel},
    subscriber_fn,
};
use tokio::select;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::TestWriter;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_writer(TestWriter::new())
        .try_init();
}

/// Defaults with a reply deadline generous enough for a busy test machine
fn config() -> DatastoreConfig {
    DatastoreConfig {
        response_timeout: Duration::from_secs(2),
        ..DatastoreConfig::default()
    }
}

fn start(config: &DatastoreConfig) -> DatastoreService {
    let datastore = Datastore::init(Schema::firmware(), config).unwrap();
    DatastoreService::spawn(datastore, config)
}

#[tokio::test]
async fn test_write_then_read() {
    init_logging();
    let service = start(&config());
    let client = service.client();

    client.write::<Int>(1, &[-7, 8]).await.unwrap();
    assert_eq!(client.read::<Int>(0, 4).await.unwrap(), [0, -7, 8, 2]);
    assert!(matches!(
        client.read::<Int>(2, 3).await,
        Err(DatastoreError::InvalidRange { .. })
    ));

    let datastore = service.stop().await.unwrap();
    assert_eq!(datastore.values::<Int>(1, 2).unwrap(), [-7, 8]);
}

#[tokio::test]
async fn test_subscription_events() {
    init_logging();
    let service = start(&config());
    let client = service.client();
    let (subscriber, mut updates) = snapshot_channel::<Float>(8);

    client.subscribe::<Float>(0, 2, &subscriber).await.unwrap();
    assert_eq!(updates.recv().await.unwrap(), [0.0, 1.0]);

    client.post_write::<Float>(1, &[2.5]).unwrap();
    select! {
        _ = tokio::time::sleep(Duration::from_secs(4)) => panic!("Did not get subscription event"),
        v = updates.recv() => assert_eq!(v.unwrap(), [0.0, 2.5]),
    }

    client.pause::<Float>(&subscriber).await.unwrap();
    client.write::<Float>(0, &[9.0]).await.unwrap();
    assert!(updates.try_recv().is_err());
    client.unpause::<Float>(&subscriber).await.unwrap();
    assert_eq!(updates.recv().await.unwrap(), [9.0, 2.5]);

    client.unsubscribe::<Float>(&subscriber).await.unwrap();
    assert_eq!(
        client.unsubscribe::<Float>(&subscriber).await,
        Err(DatastoreError::NotFound)
    );
    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_queue_full() {
    init_logging();
    let config = DatastoreConfig {
        queue_depth: 1,
        ..config()
    };
    let service = start(&config);
    let client = service.client();

    // The service task cannot run until this task yields
    client.post_write::<Uint>(0, &[1]).unwrap();
    assert_eq!(
        client.post_write::<Uint>(0, &[2]),
        Err(DatastoreError::QueueFull)
    );
    let value = loop {
        match client.read::<Uint>(0, 1).await {
            Err(DatastoreError::QueueFull) => tokio::time::sleep(Duration::from_millis(1)).await,
            other => break other.unwrap(),
        }
    };
    assert_eq!(value, [1]);
    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_stopped_service() {
    init_logging();
    let service = start(&config());
    let client = service.client();
    let datastore = service.stop().await.unwrap();
    assert_eq!(datastore.count(Family::Uint), 4);
    assert_eq!(
        client.read::<Uint>(0, 1).await,
        Err(DatastoreError::ServiceClosed)
    );
    assert_eq!(
        client.post_write::<Uint>(0, &[1]),
        Err(DatastoreError::ServiceClosed)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_subscriber_times_out() {
    init_logging();
    let config = DatastoreConfig {
        response_timeout: Duration::from_millis(5),
        ..DatastoreConfig::default()
    };
    let service = start(&config);
    let client = service.client();
    let slow = subscriber_fn(|_, _| {
        std::thread::sleep(Duration::from_millis(200));
        Ok(())
    });

    assert_eq!(
        client.subscribe::<Uint>(0, 1, &slow).await,
        Err(DatastoreError::Timeout)
    );
    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_raw_notifications() {
    init_logging();
    let service = start(&config());
    let client = service.client();
    let (subscriber, mut rx) = channel_subscriber(4);

    client.subscribe::<Uint>(1, 3, &subscriber).await.unwrap();
    let notification = rx.recv().await.unwrap();
    assert_eq!(notification.count, 3);
    assert_eq!(notification.payload.data_length(), 12);
    assert_eq!(notification.payload.values::<Uint>().unwrap(), [1, 2, 3]);
    drop(notification);

    let datastore = service.stop().await.unwrap();
    assert_eq!(datastore.registry(Family::Uint).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_slow_subscriber_leaves_workers_free() {
    init_logging();
    let service = start(&config());
    let client = service.client();
    let slow = subscriber_fn(|_, _| {
        std::thread::sleep(Duration::from_millis(300));
        Ok(())
    });
    let subscribing = tokio::spawn(async move { client.subscribe::<Uint>(0, 1, &slow).await });
    // Give the service time to start the callback
    tokio::time::sleep(Duration::from_millis(30)).await;

    let started = std::time::Instant::now();
    tokio::spawn(async {}).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));

    assert_eq!(subscribing.await.unwrap(), Ok(()));
    service.stop().await.unwrap();
}
