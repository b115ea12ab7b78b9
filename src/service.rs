//! Running a datastore as a queued background task
//!
//! [`DatastoreService::spawn`] moves a [`Datastore`] into a tokio task that
//! owns it exclusively and works through a bounded request queue, one
//! request at a time. Any number of [`ServiceClient`]s can feed the queue.
//! Enqueueing never waits; replies are awaited for at most the configured
//! response timeout.
//!
//! Subscriber callbacks run on the service task, so they must be quick and
//! must not wait on the service themselves. On a multi-threaded runtime the
//! service steps off its worker while handling a request; on a
//! current-thread runtime it cannot, and a stalled buffer pool stalls every
//! task until the allocation timeout runs out.

use std::time::Duration;

use tokio::{
    select,
    runtime::{Handle, RuntimeFlavor},
    sync::{mpsc, mpsc::error::TrySendError, oneshot},
    task::{self, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::{
    config::DatastoreConfig,
    datastore::Datastore,
    error::DatastoreError,
    subscription::SubscriberRef,
    value::{Family, FamilyKind, FamilyValues},
};

type Reply<T> = oneshot::Sender<Result<T, DatastoreError>>;

/// Work for the service task
enum ServiceRequest {
    Read {
        family: Family,
        start: usize,
        count: usize,
        reply: Reply<FamilyValues>,
    },
    /// Store values, optionally reporting the outcome
    Write {
        start: usize,
        values: FamilyValues,
        reply: Option<Reply<()>>,
    },
    Subscribe {
        family: Family,
        start: usize,
        length: usize,
        subscriber: SubscriberRef,
        reply: Reply<()>,
    },
    Unsubscribe {
        family: Family,
        subscriber: SubscriberRef,
        reply: Reply<()>,
    },
    SetPaused {
        family: Family,
        subscriber: SubscriberRef,
        paused: bool,
        reply: Reply<()>,
    },
}

impl ServiceRequest {
    fn handle(self, datastore: &mut Datastore) {
        match self {
            ServiceRequest::Read {
                family,
                start,
                count,
                reply,
            } => {
                let _ = reply.send(datastore.read_values(family, start, count));
            }
            ServiceRequest::Write {
                start,
                values,
                reply,
            } => {
                let result = datastore.write_values(start, &values);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            warn!("Posted {} write at {start} failed: {err}", values.family());
                        }
                    }
                }
            }
            ServiceRequest::Subscribe {
                family,
                start,
                length,
                subscriber,
                reply,
            } => {
                let _ = reply.send(datastore.subscribe_family(family, start, length, &subscriber));
            }
            ServiceRequest::Unsubscribe {
                family,
                subscriber,
                reply,
            } => {
                let _ = reply.send(datastore.unsubscribe_family(family, &subscriber));
            }
            ServiceRequest::SetPaused {
                family,
                subscriber,
                paused,
                reply,
            } => {
                let result = if paused {
                    datastore.pause_family(family, &subscriber)
                } else {
                    datastore.unpause_family(family, &subscriber)
                };
                let _ = reply.send(result);
            }
        }
    }
}

/// Handle one request. On a multi-threaded runtime the worker is handed
/// over first, so a slow subscriber or a pool wait does not hold up other
/// tasks. A current-thread runtime has no spare worker: there, a pool wait
/// cannot be cut short by a task releasing blocks.
fn run(request: ServiceRequest, datastore: &mut Datastore) {
    match Handle::current().runtime_flavor() {
        RuntimeFlavor::MultiThread => task::block_in_place(|| request.handle(datastore)),
        _ => request.handle(datastore),
    }
}

/// Owns the task running a datastore
pub struct DatastoreService {
    requests_tx: mpsc::Sender<ServiceRequest>,
    response_timeout: Duration,
    cancel: CancellationToken,
    task: JoinHandle<Datastore>,
}

impl DatastoreService {
    /// Start serving `datastore`. Must be called from within a tokio runtime.
    pub fn spawn(datastore: Datastore, config: &DatastoreConfig) -> Self {
        let (requests_tx, mut requests_rx) =
            mpsc::channel::<ServiceRequest>(config.queue_depth.max(1));
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let task = tokio::spawn(async move {
            let mut datastore = datastore;
            debug!("Datastore service started");
            loop {
                select! {
                    _ = stop.cancelled() => break,
                    request = requests_rx.recv() => match request {
                        None => break,
                        Some(request) => run(request, &mut datastore),
                    },
                }
            }
            debug!("Datastore service stopped");
            datastore
        });
        DatastoreService {
            requests_tx,
            response_timeout: config.response_timeout,
            cancel,
            task,
        }
    }

    pub fn client(&self) -> ServiceClient {
        ServiceClient {
            requests_tx: self.requests_tx.clone(),
            response_timeout: self.response_timeout,
        }
    }

    /// Stop the task and take the datastore back. Queued requests are
    /// abandoned.
    pub async fn stop(self) -> Result<Datastore, DatastoreError> {
        self.cancel.cancel();
        self.task.await.map_err(|err| {
            error!("Datastore service task failed: {err}");
            DatastoreError::ServiceClosed
        })
    }
}

/// Handle for sending requests to a [`DatastoreService`]
#[derive(Clone)]
pub struct ServiceClient {
    requests_tx: mpsc::Sender<ServiceRequest>,
    response_timeout: Duration,
}

impl ServiceClient {
    fn enqueue(&self, request: ServiceRequest) -> Result<(), DatastoreError> {
        self.requests_tx.try_send(request).map_err(|err| match err {
            TrySendError::Full(_) => {
                warn!("Datastore service queue is full");
                DatastoreError::QueueFull
            }
            TrySendError::Closed(_) => DatastoreError::ServiceClosed,
        })
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(Reply<T>) -> ServiceRequest,
    ) -> Result<T, DatastoreError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(request(tx))?;
        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DatastoreError::ServiceClosed),
            Err(_) => {
                error!(
                    "Datastore service did not reply within {:?}",
                    self.response_timeout
                );
                Err(DatastoreError::Timeout)
            }
        }
    }

    pub async fn read_values(
        &self,
        family: Family,
        start: usize,
        count: usize,
    ) -> Result<FamilyValues, DatastoreError> {
        self.call(|reply| ServiceRequest::Read {
            family,
            start,
            count,
            reply,
        })
        .await
    }

    pub async fn read<F: FamilyKind>(
        &self,
        start: usize,
        count: usize,
    ) -> Result<Vec<F::Value>, DatastoreError> {
        let values = self.read_values(F::FAMILY, start, count).await?;
        F::unwrap(&values)
            .map(<[F::Value]>::to_vec)
            .ok_or(DatastoreError::InvalidArg("family mismatch"))
    }

    /// Store values and wait for the outcome, including fan-out failures
    pub async fn write_values(&self, start: usize, values: FamilyValues) -> Result<(), DatastoreError> {
        self.call(|reply| ServiceRequest::Write {
            start,
            values,
            reply: Some(reply),
        })
        .await
    }

    pub async fn write<F: FamilyKind>(
        &self,
        start: usize,
        values: &[F::Value],
    ) -> Result<(), DatastoreError> {
        self.write_values(start, F::wrap(values.to_vec())).await
    }

    /// Queue a write without waiting for it. Failures are only logged.
    pub fn post_write<F: FamilyKind>(&self, start: usize, values: &[F::Value]) -> Result<(), DatastoreError> {
        trace!("Posting {} write at {start}", F::FAMILY);
        self.enqueue(ServiceRequest::Write {
            start,
            values: F::wrap(values.to_vec()),
            reply: None,
        })
    }

    pub async fn subscribe<F: FamilyKind>(
        &self,
        start: usize,
        length: usize,
        subscriber: &SubscriberRef,
    ) -> Result<(), DatastoreError> {
        let subscriber = subscriber.clone();
        self.call(|reply| ServiceRequest::Subscribe {
            family: F::FAMILY,
            start,
            length,
            subscriber,
            reply,
        })
        .await
    }

    pub async fn unsubscribe<F: FamilyKind>(&self, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
        let subscriber = subscriber.clone();
        self.call(|reply| ServiceRequest::Unsubscribe {
            family: F::FAMILY,
            subscriber,
            reply,
        })
        .await
    }

    async fn set_paused<F: FamilyKind>(
        &self,
        subscriber: &SubscriberRef,
        paused: bool,
    ) -> Result<(), DatastoreError> {
        let subscriber = subscriber.clone();
        self.call(|reply| ServiceRequest::SetPaused {
            family: F::FAMILY,
            subscriber,
            paused,
            reply,
        })
        .await
    }

    pub async fn pause<F: FamilyKind>(&self, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
        self.set_paused::<F>(subscriber, true).await
    }

    pub async fn unpause<F: FamilyKind>(&self, subscriber: &SubscriberRef) -> Result<(), DatastoreError> {
        self.set_paused::<F>(subscriber, false).await
    }
}
