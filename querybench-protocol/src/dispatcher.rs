//! Dispatching a batch of requests and collecting the replies.
//!
//! A run is strictly two-phased: [`Dispatcher::dispatch_all`] hands every
//! request to the transport without reading anything, then
//! [`Dispatcher::collect_until_complete`] reads replies until no request is
//! outstanding. Both phases run on the caller's task, which owns the pending
//! and result tables exclusively.

use std::fmt;
use std::time::Duration;

use tokio::time::{self, Instant};

use crate::codec::Codec;
use crate::envelope::{Reply, Request};
use crate::error::{Error, Result};
use crate::id::{CorrelationId, IdGenerator};
use crate::payload::Payload;
use crate::table::{PendingTable, ResultTable, Settlement, settle};
use crate::transport::Transport;

/// Options for a [`Dispatcher`].
#[derive(Clone, Debug, Default)]
pub struct DispatchOptions {
    /// Wire format of requests and replies.
    pub codec: Codec,
    /// Upper bound on the time spent collecting replies for one batch.
    pub deadline: Option<Duration>,
    /// Upper bound on the time between two consecutive inbound frames.
    pub idle_timeout: Option<Duration>,
}

/// A request that has been assigned its correlation id.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkItem {
    /// The id the reply will carry.
    pub id: CorrelationId,
    /// The query to send.
    pub query: Payload,
}

/// Counters of the inbound frames seen while collecting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Replies that answered an outstanding request.
    pub matched: usize,
    /// Replies for ids that were never dispatched.
    pub unknown: usize,
    /// Replies for ids that were already answered.
    pub duplicates: usize,
    /// Frames that could not be decoded into a reply.
    pub malformed: usize,
    /// Total size of all inbound frames.
    pub bytes_received: u64,
}

impl CollectStats {
    /// Replies that did not answer an outstanding request.
    pub fn strays(&self) -> usize {
        self.unknown + self.duplicates
    }
}

/// The outcome of [`Dispatcher::collect_until_complete`].
#[derive(Debug)]
pub struct Collection {
    /// One result per dispatched id.
    pub results: ResultTable,
    /// What was seen on the wire.
    pub stats: CollectStats,
    /// Round-trip latency of every matched reply, in arrival order.
    pub latencies: Vec<Duration>,
}

/// The outcome of one complete batch, see [`Dispatcher::run`].
#[derive(Debug)]
pub struct RunReport {
    /// One result per dispatched id.
    pub results: ResultTable,
    /// Wall time from generating the batch to receiving the last reply.
    pub elapsed: Duration,
    /// Number of requests sent.
    pub dispatched: usize,
    /// Total size of all outbound frames.
    pub bytes_sent: u64,
    /// What was seen on the wire while collecting.
    pub stats: CollectStats,
    /// Round-trip latency of every matched reply, in arrival order.
    pub latencies: Vec<Duration>,
}

impl RunReport {
    /// Number of results collected.
    pub fn collected(&self) -> usize {
        self.results.len()
    }
}

/// Hooks invoked as a batch progresses.
///
/// All methods default to doing nothing.
pub trait Observer: Send {
    /// A request was handed to the transport.
    fn on_sent(&mut self, _id: &CorrelationId, _query: &Payload) {}

    /// A reply answered an outstanding request.
    fn on_reply(&mut self, _id: &CorrelationId, _data: &Payload, _latency: Duration) {}

    /// A reply did not answer an outstanding request.
    fn on_stray(&mut self, _id: &CorrelationId) {}
}

/// An [`Observer`] that ignores everything.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Sends batches of requests over a [`Transport`] and matches up the replies.
///
/// The dispatcher owns its transport and its [`IdGenerator`], so ids are
/// unique across every batch it sends.
pub struct Dispatcher<T> {
    transport: T,
    ids: IdGenerator,
    options: DispatchOptions,
    observer: Box<dyn Observer>,
}

impl<T: Transport> Dispatcher<T> {
    /// Creates a dispatcher with a randomly seeded id generator.
    pub fn new(transport: T, options: DispatchOptions) -> Self {
        Self {
            transport,
            ids: IdGenerator::default(),
            options,
            observer: Box::new(NoopObserver),
        }
    }

    /// Replaces the id generator.
    pub fn with_ids(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Installs an observer for progress reporting.
    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Assigns fresh correlation ids to `count` queries produced by `factory`.
    pub fn generate_batch<F>(&mut self, count: usize, mut factory: F) -> Result<Vec<WorkItem>>
    where
        F: FnMut() -> Payload,
    {
        if count == 0 {
            return Err(Error::Configuration(
                "batch size must be at least 1".into(),
            ));
        }

        let items = (0..count)
            .map(|_| WorkItem {
                id: self.ids.next_id(),
                query: factory(),
            })
            .collect();
        Ok(items)
    }

    /// Sends every item without waiting for replies.
    ///
    /// Each item is registered as pending before it is handed to the
    /// transport, so a reply can never overtake its own registration.
    pub async fn dispatch_all(&mut self, items: Vec<WorkItem>) -> Result<(PendingTable, u64)> {
        let mut pending = PendingTable::with_capacity(items.len());
        let mut bytes_sent = 0;

        for WorkItem { id, query } in items {
            let request = Request { id, query };
            let frame = match self.options.codec.encode(&request) {
                Ok(frame) => frame,
                Err(source) => {
                    return Err(Error::Encode {
                        id: request.id,
                        source,
                    });
                }
            };

            let Request { id, query } = request;
            tracing::trace!(%id, %query, "sending request");
            pending.insert(id.clone(), query)?;

            bytes_sent += frame.len() as u64;
            self.transport.send(frame).await?;

            if let Some(entry) = pending.get(&id) {
                self.observer.on_sent(&id, &entry.query);
            }
        }

        self.transport.flush().await?;
        Ok((pending, bytes_sent))
    }

    /// Reads replies until every pending request has been answered.
    ///
    /// Replies may arrive in any order. Stray and undecodable frames are
    /// logged and counted but otherwise ignored. If a deadline or idle
    /// timeout is configured and expires, fails with [`Error::Timeout`]
    /// listing the ids that never got a reply.
    pub async fn collect_until_complete(&mut self, mut pending: PendingTable) -> Result<Collection> {
        let started = Instant::now();
        let deadline = self.options.deadline.map(|deadline| started + deadline);

        let mut results = ResultTable::with_capacity(pending.len());
        let mut stats = CollectStats::default();
        let mut latencies = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let frame = match self.next_expiry(deadline) {
                Some(expiry) => match time::timeout_at(expiry, self.transport.recv()).await {
                    Ok(frame) => frame?,
                    Err(_) => {
                        let pending = pending.ids();
                        tracing::error!(
                            pending = pending.len(),
                            "timed out waiting for replies"
                        );
                        return Err(Error::Timeout {
                            elapsed: started.elapsed(),
                            pending,
                        });
                    }
                },
                None => self.transport.recv().await?,
            };
            stats.bytes_received += frame.len() as u64;

            let reply: Reply = match self.options.codec.decode(&frame) {
                Ok(reply) => reply,
                Err(err) => {
                    stats.malformed += 1;
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        "discarding undecodable reply"
                    );
                    continue;
                }
            };

            let id = reply.id.clone();
            let settlement = settle(&mut pending, &mut results, reply);
            if settlement.is_stray() {
                self.observer.on_stray(&id);
            }

            match settlement {
                Settlement::Matched { latency } => {
                    stats.matched += 1;
                    latencies.push(latency);
                    tracing::trace!(%id, ?latency, remaining = pending.len(), "received reply");
                    if let Some(data) = results.get(&id) {
                        self.observer.on_reply(&id, data, latency);
                    }
                }
                Settlement::Duplicate => {
                    stats.duplicates += 1;
                    tracing::warn!(%id, "ignoring duplicate reply");
                }
                Settlement::Unknown => {
                    stats.unknown += 1;
                    tracing::warn!(%id, "received reply with unknown id");
                }
            }
        }

        Ok(Collection {
            results,
            stats,
            latencies,
        })
    }

    /// Generates, dispatches and collects one batch of `count` queries.
    pub async fn run<F>(&mut self, count: usize, factory: F) -> Result<RunReport>
    where
        F: FnMut() -> Payload,
    {
        let started = Instant::now();

        let items = self.generate_batch(count, factory)?;
        let dispatched = items.len();

        let (pending, bytes_sent) = self.dispatch_all(items).await?;
        tracing::debug!(dispatched, bytes_sent, "dispatched batch");

        let Collection {
            results,
            stats,
            latencies,
        } = self.collect_until_complete(pending).await?;
        let elapsed = started.elapsed();
        tracing::debug!(collected = results.len(), ?elapsed, "collected batch");

        Ok(RunReport {
            results,
            elapsed,
            dispatched,
            bytes_sent,
            stats,
            latencies,
        })
    }

    /// The earlier of the overall deadline and the idle timeout, counted from now.
    fn next_expiry(&self, deadline: Option<Instant>) -> Option<Instant> {
        let idle = self.options.idle_timeout.map(|idle| Instant::now() + idle);
        match (deadline, idle) {
            (Some(deadline), Some(idle)) => Some(deadline.min(idle)),
            (deadline, idle) => deadline.or(idle),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("transport", &self.transport)
            .field("ids", &self.ids)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use super::*;
    use crate::transport::ChannelTransport;

    fn numbered_queries() -> impl FnMut() -> Payload {
        let mut n = 0;
        move || {
            let query = format!("Q{n}");
            n += 1;
            query.into()
        }
    }

    fn connected(options: DispatchOptions) -> (Dispatcher<ChannelTransport>, ChannelTransport) {
        let (client, worker) = ChannelTransport::pair();
        (Dispatcher::new(client, options), worker)
    }

    /// Reads every request the worker end has received so far.
    fn drain_requests(worker: &mut ChannelTransport, codec: Codec) -> Vec<Request> {
        std::iter::from_fn(|| worker.try_recv())
            .map(|frame| codec.decode(&frame).unwrap())
            .collect()
    }

    async fn send_reply(worker: &mut ChannelTransport, id: &CorrelationId, data: Payload) {
        let reply = Reply {
            id: id.clone(),
            data,
        };
        let frame = Codec::default().encode(&reply).unwrap();
        worker.send(frame).await.unwrap();
    }

    fn upper(query: &Payload) -> Payload {
        query.as_str().unwrap().to_uppercase().into()
    }

    #[test]
    fn empty_batch_rejected() {
        let (mut dispatcher, _worker) = connected(DispatchOptions::default());
        let result = dispatcher.generate_batch(0, numbered_queries());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn batch_ids_unique() {
        let (mut dispatcher, _worker) = connected(DispatchOptions::default());

        let first = dispatcher.generate_batch(1000, numbered_queries()).unwrap();
        let second = dispatcher.generate_batch(1000, numbered_queries()).unwrap();

        let ids: HashSet<_> = first.iter().chain(&second).map(|item| &item.id).collect();
        assert_eq!(ids.len(), 2000);
        assert_eq!(first[2].query, Payload::from("Q2"));
    }

    #[tokio::test]
    async fn dispatch_registers_every_item() {
        let (mut dispatcher, mut worker) = connected(DispatchOptions::default());
        let items = dispatcher.generate_batch(3, numbered_queries()).unwrap();

        let (pending, bytes_sent) = dispatcher.dispatch_all(items.clone()).await.unwrap();

        assert_eq!(pending.len(), 3);
        for item in &items {
            assert_eq!(pending.get(&item.id).unwrap().query, item.query);
        }

        let requests = drain_requests(&mut worker, Codec::default());
        assert_eq!(requests.len(), 3);
        assert!(bytes_sent > 0);
        for (request, item) in requests.iter().zip(&items) {
            assert_eq!(request.id, item.id);
            assert_eq!(request.query, item.query);
        }
    }

    #[tokio::test]
    async fn echo_in_reverse_order() {
        let (mut dispatcher, mut worker) = connected(DispatchOptions::default());
        let items = dispatcher.generate_batch(3, numbered_queries()).unwrap();
        let (pending, _) = dispatcher.dispatch_all(items).await.unwrap();

        let requests = drain_requests(&mut worker, Codec::default());
        for request in requests.iter().rev() {
            send_reply(&mut worker, &request.id, upper(&request.query)).await;
        }

        let collection = dispatcher.collect_until_complete(pending).await.unwrap();
        let results = collection.results.into_inner();

        let expected: HashMap<_, _> = requests
            .iter()
            .map(|request| (request.id.clone(), upper(&request.query)))
            .collect();
        assert_eq!(results, expected);
        assert_eq!(collection.stats.matched, 3);
        assert_eq!(collection.latencies.len(), 3);
    }

    #[tokio::test]
    async fn delivery_order_does_not_matter() {
        let mut outcomes = Vec::new();

        for order in [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]] {
            let (dispatcher, mut worker) = connected(DispatchOptions::default());
            let mut dispatcher = dispatcher.with_ids(IdGenerator::with_session("query", 7));
            let items = dispatcher.generate_batch(4, numbered_queries()).unwrap();
            let (pending, _) = dispatcher.dispatch_all(items).await.unwrap();

            let requests = drain_requests(&mut worker, Codec::default());
            for index in order {
                let request = &requests[index];
                send_reply(&mut worker, &request.id, upper(&request.query)).await;
            }

            let collection = dispatcher.collect_until_complete(pending).await.unwrap();
            outcomes.push(collection.results);
        }

        assert_eq!(outcomes[0], outcomes[1]);
        assert_eq!(outcomes[0], outcomes[2]);
    }

    #[tokio::test]
    async fn stray_replies_are_ignored() {
        let (mut dispatcher, mut worker) = connected(DispatchOptions::default());
        let items = dispatcher.generate_batch(2, numbered_queries()).unwrap();
        let (pending, _) = dispatcher.dispatch_all(items).await.unwrap();
        let requests = drain_requests(&mut worker, Codec::default());

        send_reply(&mut worker, &"query_never_sent".into(), "X".into()).await;
        send_reply(&mut worker, &requests[0].id, "R0".into()).await;
        send_reply(&mut worker, &requests[0].id, "late duplicate".into()).await;
        send_reply(&mut worker, &requests[1].id, "R1".into()).await;

        let collection = dispatcher.collect_until_complete(pending).await.unwrap();

        assert_eq!(collection.results.len(), 2);
        assert_eq!(
            collection.results.get(&requests[0].id),
            Some(&Payload::from("R0"))
        );
        assert_eq!(collection.stats.unknown, 1);
        assert_eq!(collection.stats.duplicates, 1);
        assert_eq!(collection.stats.strays(), 2);
        assert!(!collection.results.contains(&"query_never_sent".into()));
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let (mut dispatcher, mut worker) = connected(DispatchOptions::default());
        let items = dispatcher.generate_batch(1, numbered_queries()).unwrap();
        let (pending, _) = dispatcher.dispatch_all(items).await.unwrap();
        let requests = drain_requests(&mut worker, Codec::default());

        worker.send(Bytes::from_static(b"\xc1garbage")).await.unwrap();
        send_reply(&mut worker, &requests[0].id, "R0".into()).await;

        let collection = dispatcher.collect_until_complete(pending).await.unwrap();
        assert_eq!(collection.stats.malformed, 1);
        assert_eq!(collection.results.len(), 1);
    }

    #[tokio::test]
    async fn binary_reply_data_is_collected() {
        let options = DispatchOptions {
            deadline: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        let (mut dispatcher, mut worker) = connected(options);
        let items = dispatcher.generate_batch(1, numbered_queries()).unwrap();
        let (pending, _) = dispatcher.dispatch_all(items).await.unwrap();
        let requests = drain_requests(&mut worker, Codec::default());

        #[derive(serde::Serialize)]
        struct RawReply<'a> {
            id: &'a CorrelationId,
            data: &'a serde_bytes::Bytes,
        }
        let frame = rmp_serde::to_vec_named(&RawReply {
            id: &requests[0].id,
            data: serde_bytes::Bytes::new(b"\x01\x02rowdata"),
        })
        .unwrap();
        worker.send(Bytes::from(frame)).await.unwrap();

        let collection = dispatcher.collect_until_complete(pending).await.unwrap();
        assert_eq!(collection.stats.malformed, 0);
        assert_eq!(
            collection.results.get(&requests[0].id),
            Some(&Payload::Binary(b"\x01\x02rowdata".to_vec()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_reports_pending_ids() {
        let options = DispatchOptions {
            deadline: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (mut dispatcher, mut worker) = connected(options);
        let items = dispatcher.generate_batch(5, numbered_queries()).unwrap();
        let (pending, _) = dispatcher.dispatch_all(items).await.unwrap();

        let requests = drain_requests(&mut worker, Codec::default());
        for request in &requests[..4] {
            send_reply(&mut worker, &request.id, upper(&request.query)).await;
        }

        let result = dispatcher.collect_until_complete(pending).await;
        let Err(Error::Timeout { elapsed, pending }) = result else {
            panic!("expected a timeout, got {result:?}");
        };
        assert_eq!(pending, vec![requests[4].id.clone()]);
        assert!(elapsed >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_expires_without_traffic() {
        let options = DispatchOptions {
            idle_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let (mut dispatcher, _worker) = connected(options);
        let items = dispatcher.generate_batch(2, numbered_queries()).unwrap();
        let expected: Vec<_> = items.iter().map(|item| item.id.clone()).collect();
        let (pending, _) = dispatcher.dispatch_all(items).await.unwrap();

        let result = dispatcher.collect_until_complete(pending).await;
        let Err(Error::Timeout { pending, .. }) = result else {
            panic!("expected a timeout, got {result:?}");
        };
        assert_eq!(pending, expected);
    }

    #[tokio::test]
    async fn closed_transport_aborts() {
        let (mut dispatcher, worker) = connected(DispatchOptions::default());
        let items = dispatcher.generate_batch(1, numbered_queries()).unwrap();
        let (pending, _) = dispatcher.dispatch_all(items).await.unwrap();
        drop(worker);

        let result = dispatcher.collect_until_complete(pending).await;
        assert!(matches!(
            result,
            Err(Error::Transport(crate::TransportError::Closed))
        ));
    }

    #[tokio::test]
    async fn run_against_echo_worker() {
        let (client, mut worker) = ChannelTransport::pair();
        let codec = Codec::Json;

        tokio::spawn(async move {
            while let Ok(frame) = worker.recv().await {
                let request: Request = codec.decode(&frame).unwrap();
                let reply = Reply {
                    data: upper(&request.query),
                    id: request.id,
                };
                worker.send(codec.encode(&reply).unwrap()).await.unwrap();
            }
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let options = DispatchOptions {
            codec,
            ..Default::default()
        };
        let mut dispatcher =
            Dispatcher::new(client, options).with_observer(Recorder(Arc::clone(&seen)));

        let report = dispatcher.run(3, numbered_queries()).await.unwrap();

        assert_eq!(report.dispatched, 3);
        assert_eq!(report.collected(), 3);
        assert!(report.bytes_sent > 0);
        assert!(report.stats.bytes_received > 0);
        assert!(report.elapsed >= report.latencies.iter().copied().max().unwrap());

        let mut data: Vec<_> = report
            .results
            .iter()
            .map(|(_, data)| data.to_string())
            .collect();
        data.sort();
        assert_eq!(data, ["Q0", "Q1", "Q2"]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|event| event.starts_with("sent")).count(), 3);
        assert_eq!(seen.iter().filter(|event| event.starts_with("reply")).count(), 3);
    }

    #[tokio::test]
    async fn duplicate_id_is_not_reported_as_sent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, mut worker) = connected(DispatchOptions::default());
        let mut dispatcher = dispatcher.with_observer(Recorder(Arc::clone(&seen)));

        let item = WorkItem {
            id: "query_dup".into(),
            query: "Q".into(),
        };
        let result = dispatcher.dispatch_all(vec![item.clone(), item]).await;

        assert!(matches!(result, Err(Error::DuplicateId(id)) if id.as_str() == "query_dup"));
        assert_eq!(drain_requests(&mut worker, Codec::default()).len(), 1);
        assert_eq!(*seen.lock().unwrap(), ["sent query_dup"]);
    }

    #[tokio::test]
    async fn failed_send_is_not_reported_as_sent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, worker) = connected(DispatchOptions::default());
        let mut dispatcher = dispatcher.with_observer(Recorder(Arc::clone(&seen)));
        drop(worker);

        let items = dispatcher.generate_batch(2, numbered_queries()).unwrap();
        let result = dispatcher.dispatch_all(items).await;

        assert!(matches!(
            result,
            Err(Error::Transport(crate::TransportError::Closed))
        ));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn strays_reach_the_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, mut worker) = connected(DispatchOptions::default());
        let mut dispatcher = dispatcher.with_observer(Recorder(Arc::clone(&seen)));
        let items = dispatcher.generate_batch(1, numbered_queries()).unwrap();
        let (pending, _) = dispatcher.dispatch_all(items).await.unwrap();
        let requests = drain_requests(&mut worker, Codec::default());

        send_reply(&mut worker, &"query_never_sent".into(), "X".into()).await;
        send_reply(&mut worker, &requests[0].id, "R0".into()).await;
        dispatcher.collect_until_complete(pending).await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&"stray query_never_sent".to_owned()));
        assert_eq!(seen.iter().filter(|event| event.starts_with("stray")).count(), 1);
    }

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Observer for Recorder {
        fn on_sent(&mut self, id: &CorrelationId, _query: &Payload) {
            self.0.lock().unwrap().push(format!("sent {id}"));
        }

        fn on_reply(&mut self, id: &CorrelationId, _data: &Payload, _latency: Duration) {
            self.0.lock().unwrap().push(format!("reply {id}"));
        }

        fn on_stray(&mut self, id: &CorrelationId) {
            self.0.lock().unwrap().push(format!("stray {id}"));
        }
    }
}
