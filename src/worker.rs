use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::db::{Store, StoreError};
use crate::delivery::{Backoff, DeliverySignal, OutboundRequest, Transport};
use crate::models::{AttemptOutcome, Delivery, DeliveryStatus};

/// Slack past the attempt timeout for claiming and recording the outcome.
const RECLAIM_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Counts for one worker pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub reclaimed: usize,
    pub selected: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub abandoned: usize,
}

/// What one attempt produced before it is mapped onto the state machine.
#[derive(Debug)]
enum AttemptResult {
    Delivered(u16),
    Rejected(u16),
    Failed(String),
    /// The subscription is gone; retrying cannot help.
    Unroutable(String),
}

/// Drains due deliveries. Any number of workers may share one store: a
/// delivery is only attempted by whoever wins its claim.
pub struct DeliveryWorker {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    config: WorkerConfig,
    backoff: Backoff,
    signal: DeliverySignal,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        config: WorkerConfig,
        signal: DeliverySignal,
    ) -> Self {
        let backoff = Backoff::new(config.backoff_base, config.backoff_max);
        Self {
            store,
            transport,
            config,
            backoff,
            signal,
        }
    }

    pub async fn run_once(&self) -> Result<RunSummary, StoreError> {
        self.run_at(Utc::now()).await
    }

    /// Reclaim stuck attempts, then attempt everything due at `now`. Claims
    /// are stamped with the clock at claim time, not with `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunSummary, StoreError> {
        let mut summary = RunSummary {
            reclaimed: self.sweep(now).await?,
            ..RunSummary::default()
        };

        let due = self
            .store
            .due_deliveries(now, self.config.per_tenant_batch, self.config.batch_size)
            .await?;
        summary.selected = due.len();

        let finished: Vec<Option<DeliveryStatus>> = stream::iter(due)
            .map(|delivery| self.process(delivery, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for status in finished.into_iter().flatten() {
            match status {
                DeliveryStatus::Succeeded => summary.succeeded += 1,
                DeliveryStatus::Pending => summary.retried += 1,
                DeliveryStatus::Abandoned => summary.abandoned += 1,
                _ => {}
            }
        }

        if summary != RunSummary::default() {
            tracing::debug!(?summary, "Delivery pass finished");
        }
        Ok(summary)
    }

    /// How long a claim is honoured before the sweep may take it back.
    fn claim_lease(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.attempt_timeout + RECLAIM_GRACE)
            .unwrap_or_else(|_| chrono::Duration::seconds(35))
    }

    /// Return deliveries stuck in `delivering` past their lease to the queue,
    /// counting the lost attempt. At most one batch per pass.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let stale = self
            .store
            .stale_deliveries(now - self.claim_lease(), self.config.batch_size)
            .await?;

        let mut reclaimed = 0;
        for delivery in stale {
            let Some(token) = delivery.claim_token else {
                continue;
            };
            let outcome = self.failure(
                delivery.attempt_count + 1,
                None,
                "Attempt did not finish within the attempt timeout".to_string(),
                now,
            );
            if self
                .store
                .finish_attempt(delivery.id, token, &outcome, now)
                .await?
            {
                tracing::warn!(
                    delivery_id = %delivery.id,
                    tenant_id = %delivery.tenant_id,
                    attempt = outcome.attempt_count(),
                    "Reclaimed stuck delivery"
                );
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    /// Claim, attempt and record one delivery. Errors stay with this delivery.
    async fn process(&self, delivery: Delivery, now: DateTime<Utc>) -> Option<DeliveryStatus> {
        let token = Uuid::new_v4();
        let claimed_at = Utc::now().max(now);
        let claimed = match self.store.claim_delivery(delivery.id, token, claimed_at).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                tracing::debug!(delivery_id = %delivery.id, "Delivery claimed elsewhere");
                return None;
            }
            Err(e) => {
                tracing::error!(delivery_id = %delivery.id, "Failed to claim delivery: {e}");
                return None;
            }
        };

        tracing::debug!(
            delivery_id = %claimed.id,
            tenant_id = %claimed.tenant_id,
            event_type = %claimed.event_type,
            attempt = claimed.attempt_count + 1,
            "Attempting delivery"
        );

        let result = self.attempt(&claimed).await;
        let finished_at = Utc::now().max(now);
        let outcome = self.outcome(&claimed, result, finished_at);

        match self
            .store
            .finish_attempt(claimed.id, token, &outcome, finished_at)
            .await
        {
            Ok(true) => {
                match &outcome {
                    AttemptOutcome::Succeeded { .. } => {
                        tracing::debug!(delivery_id = %claimed.id, "Delivery succeeded")
                    }
                    AttemptOutcome::Retry {
                        next_attempt_at,
                        error,
                        ..
                    } => tracing::info!(
                        delivery_id = %claimed.id,
                        %next_attempt_at,
                        "Delivery failed, retry scheduled: {error}"
                    ),
                    AttemptOutcome::Abandoned { error, .. } => tracing::warn!(
                        delivery_id = %claimed.id,
                        tenant_id = %claimed.tenant_id,
                        attempts = outcome.attempt_count(),
                        "Delivery abandoned: {error}"
                    ),
                }
                Some(outcome.status())
            }
            Ok(false) => {
                tracing::warn!(
                    delivery_id = %claimed.id,
                    "Claim lost before the attempt was recorded"
                );
                None
            }
            Err(e) => {
                tracing::error!(delivery_id = %claimed.id, "Failed to record attempt: {e}");
                None
            }
        }
    }

    /// Subscription lookup and send, bounded as a whole by the attempt timeout.
    async fn attempt(&self, delivery: &Delivery) -> AttemptResult {
        match tokio::time::timeout(self.config.attempt_timeout, self.send(delivery)).await {
            Ok(result) => result,
            Err(_) => AttemptResult::Failed(format!(
                "Attempt timed out after {}s",
                self.config.attempt_timeout.as_secs_f64()
            )),
        }
    }

    async fn send(&self, delivery: &Delivery) -> AttemptResult {
        let subscription = match self
            .store
            .find_subscription(delivery.tenant_id, delivery.subscription_id)
            .await
        {
            Ok(Some(subscription)) => subscription,
            Ok(None) => {
                return AttemptResult::Unroutable(format!(
                    "Subscription {} no longer exists",
                    delivery.subscription_id
                ));
            }
            Err(e) => return AttemptResult::Failed(format!("Failed to load subscription: {e}")),
        };

        let request = OutboundRequest {
            url: &subscription.target_url,
            delivery_id: delivery.id,
            tenant_id: delivery.tenant_id,
            event_type: &delivery.event_type,
            payload: &delivery.payload,
        };

        match self.transport.send(&request).await {
            Ok(code) if (200..300).contains(&code) => AttemptResult::Delivered(code),
            Ok(code) => AttemptResult::Rejected(code),
            Err(e) => AttemptResult::Failed(e.to_string()),
        }
    }

    fn outcome(
        &self,
        delivery: &Delivery,
        result: AttemptResult,
        at: DateTime<Utc>,
    ) -> AttemptOutcome {
        let attempt_count = delivery.attempt_count + 1;
        match result {
            AttemptResult::Delivered(code) => AttemptOutcome::Succeeded {
                attempt_count,
                status_code: Some(i32::from(code)),
            },
            AttemptResult::Rejected(code) => self.failure(
                attempt_count,
                Some(i32::from(code)),
                format!("Receiver responded with HTTP {code}"),
                at,
            ),
            AttemptResult::Failed(error) => self.failure(attempt_count, None, error, at),
            AttemptResult::Unroutable(error) => AttemptOutcome::Abandoned {
                attempt_count,
                status_code: None,
                error,
            },
        }
    }

    fn failure(
        &self,
        attempt_count: i32,
        status_code: Option<i32>,
        error: String,
        at: DateTime<Utc>,
    ) -> AttemptOutcome {
        if attempt_count >= self.config.max_attempts {
            AttemptOutcome::Abandoned {
                attempt_count,
                status_code,
                error,
            }
        } else {
            AttemptOutcome::Retry {
                attempt_count,
                next_attempt_at: self.backoff.next_attempt_at(attempt_count, at),
                status_code,
                error,
            }
        }
    }

    /// Poll loop: runs on every publish signal and on a fixed interval, and
    /// keeps going without waiting while batches come back full. Shutdown is
    /// only checked between passes so in-flight attempts finish or time out.
    pub async fn run(self: Arc<Self>, id: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Delivery worker {id} started");

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(summary) if summary.selected as i64 >= self.config.batch_size => continue,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Delivery worker {id} error: {e}");
                }
            }

            tokio::select! {
                _ = interval.tick() => {}
                _ = self.signal.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Delivery worker {id} stopped");
    }
}

/// Start `worker_count` delivery loops on a dedicated Tokio runtime with its
/// own thread pool, so slow receivers never compete with request handling.
/// The returned thread exits once shutdown is signalled and every loop has
/// finished its current pass.
pub fn run_pool(
    worker: Arc<DeliveryWorker>,
    shutdown: watch::Receiver<bool>,
    worker_count: usize,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    let worker_count = worker_count.max(1);
    std::thread::Builder::new()
        .name("delivery-pool".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(worker_count)
                .thread_name("delivery-worker")
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!("Failed to build delivery runtime: {e}");
                    return;
                }
            };

            runtime.block_on(async {
                let mut handles = Vec::with_capacity(worker_count);

                for id in 0..worker_count {
                    handles.push(tokio::spawn(worker.clone().run(id, shutdown.clone())));
                }

                tracing::info!("Delivery worker pool started ({worker_count} workers)");

                for handle in handles {
                    let _ = handle.await;
                }

                tracing::info!("Delivery worker pool stopped");
            });
        })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::db::MemoryStore;
    use crate::delivery::TransportError;
    use crate::models::{NewDelivery, NewSubscription};

    /// Replays scripted responses; repeats the last one when the script runs out.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<u16, &'static str>>>,
        last: Mutex<Result<u16, &'static str>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<u16, &'static str>>) -> Arc<Self> {
            Self::with_delay(script, Duration::ZERO)
        }

        fn with_delay(script: Vec<Result<u16, &'static str>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                last: Mutex::new(*script.last().unwrap_or(&Ok(200))),
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: &OutboundRequest<'_>) -> Result<u16, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(*self.last.lock().unwrap());
            next.map_err(|e| TransportError::Connect(e.to_string()))
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            worker_count: 1,
            poll_interval: Duration::from_millis(50),
            batch_size: 50,
            per_tenant_batch: 10,
            concurrency: 4,
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(2),
            backoff_base: Duration::from_secs(10),
            backoff_max: Duration::from_secs(600),
        }
    }

    fn worker(store: &Arc<MemoryStore>, transport: Arc<ScriptedTransport>) -> DeliveryWorker {
        DeliveryWorker::new(store.clone(), transport, config(), DeliverySignal::new())
    }

    async fn pending_delivery(store: &MemoryStore, tenant_id: Uuid) -> Delivery {
        let sub = store
            .create_subscription(NewSubscription {
                tenant_id,
                target_url: "https://example.test/hook".to_string(),
                event_types: vec!["video.published".to_string()],
                description: None,
            })
            .await
            .unwrap();
        store
            .insert_deliveries(vec![NewDelivery {
                tenant_id,
                subscription_id: sub.id,
                event_type: "video.published".to_string(),
                payload: r#"{"video_id":1}"#.to_string(),
                next_attempt_at: Utc::now(),
            }])
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn success_is_terminal() {
        let store = Arc::new(MemoryStore::new());
        let delivery = pending_delivery(&store, Uuid::new_v4()).await;
        let transport = ScriptedTransport::new(vec![Ok(204)]);
        let worker = worker(&store, transport.clone());

        let summary = worker.run_once().await.unwrap();
        assert_eq!(summary.succeeded, 1);

        let stored = store.delivery(delivery.id).unwrap();
        assert_eq!(stored.status, DeliveryStatus::Succeeded);
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(stored.last_status_code, Some(204));
        assert!(stored.completed_at.is_some());

        worker.run_at(Utc::now() + ChronoDuration::days(1)).await.unwrap();
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn server_error_schedules_retry() {
        let store = Arc::new(MemoryStore::new());
        let delivery = pending_delivery(&store, Uuid::new_v4()).await;
        let worker = worker(&store, ScriptedTransport::new(vec![Ok(500)]));

        let started = Utc::now();
        let summary = worker.run_at(started).await.unwrap();
        assert_eq!(summary.retried, 1);

        let stored = store.delivery(delivery.id).unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);
        assert_eq!(stored.attempt_count, 1);
        assert!(stored.next_attempt_at > started);
        assert_eq!(stored.last_status_code, Some(500));
        assert!(stored.claim_token.is_none());
    }

    #[tokio::test]
    async fn retry_waits_for_backoff() {
        let store = Arc::new(MemoryStore::new());
        pending_delivery(&store, Uuid::new_v4()).await;
        let transport = ScriptedTransport::new(vec![Ok(500), Ok(200)]);
        let worker = worker(&store, transport.clone());

        let started = Utc::now();
        worker.run_at(started).await.unwrap();
        let summary = worker.run_at(started + ChronoDuration::seconds(1)).await.unwrap();
        assert_eq!(summary.selected, 0);

        let summary = worker.run_at(started + ChronoDuration::seconds(60)).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_abandon_for_good() {
        let store = Arc::new(MemoryStore::new());
        let delivery = pending_delivery(&store, Uuid::new_v4()).await;
        let transport = ScriptedTransport::new(vec![Err("connection refused")]);
        let worker = worker(&store, transport.clone());

        let mut now = Utc::now();
        for _ in 0..3 {
            worker.run_at(now).await.unwrap();
            now += ChronoDuration::hours(1);
        }

        let stored = store.delivery(delivery.id).unwrap();
        assert_eq!(stored.status, DeliveryStatus::Abandoned);
        assert_eq!(stored.attempt_count, 3);
        assert!(stored.last_error.as_deref().unwrap().contains("connection refused"));

        let summary = worker.run_at(now + ChronoDuration::days(30)).await.unwrap();
        assert_eq!(summary.selected, 0);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn deleted_subscription_abandons_immediately() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let delivery = pending_delivery(&store, tenant).await;
        store
            .delete_subscription(tenant, delivery.subscription_id)
            .await
            .unwrap();
        let transport = ScriptedTransport::new(vec![Ok(200)]);

        worker(&store, transport.clone()).run_once().await.unwrap();

        assert_eq!(
            store.delivery(delivery.id).unwrap().status,
            DeliveryStatus::Abandoned
        );
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn slow_receiver_counts_as_failure() {
        let store = Arc::new(MemoryStore::new());
        let delivery = pending_delivery(&store, Uuid::new_v4()).await;
        let transport = ScriptedTransport::with_delay(vec![Ok(200)], Duration::from_secs(5));
        let mut config = config();
        config.attempt_timeout = Duration::from_millis(100);
        let worker = DeliveryWorker::new(store.clone(), transport, config, DeliverySignal::new());

        worker.run_once().await.unwrap();

        let stored = store.delivery(delivery.id).unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);
        assert_eq!(stored.attempt_count, 1);
        assert!(stored.last_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn stuck_delivery_is_swept_back_to_pending() {
        let store = Arc::new(MemoryStore::new());
        let delivery = pending_delivery(&store, Uuid::new_v4()).await;
        let now = Utc::now();
        store.put_delivery(Delivery {
            status: DeliveryStatus::Delivering,
            attempt_count: 1,
            claim_token: Some(Uuid::new_v4()),
            claimed_at: Some(now - ChronoDuration::minutes(10)),
            ..delivery.clone()
        });
        let worker = worker(&store, ScriptedTransport::new(vec![Ok(200)]));

        let summary = worker.run_at(now).await.unwrap();
        assert_eq!(summary.reclaimed, 1);

        let stored = store.delivery(delivery.id).unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);
        assert_eq!(stored.attempt_count, 2);
        assert!(stored.claim_token.is_none());
    }

    #[tokio::test]
    async fn in_flight_delivery_is_not_swept() {
        let store = Arc::new(MemoryStore::new());
        let delivery = pending_delivery(&store, Uuid::new_v4()).await;
        let now = Utc::now();
        store.put_delivery(Delivery {
            status: DeliveryStatus::Delivering,
            claim_token: Some(Uuid::new_v4()),
            claimed_at: Some(now - ChronoDuration::milliseconds(500)),
            ..delivery.clone()
        });
        let worker = worker(&store, ScriptedTransport::new(vec![Ok(200)]));

        let summary = worker.run_at(now).await.unwrap();
        assert_eq!(summary.reclaimed, 0);
        assert_eq!(
            store.delivery(delivery.id).unwrap().status,
            DeliveryStatus::Delivering
        );
    }

    #[tokio::test]
    async fn late_claims_in_a_long_pass_are_not_swept() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let first = pending_delivery(&store, tenant).await;
        let second = pending_delivery(&store, tenant).await;
        let transport = ScriptedTransport::with_delay(vec![Ok(200)], Duration::from_millis(300));
        let mut config = config();
        config.concurrency = 1;
        let slow = DeliveryWorker::new(
            store.clone(),
            transport.clone(),
            config.clone(),
            DeliverySignal::new(),
        );
        let other = DeliveryWorker::new(
            store.clone(),
            transport.clone(),
            config,
            DeliverySignal::new(),
        );

        let pass_start = Utc::now();
        let lease = slow.claim_lease();
        let sweeper = async {
            // the second delivery is claimed about 300ms into the pass
            tokio::time::sleep(Duration::from_millis(450)).await;
            other
                .run_at(pass_start + lease + ChronoDuration::milliseconds(100))
                .await
                .unwrap()
        };
        let (pass, swept) = tokio::join!(slow.run_at(pass_start), sweeper);

        assert_eq!(swept.reclaimed, 0);
        assert_eq!(pass.unwrap().succeeded, 2);
        assert_eq!(transport.calls(), 2);
        for id in [first.id, second.id] {
            let stored = store.delivery(id).unwrap();
            assert_eq!(stored.status, DeliveryStatus::Succeeded);
            assert_eq!(stored.attempt_count, 1);
        }
    }

    #[tokio::test]
    async fn sweep_reclaims_at_most_one_batch() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for _ in 0..4 {
            let delivery = pending_delivery(&store, Uuid::new_v4()).await;
            store.put_delivery(Delivery {
                status: DeliveryStatus::Delivering,
                claim_token: Some(Uuid::new_v4()),
                claimed_at: Some(now - ChronoDuration::hours(1)),
                ..delivery
            });
        }
        let mut config = config();
        config.batch_size = 3;
        let worker = DeliveryWorker::new(
            store.clone(),
            ScriptedTransport::new(vec![Ok(200)]),
            config,
            DeliverySignal::new(),
        );

        assert_eq!(worker.run_at(now).await.unwrap().reclaimed, 3);
        assert_eq!(worker.run_at(now).await.unwrap().reclaimed, 1);
    }

    #[tokio::test]
    async fn racing_workers_deliver_once() {
        let store = Arc::new(MemoryStore::new());
        let delivery = pending_delivery(&store, Uuid::new_v4()).await;
        let transport = ScriptedTransport::with_delay(vec![Ok(200)], Duration::from_millis(50));
        let a = worker(&store, transport.clone());
        let b = worker(&store, transport.clone());

        let now = Utc::now();
        let (ra, rb) = tokio::join!(a.run_at(now), b.run_at(now));
        let total = ra.unwrap().succeeded + rb.unwrap().succeeded;

        assert_eq!(total, 1);
        assert_eq!(transport.calls(), 1);
        assert_eq!(
            store.delivery(delivery.id).unwrap().status,
            DeliveryStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn one_bad_delivery_does_not_stop_the_batch() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let gone = pending_delivery(&store, tenant).await;
        store
            .delete_subscription(tenant, gone.subscription_id)
            .await
            .unwrap();
        let ok = pending_delivery(&store, tenant).await;

        let summary = worker(&store, ScriptedTransport::new(vec![Ok(200)]))
            .run_once()
            .await
            .unwrap();

        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(store.delivery(ok.id).unwrap().status, DeliveryStatus::Succeeded);
    }

    #[tokio::test]
    async fn busy_tenant_does_not_starve_others() {
        let store = Arc::new(MemoryStore::new());
        let busy = Uuid::new_v4();
        for _ in 0..20 {
            pending_delivery(&store, busy).await;
        }
        let quiet = pending_delivery(&store, Uuid::new_v4()).await;
        let mut config = config();
        config.batch_size = 5;
        config.per_tenant_batch = 4;
        let worker = DeliveryWorker::new(
            store.clone(),
            ScriptedTransport::new(vec![Ok(200)]),
            config,
            DeliverySignal::new(),
        );

        let summary = worker.run_once().await.unwrap();

        assert_eq!(summary.selected, 5);
        assert_eq!(
            store.delivery(quiet.id).unwrap().status,
            DeliveryStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn loop_wakes_on_signal_and_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport::new(vec![Ok(200)]);
        let signal = DeliverySignal::new();
        let mut config = config();
        config.poll_interval = Duration::from_secs(3600);
        let worker = Arc::new(DeliveryWorker::new(
            store.clone(),
            transport.clone(),
            config,
            signal.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.clone().run(0, shutdown_rx));

        // let the first pass and the immediate first tick go by
        tokio::time::sleep(Duration::from_millis(100)).await;
        let delivery = pending_delivery(&store, Uuid::new_v4()).await;
        signal.notify();

        let mut delivered = false;
        for _ in 0..100 {
            if store.delivery(delivery.id).unwrap().status == DeliveryStatus::Succeeded {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(delivered);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
