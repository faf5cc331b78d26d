//! Buffered generation collector.
//!
//! `collect_generation` only enqueues. Records are delivered by `flush`, which
//! runs on demand, on the periodic auto-flush task, and once more on `close`.
//! The in-flight count covers queued, sending and requeued records; it drops
//! only when a record is delivered, discarded, or gives up retrying.

mod builder;
mod record;

pub use builder::PromptScanSdkBuilder;
pub use record::QueuedGeneration;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::CoreResult;
use crate::graphql::CollectResult;
use crate::model::{GenerationRecord, KeyValuePair};
use crate::transport::CollectTransport;

pub(crate) struct SdkSettings {
    pub(crate) flush_interval: Duration,
    pub(crate) max_retries: u32,
    pub(crate) enabled: bool,
    pub(crate) debug: bool,
    pub(crate) default_tags: Vec<KeyValuePair>,
}

struct Inner {
    transport: Arc<dyn CollectTransport>,
    queue: Mutex<VecDeque<QueuedGeneration>>,
    in_flight: AtomicUsize,
    flush_lock: tokio::sync::Mutex<()>,
    shutdown: Notify,
    closed: AtomicBool,
    enabled: AtomicBool,
    debug: bool,
    max_retries: u32,
    flush_interval: Duration,
    default_tags: Vec<KeyValuePair>,
}

/// Client handle for reporting generations to PromptScan.
pub struct PromptScanSdk {
    inner: Arc<Inner>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl PromptScanSdk {
    pub fn builder() -> PromptScanSdkBuilder {
        PromptScanSdkBuilder::new()
    }

    pub(crate) fn start(
        settings: SdkSettings,
        transport: Arc<dyn CollectTransport>,
        runtime: Option<tokio::runtime::Handle>,
    ) -> Self {
        let inner = Arc::new(Inner {
            transport,
            queue: Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
            flush_lock: tokio::sync::Mutex::new(()),
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
            enabled: AtomicBool::new(settings.enabled),
            debug: settings.debug,
            max_retries: settings.max_retries,
            flush_interval: settings.flush_interval,
            default_tags: settings.default_tags,
        });

        if inner.debug {
            tracing::debug!(
                enabled = settings.enabled,
                auto_flush = runtime.is_some(),
                "PromptScan SDK is initialized"
            );
        }

        let flush_task = runtime.map(|handle| handle.spawn(run_periodic_flush(inner.clone())));
        Self {
            inner,
            flush_task: Mutex::new(flush_task),
        }
    }

    /// Queue a generation for delivery with the SDK's default API key.
    pub fn collect_generation(&self, generation: GenerationRecord) {
        self.inner.enqueue(QueuedGeneration::new(generation, None));
    }

    /// Queue a generation to be delivered under a different API key.
    pub fn collect_generation_with_key(&self, generation: GenerationRecord, api_key: impl Into<String>) {
        self.inner
            .enqueue(QueuedGeneration::new(generation, Some(api_key.into())));
    }

    /// Generations submitted but not yet delivered or given up on.
    pub fn estimate_generations_in_flight_count(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Send everything queued so far; must run inside a Tokio runtime.
    /// Returns the records the collector accepted, or, while collection is
    /// disabled, the records discarded.
    pub async fn flush(&self) -> Vec<QueuedGeneration> {
        self.inner.flush().await
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop the periodic flush and deliver what is left. Failed records are
    /// not requeued after this point. Calling `close` twice only warns.
    pub async fn close(&self) {
        {
            let _queue = self.inner.lock_queue();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                tracing::warn!("PromptScan SDK is already closed");
                return;
            }
        }
        if self.inner.debug {
            tracing::debug!("Closing PromptScan SDK");
        }

        self.inner.shutdown.notify_one();
        let task = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
            && e.is_panic()
        {
            tracing::error!(error = %e, "periodic flush task panicked");
        }

        self.inner.flush().await;

        if self.inner.debug {
            tracing::debug!("PromptScan SDK is closed");
        }
    }
}

impl Drop for PromptScanSdk {
    fn drop(&mut self) {
        self.inner.shutdown.notify_one();
        {
            let _queue = self.inner.lock_queue();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        let pending = self.estimate_generations_in_flight_count();
        if pending == 0 {
            return;
        }
        // Best-effort final delivery, standing in for an explicit close.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                if self.inner.debug {
                    tracing::debug!(pending, "PromptScan SDK dropped without close; flushing");
                }
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move {
                    inner.flush_now().await;
                });
            }
            Err(_) => {
                tracing::warn!(pending, "PromptScan SDK dropped outside a runtime; pending generations are lost");
            }
        }
    }
}

impl fmt::Debug for PromptScanSdk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptScanSdk")
            .field("in_flight", &self.estimate_generations_in_flight_count())
            .field("enabled", &self.is_enabled())
            .field("closed", &self.is_closed())
            .field("max_retries", &self.inner.max_retries)
            .field("flush_interval", &self.inner.flush_interval)
            .finish()
    }
}

async fn run_periodic_flush(inner: Arc<Inner>) {
    let period = inner.flush_interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = inner.shutdown.notified() => break,
            _ = interval.tick() => {
                if inner.debug {
                    tracing::debug!("Periodic flush");
                }
                inner.flush_now().await;
            }
        }
    }
}

impl Inner {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<QueuedGeneration>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, record: QueuedGeneration) {
        let mut queue = self.lock_queue();
        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!(
                id = record.generation.id.as_deref(),
                "PromptScan SDK is closed; discarding generation"
            );
            return;
        }
        if self.debug {
            tracing::debug!(
                id = record.generation.id.as_deref(),
                "Adding generation record to queue"
            );
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        queue.push_back(record);
    }

    fn resolve(&self, count: usize) {
        self.in_flight.fetch_sub(count, Ordering::SeqCst);
    }

    /// Runs the flush on its own task so that dropping the caller's future
    /// cannot strand drained records outside the queue.
    async fn flush(self: &Arc<Self>) -> Vec<QueuedGeneration> {
        let inner = Arc::clone(self);
        match tokio::spawn(async move { inner.flush_now().await }).await {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::error!(error = %e, "flush task failed");
                Vec::new()
            }
        }
    }

    async fn flush_now(&self) -> Vec<QueuedGeneration> {
        let _flushing = self.flush_lock.lock().await;
        let drained: Vec<QueuedGeneration> = self.lock_queue().drain(..).collect();
        if drained.is_empty() {
            return Vec::new();
        }

        if !self.enabled.load(Ordering::SeqCst) {
            if self.debug {
                tracing::debug!(
                    count = drained.len(),
                    "Discarding records since collection is disabled"
                );
            }
            self.resolve(drained.len());
            return drained;
        }

        if self.debug {
            tracing::debug!(count = drained.len(), "Flushing records");
        }

        // One batch per API key, in first-seen order.
        let mut batches: Vec<(Option<String>, Vec<QueuedGeneration>)> = Vec::new();
        for mut record in drained {
            record.apply_default_tags(&self.default_tags);
            match batches.iter_mut().find(|(key, _)| *key == record.api_key) {
                Some((_, batch)) => batch.push(record),
                None => batches.push((record.api_key.clone(), vec![record])),
            }
        }

        let mut sends = Vec::with_capacity(batches.len());
        for (api_key, batch) in batches {
            sends.push(self.send_batch(api_key, batch));
        }

        let mut delivered = Vec::new();
        for (batch, outcome) in futures::future::join_all(sends).await {
            match outcome {
                Ok(CollectResult { success: true, .. }) => {
                    self.resolve(batch.len());
                    delivered.extend(batch);
                }
                Ok(CollectResult { error, .. }) => {
                    tracing::warn!(
                        count = batch.len(),
                        error = error.as_deref().unwrap_or("unspecified"),
                        "Collector rejected generations"
                    );
                    self.retry_later(batch);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(count = batch.len(), error = %e, "Failed to collect generations");
                    self.retry_later(batch);
                }
                Err(e) => {
                    tracing::error!(count = batch.len(), error = %e, "Failed to collect generations");
                    self.retry_later(batch);
                }
            }
        }
        delivered
    }

    async fn send_batch(
        &self,
        api_key: Option<String>,
        batch: Vec<QueuedGeneration>,
    ) -> (Vec<QueuedGeneration>, CoreResult<CollectResult>) {
        let outcome = {
            let generations: Vec<&GenerationRecord> = batch.iter().map(|q| &q.generation).collect();
            self.transport
                .collect(&generations, api_key.as_deref())
                .await
        };
        (batch, outcome)
    }

    fn retry_later(&self, batch: Vec<QueuedGeneration>) {
        let closed = self.closed.load(Ordering::SeqCst);
        let mut dropped = 0;
        let mut requeued = 0;
        {
            let mut queue = self.lock_queue();
            for mut record in batch {
                record.retries += 1;
                if closed || record.retries >= self.max_retries {
                    dropped += 1;
                } else {
                    queue.push_back(record);
                    requeued += 1;
                }
            }
        }
        if dropped > 0 {
            self.resolve(dropped);
            tracing::warn!(dropped, closed, "Giving up on generations after failed delivery");
        }
        if requeued > 0 && self.debug {
            tracing::debug!(requeued, "Adding records back to queue for retry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PromptScanError;
    use crate::model::{Message, Usage};
    use crate::test_log::install_capture;
    use async_trait::async_trait;
    use chrono::Utc;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;
    use std::collections::HashMap;

    const API_KEY: &str = "project-f47ac10b-58cc-4372-a567-0e02b2c3d479";

    /// Replays scripted outcomes in order, then succeeds; records every call.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<CoreResult<CollectResult>>>,
        calls: Mutex<Vec<(Option<String>, Vec<GenerationRecord>)>>,
    }

    impl ScriptedTransport {
        fn with_script(script: Vec<CoreResult<CollectResult>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(Option<String>, Vec<GenerationRecord>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CollectTransport for ScriptedTransport {
        async fn collect(
            &self,
            generations: &[&GenerationRecord],
            api_key: Option<&str>,
        ) -> CoreResult<CollectResult> {
            self.calls.lock().unwrap().push((
                api_key.map(str::to_string),
                generations.iter().map(|g| (*g).clone()).collect(),
            ));
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(CollectResult {
                success: true,
                error: None,
            }))
        }
    }

    /// Holds every call until the test hands out a permit.
    struct GatedTransport {
        gate: tokio::sync::Semaphore,
        started: Notify,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl GatedTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: tokio::sync::Semaphore::new(0),
                started: Notify::new(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn release(&self, calls: usize) {
            self.gate.add_permits(calls);
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CollectTransport for GatedTransport {
        async fn collect(
            &self,
            generations: &[&GenerationRecord],
            _api_key: Option<&str>,
        ) -> CoreResult<CollectResult> {
            self.calls
                .lock()
                .unwrap()
                .push(generations.iter().filter_map(|g| g.id.clone()).collect());
            self.started.notify_one();
            self.gate.acquire().await.unwrap().forget();
            Ok(CollectResult {
                success: true,
                error: None,
            })
        }
    }

    fn gated_sdk(transport: Arc<GatedTransport>) -> PromptScanSdk {
        PromptScanSdk::builder()
            .api_key("key-default")
            .auto_flush(false)
            .transport(transport)
            .build()
            .unwrap()
    }

    fn rejected() -> CoreResult<CollectResult> {
        Ok(CollectResult {
            success: false,
            error: Some("try later".into()),
        })
    }

    fn unavailable() -> CoreResult<CollectResult> {
        Err(PromptScanError::Unavailable {
            endpoint: "stub".into(),
        })
    }

    fn generation(id: &str) -> GenerationRecord {
        GenerationRecord::new("m", vec![]).id(id)
    }

    fn full_generation() -> GenerationRecord {
        GenerationRecord::new(
            "gpt-4o-mini",
            vec![
                Message::system("You are a helpful assistant!"),
                Message::user("Hi!"),
            ],
        )
        .trace_id("0b5c1f7e-8f0e-4a39-9d1c-2f8a3c6d7e01")
        .id("6f1d2c3b-4a5e-4f60-8b7a-9c0d1e2f3a4b")
        .usage(
            Usage::tokens(20, 20, 40)
                .prompt_details(Some(0), Some(0))
                .completion_details(Some(0), Some(0)),
        )
        .tag("user_id", "xyz")
        .timestamp(Utc::now().fixed_offset())
        .costs(0.125, 0.450)
    }

    fn stub_sdk(transport: Arc<ScriptedTransport>) -> PromptScanSdkBuilder {
        PromptScanSdk::builder()
            .api_key("key-default")
            .auto_flush(false)
            .transport(transport)
    }

    async fn collector_server() -> MockServer {
        MockServer::start_async().await
    }

    fn setup(server: &MockServer) -> PromptScanSdk {
        PromptScanSdk::builder()
            .api_key(API_KEY)
            .base_url(server.url("/graphql/"))
            .debug(true)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn generations_collection() {
        let server = collector_server().await;
        let m = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/graphql/")
                    .header("Authorization", format!("Bearer {API_KEY}"))
                    .body_contains("\"model\":\"gpt-4o-mini\"");
                then.status(200)
                    .json_body(json!({"data": {"collect": {"success": true, "error": null}}}));
            })
            .await;
        let sdk = setup(&server);

        sdk.collect_generation(full_generation());
        assert_eq!(sdk.estimate_generations_in_flight_count(), 1);

        let delivered = sdk.flush().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(sdk.estimate_generations_in_flight_count(), 0);
        m.assert_async().await;

        sdk.close().await;
    }

    #[tokio::test]
    async fn collect_generations_with_multiple_api_keys() {
        let server = collector_server().await;
        let ok = json!({"data": {"collect": {"success": true, "error": null}}});
        let key_a = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/graphql/")
                    .header("Authorization", "Bearer key-a")
                    .body_contains("\"id\":\"a\"")
                    .body_contains("\"id\":\"c\"");
                then.status(200).json_body(ok.clone());
            })
            .await;
        let key_b = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/graphql/")
                    .header("Authorization", "Bearer key-b")
                    .body_contains("\"id\":\"b\"");
                then.status(200).json_body(ok.clone());
            })
            .await;
        let key_default = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/graphql/")
                    .header("Authorization", "Bearer key-default")
                    .body_contains("\"id\":\"d\"");
                then.status(200).json_body(ok.clone());
            })
            .await;

        let sdk = PromptScanSdk::builder()
            .api_key("key-default")
            .base_url(server.url("/graphql/"))
            .auto_flush(false)
            .build()
            .unwrap();

        sdk.collect_generation_with_key(generation("a"), "key-a");
        sdk.collect_generation_with_key(generation("b"), "key-b");
        sdk.collect_generation_with_key(generation("c"), "key-a");
        sdk.collect_generation(generation("d"));
        assert_eq!(sdk.estimate_generations_in_flight_count(), 4);

        let delivered = sdk.flush().await;
        assert_eq!(delivered.len(), 4);
        assert_eq!(sdk.estimate_generations_in_flight_count(), 0);

        key_a.assert_hits_async(1).await;
        key_b.assert_hits_async(1).await;
        key_default.assert_hits_async(1).await;
        sdk.close().await;
    }

    #[tokio::test]
    async fn batches_group_by_api_key() {
        let transport = ScriptedTransport::with_script(vec![]);
        let sdk = stub_sdk(transport.clone()).build().unwrap();

        sdk.collect_generation_with_key(generation("a"), "key-a");
        sdk.collect_generation_with_key(generation("b"), "key-b");
        sdk.collect_generation_with_key(generation("c"), "key-a");
        sdk.collect_generation(generation("d"));
        sdk.flush().await;

        let by_key: HashMap<Option<String>, Vec<String>> = transport
            .calls()
            .into_iter()
            .map(|(key, gens)| (key, gens.into_iter().filter_map(|g| g.id).collect()))
            .collect();
        assert_eq!(by_key.len(), 3);
        assert_eq!(by_key[&Some("key-a".to_string())], vec!["a", "c"]);
        assert_eq!(by_key[&Some("key-b".to_string())], vec!["b"]);
        assert_eq!(by_key[&None], vec!["d"]);
    }

    #[tokio::test]
    async fn retry_on_failed_flush() {
        let transport = ScriptedTransport::with_script(vec![unavailable(), rejected()]);
        let sdk = stub_sdk(transport.clone()).build().unwrap();

        sdk.collect_generation(generation("a"));
        assert_eq!(sdk.estimate_generations_in_flight_count(), 1);

        assert!(sdk.flush().await.is_empty());
        assert_eq!(sdk.estimate_generations_in_flight_count(), 1);

        assert!(sdk.flush().await.is_empty());
        assert_eq!(sdk.estimate_generations_in_flight_count(), 1);

        let delivered = sdk.flush().await;
        assert_eq!(sdk.estimate_generations_in_flight_count(), 0);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].retries(), 2);
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let transport = ScriptedTransport::with_script(vec![unavailable(), unavailable()]);
        let sdk = stub_sdk(transport.clone()).max_retries(2).build().unwrap();

        sdk.collect_generation(generation("a"));
        sdk.flush().await;
        assert_eq!(sdk.estimate_generations_in_flight_count(), 1);
        sdk.flush().await;
        assert_eq!(sdk.estimate_generations_in_flight_count(), 0);

        // Nothing left to send.
        sdk.flush().await;
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn auto_flush_drains_queue() {
        let server = collector_server().await;
        let m = server
            .mock_async(|when, then| {
                when.method(POST).path("/graphql/");
                then.status(200)
                    .json_body(json!({"data": {"collect": {"success": true}}}));
            })
            .await;
        let sdk = PromptScanSdk::builder()
            .api_key(API_KEY)
            .base_url(server.url("/graphql/"))
            .flush_interval_millis(50)
            .build()
            .unwrap();

        sdk.collect_generation(generation("a"));
        for _ in 0..40 {
            if sdk.estimate_generations_in_flight_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(sdk.estimate_generations_in_flight_count(), 0);
        m.assert_hits_async(1).await;
        sdk.close().await;
    }

    #[tokio::test]
    async fn flush_on_close() {
        let transport = ScriptedTransport::with_script(vec![]);
        let sdk = stub_sdk(transport.clone()).build().unwrap();

        sdk.collect_generation(generation("a"));
        sdk.close().await;

        assert_eq!(transport.calls().len(), 1);
        assert_eq!(sdk.estimate_generations_in_flight_count(), 0);
        assert!(sdk.is_closed());
    }

    #[tokio::test]
    async fn close_stops_periodic_task_and_flushes() {
        let transport = ScriptedTransport::with_script(vec![]);
        let sdk = PromptScanSdk::builder()
            .api_key("key-default")
            .flush_interval(Duration::from_secs(3600))
            .transport(transport.clone())
            .build()
            .unwrap();

        sdk.collect_generation(generation("a"));
        sdk.close().await;
        assert_eq!(transport.calls().len(), 1);
        assert!(sdk.flush_task.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn failures_during_close_are_not_requeued() {
        let transport = ScriptedTransport::with_script(vec![unavailable()]);
        let sdk = stub_sdk(transport.clone()).build().unwrap();

        sdk.collect_generation(generation("a"));
        sdk.close().await;
        assert_eq!(sdk.estimate_generations_in_flight_count(), 0);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn close_twice_and_collect_after_close() {
        let transport = ScriptedTransport::with_script(vec![]);
        let sdk = stub_sdk(transport.clone()).build().unwrap();

        sdk.close().await;
        sdk.close().await;
        sdk.collect_generation(generation("late"));
        assert_eq!(sdk.estimate_generations_in_flight_count(), 0);
        assert!(sdk.flush().await.is_empty());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn enabled_switch() {
        let transport = ScriptedTransport::with_script(vec![]);
        let sdk = stub_sdk(transport.clone()).enabled(false).build().unwrap();

        sdk.collect_generation(generation("a"));
        let discarded = sdk.flush().await;
        assert_eq!(discarded.len(), 1);
        assert_eq!(sdk.estimate_generations_in_flight_count(), 0);
        assert!(transport.calls().is_empty());

        sdk.set_enabled(true);
        sdk.collect_generation(generation("a"));
        sdk.flush().await;
        assert_eq!(transport.calls().len(), 1);

        sdk.set_enabled(false);
        sdk.collect_generation(generation("a"));
        sdk.flush().await;
        assert_eq!(transport.calls().len(), 1);
        assert!(!sdk.is_enabled());
    }

    #[tokio::test]
    async fn default_tags_merge_under_record_tags() {
        let transport = ScriptedTransport::with_script(vec![]);
        let sdk = stub_sdk(transport.clone())
            .api_key("test-key")
            .default_tags([("env", "test"), ("version", "1.0")])
            .build()
            .unwrap();

        sdk.collect_generation(
            GenerationRecord::new("m", vec![])
                .id("a")
                .tag("version", "2.0")
                .tag("app", "demo"),
        );

        let delivered = sdk.flush().await;
        assert_eq!(delivered.len(), 1);
        let tags: HashMap<String, String> = delivered[0]
            .generation()
            .tags
            .clone()
            .unwrap()
            .into_iter()
            .map(|p| (p.key, p.value))
            .collect();
        let expected: HashMap<String, String> = [("env", "test"), ("version", "2.0"), ("app", "demo")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(tags, expected);

        let sent = &transport.calls()[0].1[0];
        assert_eq!(sent.tags, delivered[0].generation().tags);
    }

    #[tokio::test]
    async fn in_flight_counts_records_being_sent() {
        let transport = GatedTransport::new();
        let sdk = Arc::new(gated_sdk(transport.clone()));

        sdk.collect_generation(generation("a"));
        let first = tokio::spawn({
            let sdk = sdk.clone();
            async move { sdk.flush().await.len() }
        });
        transport.started.notified().await;
        assert_eq!(sdk.estimate_generations_in_flight_count(), 1);

        // A second flush waits for the first instead of sending alongside it.
        sdk.collect_generation(generation("b"));
        let second = tokio::spawn({
            let sdk = sdk.clone();
            async move { sdk.flush().await.len() }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());
        assert_eq!(transport.calls(), vec![vec!["a".to_string()]]);
        assert_eq!(sdk.estimate_generations_in_flight_count(), 2);

        transport.release(2);
        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(second.await.unwrap(), 1);
        assert_eq!(
            transport.calls(),
            vec![vec!["a".to_string()], vec!["b".to_string()]]
        );
        assert_eq!(sdk.estimate_generations_in_flight_count(), 0);
    }

    #[tokio::test]
    async fn abandoned_flush_still_delivers() {
        let transport = GatedTransport::new();
        let sdk = gated_sdk(transport.clone());

        sdk.collect_generation(generation("a"));
        let timed_out = tokio::time::timeout(Duration::from_millis(50), sdk.flush()).await;
        assert!(timed_out.is_err());
        assert_eq!(sdk.estimate_generations_in_flight_count(), 1);

        transport.release(1);
        // Waits for the abandoned flush to finish, then finds nothing queued.
        assert!(sdk.flush().await.is_empty());
        assert_eq!(sdk.estimate_generations_in_flight_count(), 0);
        assert_eq!(transport.calls().len(), 1);

        sdk.close().await;
        assert_eq!(sdk.estimate_generations_in_flight_count(), 0);
    }

    #[tokio::test]
    async fn drop_without_close_flushes_pending() {
        let transport = ScriptedTransport::with_script(vec![]);
        let sdk = stub_sdk(transport.clone()).build().unwrap();

        sdk.collect_generation(generation("a"));
        drop(sdk);
        for _ in 0..40 {
            if !transport.calls().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1[0].id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn debug_flag_gates_debug_logs() {
        let (store, _guard) = install_capture();

        let quiet = stub_sdk(ScriptedTransport::with_script(vec![])).build().unwrap();
        quiet.collect_generation(generation("quiet"));
        quiet.flush().await;
        assert!(store.debug_messages().is_empty());

        let chatty = stub_sdk(ScriptedTransport::with_script(vec![]))
            .debug(true)
            .build()
            .unwrap();
        chatty.collect_generation(generation("chatty"));
        chatty.flush().await;
        let messages = store.debug_messages();
        assert!(messages.iter().any(|m| m.contains("Adding generation record to queue")));
        assert!(messages.iter().any(|m| m.contains("Flushing records")));
    }
}
