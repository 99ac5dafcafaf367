//! The controller: cache-sync barrier, worker pool and shutdown.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use informer::{HasSynced, Resource, ResourceKey, SharedInformer, WatchStream};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use workqueue::RateLimitingQueue;

use crate::config::ControllerConfig;
use crate::error::{Error, Result, SyncError};
use crate::handler::EventHandler;
use crate::report::{ErrorKind, ErrorReport, ErrorReporter, TracingErrorReporter};
use crate::sync::SyncHandler;

/// Level-triggered controller for one resource kind.
///
/// Lifecycle is `new` → `run` → stop. The controller subscribes to the
/// informer on construction, so no notification sent between `new` and
/// `run` is missed.
pub struct Controller<T> {
    config: ControllerConfig,
    queue: RateLimitingQueue<ResourceKey>,
    synced: Arc<dyn HasSynced>,
    handler: Arc<dyn SyncHandler>,
    reporter: Arc<dyn ErrorReporter>,
    /// Consecutive failed syncs per key, shared by all workers.
    failures: Arc<Mutex<HashMap<ResourceKey, u32>>>,
    /// Taken by the first `run`.
    stream: Mutex<Option<WatchStream<T>>>,
}

impl<T: Resource> Controller<T> {
    /// Wire `informer` notifications to a new queue processed by `handler`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn new(
        informer: &Arc<SharedInformer<T>>,
        handler: Arc<dyn SyncHandler>,
        config: ControllerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let queue = RateLimitingQueue::new(config.name.clone(), config.rate_limiter.build()?);
        info!(controller = %config.name, kind = T::KIND, "Setting up event handlers");
        let stream = informer.subscribe();
        let synced: Arc<dyn HasSynced> = Arc::clone(informer) as Arc<dyn HasSynced>;

        Ok(Self {
            config,
            queue,
            synced,
            handler,
            reporter: Arc::new(TracingErrorReporter::new()),
            failures: Arc::default(),
            stream: Mutex::new(Some(stream)),
        })
    }

    /// Send non-fatal errors to `reporter` instead of the log.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The controller's work queue.
    pub const fn queue(&self) -> &RateLimitingQueue<ResourceKey> {
        &self.queue
    }

    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// An adapter feeding this controller's queue.
    pub fn event_handler(&self) -> EventHandler<T> {
        EventHandler::new(
            self.config.name.as_str(),
            self.queue.clone(),
            Arc::clone(&self.reporter),
        )
    }

    /// Process keys with `workers` concurrent workers until `stop` fires.
    ///
    /// Nothing is processed before the informer cache has synced. After
    /// `stop`, the queue is shut down, keys already pending are drained,
    /// and in-flight syncs run to completion before this returns.
    ///
    /// # Errors
    ///
    /// `CacheSyncFailed` if `stop` fires before the cache syncs,
    /// `AlreadyStarted` on a second call, `InvalidConfig` for zero workers.
    pub async fn run(&self, workers: usize, stop: CancellationToken) -> Result<()> {
        if workers == 0 {
            return Err(Error::invalid_config("worker count must be positive"));
        }
        let stream = self
            .stream
            .lock()
            .take()
            .ok_or_else(|| Error::already_started(&self.config.name))?;

        let name = self.config.name.as_str();
        let adapter = self.event_handler();
        let adapter_stop = stop.clone();
        let adapter_task = tokio::spawn(async move { adapter.run(stream, adapter_stop).await });

        info!(controller = %name, "Starting control loop");
        info!(controller = %name, "Waiting for informer caches to sync");
        if !self.wait_for_cache_sync(&stop).await {
            self.queue.shut_down();
            join_adapter(adapter_task).await;
            return Err(Error::cache_sync_failed(name));
        }

        info!(controller = %name, workers, "Starting workers");
        let mut pool = JoinSet::new();
        for id in 0..workers {
            let worker = self.worker();
            pool.spawn(async move { worker.run(id).await });
        }
        info!(controller = %name, "Started workers");

        stop.cancelled().await;
        info!(controller = %name, "Shutting down workers");
        self.queue.shut_down();
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!(controller = %name, error = %e, "Worker task failed");
            }
        }
        join_adapter(adapter_task).await;
        info!(controller = %name, "Workers stopped");
        Ok(())
    }

    /// Lease one key and sync it. Returns false once the queue has shut down.
    pub async fn process_next_work_item(&self) -> bool {
        self.worker().process_next_work_item().await
    }

    /// True once synced, false if `stop` fires first.
    async fn wait_for_cache_sync(&self, stop: &CancellationToken) -> bool {
        let poll = self.config.cache_sync_poll_interval();
        loop {
            if self.synced.has_synced() {
                return true;
            }
            tokio::select! {
                biased;
                () = stop.cancelled() => return false,
                () = tokio::time::sleep(poll) => {}
            }
        }
    }

    fn worker(&self) -> Worker {
        Worker {
            controller: Arc::from(self.config.name.as_str()),
            queue: self.queue.clone(),
            handler: Arc::clone(&self.handler),
            reporter: Arc::clone(&self.reporter),
            failures: Arc::clone(&self.failures),
            max_retries: self.config.max_retries,
        }
    }
}

async fn join_adapter(task: tokio::task::JoinHandle<()>) {
    if let Err(e) = task.await {
        warn!(error = %e, "Event handler task failed");
    }
}

/// Everything one worker loop needs, detached from the controller borrow.
struct Worker {
    controller: Arc<str>,
    queue: RateLimitingQueue<ResourceKey>,
    handler: Arc<dyn SyncHandler>,
    reporter: Arc<dyn ErrorReporter>,
    failures: Arc<Mutex<HashMap<ResourceKey, u32>>>,
    max_retries: Option<u32>,
}

impl Worker {
    async fn run(self, id: usize) {
        debug!(controller = %self.controller, worker = id, "Worker started");
        while self.process_next_work_item().await {}
        debug!(controller = %self.controller, worker = id, "Worker exiting");
    }

    async fn process_next_work_item(&self) -> bool {
        // The lease marks the key done when dropped, on every path out of here.
        let Some(item) = self.queue.get().await else {
            return false;
        };
        let key = item.key().clone();

        let outcome = AssertUnwindSafe(self.handler.sync(&key))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {
                self.forget(&key);
                info!(controller = %self.controller, key = %key, "Successfully synced");
            }
            Ok(Err(SyncError::Permanent(reason))) => {
                self.forget(&key);
                self.report(ErrorKind::PermanentFailure, &key, &reason);
            }
            Ok(Err(SyncError::Transient(reason))) => {
                self.requeue(&key, ErrorKind::SyncFailed, &reason);
            }
            Err(panic) => {
                self.requeue(&key, ErrorKind::HandlerPanicked, &panic_message(panic.as_ref()));
            }
        }

        drop(item);
        true
    }

    /// Retry `key` with backoff, or drop it once its retries are used up.
    ///
    /// Only failed syncs count against `max_retries`; event enqueues do not.
    fn requeue(&self, key: &ResourceKey, kind: ErrorKind, reason: &str) {
        let failures = {
            let mut counts = self.failures.lock();
            let count = counts.entry(key.clone()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        let retries = failures.saturating_sub(1);
        match self.max_retries {
            Some(max) if retries >= max => {
                self.forget(key);
                self.report(kind, key, reason);
                self.report(
                    ErrorKind::RetriesExhausted,
                    key,
                    &format!("dropping key after {retries} retries: {reason}"),
                );
            }
            _ => {
                self.report(kind, key, reason);
                self.queue.add_rate_limited(key.clone());
            }
        }
    }

    fn forget(&self, key: &ResourceKey) {
        self.failures.lock().remove(key);
        self.queue.forget(key);
    }

    fn report(&self, kind: ErrorKind, key: &ResourceKey, message: &str) {
        self.reporter.report(&ErrorReport {
            controller: &self.controller,
            kind,
            key: Some(key),
            message,
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "sync handler panicked".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use informer::ObjectMeta;
    use tokio::time::Instant;
    use workqueue::RateLimiterConfig;

    use super::*;
    use crate::report::testing::RecordingReporter;

    #[derive(Debug, Clone)]
    struct Widget {
        metadata: ObjectMeta,
    }

    impl Resource for Widget {
        const KIND: &'static str = "Widget";

        fn meta(&self) -> &ObjectMeta {
            &self.metadata
        }

        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.metadata
        }
    }

    enum Step {
        Succeed,
        Fail(SyncError),
        Panic,
    }

    /// Plays back scripted outcomes, succeeding once the script runs out.
    #[derive(Default)]
    struct ScriptedHandler {
        script: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedHandler {
        fn with_script(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into_iter().collect()),
                calls: Mutex::default(),
            })
        }

        fn succeeding() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl SyncHandler for ScriptedHandler {
        async fn sync(&self, key: &ResourceKey) -> std::result::Result<(), SyncError> {
            self.calls.lock().push((key.to_string(), Instant::now()));
            let step = self.script.lock().pop_front().unwrap_or(Step::Succeed);
            match step {
                Step::Succeed => Ok(()),
                Step::Fail(e) => Err(e),
                Step::Panic => panic!("handler blew up"),
            }
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig::default()
            .with_name("widgets")
            .with_rate_limiter(
                RateLimiterConfig::default()
                    .with_base_delay(Duration::from_millis(100))
                    .with_max_delay(Duration::from_secs(10)),
            )
    }

    fn setup(
        handler: Arc<ScriptedHandler>,
        config: ControllerConfig,
    ) -> (
        Arc<SharedInformer<Widget>>,
        Controller<Widget>,
        Arc<RecordingReporter>,
    ) {
        let informer = Arc::new(SharedInformer::new());
        let reporter = Arc::new(RecordingReporter::default());
        let controller = Controller::new(&informer, handler, config)
            .unwrap()
            .with_reporter(reporter.clone());
        (informer, controller, reporter)
    }

    fn key(name: &str) -> ResourceKey {
        ResourceKey::namespaced("ns", name)
    }

    // ==========================================================================
    // process_next_work_item
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn should_forget_key_after_success() {
        let handler = ScriptedHandler::succeeding();
        let (_, controller, reporter) = setup(handler.clone(), config());
        controller.queue().add_rate_limited(key("a"));
        assert_eq!(controller.queue().num_requeues(&key("a")), 1);

        assert!(controller.process_next_work_item().await);

        assert_eq!(handler.call_count(), 1);
        assert_eq!(controller.queue().num_requeues(&key("a")), 0);
        assert_eq!(controller.queue().processing_len(), 0);
        assert!(reporter.kinds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_requeue_transient_failures_with_backoff() {
        let handler = ScriptedHandler::with_script([Step::Fail(SyncError::transient("timeout"))]);
        let (_, controller, reporter) = setup(handler.clone(), config());
        controller.queue().add(key("a"));

        assert!(controller.process_next_work_item().await);
        assert!(controller.queue().is_empty());
        assert_eq!(controller.queue().num_requeues(&key("a")), 1);

        let started = Instant::now();
        assert!(controller.process_next_work_item().await);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(100), "waited {waited:?}");
        assert!(waited < Duration::from_millis(200), "waited {waited:?}");
        assert_eq!(handler.call_count(), 2);
        assert_eq!(reporter.kinds(), vec![ErrorKind::SyncFailed]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_forget_permanent_failures() {
        let handler = ScriptedHandler::with_script([Step::Fail(SyncError::permanent("bad spec"))]);
        let (_, controller, reporter) = setup(handler, config());
        controller.queue().add(key("a"));

        assert!(controller.process_next_work_item().await);

        assert_eq!(controller.queue().num_requeues(&key("a")), 0);
        assert!(controller.queue().is_empty());
        assert!(controller.queue().try_get().is_none());
        assert_eq!(reporter.kinds(), vec![ErrorKind::PermanentFailure]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_treat_panics_as_transient() {
        let handler = ScriptedHandler::with_script([Step::Panic]);
        let (_, controller, reporter) = setup(handler.clone(), config());
        controller.queue().add(key("a"));

        assert!(controller.process_next_work_item().await);
        assert_eq!(controller.queue().processing_len(), 0);
        assert_eq!(reporter.kinds(), vec![ErrorKind::HandlerPanicked]);

        assert!(controller.process_next_work_item().await);
        assert_eq!(handler.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn should_drop_key_after_max_retries() {
        let handler = ScriptedHandler::with_script([
            Step::Fail(SyncError::transient("1")),
            Step::Fail(SyncError::transient("2")),
            Step::Fail(SyncError::transient("3")),
        ]);
        let (_, controller, reporter) = setup(handler.clone(), config().with_max_retries(2));
        controller.queue().add(key("a"));

        for _ in 0..3 {
            assert!(controller.process_next_work_item().await);
        }

        assert_eq!(handler.call_count(), 3);
        assert_eq!(controller.queue().num_requeues(&key("a")), 0);
        assert!(controller.queue().try_get().is_none());
        assert_eq!(
            reporter.kinds(),
            vec![
                ErrorKind::SyncFailed,
                ErrorKind::SyncFailed,
                ErrorKind::SyncFailed,
                ErrorKind::RetriesExhausted,
            ]
        );
    }

    fn widget(name: &str, version: &str) -> Widget {
        Widget {
            metadata: ObjectMeta::namespaced("ns", name).with_resource_version(version),
        }
    }

    /// Feed every notification received so far through the event adapter.
    fn pump_events(controller: &Controller<Widget>) {
        let adapter = controller.event_handler();
        let mut stream = controller.stream.lock();
        let stream = stream.as_mut().unwrap();
        while let Some(event) = stream.try_recv() {
            adapter.handle(&event);
        }
    }

    fn always_failing(times: usize) -> Arc<ScriptedHandler> {
        ScriptedHandler::with_script(
            (0..times).map(|i| Step::Fail(SyncError::transient(format!("attempt {i}")))),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn should_give_informer_keys_the_full_retry_budget() {
        let handler = always_failing(10);
        let (informer, controller, reporter) = setup(handler.clone(), config().with_max_retries(2));
        informer.replace(vec![widget("a", "1")]);
        pump_events(&controller);

        for _ in 0..3 {
            assert!(controller.process_next_work_item().await);
        }

        assert_eq!(handler.call_count(), 3);
        assert!(controller.queue().try_get().is_none());
        assert_eq!(
            reporter.kinds().last(),
            Some(&ErrorKind::RetriesExhausted)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_count_events_against_retry_budget() {
        let handler = always_failing(10);
        let (informer, controller, reporter) = setup(handler.clone(), config().with_max_retries(2));
        informer.replace(vec![widget("a", "1")]);
        pump_events(&controller);

        assert!(controller.process_next_work_item().await);
        informer.upsert(widget("a", "2")).unwrap();
        informer.upsert(widget("a", "3")).unwrap();
        pump_events(&controller);

        for _ in 0..2 {
            assert!(controller.process_next_work_item().await);
        }

        assert_eq!(handler.call_count(), 3);
        assert!(controller.queue().try_get().is_none());
        let exhausted = reporter
            .kinds()
            .into_iter()
            .filter(|kind| *kind == ErrorKind::RetriesExhausted)
            .count();
        assert_eq!(exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_reset_failure_count_after_success() {
        let handler = ScriptedHandler::with_script([
            Step::Fail(SyncError::transient("1")),
            Step::Succeed,
            Step::Fail(SyncError::transient("2")),
            Step::Fail(SyncError::transient("3")),
            Step::Fail(SyncError::transient("4")),
        ]);
        let (_, controller, reporter) = setup(handler.clone(), config().with_max_retries(2));
        controller.queue().add(key("a"));
        for _ in 0..2 {
            assert!(controller.process_next_work_item().await);
        }
        assert!(!reporter.kinds().contains(&ErrorKind::RetriesExhausted));

        controller.queue().add(key("a"));
        for _ in 0..3 {
            assert!(controller.process_next_work_item().await);
        }

        assert_eq!(handler.call_count(), 5);
        assert!(controller.queue().try_get().is_none());
        assert_eq!(
            reporter.kinds().last(),
            Some(&ErrorKind::RetriesExhausted)
        );
    }

    #[tokio::test]
    async fn should_stop_processing_after_shutdown() {
        let (_, controller, _) = setup(ScriptedHandler::succeeding(), config());
        controller.queue().shut_down();

        assert!(!controller.process_next_work_item().await);
    }

    // ==========================================================================
    // run
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn should_fail_run_when_stopped_before_sync() {
        let handler = ScriptedHandler::succeeding();
        let (informer, controller, _) = setup(handler.clone(), config());
        informer
            .upsert(Widget {
                metadata: ObjectMeta::namespaced("ns", "a"),
            })
            .unwrap();
        let stop = CancellationToken::new();

        let canceller = {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                stop.cancel();
            })
        };

        let result = controller.run(2, stop).await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(Error::CacheSyncFailed { .. })));
        assert_eq!(handler.call_count(), 0);
        assert!(controller.queue().is_shutting_down());
    }

    #[tokio::test]
    async fn should_refuse_second_run() {
        let (informer, controller, _) = setup(ScriptedHandler::succeeding(), config());
        informer.replace(Vec::new());
        let controller = Arc::new(controller);
        let stop = CancellationToken::new();

        let first = {
            let controller = Arc::clone(&controller);
            let stop = stop.clone();
            tokio::spawn(async move { controller.run(1, stop).await })
        };
        while controller.stream.lock().is_some() {
            tokio::task::yield_now().await;
        }

        let second = controller.run(1, stop.clone()).await;
        assert!(matches!(second, Err(Error::AlreadyStarted { .. })));

        stop.cancel();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn should_reject_zero_workers() {
        let (_, controller, _) = setup(ScriptedHandler::succeeding(), config());

        let result = controller.run(0, CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn should_reject_invalid_config() {
        let informer = Arc::new(SharedInformer::<Widget>::new());
        let result = Controller::new(
            &informer,
            ScriptedHandler::succeeding(),
            config().with_workers(0),
        );

        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn should_extract_panic_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");

        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(boxed.as_ref()), "sync handler panicked");
    }
}
