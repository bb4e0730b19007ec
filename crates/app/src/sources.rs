//! Source manager — one subscription per configured device.
//!
//! A [`Source`] declares which devices of a capability an automation reads,
//! as a function of its config. On every config change the
//! [`SourceManager`] diffs that set against what is running: missing
//! subscriptions are started, removed ones are cancelled, and the rest keep
//! running untouched.
//!
//! Every subscription runs in its own task. Whatever the reason it ends, the
//! task sends a final "clear" patch so stale readings never linger, and an
//! error in one subscription never affects another.
//!
//! A key wanted again while its cancelled task is still winding down is only
//! restarted once that task has been reaped, so the old task's clear patch
//! always lands before the new task's first reading.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use buildhub_domain::capability::Capability;
use buildhub_domain::error::DeviceError;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::patch::Patch;
use crate::ports::DeviceNode;
use crate::pull::{self, PullOptions};
use crate::reading::Reading;
use crate::registry::Registry;
use crate::state::ReadState;

pub type SubscribeFuture = Pin<Box<dyn Future<Output = Result<(), DeviceError>> + Send>>;

/// A configured binding between a capability and a set of device names.
pub trait Source<C, S>: Send + Sync {
    fn capability(&self) -> Capability;

    /// Devices this source should be subscribed to under `config`.
    fn names(&self, config: &C) -> Vec<String>;

    /// Stream patches for `device` until `cancel` fires.
    fn subscribe(
        &self,
        device: String,
        cancel: CancellationToken,
        patches: mpsc::Sender<Patch<S>>,
    ) -> SubscribeFuture;

    /// Patch removing everything this source recorded for `device`.
    fn clear(&self, device: &str) -> Patch<S>;
}

/// Identifies one running subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey {
    pub capability: Capability,
    pub device: String,
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.capability, self.device)
    }
}

/// What a call to [`SourceManager::converge`] changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Convergence {
    pub started: Vec<SourceKey>,
    pub stopped: Vec<SourceKey>,
}

impl Convergence {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

struct Running {
    task: Id,
    cancel: CancellationToken,
}

/// Keeps running subscriptions in line with the configured sources.
pub struct SourceManager<C, S> {
    sources: Vec<Arc<dyn Source<C, S>>>,
    patches: mpsc::Sender<Patch<S>>,
    cancel: CancellationToken,
    running: BTreeMap<SourceKey, Running>,
    /// Cancelled tasks not reaped yet.
    stopping: HashMap<Id, SourceKey>,
    /// Wanted keys waiting for their previous task to be reaped.
    deferred: BTreeMap<SourceKey, Arc<dyn Source<C, S>>>,
    tasks: JoinSet<()>,
}

impl<C, S> SourceManager<C, S>
where
    C: 'static,
    S: 'static,
{
    /// Subscriptions are cancelled along with `cancel`.
    pub fn new(
        sources: Vec<Arc<dyn Source<C, S>>>,
        patches: mpsc::Sender<Patch<S>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sources,
            patches,
            cancel,
            running: BTreeMap::new(),
            stopping: HashMap::new(),
            deferred: BTreeMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Start missing subscriptions and cancel removed ones.
    ///
    /// A started key whose previous task is still stopping is reported as
    /// started but only spawned once [`SourceManager::join_next`] reaps the
    /// previous task.
    pub fn converge(&mut self, config: &C) -> Convergence {
        let mut desired: BTreeMap<SourceKey, Arc<dyn Source<C, S>>> = BTreeMap::new();
        for source in &self.sources {
            for device in source.names(config) {
                let key = SourceKey {
                    capability: source.capability(),
                    device,
                };
                desired.entry(key).or_insert_with(|| Arc::clone(source));
            }
        }

        let stopped: Vec<SourceKey> = self
            .running
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in &stopped {
            if let Some(running) = self.running.remove(key) {
                running.cancel.cancel();
                self.stopping.insert(running.task, key.clone());
            }
        }
        self.deferred.retain(|key, _| desired.contains_key(key));

        let mut started = Vec::new();
        for (key, source) in desired {
            if self.running.contains_key(&key) || self.deferred.contains_key(&key) {
                continue;
            }
            if self.is_stopping(&key) {
                tracing::debug!(%key, "previous subscription still stopping, deferring start");
                self.deferred.insert(key.clone(), source);
            } else {
                self.start(key.clone(), source);
            }
            started.push(key);
        }

        let convergence = Convergence { started, stopped };
        if !convergence.is_empty() {
            tracing::info!(
                started = convergence.started.len(),
                stopped = convergence.stopped.len(),
                running = self.running.len(),
                deferred = self.deferred.len(),
                "subscriptions converged"
            );
        }
        convergence
    }

    fn is_stopping(&self, key: &SourceKey) -> bool {
        self.stopping.values().any(|stopping| stopping == key)
    }

    fn start(&mut self, key: SourceKey, source: Arc<dyn Source<C, S>>) {
        let cancel = self.cancel.child_token();
        let patches = self.patches.clone();
        let subscription = source.subscribe(key.device.clone(), cancel.clone(), patches.clone());
        let span = tracing::info_span!(
            "subscription",
            capability = %key.capability,
            device = %key.device
        );
        let device = key.device.clone();

        let handle = self.tasks.spawn(
            async move {
                match subscription.await {
                    Ok(()) => tracing::debug!("subscription stopped"),
                    Err(err) if err.is_unimplemented() => {
                        tracing::warn!(%err, "device supports neither subscribe nor poll");
                    }
                    Err(err) if err.is_cancelled() => tracing::debug!("subscription cancelled"),
                    Err(err) => tracing::error!(%err, "subscription failed"),
                }
                // Receiver gone means the automation is shutting down.
                let _ = patches.send(source.clear(&device)).await;
            }
            .instrument(span),
        );

        self.running.insert(
            key,
            Running {
                task: handle.id(),
                cancel,
            },
        );
    }

    /// Wait for the next subscription task to end and forget it.
    ///
    /// Returns `None` right away when no task is running.
    pub async fn join_next(&mut self) -> Option<()> {
        let task = match self.tasks.join_next_with_id().await? {
            Ok((task, ())) => task,
            Err(err) => {
                tracing::error!(%err, "subscription task panicked");
                err.id()
            }
        };
        match self.stopping.remove(&task) {
            Some(key) => {
                if let Some(source) = self.deferred.remove(&key) {
                    tracing::debug!(%key, "previous subscription reaped, starting");
                    self.start(key, source);
                }
            }
            None => self.running.retain(|_, running| running.task != task),
        }
        Some(())
    }

    /// Keys of the subscriptions currently running.
    ///
    /// Deferred starts are not included until their task is spawned.
    pub fn running(&self) -> impl Iterator<Item = &SourceKey> {
        self.running.keys()
    }
}

impl<C, S> Drop for SourceManager<C, S> {
    fn drop(&mut self) {
        for running in self.running.values() {
            running.cancel.cancel();
        }
    }
}

// ── Readings from device nodes ─────────────────────────────────────

/// Device names a [`ReadingSource`] reads under a given config.
type NamesFn<C> = Box<dyn Fn(&C) -> Vec<String> + Send + Sync>;

/// [`Source`] recording `T` readings of devices served by a [`Registry`].
pub struct ReadingSource<N, T, C> {
    registry: Arc<Registry<N>>,
    names: NamesFn<C>,
    options: PullOptions,
    _reading: PhantomData<fn() -> T>,
}

impl<N, T, C> ReadingSource<N, T, C>
where
    N: DeviceNode,
    T: Reading,
    C: Send + Sync + 'static,
{
    pub fn new(
        registry: Arc<Registry<N>>,
        names: impl Fn(&C) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            registry,
            names: Box::new(names),
            options: PullOptions::default(),
            _reading: PhantomData,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: PullOptions) -> Self {
        self.options = options;
        self
    }
}

impl<N, T, C> Source<C, ReadState<C>> for ReadingSource<N, T, C>
where
    N: DeviceNode,
    T: Reading,
    C: Send + Sync + 'static,
{
    fn capability(&self) -> Capability {
        T::CAPABILITY
    }

    fn names(&self, config: &C) -> Vec<String> {
        (self.names)(config)
    }

    fn subscribe(
        &self,
        device: String,
        cancel: CancellationToken,
        patches: mpsc::Sender<Patch<ReadState<C>>>,
    ) -> SubscribeFuture {
        let fetcher = self.registry.fetcher::<T>(&device);
        let options = self.options.clone();

        Box::pin(async move {
            let fetcher = fetcher?;
            let (tx, mut rx) = mpsc::channel::<T>(1);

            let forward = async move {
                while let Some(value) = rx.recv().await {
                    tracing::debug!("reading received");
                    let device = device.clone();
                    let patch = Patch::new(move |state: &mut ReadState<C>| {
                        state.record(&device, value);
                    });
                    if patches.send(patch).await.is_err() {
                        break;
                    }
                }
            };

            let (result, ()) = tokio::join!(
                pull::changes(&cancel, &fetcher, tx, &options),
                forward
            );
            result
        })
    }

    fn clear(&self, device: &str) -> Patch<ReadState<C>> {
        let device = device.to_string();
        Patch::new(move |state: &mut ReadState<C>| state.clear::<T>(&device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use buildhub_domain::reading::{Brightness, Occupancy, OccupancyState};
    use buildhub_domain::settings::WriteSettings;

    use crate::automation::AutomationConfig;

    // ── Recording source ───────────────────────────────────────────

    /// Logs "start:X" / "stop:X" and fails devices named "bad*".
    struct RecordingSource {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingSource {
        fn new() -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
            let log = Arc::new(Mutex::new(Vec::new()));
            (
                Arc::new(Self {
                    log: Arc::clone(&log),
                }),
                log,
            )
        }
    }

    impl Source<Vec<&'static str>, Vec<String>> for RecordingSource {
        fn capability(&self) -> Capability {
            Capability::Occupancy
        }

        fn names(&self, config: &Vec<&'static str>) -> Vec<String> {
            config.iter().map(ToString::to_string).collect()
        }

        fn subscribe(
            &self,
            device: String,
            cancel: CancellationToken,
            _patches: mpsc::Sender<Patch<Vec<String>>>,
        ) -> SubscribeFuture {
            let log = Arc::clone(&self.log);
            Box::pin(async move {
                log.lock().unwrap().push(format!("start:{device}"));
                if device.starts_with("bad") {
                    return Err(DeviceError::Unavailable { name: device });
                }
                cancel.cancelled().await;
                log.lock().unwrap().push(format!("stop:{device}"));
                Ok(())
            })
        }

        fn clear(&self, device: &str) -> Patch<Vec<String>> {
            let entry = format!("clear:{device}");
            Patch::new(move |s: &mut Vec<String>| s.push(entry))
        }
    }

    /// Records "X" once started and only ends a while after cancellation.
    struct SlowTeardownSource;

    impl Source<Vec<&'static str>, Vec<String>> for SlowTeardownSource {
        fn capability(&self) -> Capability {
            Capability::Occupancy
        }

        fn names(&self, config: &Vec<&'static str>) -> Vec<String> {
            config.iter().map(ToString::to_string).collect()
        }

        fn subscribe(
            &self,
            device: String,
            cancel: CancellationToken,
            patches: mpsc::Sender<Patch<Vec<String>>>,
        ) -> SubscribeFuture {
            Box::pin(async move {
                let seen = Patch::new(move |s: &mut Vec<String>| s.push(device));
                let _ = patches.send(seen).await;
                cancel.cancelled().await;
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
        }

        fn clear(&self, device: &str) -> Patch<Vec<String>> {
            let device = device.to_string();
            Patch::new(move |s: &mut Vec<String>| s.retain(|d| d != &device))
        }
    }

    fn key(device: &str) -> SourceKey {
        SourceKey {
            capability: Capability::Occupancy,
            device: device.to_string(),
        }
    }

    fn manager<T: Source<Vec<&'static str>, Vec<String>> + 'static>(
        source: Arc<T>,
    ) -> (
        SourceManager<Vec<&'static str>, Vec<String>>,
        mpsc::Receiver<Patch<Vec<String>>>,
    ) {
        let (tx, rx) = mpsc::channel(10);
        let sources: Vec<Arc<dyn Source<Vec<&'static str>, Vec<String>>>> = vec![source];
        (SourceManager::new(sources, tx, CancellationToken::new()), rx)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn drain<S>(patches: &mut mpsc::Receiver<Patch<S>>, state: &mut S) {
        while let Ok(patch) = patches.try_recv() {
            patch.apply(state);
        }
    }

    // ── Tests ──────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn should_converge_without_restarting_kept_subscriptions() {
        let (source, log) = RecordingSource::new();
        let (mut manager, mut patches) = manager(source);

        let first = manager.converge(&vec!["A", "B"]);
        assert_eq!(first.started, vec![key("A"), key("B")]);
        assert!(first.stopped.is_empty());
        settle().await;

        let second = manager.converge(&vec!["B", "C"]);
        assert_eq!(second.stopped, vec![key("A")]);
        assert_eq!(second.started, vec![key("C")]);
        settle().await;

        let log = log.lock().unwrap().clone();
        assert_eq!(log.iter().filter(|e| *e == "start:B").count(), 1);
        assert!(!log.contains(&"stop:B".to_string()));
        assert!(log.contains(&"stop:A".to_string()));
        assert!(log.contains(&"start:C".to_string()));

        let mut state = Vec::new();
        patches.recv().await.unwrap().apply(&mut state);
        assert_eq!(state, vec!["clear:A".to_string()]);

        let running: Vec<_> = manager.running().cloned().collect();
        assert_eq!(running, vec![key("B"), key("C")]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_be_idempotent_for_unchanged_config() {
        let (source, log) = RecordingSource::new();
        let (mut manager, _patches) = manager(source);

        manager.converge(&vec!["A"]);
        let again = manager.converge(&vec!["A"]);
        settle().await;

        assert!(again.is_empty());
        assert_eq!(log.lock().unwrap().as_slice(), ["start:A".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_isolate_failing_subscription() {
        let (source, log) = RecordingSource::new();
        let (mut manager, mut patches) = manager(source);

        manager.converge(&vec!["bad-1", "good"]);
        manager.join_next().await.unwrap();

        let mut state = Vec::new();
        patches.recv().await.unwrap().apply(&mut state);
        assert_eq!(state, vec!["clear:bad-1".to_string()]);
        let running: Vec<_> = manager.running().cloned().collect();
        assert_eq!(running, vec![key("good")]);
        assert!(!log.lock().unwrap().contains(&"stop:good".to_string()));

        // A later config change starts the ended subscription again.
        let retry = manager.converge(&vec!["bad-1", "good"]);
        assert_eq!(retry.started, vec![key("bad-1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_cancel_everything_on_parent_cancel() {
        let (source, log) = RecordingSource::new();
        let (tx, _rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let sources: Vec<Arc<dyn Source<Vec<&'static str>, Vec<String>>>> = vec![source];
        let mut manager = SourceManager::new(sources, tx, cancel.clone());

        manager.converge(&vec!["A", "B"]);
        settle().await;
        cancel.cancel();
        while manager.join_next().await.is_some() {}

        let log = log.lock().unwrap().clone();
        assert!(log.contains(&"stop:A".to_string()));
        assert!(log.contains(&"stop:B".to_string()));
        assert_eq!(manager.running().count(), 0);
    }

    #[tokio::test]
    async fn should_report_nothing_to_join_when_idle() {
        let (source, _log) = RecordingSource::new();
        let (mut manager, _patches) = manager(source);
        assert!(manager.join_next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn should_restart_only_after_previous_subscription_is_reaped() {
        let (mut manager, mut patches) = manager(Arc::new(SlowTeardownSource));
        let mut state = Vec::new();

        manager.converge(&vec!["A"]);
        settle().await;
        manager.converge(&vec![]);
        let again = manager.converge(&vec!["A"]);
        assert_eq!(again.started, vec![key("A")]);
        assert!(manager.converge(&vec!["A"]).is_empty());
        assert_eq!(manager.running().count(), 0);

        manager.join_next().await.unwrap();
        settle().await;
        drain(&mut patches, &mut state);

        assert_eq!(state, vec!["A".to_string()]);
        let running: Vec<_> = manager.running().cloned().collect();
        assert_eq!(running, vec![key("A")]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_forget_deferred_start_when_removed_again() {
        let (mut manager, mut patches) = manager(Arc::new(SlowTeardownSource));
        let mut state = Vec::new();

        manager.converge(&vec!["A"]);
        settle().await;
        manager.converge(&vec![]);
        manager.converge(&vec!["A"]);
        let removed = manager.converge(&vec![]);
        assert!(removed.stopped.is_empty());

        manager.join_next().await.unwrap();
        settle().await;
        drain(&mut patches, &mut state);

        assert!(state.is_empty());
        assert_eq!(manager.running().count(), 0);
        assert!(manager.join_next().await.is_none());
    }

    // ── Reading source ─────────────────────────────────────────────

    #[derive(Debug, Default)]
    struct SensorConfig {
        settings: WriteSettings,
        sensors: Vec<String>,
    }

    impl AutomationConfig for SensorConfig {
        fn settings(&self) -> &WriteSettings {
            &self.settings
        }
    }

    /// Answers occupancy polls and nothing else.
    #[derive(Debug)]
    struct OccupancyOnlyNode;

    impl DeviceNode for OccupancyOnlyNode {
        fn name(&self) -> &'static str {
            "occupancy-only"
        }

        async fn get_occupancy(&self, _device: &str) -> Result<Occupancy, DeviceError> {
            let at = buildhub_domain::time::now();
            Ok(Occupancy::new(OccupancyState::Occupied, at))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_and_clear_unsupported_reading_only() {
        let registry = Arc::new(
            Registry::builder()
                .fallback(Arc::new(OccupancyOnlyNode))
                .build(),
        );
        let sensors = |config: &SensorConfig| config.sensors.clone();
        let sources: Vec<Arc<dyn Source<SensorConfig, ReadState<SensorConfig>>>> = vec![
            Arc::new(ReadingSource::<_, Occupancy, _>::new(
                Arc::clone(&registry),
                sensors,
            )),
            Arc::new(ReadingSource::<_, Brightness, _>::new(registry, sensors)),
        ];
        let (tx, mut patches) = mpsc::channel(10);
        let mut manager = SourceManager::new(sources, tx, CancellationToken::new());
        let config = SensorConfig {
            sensors: vec!["pir-1".to_string()],
            ..SensorConfig::default()
        };
        let mut state = ReadState::new(Arc::new(SensorConfig::default()));
        state.record(
            "pir-1",
            Brightness {
                level_percent: 10.0,
            },
        );

        let started = manager.converge(&config).started;
        assert_eq!(started.len(), 2);
        manager.join_next().await.unwrap();
        settle().await;
        drain(&mut patches, &mut state);

        let running: Vec<_> = manager.running().cloned().collect();
        assert_eq!(
            running,
            vec![SourceKey {
                capability: Capability::Occupancy,
                device: "pir-1".to_string(),
            }]
        );
        assert!(state.get::<Brightness>("pir-1").is_none());
        let occupancy = state.get::<Occupancy>("pir-1").unwrap();
        assert_eq!(occupancy.value.state, OccupancyState::Occupied);
    }
}
