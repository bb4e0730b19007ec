//! Automation runtime — wires sources, merger and scheduler together.
//!
//! An [`Automation`] is a decision plus the sources it reads and the actions
//! it writes through. [`Automation::run`] drives three stages until
//! cancelled:
//!
//! 1. the merger, applying patches from every subscription to the snapshot
//! 2. the scheduler, running the decision on settled snapshots and timers
//! 3. the config watcher, turning each new config into a config patch and a
//!    convergence of the running subscriptions
//!
//! The stages run under `try_join!`: the first one to fail stops the others.

use std::future::Future;
use std::sync::Arc;

use buildhub_domain::error::HubError;
use buildhub_domain::id::RunId;
use buildhub_domain::settings::WriteSettings;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::actions::{Actions, CachedActions};
use crate::merger::process_patches;
use crate::patch::Patch;
use crate::scheduler::{ProcessHook, Scheduler, Ttl};
use crate::sources::{Source, SourceManager};
use crate::state::{ReadState, WriteState};

/// Depth of the patch channel shared by every subscription.
pub const PATCH_BUFFER: usize = 10;

/// Configuration of one automation instance.
pub trait AutomationConfig: Send + Sync + 'static {
    fn settings(&self) -> &WriteSettings;
}

/// The decision logic of an automation.
///
/// Inspects the snapshot, issues writes through `actions` and returns how
/// long the outcome stays valid. The last recorded writes are available
/// through [`CachedActions::state`].
pub trait Decide<C>: Send + 'static {
    /// # Errors
    ///
    /// Any error makes the scheduler retry after the configured delay.
    fn decide<A: Actions>(
        &mut self,
        read: &ReadState<C>,
        actions: &mut CachedActions<A>,
    ) -> impl Future<Output = Result<Ttl, HubError>> + Send;
}

/// A decision with its sources and actions, ready to run.
pub struct Automation<C, D, A> {
    name: String,
    decision: D,
    actions: A,
    sources: Vec<Arc<dyn Source<C, ReadState<C>>>>,
    on_processed: Option<ProcessHook<C>>,
}

impl<C, D, A> Automation<C, D, A>
where
    C: AutomationConfig,
    D: Decide<C>,
    A: Actions + 'static,
{
    pub fn new(name: impl Into<String>, decision: D, actions: A) -> Self {
        Self {
            name: name.into(),
            decision,
            actions,
            sources: Vec::new(),
            on_processed: None,
        }
    }

    #[must_use]
    pub fn source(mut self, source: impl Source<C, ReadState<C>> + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// Observe every decision run; used by tests to synchronise.
    #[must_use]
    pub fn on_processed(
        mut self,
        hook: impl FnMut(&ReadState<C>, &WriteState, Ttl, Option<&HubError>) + Send + 'static,
    ) -> Self {
        self.on_processed = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until `cancel` fires, following config updates from `configs`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Cancelled`] when `cancel` fires. Device and
    /// decision errors are handled internally and never end the run.
    pub async fn run(
        self,
        cancel: CancellationToken,
        mut configs: watch::Receiver<Arc<C>>,
    ) -> Result<(), HubError> {
        let span = tracing::info_span!("automation", automation = %self.name, run = %RunId::new());
        let Self {
            decision,
            actions,
            sources,
            on_processed,
            ..
        } = self;

        async move {
            let initial = Arc::clone(&configs.borrow_and_update());
            let (patch_tx, patch_rx) = mpsc::channel(PATCH_BUFFER);
            let (state_tx, state_rx) = mpsc::channel(1);
            let mut manager = SourceManager::new(sources, patch_tx.clone(), cancel.child_token());
            let mut scheduler = Scheduler::new(decision, actions);
            if let Some(hook) = on_processed {
                scheduler = scheduler.on_processed(hook);
            }

            tracing::info!("automation started");
            let result = tokio::try_join!(
                process_patches(
                    cancel.clone(),
                    ReadState::new(Arc::clone(&initial)),
                    patch_rx,
                    state_tx,
                ),
                scheduler.run(cancel.clone(), state_rx),
                watch_configs(&cancel, &mut configs, &mut manager, patch_tx, &initial),
            );
            match &result {
                Err(err) if err.is_cancelled() => tracing::info!("automation stopped"),
                Err(err) => tracing::error!(%err, "automation failed"),
                Ok(_) => tracing::info!("automation finished"),
            }
            result.map(|_| ())
        }
        .instrument(span)
        .await
    }
}

async fn watch_configs<C: AutomationConfig>(
    cancel: &CancellationToken,
    configs: &mut watch::Receiver<Arc<C>>,
    manager: &mut SourceManager<C, ReadState<C>>,
    patches: mpsc::Sender<Patch<ReadState<C>>>,
    initial: &C,
) -> Result<(), HubError> {
    manager.converge(initial);
    let mut configs_open = true;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HubError::Cancelled),
            changed = configs.changed(), if configs_open => {
                if changed.is_err() {
                    tracing::debug!("config sender dropped, keeping last config");
                    configs_open = false;
                    continue;
                }
                let config = Arc::clone(&configs.borrow_and_update());
                tracing::info!("configuration updated");
                let applied = Arc::clone(&config);
                let patch = Patch::new(move |state: &mut ReadState<C>| state.set_config(applied));
                if patches.send(patch).await.is_err() {
                    return Ok(());
                }
                manager.converge(&config);
            }
            Some(()) = manager.join_next() => {}
        }
    }
}

/// Control over a spawned automation.
#[derive(Debug)]
pub struct AutomationHandle<C> {
    name: String,
    configs: watch::Sender<Arc<C>>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), HubError>>,
}

/// Spawn `automation` on the current runtime with its first `config`.
///
/// The automation stops when `parent` is cancelled or on
/// [`AutomationHandle::stop`].
pub fn spawn_automation<C, D, A>(
    automation: Automation<C, D, A>,
    config: C,
    parent: &CancellationToken,
) -> AutomationHandle<C>
where
    C: AutomationConfig,
    D: Decide<C>,
    A: Actions + 'static,
{
    let name = automation.name().to_string();
    let (configs, rx) = watch::channel(Arc::new(config));
    let cancel = parent.child_token();
    let task = tokio::spawn(automation.run(cancel.clone(), rx));
    AutomationHandle {
        name,
        configs,
        cancel,
        task,
    }
}

impl<C> AutomationHandle<C> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The config the automation currently follows.
    #[must_use]
    pub fn config(&self) -> Arc<C> {
        Arc::clone(&self.configs.borrow())
    }

    /// Push a new config; subscriptions converge and the decision re-runs.
    pub fn configure(&self, config: C) {
        self.configs.send_replace(Arc::new(config));
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the automation to end. A stop is not an error.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the automation, other than cancellation.
    pub async fn join(self) -> Result<(), HubError> {
        match self.task.await {
            Ok(Err(err)) if err.is_cancelled() => Ok(()),
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Ok(()),
        }
    }
}
