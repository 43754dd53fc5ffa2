use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{
    core::{
        event::Event,
        store::{CheckpointStore, EventStore, ProjectionStore},
    },
    error::Result,
};

const ENGINE_TARGET: &str = "runeforge.engine";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A read-model maintainer. Handlers must tolerate at-least-once
/// delivery and be idempotent within a stream.
pub trait Projector: Send + Sync {
    fn name(&self) -> &str;
    fn handle(&self, event: &Event, store: &dyn ProjectionStore) -> Result<()>;
}

/// What the catch-up cycle does with the checkpoint when a projector
/// handler fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Log the error and advance past the event. A poisonous event
    /// cannot stall the projector; a rewind + replay after a code fix
    /// recovers the dropped effect.
    #[default]
    AdvanceOnError,
    /// Stop the (realm, projector) scan at the first failure and
    /// checkpoint only the prefix that succeeded.
    HaltOnError,
}

#[derive(Clone)]
struct CycleContext {
    event_store: Arc<dyn EventStore>,
    projection_store: Arc<dyn ProjectionStore>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    projectors: Vec<Arc<dyn Projector>>,
    error_policy: ErrorPolicy,
}

impl CycleContext {
    /// One catch-up pass: for every realm, for every projector in
    /// registration order, drain events past the checkpoint and
    /// advance it. Failures skip only the affected scope.
    fn run_once(&self, cancel: &CancellationToken) {
        let realm_ids = match self.event_store.list_realm_ids() {
            Ok(ids) => ids,
            Err(err) => {
                warn!(target: ENGINE_TARGET, "catch-up: listing realms failed: {err}");
                return;
            }
        };

        for realm_id in &realm_ids {
            for projector in &self.projectors {
                if cancel.is_cancelled() {
                    return;
                }
                self.drain(realm_id, projector.as_ref());
            }
        }
    }

    fn drain(&self, realm_id: &str, projector: &dyn Projector) {
        let name = projector.name();

        let checkpoint = match self.checkpoint_store.get_checkpoint(realm_id, name) {
            Ok(position) => position,
            Err(err) => {
                warn!(
                    target: ENGINE_TARGET,
                    "catch-up: checkpoint for {realm_id}/{name} unavailable: {err}"
                );
                return;
            }
        };

        let events = match self.event_store.read_all(realm_id, checkpoint) {
            Ok(events) => events,
            Err(err) => {
                warn!(
                    target: ENGINE_TARGET,
                    "catch-up: reading realm {realm_id} from {checkpoint} failed: {err}"
                );
                return;
            }
        };
        if events.is_empty() {
            return;
        }

        let mut last_position = checkpoint;
        for event in &events {
            if let Err(err) = projector.handle(event, self.projection_store.as_ref()) {
                error!(
                    target: ENGINE_TARGET,
                    "catch-up: projector {name} failed on event {} in realm {realm_id}: {err}",
                    event.global_position
                );
                if self.error_policy == ErrorPolicy::HaltOnError {
                    break;
                }
            }
            last_position = event.global_position;
        }

        if last_position > checkpoint {
            if let Err(err) = self
                .checkpoint_store
                .set_checkpoint(realm_id, name, last_position)
            {
                warn!(
                    target: ENGINE_TARGET,
                    "catch-up: storing checkpoint {last_position} for {realm_id}/{name} failed: {err}"
                );
            }
        }
    }
}

/// Hosts the ordered projector set, fans events out to it, and keeps
/// the per-(realm, projector) checkpoints moving.
///
/// Projectors are registered before the catch-up worker starts;
/// mutating the set afterwards is out of contract.
pub struct ProjectionEngine {
    cycle: CycleContext,
    poll_interval: Duration,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl ProjectionEngine {
    pub fn new(
        event_store: Arc<dyn EventStore>,
        projection_store: Arc<dyn ProjectionStore>,
        checkpoint_store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            cycle: CycleContext {
                event_store,
                projection_store,
                checkpoint_store,
                projectors: Vec::new(),
                error_policy: ErrorPolicy::default(),
            },
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancellationToken::new(),
            worker: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.cycle.error_policy = error_policy;
        self
    }

    pub fn register(&mut self, projector: Arc<dyn Projector>) {
        self.cycle.projectors.push(projector);
    }

    pub fn projector_count(&self) -> usize {
        self.cycle.projectors.len()
    }

    /// Write-path fan-out: apply an in-hand batch to every projector in
    /// registration order, each event in supplied order. Handler errors
    /// are logged and swallowed; durable progress stays with the
    /// catch-up loop. Returns early only if the engine is cancelled.
    pub fn run_sync(&self, events: &[Event]) {
        for projector in &self.cycle.projectors {
            for event in events {
                if self.cancel.is_cancelled() {
                    return;
                }
                if let Err(err) = projector.handle(event, self.cycle.projection_store.as_ref()) {
                    error!(
                        target: ENGINE_TARGET,
                        "sync: projector {} failed on event {}: {err}",
                        projector.name(),
                        event.global_position
                    );
                }
            }
        }
    }

    /// One synchronous catch-up cycle. Used by tests and by callers
    /// that want read-your-writes before answering.
    pub fn run_catch_up_once(&self) {
        self.cycle.run_once(&self.cancel);
    }

    /// Launch the background worker: an immediate first cycle, then one
    /// per poll interval until [`stop`](Self::stop).
    pub fn start_catch_up(&mut self) {
        if self.worker.is_some() {
            return;
        }

        let cycle = self.cycle.clone();
        let cancel = self.cancel.clone();
        let poll_interval = self.poll_interval;

        self.worker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => cycle.run_once(&cancel),
                }
            }
        }));
    }

    /// Cancel the worker and wait for it to wind down. Safe to call
    /// again after it returns.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                warn!(target: ENGINE_TARGET, "catch-up worker did not exit cleanly: {err}");
            }
        }
    }
}
