//! Thread-safe handle to the fleet manager.
//!
//! Owns the manager worker thread. Public methods post events onto the
//! manager's queue and return immediately; queries use a bounded reply
//! channel. Dropping the runtime triggers a graceful shutdown: every
//! bearer is torn down and joined before the manager thread exits.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use switchyard_common::RequestId;
use switchyard_policy::ConfigHandle;

use crate::anomaly::{LogReporter, SharedReporter};
use crate::broker::{HandleId, NetworkBroker};
use crate::event::{EnvironmentEvent, ManagerEvent};
use crate::manager::{AggregateEvent, BearerManager, FleetSnapshot, ManagerDeps};
use crate::request::NetRequest;
use crate::sched::{RetryScheduler, TimerRetryScheduler};
use crate::service::DataService;

/// Errors from runtime calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("the fleet manager has shut down")]
    ManagerGone,
    #[error("query timed out")]
    QueryTimeout,
}

/// The assembled fleet: manager thread plus its collaborators.
pub struct SwitchyardRuntime {
    tx: Sender<ManagerEvent>,
    manager_thread: Option<thread::JoinHandle<()>>,
    config_forwarder: Option<thread::JoinHandle<()>>,
}

impl SwitchyardRuntime {
    /// Build with the bundled timer retry scheduler and log-based
    /// anomaly reporting.
    pub fn new(
        service: Arc<dyn DataService>,
        broker: Arc<dyn NetworkBroker>,
        config: Arc<ConfigHandle>,
    ) -> SwitchyardRuntime {
        let (tx, rx) = unbounded();
        let retry: Arc<dyn RetryScheduler> =
            Arc::new(TimerRetryScheduler::new(tx.clone(), config.clone()));
        Self::assemble(service, broker, Arc::new(LogReporter), retry, config, tx, rx)
    }

    /// Build with every collaborator supplied — the testing entry point.
    pub fn with_collaborators(
        service: Arc<dyn DataService>,
        broker: Arc<dyn NetworkBroker>,
        anomalies: SharedReporter,
        retry: Arc<dyn RetryScheduler>,
        config: Arc<ConfigHandle>,
        tx: Sender<ManagerEvent>,
        rx: Receiver<ManagerEvent>,
    ) -> SwitchyardRuntime {
        Self::assemble(service, broker, anomalies, retry, config, tx, rx)
    }

    /// The manager event channel, for wiring collaborators that post
    /// back (retry schedulers, brokers) before building the runtime.
    pub fn channel() -> (Sender<ManagerEvent>, Receiver<ManagerEvent>) {
        unbounded()
    }

    fn assemble(
        service: Arc<dyn DataService>,
        broker: Arc<dyn NetworkBroker>,
        anomalies: SharedReporter,
        retry: Arc<dyn RetryScheduler>,
        config: Arc<ConfigHandle>,
        tx: Sender<ManagerEvent>,
        rx: Receiver<ManagerEvent>,
    ) -> SwitchyardRuntime {
        // Config installs nudge the manager through its own queue.
        let config_rx = config.subscribe();
        let forward_tx = tx.clone();
        let config_forwarder = thread::Builder::new()
            .name("config-forwarder".into())
            .spawn(move || {
                while config_rx.recv().is_ok() {
                    if forward_tx.send(ManagerEvent::ConfigChanged).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn config forwarder");

        let deps = ManagerDeps { service, broker, anomalies, retry, config };
        let manager = BearerManager::new(rx, tx.clone(), deps);
        let manager_thread = thread::Builder::new()
            .name("switchyard-manager".into())
            .spawn(move || manager.run())
            .expect("failed to spawn fleet manager");

        SwitchyardRuntime {
            tx,
            manager_thread: Some(manager_thread),
            config_forwarder: Some(config_forwarder),
        }
    }

    /// Submit a request; returns its id for later release.
    pub fn submit(&self, request: NetRequest) -> Result<RequestId, RuntimeError> {
        let id = request.id;
        self.tx
            .send(ManagerEvent::Submit(request))
            .map(|_| id)
            .map_err(|_| RuntimeError::ManagerGone)
    }

    pub fn release(&self, id: RequestId) -> Result<(), RuntimeError> {
        self.tx.send(ManagerEvent::Release(id)).map_err(|_| RuntimeError::ManagerGone)
    }

    /// Deliver an inward environment signal.
    pub fn environment(&self, event: EnvironmentEvent) -> Result<(), RuntimeError> {
        self.tx.send(ManagerEvent::Environment(event)).map_err(|_| RuntimeError::ManagerGone)
    }

    /// The broker no longer wants this handle.
    pub fn notify_unwanted(&self, handle: HandleId) -> Result<(), RuntimeError> {
        self.tx.send(ManagerEvent::Unwanted { handle }).map_err(|_| RuntimeError::ManagerGone)
    }

    /// Register for edge-triggered aggregate transitions.
    pub fn watch_aggregates(&self) -> Result<Receiver<AggregateEvent>, RuntimeError> {
        let (tx, rx) = unbounded();
        self.tx.send(ManagerEvent::Watch(tx)).map_err(|_| RuntimeError::ManagerGone)?;
        Ok(rx)
    }

    /// A consistent snapshot of requests, bearers, and aggregates.
    pub fn snapshot(&self) -> Result<FleetSnapshot, RuntimeError> {
        let (tx, rx) = bounded(1);
        self.tx.send(ManagerEvent::Snapshot(tx)).map_err(|_| RuntimeError::ManagerGone)?;
        rx.recv_timeout(Duration::from_secs(5)).map_err(|_| RuntimeError::QueryTimeout)
    }

    /// Gracefully stop the fleet. Idempotent.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(ManagerEvent::Shutdown);
        if let Some(handle) = self.manager_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.config_forwarder.take() {
            drop(handle); // exits on its own once the config handle drops
        }
    }
}

impl Drop for SwitchyardRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
