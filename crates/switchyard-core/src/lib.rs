//! Switchyard bearer lifecycle core.
//!
//! Two actors do the work here. Each [`bearer::Bearer`] runs one data
//! session as a single-threaded state machine with its own mailbox:
//! Connecting → Connected ⇄ HandingOver → Disconnecting → Disconnected.
//! The [`manager::BearerManager`] owns the fleet: it matches consumer
//! requests to bearers, drives the policy evaluation engine, orders
//! handovers and teardowns, and reconciles environment changes. The two
//! only ever talk by posting events — commands one way, reports the
//! other.
//!
//! The outside world plugs in through traits: [`service::DataService`]
//! performs the actual setup/teardown I/O, [`broker::NetworkBroker`]
//! receives capability/link publications, [`sched::RetryScheduler`] owns
//! backoff timing, and [`anomaly::AnomalyReporter`] collects diagnostics.
//! [`runtime::SwitchyardRuntime`] wires all of it together behind a
//! thread-safe handle.

pub mod anomaly;
pub mod bearer;
pub mod broker;
pub mod event;
pub mod manager;
pub mod request;
pub mod runtime;
pub mod sched;
pub mod service;
pub mod testing;

pub use anomaly::{Anomaly, AnomalyReporter, LogReporter};
pub use bearer::{Bearer, BearerState};
pub use broker::{HandleDescriptor, HandleId, NetworkBroker};
pub use event::{
    BearerCommand, BearerEnvUpdate, BearerEvent, BearerReport, EnvironmentEvent, ManagerEvent,
    TeardownReason,
};
pub use manager::{AggregateEvent, BearerManager, FleetSnapshot, InternetState, ManagerDeps};
pub use request::{NetRequest, RequestState, RequestTable};
pub use runtime::{RuntimeError, SwitchyardRuntime};
pub use sched::{RetryRequest, RetryScheduler, TimerRetryScheduler};
pub use service::{DataService, SetupFailure, SetupRequest, SetupResult, SetupSuccess};
