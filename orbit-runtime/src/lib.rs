//! The reconciliation engine: watch, queue, causation, registry, handler
//! runner, finalizers, peering, throttling, events, and the orchestrator
//! that wires them together (spec.md §4).
//!
//! Builds on [`orbit_core`]'s value types and [`orbit_client`]'s transport
//! to run a full operator process.

pub mod causation;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod orchestrator;
pub mod peering;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod throttle;
pub mod watcher;

pub use causation::{classify, CausationInput};
pub use config::OperatorConfig;
pub use context::{HandlerContext, OperatorContext};
pub use error::{Error, HandlerError, Result};
pub use events::{EventRecorder, EventType, HandlerEvent};
pub use orchestrator::Orchestrator;
pub use peering::Peering;
pub use queue::Queue;
pub use registry::{
    Activity, Declaration, ErrorsMode, Filter, HandlerKind, HandlerOptions, Registry, TimerDeclaration, WhenFn,
};
pub use runner::{run_cycle, CycleOutcome};
pub use throttle::Throttler;
