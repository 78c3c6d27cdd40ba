//! Actors driving a session
//!
//! Each actor runs as an independent tokio task that owns its state and is reached only
//! through a cloneable handle and an mpsc command channel.
//!
//! ```text
//!              ┌──────────────┐  tick   ┌──────────────┐
//!   source ───►│ MonitorActor ├────────►│ TickPipeline │── alerts ──► subscribers
//!              └──────┬───────┘         └──────┬───────┘
//!                     │ snapshots              │ snapshots, alerts
//!                     ▼                        ▼
//!                subscribers          ┌───────────────────┐
//!                                     │ OrchestratorActor ├──► executions
//!                                     └───────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: mpsc channel per actor, processed one at a time
//! 2. **Request/Response**: oneshot channel carried inside the command
//! 3. **Events**: [`Subscribers`](crate::events::Subscribers) fan-out with a grace period

pub mod messages;
pub mod monitor;
pub mod orchestrator;
pub mod pipeline;

pub use messages::{OrchestratorStatus, SnapshotEvent};
pub use monitor::{MonitorHandle, MonitorSetup, TickStage};
pub use orchestrator::{ABANDONED_AT_STOP, OrchestratorHandle, OrchestratorSetup};
pub use pipeline::TickPipeline;
