//! `actbridge-middleware` – protocol plumbing around the bridge core.
//!
//! # Modules
//!
//! - [`adapter`] – the contracts the bridge core is written against: the
//!   [`PayloadTranslator`], the legacy-side [`LegacyActionClient`], and the
//!   new-protocol [`ServerGoalHandle`] / [`GoalCallbacks`] pair.
//! - [`bus`] – typed, topic-based publish/subscribe bus for goal lifecycle
//!   events, built on Tokio broadcast channels.
//! - [`local_server`] – an in-process new-protocol action server with its
//!   own callback-dispatch loop.
//! - [`sim_legacy`] – an in-process legacy action client/server pair.
//! - [`monitor`] – WebSocket endpoint streaming lifecycle events as JSON.

pub mod adapter;
pub mod bus;
pub mod local_server;
pub mod monitor;
pub mod sim_legacy;

pub use adapter::{
    GoalCallbacks, LegacyActionClient, LegacyEvent, LegacyGoalStream, PayloadTranslator,
    ServerGoalHandle,
};
pub use bus::{EventBus, Topic, TopicReceiver};
pub use local_server::{GoalResult, LocalActionClient, LocalActionServer, LocalClientGoal, LocalGoalHandle};
pub use monitor::BridgeMonitor;
pub use sim_legacy::{SimAvailability, SimGoal, SimLegacyClient, SimLegacyServer};
