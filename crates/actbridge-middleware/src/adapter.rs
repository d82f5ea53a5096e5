//! The adapter contracts.
//!
//! The bridge core never speaks to either middleware runtime directly.  It is
//! written against the traits in this module, and each protocol side supplies
//! an implementation:
//!
//! - [`PayloadTranslator`] – stateless, action-type-specific mapping between
//!   the two protocols' goal / feedback / result payloads.
//! - [`LegacyActionClient`] – a single-slot client of an old-protocol action
//!   server.
//! - [`ServerGoalHandle`] – the live handle of one accepted new-protocol goal.
//! - [`GoalCallbacks`] – the three callbacks a new-protocol action server
//!   invokes from its dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use actbridge_types::{BridgeError, CancelResponse, GoalId, GoalResponse, LegacyGoalState};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Pure mapping functions between the payload shapes of one action type.
///
/// Implementations hold no state.  Every mapping is fallible; the bridge
/// turns a failed goal or result mapping into an abort and drops a feedback
/// message whose mapping fails.
pub trait PayloadTranslator: Send + Sync + 'static {
    /// New-protocol goal payload.
    type Goal: Send + Sync + 'static;
    /// New-protocol feedback payload.
    type Feedback: Send + 'static;
    /// New-protocol result payload.  `Default` is what the bridge reports
    /// when no translated result is available.
    type Result: Default + Send + 'static;

    type LegacyGoal: Send + 'static;
    type LegacyFeedback: Send + 'static;
    type LegacyResult: Send + 'static;

    fn goal_to_legacy(&self, goal: &Self::Goal) -> Result<Self::LegacyGoal, BridgeError>;

    fn feedback_to_new(
        &self,
        feedback: &Self::LegacyFeedback,
    ) -> Result<Self::Feedback, BridgeError>;

    fn result_to_new(&self, result: &Self::LegacyResult) -> Result<Self::Result, BridgeError>;
}

/// One callback delivered by the legacy client for a submitted goal.
///
/// The legacy layer guarantees `Active` (if delivered) precedes every
/// `Feedback`, and every `Feedback` precedes `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyEvent<F, R> {
    Active,
    Feedback(F),
    /// Terminal status.  `result` is `None` when the legacy server finished
    /// without attaching a result message.
    Done {
        state: LegacyGoalState,
        result: Option<R>,
    },
}

/// Ordered stream of [`LegacyEvent`]s for one submitted goal.
///
/// The stream closing without a [`LegacyEvent::Done`] means the legacy
/// layer lost the goal.
pub type LegacyGoalStream<F, R> = mpsc::UnboundedReceiver<LegacyEvent<F, R>>;

/// Client of an old-protocol action server.
///
/// # Contract
///
/// * At most one submission is outstanding; a new `submit` supersedes the
///   previous one.
/// * `cancel` is best-effort and non-blocking.  It applies to the current
///   submission, and calling it when nothing is outstanding is harmless.
#[async_trait]
pub trait LegacyActionClient: Send + Sync + 'static {
    type Goal: Send + 'static;
    type Feedback: Send + 'static;
    type Result: Send + 'static;

    /// Wait up to `timeout` for the legacy action server to appear.
    async fn wait_for_server(&self, timeout: Duration) -> bool;

    /// Begin one asynchronous execution of `goal`.
    async fn submit(
        &self,
        goal: Self::Goal,
    ) -> Result<LegacyGoalStream<Self::Feedback, Self::Result>, BridgeError>;

    /// Request cancellation of the current execution.
    fn cancel(&self);
}

/// Live handle of one accepted new-protocol goal.
///
/// `succeed`, `abort` and `canceled` are terminal: implementations honour
/// the first terminal call and ignore any later one.
pub trait ServerGoalHandle: Send + Sync + 'static {
    type Goal: Send + Sync + 'static;
    type Feedback: Send + 'static;
    type Result: Send + 'static;

    fn goal_id(&self) -> GoalId;

    fn goal(&self) -> &Self::Goal;

    fn publish_feedback(&self, feedback: Self::Feedback);

    fn succeed(&self, result: Self::Result);

    fn abort(&self, result: Self::Result);

    fn canceled(&self, result: Self::Result);
}

/// Callbacks a new-protocol action server invokes from its dispatch loop.
///
/// All three must return promptly; long-running work belongs on a task
/// spawned from [`handle_accepted`][GoalCallbacks::handle_accepted].
pub trait GoalCallbacks<H: ServerGoalHandle>: Send + Sync + 'static {
    /// Decide whether to accept a goal request.
    fn handle_goal(&self, goal_id: GoalId, goal: &H::Goal) -> GoalResponse;

    /// Decide whether to accept a cancel request for an accepted goal.
    fn handle_cancel(&self, handle: &Arc<H>) -> CancelResponse;

    /// Called once for every goal answered with
    /// [`GoalResponse::AcceptAndExecute`].
    fn handle_accepted(&self, handle: Arc<H>);
}
