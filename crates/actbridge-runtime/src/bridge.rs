//! [`ActionBridge`] – serves a new-protocol action on behalf of a legacy
//! action server.
//!
//! # Goal lifecycle
//!
//! ```text
//! IDLE ──handle_goal──▶ ACCEPTED ──handle_accepted──▶ EXECUTING ──legacy done──▶ IDLE
//!   ▲                                                      │
//!   └────────────── succeed / abort / canceled ◀───────────┘
//! ```
//!
//! 1. **Admission** – [`handle_goal`][GoalCallbacks::handle_goal] reserves
//!    the single goal slot.  While the slot is taken every further request is
//!    rejected; goals are never queued.
//! 2. **Execution** – [`handle_accepted`][GoalCallbacks::handle_accepted]
//!    stores the goal handle and spawns a tracked task that translates the
//!    goal, submits it to the legacy client, and relays its events.  The
//!    callback itself returns immediately.
//! 3. **Cancellation** – [`handle_cancel`][GoalCallbacks::handle_cancel]
//!    forwards `cancel()` to the legacy client and always accepts.  The
//!    legacy server decides the final outcome.  A cancel that arrives before
//!    the legacy submission is forwarded right after it; a cancel for a goal
//!    that is no longer active does nothing.
//! 4. **Feedback** – every legacy feedback message is translated and
//!    published on the goal handle, in order, without buffering.
//! 5. **Resolution** – the legacy terminal status is mapped with
//!    [`TerminalOutcome::from_legacy`], exactly one terminal call is made on
//!    the handle, and the slot returns to idle.  Translation failures, a lost
//!    legacy stream, watchdog expiry and shutdown all resolve to `abort` with
//!    a default result.
//!
//! The slot is guarded by one mutex.  Terminal calls on the goal handle are
//! made while it is held, so a handle must not call back into the bridge
//! from `succeed` / `abort` / `canceled`.

use std::future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use actbridge_middleware::{
    EventBus, GoalCallbacks, LegacyActionClient, LegacyEvent, LegacyGoalStream,
    PayloadTranslator, ServerGoalHandle, Topic,
};
use actbridge_types::{
    BridgeState, CancelResponse, Event, EventPayload, GoalId, GoalResponse, LegacyGoalState,
    TerminalOutcome,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// How long the startup probe waits for the legacy action server.
pub const DEFAULT_SERVER_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`ActionBridge`].
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Action name shared by the new-protocol server and the legacy client
    /// target.
    pub action_name: String,
    /// Bounded wait of the startup probe.
    pub server_probe_timeout: Duration,
    /// Upper bound on one goal's execution.  `None` waits for the legacy
    /// server indefinitely.
    pub goal_timeout: Option<Duration>,
}

impl BridgeConfig {
    pub fn new(action_name: impl Into<String>) -> Self {
        Self {
            action_name: action_name.into(),
            server_probe_timeout: DEFAULT_SERVER_PROBE_TIMEOUT,
            goal_timeout: None,
        }
    }

    /// Node name used on both middleware sides, e.g.
    /// `reverse_action_bridge_arm_move` for `arm/move`.
    pub fn node_name(&self) -> String {
        format!("reverse_action_bridge_{}", self.action_name).replace('/', "_")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Goal slot
// ─────────────────────────────────────────────────────────────────────────────

enum GoalSlot<H> {
    Idle,
    Active(ActiveGoal<H>),
}

struct ActiveGoal<H> {
    goal_id: GoalId,
    /// Stored when execution starts; taken by the terminal call.
    handle: Option<Arc<H>>,
    /// The legacy client has returned from `submit`.
    submitted: bool,
    cancel_requested: bool,
}

impl<H> ActiveGoal<H> {
    fn new(goal_id: GoalId, handle: Option<Arc<H>>) -> Self {
        Self {
            goal_id,
            handle,
            submitted: false,
            cancel_requested: false,
        }
    }
}

/// How a goal ends.
struct Resolution<R> {
    outcome: TerminalOutcome,
    legacy_state: Option<LegacyGoalState>,
    result: R,
}

impl<R: Default> Resolution<R> {
    /// Abort with a default result, used whenever no legacy status applies.
    fn fail_safe() -> Self {
        Self {
            outcome: TerminalOutcome::Aborted,
            legacy_state: None,
            result: R::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionBridge
// ─────────────────────────────────────────────────────────────────────────────

/// Relays goals from a new-protocol action server to a legacy action client.
///
/// Cheap to clone; all clones share the same goal slot.  Register a clone as
/// the [`GoalCallbacks`] of the new-protocol server.
pub struct ActionBridge<T, C, H> {
    inner: Arc<Inner<T, C, H>>,
}

impl<T, C, H> Clone for ActionBridge<T, C, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T, C, H> {
    config: BridgeConfig,
    source: String,
    translator: T,
    client: C,
    bus: Arc<EventBus>,
    slot: Mutex<GoalSlot<H>>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl<T, C, H> ActionBridge<T, C, H>
where
    T: PayloadTranslator,
    C: LegacyActionClient<Goal = T::LegacyGoal, Feedback = T::LegacyFeedback, Result = T::LegacyResult>,
    H: ServerGoalHandle<Goal = T::Goal, Feedback = T::Feedback, Result = T::Result>,
{
    /// Build a bridge without probing the legacy server.
    pub fn new(config: BridgeConfig, translator: T, client: C, bus: Arc<EventBus>) -> Self {
        let source = format!("actbridge-runtime::bridge/{}", config.action_name);
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                translator,
                client,
                bus,
                slot: Mutex::new(GoalSlot::Idle),
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Build a bridge and run the startup probe.
    ///
    /// The bridge is returned whether or not the legacy server was found.
    pub async fn start(config: BridgeConfig, translator: T, client: C, bus: Arc<EventBus>) -> Self {
        let bridge = Self::new(config, translator, client, bus);
        bridge.probe_legacy_server().await;
        bridge
    }

    /// Look for the legacy action server for at most
    /// [`BridgeConfig::server_probe_timeout`].
    ///
    /// Purely advisory: admission never depends on the outcome.
    pub async fn probe_legacy_server(&self) -> bool {
        let inner = &self.inner;
        let action = inner.config.action_name.as_str();
        info!(action, "Looking for a legacy action server");

        if inner.client.wait_for_server(inner.config.server_probe_timeout).await {
            info!(action, "legacy action server found");
            return true;
        }

        warn!(
            action,
            timeout_ms = whole_millis(inner.config.server_probe_timeout),
            "legacy action server not started yet"
        );
        inner.publish(
            Topic::Diagnostics,
            EventPayload::LegacyServerUnavailable {
                action_name: action.to_string(),
            },
        );
        false
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Current state of the goal slot.
    pub fn state(&self) -> BridgeState {
        match &*self.inner.lock_slot() {
            GoalSlot::Idle => BridgeState::Idle,
            GoalSlot::Active(active) if active.handle.is_none() => BridgeState::Accepted,
            GoalSlot::Active(_) => BridgeState::Executing,
        }
    }

    /// Id of the goal occupying the slot, if any.
    pub fn active_goal(&self) -> Option<GoalId> {
        match &*self.inner.lock_slot() {
            GoalSlot::Idle => None,
            GoalSlot::Active(active) => Some(active.goal_id),
        }
    }

    /// Stop admitting goals, abort the active one, and wait for every
    /// execution task to finish.
    pub async fn shutdown(&self) {
        info!(action = %self.inner.config.action_name, "bridge shutting down");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }
}

impl<T, C, H> GoalCallbacks<H> for ActionBridge<T, C, H>
where
    T: PayloadTranslator,
    C: LegacyActionClient<Goal = T::LegacyGoal, Feedback = T::LegacyFeedback, Result = T::LegacyResult>,
    H: ServerGoalHandle<Goal = T::Goal, Feedback = T::Feedback, Result = T::Result>,
{
    fn handle_goal(&self, goal_id: GoalId, _goal: &H::Goal) -> GoalResponse {
        let inner = &self.inner;
        inner.publish(Topic::Lifecycle, EventPayload::GoalReceived { goal_id });

        if inner.shutdown.is_cancelled() {
            return inner.reject(goal_id, "bridge is shutting down");
        }

        let occupied_by = {
            let mut slot = inner.lock_slot();
            let occupied_by = match &*slot {
                GoalSlot::Active(active) => Some(active.goal_id),
                GoalSlot::Idle => None,
            };
            if occupied_by.is_none() {
                *slot = GoalSlot::Active(ActiveGoal::new(goal_id, None));
            }
            occupied_by
        };

        if let Some(active_goal) = occupied_by {
            warn!(
                action = %inner.config.action_name,
                %goal_id,
                %active_goal,
                "Already have an action goal, and only one goal is handled at a time: rejecting"
            );
            return inner.reject(goal_id, "another goal is active");
        }

        info!(action = %inner.config.action_name, %goal_id, "goal accepted");
        GoalResponse::AcceptAndExecute
    }

    fn handle_cancel(&self, handle: &Arc<H>) -> CancelResponse {
        let inner = &self.inner;
        let goal_id = handle.goal_id();

        let forwarded = {
            let mut slot = inner.lock_slot();
            match &mut *slot {
                GoalSlot::Active(active) if active.goal_id == goal_id => {
                    active.cancel_requested = true;
                    if active.submitted {
                        inner.client.cancel();
                    }
                    active.submitted
                }
                _ => {
                    debug!(%goal_id, "cancel for a goal that is no longer active; ignoring");
                    return CancelResponse::Accept;
                }
            }
        };

        if forwarded {
            info!(%goal_id, "cancel forwarded to legacy action server");
            inner.publish(Topic::Lifecycle, EventPayload::CancelForwarded { goal_id });
        } else {
            info!(%goal_id, "cancel deferred until the goal reaches the legacy action server");
        }
        CancelResponse::Accept
    }

    fn handle_accepted(&self, handle: Arc<H>) {
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.spawn(async move {
            inner.execute(handle).await;
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution
// ─────────────────────────────────────────────────────────────────────────────

impl<T, C, H> Inner<T, C, H>
where
    T: PayloadTranslator,
    C: LegacyActionClient<Goal = T::LegacyGoal, Feedback = T::LegacyFeedback, Result = T::LegacyResult>,
    H: ServerGoalHandle<Goal = T::Goal, Feedback = T::Feedback, Result = T::Result>,
{
    fn lock_slot(&self) -> MutexGuard<'_, GoalSlot<H>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, topic: Topic, payload: EventPayload) {
        // Nobody listening is a normal condition.
        let _ = self.bus.publish_to(topic, Event::new(self.source.clone(), payload));
    }

    fn reject(&self, goal_id: GoalId, reason: &str) -> GoalResponse {
        self.publish(
            Topic::Lifecycle,
            EventPayload::GoalRejected {
                goal_id,
                reason: reason.to_string(),
            },
        );
        GoalResponse::Reject
    }

    async fn execute(&self, handle: Arc<H>) {
        let goal_id = handle.goal_id();
        if !self.begin_execution(&handle) {
            return;
        }

        info!(action = %self.config.action_name, %goal_id, "Sending goal");
        let mut fail_safe = FailSafeGuard {
            inner: self,
            goal_id,
            armed: true,
        };
        let resolution = self.run(&handle).await;
        fail_safe.armed = false;
        self.resolve(goal_id, resolution);
    }

    /// ACCEPTED → EXECUTING: store the handle in the slot.
    fn begin_execution(&self, handle: &Arc<H>) -> bool {
        let goal_id = handle.goal_id();
        let active_goal = {
            let mut slot = self.lock_slot();
            match &mut *slot {
                GoalSlot::Active(active) if active.goal_id == goal_id => {
                    if active.handle.is_some() {
                        warn!(%goal_id, "goal accepted twice; ignoring the duplicate");
                        return false;
                    }
                    active.handle = Some(Arc::clone(handle));
                    return true;
                }
                GoalSlot::Active(active) => active.goal_id,
                GoalSlot::Idle => {
                    warn!(%goal_id, "goal accepted without admission; claiming the idle slot");
                    *slot = GoalSlot::Active(ActiveGoal::new(goal_id, Some(Arc::clone(handle))));
                    return true;
                }
            }
        };

        error!(
            %goal_id,
            %active_goal,
            "goal accepted while another goal is active; aborting it"
        );
        handle.abort(T::Result::default());
        self.publish(
            Topic::Lifecycle,
            EventPayload::GoalTerminated {
                goal_id,
                legacy_state: None,
                outcome: TerminalOutcome::Aborted,
            },
        );
        false
    }

    async fn run(&self, handle: &Arc<H>) -> Resolution<T::Result> {
        let goal_id = handle.goal_id();

        let legacy_goal = match self.translator.goal_to_legacy(handle.goal()) {
            Ok(goal) => goal,
            Err(e) => {
                warn!(%goal_id, error = %e, "goal translation failed; aborting");
                return Resolution::fail_safe();
            }
        };

        if self.shutdown.is_cancelled() {
            return Resolution::fail_safe();
        }

        let events = match self.client.submit(legacy_goal).await {
            Ok(events) => events,
            Err(e) => {
                warn!(%goal_id, error = %e, "legacy submission failed; aborting");
                return Resolution::fail_safe();
            }
        };
        self.publish(Topic::Lifecycle, EventPayload::GoalSubmitted { goal_id });
        self.mark_submitted(goal_id);

        self.relay(handle, events).await
    }

    /// Record the submission and forward a cancel that arrived before it.
    fn mark_submitted(&self, goal_id: GoalId) {
        let forwarded = {
            let mut slot = self.lock_slot();
            match &mut *slot {
                GoalSlot::Active(active) if active.goal_id == goal_id => {
                    active.submitted = true;
                    if active.cancel_requested {
                        self.client.cancel();
                    }
                    active.cancel_requested
                }
                _ => false,
            }
        };
        if forwarded {
            info!(%goal_id, "deferred cancel forwarded to legacy action server");
            self.publish(Topic::Lifecycle, EventPayload::CancelForwarded { goal_id });
        }
    }

    async fn relay(
        &self,
        handle: &Arc<H>,
        mut events: LegacyGoalStream<T::LegacyFeedback, T::LegacyResult>,
    ) -> Resolution<T::Result> {
        let goal_id = handle.goal_id();
        // A timeout too large to represent as an instant never expires.
        let deadline = self
            .config
            .goal_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let mut sequence = 0u64;

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    warn!(%goal_id, "bridge shutting down; cancelling legacy goal");
                    self.client.cancel();
                    return Resolution::fail_safe();
                }
                _ = expire(deadline) => {
                    warn!(
                        %goal_id,
                        timeout_ms = self.config.goal_timeout.map_or(0, whole_millis),
                        "legacy action server did not finish the goal in time; cancelling and aborting"
                    );
                    self.client.cancel();
                    self.publish(Topic::Lifecycle, EventPayload::CancelForwarded { goal_id });
                    return Resolution::fail_safe();
                }
                event = events.recv() => event,
            };

            match event {
                Some(LegacyEvent::Active) => {
                    debug!(%goal_id, "Goal is active");
                    self.publish(Topic::Lifecycle, EventPayload::LegacyActive { goal_id });
                }
                Some(LegacyEvent::Feedback(feedback)) => {
                    match self.translator.feedback_to_new(&feedback) {
                        Ok(feedback) => {
                            handle.publish_feedback(feedback);
                            sequence += 1;
                            debug!(%goal_id, sequence, "feedback relayed");
                            self.publish(
                                Topic::Feedback,
                                EventPayload::FeedbackRelayed { goal_id, sequence },
                            );
                        }
                        Err(e) => {
                            warn!(%goal_id, error = %e, "dropping feedback that failed translation");
                        }
                    }
                }
                Some(LegacyEvent::Done { state, result }) => {
                    return self.conclude(goal_id, state, result);
                }
                None => {
                    warn!(%goal_id, "legacy client lost the goal without a terminal status; aborting");
                    return Resolution::fail_safe();
                }
            }
        }
    }

    fn conclude(
        &self,
        goal_id: GoalId,
        state: LegacyGoalState,
        result: Option<T::LegacyResult>,
    ) -> Resolution<T::Result> {
        let result = match result {
            Some(result) => match self.translator.result_to_new(&result) {
                Ok(result) => result,
                Err(e) => {
                    warn!(%goal_id, legacy_state = %state, error = %e, "result translation failed; aborting");
                    return Resolution {
                        outcome: TerminalOutcome::Aborted,
                        legacy_state: Some(state),
                        result: T::Result::default(),
                    };
                }
            },
            None => {
                debug!(%goal_id, legacy_state = %state, "legacy server sent no result; using default");
                T::Result::default()
            }
        };

        Resolution {
            outcome: TerminalOutcome::from_legacy(state),
            legacy_state: Some(state),
            result,
        }
    }

    /// EXECUTING → terminal → IDLE.
    fn resolve(&self, goal_id: GoalId, resolution: Resolution<T::Result>) {
        let Resolution {
            outcome,
            legacy_state,
            result,
        } = resolution;

        {
            let mut slot = self.lock_slot();
            let handle = match &mut *slot {
                GoalSlot::Active(active) if active.goal_id == goal_id => active.handle.take(),
                _ => None,
            };
            let Some(handle) = handle else {
                error!(%goal_id, "terminal status for a goal that does not own the slot");
                return;
            };

            *slot = GoalSlot::Idle;
            match outcome {
                TerminalOutcome::Succeeded => handle.succeed(result),
                TerminalOutcome::Aborted => handle.abort(result),
                TerminalOutcome::Canceled => handle.canceled(result),
            }
        }

        match legacy_state {
            Some(state) => info!(%goal_id, legacy_state = %state, %outcome, "Goal is done"),
            None => info!(%goal_id, %outcome, "Goal is done without a legacy status"),
        }
        self.publish(
            Topic::Lifecycle,
            EventPayload::GoalTerminated {
                goal_id,
                legacy_state,
                outcome,
            },
        );
    }
}

/// Aborts the goal if its execution task unwinds or is dropped before
/// reaching a terminal status.
struct FailSafeGuard<'a, T, C, H>
where
    T: PayloadTranslator,
    C: LegacyActionClient<Goal = T::LegacyGoal, Feedback = T::LegacyFeedback, Result = T::LegacyResult>,
    H: ServerGoalHandle<Goal = T::Goal, Feedback = T::Feedback, Result = T::Result>,
{
    inner: &'a Inner<T, C, H>,
    goal_id: GoalId,
    armed: bool,
}

impl<T, C, H> Drop for FailSafeGuard<'_, T, C, H>
where
    T: PayloadTranslator,
    C: LegacyActionClient<Goal = T::LegacyGoal, Feedback = T::LegacyFeedback, Result = T::LegacyResult>,
    H: ServerGoalHandle<Goal = T::Goal, Feedback = T::Feedback, Result = T::Result>,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        error!(goal_id = %self.goal_id, "goal execution ended without a terminal status; aborting");
        self.inner.resolve(self.goal_id, Resolution::fail_safe());
    }
}

fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
