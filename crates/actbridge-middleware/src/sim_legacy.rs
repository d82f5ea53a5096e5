//! In-process legacy action client/server pair.
//!
//! [`SimLegacyClient`] implements [`LegacyActionClient`] with the
//! single-slot semantics of the legacy simple action client.  Every goal it
//! submits is delivered to the paired [`SimLegacyServer`] as a [`SimGoal`],
//! through which the server side reports activity, feedback, and the
//! terminal status.
//!
//! The server can be taken offline and brought back with
//! [`SimAvailability`]; while it is offline `wait_for_server` times out and
//! submitted goals queue up until it returns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use actbridge_types::{BridgeError, LegacyGoalState};
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::{LegacyActionClient, LegacyEvent, LegacyGoalStream};

struct SimShared<G, F, R> {
    action_name: String,
    available: Arc<watch::Sender<bool>>,
    goals_tx: mpsc::UnboundedSender<SimGoal<G, F, R>>,
    /// Cancellation token of the most recent submission.
    current: Mutex<Option<CancellationToken>>,
    submissions: AtomicUsize,
    cancels: AtomicUsize,
}

/// Switch that brings the simulated legacy server up or down.
#[derive(Clone)]
pub struct SimAvailability(Arc<watch::Sender<bool>>);

impl SimAvailability {
    pub fn set(&self, up: bool) {
        self.0.send_replace(up);
    }

    pub fn is_up(&self) -> bool {
        *self.0.borrow()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Legacy action client talking to a [`SimLegacyServer`].  Cheap to clone.
pub struct SimLegacyClient<G, F, R> {
    shared: Arc<SimShared<G, F, R>>,
}

impl<G, F, R> Clone for SimLegacyClient<G, F, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<G, F, R> SimLegacyClient<G, F, R> {
    /// Create a connected client/server pair for `action_name`.
    ///
    /// `available` sets whether the server starts online.
    pub fn pair(
        action_name: impl Into<String>,
        available: bool,
    ) -> (SimLegacyClient<G, F, R>, SimLegacyServer<G, F, R>) {
        let (available_tx, available_rx) = watch::channel(available);
        let (goals_tx, goals_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SimShared {
            action_name: action_name.into(),
            available: Arc::new(available_tx),
            goals_tx,
            current: Mutex::new(None),
            submissions: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        });
        let server = SimLegacyServer {
            shared: Arc::clone(&shared),
            goals_rx,
            available: available_rx,
        };
        (SimLegacyClient { shared }, server)
    }

    /// Number of goals submitted so far.
    pub fn submissions(&self) -> usize {
        self.shared.submissions.load(Ordering::SeqCst)
    }

    /// Number of times [`cancel`][LegacyActionClient::cancel] was called.
    pub fn cancels(&self) -> usize {
        self.shared.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<G, F, R> LegacyActionClient for SimLegacyClient<G, F, R>
where
    G: Send + 'static,
    F: Send + 'static,
    R: Send + 'static,
{
    type Goal = G;
    type Feedback = F;
    type Result = R;

    async fn wait_for_server(&self, timeout: Duration) -> bool {
        let mut available = self.shared.available.subscribe();
        matches!(
            tokio::time::timeout(timeout, available.wait_for(|up| *up)).await,
            Ok(Ok(_))
        )
    }

    async fn submit(&self, goal: G) -> Result<LegacyGoalStream<F, R>, BridgeError> {
        let (events, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        self.shared
            .goals_tx
            .send(SimGoal {
                goal,
                events,
                cancel: cancel.clone(),
            })
            .map_err(|_| {
                BridgeError::LegacyUnavailable(format!(
                    "legacy server for {} is gone",
                    self.shared.action_name
                ))
            })?;

        *self
            .shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cancel);
        self.shared.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(events_rx)
    }

    fn cancel(&self) {
        self.shared.cancels.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self
            .shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            token.cancel();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// Server end of the simulated legacy action.
pub struct SimLegacyServer<G, F, R> {
    shared: Arc<SimShared<G, F, R>>,
    goals_rx: mpsc::UnboundedReceiver<SimGoal<G, F, R>>,
    available: watch::Receiver<bool>,
}

impl<G, F, R> SimLegacyServer<G, F, R> {
    pub fn action_name(&self) -> &str {
        &self.shared.action_name
    }

    pub fn availability(&self) -> SimAvailability {
        SimAvailability(Arc::clone(&self.shared.available))
    }

    /// Wait for the next submitted goal.
    ///
    /// Goals are only handed out while the server is online.
    pub async fn accept_goal(&mut self) -> Option<SimGoal<G, F, R>> {
        loop {
            if self.available.wait_for(|up| *up).await.is_err() {
                return None;
            }
            tokio::select! {
                goal = self.goals_rx.recv() => return goal,
                changed = self.available.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

/// One goal as seen by the legacy server.
///
/// Dropping a `SimGoal` without calling [`finish`][SimGoal::finish] closes
/// the client's event stream, which the client side observes as a lost goal.
pub struct SimGoal<G, F, R> {
    goal: G,
    events: mpsc::UnboundedSender<LegacyEvent<F, R>>,
    cancel: CancellationToken,
}

impl<G, F, R> SimGoal<G, F, R> {
    pub fn goal(&self) -> &G {
        &self.goal
    }

    pub fn set_active(&self) {
        self.send(LegacyEvent::Active);
    }

    pub fn publish_feedback(&self, feedback: F) {
        self.send(LegacyEvent::Feedback(feedback));
    }

    /// Report the terminal status and consume the goal.
    pub fn finish(self, state: LegacyGoalState, result: Option<R>) {
        self.send(LegacyEvent::Done { state, result });
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the client has asked to cancel this goal.
    pub async fn cancel_requested(&self) {
        self.cancel.cancelled().await;
    }

    fn send(&self, event: LegacyEvent<F, R>) {
        if self.events.send(event).is_err() {
            debug!("legacy client no longer tracks this goal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Client = SimLegacyClient<u32, u32, u32>;

    #[tokio::test]
    async fn wait_for_server_times_out_while_offline() {
        let (client, server) = Client::pair("fibonacci", false);
        assert!(!client.wait_for_server(Duration::from_millis(20)).await);

        server.availability().set(true);
        assert!(client.wait_for_server(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn submitted_goal_streams_events_in_order() {
        let (client, mut server) = Client::pair("fibonacci", true);
        let mut events = client.submit(5).await.unwrap();

        let goal = server.accept_goal().await.unwrap();
        assert_eq!(*goal.goal(), 5);
        goal.set_active();
        goal.publish_feedback(1);
        goal.publish_feedback(2);
        goal.finish(LegacyGoalState::Succeeded, Some(3));

        assert_eq!(events.recv().await, Some(LegacyEvent::Active));
        assert_eq!(events.recv().await, Some(LegacyEvent::Feedback(1)));
        assert_eq!(events.recv().await, Some(LegacyEvent::Feedback(2)));
        assert_eq!(
            events.recv().await,
            Some(LegacyEvent::Done {
                state: LegacyGoalState::Succeeded,
                result: Some(3)
            })
        );
        assert_eq!(events.recv().await, None);
        assert_eq!(client.submissions(), 1);
    }

    #[tokio::test]
    async fn cancel_reaches_current_goal() {
        let (client, mut server) = Client::pair("fibonacci", true);
        let _events = client.submit(5).await.unwrap();
        let goal = server.accept_goal().await.unwrap();
        assert!(!goal.is_cancel_requested());

        client.cancel();
        tokio::time::timeout(Duration::from_millis(100), goal.cancel_requested())
            .await
            .expect("cancel must reach the server");
        assert_eq!(client.cancels(), 1);
    }

    #[tokio::test]
    async fn cancel_without_submission_is_harmless() {
        let (client, _server) = Client::pair("fibonacci", true);
        client.cancel();
        assert_eq!(client.cancels(), 1);
    }

    #[tokio::test]
    async fn goals_queue_until_server_comes_online() {
        let (client, mut server) = Client::pair("fibonacci", false);
        let availability = server.availability();
        let _events = client.submit(9).await.unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(30), server.accept_goal()).await;
        assert!(pending.is_err(), "offline server must not hand out goals");

        availability.set(true);
        let goal = server.accept_goal().await.unwrap();
        assert_eq!(*goal.goal(), 9);
    }

    #[tokio::test]
    async fn submit_fails_once_server_is_gone() {
        let (client, server) = Client::pair("fibonacci", true);
        drop(server);
        let result = client.submit(1).await;
        assert!(matches!(result, Err(BridgeError::LegacyUnavailable(_))));
        assert_eq!(client.submissions(), 0);
    }

    #[tokio::test]
    async fn dropped_goal_closes_event_stream() {
        let (client, mut server) = Client::pair("fibonacci", true);
        let mut events = client.submit(1).await.unwrap();
        drop(server.accept_goal().await.unwrap());
        assert_eq!(events.recv().await, None);
    }
}
