//! In-process new-protocol action server.
//!
//! [`LocalActionServer`] owns a callback-dispatch loop running on its own
//! Tokio task.  Remote clients talk to it through [`LocalActionClient`]; each
//! request is delivered to the registered [`GoalCallbacks`] one at a time, in
//! arrival order, exactly like a middleware executor spinning an action
//! server.
//!
//! Accepted goals are represented by a [`LocalGoalHandle`], which implements
//! [`ServerGoalHandle`] by forwarding feedback and the terminal result back
//! to the [`LocalClientGoal`] held by the requesting client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use actbridge_types::{BridgeError, CancelResponse, GoalId, GoalResponse, TerminalOutcome};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapter::{GoalCallbacks, ServerGoalHandle};

/// Terminal outcome plus result payload as seen by the remote client.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalResult<R> {
    pub outcome: TerminalOutcome,
    pub result: R,
}

// ─────────────────────────────────────────────────────────────────────────────
// Goal handle
// ─────────────────────────────────────────────────────────────────────────────

/// Server-side handle of one accepted goal.
pub struct LocalGoalHandle<G, F, R> {
    goal_id: GoalId,
    goal: G,
    feedback_tx: Mutex<Option<mpsc::UnboundedSender<F>>>,
    result_tx: Mutex<Option<oneshot::Sender<GoalResult<R>>>>,
}

impl<G, F, R> LocalGoalHandle<G, F, R> {
    fn new(
        goal_id: GoalId,
        goal: G,
        feedback_tx: mpsc::UnboundedSender<F>,
        result_tx: oneshot::Sender<GoalResult<R>>,
    ) -> Self {
        Self {
            goal_id,
            goal,
            feedback_tx: Mutex::new(Some(feedback_tx)),
            result_tx: Mutex::new(Some(result_tx)),
        }
    }

    /// `true` once one of the terminal calls has been made.
    pub fn is_terminal(&self) -> bool {
        self.result_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn resolve(&self, outcome: TerminalOutcome, result: R) {
        let Some(result_tx) = self
            .result_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            warn!(goal_id = %self.goal_id, %outcome, "goal already terminal; ignoring");
            return;
        };
        // Closing the feedback channel tells the client no more feedback follows.
        self.feedback_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if result_tx.send(GoalResult { outcome, result }).is_err() {
            debug!(goal_id = %self.goal_id, "client dropped result receiver");
        }
    }
}

impl<G, F, R> ServerGoalHandle for LocalGoalHandle<G, F, R>
where
    G: Send + Sync + 'static,
    F: Send + 'static,
    R: Send + 'static,
{
    type Goal = G;
    type Feedback = F;
    type Result = R;

    fn goal_id(&self) -> GoalId {
        self.goal_id
    }

    fn goal(&self) -> &G {
        &self.goal
    }

    fn publish_feedback(&self, feedback: F) {
        let guard = self
            .feedback_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(feedback).is_err() {
                    debug!(goal_id = %self.goal_id, "client dropped feedback receiver");
                }
            }
            None => warn!(goal_id = %self.goal_id, "feedback after terminal state dropped"),
        }
    }

    fn succeed(&self, result: R) {
        self.resolve(TerminalOutcome::Succeeded, result);
    }

    fn abort(&self, result: R) {
        self.resolve(TerminalOutcome::Aborted, result);
    }

    fn canceled(&self, result: R) {
        self.resolve(TerminalOutcome::Canceled, result);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client side
// ─────────────────────────────────────────────────────────────────────────────

/// Client-side view of an accepted goal.
pub struct LocalClientGoal<F, R> {
    goal_id: GoalId,
    feedback_rx: mpsc::UnboundedReceiver<F>,
    result_rx: oneshot::Receiver<GoalResult<R>>,
}

impl<F, R> LocalClientGoal<F, R> {
    pub fn goal_id(&self) -> GoalId {
        self.goal_id
    }

    /// Next feedback message, or `None` once the goal is terminal and all
    /// feedback has been drained.
    pub async fn next_feedback(&mut self) -> Option<F> {
        self.feedback_rx.recv().await
    }

    /// Wait for the terminal result.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ServerClosed`] when the goal handle was dropped
    /// without ever reaching a terminal state.
    pub async fn result(self) -> Result<GoalResult<R>, BridgeError> {
        self.result_rx.await.map_err(|_| {
            BridgeError::ServerClosed(format!("goal {} dropped without a result", self.goal_id))
        })
    }

    /// Split into the raw feedback and result receivers.
    pub fn into_parts(
        self,
    ) -> (
        GoalId,
        mpsc::UnboundedReceiver<F>,
        oneshot::Receiver<GoalResult<R>>,
    ) {
        (self.goal_id, self.feedback_rx, self.result_rx)
    }
}

enum Request<G, F, R> {
    SendGoal {
        goal: G,
        reply: oneshot::Sender<Option<LocalClientGoal<F, R>>>,
    },
    CancelGoal {
        goal_id: GoalId,
        reply: oneshot::Sender<CancelResponse>,
    },
}

/// Remote client of a [`LocalActionServer`].  Cheap to clone.
pub struct LocalActionClient<G, F, R> {
    action_name: Arc<str>,
    requests: mpsc::UnboundedSender<Request<G, F, R>>,
}

impl<G, F, R> Clone for LocalActionClient<G, F, R> {
    fn clone(&self) -> Self {
        Self {
            action_name: Arc::clone(&self.action_name),
            requests: self.requests.clone(),
        }
    }
}

impl<G, F, R> LocalActionClient<G, F, R> {
    /// Send a goal request.  Returns `None` when the server rejected it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ServerClosed`] when the dispatch loop is gone.
    pub async fn send_goal(&self, goal: G) -> Result<Option<LocalClientGoal<F, R>>, BridgeError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::SendGoal { goal, reply })
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())
    }

    /// Ask the server to cancel `goal_id`.
    ///
    /// Unknown or already finished goals are answered with
    /// [`CancelResponse::Reject`].
    pub async fn cancel_goal(&self, goal_id: GoalId) -> Result<CancelResponse, BridgeError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::CancelGoal { goal_id, reply })
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())
    }

    fn closed(&self) -> BridgeError {
        BridgeError::ServerClosed(self.action_name.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// In-process new-protocol action server.
///
/// Dropping the server stops its dispatch loop.
pub struct LocalActionServer<G, F, R> {
    action_name: Arc<str>,
    requests: mpsc::UnboundedSender<Request<G, F, R>>,
    dispatch: JoinHandle<()>,
}

impl<G, F, R> LocalActionServer<G, F, R>
where
    G: Send + Sync + 'static,
    F: Send + 'static,
    R: Send + 'static,
{
    /// Start serving `action_name`, delivering requests to `callbacks`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        action_name: impl Into<String>,
        callbacks: Arc<dyn GoalCallbacks<LocalGoalHandle<G, F, R>>>,
    ) -> Self {
        let action_name: Arc<str> = Arc::from(action_name.into());
        let (requests, rx) = mpsc::unbounded_channel();
        let dispatch = tokio::spawn(dispatch_loop(Arc::clone(&action_name), callbacks, rx));
        Self {
            action_name,
            requests,
            dispatch,
        }
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    /// A client connected to this server.
    pub fn client(&self) -> LocalActionClient<G, F, R> {
        LocalActionClient {
            action_name: Arc::clone(&self.action_name),
            requests: self.requests.clone(),
        }
    }
}

impl<G, F, R> Drop for LocalActionServer<G, F, R> {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}

async fn dispatch_loop<G, F, R>(
    action_name: Arc<str>,
    callbacks: Arc<dyn GoalCallbacks<LocalGoalHandle<G, F, R>>>,
    mut rx: mpsc::UnboundedReceiver<Request<G, F, R>>,
) where
    G: Send + Sync + 'static,
    F: Send + 'static,
    R: Send + 'static,
{
    let mut goals: HashMap<GoalId, Arc<LocalGoalHandle<G, F, R>>> = HashMap::new();

    while let Some(request) = rx.recv().await {
        goals.retain(|_, handle| !handle.is_terminal());

        match request {
            Request::SendGoal { goal, reply } => {
                let goal_id = Uuid::new_v4();
                match callbacks.handle_goal(goal_id, &goal) {
                    GoalResponse::Reject => {
                        debug!(action = %action_name, %goal_id, "goal rejected");
                        let _ = reply.send(None);
                    }
                    GoalResponse::AcceptAndExecute => {
                        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
                        let (result_tx, result_rx) = oneshot::channel();
                        let handle = Arc::new(LocalGoalHandle::new(
                            goal_id,
                            goal,
                            feedback_tx,
                            result_tx,
                        ));
                        goals.insert(goal_id, Arc::clone(&handle));
                        callbacks.handle_accepted(handle);
                        let _ = reply.send(Some(LocalClientGoal {
                            goal_id,
                            feedback_rx,
                            result_rx,
                        }));
                    }
                }
            }
            Request::CancelGoal { goal_id, reply } => {
                let response = match goals.get(&goal_id) {
                    Some(handle) => callbacks.handle_cancel(handle),
                    None => {
                        debug!(action = %action_name, %goal_id, "cancel for unknown goal");
                        CancelResponse::Reject
                    }
                };
                let _ = reply.send(response);
            }
        }
    }

    debug!(action = %action_name, "dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    type Handle = LocalGoalHandle<u32, u32, String>;

    /// Accepts goals unless `reject` is set; finishes each accepted goal by
    /// echoing it back as feedback and result.
    #[derive(Default)]
    struct EchoCallbacks {
        reject: AtomicBool,
        cancels: AtomicUsize,
        hold: AtomicBool,
        held: Mutex<Vec<Arc<Handle>>>,
    }

    impl GoalCallbacks<Handle> for EchoCallbacks {
        fn handle_goal(&self, _goal_id: GoalId, _goal: &u32) -> GoalResponse {
            if self.reject.load(Ordering::SeqCst) {
                GoalResponse::Reject
            } else {
                GoalResponse::AcceptAndExecute
            }
        }

        fn handle_cancel(&self, handle: &Arc<Handle>) -> CancelResponse {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            handle.canceled("canceled".to_string());
            CancelResponse::Accept
        }

        fn handle_accepted(&self, handle: Arc<Handle>) {
            if self.hold.load(Ordering::SeqCst) {
                self.held.lock().unwrap().push(handle);
                return;
            }
            let goal = *handle.goal();
            handle.publish_feedback(goal);
            handle.publish_feedback(goal + 1);
            handle.succeed(format!("done {goal}"));
        }
    }

    fn make_server(callbacks: Arc<EchoCallbacks>) -> LocalActionServer<u32, u32, String> {
        LocalActionServer::new("echo", callbacks)
    }

    #[tokio::test]
    async fn accepted_goal_streams_feedback_then_result() {
        let server = make_server(Arc::new(EchoCallbacks::default()));
        let client = server.client();

        let mut goal = client.send_goal(7).await.unwrap().expect("accepted");
        assert_eq!(goal.next_feedback().await, Some(7));
        assert_eq!(goal.next_feedback().await, Some(8));
        assert_eq!(goal.next_feedback().await, None);

        let result = goal.result().await.unwrap();
        assert_eq!(result.outcome, TerminalOutcome::Succeeded);
        assert_eq!(result.result, "done 7");
    }

    #[tokio::test]
    async fn rejected_goal_returns_none() {
        let callbacks = Arc::new(EchoCallbacks::default());
        callbacks.reject.store(true, Ordering::SeqCst);
        let server = make_server(callbacks);

        assert!(server.client().send_goal(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_terminal_call_is_ignored() {
        let callbacks = Arc::new(EchoCallbacks::default());
        callbacks.hold.store(true, Ordering::SeqCst);
        let server = make_server(Arc::clone(&callbacks));

        let goal = server.client().send_goal(3).await.unwrap().unwrap();
        let handle = callbacks.held.lock().unwrap().pop().unwrap();
        handle.abort("first".to_string());
        handle.succeed("second".to_string());
        assert!(handle.is_terminal());

        let result = goal.result().await.unwrap();
        assert_eq!(result.outcome, TerminalOutcome::Aborted);
        assert_eq!(result.result, "first");
    }

    #[tokio::test]
    async fn cancel_reaches_callbacks_for_live_goal_only() {
        let callbacks = Arc::new(EchoCallbacks::default());
        callbacks.hold.store(true, Ordering::SeqCst);
        let server = make_server(Arc::clone(&callbacks));
        let client = server.client();

        let goal = client.send_goal(3).await.unwrap().unwrap();
        let goal_id = goal.goal_id();
        assert_eq!(client.cancel_goal(goal_id).await.unwrap(), CancelResponse::Accept);
        assert_eq!(goal.result().await.unwrap().outcome, TerminalOutcome::Canceled);

        // The goal is terminal now, so the server no longer knows it.
        assert_eq!(client.cancel_goal(goal_id).await.unwrap(), CancelResponse::Reject);
        assert_eq!(client.cancel_goal(Uuid::new_v4()).await.unwrap(), CancelResponse::Reject);
        assert_eq!(callbacks.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_server_closes_clients() {
        let server = make_server(Arc::new(EchoCallbacks::default()));
        let client = server.client();
        drop(server);
        tokio::task::yield_now().await;

        let result = client.send_goal(1).await;
        assert!(matches!(result, Err(BridgeError::ServerClosed(_))));
    }
}
