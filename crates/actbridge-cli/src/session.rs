//! One running bridge: new-protocol server, bridge, simulated legacy server.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use actbridge_middleware::{
    BridgeMonitor, EventBus, LocalActionClient, LocalActionServer, LocalClientGoal,
    LocalGoalHandle, SimAvailability, SimLegacyClient,
};
use actbridge_runtime::ActionBridge;
use actbridge_types::{BridgeError, BridgeState, CancelResponse, GoalId};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::CliConfig;
use crate::fibonacci::{
    FibonacciFeedback, FibonacciGoal, FibonacciResult, FibonacciTranslator, LegacyFibonacciFeedback,
    LegacyFibonacciGoal, LegacyFibonacciResult, run_sim_server,
};

type Handle = LocalGoalHandle<FibonacciGoal, FibonacciFeedback, FibonacciResult>;
type Legacy = SimLegacyClient<LegacyFibonacciGoal, LegacyFibonacciFeedback, LegacyFibonacciResult>;
type Bridge = ActionBridge<FibonacciTranslator, Legacy, Handle>;

pub type ClientGoal = LocalClientGoal<FibonacciFeedback, FibonacciResult>;

/// Snapshot for `/status`.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub node_name: String,
    pub state: BridgeState,
    pub active_goal: Option<GoalId>,
    pub legacy_online: bool,
    pub submissions: usize,
    pub cancels: usize,
}

pub struct Session {
    bridge: Bridge,
    // Dropping the server stops its dispatch loop.
    _server: LocalActionServer<FibonacciGoal, FibonacciFeedback, FibonacciResult>,
    client: LocalActionClient<FibonacciGoal, FibonacciFeedback, FibonacciResult>,
    legacy: Legacy,
    availability: SimAvailability,
    last_goal: Mutex<Option<GoalId>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Wire everything up and run the startup probe.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(
        action_name: &str,
        cfg: &CliConfig,
        legacy_online: bool,
        monitor: Option<SocketAddr>,
    ) -> Self {
        let bus = Arc::new(EventBus::new(cfg.event_bus_capacity()));
        let mut tasks = Vec::new();

        if let Some(addr) = monitor {
            let monitor = BridgeMonitor::new(Arc::clone(&bus));
            tasks.push(tokio::spawn(async move {
                if let Err(e) = monitor.run_ws_server(addr).await {
                    error!(error = %e, "bridge monitor stopped");
                }
            }));
        }

        let (legacy, legacy_server) = Legacy::pair(action_name, legacy_online);
        let availability = legacy_server.availability();
        tasks.push(tokio::spawn(run_sim_server(legacy_server, cfg.demo_step())));

        let bridge = Bridge::start(
            cfg.bridge_config(action_name),
            FibonacciTranslator,
            legacy.clone(),
            bus,
        )
        .await;
        info!(node = %bridge.config().node_name(), "bridge ready");

        let server = LocalActionServer::new(action_name, Arc::new(bridge.clone()));
        let client = server.client();

        Self {
            bridge,
            _server: server,
            client,
            legacy,
            availability,
            last_goal: Mutex::new(None),
            tasks,
        }
    }

    /// Send a goal as a new-protocol client.  `None` means it was rejected.
    pub async fn send_goal(&self, order: i32) -> Result<Option<ClientGoal>, BridgeError> {
        let goal = self.client.send_goal(FibonacciGoal { order }).await?;
        if let Some(goal) = &goal {
            *self
                .last_goal
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(goal.goal_id());
        }
        Ok(goal)
    }

    /// Cancel the most recently accepted goal, if any.
    pub async fn cancel_last(&self) -> Result<Option<(GoalId, CancelResponse)>, BridgeError> {
        let last = *self
            .last_goal
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(goal_id) = last else {
            return Ok(None);
        };
        let response = self.client.cancel_goal(goal_id).await?;
        Ok(Some((goal_id, response)))
    }

    pub fn set_legacy_online(&self, online: bool) {
        self.availability.set(online);
    }

    pub fn status(&self) -> Status {
        Status {
            node_name: self.bridge.config().node_name(),
            state: self.bridge.state(),
            active_goal: self.bridge.active_goal(),
            legacy_online: self.availability.is_up(),
            submissions: self.legacy.submissions(),
            cancels: self.legacy.cancels(),
        }
    }

    /// Abort the active goal and stop background tasks.
    pub async fn shutdown(&self) {
        self.bridge.shutdown().await;
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actbridge_types::TerminalOutcome;
    use std::time::Duration;

    fn fast_config() -> CliConfig {
        CliConfig {
            server_probe_timeout_ms: 20,
            demo_step_ms: 1,
            ..CliConfig::default()
        }
    }

    async fn finish(goal: ClientGoal) -> (Vec<FibonacciFeedback>, TerminalOutcome, FibonacciResult) {
        let (_, mut feedback_rx, result_rx) = goal.into_parts();
        let mut feedback = Vec::new();
        while let Some(f) = feedback_rx.recv().await {
            feedback.push(f);
        }
        let result = tokio::time::timeout(Duration::from_secs(5), result_rx)
            .await
            .expect("goal must finish")
            .expect("server dropped the goal");
        (feedback, result.outcome, result.result)
    }

    #[tokio::test]
    async fn fibonacci_goal_runs_end_to_end() {
        let session = Session::start("fibonacci", &fast_config(), true, None).await;
        let goal = session.send_goal(5).await.unwrap().expect("accepted");

        let (feedback, outcome, result) = finish(goal).await;
        assert_eq!(outcome, TerminalOutcome::Succeeded);
        assert_eq!(result.sequence, vec![0, 1, 1, 2, 3, 5]);
        assert_eq!(feedback.len(), 4);
        assert_eq!(feedback[0].partial_sequence, vec![0, 1, 1]);

        let status = session.status();
        assert_eq!(status.node_name, "reverse_action_bridge_fibonacci");
        assert_eq!(status.state, BridgeState::Idle);
        assert_eq!(status.submissions, 1);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn legacy_rejection_surfaces_as_canceled() {
        let session = Session::start("fibonacci", &fast_config(), true, None).await;
        let goal = session.send_goal(-1).await.unwrap().expect("bridge admits it");

        let (_, outcome, result) = finish(goal).await;
        assert_eq!(outcome, TerminalOutcome::Canceled);
        assert_eq!(result, FibonacciResult::default());
    }

    #[tokio::test]
    async fn int32_overflow_aborts_with_empty_result() {
        let session = Session::start("fibonacci", &fast_config(), true, None).await;
        let goal = session.send_goal(50).await.unwrap().expect("accepted");

        let (feedback, outcome, result) = finish(goal).await;
        assert_eq!(outcome, TerminalOutcome::Aborted);
        assert!(result.sequence.is_empty());
        // Steps producing values past fib(46) are dropped.
        assert_eq!(feedback.len(), 45);
    }

    #[tokio::test]
    async fn cancel_preempts_and_reports_abort() {
        let cfg = CliConfig {
            demo_step_ms: 60_000,
            ..fast_config()
        };
        let session = Session::start("fibonacci", &cfg, true, None).await;
        assert_eq!(session.cancel_last().await.unwrap(), None);

        let goal = session.send_goal(10).await.unwrap().expect("accepted");
        assert!(session.send_goal(3).await.unwrap().is_none(), "one goal at a time");

        let (goal_id, response) = session.cancel_last().await.unwrap().expect("a goal to cancel");
        assert_eq!(goal_id, goal.goal_id());
        assert_eq!(response, CancelResponse::Accept);

        let (_, outcome, result) = finish(goal).await;
        assert_eq!(outcome, TerminalOutcome::Aborted);
        assert_eq!(result.sequence, vec![0, 1]);
        assert_eq!(session.status().cancels, 1);
    }

    #[tokio::test]
    async fn offline_legacy_server_holds_goal_until_online() {
        let session = Session::start("fibonacci", &fast_config(), false, None).await;
        assert!(!session.status().legacy_online);

        let goal = session.send_goal(3).await.unwrap().expect("admission is not gated");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(session.status().state, BridgeState::Executing);

        session.set_legacy_online(true);
        let (_, outcome, result) = finish(goal).await;
        assert_eq!(outcome, TerminalOutcome::Succeeded);
        assert_eq!(result.sequence, vec![0, 1, 1, 2]);
    }

    #[tokio::test]
    async fn oversized_bus_capacity_still_starts() {
        let cfg = CliConfig {
            event_bus_capacity: usize::MAX,
            ..fast_config()
        };
        let session = Session::start("fibonacci", &cfg, true, None).await;
        let goal = session.send_goal(2).await.unwrap().expect("accepted");
        let (_, outcome, _) = finish(goal).await;
        assert_eq!(outcome, TerminalOutcome::Succeeded);
        session.shutdown().await;
    }
}
