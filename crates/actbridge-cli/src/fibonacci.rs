//! The Fibonacci demo action on both protocols.
//!
//! The legacy side computes with `i64`, the new side speaks `i32`.  Values
//! that do not fit are translation failures: feedback carrying them is
//! dropped and a result carrying them aborts the goal.

use std::time::Duration;

use actbridge_middleware::{PayloadTranslator, SimGoal, SimLegacyServer};
use actbridge_types::{BridgeError, LegacyGoalState};
use tracing::{debug, info};

/// Largest order whose sequence fits in `i64`.
pub const MAX_LEGACY_ORDER: i32 = 92;

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FibonacciGoal {
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FibonacciFeedback {
    pub partial_sequence: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FibonacciResult {
    pub sequence: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyFibonacciGoal {
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyFibonacciFeedback {
    pub sequence: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyFibonacciResult {
    pub sequence: Vec<i64>,
}

pub struct FibonacciTranslator;

impl PayloadTranslator for FibonacciTranslator {
    type Goal = FibonacciGoal;
    type Feedback = FibonacciFeedback;
    type Result = FibonacciResult;
    type LegacyGoal = LegacyFibonacciGoal;
    type LegacyFeedback = LegacyFibonacciFeedback;
    type LegacyResult = LegacyFibonacciResult;

    fn goal_to_legacy(&self, goal: &FibonacciGoal) -> Result<LegacyFibonacciGoal, BridgeError> {
        Ok(LegacyFibonacciGoal { order: goal.order })
    }

    fn feedback_to_new(
        &self,
        feedback: &LegacyFibonacciFeedback,
    ) -> Result<FibonacciFeedback, BridgeError> {
        Ok(FibonacciFeedback {
            partial_sequence: narrow(&feedback.sequence)?,
        })
    }

    fn result_to_new(&self, result: &LegacyFibonacciResult) -> Result<FibonacciResult, BridgeError> {
        Ok(FibonacciResult {
            sequence: narrow(&result.sequence)?,
        })
    }
}

fn narrow(sequence: &[i64]) -> Result<Vec<i32>, BridgeError> {
    sequence
        .iter()
        .map(|&v| {
            i32::try_from(v)
                .map_err(|_| BridgeError::Translation(format!("sequence value {v} exceeds int32")))
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulated legacy server
// ─────────────────────────────────────────────────────────────────────────────

pub type FibonacciSimServer =
    SimLegacyServer<LegacyFibonacciGoal, LegacyFibonacciFeedback, LegacyFibonacciResult>;
type FibonacciSimGoal = SimGoal<LegacyFibonacciGoal, LegacyFibonacciFeedback, LegacyFibonacciResult>;

/// Serve goals one at a time until every client is gone.
pub async fn run_sim_server(mut server: FibonacciSimServer, step: Duration) {
    info!(action = server.action_name(), "simulated legacy Fibonacci server running");
    while let Some(goal) = server.accept_goal().await {
        execute(goal, step).await;
    }
}

async fn execute(goal: FibonacciSimGoal, step: Duration) {
    let order = goal.goal().order;
    if order < 0 {
        debug!(order, "rejecting negative order");
        goal.finish(LegacyGoalState::Rejected, None);
        return;
    }
    goal.set_active();
    if order > MAX_LEGACY_ORDER {
        debug!(order, "order overflows the legacy sequence type; aborting");
        goal.finish(LegacyGoalState::Aborted, None);
        return;
    }

    let mut sequence: Vec<i64> = vec![0, 1];
    for i in 1..order as usize {
        tokio::select! {
            biased;
            _ = goal.cancel_requested() => {
                debug!(order, step = i, "preempted");
                goal.finish(
                    LegacyGoalState::Preempted,
                    Some(LegacyFibonacciResult { sequence }),
                );
                return;
            }
            _ = tokio::time::sleep(step) => {}
        }
        sequence.push(sequence[i] + sequence[i - 1]);
        goal.publish_feedback(LegacyFibonacciFeedback {
            sequence: sequence.clone(),
        });
    }

    sequence.truncate(order as usize + 1);
    goal.finish(
        LegacyGoalState::Succeeded,
        Some(LegacyFibonacciResult { sequence }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use actbridge_middleware::{LegacyActionClient, LegacyEvent, SimLegacyClient};

    fn pair() -> (
        SimLegacyClient<LegacyFibonacciGoal, LegacyFibonacciFeedback, LegacyFibonacciResult>,
        FibonacciSimServer,
    ) {
        SimLegacyClient::pair("fibonacci", true)
    }

    async fn run_to_done(
        order: i32,
    ) -> (usize, LegacyGoalState, Option<LegacyFibonacciResult>) {
        let (client, server) = pair();
        tokio::spawn(run_sim_server(server, Duration::from_millis(1)));
        let mut events = client.submit(LegacyFibonacciGoal { order }).await.unwrap();

        let mut feedback = 0;
        loop {
            match events.recv().await.expect("stream closed early") {
                LegacyEvent::Active => {}
                LegacyEvent::Feedback(_) => feedback += 1,
                LegacyEvent::Done { state, result } => return (feedback, state, result),
            }
        }
    }

    #[test]
    fn translator_narrows_sequences() {
        let translator = FibonacciTranslator;
        let fb = translator
            .feedback_to_new(&LegacyFibonacciFeedback { sequence: vec![0, 1, 1, 2] })
            .unwrap();
        assert_eq!(fb.partial_sequence, vec![0, 1, 1, 2]);

        let overflow = translator.result_to_new(&LegacyFibonacciResult {
            sequence: vec![0, i64::from(i32::MAX) + 1],
        });
        assert!(matches!(overflow, Err(BridgeError::Translation(_))));
    }

    #[tokio::test]
    async fn computes_sequence_with_feedback_per_step() {
        let (feedback, state, result) = run_to_done(5).await;
        assert_eq!(state, LegacyGoalState::Succeeded);
        assert_eq!(feedback, 4);
        assert_eq!(result.unwrap().sequence, vec![0, 1, 1, 2, 3, 5]);
    }

    #[tokio::test]
    async fn small_orders_succeed_without_feedback() {
        let (feedback, state, result) = run_to_done(0).await;
        assert_eq!((feedback, state), (0, LegacyGoalState::Succeeded));
        assert_eq!(result.unwrap().sequence, vec![0]);

        let (_, _, result) = run_to_done(1).await;
        assert_eq!(result.unwrap().sequence, vec![0, 1]);
    }

    #[tokio::test]
    async fn negative_order_is_rejected() {
        let (_, state, result) = run_to_done(-3).await;
        assert_eq!(state, LegacyGoalState::Rejected);
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn oversized_order_is_aborted() {
        let (_, state, _) = run_to_done(MAX_LEGACY_ORDER + 1).await;
        assert_eq!(state, LegacyGoalState::Aborted);
    }

    #[tokio::test]
    async fn largest_order_fits() {
        let (_, state, result) = run_to_done(MAX_LEGACY_ORDER).await;
        assert_eq!(state, LegacyGoalState::Succeeded);
        assert_eq!(result.unwrap().sequence.last(), Some(&7_540_113_804_746_346_429));
    }

    #[tokio::test]
    async fn cancel_preempts_with_partial_sequence() {
        let (client, server) = pair();
        tokio::spawn(run_sim_server(server, Duration::from_secs(60)));
        let mut events = client.submit(LegacyFibonacciGoal { order: 10 }).await.unwrap();
        assert_eq!(events.recv().await, Some(LegacyEvent::Active));

        client.cancel();
        let done = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap();
        assert_eq!(
            done,
            Some(LegacyEvent::Done {
                state: LegacyGoalState::Preempted,
                result: Some(LegacyFibonacciResult { sequence: vec![0, 1] }),
            })
        );
    }
}
