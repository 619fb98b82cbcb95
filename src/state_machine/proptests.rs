//! Property-based tests for the state machine
//!
//! A small driver plays the executor's part: it answers `RequestModel`
//! from a scripted sequence of gateway replies and `DispatchTools` with one
//! result per call.

use super::state::*;
use super::transition::*;
use super::*;
use crate::db::{validate_history, Message, ToolCall, ToolOutcome};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context(max_rounds: u32) -> ConvContext {
    ConvContext::new("test-session", "test-model", max_rounds)
}

/// What the gateway says when asked
#[derive(Debug, Clone)]
enum Reply {
    Answer(Option<String>),
    Tools { text: Option<String>, calls: usize },
    Error(ErrorKind),
}

/// Outcome of driving one turn to completion
struct Driven {
    state: ConvState,
    gateway_calls: u32,
    history: Vec<Message>,
}

fn collect_persisted(effects: &[Effect], history: &mut Vec<Message>) {
    for effect in effects {
        if let Effect::PersistMessages { messages } = effect {
            history.extend(messages.iter().cloned());
        }
    }
}

/// Drive a turn; replies past the end of the script keep requesting tools
fn drive(ctx: &ConvContext, script: &[Reply]) -> Driven {
    let mut history = Vec::new();
    let mut gateway_calls = 0u32;
    let mut next_call_id = 0usize;

    let first = transition(&ConvState::Idle, ctx, Event::user_message("go"))
        .unwrap_or_else(|e| panic!("turn did not start: {e}"));
    let mut state = first.new_state;
    let mut effects = first.effects;
    collect_persisted(&effects, &mut history);

    // Far more steps than any legal turn needs
    for _ in 0..1000 {
        let mut event = None;
        for effect in &effects {
            match effect {
                Effect::RequestModel { .. } => {
                    let reply = script
                        .get(gateway_calls as usize)
                        .cloned()
                        .unwrap_or(Reply::Tools { text: None, calls: 1 });
                    gateway_calls += 1;
                    event = Some(match reply {
                        Reply::Answer(text) => Event::ModelResponse {
                            text,
                            tool_calls: vec![],
                        },
                        Reply::Tools { text, calls } => Event::ModelResponse {
                            text,
                            tool_calls: (0..calls)
                                .map(|_| {
                                    next_call_id += 1;
                                    ToolCall::new(
                                        format!("call-{next_call_id}"),
                                        "calculator",
                                        json!({"a": 1, "b": 1, "operation": "add"}),
                                    )
                                })
                                .collect(),
                        },
                        Reply::Error(kind) => Event::ModelError {
                            message: "gateway unavailable".to_string(),
                            kind,
                        },
                    });
                }
                Effect::DispatchTools { calls } => {
                    event = Some(Event::ToolResults {
                        results: calls
                            .iter()
                            .map(|c| Message::tool_result(c, ToolOutcome::success(2)))
                            .collect(),
                    });
                }
                Effect::PersistMessages { .. } | Effect::NotifyClient { .. } => {}
            }
        }

        let Some(event) = event else { break };
        let result = transition(&state, ctx, event)
            .unwrap_or_else(|e| panic!("driver produced an invalid event: {e}"));
        state = result.new_state;
        effects = result.effects;
        collect_persisted(&effects, &mut history);
    }

    Driven {
        state,
        gateway_calls,
        history,
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_text() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-zA-Z0-9 ]{0,20}")
}

fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
    prop_oneof![
        Just(ErrorKind::Network),
        Just(ErrorKind::RateLimit),
        Just(ErrorKind::ServerError),
        Just(ErrorKind::Auth),
        Just(ErrorKind::InvalidRequest),
        Just(ErrorKind::Unknown),
    ]
}

fn arb_reply() -> impl Strategy<Value = Reply> {
    prop_oneof![
        1 => arb_text().prop_map(Reply::Answer),
        4 => (arb_text(), 1usize..4).prop_map(|(text, calls)| Reply::Tools { text, calls }),
        1 => arb_error_kind().prop_map(Reply::Error),
    ]
}

fn arb_tool_call() -> impl Strategy<Value = ToolCall> {
    ("[a-z]{8}", "[a-z_]{3,12}").prop_map(|(id, name)| ToolCall::new(id, name, json!({})))
}

fn arb_busy_state() -> impl Strategy<Value = ConvState> {
    prop_oneof![
        (1u32..10).prop_map(|round| ConvState::AwaitingModel { round }),
        (1u32..10, proptest::collection::vec(arb_tool_call(), 1..4))
            .prop_map(|(round, pending)| ConvState::AwaitingToolResults { round, pending }),
    ]
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Every turn ends in Done or Failed within the round cap
    #[test]
    fn prop_turn_terminates_within_cap(
        max_rounds in 1u32..12,
        script in proptest::collection::vec(arb_reply(), 0..20)
    ) {
        let ctx = test_context(max_rounds);
        let driven = drive(&ctx, &script);
        prop_assert!(driven.state.is_terminal(), "not terminal: {:?}", driven.state);
        prop_assert!(driven.gateway_calls <= max_rounds);
        prop_assert_eq!(driven.state.rounds(), driven.gateway_calls);
    }

    // A model that always wants tools is stopped at exactly the cap
    #[test]
    fn prop_round_cap_is_exact(max_rounds in 1u32..12) {
        let ctx = test_context(max_rounds);
        let driven = drive(&ctx, &[]);
        prop_assert_eq!(
            driven.state.clone(),
            ConvState::Done { rounds: max_rounds, reason: DoneReason::RoundCapReached }
        );
        prop_assert_eq!(driven.gateway_calls, max_rounds);
        prop_assert_eq!(
            driven.history.last().cloned(),
            Some(Message::assistant(round_cap_notice(max_rounds)))
        );
    }

    // Whatever happens, the persisted history pairs every call with one result
    #[test]
    fn prop_persisted_history_is_valid(
        max_rounds in 1u32..12,
        script in proptest::collection::vec(arb_reply(), 0..20)
    ) {
        let driven = drive(&test_context(max_rounds), &script);
        prop_assert!(validate_history(&driven.history).is_ok(), "{:?}", validate_history(&driven.history));
        prop_assert_eq!(driven.history.first().cloned(), Some(Message::user("go")));
    }

    // Gateway errors never leave a partial assistant message behind
    #[test]
    fn prop_failed_round_persists_nothing_new(kind in arb_error_kind(), rounds_before in 0usize..4) {
        let mut script = vec![Reply::Tools { text: None, calls: 1 }; rounds_before];
        script.push(Reply::Error(kind));
        let driven = drive(&test_context(8), &script);
        prop_assert!(
            matches!(driven.state, ConvState::Failed { error_kind, .. } if error_kind == kind),
            "unexpected state {:?}", driven.state
        );
        // user + (assistant + result) per completed round
        prop_assert_eq!(driven.history.len(), 1 + 2 * rounds_before);
    }

    // Busy states reject new user messages
    #[test]
    fn prop_busy_rejects_messages(state in arb_busy_state(), text in "[a-zA-Z ]{1,30}") {
        let result = transition(&state, &test_context(8), Event::user_message(text));
        prop_assert_eq!(result.unwrap_err(), TransitionError::TurnInProgress);
    }

    // Cancel from any busy state lands in Failed(Cancelled)
    #[test]
    fn prop_cancel_reaches_terminal(state in arb_busy_state()) {
        let result = transition(&state, &test_context(8), Event::UserCancel).unwrap();
        prop_assert!(
            matches!(result.new_state, ConvState::Failed { error_kind: ErrorKind::Cancelled, .. }),
            "unexpected state {:?}", result.new_state
        );
        let follow_up = result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::RequestModel { .. } | Effect::DispatchTools { .. }));
        prop_assert!(!follow_up, "cancel scheduled more work: {:?}", result.effects);
    }

    // Results for calls other than the pending ones are rejected
    #[test]
    fn prop_results_must_match_pending(
        pending in proptest::collection::vec(arb_tool_call(), 1..4),
        other in arb_tool_call()
    ) {
        prop_assume!(pending.iter().all(|c| c.id != other.id));
        let state = ConvState::AwaitingToolResults { round: 1, pending: pending.clone() };
        let mut results: Vec<Message> = pending
            .iter()
            .map(|c| Message::tool_result(c, ToolOutcome::success(1)))
            .collect();
        results[0] = Message::tool_result(&other, ToolOutcome::success(1));
        let outcome = transition(&state, &test_context(8), Event::ToolResults { results });
        prop_assert!(
            matches!(outcome, Err(TransitionError::InvalidTransition(_))),
            "mismatched results accepted: {:?}", outcome
        );
    }
}
