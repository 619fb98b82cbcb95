//! Pure state transition function
//!
//! Given the same state, context and event this always produces the same
//! new state and effects. All I/O happens in the executor.

use super::state::{DoneReason, ErrorKind};
use super::{ConvContext, ConvState, Effect, Event};
use crate::db::{Message, ToolCall, ToolOutcome};
use serde_json::{json, Value};
use thiserror::Error;

/// Error text recorded for tool calls abandoned by a cancel
pub const CANCELLED_TOOL_MESSAGE: &str = "cancelled by user";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("A turn is already in progress for this session")]
    TurnInProgress,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Notice appended when a turn runs out of rounds
pub fn round_cap_notice(rounds: u32) -> String {
    format!(
        "I stopped after {rounds} rounds because the tool-use budget for this turn was exhausted. \
         Ask me to continue if you need more."
    )
}

fn state_change(state: &ConvState) -> Effect {
    Effect::notify(
        "state_change",
        json!({ "state": serde_json::to_value(state).unwrap_or(Value::Null) }),
    )
}

fn turn_done(state: &ConvState) -> Effect {
    Effect::notify(
        "turn_done",
        json!({ "state": serde_json::to_value(state).unwrap_or(Value::Null) }),
    )
}

/// Finish in a terminal state, announcing it to clients
fn finish(state: ConvState, persisted: Vec<Message>) -> TransitionResult {
    let mut result = TransitionResult::new(state.clone());
    if !persisted.is_empty() {
        result = result.with_effect(Effect::PersistMessages {
            messages: persisted,
        });
    }
    result.with_effects([state_change(&state), turn_done(&state)])
}

/// Check that results answer exactly the pending calls, in call order
fn check_results(pending: &[ToolCall], results: &[Message]) -> Result<(), TransitionError> {
    if pending.len() != results.len() {
        return Err(TransitionError::InvalidTransition(format!(
            "expected {} tool results, got {}",
            pending.len(),
            results.len()
        )));
    }
    for (call, message) in pending.iter().zip(results) {
        match message {
            Message::ToolResult { tool_call_id, .. } if *tool_call_id == call.id => {}
            Message::ToolResult { tool_call_id, .. } => {
                return Err(TransitionError::InvalidTransition(format!(
                    "tool result {tool_call_id} does not match pending call {}",
                    call.id
                )));
            }
            other => {
                return Err(TransitionError::InvalidTransition(format!(
                    "expected a tool result, got a {} message",
                    other.message_type()
                )));
            }
        }
    }
    Ok(())
}

/// Pure transition function
pub fn transition(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // User messages
        // ============================================================

        // Idle, Done or Failed + UserMessage -> AwaitingModel (a new turn)
        (ConvState::Idle | ConvState::Done { .. } | ConvState::Failed { .. }, Event::UserMessage { text }) => {
            let next = ConvState::AwaitingModel { round: 1 };
            Ok(TransitionResult::new(next.clone())
                .with_effect(Effect::persist(Message::user(text)))
                .with_effect(state_change(&next))
                .with_effect(Effect::RequestModel { round: 1 }))
        }

        (busy, Event::UserMessage { .. }) if busy.is_busy() => Err(TransitionError::TurnInProgress),

        // ============================================================
        // Gateway results
        // ============================================================

        // No tool calls -> Done, even when the text is empty
        (ConvState::AwaitingModel { round }, Event::ModelResponse { text, tool_calls })
            if tool_calls.is_empty() =>
        {
            let assistant = Message::assistant_with_tools(text, vec![]);
            Ok(finish(
                ConvState::Done {
                    rounds: *round,
                    reason: DoneReason::Answered,
                },
                vec![assistant],
            ))
        }

        // Tool calls, with or without text -> AwaitingToolResults
        (ConvState::AwaitingModel { round }, Event::ModelResponse { text, tool_calls }) => {
            let next = ConvState::AwaitingToolResults {
                round: *round,
                pending: tool_calls.clone(),
            };
            Ok(TransitionResult::new(next.clone())
                .with_effect(Effect::persist(Message::assistant_with_tools(
                    text,
                    tool_calls.clone(),
                )))
                .with_effect(state_change(&next))
                .with_effect(Effect::DispatchTools { calls: tool_calls }))
        }

        // Gateway failure -> Failed, nothing from the round is persisted
        (ConvState::AwaitingModel { round }, Event::ModelError { message, kind }) => Ok(finish(
            ConvState::Failed {
                message,
                error_kind: kind,
                rounds: *round,
            },
            vec![],
        )),

        // ============================================================
        // Tool results
        // ============================================================
        (ConvState::AwaitingToolResults { round, pending }, Event::ToolResults { results }) => {
            check_results(pending, &results)?;

            if *round >= context.max_rounds {
                let mut persisted = results;
                persisted.push(Message::assistant(round_cap_notice(*round)));
                return Ok(finish(
                    ConvState::Done {
                        rounds: *round,
                        reason: DoneReason::RoundCapReached,
                    },
                    persisted,
                ));
            }

            let next_round = round + 1;
            let next = ConvState::AwaitingModel { round: next_round };
            Ok(TransitionResult::new(next.clone())
                .with_effect(Effect::PersistMessages { messages: results })
                .with_effect(state_change(&next))
                .with_effect(Effect::RequestModel { round: next_round }))
        }

        // ============================================================
        // Cancellation
        // ============================================================
        (ConvState::AwaitingModel { round }, Event::UserCancel) => Ok(finish(
            ConvState::Failed {
                message: "turn cancelled".to_string(),
                error_kind: ErrorKind::Cancelled,
                rounds: *round,
            },
            vec![],
        )),

        // Abandoned calls still get a result so the history stays valid
        (ConvState::AwaitingToolResults { round, pending }, Event::UserCancel) => {
            let abandoned = pending
                .iter()
                .map(|call| Message::tool_result(call, ToolOutcome::failure(CANCELLED_TOOL_MESSAGE)))
                .collect();
            Ok(finish(
                ConvState::Failed {
                    message: "turn cancelled".to_string(),
                    error_kind: ErrorKind::Cancelled,
                    rounds: *round,
                },
                abandoned,
            ))
        }

        // Nothing in flight: cancel is a no-op
        (ConvState::Idle | ConvState::Done { .. } | ConvState::Failed { .. }, Event::UserCancel) => {
            Ok(TransitionResult::new(state.clone()))
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {} with event {event:?}",
            state.name()
        ))),
    }
}
