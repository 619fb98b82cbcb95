//! Conversation runtime executor
//!
//! Owns one session's state, runs its turns one at a time and performs the
//! effects the state machine asks for.

use super::traits::{CheckpointStore, LlmClient, ToolExecutor};
use super::SseEvent;
use crate::db::{dedupe_tool_call_ids, validate_history, Message, StoredMessage};
use crate::llm::LlmRequest;
use crate::state_machine::{
    transition, ConvContext, ConvState, Effect, ErrorKind, Event, TransitionError,
};
use crate::tools::ToolContext;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// A user message waiting to be run as a turn
#[derive(Debug)]
pub struct TurnRequest {
    pub text: String,
    pub reply: oneshot::Sender<Result<TurnOutcome, TransitionError>>,
}

/// How a turn ended and what it appended
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub state: ConvState,
    /// Messages committed during the turn, in append order
    pub messages: Vec<StoredMessage>,
}

impl TurnOutcome {
    /// Final assistant text of a finished turn
    pub fn answer(&self) -> Option<&str> {
        if !matches!(self.state, ConvState::Done { .. }) {
            return None;
        }
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m.message, Message::Assistant { .. }))
            .map(|m| m.message.text().unwrap_or(""))
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            ConvState::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Cancellation and exclusion for the turn a runtime is running
#[derive(Debug, Default)]
pub struct TurnControl {
    token: Mutex<Option<CancellationToken>>,
    running: Mutex<()>,
}

impl TurnControl {
    /// Cancel the running turn; false if none is running
    pub async fn cancel(&self) -> bool {
        match self.token.lock().await.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for the running turn to end. No turn starts while the guard lives.
    pub async fn hold(&self) -> MutexGuard<'_, ()> {
        self.running.lock().await
    }
}

/// Shared between a runtime and its handle
pub type ActiveTurn = Arc<TurnControl>;

pub struct ConversationRuntime<S, L, T> {
    context: ConvContext,
    state: ConvState,
    storage: Arc<S>,
    llm_client: Arc<L>,
    tool_executor: Arc<T>,
    system_prompt: String,
    working_dir: PathBuf,
    turn_rx: mpsc::Receiver<TurnRequest>,
    broadcast_tx: broadcast::Sender<SseEvent>,
    active_turn: ActiveTurn,
}

impl<S, L, T> ConversationRuntime<S, L, T>
where
    S: CheckpointStore + 'static,
    L: LlmClient + 'static,
    T: ToolExecutor + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: ConvContext,
        storage: Arc<S>,
        llm_client: Arc<L>,
        tool_executor: Arc<T>,
        system_prompt: String,
        working_dir: PathBuf,
        turn_rx: mpsc::Receiver<TurnRequest>,
        broadcast_tx: broadcast::Sender<SseEvent>,
        active_turn: ActiveTurn,
    ) -> Self {
        Self {
            context,
            state: ConvState::Idle,
            storage,
            llm_client,
            tool_executor,
            system_prompt,
            working_dir,
            turn_rx,
            broadcast_tx,
            active_turn,
        }
    }

    /// Process turn requests until every sender is gone
    pub async fn run(mut self) {
        tracing::info!(session_id = %self.context.session_id, "Starting conversation runtime");

        while let Some(TurnRequest { text, reply }) = self.turn_rx.recv().await {
            let control = Arc::clone(&self.active_turn);
            let running = control.hold().await;
            let cancel = CancellationToken::new();
            *control.token.lock().await = Some(cancel.clone());

            let outcome = self.run_turn(text, &cancel).await;

            *control.token.lock().await = None;
            drop(running);
            if reply.send(outcome).is_err() {
                tracing::debug!(
                    session_id = %self.context.session_id,
                    "Turn caller went away before the outcome"
                );
            }
        }

        tracing::info!(session_id = %self.context.session_id, "Conversation runtime finished");
    }

    /// Run one user message through the loop until Done or Failed
    pub async fn run_turn(
        &mut self,
        text: String,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TransitionError> {
        let mut appended = Vec::new();
        let mut queue = VecDeque::from([Event::user_message(text)]);
        let mut first = true;

        'turn: while let Some(event) = queue.pop_front() {
            let result = match transition(&self.state, &self.context, event) {
                Ok(result) => result,
                // Nothing has happened yet, the caller sees the rejection
                Err(e) if first => return Err(e),
                Err(e) => {
                    tracing::error!(
                        session_id = %self.context.session_id,
                        error = %e,
                        "Invalid transition mid-turn"
                    );
                    self.abort_turn(e.to_string());
                    break 'turn;
                }
            };
            first = false;

            let previous = self.state.name();
            self.state = result.new_state;
            tracing::debug!(
                session_id = %self.context.session_id,
                from = previous,
                to = self.state.name(),
                "State transition"
            );

            for effect in result.effects {
                match self.execute_effect(effect, cancel, &mut appended).await {
                    Ok(Some(next)) => queue.push_back(next),
                    Ok(None) => {}
                    Err(message) => {
                        tracing::error!(
                            session_id = %self.context.session_id,
                            error = %message,
                            "Effect failed, aborting turn"
                        );
                        self.abort_turn(message);
                        break 'turn;
                    }
                }
            }
        }

        if !self.state.is_terminal() {
            tracing::error!(
                session_id = %self.context.session_id,
                state = self.state.name(),
                "Event queue drained mid-turn"
            );
            self.abort_turn(format!("turn stopped in state {}", self.state.name()));
        }

        tracing::info!(
            session_id = %self.context.session_id,
            state = self.state.name(),
            rounds = self.state.rounds(),
            appended = appended.len(),
            "Turn finished"
        );

        Ok(TurnOutcome {
            state: self.state.clone(),
            messages: appended,
        })
    }

    /// Leave the turn in `Failed`; committed messages stay as they are
    fn abort_turn(&mut self, message: String) {
        let _ = self.broadcast_tx.send(SseEvent::Error {
            message: message.clone(),
        });
        self.state = ConvState::Failed {
            message,
            error_kind: ErrorKind::Unknown,
            rounds: self.state.rounds(),
        };
        let state = serde_json::to_value(&self.state).unwrap_or(Value::Null);
        let _ = self.broadcast_tx.send(SseEvent::StateChange {
            state: state.clone(),
        });
        let _ = self.broadcast_tx.send(SseEvent::TurnDone { state });
    }

    /// Execute one effect; may produce the next event of the turn
    async fn execute_effect(
        &self,
        effect: Effect,
        cancel: &CancellationToken,
        appended: &mut Vec<StoredMessage>,
    ) -> Result<Option<Event>, String> {
        match effect {
            Effect::PersistMessages { messages } => {
                let stored = self
                    .storage
                    .append(&self.context.session_id, &messages)
                    .await?;
                for message in &stored {
                    let message = serde_json::to_value(message).unwrap_or(Value::Null);
                    let _ = self.broadcast_tx.send(SseEvent::Message { message });
                }
                appended.extend(stored);
                Ok(None)
            }

            Effect::RequestModel { round } => {
                let history: Vec<Message> = self
                    .storage
                    .load(&self.context.session_id)
                    .await?
                    .into_iter()
                    .map(|m| m.message)
                    .collect();
                validate_history(&history)
                    .map_err(|e| format!("Stored history is inconsistent: {e}"))?;
                let request = LlmRequest::from_history(
                    &self.system_prompt,
                    &history,
                    self.tool_executor.definitions(),
                );

                tracing::info!(
                    session_id = %self.context.session_id,
                    model = %self.llm_client.model_id(),
                    round,
                    history_len = history.len(),
                    "Requesting model"
                );

                let event = tokio::select! {
                    biased;

                    () = cancel.cancelled() => {
                        tracing::info!(session_id = %self.context.session_id, round, "Model request cancelled");
                        Event::UserCancel
                    }

                    result = self.llm_client.complete(&request) => match result {
                        Ok(response) => {
                            let (text, mut tool_calls) = response.into_parts();
                            let replaced = dedupe_tool_call_ids(&history, &mut tool_calls);
                            if replaced > 0 {
                                tracing::warn!(
                                    session_id = %self.context.session_id,
                                    replaced,
                                    "Model reused tool call ids, assigned fresh ones"
                                );
                            }
                            Event::ModelResponse { text, tool_calls }
                        }
                        Err(e) => Event::ModelError {
                            message: e.message,
                            kind: e.kind.into(),
                        },
                    },
                };
                Ok(Some(event))
            }

            Effect::DispatchTools { calls } => {
                let ctx = ToolContext::new(
                    cancel.child_token(),
                    self.context.session_id.clone(),
                    self.working_dir.clone(),
                );

                let event = tokio::select! {
                    biased;

                    () = cancel.cancelled() => {
                        tracing::info!(
                            session_id = %self.context.session_id,
                            tools = calls.len(),
                            "Tool dispatch cancelled"
                        );
                        Event::UserCancel
                    }

                    results = self.tool_executor.run(&calls, &ctx) => Event::ToolResults { results },
                };
                Ok(Some(event))
            }

            Effect::NotifyClient { event_type, data } => {
                let state = data.get("state").cloned().unwrap_or(Value::Null);
                match event_type.as_str() {
                    "state_change" => {
                        let _ = self.broadcast_tx.send(SseEvent::StateChange { state });
                    }
                    "turn_done" => {
                        let _ = self.broadcast_tx.send(SseEvent::TurnDone { state });
                    }
                    other => {
                        tracing::warn!(event_type = %other, data = %data, "Unknown client notification");
                    }
                }
                Ok(None)
            }
        }
    }
}
