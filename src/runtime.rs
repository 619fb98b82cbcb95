//! Runtime for executing conversations
//!
//! One runtime task per active session. Turns on a session are queued on
//! its channel and run one at a time; different sessions run in parallel.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{ActiveTurn, ConversationRuntime, TurnOutcome, TurnRequest};
pub use traits::*;

use crate::db::Database;
use crate::llm::ModelRegistry;
use crate::state_machine::ConvContext;
use crate::system_prompt::build_system_prompt;
use crate::title_generator::spawn_title_generation;
use crate::tools::{ToolDispatcher, ToolRegistry};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime =
    ConversationRuntime<DatabaseStorage, RegistryLlmClient, ToolRegistryExecutor>;

/// Handle to interact with a running conversation
#[derive(Clone)]
pub struct ConversationHandle {
    pub turn_tx: mpsc::Sender<TurnRequest>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
    pub active_turn: ActiveTurn,
}

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Init {
        session: serde_json::Value,
        messages: Vec<serde_json::Value>,
        last_sequence_id: i64,
    },
    Message {
        message: serde_json::Value,
    },
    StateChange {
        /// Full state as JSON object (e.g. `{"type":"awaiting_model","round":1}`)
        state: serde_json::Value,
    },
    TurnDone {
        state: serde_json::Value,
    },
    Error {
        message: String,
    },
}

/// Manager for all conversation runtimes
pub struct RuntimeManager {
    db: Database,
    llm_registry: Arc<ModelRegistry>,
    dispatcher: ToolDispatcher,
    max_rounds: u32,
    working_dir: PathBuf,
    runtimes: RwLock<HashMap<String, ConversationHandle>>,
}

impl RuntimeManager {
    pub fn new(
        db: Database,
        llm_registry: Arc<ModelRegistry>,
        tool_registry: Arc<ToolRegistry>,
        max_rounds: u32,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            llm_registry,
            dispatcher: ToolDispatcher::new(tool_registry),
            max_rounds: max_rounds.max(1),
            working_dir,
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create a runtime for a session
    pub async fn get_or_create(&self, session_id: &str) -> ConversationHandle {
        if let Some(handle) = self.runtimes.read().await.get(session_id) {
            return handle.clone();
        }

        let mut runtimes = self.runtimes.write().await;
        // Another caller may have started it while we waited for the lock
        if let Some(handle) = runtimes.get(session_id) {
            return handle.clone();
        }

        let model_id = self.llm_registry.default_model_id().to_string();
        let context = ConvContext::new(session_id, &model_id, self.max_rounds);

        let (turn_tx, turn_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);
        let active_turn = ActiveTurn::default();

        let system_prompt = build_system_prompt(&self.dispatcher.registry().names());
        let runtime: ProductionRuntime = ConversationRuntime::new(
            context,
            Arc::new(DatabaseStorage::new(self.db.clone())),
            Arc::new(RegistryLlmClient::new(self.llm_registry.clone(), model_id)),
            Arc::new(ToolRegistryExecutor::new(self.dispatcher.clone())),
            system_prompt,
            self.working_dir.clone(),
            turn_rx,
            broadcast_tx.clone(),
            active_turn.clone(),
        );

        tokio::spawn(runtime.run());

        let handle = ConversationHandle {
            turn_tx,
            broadcast_tx,
            active_turn,
        };
        runtimes.insert(session_id.to_string(), handle.clone());
        handle
    }

    /// Run one user message as a turn and wait for it to finish.
    ///
    /// Turns already queued on the session run first. The first message of
    /// a session also starts title generation in the background.
    pub async fn run_turn(&self, session_id: &str, text: String) -> Result<TurnOutcome, String> {
        let is_first_message = self
            .db
            .last_sequence_id(session_id)
            .map_err(|e| e.to_string())?
            == 0;
        if is_first_message {
            // The title task only updates an existing row
            self.db.create_session(session_id).map_err(|e| e.to_string())?;
            spawn_title_generation(
                self.db.clone(),
                self.llm_registry.clone(),
                session_id.to_string(),
                text.clone(),
            );
        }

        let handle = self.get_or_create(session_id).await;
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .turn_tx
            .send(TurnRequest {
                text,
                reply: reply_tx,
            })
            .await
            .map_err(|e| format!("Failed to queue turn: {e}"))?;

        reply_rx
            .await
            .map_err(|_| "Conversation runtime stopped before the turn finished".to_string())?
            .map_err(|e| e.to_string())
    }

    /// Cancel the in-flight turn of a session; false if nothing was running
    pub async fn cancel(&self, session_id: &str) -> bool {
        let Some(handle) = self.runtimes.read().await.get(session_id).cloned() else {
            return false;
        };
        let cancelled = handle.active_turn.cancel().await;
        if cancelled {
            tracing::info!(session_id = %session_id, "Cancelling turn");
        }
        cancelled
    }

    /// Subscribe to session updates
    pub async fn subscribe(&self, session_id: &str) -> broadcast::Receiver<SseEvent> {
        self.get_or_create(session_id).await.broadcast_tx.subscribe()
    }

    /// Wipe every checkpoint and title.
    ///
    /// In-flight turns are cancelled and finish before anything is deleted;
    /// turns queued behind them run afterwards against the empty store.
    pub async fn clear_all(&self) -> Result<(), String> {
        // Write lock: no runtime is started while clearing
        let runtimes = self.runtimes.write().await;

        let mut cancelled = 0;
        for handle in runtimes.values() {
            if handle.active_turn.cancel().await {
                cancelled += 1;
            }
        }
        let mut held = Vec::with_capacity(runtimes.len());
        for handle in runtimes.values() {
            held.push(handle.active_turn.hold().await);
        }

        let storage = DatabaseStorage::new(self.db.clone());
        storage.clear_all().await?;
        self.db.clear_sessions().map_err(|e| e.to_string())?;

        tracing::info!(
            runtimes = runtimes.len(),
            cancelled,
            "Cleared all sessions"
        );
        Ok(())
    }

    /// Get the database handle
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn model_registry(&self) -> &ModelRegistry {
        &self.llm_registry
    }

    pub fn tool_registry(&self) -> &ToolRegistry {
        self.dispatcher.registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{validate_history, Message};
    use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, LlmService, Usage};
    use crate::state_machine::ConvState;
    use crate::tools::CalculatorTool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted provider registered under the default model id
    struct ScriptedService {
        replies: Mutex<VecDeque<LlmResponse>>,
        delay: Duration,
    }

    #[async_trait]
    impl LlmService for ScriptedService {
        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            tokio::time::sleep(self.delay).await;
            // Title requests carry no tools
            if request.tools.is_empty() {
                return Ok(LlmResponse {
                    content: vec![ContentBlock::text("Test Title")],
                    end_turn: true,
                    usage: Usage::default(),
                });
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::network("script exhausted"))
        }

        fn model_id(&self) -> &str {
            "llama-3.1-8b-instant"
        }

        fn context_window(&self) -> usize {
            128_000
        }
    }

    fn text_reply(text: &str) -> LlmResponse {
        LlmResponse {
            content: vec![ContentBlock::text(text)],
            end_turn: true,
            usage: Usage::default(),
        }
    }

    fn manager(replies: Vec<LlmResponse>, delay: Duration) -> RuntimeManager {
        let mut registry = ModelRegistry::new_empty();
        registry.insert(
            "llama-3.1-8b-instant",
            Arc::new(ScriptedService {
                replies: Mutex::new(replies.into()),
                delay,
            }),
        );
        RuntimeManager::new(
            Database::open_in_memory().unwrap(),
            Arc::new(registry),
            Arc::new(ToolRegistry::with_tools(vec![Arc::new(CalculatorTool)])),
            8,
            PathBuf::from("/tmp"),
        )
    }

    #[tokio::test]
    async fn test_run_turn_persists_to_database() {
        let manager = manager(
            vec![
                LlmResponse {
                    content: vec![ContentBlock::tool_use(
                        "c1",
                        "calculator",
                        json!({"a": 2, "b": 2, "operation": "add"}),
                    )],
                    end_turn: false,
                    usage: Usage::default(),
                },
                text_reply("4"),
            ],
            Duration::ZERO,
        );

        let outcome = manager.run_turn("s1", "What is 2+2?".to_string()).await.unwrap();
        assert_eq!(outcome.answer(), Some("4"));

        let stored = manager.db().load_messages("s1").unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[0].message, Message::user("What is 2+2?"));
        assert_eq!(stored[3].message, Message::assistant("4"));
    }

    #[tokio::test]
    async fn test_concurrent_turns_are_serialized() {
        let manager = Arc::new(manager(
            vec![text_reply("first"), text_reply("second")],
            Duration::from_millis(30),
        ));

        let a = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run_turn("s1", "one".to_string()).await }
        });
        let b = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run_turn("s1", "two".to_string()).await }
        });
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert!(matches!(a.state, ConvState::Done { .. }));
        assert!(matches!(b.state, ConvState::Done { .. }));

        // Each turn's user message is directly followed by its own answer
        let stored: Vec<Message> = manager
            .db()
            .load_messages("s1")
            .unwrap()
            .into_iter()
            .map(|m| m.message)
            .collect();
        assert_eq!(stored.len(), 4);
        assert!(matches!(stored[0], Message::User { .. }));
        assert!(matches!(stored[1], Message::Assistant { .. }));
        assert!(matches!(stored[2], Message::User { .. }));
        assert!(matches!(stored[3], Message::Assistant { .. }));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let manager = manager(vec![text_reply("a"), text_reply("b")], Duration::ZERO);
        manager.run_turn("s1", "hello".to_string()).await.unwrap();
        manager.run_turn("s2", "hello".to_string()).await.unwrap();
        assert_eq!(manager.db().load_messages("s1").unwrap().len(), 2);
        assert_eq!(manager.db().load_messages("s2").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_turn() {
        let manager = Arc::new(manager(vec![text_reply("late")], Duration::from_secs(30)));
        let turn = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run_turn("s1", "slow".to_string()).await }
        });

        // Wait until the turn has started
        let mut cancelled = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if manager.cancel("s1").await {
                cancelled = true;
                break;
            }
        }
        assert!(cancelled);

        let outcome = turn.await.unwrap().unwrap();
        assert!(matches!(
            outcome.state,
            ConvState::Failed {
                error_kind: crate::state_machine::ErrorKind::Cancelled,
                ..
            }
        ));
        assert_eq!(manager.db().load_messages("s1").unwrap().len(), 1);
        assert!(!manager.cancel("s1").await);
    }

    #[tokio::test]
    async fn test_cancel_unknown_session() {
        let manager = manager(vec![], Duration::ZERO);
        assert!(!manager.cancel("nope").await);
    }

    /// Title generation runs in the background; poll until it lands
    async fn wait_for_title(manager: &RuntimeManager, session_id: &str) -> String {
        let mut title = String::new();
        for _ in 0..100 {
            title = manager.db().get_session(session_id).unwrap().title;
            if title == "Test Title" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        title
    }

    #[tokio::test]
    async fn test_first_message_titles_session() {
        let manager = manager(vec![text_reply("hi"), text_reply("again")], Duration::ZERO);
        manager.run_turn("s1", "Hello there".to_string()).await.unwrap();
        assert_eq!(wait_for_title(&manager, "s1").await, "Test Title");

        manager.db().set_title("s1", "Renamed").unwrap();
        manager.run_turn("s1", "Another one".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.db().get_session("s1").unwrap().title, "Renamed");
    }

    #[tokio::test]
    async fn test_subscribe_receives_turn_events() {
        let manager = manager(vec![text_reply("Hello!")], Duration::ZERO);
        let mut rx = manager.subscribe("s1").await;
        manager.run_turn("s1", "Hi".to_string()).await.unwrap();

        let mut saw_turn_done = false;
        while let Ok(event) = rx.try_recv() {
            if let SseEvent::TurnDone { state } = event {
                assert_eq!(state["type"], "done");
                saw_turn_done = true;
            }
        }
        assert!(saw_turn_done);
    }

    #[tokio::test]
    async fn test_clear_all_during_turn() {
        let manager = Arc::new(manager(
            vec![text_reply("late answer")],
            Duration::from_millis(300),
        ));
        let turn = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run_turn("s1", "slow question".to_string()).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.clear_all().await.unwrap();

        let outcome = turn.await.unwrap().unwrap();
        assert!(matches!(
            outcome.state,
            ConvState::Failed {
                error_kind: crate::state_machine::ErrorKind::Cancelled,
                ..
            }
        ));

        // Let the background title request finish too
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(manager.db().load_messages("s1").unwrap().is_empty());
        assert!(manager.db().list_session_ids().unwrap().is_empty());
        assert!(manager.db().list_sessions().unwrap().is_empty());

        // The session is usable again and starts from an empty history
        let outcome = manager.run_turn("s1", "hello again".to_string()).await;
        assert!(outcome.is_ok());
        let stored = manager.db().load_messages("s1").unwrap();
        assert!(matches!(stored[0].message, Message::User { .. }));
        assert!(validate_history(
            &stored.into_iter().map(|m| m.message).collect::<Vec<_>>()
        )
        .is_ok());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let manager = manager(vec![text_reply("a")], Duration::ZERO);
        manager.run_turn("s1", "hello".to_string()).await.unwrap();
        wait_for_title(&manager, "s1").await;
        manager.clear_all().await.unwrap();
        assert!(manager.db().list_session_ids().unwrap().is_empty());
        assert!(manager.db().list_sessions().unwrap().is_empty());
    }
}
