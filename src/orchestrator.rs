//! Conversation orchestration.
//!
//! [`ConversationOrchestrator`] owns the single active conversation and
//! sequences user input, persistence and chatbot calls. Failures never
//! escape as errors: they land in the `error` field for the presentation
//! layer to show, next to an independent `loading` flag.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::error::{ChatError, Result};
use crate::gateway::ChatbotGateway;
use crate::model::{sort_newest_first, ChatMessage, Conversation, ConversationSummary, Message};
use crate::storage::ConversationStore;

const NO_CONVERSATION: &str = "Current conversation not found";
const REPLY_PENDING: &str = "A reply is still pending for this conversation";

/// State shown to the presentation layer
#[derive(Debug, Default)]
struct ViewState {
    current: Option<Conversation>,
    /// Bumped whenever a different conversation becomes active or the
    /// pending reply is abandoned; a reply from an older generation is dropped
    generation: u64,
    selections: Option<Vec<ConversationSummary>>,
    loading: bool,
    error: Option<String>,
}

impl ViewState {
    fn activate(&mut self, conversation: Option<Conversation>) {
        self.current = conversation;
        self.abandon_pending();
    }

    fn abandon_pending(&mut self) {
        self.generation += 1;
        self.loading = false;
    }
}

/// Controller for one chat window
pub struct ConversationOrchestrator {
    store: Arc<dyn ConversationStore>,
    gateway: Arc<dyn ChatbotGateway>,
    greeting: Option<String>,
    state: Mutex<ViewState>,
}

impl ConversationOrchestrator {
    pub fn new(store: Arc<dyn ConversationStore>, gateway: Arc<dyn ChatbotGateway>) -> Self {
        Self {
            store,
            gateway,
            greeting: None,
            state: Mutex::new(ViewState::default()),
        }
    }

    /// Greeting seeded into conversations started from here on
    pub fn with_greeting(mut self, greeting: Option<&str>) -> Self {
        self.greeting = greeting.map(str::to_string);
        self
    }

    // The lock is only ever held for plain field access, never across an
    // await, so a poisoned guard still holds consistent data.
    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail(&self, context: impl std::fmt::Display, err: &ChatError) {
        error!(error = %err.describe(), "{}", context);
        self.state().error = Some(format!("{}. {}", context, err.describe()));
    }

    pub fn current_conversation(&self) -> Option<Conversation> {
        self.state().current.clone()
    }

    /// Summaries for the picker; `Some` only while it is open
    pub fn conversation_selections(&self) -> Option<Vec<ConversationSummary>> {
        self.state().selections.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn clear_error(&self) {
        self.state().error = None;
    }

    /// Drops the pending reply, if any, so a new message can be sent.
    pub fn clear_loading(&self) {
        self.state().abandon_pending();
    }

    /// Creates a conversation through the store and makes it active.
    pub async fn start_new_conversation(&self) {
        match self.store.create(self.greeting.as_deref()).await {
            Ok(conversation) => {
                info!(id = %conversation.id, "Started new conversation");
                let mut state = self.state();
                state.activate(Some(conversation));
                state.error = None;
            }
            Err(e) => self.fail("Failed to start new conversation", &e),
        }
    }

    /// Activates the newest stored conversation, or starts one if none exist.
    pub async fn resume_latest_conversation(&self) {
        match self.latest_conversation().await {
            Ok(Some(conversation)) => {
                info!(id = %conversation.id, "Resumed conversation");
                self.state().activate(Some(conversation));
            }
            Ok(None) => self.start_new_conversation().await,
            Err(e) => self.fail("Failed to load conversations", &e),
        }
    }

    /// Loads `id` from the store and makes it active.
    ///
    /// On failure the active conversation stays as it was.
    pub async fn select_conversation(&self, id: &str) {
        let result = match self.store.load(id).await {
            Ok(Some(conversation)) => Ok(conversation),
            Ok(None) => Err(ChatError::not_found(id)),
            Err(e) => Err(e),
        };

        match result {
            Ok(conversation) => {
                debug!(id, "Selected conversation");
                self.state().activate(Some(conversation));
            }
            Err(e) => self.fail(format!("Failed to load conversation id: {}", id), &e),
        }
    }

    /// Deletes `id`, then activates the newest remaining conversation.
    pub async fn delete_conversation(&self, id: &str) {
        if let Err(e) = self.store.delete(id).await {
            self.fail(format!("Failed to delete conversation {}", id), &e);
            return;
        }
        info!(id, "Deleted conversation");

        if let Some(selections) = self.state().selections.as_mut() {
            selections.retain(|summary| summary.id != id);
        }

        match self.latest_conversation().await {
            Ok(latest) => self.state().activate(latest),
            Err(e) => self.fail("Failed to load conversations", &e),
        }
    }

    /// Point-in-time `{id, name}` list of stored conversations, newest first.
    pub async fn list_conversation_summaries(&self) -> Vec<ConversationSummary> {
        match self.summaries().await {
            Ok(summaries) => summaries,
            Err(e) => {
                self.fail("Failed to load conversations", &e);
                Vec::new()
            }
        }
    }

    /// Opens (`true`) or closes (`false`) the conversation picker.
    pub async fn activate_conversation_selections(&self, activate: bool) {
        if !activate {
            self.state().selections = None;
            return;
        }
        match self.summaries().await {
            Ok(summaries) => self.state().selections = Some(summaries),
            Err(e) => self.fail("Failed to load conversations", &e),
        }
    }

    /// Runs one turn: append and persist the user message, ask the chatbot,
    /// then append and persist its reply together with the new context.
    ///
    /// A failed call leaves the user message in place without a reply.
    /// Sending while a reply is pending is rejected. `loading` is raised
    /// before the user message is persisted, and only the send that raised
    /// it lowers it.
    pub async fn send_message(&self, text: &str) {
        let (pending, generation) = {
            let mut state = self.state();
            let Some(conversation) = state.current.as_ref() else {
                warn!("send_message without an active conversation");
                state.error = Some(NO_CONVERSATION.to_string());
                return;
            };
            if state.loading {
                warn!(id = %conversation.id, "send_message while a reply is pending");
                state.error = Some(REPLY_PENDING.to_string());
                return;
            }

            let message = Message::user(text, conversation.next_sequence());
            let pending = conversation.with_message(message);
            state.current = Some(pending.clone());
            state.loading = true;
            (pending, state.generation)
        };

        if let Err(e) = self.store.save(&pending).await {
            self.fail("Failed to save conversation", &e);
        }

        match self.exchange(&pending, generation).await {
            Ok(Some(updated)) => {
                if let Err(e) = self.store.save(&updated).await {
                    self.fail("Failed to save conversation", &e);
                }
            }
            Ok(None) => {}
            Err(e) if self.is_current(generation) => self.fail("Failed to send message", &e),
            Err(e) => warn!(error = %e.describe(), "Ignoring failure for an abandoned reply"),
        }

        let mut state = self.state();
        if state.generation == generation {
            state.loading = false;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state().generation == generation
    }

    /// Calls the chatbot for the last message of `pending` and applies the
    /// reply to the active conversation.
    ///
    /// Returns the snapshot to persist, or `None` when the user moved to
    /// another conversation while the call was in flight.
    async fn exchange(&self, pending: &Conversation, generation: u64) -> Result<Option<Conversation>> {
        let Some(sent) = pending.messages.last() else {
            return Err(ChatError::validation(NO_CONVERSATION));
        };

        let request = ChatMessage {
            session_id: pending.id.clone(),
            timestamp: sent.timestamp,
            text: sent.text.clone(),
            context: pending.context.clone(),
        };
        let reply = self.gateway.send_message(request).await?;

        let mut updated = pending.with_message(Message::bot(reply.text, sent.sequence + 1));
        updated.context = reply.context;

        let mut state = self.state();
        if state.generation != generation {
            warn!(id = %pending.id, "Discarding reply for a conversation that is no longer active");
            return Ok(None);
        }
        state.current = Some(updated.clone());
        debug!(id = %updated.id, messages = updated.messages.len(), "Received reply");
        Ok(Some(updated))
    }

    async fn latest_conversation(&self) -> Result<Option<Conversation>> {
        let mut conversations = self.store.load_all().await?;
        sort_newest_first(&mut conversations);
        Ok(conversations.into_iter().next())
    }

    async fn summaries(&self) -> Result<Vec<ConversationSummary>> {
        let mut conversations = self.store.load_all().await?;
        sort_newest_first(&mut conversations);
        Ok(conversations.iter().map(Conversation::summary).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConversationContext, Sender};
    use crate::storage::JsonFileStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use tempfile::TempDir;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{oneshot, Notify};

    enum Step {
        Reply(&'static str, Option<ConversationContext>),
        Fail,
    }

    /// Answers from a fixed script and records what it was sent
    #[derive(Default)]
    struct ScriptedGateway {
        script: Mutex<VecDeque<Step>>,
        requests: Mutex<Vec<ChatMessage>>,
    }

    impl ScriptedGateway {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
                requests: Mutex::default(),
            })
        }

        fn requests(&self) -> Vec<ChatMessage> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatbotGateway for ScriptedGateway {
        async fn send_message(&self, request: ChatMessage) -> Result<ChatMessage> {
            self.requests.lock().unwrap().push(request.clone());
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Step::Reply(text, context)) => Ok(ChatMessage {
                    session_id: request.session_id,
                    timestamp: Utc::now(),
                    text: text.to_string(),
                    context,
                }),
                Some(Step::Fail) | None => Err(ChatError::transport("connection refused")),
            }
        }
    }

    /// Holds every call until released
    #[derive(Default)]
    struct GatedGateway {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ChatbotGateway for GatedGateway {
        async fn send_message(&self, request: ChatMessage) -> Result<ChatMessage> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(ChatMessage {
                session_id: request.session_id,
                timestamp: Utc::now(),
                text: "late reply".to_string(),
                context: Some("late".into()),
            })
        }
    }

    /// Holds each call until its own gate opens; calls beyond the gates answer at once
    struct HeldGateway {
        gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
        entered: Notify,
        answered: AtomicUsize,
    }

    impl HeldGateway {
        fn new(gates: Vec<oneshot::Receiver<()>>) -> Arc<Self> {
            Arc::new(Self {
                gates: Mutex::new(gates.into()),
                entered: Notify::new(),
                answered: AtomicUsize::new(0),
            })
        }

        async fn wait_answered(&self, count: usize) {
            while self.answered.load(Ordering::SeqCst) < count {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait]
    impl ChatbotGateway for HeldGateway {
        async fn send_message(&self, request: ChatMessage) -> Result<ChatMessage> {
            let gate = self.gates.lock().unwrap().pop_front();
            self.entered.notify_one();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.answered.fetch_add(1, Ordering::SeqCst);
            Ok(ChatMessage {
                session_id: request.session_id,
                timestamp: Utc::now(),
                text: format!("reply to {}", request.text),
                context: None,
            })
        }
    }

    fn texts(conversation: &Conversation) -> Vec<&str> {
        conversation.messages.iter().map(|m| m.text.as_str()).collect()
    }

    fn setup(gateway: Arc<dyn ChatbotGateway>) -> (TempDir, Arc<JsonFileStore>, ConversationOrchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("conversations")));
        let orchestrator = ConversationOrchestrator::new(store.clone(), gateway).with_greeting(Some("Welcome!"));
        (dir, store, orchestrator)
    }

    fn assert_contiguous(conversation: &Conversation) {
        for pair in conversation.messages.windows(2) {
            assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        }
    }

    #[tokio::test]
    async fn new_conversation_holds_greeting() {
        let (_dir, _store, orchestrator) = setup(ScriptedGateway::new(vec![]));
        orchestrator.start_new_conversation().await;

        let conversation = orchestrator.current_conversation().unwrap();
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].sequence, 0);
        assert_eq!(conversation.messages[0].sender, Sender::Bot);
        assert!(!orchestrator.is_loading());
        assert_eq!(orchestrator.error(), None);
    }

    #[tokio::test]
    async fn first_turn_appends_user_and_bot_messages() {
        let gateway = ScriptedGateway::new(vec![Step::Reply("An NSAID pain reliever.", None)]);
        let (_dir, store, orchestrator) = setup(gateway.clone());
        orchestrator.start_new_conversation().await;

        orchestrator.send_message("What is ibuprofen?").await;

        let conversation = orchestrator.current_conversation().unwrap();
        let summary: Vec<_> = conversation
            .messages
            .iter()
            .map(|m| (m.sequence, m.sender, m.text.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, Sender::Bot, "Welcome!"),
                (1, Sender::User, "What is ibuprofen?"),
                (2, Sender::Bot, "An NSAID pain reliever."),
            ]
        );
        assert!(!orchestrator.is_loading());
        assert_eq!(orchestrator.error(), None);

        let request = &gateway.requests()[0];
        assert_eq!(request.session_id, conversation.id);
        assert_eq!(request.text, "What is ibuprofen?");
        assert_eq!(request.timestamp, conversation.messages[1].timestamp);

        let persisted = store.load(&conversation.id).await.unwrap().unwrap();
        assert_eq!(persisted, conversation);
    }

    #[tokio::test]
    async fn context_flows_from_reply_to_next_request() {
        let gateway = ScriptedGateway::new(vec![
            Step::Reply("first", Some("tok1".into())),
            Step::Reply("second", Some("tok2".into())),
        ]);
        let (_dir, store, orchestrator) = setup(gateway.clone());
        orchestrator.start_new_conversation().await;

        orchestrator.send_message("one").await;
        orchestrator.send_message("two").await;

        let requests = gateway.requests();
        assert_eq!(requests[0].context, None);
        assert_eq!(requests[1].context, Some("tok1".into()));

        let conversation = orchestrator.current_conversation().unwrap();
        assert_eq!(conversation.context, Some("tok2".into()));
        let persisted = store.load(&conversation.id).await.unwrap().unwrap();
        assert_eq!(persisted.context, Some("tok2".into()));
    }

    #[tokio::test]
    async fn sequences_stay_contiguous_across_turns_and_failures() {
        let gateway = ScriptedGateway::new(vec![
            Step::Reply("a", None),
            Step::Fail,
            Step::Reply("c", None),
        ]);
        let (_dir, _store, orchestrator) = setup(gateway);
        orchestrator.start_new_conversation().await;

        for text in ["one", "two", "three"] {
            orchestrator.send_message(text).await;
            orchestrator.clear_error();
        }

        let conversation = orchestrator.current_conversation().unwrap();
        let sequences: Vec<u64> = conversation.messages.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
        assert_contiguous(&conversation);
    }

    #[tokio::test]
    async fn without_greeting_first_user_message_is_sequence_one() {
        let gateway = ScriptedGateway::new(vec![Step::Reply("hi", None)]);
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()));
        let orchestrator = ConversationOrchestrator::new(store, gateway);
        orchestrator.start_new_conversation().await;

        orchestrator.send_message("hello").await;

        let sequences: Vec<u64> = orchestrator
            .current_conversation()
            .unwrap()
            .messages
            .iter()
            .map(|m| m.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[tokio::test]
    async fn transport_failure_keeps_user_message() {
        let gateway = ScriptedGateway::new(vec![Step::Fail]);
        let (_dir, store, orchestrator) = setup(gateway);
        orchestrator.start_new_conversation().await;

        orchestrator.send_message("Is aspirin safe?").await;

        let conversation = orchestrator.current_conversation().unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[1].sender, Sender::User);
        assert!(!orchestrator.is_loading());
        let error = orchestrator.error().unwrap();
        assert!(error.starts_with("Failed to send message."), "{error}");

        let persisted = store.load(&conversation.id).await.unwrap().unwrap();
        assert_eq!(persisted.messages.len(), 2);
    }

    #[tokio::test]
    async fn send_without_conversation_makes_no_call() {
        let gateway = ScriptedGateway::new(vec![Step::Reply("never", None)]);
        let (_dir, _store, orchestrator) = setup(gateway.clone());

        orchestrator.send_message("hello").await;

        assert_eq!(orchestrator.error().as_deref(), Some(NO_CONVERSATION));
        assert!(!orchestrator.is_loading());
        assert!(gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn selecting_unknown_id_keeps_active_conversation() {
        let (_dir, _store, orchestrator) = setup(ScriptedGateway::new(vec![]));
        orchestrator.start_new_conversation().await;
        let before = orchestrator.current_conversation();

        orchestrator.select_conversation("nonexistent").await;

        assert_eq!(orchestrator.current_conversation(), before);
        let error = orchestrator.error().unwrap();
        assert!(error.contains("not found"), "{error}");
    }

    #[tokio::test]
    async fn select_activates_stored_conversation() {
        let (_dir, store, orchestrator) = setup(ScriptedGateway::new(vec![]));
        let stored = store.create(Some("older")).await.unwrap();
        orchestrator.start_new_conversation().await;

        orchestrator.select_conversation(&stored.id).await;

        assert_eq!(orchestrator.current_conversation(), Some(stored));
        assert_eq!(orchestrator.error(), None);
    }

    #[tokio::test]
    async fn deleting_active_conversation_activates_newest_remaining() {
        let (_dir, store, orchestrator) = setup(ScriptedGateway::new(vec![]));
        orchestrator.start_new_conversation().await;
        let active = orchestrator.current_conversation().unwrap();

        let mut newer = store.create(None).await.unwrap();
        newer.timestamp = active.timestamp + chrono::Duration::seconds(1);
        store.save(&newer).await.unwrap();

        orchestrator.delete_conversation(&active.id).await;

        assert_eq!(orchestrator.current_conversation(), Some(newer));
        assert_eq!(store.load(&active.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn deleting_last_conversation_leaves_none_active() {
        let (_dir, _store, orchestrator) = setup(ScriptedGateway::new(vec![]));
        orchestrator.start_new_conversation().await;
        let active = orchestrator.current_conversation().unwrap();

        orchestrator.delete_conversation(&active.id).await;

        assert_eq!(orchestrator.current_conversation(), None);
        assert_eq!(orchestrator.error(), None);
    }

    #[tokio::test]
    async fn resume_picks_newest_or_starts_fresh() {
        let (_dir, store, orchestrator) = setup(ScriptedGateway::new(vec![]));
        orchestrator.resume_latest_conversation().await;
        let fresh = orchestrator.current_conversation().unwrap();
        assert_eq!(store.list_ids().await.unwrap().len(), 1);

        let mut newer = store.create(None).await.unwrap();
        newer.timestamp = fresh.timestamp + chrono::Duration::seconds(1);
        store.save(&newer).await.unwrap();

        orchestrator.resume_latest_conversation().await;
        assert_eq!(orchestrator.current_conversation(), Some(newer));
    }

    #[tokio::test]
    async fn selections_open_and_close() {
        let (_dir, store, orchestrator) = setup(ScriptedGateway::new(vec![]));
        let first = store.create(None).await.unwrap();
        let mut second = store.create(None).await.unwrap();
        second.timestamp = first.timestamp + chrono::Duration::seconds(1);
        store.save(&second).await.unwrap();

        assert_eq!(orchestrator.conversation_selections(), None);
        orchestrator.activate_conversation_selections(true).await;
        assert_eq!(
            orchestrator.conversation_selections(),
            Some(vec![second.summary(), first.summary()])
        );
        assert_eq!(
            orchestrator.list_conversation_summaries().await,
            vec![second.summary(), first.summary()]
        );

        orchestrator.delete_conversation(&second.id).await;
        assert_eq!(orchestrator.conversation_selections(), Some(vec![first.summary()]));

        orchestrator.activate_conversation_selections(false).await;
        assert_eq!(orchestrator.conversation_selections(), None);
    }

    #[tokio::test]
    async fn storage_failure_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let orchestrator = ConversationOrchestrator::new(
            Arc::new(JsonFileStore::new(&blocker)),
            ScriptedGateway::new(vec![]),
        );

        orchestrator.start_new_conversation().await;

        assert_eq!(orchestrator.current_conversation(), None);
        let error = orchestrator.error().unwrap();
        assert!(error.starts_with("Failed to start new conversation."), "{error}");

        orchestrator.clear_error();
        assert_eq!(orchestrator.error(), None);
    }

    #[tokio::test]
    async fn second_send_is_rejected_while_reply_pending() {
        let gateway = Arc::new(GatedGateway::default());
        let (_dir, _store, orchestrator) = setup(gateway.clone());
        orchestrator.start_new_conversation().await;

        tokio::join!(orchestrator.send_message("first"), async {
            gateway.entered.notified().await;
            assert!(orchestrator.is_loading());
            orchestrator.send_message("second").await;
            assert_eq!(orchestrator.error().as_deref(), Some(REPLY_PENDING));
            gateway.release.notify_one();
        });

        let conversation = orchestrator.current_conversation().unwrap();
        let texts: Vec<&str> = conversation.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["Welcome!", "first", "late reply"]);
        assert!(!orchestrator.is_loading());
    }

    #[tokio::test]
    async fn reply_for_abandoned_conversation_is_discarded() {
        let gateway = Arc::new(GatedGateway::default());
        let (_dir, store, orchestrator) = setup(gateway.clone());
        let other = store.create(Some("other")).await.unwrap();
        orchestrator.start_new_conversation().await;
        let original_id = orchestrator.current_conversation().unwrap().id;

        tokio::join!(orchestrator.send_message("question"), async {
            gateway.entered.notified().await;
            orchestrator.select_conversation(&other.id).await;
            gateway.release.notify_one();
        });

        assert_eq!(orchestrator.current_conversation(), Some(other));
        assert!(!orchestrator.is_loading());

        let original = store.load(&original_id).await.unwrap().unwrap();
        let texts: Vec<&str> = original.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["Welcome!", "question"]);
        assert_eq!(original.context, None);
    }

    #[tokio::test]
    async fn abandoned_reply_does_not_end_newer_pending_send() {
        let (release_a, gate_a) = oneshot::channel();
        let (release_b, gate_b) = oneshot::channel();
        let gateway = HeldGateway::new(vec![gate_a, gate_b]);
        let (_dir, store, orchestrator) = setup(gateway.clone());
        orchestrator.start_new_conversation().await;
        let first_id = orchestrator.current_conversation().unwrap().id;

        tokio::join!(orchestrator.send_message("A"), async {
            gateway.entered.notified().await;
            orchestrator.start_new_conversation().await;

            tokio::join!(orchestrator.send_message("B"), async {
                gateway.entered.notified().await;
                release_a.send(()).unwrap();
                gateway.wait_answered(1).await;

                assert!(orchestrator.is_loading());
                orchestrator.send_message("C").await;
                assert_eq!(orchestrator.error().as_deref(), Some(REPLY_PENDING));
                orchestrator.clear_error();

                release_b.send(()).unwrap();
            });
        });

        let current = orchestrator.current_conversation().unwrap();
        assert_eq!(texts(&current), vec!["Welcome!", "B", "reply to B"]);
        assert_contiguous(&current);
        assert!(!orchestrator.is_loading());
        assert_eq!(orchestrator.error(), None);

        let persisted = store.load(&current.id).await.unwrap().unwrap();
        assert_eq!(persisted, current);
        let first = store.load(&first_id).await.unwrap().unwrap();
        assert_eq!(texts(&first), vec!["Welcome!", "A"]);
    }

    #[tokio::test]
    async fn clear_loading_abandons_pending_reply() {
        let (release, gate) = oneshot::channel();
        let gateway = HeldGateway::new(vec![gate]);
        let (_dir, store, orchestrator) = setup(gateway.clone());
        orchestrator.start_new_conversation().await;

        tokio::join!(orchestrator.send_message("A"), async {
            gateway.entered.notified().await;
            orchestrator.clear_loading();
            assert!(!orchestrator.is_loading());

            orchestrator.send_message("C").await;
            release.send(()).unwrap();
        });

        let current = orchestrator.current_conversation().unwrap();
        assert_eq!(texts(&current), vec!["Welcome!", "A", "C", "reply to C"]);
        assert_contiguous(&current);
        assert!(!orchestrator.is_loading());

        let persisted = store.load(&current.id).await.unwrap().unwrap();
        assert_eq!(persisted, current);
    }
}
