//! Shared test utilities
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use studio_chat::completion::PartStream;
use studio_chat::config::PipelineSettings;
use studio_chat::relay::{BroadcastChannel, Broadcaster, StreamEvent};
use studio_chat::store::{
    Bot, BotStore, Conversation, ConversationStore, DocumentSearch, MessageStore, ModuleSet,
    ModuleSetStore, RetrievedChunk, SimilarityQuery, StoredMessage,
};
use studio_chat::{
    ChatService, Collaborators, CompletionOptions, CompletionProvider, DbPool, EmbeddingProvider,
    Error, Result, StreamPart, Turn, db,
};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Counts every collaborator call across all mocks of a fixture
#[derive(Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn total(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockBots {
    pub calls: Calls,
    pub bots: Mutex<HashMap<String, Bot>>,
}

#[async_trait]
impl BotStore for MockBots {
    async fn get(&self, bot_id: &str) -> Result<Option<Bot>> {
        self.calls.hit();
        Ok(self.bots.lock().unwrap().get(bot_id).cloned())
    }
}

#[derive(Default)]
pub struct MockConversations {
    pub calls: Calls,
    pub conversations: Mutex<HashMap<String, Conversation>>,
}

#[async_trait]
impl ConversationStore for MockConversations {
    async fn get_by_uuid(&self, uuid: &str) -> Result<Option<Conversation>> {
        self.calls.hit();
        Ok(self.conversations.lock().unwrap().get(uuid).cloned())
    }
}

/// Message store returning fixed rows, newest first
#[derive(Default)]
pub struct MockMessages {
    pub calls: Calls,
    pub rows: Mutex<Vec<StoredMessage>>,
    pub last_limit: Mutex<Option<(usize, bool)>>,
}

#[async_trait]
impl MessageStore for MockMessages {
    async fn recent_messages(
        &self,
        _user_id: &str,
        _conversation_uuid: &str,
        include_deleted: bool,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        self.calls.hit();
        *self.last_limit.lock().unwrap() = Some((limit, include_deleted));
        Ok(self.rows.lock().unwrap().iter().take(limit).cloned().collect())
    }
}

#[derive(Default)]
pub struct MockModuleSets {
    pub calls: Calls,
    pub sets: Mutex<HashMap<String, ModuleSet>>,
}

#[async_trait]
impl ModuleSetStore for MockModuleSets {
    async fn get(&self, conversation_id: &str, _user_id: &str) -> Result<Option<ModuleSet>> {
        self.calls.hit();
        Ok(self.sets.lock().unwrap().get(conversation_id).cloned())
    }
}

/// Scripted outcome of one bot's similarity search
#[derive(Clone)]
pub enum SearchOutcome {
    Chunks(Vec<String>),
    Fail,
    Stall,
}

#[derive(Default)]
pub struct MockDocuments {
    pub calls: Calls,
    pub outcomes: Mutex<HashMap<String, SearchOutcome>>,
    /// (organization, bot) of every search
    pub queries: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DocumentSearch for MockDocuments {
    async fn search(&self, query: SimilarityQuery<'_>) -> Result<Vec<RetrievedChunk>> {
        self.calls.hit();
        self.queries
            .lock()
            .unwrap()
            .push((query.organization_id.to_string(), query.bot_id.to_string()));

        let outcome = self.outcomes.lock().unwrap().get(query.bot_id).cloned();
        match outcome {
            None => Ok(Vec::new()),
            Some(SearchOutcome::Fail) => Err(Error::Database("search failed".to_string())),
            Some(SearchOutcome::Stall) => {
                futures::future::pending::<()>().await;
                Ok(Vec::new())
            }
            Some(SearchOutcome::Chunks(contents)) => Ok(contents
                .into_iter()
                .enumerate()
                .map(|(i, content)| RetrievedChunk {
                    id: i64::try_from(i).unwrap(),
                    bot_id: query.bot_id.to_string(),
                    organization_id: query.organization_id.to_string(),
                    document_id: 1,
                    content,
                    prev_chunk: None,
                    next_chunk: None,
                    similarity: 0.9,
                })
                .collect()),
        }
    }
}

#[derive(Default)]
pub struct MockEmbedder {
    pub calls: Calls,
    pub texts: Mutex<Vec<String>>,
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.hit();
        self.texts.lock().unwrap().push(text.to_string());
        Ok(vec![1.0, 0.0])
    }
}

/// One scripted part of a completion stream
#[derive(Clone)]
pub enum Step {
    Delta(&'static str),
    Finish,
    Fail,
}

/// Completion provider replaying scripted streams and recording requests
#[derive(Default)]
pub struct ScriptedCompletions {
    pub calls: Calls,
    pub scripts: Mutex<VecDeque<Vec<Step>>>,
    pub requests: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedCompletions {
    pub fn push_reply(&self, text: &'static str) {
        self.push_script(vec![Step::Delta(text), Step::Finish]);
    }

    pub fn push_script(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(steps);
    }

    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletions {
    async fn stream(&self, messages: &[Turn], _options: &CompletionOptions) -> Result<PartStream> {
        self.calls.hit();
        self.requests.lock().unwrap().push(messages.to_vec());

        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Step::Delta("ok"), Step::Finish]);

        let parts: Vec<Result<StreamPart>> = steps
            .into_iter()
            .map(|step| match step {
                Step::Delta(text) => Ok(StreamPart::delta(text)),
                Step::Finish => Ok(StreamPart::finished("stop")),
                Step::Fail => Err(Error::Stream("connection reset".to_string())),
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(parts)))
    }
}

/// Broadcaster recording `(channel, event)` pairs, subscribe and unsubscribe included
#[derive(Clone, Default)]
pub struct RecordingBroadcaster {
    pub calls: Calls,
    pub events: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingBroadcaster {
    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn count(&self, label: &str) -> usize {
        self.labels().iter().filter(|l| *l == label).count()
    }

    fn record(&self, channel: &str, label: String) {
        self.calls.hit();
        self.events.lock().unwrap().push((channel.to_string(), label));
    }
}

struct RecordingChannel {
    name: String,
    broadcaster: RecordingBroadcaster,
}

#[async_trait]
impl BroadcastChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self) -> Result<()> {
        self.broadcaster.record(&self.name, "subscribe".to_string());
        Ok(())
    }

    async fn send(&self, event: &StreamEvent) -> Result<()> {
        let label = match event {
            StreamEvent::Start => "start".to_string(),
            StreamEvent::Token { content } => format!("token:{content}"),
            StreamEvent::End => "end".to_string(),
        };
        self.broadcaster.record(&self.name, label);
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.broadcaster.record(&self.name, "unsubscribe".to_string());
        Ok(())
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn channel(&self, name: &str) -> Box<dyn BroadcastChannel> {
        Box::new(RecordingChannel {
            name: name.to_string(),
            broadcaster: self.clone(),
        })
    }
}

/// Mock collaborators sharing one call counter
///
/// Seeded with bot `b1` (organization `org-1`), conversation `c1` owned by `u1` and an
/// empty module set for it.
pub struct Fixture {
    pub calls: Calls,
    pub bots: Arc<MockBots>,
    pub conversations: Arc<MockConversations>,
    pub messages: Arc<MockMessages>,
    pub module_sets: Arc<MockModuleSets>,
    pub documents: Arc<MockDocuments>,
    pub embedder: Arc<MockEmbedder>,
    pub completions: Arc<ScriptedCompletions>,
    pub broadcaster: RecordingBroadcaster,
    pub settings: PipelineSettings,
}

impl Fixture {
    pub fn new() -> Self {
        let calls = Calls::default();
        let fixture = Self {
            bots: Arc::new(MockBots {
                calls: calls.clone(),
                ..MockBots::default()
            }),
            conversations: Arc::new(MockConversations {
                calls: calls.clone(),
                ..MockConversations::default()
            }),
            messages: Arc::new(MockMessages {
                calls: calls.clone(),
                ..MockMessages::default()
            }),
            module_sets: Arc::new(MockModuleSets {
                calls: calls.clone(),
                ..MockModuleSets::default()
            }),
            documents: Arc::new(MockDocuments {
                calls: calls.clone(),
                ..MockDocuments::default()
            }),
            embedder: Arc::new(MockEmbedder {
                calls: calls.clone(),
                ..MockEmbedder::default()
            }),
            completions: Arc::new(ScriptedCompletions {
                calls: calls.clone(),
                ..ScriptedCompletions::default()
            }),
            broadcaster: RecordingBroadcaster {
                calls: calls.clone(),
                ..RecordingBroadcaster::default()
            },
            settings: PipelineSettings::default(),
            calls,
        };

        fixture.add_bot("b1", "org-1", Some("You are a helpful tutor."));
        fixture.add_conversation("conv-1", "c1", "u1");
        fixture.set_module_set("conv-1", &[]);
        fixture
    }

    pub fn add_bot(&self, id: &str, organization_id: &str, system_prompt: Option<&str>) {
        self.bots.bots.lock().unwrap().insert(
            id.to_string(),
            Bot {
                id: id.to_string(),
                organization_id: organization_id.to_string(),
                name: id.to_uppercase(),
                system_prompt: system_prompt.map(str::to_string),
            },
        );
    }

    pub fn add_conversation(&self, id: &str, uuid: &str, user_id: &str) {
        self.conversations.conversations.lock().unwrap().insert(
            uuid.to_string(),
            Conversation {
                id: id.to_string(),
                uuid: uuid.to_string(),
                user_id: user_id.to_string(),
            },
        );
    }

    pub fn set_module_set(&self, conversation_id: &str, bot_ids: &[&str]) {
        self.module_sets.sets.lock().unwrap().insert(
            conversation_id.to_string(),
            ModuleSet {
                id: format!("set-{conversation_id}"),
                name: "Module set".to_string(),
                bot_ids: bot_ids.iter().map(ToString::to_string).collect(),
            },
        );
    }

    pub fn set_history(&self, rows: Vec<StoredMessage>) {
        *self.messages.rows.lock().unwrap() = rows;
    }

    pub fn set_search(&self, bot_id: &str, outcome: SearchOutcome) {
        self.documents
            .outcomes
            .lock()
            .unwrap()
            .insert(bot_id.to_string(), outcome);
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            bots: self.bots.clone(),
            conversations: self.conversations.clone(),
            messages: self.messages.clone(),
            module_sets: self.module_sets.clone(),
            documents: self.documents.clone(),
            embedder: self.embedder.clone(),
            completions: self.completions.clone(),
            broadcaster: Arc::new(self.broadcaster.clone()),
        }
    }

    pub fn service(&self) -> ChatService {
        ChatService::new(self.collaborators(), self.settings.clone())
    }
}
