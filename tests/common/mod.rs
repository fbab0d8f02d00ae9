#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use knowledge_desk::chat::{Orchestrator, OrchestratorSettings};
use knowledge_desk_core::embedding::Embedder;
use knowledge_desk_core::llm::{ContentBlock, LlmClient, LlmRequest, LlmResponse, StopReason};
use knowledge_desk_core::store::memory::InMemoryStore;
use knowledge_desk_core::store::Store;

const VOCAB: [&str; 6] = ["rust", "deploy", "budget", "meeting", "python", "release"];

/// Bag-of-keywords embedder: one dimension per vocabulary word plus a
/// constant bias so no text maps to the zero vector.
#[derive(Default)]
pub struct KeywordEmbedder {
    calls: AtomicUsize,
    fail_after: Option<usize>,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeed `n` times, then fail every call.
    pub fn failing_after(n: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_after: Some(n),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        VOCAB.len() + 1
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let seen = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_after {
            if seen >= limit {
                bail!("VOYAGE_API_KEY environment variable is not set");
            }
        }
        let lower = text.to_lowercase();
        let mut vec: Vec<f32> = VOCAB
            .iter()
            .map(|word| lower.matches(word).count() as f32)
            .collect();
        vec.push(0.1);
        Ok(vec)
    }
}

/// Replays canned responses in order and records every request.
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<LlmResponse, String>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A model that always asks for the same tool again.
    pub fn endless_tool_use(name: &str, args: Value, n: usize) -> Self {
        Self::new(
            (0..n)
                .map(|i| {
                    let id = format!("call_{}", i);
                    tool_use(&[(id.as_str(), name, args.clone())])
                })
                .collect(),
        )
    }

    pub fn failing(message: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(vec![Err(message.to_string())])),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().unwrap().push(request.clone());
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => bail!("script exhausted"),
        }
    }
}

/// A response whose only content is `calls` as tool-use blocks.
pub fn tool_use(calls: &[(&str, &str, Value)]) -> LlmResponse {
    LlmResponse {
        content: calls
            .iter()
            .map(|(id, name, input)| ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input: input.clone(),
            })
            .collect(),
        stop_reason: StopReason::ToolUse,
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub embedder: Arc<KeywordEmbedder>,
    pub llm: Arc<ScriptedLlm>,
    pub orchestrator: Orchestrator,
}

pub fn harness(llm: ScriptedLlm) -> Harness {
    harness_with(llm, KeywordEmbedder::new(), OrchestratorSettings::default())
}

pub fn harness_with(
    llm: ScriptedLlm,
    embedder: KeywordEmbedder,
    settings: OrchestratorSettings,
) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let embedder = Arc::new(embedder);
    let llm = Arc::new(llm);
    let orchestrator = Orchestrator::new(
        store.clone() as Arc<dyn Store>,
        embedder.clone() as Arc<dyn Embedder>,
        llm.clone() as Arc<dyn LlmClient>,
        settings,
    );
    Harness {
        store,
        embedder,
        llm,
        orchestrator,
    }
}
