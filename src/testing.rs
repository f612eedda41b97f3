//! Deterministic stand-ins for the hosted model, used by unit tests

use crate::error::AssistantError;
use crate::llm::{ChatMessage, ChatModel, Embedder, FunctionSpec};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

type Reply = std::result::Result<String, String>;

struct Rule {
    needle: String,
    replies: VecDeque<Reply>,
}

/// Answers prompts by substring match. Each rule holds a queue of replies;
/// the last reply of a queue is sticky. Unmatched prompts fail like a
/// broken endpoint would.
#[derive(Default)]
pub struct ScriptedModel {
    rules: Mutex<Vec<Rule>>,
    function_replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, needle: &str, text: &str) -> Self {
        self.push(needle, Ok(text.to_string()));
        self
    }

    pub fn fail(self, needle: &str) -> Self {
        self.push(needle, Err(format!("scripted failure for '{}'", needle)));
        self
    }

    pub fn route(self, arguments: Value) -> Self {
        self.function_replies.lock().unwrap().push_back(Ok(arguments.to_string()));
        self
    }

    /// Every prompt seen so far, messages joined by newlines
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn prompts_matching(&self, needle: &str) -> Vec<String> {
        self.prompts().into_iter().filter(|p| p.contains(needle)).collect()
    }

    fn push(&self, needle: &str, reply: Reply) {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|r| r.needle == needle) {
            Some(rule) => rule.replies.push_back(reply),
            None => rules.push(Rule {
                needle: needle.to_string(),
                replies: VecDeque::from([reply]),
            }),
        }
    }

    fn record(&self, messages: &[ChatMessage]) -> String {
        let joined = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(joined.clone());
        joined
    }
}

fn take_reply(queue: &mut VecDeque<Reply>) -> Option<Reply> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        let prompt = self.record(messages);
        let mut rules = self.rules.lock().unwrap();
        let reply = rules
            .iter_mut()
            .find(|rule| prompt.contains(&rule.needle))
            .and_then(|rule| take_reply(&mut rule.replies));

        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(AssistantError::LlmError(e)),
            None => Err(AssistantError::LlmError("no scripted reply".to_string())),
        }
    }

    async fn call_function(
        &self,
        messages: &[ChatMessage],
        _function: &FunctionSpec,
        _temperature: f32,
    ) -> Result<Value> {
        self.record(messages);
        let reply = take_reply(&mut self.function_replies.lock().unwrap());
        match reply {
            Some(Ok(raw)) => Ok(serde_json::from_str(&raw)?),
            Some(Err(e)) => Err(AssistantError::LlmError(e)),
            None => Err(AssistantError::LlmError("no scripted function call".to_string())),
        }
    }
}

/// Bag-of-words hashing embedder: texts sharing words get similar vectors
pub struct HashEmbedder;

pub const HASH_DIMENSIONS: usize = 64;

impl HashEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; HASH_DIMENSIONS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
            v[bucket % HASH_DIMENSIONS] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}
