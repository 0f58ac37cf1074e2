//! OpenAI Chat Completions API provider.
//!
//! Streams `/v1/chat/completions` and maps each SSE chunk onto a [`Fragment`].
//! Also serves Ollama and other OpenAI-compatible local servers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace, warn};

use rusty_interp_core::error::InterpError;
use rusty_interp_core::merge::{FinishReason, Fragment, InvocationDelta, TurnDelta};
use rusty_interp_core::transcript::{AssistantTurn, RUN_CODE, Role, Turn};

use crate::sse::parse_sse_stream;
use crate::{CompletionRequest, Credentials, FragmentStream, LlmProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// API style — determines minor behavior differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    OpenAi,
    Ollama,
}

pub struct OpenAiProvider {
    pub base_url: String,
    pub api_style: ApiStyle,
    provider_id: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn openai(base_url: Option<&str>) -> Self {
        Self::with_style(base_url.unwrap_or(OPENAI_BASE_URL), ApiStyle::OpenAi, "openai")
    }

    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::with_style(base_url.unwrap_or(OLLAMA_BASE_URL), ApiStyle::Ollama, "ollama")
    }

    fn with_style(base_url: &str, api_style: ApiStyle, id: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_style,
            provider_id: id.into(),
            client: reqwest::Client::new(),
        }
    }
}

// --- OpenAI request/response types ---

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
    /// Legacy single-function streaming.
    #[serde(default)]
    function_call: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Map an OpenAI finish reason onto the core's.
pub fn finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "tool_calls" | "function_call" => FinishReason::Invocation,
        other => FinishReason::Other(other.to_string()),
    }
}

/// Convert one streamed chunk into a fragment. Chunks without choices yield `None`.
fn fragment_from_chunk(chunk: ChatCompletionChunk) -> Option<Fragment> {
    let choice = chunk.choices.into_iter().next()?;
    let ChunkDelta {
        role,
        content,
        tool_calls,
        function_call,
    } = choice.delta;

    let mut invocation = function_call.map(|f| InvocationDelta {
        id: None,
        name: f.name,
        arguments: f.arguments,
    });

    for call in tool_calls.unwrap_or_default() {
        // Only one invocation can be pending at a time.
        if call.index != 0 {
            warn!(index = call.index, "Ignoring additional parallel tool call");
            continue;
        }
        let function = call.function.unwrap_or_default();
        invocation = Some(InvocationDelta {
            id: call.id,
            name: function.name,
            arguments: function.arguments,
        });
    }

    Some(Fragment {
        delta: TurnDelta {
            role: role.as_deref().and_then(|r| match r {
                "assistant" => Some(Role::Assistant),
                _ => None,
            }),
            content,
            invocation,
        },
        finish_reason: choice.finish_reason.as_deref().map(finish_reason),
    })
}

fn invocation_id(index: usize, id: &str) -> String {
    if id.is_empty() {
        format!("call_{index}")
    } else {
        id.to_string()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.provider_id
    }

    fn format_messages(&self, transcript: &[Turn]) -> Vec<serde_json::Value> {
        let mut messages: Vec<serde_json::Value> = Vec::new();
        // Id of an invocation still waiting for its result message.
        let mut pending: Option<String> = None;

        for (index, turn) in transcript.iter().enumerate() {
            match turn {
                Turn::User { content } => {
                    messages.push(json!({ "role": "user", "content": content }));
                }
                Turn::Assistant(AssistantTurn::Text(text)) => {
                    if !text.content.is_empty() {
                        messages.push(json!({ "role": "assistant", "content": text.content }));
                    }
                }
                Turn::Assistant(AssistantTurn::Invocation(turn)) => {
                    let id = invocation_id(index, &turn.invocation.id);
                    let name = if turn.invocation.name.is_empty() {
                        RUN_CODE
                    } else {
                        turn.invocation.name.as_str()
                    };
                    let mut msg = json!({
                        "role": "assistant",
                        "content": serde_json::Value::Null,
                        "tool_calls": [{
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": turn.invocation.arguments,
                            }
                        }],
                    });
                    if !turn.content.is_empty() {
                        msg["content"] = json!(turn.content);
                    }
                    messages.push(msg);
                    pending = Some(id);
                }
                Turn::Function { name, content } => match pending.take() {
                    Some(id) => messages.push(json!({
                        "role": "tool",
                        "tool_call_id": id,
                        "content": content,
                    })),
                    None => messages.push(json!({
                        "role": "function",
                        "name": name,
                        "content": content,
                    })),
                },
            }
        }

        messages
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<FragmentStream> {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(request.messages.iter().cloned());

        let tools: Vec<serde_json::Value> = request
            .functions
            .iter()
            .map(|f| json!({ "type": "function", "function": f }))
            .collect();

        let body = OpenAiRequest {
            model: request.model.clone(),
            messages,
            stream: true,
            temperature: request.temperature,
            parallel_tool_calls: (!tools.is_empty() && self.api_style == ApiStyle::OpenAi)
                .then_some(false),
            tools,
        };

        debug!(model = %body.model, base_url = %self.base_url, "Streaming OpenAI-compatible API");

        let mut req_builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json");

        match (self.api_style, credentials) {
            (_, Credentials::ApiKey { api_key }) => {
                req_builder = req_builder.header("authorization", format!("Bearer {api_key}"));
            }
            (ApiStyle::Ollama, Credentials::NoAuth) => {}
            (ApiStyle::OpenAi, Credentials::NoAuth) => {
                return Err(InterpError::Provider("OpenAI provider requires an API key".into()).into());
            }
        }

        let response = req_builder.json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(InterpError::Provider(format!("OpenAI API error {status}: {body}")).into());
        }

        let sse = Box::pin(parse_sse_stream(response));
        let fragments = futures::stream::unfold(sse, |mut sse| async move {
            loop {
                match sse.next().await {
                    Some(Ok(event)) => {
                        let data = event.data.trim();
                        // OpenAI terminates with "data: [DONE]"
                        if data == "[DONE]" {
                            return None;
                        }
                        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
                            Ok(c) => c,
                            Err(e) => {
                                trace!(%e, data, "Failed to parse OpenAI chunk");
                                continue;
                            }
                        };
                        if let Some(fragment) = fragment_from_chunk(chunk) {
                            return Some((Ok(fragment), sse));
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), sse)),
                    None => return None,
                }
            }
        });

        Ok(Box::pin(fragments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusty_interp_core::transcript::{Invocation, InvocationTurn, TextTurn};

    fn chunk(json: &str) -> Option<Fragment> {
        fragment_from_chunk(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_provider_creation() {
        let provider = OpenAiProvider::openai(None);
        assert_eq!(provider.id(), "openai");
        assert_eq!(provider.base_url, OPENAI_BASE_URL);

        let provider = OpenAiProvider::ollama(Some("http://box:11434/"));
        assert_eq!(provider.id(), "ollama");
        assert_eq!(provider.base_url, "http://box:11434");
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(finish_reason("stop"), FinishReason::Stop);
        assert_eq!(finish_reason("tool_calls"), FinishReason::Invocation);
        assert_eq!(finish_reason("function_call"), FinishReason::Invocation);
        assert_eq!(
            finish_reason("length"),
            FinishReason::Other("length".into())
        );
    }

    #[test]
    fn test_text_chunk() {
        let fragment = chunk(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"role":"assistant","content":"Hello"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(fragment.delta.role, Some(Role::Assistant));
        assert_eq!(fragment.delta.content.as_deref(), Some("Hello"));
        assert!(fragment.finish_reason.is_none());
    }

    #[test]
    fn test_tool_call_chunk() {
        let fragment = chunk(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"run_code","arguments":"{\"lang"}}]},"finish_reason":null}]}"#,
        )
        .unwrap();
        let inv = fragment.delta.invocation.unwrap();
        assert_eq!(inv.id.as_deref(), Some("call_1"));
        assert_eq!(inv.name.as_deref(), Some("run_code"));
        assert_eq!(inv.arguments.as_deref(), Some("{\"lang"));
    }

    #[test]
    fn test_parallel_tool_calls_ignored() {
        let fragment = chunk(
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"function":{"arguments":"x"}}]}}]}"#,
        )
        .unwrap();
        assert!(fragment.delta.invocation.is_none());
    }

    #[test]
    fn test_legacy_function_call_chunk() {
        let fragment = chunk(
            r#"{"choices":[{"index":0,"delta":{"function_call":{"arguments":"\"code\""}},"finish_reason":null}]}"#,
        )
        .unwrap();
        let inv = fragment.delta.invocation.unwrap();
        assert_eq!(inv.arguments.as_deref(), Some("\"code\""));
        assert!(inv.name.is_none());
    }

    #[test]
    fn test_finish_chunk_and_usage_chunk() {
        let fragment =
            chunk(r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#).unwrap();
        assert!(fragment.delta.is_empty());
        assert_eq!(fragment.finish_reason, Some(FinishReason::Invocation));

        assert!(chunk(r#"{"choices":[],"usage":{"prompt_tokens":3}}"#).is_none());
    }

    #[test]
    fn test_format_messages_links_results_to_invocations() {
        let provider = OpenAiProvider::openai(None);
        let transcript = vec![
            Turn::user("List files"),
            Turn::Assistant(AssistantTurn::Invocation(InvocationTurn {
                content: String::new(),
                invocation: Invocation {
                    id: "call_abc".into(),
                    name: "run_code".into(),
                    arguments: r#"{"language": "shell", "code": "ls"}"#.into(),
                    parsed: None,
                },
            })),
            Turn::function_result("a.txt"),
            Turn::Assistant(AssistantTurn::Text(TextTurn {
                content: "There is one file.".into(),
            })),
        ];

        let messages = provider.format_messages(&transcript);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
        assert!(messages[1]["content"].is_null());
        assert_eq!(messages[1]["tool_calls"][0]["id"], "call_abc");
        assert_eq!(
            messages[1]["tool_calls"][0]["function"]["arguments"],
            r#"{"language": "shell", "code": "ls"}"#
        );
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_abc");
        assert_eq!(messages[2]["content"], "a.txt");
        assert_eq!(messages[3]["content"], "There is one file.");
    }

    #[test]
    fn test_format_messages_fills_missing_invocation_id_and_name() {
        let provider = OpenAiProvider::openai(None);
        let transcript = vec![
            Turn::user("go"),
            Turn::Assistant(AssistantTurn::Invocation(InvocationTurn::default())),
            Turn::function_result("Execution was interrupted before it produced a result."),
            Turn::user("never mind"),
        ];

        let messages = provider.format_messages(&transcript);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(messages[1]["tool_calls"][0]["function"]["name"], "run_code");
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_1");
        assert_eq!(messages[3]["role"], "user");
    }

    #[test]
    fn test_function_result_without_invocation_uses_function_role() {
        let provider = OpenAiProvider::openai(None);
        let messages = provider.format_messages(&[Turn::function_result("stray")]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "function");
        assert_eq!(messages[0]["content"], "stray");
    }
}
