//! OpenAI-compatible Chat Completions provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::ModelBackend;
use crate::{
    error::{Error, Result},
    stream::{ProviderEvent, ProviderEventStream},
    types::{Context, Message, Model, Usage},
};

/// Client for any endpoint speaking the chat-completions streaming protocol
pub struct OpenAiCompatible {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAiCompatible {
    /// Create a provider. Local endpoints may not need a key.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    fn headers(&self, model: &Model) -> reqwest::header::HeaderMap {
        use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }

        for (key, value) in &model.headers {
            if let (Ok(name), Ok(val)) = (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                headers.insert(name, val);
            }
        }
        headers
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatible {
    async fn stream(&self, model: &Model, context: &Context) -> Result<ProviderEventStream> {
        let request = build_request(model, context);
        let url = format!("{}/chat/completions", model.base_url.trim_end_matches('/'));

        let request_builder = self
            .client
            .post(&url)
            .headers(self.headers(model))
            .json(&request);

        let mut event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {e}")))?;
        // Retries are decided by the caller, never by the event source.
        event_source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        let first = match event_source.next().await {
            Some(Ok(Event::Open)) => None,
            Some(Ok(event)) => Some(event),
            Some(Err(e)) => {
                event_source.close();
                return Err(map_eventsource_error(e).await);
            }
            None => return Err(Error::Sse("stream closed before it opened".into())),
        };

        tracing::debug!(model = %model.id, url = %url, "Chat completion stream opened");
        Ok(Box::pin(create_stream(event_source, first)))
    }
}

fn build_request(model: &Model, context: &Context) -> OpenAIRequest {
    let mut messages = Vec::new();

    if let Some(ref system_prompt) = context.system_prompt {
        messages.push(OpenAIMessage::text("system", system_prompt.clone()));
    }

    messages.extend(context.messages.iter().map(convert_message));

    let tools: Vec<OpenAITool> = context
        .tools
        .iter()
        .map(|t| OpenAITool {
            tool_type: "function".to_string(),
            function: OpenAIFunction {
                name: t.name.clone(),
                description: Some(t.description.clone()),
                parameters: Some(t.parameters.clone()),
            },
        })
        .collect();

    let has_tools = !tools.is_empty();
    OpenAIRequest {
        model: model.id.clone(),
        messages,
        stream: true,
        stream_options: StreamOptions {
            include_usage: true,
        },
        max_tokens: Some(model.max_tokens),
        tools: has_tools.then_some(tools),
        tool_choice: has_tools.then(|| serde_json::json!("auto")),
    }
}

fn convert_message(msg: &Message) -> OpenAIMessage {
    match msg {
        Message::System { content } => OpenAIMessage::text("system", content.clone()),
        Message::User { content, .. } => OpenAIMessage::text("user", content.clone()),
        Message::Assistant {
            content,
            tool_calls,
            ..
        } => {
            let calls: Vec<OpenAIToolCall> = tool_calls
                .iter()
                .map(|call| OpenAIToolCall {
                    id: call.id.clone(),
                    call_type: "function".to_string(),
                    function: OpenAIFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments_json(),
                    },
                })
                .collect();

            OpenAIMessage {
                role: "assistant".to_string(),
                content: content.clone().filter(|c| !c.is_empty()),
                tool_calls: (!calls.is_empty()).then_some(calls),
                tool_call_id: None,
            }
        }
        Message::Tool {
            tool_call_id,
            content,
            ..
        } => OpenAIMessage {
            role: "tool".to_string(),
            content: Some(content.clone()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        },
    }
}

/// Parse one SSE data payload into provider events
pub(crate) fn parse_chunk(data: &str) -> Vec<ProviderEvent> {
    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(_) => return vec![ProviderEvent::Malformed(data.to_string())],
    };

    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            events.push(ProviderEvent::TextDelta(content));
        }

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            events.push(ProviderEvent::ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            });
        }

        if let Some(reason) = choice.finish_reason {
            events.push(ProviderEvent::Finish(reason));
        }
    }

    if let Some(usage) = chunk.usage {
        events.push(ProviderEvent::Usage(Usage {
            input: usage.prompt_tokens,
            output: usage.completion_tokens,
        }));
    }

    events
}

fn create_stream(
    mut event_source: EventSource,
    first: Option<Event>,
) -> impl futures::Stream<Item = Result<ProviderEvent>> {
    stream! {
        let mut pending = first;
        loop {
            let next = match pending.take() {
                Some(event) => Some(Ok(event)),
                None => event_source.next().await,
            };
            let Some(next) = next else { break };

            match next {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data.trim() == "[DONE]" {
                        break;
                    }
                    for event in parse_chunk(&msg.data) {
                        yield Ok(event);
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    yield Err(map_eventsource_error(e).await);
                    break;
                }
            }
        }
        event_source.close();
    }
}

async fn map_eventsource_error(error: reqwest_eventsource::Error) -> Error {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            status_error(status.as_u16(), &body, retry_after)
        }
        reqwest_eventsource::Error::Transport(e) => Error::Http(e),
        other => Error::Sse(other.to_string()),
    }
}

fn status_error(status: u16, body: &str, retry_after: Option<u64>) -> Error {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        401 | 403 => Error::Auth(message),
        429 => Error::RateLimited { retry_after },
        _ => Error::api(status, message),
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAIMessage {
    fn text(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Tool, ToolCallRequest};
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let model = Model::openai_compatible("gpt-test", "http://localhost:1234/v1");
        let mut context = Context::with_system("be brief");
        context.push(Message::user("hi"));
        context.push(Message::assistant(
            None,
            vec![ToolCallRequest::new("c1", "read_file", json!({"path": "a.rs"}))],
        ));
        context.push(Message::tool_result("c1", "read_file", "fn main() {}", false));
        context.tools.push(Tool::new("read_file", "Read a file", json!({"type": "object"})));

        let body = serde_json::to_value(build_request(&model, &context)).unwrap();
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["stream"], true);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["content"], serde_json::Value::Null);
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            "{\"path\":\"a.rs\"}"
        );
        assert_eq!(body["messages"][3]["tool_call_id"], "c1");
    }

    #[test]
    fn test_request_without_tools_omits_tool_choice() {
        let model = Model::openai_compatible("m", "http://x");
        let body = serde_json::to_value(build_request(&model, &Context::default())).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn test_parse_text_chunk() {
        let events = parse_chunk(r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#);
        assert_eq!(events, vec![ProviderEvent::TextDelta("Hi".into())]);
    }

    #[test]
    fn test_parse_tool_call_chunk() {
        let events = parse_chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_x","function":{"name":"grep_search","arguments":"{\"pat"}}]},"finish_reason":null}]}"#,
        );
        assert_eq!(
            events,
            vec![ProviderEvent::ToolCallDelta {
                index: 1,
                id: Some("call_x".into()),
                name: Some("grep_search".into()),
                arguments: "{\"pat".into(),
            }]
        );
    }

    #[test]
    fn test_parse_finish_and_usage() {
        let events = parse_chunk(
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":10,"completion_tokens":4}}"#,
        );
        assert_eq!(events[0], ProviderEvent::Finish("tool_calls".into()));
        assert_eq!(
            events[1],
            ProviderEvent::Usage(Usage {
                input: 10,
                output: 4
            })
        );
    }

    #[test]
    fn test_parse_malformed_chunk() {
        let events = parse_chunk("{not json");
        assert!(matches!(events[0], ProviderEvent::Malformed(_)));
    }

    #[test]
    fn test_status_error_mapping() {
        let body = r#"{"error":{"message":"Incorrect API key provided"}}"#;
        match status_error(401, body, None) {
            Error::Auth(msg) => assert_eq!(msg, "Incorrect API key provided"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            status_error(429, "", Some(3)),
            Error::RateLimited { retry_after: Some(3) }
        ));
        assert!(status_error(502, "bad gateway", None).is_retryable());
    }
}
