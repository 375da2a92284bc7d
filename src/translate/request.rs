use tracing::debug;

use crate::config::TokenLimits;
use crate::protocol::anthropic::{
    ContentBlock, InboundMessage, MessageContent, MessagesRequest, Role, ToolChoice, ToolDefinition,
};
use crate::protocol::openai_chat::{
    ChatCompletionRequest, ChatMessage, ChatStreamOptions, ChatTool, ChatToolChoice,
    ChatToolFunction,
};
use crate::routing::ModelRouter;

use super::content::{
    normalize_assistant_content, normalize_system, normalize_tool_result, normalize_user_content,
};

/// Translate a Messages request into a Chat Completions request.
///
/// Total: malformed dynamic fields degrade to empty or placeholder values and
/// the input is left untouched.
#[must_use]
pub fn translate_request(
    request: &MessagesRequest,
    router: &ModelRouter,
    limits: &TokenLimits,
) -> ChatCompletionRequest {
    let stream = request.is_stream();
    ChatCompletionRequest {
        model: router.route(&request.model),
        messages: translate_messages(request),
        tools: translate_tools(request.tools.as_deref()),
        tool_choice: request.tool_choice.as_ref().map(translate_tool_choice),
        max_tokens: limits.clamp(request.max_tokens),
        stop: request.stop_sequences.clone(),
        temperature: request.temperature,
        top_p: request.top_p,
        stream,
        stream_options: stream.then_some(ChatStreamOptions {
            include_usage: true,
        }),
    }
}

fn translate_messages(request: &MessagesRequest) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system {
        let text = normalize_system(system);
        if !text.is_empty() {
            out.push(ChatMessage::system(text));
        }
    }

    let messages = &request.messages;
    let mut i = 0;
    while i < messages.len() {
        let msg = &messages[i];
        match msg.role {
            Role::User => {
                out.push(ChatMessage::user(
                    msg.content.as_ref().and_then(normalize_user_content),
                ));
            }
            Role::Assistant => {
                let (text, tool_calls) = msg
                    .content
                    .as_ref()
                    .map(normalize_assistant_content)
                    .unwrap_or_default();
                out.push(ChatMessage::assistant(text, tool_calls));

                if let Some(next) = messages.get(i + 1).filter(|next| carries_tool_results(next)) {
                    expand_tool_results(next, &mut out);
                    i += 1;
                }
            }
            Role::Other => debug!(index = i, "skipping message with unsupported role"),
        }
        i += 1;
    }
    out
}

fn carries_tool_results(msg: &InboundMessage) -> bool {
    msg.role == Role::User
        && matches!(
            &msg.content,
            Some(MessageContent::Blocks(blocks)) if blocks.iter().any(ContentBlock::is_tool_result)
        )
}

fn expand_tool_results(msg: &InboundMessage, out: &mut Vec<ChatMessage>) {
    let Some(content) = &msg.content else {
        return;
    };
    for block in content.blocks() {
        if let ContentBlock::ToolResult {
            tool_use_id,
            content,
        } = block
        {
            out.push(ChatMessage::tool(
                tool_use_id.clone(),
                normalize_tool_result(content.as_ref()),
            ));
        }
    }
}

fn translate_tools(tools: Option<&[ToolDefinition]>) -> Option<Vec<ChatTool>> {
    let converted: Vec<ChatTool> = tools?
        .iter()
        .filter(|tool| !tool.name.is_empty())
        .map(|tool| ChatTool {
            type_: "function".to_string(),
            function: ChatToolFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        })
        .collect();
    (!converted.is_empty()).then_some(converted)
}

fn translate_tool_choice(choice: &ToolChoice) -> ChatToolChoice {
    match choice {
        ToolChoice::Tool { name } if !name.is_empty() => ChatToolChoice::forced(name.clone()),
        _ => ChatToolChoice::auto(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelsConfig;
    use crate::protocol::openai_chat::ChatRole;
    use serde_json::{json, Value};

    fn translate(value: Value) -> ChatCompletionRequest {
        let request: MessagesRequest = serde_json::from_value(value).unwrap();
        let router = ModelRouter::new(&ModelsConfig::default());
        translate_request(&request, &router, &TokenLimits::default())
    }

    #[test]
    fn test_plain_turns_round_trip() {
        let out = translate(json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 1024,
            "system": "You are helpful.",
            "messages": [
                {"role": "user", "content": "Hello"},
                {"role": "assistant", "content": "Hi there"},
                {"role": "user", "content": "Bye"}
            ]
        }));
        assert_eq!(out.model, "gpt-4o");
        assert_eq!(out.max_tokens, 1024);
        let roles: Vec<ChatRole> = out.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                ChatRole::System,
                ChatRole::User,
                ChatRole::Assistant,
                ChatRole::User
            ]
        );
        assert_eq!(out.messages[1].content.as_deref(), Some("Hello"));
        assert_eq!(out.messages[2].content.as_deref(), Some("Hi there"));
        assert!(!out.stream);
        assert!(out.stream_options.is_none());
    }

    #[test]
    fn test_blank_system_is_omitted() {
        let out = translate(json!({
            "model": "gpt-4o", "max_tokens": 10, "system": "   ",
            "messages": [{"role": "user", "content": "x"}]
        }));
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].role, ChatRole::User);
    }

    #[test]
    fn test_max_tokens_clamped() {
        let low = translate(json!({"model": "m", "max_tokens": -50, "messages": []}));
        assert_eq!(low.max_tokens, 100);
        let high = translate(json!({"model": "m", "max_tokens": 100000, "messages": []}));
        assert_eq!(high.max_tokens, 4096);
    }

    #[test]
    fn test_tool_results_expand_into_tool_messages() {
        let out = translate(json!({
            "model": "claude-3-opus",
            "max_tokens": 500,
            "messages": [
                {"role": "user", "content": "weather in Paris and Rome?"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "Checking."},
                    {"type": "tool_use", "id": "t1", "name": "weather", "input": {"city": "Paris"}},
                    {"type": "tool_use", "id": "t2", "name": "weather", "input": {"city": "Rome"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "sunny"},
                    {"type": "tool_result", "tool_use_id": "t2", "content": [{"type": "text", "text": "rainy"}]},
                    {"type": "text", "text": "dropped with the expansion"}
                ]},
                {"role": "user", "content": "thanks"}
            ]
        }));
        assert_eq!(out.messages.len(), 5);
        let assistant = &out.messages[1];
        assert_eq!(assistant.content.as_deref(), Some("Checking."));
        assert_eq!(assistant.tool_calls.as_ref().map(Vec::len), Some(2));

        assert_eq!(out.messages[2].role, ChatRole::Tool);
        assert_eq!(out.messages[2].tool_call_id.as_deref(), Some("t1"));
        assert_eq!(out.messages[2].content.as_deref(), Some("sunny"));
        assert_eq!(out.messages[3].tool_call_id.as_deref(), Some("t2"));
        assert_eq!(out.messages[3].content.as_deref(), Some("rainy"));
        assert_eq!(out.messages[4].content.as_deref(), Some("thanks"));
    }

    #[test]
    fn test_tool_results_without_preceding_assistant_stay_user() {
        let out = translate(json!({
            "model": "m", "max_tokens": 100,
            "messages": [
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "orphan"}
                ]}
            ]
        }));
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].role, ChatRole::User);
        assert_eq!(out.messages[0].content.as_deref(), Some("[]"));
    }

    #[test]
    fn test_unknown_roles_are_skipped() {
        let out = translate(json!({
            "model": "m", "max_tokens": 100,
            "messages": [
                {"role": "developer", "content": "ignored"},
                {"role": "user", "content": "kept"}
            ]
        }));
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].content.as_deref(), Some("kept"));
    }

    #[test]
    fn test_tools_and_forced_choice() {
        let out = translate(json!({
            "model": "m", "max_tokens": 100,
            "messages": [{"role": "user", "content": "x"}],
            "tools": [
                {"name": "get_weather", "description": "Weather", "input_schema": {"type": "object"}},
                {"name": "", "input_schema": {}}
            ],
            "tool_choice": {"type": "tool", "name": "get_weather"}
        }));
        let tools = out.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].function.name, "get_weather");
        assert_eq!(tools[0].function.parameters, json!({"type": "object"}));
        assert_eq!(
            out.tool_choice,
            Some(ChatToolChoice::forced("get_weather".into()))
        );
    }

    #[test]
    fn test_tool_choice_fallbacks() {
        let any = translate(json!({
            "model": "m", "max_tokens": 100, "messages": [],
            "tool_choice": {"type": "any"}
        }));
        assert_eq!(any.tool_choice, Some(ChatToolChoice::auto()));

        let nameless = translate(json!({
            "model": "m", "max_tokens": 100, "messages": [],
            "tool_choice": {"type": "tool", "name": ""}
        }));
        assert_eq!(nameless.tool_choice, Some(ChatToolChoice::auto()));

        let absent = translate(json!({"model": "m", "max_tokens": 100, "messages": []}));
        assert!(absent.tool_choice.is_none());
    }

    #[test]
    fn test_all_nameless_tools_omit_field() {
        let out = translate(json!({
            "model": "m", "max_tokens": 100, "messages": [],
            "tools": [{"name": ""}]
        }));
        assert!(out.tools.is_none());
    }

    #[test]
    fn test_streaming_requests_usage() {
        let out = translate(json!({
            "model": "m", "max_tokens": 100, "messages": [], "stream": true,
            "stop_sequences": ["END"], "temperature": 0.2, "top_p": 0.9
        }));
        assert!(out.stream);
        assert_eq!(
            out.stream_options,
            Some(ChatStreamOptions {
                include_usage: true
            })
        );
        assert_eq!(out.stop, Some(vec!["END".to_string()]));
        assert_eq!(out.temperature, Some(0.2));
        assert_eq!(out.top_p, Some(0.9));
    }

    #[test]
    fn test_translation_does_not_mutate_input() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-haiku", "max_tokens": 5,
            "messages": [{"role": "user", "content": "x"}]
        }))
        .unwrap();
        let router = ModelRouter::new(&ModelsConfig::default());
        let _ = translate_request(&request, &router, &TokenLimits::default());
        assert_eq!(request.model, "claude-haiku");
        assert_eq!(request.max_tokens, 5);
    }
}
