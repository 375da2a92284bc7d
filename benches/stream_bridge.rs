use criterion::{black_box, criterion_group, criterion_main, Criterion};
use messages_bridge::config::{ModelsConfig, TokenLimits};
use messages_bridge::protocol::anthropic::stream::encode_stream_event;
use messages_bridge::protocol::anthropic::MessagesRequest;
use messages_bridge::protocol::openai_chat::ChatCompletionChunk;
use messages_bridge::routing::ModelRouter;
use messages_bridge::stream::{SseParser, StreamBridge};
use messages_bridge::translate::translate_request;

fn sample_request() -> MessagesRequest {
    serde_json::from_value(serde_json::json!({
        "model": "claude-3-5-sonnet-20241022",
        "max_tokens": 1024,
        "system": "You are a helpful assistant",
        "messages": [
            {"role": "user", "content": "What is the weather in SF?"},
            {"role": "assistant", "content": [
                {"type": "tool_use", "id": "call_1", "name": "get_weather", "input": {"city": "SF"}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "call_1", "content": "{\"temp\":72}"}
            ]}
        ],
        "tools": [{
            "name": "get_weather",
            "description": "Get weather",
            "input_schema": {
                "type": "object",
                "properties": {"city": {"type": "string"}},
                "required": ["city"]
            }
        }]
    }))
    .expect("sample request")
}

fn sample_sse_body() -> String {
    let mut body = String::new();
    for word in ["The", " weather", " in", " SF", " is", " sunny", "."] {
        body.push_str(&format!(
            "data: {{\"id\":\"c1\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"{word}\"}}}}]}}\n\n"
        ));
    }
    body.push_str("data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_2\",\"type\":\"function\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"\"}}]}}]}\n\n");
    for fragment in ["{\\\"ci", "ty\\\":", "\\\"SF\\\"}"] {
        body.push_str(&format!(
            "data: {{\"id\":\"c1\",\"choices\":[{{\"index\":0,\"delta\":{{\"tool_calls\":[{{\"index\":0,\"function\":{{\"arguments\":\"{fragment}\"}}}}]}}}}]}}\n\n"
        ));
    }
    body.push_str("data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n");
    body.push_str("data: {\"id\":\"c1\",\"choices\":[],\"usage\":{\"prompt_tokens\":40,\"completion_tokens\":12,\"total_tokens\":52}}\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}

fn bench_translate(c: &mut Criterion) {
    let request = sample_request();
    let router = ModelRouter::new(&ModelsConfig::default());
    let limits = TokenLimits::default();
    c.bench_function("translate_request", |b| {
        b.iter(|| black_box(translate_request(black_box(&request), &router, &limits)));
    });
}

fn bench_stream_bridge(c: &mut Criterion) {
    let body = sample_sse_body();
    let chunks: Vec<ChatCompletionChunk> = SseParser::new()
        .feed(&body)
        .iter()
        .filter(|event| event.data != "[DONE]")
        .map(|event| serde_json::from_str(&event.data).expect("chunk"))
        .collect();

    c.bench_function("stream_bridge_events", |b| {
        b.iter(|| {
            let mut bridge = StreamBridge::new("msg_bench".to_string(), "claude".to_string());
            let mut produced = bridge.start().len();
            for chunk in &chunks {
                produced += black_box(bridge.push_chunk(black_box(chunk))).len();
            }
            produced += bridge.finish().len();
            black_box(produced);
        });
    });

    c.bench_function("stream_bridge_sse_end_to_end", |b| {
        b.iter(|| {
            let mut parser = SseParser::new();
            let mut bridge = StreamBridge::new("msg_bench".to_string(), "claude".to_string());
            let mut bytes = 0usize;
            for event in bridge.start() {
                bytes += encode_stream_event(&event).len();
            }
            for event in parser.feed(black_box(&body)) {
                if event.data == "[DONE]" {
                    break;
                }
                let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&event.data) else {
                    continue;
                };
                for out in bridge.push_chunk(&chunk) {
                    bytes += encode_stream_event(&out).len();
                }
            }
            for event in bridge.finish() {
                bytes += encode_stream_event(&event).len();
            }
            black_box(bytes);
        });
    });
}

criterion_group!(benches, bench_translate, bench_stream_bridge);
criterion_main!(benches);
