use bytes::Bytes;
use chat_proxy::providers::{
    Provider, Role,
    stream::{DeltaShape, SseRecord, StreamAccumulator, frame_line, parse_image_urls,
             parse_sse_line, relay_sse},
};
use futures::stream::TryStreamExt;
use serde_json::json;
use std::convert::Infallible;

/// Tests for the stream relay and the SSE payload normalizer.

async fn relay(chunks: Vec<&str>) -> String {
    let upstream = futures::stream::iter(
        chunks
            .into_iter()
            .map(|c| Ok::<_, Infallible>(Bytes::from(c.to_string())))
            .collect::<Vec<_>>(),
    );

    let collected: Vec<Bytes> = relay_sse(upstream).try_collect().await.unwrap();
    collected
        .iter()
        .map(|b| String::from_utf8_lossy(b).to_string())
        .collect()
}

#[test]
fn frame_line_passes_sse_lines_through() {
    assert_eq!(
        frame_line("data: {\"x\":1}").as_deref(),
        Some("data: {\"x\":1}\n\n")
    );
}

#[test]
fn frame_line_wraps_raw_lines() {
    assert_eq!(frame_line("{\"x\":1}").as_deref(), Some("data: {\"x\":1}\n\n"));
}

#[test]
fn frame_line_drops_blank_lines() {
    assert_eq!(frame_line(""), None);
    assert_eq!(frame_line("   \r"), None);
}

#[tokio::test]
async fn relay_reframes_mixed_upstream_formats() {
    let out = relay(vec!["data: {\"a\":1}\n{\"b\":2}\n\n"]).await;
    assert_eq!(out, "data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
}

#[tokio::test]
async fn relay_handles_lines_split_across_chunks() {
    let out = relay(vec!["data: {\"a\"", ":1}\nda", "ta: [DONE]\n"]).await;
    assert_eq!(out, "data: {\"a\":1}\n\ndata: [DONE]\n\n");
}

#[tokio::test]
async fn relay_flushes_unterminated_trailing_buffer() {
    let out = relay(vec!["data: {\"a\":1}\n", "{\"tail\":true}"]).await;
    assert_eq!(out, "data: {\"a\":1}\n\ndata: {\"tail\":true}\n\n");
}

#[tokio::test]
async fn relay_of_empty_upstream_is_empty() {
    let out = relay(vec![]).await;
    assert!(out.is_empty());
}

#[test]
fn parse_openai_delta_content() {
    let line = format!(
        "data: {}",
        json!({"choices": [{"delta": {"content": "Hello"}}]})
    );
    match parse_sse_line(DeltaShape::OpenAiChoices, &line) {
        SseRecord::Delta(delta) => {
            assert_eq!(delta.content, "Hello");
            assert!(delta.reasoning.is_empty());
        }
        other => panic!("expected delta, got {:?}", other),
    }
}

#[test]
fn parse_openai_reasoning_channel_is_separate() {
    let line = format!(
        "data: {}",
        json!({"choices": [{"delta": {"reasoning_content": "thinking..."}}]})
    );
    match parse_sse_line(DeltaShape::OpenAiChoices, &line) {
        SseRecord::Delta(delta) => {
            assert!(delta.content.is_empty());
            assert_eq!(delta.reasoning, "thinking...");
        }
        other => panic!("expected delta, got {:?}", other),
    }
}

#[test]
fn parse_anthropic_content_block_delta() {
    let line = format!(
        "data: {}",
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}})
    );
    match parse_sse_line(DeltaShape::AnthropicBlocks, &line) {
        SseRecord::Delta(delta) => assert_eq!(delta.content, "Hi"),
        other => panic!("expected delta, got {:?}", other),
    }
}

#[test]
fn parse_anthropic_skips_non_delta_records() {
    let line = format!(
        "data: {}",
        json!({"type": "message_start", "message": {"id": "msg_1"}})
    );
    assert_eq!(
        parse_sse_line(DeltaShape::AnthropicBlocks, &line),
        SseRecord::Skip
    );
}

#[test]
fn parse_done_sentinel() {
    assert_eq!(
        parse_sse_line(DeltaShape::OpenAiChoices, "data: [DONE]"),
        SseRecord::Done
    );
}

#[test]
fn malformed_json_is_skipped_not_fatal() {
    assert_eq!(
        parse_sse_line(DeltaShape::OpenAiChoices, "data: {not json"),
        SseRecord::Skip
    );
}

#[test]
fn accumulator_survives_malformed_lines() {
    let mut acc = StreamAccumulator::new(Provider::OpenAi, "gpt-4");

    acc.push_line(&format!(
        "data: {}",
        json!({"choices": [{"delta": {"content": "Hello"}}]})
    ));
    acc.push_line("data: {broken");
    acc.push_line(&format!(
        "data: {}",
        json!({"choices": [{"delta": {"content": " world"}}]})
    ));
    acc.push_line("data: [DONE]");

    assert!(acc.is_done());
    let message = acc.finish();
    assert_eq!(message.role, Role::Assistant);
    assert_eq!(message.content, "Hello world");
    assert!(message.thinking_process.is_none());
}

#[test]
fn accumulator_ignores_input_after_done() {
    let mut acc = StreamAccumulator::new(Provider::OpenAi, "gpt-4");
    assert!(acc.push_line(&format!(
        "data: {}",
        json!({"choices": [{"delta": {"content": "Hi"}}]})
    )));
    assert!(!acc.push_line("data: [DONE]"));
    assert!(!acc.push_line(&format!(
        "data: {}",
        json!({"choices": [{"delta": {"content": "late"}}]})
    )));
    assert_eq!(acc.finish().content, "Hi");
}

#[test]
fn reasoning_model_accumulates_two_channels() {
    let mut acc = StreamAccumulator::new(Provider::SiliconFlow, "deepseek-ai/DeepSeek-R1");

    acc.push_line(&format!(
        "data: {}",
        json!({"choices": [{"delta": {"reasoning_content": "consider the question"}}]})
    ));
    acc.push_line(&format!(
        "data: {}",
        json!({"choices": [{"delta": {"content": "The answer is 4."}}]})
    ));
    acc.push_line("data: [DONE]");

    let message = acc.finish();
    assert_eq!(message.content, "The answer is 4.");
    assert_eq!(
        message.thinking_process.as_deref(),
        Some("consider the question")
    );
    // DeepSeek-R1 keeps the trace expanded after completion
    assert_eq!(message.show_thinking, Some(true));
}

#[test]
fn qwen_thinking_collapses_on_completion() {
    let mut acc =
        StreamAccumulator::new(Provider::SiliconFlow, "Qwen/Qwen3-235B-A22B-Thinking-2507");

    acc.push_line(&format!(
        "data: {}",
        json!({"choices": [{"delta": {"reasoning_content": "hmm"}}]})
    ));

    // Expanded while the stream is live
    assert_eq!(acc.snapshot().show_thinking, Some(true));

    acc.push_line("data: [DONE]");
    assert_eq!(acc.finish().show_thinking, Some(false));
}

#[test]
fn non_reasoning_model_discards_reasoning_channel() {
    let mut acc = StreamAccumulator::new(Provider::SiliconFlow, "Qwen/Qwen2-7B-Instruct");

    acc.push_line(&format!(
        "data: {}",
        json!({"choices": [{"delta": {"content": "plain", "reasoning_content": "hidden"}}]})
    ));
    acc.push_line("data: [DONE]");

    let message = acc.finish();
    assert_eq!(message.content, "plain");
    assert!(message.thinking_process.is_none());
}

#[test]
fn image_urls_projection() {
    let body = json!({"data": [{"url": "https://img/1.png"}, {"url": "https://img/2.png"}]});
    assert_eq!(
        parse_image_urls(&body),
        vec!["https://img/1.png", "https://img/2.png"]
    );
}

#[test]
fn image_urls_malformed_is_soft_failure() {
    assert!(parse_image_urls(&json!({"data": "oops"})).is_empty());
    assert!(parse_image_urls(&json!({"error": "denied"})).is_empty());
    assert!(parse_image_urls(&json!({"data": []})).is_empty());
}
