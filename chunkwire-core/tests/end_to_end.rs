use std::time::Duration;

use bytes::Bytes;
use chunkwire_core::decoder::StreamDecoder;
use chunkwire_core::transport::{from_async_read, from_child_stdout, from_chunks};
use chunkwire_core::{
    ByteStream, CancellationReason, Chunk, DecoderRegistry, StreamError, StreamSession,
    TimeoutPolicy, Usage,
};
use futures_util::StreamExt;

const SSE_BODY: &str = concat!(
    ": keep-alive\n\n",
    "id: 1\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Héllo\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\", wörld\"}}]}\r\n\r\n",
    "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":8,\"completion_tokens\":4}}\n\n",
    "data: [DONE]\n\n",
);

const NDJSON_BODY: &str = concat!(
    "{\"type\":\"system\",\"subtype\":\"init\"}\n",
    "{\"type\":\"stream_event\",\"event\":{\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":20,\"output_tokens\":1}}}}\n",
    "{\"type\":\"stream_event\",\"event\":{\"type\":\"content_block_delta\",\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"plan\"}}}\n",
    "{\"type\":\"stream_event\",\"event\":{\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Done ✓\"}}}\n",
    "{\"type\":\"stream_event\",\"event\":{\"type\":\"message_delta\",\"usage\":{\"output_tokens\":9}}}\n",
    "{\"type\":\"result\",\"subtype\":\"success\",\"usage\":{\"input_tokens\":20,\"output_tokens\":9}}\n",
);

/// Splits `body` into pieces of `size` bytes, ignoring char boundaries.
fn split(body: &str, size: usize) -> ByteStream {
    let pieces = body
        .as_bytes()
        .chunks(size)
        .map(Bytes::copy_from_slice)
        .collect::<Vec<_>>();
    from_chunks(pieces)
}

async fn decode_all(provider: &str, content_type: &str, input: ByteStream) -> Vec<Chunk> {
    let reg = DecoderRegistry::with_defaults();
    let decoder = reg.select(provider, content_type).unwrap();
    let mut stream = decoder.decode(input);
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        out.push(item.unwrap());
    }
    out
}

#[tokio::test]
async fn hi_then_done_is_two_chunks() {
    let chunks = decode_all(
        "zai",
        "text/event-stream",
        from_chunks(vec![Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
        )]),
    )
    .await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].as_text_delta(), Some("Hi"));
    assert!(!chunks[0].is_complete);
    assert!(chunks[1].is_complete);
}

#[tokio::test]
async fn sse_output_does_not_depend_on_read_sizes() {
    let whole = decode_all("zai", "text/event-stream", split(SSE_BODY, SSE_BODY.len())).await;
    for size in [1, 2, 3, 7, 64] {
        let pieces = decode_all("zai", "text/event-stream", split(SSE_BODY, size)).await;
        assert_eq!(pieces, whole, "read size {size}");
    }
    assert_eq!(whole.len(), 3);
    assert_eq!(whole[0].as_text_delta(), Some("Héllo"));
    assert_eq!(whole[1].as_text_delta(), Some(", wörld"));
    assert_eq!(whole[2].final_usage, Some(Usage::new(8, 4)));
}

#[tokio::test]
async fn ndjson_output_does_not_depend_on_read_sizes() {
    let whole = decode_all("claude-code", "", split(NDJSON_BODY, NDJSON_BODY.len())).await;
    for size in [1, 5, 13] {
        let pieces = decode_all("claude-code", "", split(NDJSON_BODY, size)).await;
        assert_eq!(pieces, whole, "read size {size}");
    }
    assert_eq!(
        whole,
        vec![
            Chunk::reasoning("plan"),
            Chunk::content("Done ✓"),
            Chunk::terminal(None, Some(Usage::new(20, 9))),
        ]
    );
}

#[tokio::test]
async fn every_sequence_has_exactly_one_terminal_chunk_at_the_end() {
    let bodies: [(&str, &str, &str); 4] = [
        ("zai", "text/event-stream", SSE_BODY),
        ("zai", "text/event-stream", "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n"),
        ("claude-code", "", NDJSON_BODY),
        ("claude-code", "", "{\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"y\"}}"),
    ];
    for (provider, ct, body) in bodies {
        let chunks = decode_all(provider, ct, split(body, 4)).await;
        let terminals = chunks.iter().filter(|c| c.is_complete).count();
        assert_eq!(terminals, 1, "{provider}: {body}");
        assert!(chunks.last().unwrap().is_complete);
        assert!(
            chunks[..chunks.len() - 1]
                .iter()
                .all(|c| c.final_usage.is_none())
        );
    }
}

#[tokio::test]
async fn session_over_async_reader() {
    let reg = DecoderRegistry::with_defaults();
    let decoder = reg.select("openrouter", "text/event-stream").unwrap();
    let report = StreamSession::new(decoder, "openrouter")
        .collect(from_async_read(SSE_BODY.as_bytes(), 16))
        .await;
    let outcome = report.into_result().unwrap();
    assert_eq!(outcome.text, "Héllo, wörld");
    assert_eq!(outcome.usage, Some(Usage::new(8, 4)));
    assert_eq!(outcome.chunks, 3);
}

#[tokio::test]
async fn oversized_event_fails_session() {
    let reg = DecoderRegistry::with_options(
        chunkwire_core::decoders::openai_compat::OpenAiCompatOptions {
            max_event_bytes: 128,
            ..Default::default()
        },
        Default::default(),
    );
    let decoder = reg.select("zai", "text/event-stream").unwrap();
    let body = format!("data: {}\n\n", "z".repeat(4096));
    let report = StreamSession::new(decoder, "zai")
        .collect(split(&body, 512))
        .await;
    assert!(matches!(
        report.error,
        Some(StreamError::FrameTooLarge { .. })
    ));
    assert_eq!(report.diagnostics.error_kind(), Some("frame_too_large"));
    assert_eq!(report.diagnostics.cancellation_reason(), None);
}

#[tokio::test(start_paused = true)]
async fn total_budget_bounds_a_slow_but_steady_stream() {
    let reg = DecoderRegistry::with_defaults();
    let decoder = reg.select("zai", "text/event-stream").unwrap();

    // One chunk every 5s; never finishes on its own.
    let steady = futures_util::stream::unfold(0u32, |n| async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let frame = format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{n}\"}}}}]}}\n\n");
        Some((Ok::<_, std::io::Error>(Bytes::from(frame)), n + 1))
    });
    let policy = TimeoutPolicy::new(
        Duration::from_secs(10),
        Duration::from_secs(8),
        Duration::from_secs(22),
    )
    .unwrap();

    let report = StreamSession::new(decoder, "zai")
        .with_policy(policy)
        .collect(Box::pin(steady))
        .await;
    assert_eq!(
        report.diagnostics.cancellation_reason(),
        Some(CancellationReason::TotalStreamTimeout)
    );
    assert_eq!(report.outcome.text, "0123");
    assert_eq!(report.diagnostics.elapsed(), Duration::from_secs(22));
}

#[cfg(unix)]
#[tokio::test]
async fn decodes_subprocess_stdout() {
    use std::process::Stdio;

    let mut child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(format!("printf '%s' '{}'", NDJSON_BODY.replace('\'', "")))
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn sh");
    let stdout = child.stdout.take().expect("stdout");

    let reg = DecoderRegistry::with_defaults();
    let decoder = reg.select("claude-cli", "").unwrap();
    let report = StreamSession::new(decoder, "claude-cli")
        .with_policy(TimeoutPolicy::CLI_SUBPROCESS)
        .collect(from_child_stdout(stdout, 0))
        .await;
    child.wait().await.expect("wait");

    let outcome = report.into_result().unwrap();
    assert_eq!(outcome.text, "Done ✓");
    assert_eq!(outcome.reasoning, "plan");
    assert_eq!(outcome.usage, Some(Usage::new(20, 9)));
}
