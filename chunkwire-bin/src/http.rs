//! Opens the HTTP event stream for `fetch`. The core only adapts the body.

use chunkwire_core::{transport, ByteStream, CoreResult, StreamError};
use reqwest::Client;
use serde_json::Value;

/// An opened HTTP event stream.
pub struct HttpStream {
    pub content_type: Option<String>,
    pub body: ByteStream,
}

/// POSTs a JSON body and hands back the (unread) response body.
/// Non-success statuses become a [`StreamError::Vendor`] with a truncated body.
pub async fn post_json_stream(
    client: &Client,
    url: &str,
    body: &Value,
    headers: &[(&str, &str)],
) -> CoreResult<HttpStream> {
    let mut req = client
        .post(url)
        .json(body)
        .header("Accept", "text/event-stream");
    for (k, v) in headers {
        req = req.header(*k, *v);
    }

    let resp = req
        .send()
        .await
        .map_err(|e| StreamError::Other(anyhow::anyhow!("request to {url} failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(StreamError::Vendor {
            vendor: "http".into(),
            message: format!("status {}: {}", status.as_u16(), truncate(&text, 300)),
        });
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Ok(HttpStream {
        content_type,
        body: transport::from_response(resp),
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &s[..cut])
}
