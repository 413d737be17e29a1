//! Shared HTTP plumbing for the adapters
//!
//! Status-code and transport-error translation into [`ProviderError`], quota
//! header parsing, and a line-oriented chunk reader that serves both SSE and
//! NDJSON streaming endpoints.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::error::{ProviderError, RateLimitDetails};
use super::traits::ChunkStream;

/// Longest error body excerpt carried into an error message
const BODY_EXCERPT_CHARS: usize = 200;

/// Longest `Retry-After` we honor (one week)
pub(crate) const MAX_RETRY_AFTER_SECS: u64 = 7 * 24 * 60 * 60;

/// Build an HTTP client that enforces a per-call timeout
pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("llm-router/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "HTTP client builder failed, using defaults");
            reqwest::Client::new()
        })
}

/// Translate a transport-level failure
pub(crate) fn classify_transport(provider: &str, err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::unavailable(provider, format!("Request timed out: {err}"))
    } else if err.is_connect() {
        ProviderError::unavailable(provider, format!("Cannot connect: {err}"))
    } else {
        ProviderError::request_failed(provider, err)
    }
}

/// Translate a non-success HTTP status
///
/// 401/403 are configuration problems, 429 is a quota problem, 408 and 5xx
/// are outages, and everything else is unexpected.
pub(crate) fn classify_status(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> ProviderError {
    let excerpt = excerpt(body);
    match status.as_u16() {
        401 | 403 => ProviderError::config(
            provider,
            format!("Authentication failed (HTTP {status}): {excerpt}"),
        ),
        429 => ProviderError::rate_limited(
            provider,
            format!("Rate limit exceeded (HTTP {status})"),
            rate_limit_details(headers),
        ),
        408 | 500..=599 => {
            ProviderError::unavailable(provider, format!("Server error HTTP {status}: {excerpt}"))
        }
        _ => ProviderError::other(provider, format!("HTTP {status}: {excerpt}")),
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_EXCERPT_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
        format!("{cut}...")
    }
}

// ============================================================================
// Quota headers
// ============================================================================

/// Quota fields carried in `X-RateLimit-*` headers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct HeaderQuota {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Convert a unix timestamp in seconds
pub(crate) fn unix_seconds(secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
}

/// Parse `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`
pub(crate) fn header_quota(headers: &HeaderMap) -> HeaderQuota {
    HeaderQuota {
        limit: header_u64(headers, "x-ratelimit-limit"),
        remaining: header_u64(headers, "x-ratelimit-remaining"),
        reset_at: header_u64(headers, "x-ratelimit-reset").and_then(unix_seconds),
    }
}

/// Parse a `Retry-After` header given in seconds
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_u64(headers, "retry-after").map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)))
}

fn rate_limit_details(headers: &HeaderMap) -> RateLimitDetails {
    let quota = header_quota(headers);
    RateLimitDetails {
        retry_after: retry_after(headers),
        limit: quota.limit,
        remaining: Some(0),
        reset_at: quota.reset_at,
        upgrade_url: None,
    }
}

// ============================================================================
// Line streaming
// ============================================================================

/// What a single stream line means to the adapter
pub(crate) enum LineEvent {
    /// Text to hand to the caller
    Chunk(String),
    /// Nothing to emit (keep-alive, metadata, empty delta)
    Skip,
    /// The vendor signalled the end of the response
    Done,
    /// The vendor reported an error in-band
    Fail(ProviderError),
}

/// Payload of an SSE `data:` line
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Translate an `error` member carried inside a stream payload
///
/// Understands a bare string as well as the `{code, status, message}` object
/// Gemini sends and the `{type, code, message}` object of OpenAI-style
/// servers. Returns `None` when the payload carries no error.
pub(crate) fn in_band_error(provider: &str, payload: &Value) -> Option<ProviderError> {
    let error = payload.get("error").filter(|e| !e.is_null())?;
    if let Some(message) = error.as_str() {
        return Some(ProviderError::other(provider, format!("Stream error: {message}")));
    }

    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unspecified failure");
    let message = format!("Stream error: {message}");
    let code = error
        .get("code")
        .and_then(|c| c.as_u64().or_else(|| c.as_str().and_then(|s| s.parse().ok())));
    let label = ["status", "type", "code"]
        .iter()
        .filter_map(|k| error.get(*k).and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|n| label.contains(n));

    let error = match code {
        Some(401 | 403) => ProviderError::config(provider, message),
        Some(429) => ProviderError::rate_limited(provider, message, RateLimitDetails::default().with_remaining(0)),
        Some(408 | 500..=599) => ProviderError::unavailable(provider, message),
        _ if mentions(&["unauthenticated", "permission_denied", "authentication", "invalid_api_key"]) => {
            ProviderError::config(provider, message)
        }
        _ if mentions(&["resource_exhausted", "rate_limit", "insufficient_quota"]) => {
            ProviderError::rate_limited(provider, message, RateLimitDetails::default().with_remaining(0))
        }
        _ if mentions(&["unavailable", "overloaded", "server_error", "internal", "deadline_exceeded"]) => {
            ProviderError::unavailable(provider, message)
        }
        _ => ProviderError::other(provider, message),
    };
    Some(error)
}

/// Turn a line-delimited HTTP body into a chunk stream
///
/// A reader task splits the body on newlines and feeds each line through
/// `parse`. Dropping the returned stream stops the reader at its next send.
pub(crate) fn line_stream<F>(provider: &str, response: reqwest::Response, mut parse: F) -> ChunkStream
where
    F: FnMut(&str) -> LineEvent + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    let provider = provider.to_string();
    let mut body = response.bytes_stream();

    tokio::spawn(async move {
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);

                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match parse(line) {
                            LineEvent::Chunk(text) => {
                                if tx.send(Ok(text)).await.is_err() {
                                    // Receiver dropped, stop reading
                                    return;
                                }
                            }
                            LineEvent::Skip => {}
                            LineEvent::Done => return,
                            LineEvent::Fail(err) => {
                                let _ = tx.send(Err(err)).await;
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(classify_transport(&provider, &e))).await;
                    return;
                }
            }
        }

        // Body ended without a trailing newline
        let tail = String::from_utf8_lossy(&buffer);
        let tail = tail.trim();
        if !tail.is_empty() {
            match parse(tail) {
                LineEvent::Chunk(text) => {
                    let _ = tx.send(Ok(text)).await;
                }
                LineEvent::Fail(err) => {
                    let _ = tx.send(Err(err)).await;
                }
                LineEvent::Skip | LineEvent::Done => {}
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}
