//! Typed HTTP client for module services.
//!
//! `ModuleClient` wraps one `reqwest::Client` and translates a stage
//! invocation into a single POST against the role's endpoint, with a
//! per-request timeout and a strict envelope parse.
//!
//! The client never retries: module services own their retry and
//! fallback policy, and report it through `debug.llmConversation`,
//! which the router surfaces verbatim. A failed call is a failed
//! stage.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;

use loom_domain::error::{Error, Result};
use loom_domain::modules::{ModuleEnvelope, ModuleOutput};
use loom_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maximum body length echoed into HTTP error messages.
const BODY_SNIPPET_LEN: usize = 300;

/// A typed RPC client shared by all pipeline stages.
///
/// Created once at startup and reused; the underlying `reqwest::Client`
/// maintains a connection pool across module calls.
#[derive(Debug, Clone)]
pub struct ModuleClient {
    http: Client,
    timeout: Duration,
}

impl ModuleClient {
    /// Build a client with the configured per-request timeout.
    pub fn new(request_timeout_ms: u64) -> Result<Self> {
        let timeout = Duration::from_millis(request_timeout_ms);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { http, timeout })
    }

    /// The configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `body` to `{base_url}{path}` and strictly parse the module
    /// envelope for output schema `T`.
    ///
    /// Any transport, HTTP, or schema failure is an error for the
    /// calling stage — there is no retry and no coercion.
    pub async fn invoke<T: ModuleOutput>(
        &self,
        base_url: &str,
        path: &str,
        request_id: &str,
        body: &Value,
    ) -> Result<ModuleEnvelope<T>> {
        let role = T::ROLE;
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        let endpoint = format!("POST {path}");

        let start = Instant::now();
        let result = self
            .http
            .post(&url)
            .header("X-Request-Id", request_id)
            .json(body)
            .send()
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                TraceEvent::ModuleCall {
                    role: role.as_str().to_owned(),
                    endpoint: endpoint.clone(),
                    status: 0,
                    duration_ms,
                }
                .emit();
                return Err(if e.is_timeout() {
                    Error::Timeout(format!(
                        "{role} {endpoint} did not respond within {} ms",
                        self.timeout.as_millis()
                    ))
                } else {
                    Error::Network(format!("{role} {endpoint}: {e}"))
                });
            }
        };

        let status = resp.status();
        TraceEvent::ModuleCall {
            role: role.as_str().to_owned(),
            endpoint,
            status: status.as_u16(),
            duration_ms,
        }
        .emit();

        let text = resp
            .text()
            .await
            .map_err(|e| Error::Network(format!("{role} reading body: {e}")))?;

        if !status.is_success() {
            return Err(Error::Http {
                role,
                status: status.as_u16(),
                body_snippet: snippet(&text),
            });
        }

        serde_json::from_str::<ModuleEnvelope<T>>(&text).map_err(|e| Error::Schema {
            role,
            issue: format!("{e}; body: {}", snippet(&text)),
        })
    }
}

/// First [`BODY_SNIPPET_LEN`] characters of a response body, for error
/// messages.
fn snippet(body: &str) -> String {
    if body.chars().count() <= BODY_SNIPPET_LEN {
        body.to_owned()
    } else {
        let cut: String = body.chars().take(BODY_SNIPPET_LEN).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_truncates_long_bodies() {
        let long = "x".repeat(1000);
        let cut = snippet(&long);
        assert!(cut.chars().count() <= BODY_SNIPPET_LEN + 1);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn snippet_passes_short_bodies_through() {
        assert_eq!(snippet("{\"ok\":true}"), "{\"ok\":true}");
    }
}
