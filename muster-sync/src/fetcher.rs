//! Conditional HTTP fetcher.
//!
//! One GET per call, with `If-None-Match` when a known ETag exists. Every
//! expected failure mode (non-2xx status, timeout, transport error) comes
//! back as [`FetchOutcome::Failed`] so a single bad file never aborts a
//! batch; the caller decides what a failure means.

use std::io::Read;
use std::time::Duration;

/// Per-request timeout applied to connect and to the overall call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Responses larger than this are rejected rather than read without bound.
/// Artifact definitions are small markdown files.
const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

/// Outcome of a single conditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// HTTP 304 — the resource matches the ETag we presented.
    Fresh,
    /// HTTP 2xx with a full body. `etag` is absent if the server omits it.
    Updated {
        body: Vec<u8>,
        etag: Option<String>,
    },
    /// Network error, timeout, or unexpected status. Non-fatal to the caller.
    Failed { detail: String },
}

/// Blocking HTTP fetcher with conditional-GET support.
pub struct Fetcher {
    agent: ureq::Agent,
}

impl Fetcher {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self { agent }
    }

    /// Fetch `url`, presenting `known_etag` via `If-None-Match` unless
    /// `force` is set or no ETag is known.
    ///
    /// Transport errors (timeouts included) get exactly one retry; sync is
    /// on-demand, so there is no backoff schedule.
    pub fn fetch(&self, url: &str, known_etag: Option<&str>, force: bool) -> FetchOutcome {
        let etag = if force { None } else { known_etag };

        match self.call(url, etag) {
            Ok(outcome) => outcome,
            Err(first) => {
                tracing::debug!("retrying {url} after transport error: {first}");
                match self.call(url, etag) {
                    Ok(outcome) => outcome,
                    Err(second) => FetchOutcome::Failed {
                        detail: format!("transport error: {second}"),
                    },
                }
            }
        }
    }

    /// One HTTP round-trip. `Err` carries a retryable transport failure;
    /// everything else is a definitive `FetchOutcome`.
    fn call(&self, url: &str, etag: Option<&str>) -> Result<FetchOutcome, ureq::Transport> {
        let mut request = self.agent.get(url);
        if let Some(etag) = etag {
            request = request.set("If-None-Match", etag);
        }

        match request.call() {
            Ok(response) => Ok(read_body(response)),
            Err(ureq::Error::Status(304, _)) => Ok(FetchOutcome::Fresh),
            Err(ureq::Error::Status(code, _)) => Ok(FetchOutcome::Failed {
                detail: format!("unexpected HTTP status {code}"),
            }),
            Err(ureq::Error::Transport(transport)) => Err(transport),
        }
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn read_body(response: ureq::Response) -> FetchOutcome {
    let etag = response.header("etag").map(str::to_owned);
    let mut body = Vec::new();
    let mut reader = response.into_reader().take(MAX_BODY_BYTES + 1);
    if let Err(e) = reader.read_to_end(&mut body) {
        return FetchOutcome::Failed {
            detail: format!("failed reading response body: {e}"),
        };
    }
    if body.len() as u64 > MAX_BODY_BYTES {
        return FetchOutcome::Failed {
            detail: format!("response body exceeds {MAX_BODY_BYTES} bytes"),
        };
    }
    FetchOutcome::Updated { body, etag }
}
