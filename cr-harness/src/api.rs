//! Client for the coordinator's HTTP API.
//!
//! Every request carries [`DIGEST_HEADER`], the hex HMAC-SHA512 of the
//! request body keyed by the cluster secret. Services reject requests whose
//! digest does not match.

use std::time::Duration;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sha2::Sha512;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

/// Header carrying the request digest.
pub const DIGEST_HEADER: &str = "Clusterrunner-Message-Authentication-Digest";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type HmacSha512 = Hmac<Sha512>;

/// Hex HMAC-SHA512 of `body` keyed by `secret`.
pub fn message_digest(secret: &SecretString, body: &[u8]) -> HarnessResult<String> {
    let mut mac = HmacSha512::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| HarnessError::InvalidExpectation(format!("invalid secret: {e}")))?;
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Source of the coordinator's queue depth, polled while draining.
pub trait QueueProbe {
    /// Current depth. Must give up once `timeout` has elapsed.
    fn queue_depth(&self, timeout: Duration) -> HarnessResult<usize>;
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Blocking client bound to one service's base URL.
pub struct ClusterApiClient {
    base_url: String,
    secret: SecretString,
    agent: ureq::Agent,
}

impl std::fmt::Debug for ClusterApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterApiClient")
            .field("base_url", &self.base_url)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl ClusterApiClient {
    pub fn new(base_url: impl Into<String>, secret: SecretString) -> Self {
        Self::with_timeout(base_url, secret, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, secret: SecretString, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret,
            agent: build_agent(timeout),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` and parse the body as JSON.
    pub fn get_json(&self, path: &str) -> HarnessResult<Value> {
        self.get_json_with(&self.agent, path)
    }

    fn get_json_with(&self, agent: &ureq::Agent, path: &str) -> HarnessResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let digest = message_digest(&self.secret, b"")?;
        debug!(%url, "GET");

        let api_err = |message: String| HarnessError::Api {
            url: url.clone(),
            message,
        };
        let mut response = agent
            .get(&url)
            .header(DIGEST_HEADER, digest.as_str())
            .call()
            .map_err(|e| api_err(e.to_string()))?;
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| api_err(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| api_err(format!("invalid JSON: {e}")))
    }

    /// True when the service answers its root endpoint.
    pub fn is_healthy(&self) -> bool {
        self.get_json("/v1").is_ok()
    }

    /// Full response of the build status endpoint.
    pub fn get_build_status(&self, build_id: u64) -> HarnessResult<Value> {
        self.get_json(&format!("/v1/build/{build_id}"))
    }

    /// Builds currently queued or running on the coordinator.
    pub fn get_queue(&self) -> HarnessResult<Vec<Value>> {
        self.get_queue_with(&self.agent)
    }

    /// Like [`Self::get_queue`], but the request gives up after `timeout`
    /// instead of the client's default.
    pub fn get_queue_within(&self, timeout: Duration) -> HarnessResult<Vec<Value>> {
        self.get_queue_with(&build_agent(timeout))
    }

    fn get_queue_with(&self, agent: &ureq::Agent) -> HarnessResult<Vec<Value>> {
        let response = self.get_json_with(agent, "/v1/queue")?;
        match response.get("queue") {
            Some(Value::Array(queue)) => Ok(queue.clone()),
            _ => Err(HarnessError::Api {
                url: format!("{}/v1/queue", self.base_url),
                message: format!("response has no 'queue' array: {response}"),
            }),
        }
    }
}

impl QueueProbe for ClusterApiClient {
    fn queue_depth(&self, timeout: Duration) -> HarnessResult<usize> {
        self.get_queue_within(timeout).map(|queue| queue.len())
    }
}
