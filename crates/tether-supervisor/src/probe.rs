//! HTTP probes against the daemon's loopback API.
//!
//! The transport sits behind the [`DaemonApi`] trait so the health monitor
//! and lifecycle controller can be exercised against a scripted mock. The
//! real implementation is [`HttpApi`].
//!
//! Probe failures come in two flavors with different policy weight: an
//! *unreachable* daemon (timeout, refused connection) counts toward the
//! crash threshold, while an HTTP error response proves the daemon is
//! alive (overloaded, perhaps) and is only logged.

use async_trait::async_trait;

use tether_core::{Result, SupervisorConfig, SupervisorError, Telemetry};

/// Query parameters requesting the telemetry fields alongside readiness.
const STATE_FULL_QUERY: &[(&str, &str)] = &[
    ("with_control_mode", "true"),
    ("with_head_joints", "true"),
    ("with_body_yaw", "true"),
    ("with_antenna_positions", "true"),
];

// =============================================================================
// ProbeFailure
// =============================================================================

/// A failed probe, split by what it proves about the daemon.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeFailure {
    /// No timely response at all: timeout or connection failure.
    #[error("daemon unreachable: {0}")]
    Unreachable(String),

    /// The daemon answered with a non-success HTTP status. It is alive.
    #[error("daemon answered with HTTP {0}")]
    Status(u16),

    /// The daemon answered but the body could not be interpreted.
    #[error("malformed daemon response: {0}")]
    Malformed(String),
}

impl ProbeFailure {
    /// Returns true if this failure counts toward the crash threshold.
    ///
    /// Only the absence of a timely response does; an error *response* is
    /// an overloaded-but-alive daemon, not an unreachable one.
    #[must_use]
    pub const fn counts_toward_crash(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Result type for probe operations.
pub type ProbeResult<T> = std::result::Result<T, ProbeFailure>;

// =============================================================================
// DaemonApi
// =============================================================================

/// The supervisor's view of the daemon's HTTP API.
#[async_trait]
pub trait DaemonApi: Send + Sync + 'static {
    /// Liveness probe. `Ok` means the daemon answered with success.
    async fn liveness(&self) -> ProbeResult<()>;

    /// Readiness probe. `Ok(Some(telemetry))` once the control layer is
    /// initialized; `Ok(None)` while the HTTP server is up but control is
    /// not yet established.
    async fn readiness(&self) -> ProbeResult<Option<Telemetry>>;

    /// Best-effort safe rest pose, issued before shutdown.
    async fn goto_sleep(&self) -> ProbeResult<()>;
}

// =============================================================================
// HttpApi
// =============================================================================

/// [`DaemonApi`] over the daemon's loopback HTTP endpoints.
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    /// Builds a client with the configured probe timeout.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &SupervisorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .connect_timeout(config.probe_timeout)
            .build()
            .map_err(|e| SupervisorError::probe(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn classify(error: &reqwest::Error) -> ProbeFailure {
        if error.is_timeout() || error.is_connect() {
            ProbeFailure::Unreachable(error.to_string())
        } else {
            ProbeFailure::Malformed(error.to_string())
        }
    }
}

#[async_trait]
impl DaemonApi for HttpApi {
    async fn liveness(&self) -> ProbeResult<()> {
        let response = self
            .client
            .get(self.url("/api/daemon/status"))
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeFailure::Status(status.as_u16()))
        }
    }

    async fn readiness(&self) -> ProbeResult<Option<Telemetry>> {
        let response = self
            .client
            .get(self.url("/api/state/full"))
            .query(STATE_FULL_QUERY)
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeFailure::Status(status.as_u16()));
        }

        let telemetry: Telemetry = response
            .json()
            .await
            .map_err(|e| ProbeFailure::Malformed(e.to_string()))?;

        // Readiness means the control layer reports a mode, not merely
        // that the HTTP server answered.
        if telemetry.control_initialized() {
            Ok(Some(telemetry))
        } else {
            Ok(None)
        }
    }

    async fn goto_sleep(&self) -> ProbeResult<()> {
        let response = self
            .client
            .post(self.url("/api/move/play/goto_sleep"))
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeFailure::Status(status.as_u16()))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> HttpApi {
        let mut config = SupervisorConfig::new("/usr/bin/robotd").with_base_url(server.uri());
        config.probe_timeout = Duration::from_millis(500);
        HttpApi::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_liveness_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/daemon/status"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let api = api_for(&server);
        assert!(api.liveness().await.is_ok());
    }

    #[tokio::test]
    async fn test_liveness_http_error_is_not_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/daemon/status"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = api_for(&server);
        let failure = api.liveness().await.unwrap_err();
        assert_eq!(failure, ProbeFailure::Status(500));
        assert!(!failure.counts_toward_crash());
    }

    #[tokio::test]
    async fn test_liveness_unreachable() {
        // Nothing listens here.
        let mut config =
            SupervisorConfig::new("/usr/bin/robotd").with_base_url("http://127.0.0.1:9");
        config.probe_timeout = Duration::from_millis(200);
        let api = HttpApi::new(&config).unwrap();

        let failure = api.liveness().await.unwrap_err();
        assert!(matches!(failure, ProbeFailure::Unreachable(_)));
        assert!(failure.counts_toward_crash());
    }

    #[tokio::test]
    async fn test_readiness_with_control_mode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/state/full"))
            .and(query_param("with_control_mode", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "control_mode": "joint",
                "head_joints": [0.0, 0.1, -0.1],
                "body_yaw": 0.5,
                "antenna_positions": [0.2, 0.2],
            })))
            .mount(&server)
            .await;

        let api = api_for(&server);
        let telemetry = api.readiness().await.unwrap().unwrap();
        assert_eq!(telemetry.control_mode.as_deref(), Some("joint"));
        assert_eq!(telemetry.head_joints.len(), 3);
        assert_eq!(telemetry.body_yaw, Some(0.5));
    }

    #[tokio::test]
    async fn test_readiness_without_control_mode_is_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/state/full"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "head_joints": [0.0],
            })))
            .mount(&server)
            .await;

        let api = api_for(&server);
        // HTTP server up, control layer not initialized: not ready.
        assert_eq!(api.readiness().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_goto_sleep() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/move/play/goto_sleep"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let api = api_for(&server);
        assert!(api.goto_sleep().await.is_ok());
    }

    #[tokio::test]
    async fn test_goto_sleep_failure_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/move/play/goto_sleep"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let api = api_for(&server);
        assert_eq!(api.goto_sleep().await.unwrap_err(), ProbeFailure::Status(503));
    }
}
