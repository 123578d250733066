//! Heartbeat probing of interactive workloads.
//!
//! A workspace reports when its user last interacted with it at
//! `GET {health_url}` as `{"lastHeartbeat": <epoch-ms>}`. Any failure to
//! obtain that value counts as no activity at all (`0`), so an unreachable
//! workspace drifts towards idling rather than staying up forever.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::BodyExt;
use serde::Deserialize;
use tracing::debug;

use fleet_metrics::{InstanceLabels, MetricsSink};
use fleet_state::{StateResult, StateStore, StatusPatch, TenancyResolver, WorkloadInstance};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid health url {0}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("health endpoint returned {0}")]
    Status(u16),

    #[error("invalid heartbeat body: {0}")]
    Body(String),

    #[error("heartbeat probe timed out")]
    Timeout,
}

#[async_trait]
pub trait HeartbeatProbe: Send + Sync {
    /// Last heartbeat reported at `url`, epoch milliseconds (0 = never).
    async fn last_heartbeat(&self, url: &str) -> Result<u64, ProbeError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatBody {
    last_heartbeat: f64,
}

/// Plain HTTP/1.1 probe over a fresh connection per request.
#[derive(Debug, Clone)]
pub struct HttpHeartbeatProbe {
    timeout: Duration,
}

impl HttpHeartbeatProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn fetch(&self, url: &str) -> Result<u64, ProbeError> {
        let uri: http::Uri = url
            .parse()
            .map_err(|_| ProbeError::InvalidUrl(url.to_string()))?;
        if uri.scheme_str() != Some("http") {
            return Err(ProbeError::InvalidUrl(url.to_string()));
        }
        let host = uri
            .host()
            .ok_or_else(|| ProbeError::InvalidUrl(url.to_string()))?;
        let address = format!("{host}:{}", uri.port_u16().unwrap_or(80));

        let stream = tokio::net::TcpStream::connect(&address)
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(uri.path_and_query().map(|p| p.as_str()).unwrap_or("/"))
            .header("host", address.as_str())
            .header("user-agent", "fleet-lifecycle/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProbeError::Status(resp.status().as_u16()));
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ProbeError::Body(e.to_string()))?
            .to_bytes();
        let parsed: HeartbeatBody =
            serde_json::from_slice(&body).map_err(|e| ProbeError::Body(e.to_string()))?;
        Ok(parsed.last_heartbeat.max(0.0).round() as u64)
    }
}

#[async_trait]
impl HeartbeatProbe for HttpHeartbeatProbe {
    async fn last_heartbeat(&self, url: &str) -> Result<u64, ProbeError> {
        match tokio::time::timeout(self.timeout, self.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout),
        }
    }
}

/// Probes an instance and writes the result into its status and the
/// last-activity gauge.
pub struct HeartbeatRecorder {
    store: StateStore,
    probe: Arc<dyn HeartbeatProbe>,
    sink: Arc<dyn MetricsSink>,
    tenancy: Arc<dyn TenancyResolver>,
}

impl HeartbeatRecorder {
    pub fn new(
        store: StateStore,
        probe: Arc<dyn HeartbeatProbe>,
        sink: Arc<dyn MetricsSink>,
        tenancy: Arc<dyn TenancyResolver>,
    ) -> Self {
        Self {
            store,
            probe,
            sink,
            tenancy,
        }
    }

    /// Probe once (no retry) and patch `{last_seen, last_updated: now_ms}`.
    pub async fn record(&self, instance: &WorkloadInstance, now_ms: u64) -> StateResult<WorkloadInstance> {
        let url = instance.status.as_ref().and_then(|s| s.health_url.as_deref());
        let last_seen = match url {
            Some(url) => match self.probe.last_heartbeat(url).await {
                Ok(ms) => ms,
                Err(e) => {
                    debug!(
                        namespace = %instance.namespace,
                        name = %instance.name,
                        %url,
                        error = %e,
                        "heartbeat probe failed"
                    );
                    0
                }
            },
            None => {
                debug!(namespace = %instance.namespace, name = %instance.name, "no health url");
                0
            }
        };

        if let Some(project) = self.tenancy.resolve(&instance.namespace) {
            let labels = InstanceLabels::new(instance, &project);
            self.sink
                .set_last_activity(&labels, (last_seen as f64 / 1000.0).round() as u64);
        }

        let patch = StatusPatch {
            last_seen: Some(last_seen),
            last_updated: Some(now_ms),
            ..StatusPatch::default()
        };
        self.store.patch_status(&instance.table_key(), &patch)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use fleet_metrics::MetricsRegistry;
    use fleet_state::{PrefixTenancy, WorkloadKind, WorkloadSpec};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Probe answering from a fixed table; unknown urls fail with 500.
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        pub answers: Mutex<HashMap<String, u64>>,
        pub calls: Mutex<u32>,
    }

    impl FakeProbe {
        pub fn answer(&self, url: &str, ms: u64) {
            self.answers.lock().unwrap().insert(url.to_string(), ms);
        }
    }

    #[async_trait]
    impl HeartbeatProbe for FakeProbe {
        async fn last_heartbeat(&self, url: &str) -> Result<u64, ProbeError> {
            *self.calls.lock().unwrap() += 1;
            self.answers
                .lock()
                .unwrap()
                .get(url)
                .copied()
                .ok_or(ProbeError::Status(500))
        }
    }

    /// Serve one canned HTTP response on an ephemeral port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await;
            let resp = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/healthz")
    }

    #[tokio::test]
    async fn http_probe_reads_last_heartbeat() {
        let url = serve_once("200 OK", r#"{"lastHeartbeat":1700000000123}"#).await;
        let probe = HttpHeartbeatProbe::new(Duration::from_secs(2));
        assert_eq!(probe.last_heartbeat(&url).await.unwrap(), 1_700_000_000_123);
    }

    #[tokio::test]
    async fn http_probe_server_error_is_status_error() {
        let url = serve_once("500 Internal Server Error", "{}").await;
        let probe = HttpHeartbeatProbe::new(Duration::from_secs(2));
        assert!(matches!(
            probe.last_heartbeat(&url).await,
            Err(ProbeError::Status(500))
        ));
    }

    #[tokio::test]
    async fn http_probe_rejects_malformed_body() {
        let url = serve_once("200 OK", r#"{"status":"ok"}"#).await;
        let probe = HttpHeartbeatProbe::new(Duration::from_secs(2));
        assert!(matches!(probe.last_heartbeat(&url).await, Err(ProbeError::Body(_))));
    }

    #[tokio::test]
    async fn http_probe_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let probe = HttpHeartbeatProbe::new(Duration::from_secs(2));
        let err = probe
            .last_heartbeat(&format!("http://{addr}/healthz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Connect(_)));
    }

    #[tokio::test]
    async fn http_probe_rejects_non_http_urls() {
        let probe = HttpHeartbeatProbe::new(Duration::from_secs(2));
        assert!(matches!(
            probe.last_heartbeat("https://dev.example/healthz").await,
            Err(ProbeError::InvalidUrl(_))
        ));
        assert!(matches!(
            probe.last_heartbeat("not a url").await,
            Err(ProbeError::InvalidUrl(_))
        ));
    }

    pub(crate) fn workspace_spec(enabled: bool) -> WorkloadSpec {
        WorkloadSpec {
            enabled,
            replicas: 1,
            compute_class: "small".to_string(),
            storage: None,
            annotations: Default::default(),
            pinned: false,
            image: "workspace:1".to_string(),
            env: Vec::new(),
            config: Default::default(),
        }
    }

    fn workspace(store: &StateStore, url: Option<&str>) -> WorkloadInstance {
        store
            .upsert_instance("prj-acme", "dev", WorkloadKind::Workspace, workspace_spec(true))
            .unwrap();
        store
            .patch_status(
                "prj-acme/dev",
                &StatusPatch {
                    health_url: url.map(str::to_string),
                    ..StatusPatch::default()
                },
            )
            .unwrap()
    }

    #[tokio::test]
    async fn recorder_patches_status_and_gauge() {
        let store = StateStore::open_in_memory().unwrap();
        let probe = Arc::new(FakeProbe::default());
        probe.answer("http://dev/healthz", 1_699_999_999_600);
        let registry = Arc::new(MetricsRegistry::new());
        let recorder = HeartbeatRecorder::new(
            store.clone(),
            probe,
            registry.clone(),
            Arc::new(PrefixTenancy::default()),
        );
        let inst = workspace(&store, Some("http://dev/healthz"));

        let updated = recorder.record(&inst, 1_700_000_000_000).await.unwrap();
        let status = updated.status.unwrap();
        assert_eq!(status.last_seen, 1_699_999_999_600);
        assert_eq!(status.last_updated, 1_700_000_000_000);

        let project = PrefixTenancy::default().resolve("prj-acme").unwrap();
        let labels = InstanceLabels::new(&inst, &project);
        assert_eq!(registry.last_activity(&labels), Some(1_700_000_000));
    }

    #[tokio::test]
    async fn recorder_failure_records_zero() {
        let store = StateStore::open_in_memory().unwrap();
        let recorder = HeartbeatRecorder::new(
            store.clone(),
            Arc::new(FakeProbe::default()),
            Arc::new(MetricsRegistry::new()),
            Arc::new(PrefixTenancy::default()),
        );
        let inst = workspace(&store, Some("http://dev/healthz"));
        store
            .patch_status(
                "prj-acme/dev",
                &StatusPatch {
                    last_seen: Some(123),
                    ..StatusPatch::default()
                },
            )
            .unwrap();

        let updated = recorder.record(&inst, 5_000).await.unwrap();
        assert_eq!(updated.status.unwrap().last_seen, 0);
    }

    #[tokio::test]
    async fn recorder_without_url_skips_probe() {
        let store = StateStore::open_in_memory().unwrap();
        let probe = Arc::new(FakeProbe::default());
        let recorder = HeartbeatRecorder::new(
            store.clone(),
            probe.clone(),
            Arc::new(MetricsRegistry::new()),
            Arc::new(PrefixTenancy::default()),
        );
        let inst = workspace(&store, None);
        let updated = recorder.record(&inst, 5_000).await.unwrap();
        assert_eq!(updated.status.unwrap().last_seen, 0);
        assert_eq!(*probe.calls.lock().unwrap(), 0);
    }
}
