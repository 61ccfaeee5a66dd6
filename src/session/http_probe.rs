//! HTTP probe session.
//!
//! Fetches each target with its own reqwest client and stores the response
//! body in the worker's profile directory. Used by the bundled binary where a
//! browser driver is not available.

use std::error::Error as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{redirect, Client};

use super::{ScanSession, SessionConfig, SessionError, SessionFactory};
use crate::scheduler::job::{Artifact, Job};

const DEFAULT_USER_AGENT: &str = concat!("parascan/", env!("CARGO_PKG_VERSION"));

/// Creates [`HttpProbeSession`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpProbeFactory;

impl HttpProbeFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionFactory for HttpProbeFactory {
    async fn create_session(
        &self,
        worker_id: usize,
        profile_dir: &Path,
        config: &SessionConfig,
    ) -> Result<Box<dyn ScanSession>, SessionError> {
        let session = HttpProbeSession::new(worker_id, profile_dir, config)?;
        Ok(Box::new(session))
    }
}

/// One worker's HTTP client and capture directory.
pub struct HttpProbeSession {
    worker_id: usize,
    client: Option<Client>,
    capture_dir: PathBuf,
    page_timeout: Duration,
    max_body_bytes: usize,
    captures: u64,
}

impl HttpProbeSession {
    /// Builds the client. Fails if the TLS backend cannot be initialized.
    pub fn new(
        worker_id: usize,
        profile_dir: &Path,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(config.page_timeout)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(
                config
                    .user_agent
                    .clone()
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            )
            .build()
            .map_err(|e| SessionError::Create(error_chain(&e)))?;

        Ok(Self {
            worker_id,
            client: Some(client),
            capture_dir: profile_dir.join("captures"),
            page_timeout: config.page_timeout,
            max_body_bytes: config.max_body_bytes,
            captures: 0,
        })
    }

    /// Reads the body chunk by chunk, stopping once `max_body_bytes` are kept.
    async fn read_body(
        &self,
        response: &mut reqwest::Response,
    ) -> Result<(Vec<u8>, bool), SessionError> {
        let mut kept = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.map_request_error(e))?
        {
            let room = self.max_body_bytes - kept.len();
            if chunk.len() > room {
                kept.extend_from_slice(&chunk[..room]);
                return Ok((kept, true));
            }
            kept.extend_from_slice(&chunk);
        }
        Ok((kept, false))
    }

    fn map_request_error(&self, err: reqwest::Error) -> SessionError {
        if err.is_timeout() {
            SessionError::Timeout(self.page_timeout)
        } else {
            SessionError::Execute(error_chain(&err))
        }
    }
}

#[async_trait]
impl ScanSession for HttpProbeSession {
    async fn execute(&mut self, job: &Job) -> Result<Artifact, SessionError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| SessionError::Crashed("probe session was torn down".to_string()))?;

        let started = Instant::now();
        let mut response = client
            .get(job.target())
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        let final_url = response.url().to_string();
        let server = response
            .headers()
            .get(reqwest::header::SERVER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (kept, truncated) = self.read_body(&mut response).await?;

        self.captures += 1;
        tokio::fs::create_dir_all(&self.capture_dir)
            .await
            .map_err(|e| SessionError::Execute(format!("capture dir: {e}")))?;
        let capture_path = self.capture_dir.join(format!("capture_{:06}.body", self.captures));
        tokio::fs::write(&capture_path, &kept)
            .await
            .map_err(|e| SessionError::Execute(format!("write capture: {e}")))?;

        let payload = serde_json::json!({
            "target": job.target(),
            "final_url": final_url,
            "status": status.as_u16(),
            "server": server,
            "content_type": content_type,
            "body_bytes": kept.len(),
            "truncated": truncated,
            "capture": capture_path.display().to_string(),
            "elapsed_ms": started.elapsed().as_millis() as u64,
            "worker_id": self.worker_id,
        });

        let artifact = Artifact::new(payload);
        if status.is_server_error() {
            return Ok(artifact.with_error_state(format!("server error: {status}")));
        }
        Ok(artifact)
    }

    async fn teardown(&mut self) {
        self.client = None;
    }
}

/// Joins an error and its sources into one line so classification sees the
/// underlying cause ("Connection refused", "certificate ...").
fn error_chain(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_teardown_then_execute_reports_crash() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = HttpProbeSession::new(0, dir.path(), &SessionConfig::default()).unwrap();
        session.teardown().await;
        session.teardown().await;

        let err = session.execute(&Job::new("http://127.0.0.1:1/")).await.unwrap_err();
        assert!(matches!(err, SessionError::Crashed(_)));
    }

    #[tokio::test]
    async fn test_closed_port_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::default().with_page_timeout(Duration::from_secs(5));
        let factory = HttpProbeFactory::new();
        let mut session = factory.create_session(0, dir.path(), &config).await.unwrap();

        // Port 1 is reserved and closed on test hosts
        let err = session.execute(&Job::new("http://127.0.0.1:1/")).await.unwrap_err();
        assert!(matches!(err, SessionError::Execute(_) | SessionError::Timeout(_)));
    }

    /// Serves one response with a `len`-byte body on a local port.
    async fn serve_once(len: usize) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n"
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let body = vec![b'x'; len];
            let _ = socket.write_all(&body).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_large_body_is_truncated_while_reading() {
        let url = serve_once(256 * 1024).await;
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::default()
            .with_page_timeout(Duration::from_secs(5))
            .with_max_body_bytes(1024);
        let mut session = HttpProbeSession::new(0, dir.path(), &config).unwrap();

        let artifact = session.execute(&Job::new(url)).await.unwrap();
        assert!(artifact.is_success());
        assert_eq!(artifact.payload["status"], 200);
        assert_eq!(artifact.payload["body_bytes"], 1024);
        assert_eq!(artifact.payload["truncated"], true);

        let capture = artifact.payload["capture"].as_str().unwrap();
        assert_eq!(std::fs::metadata(capture).unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn test_small_body_is_kept_whole() {
        let url = serve_once(300).await;
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::default().with_max_body_bytes(1024);
        let mut session = HttpProbeSession::new(0, dir.path(), &config).unwrap();

        let artifact = session.execute(&Job::new(url)).await.unwrap();
        assert_eq!(artifact.payload["body_bytes"], 300);
        assert_eq!(artifact.payload["truncated"], false);
    }
}
