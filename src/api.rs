//! The operations exposed to external callers, with their JSON responses.
//!
//! Every failure is turned into a status field, never into a panic of the
//! surrounding service. [`Api::route`] maps request paths onto the
//! operations independently of the transport.

use std::sync::Arc;
use std::thread;

use log::{debug, info};
use serde::Serialize;

use crate::capture::StopReason;
use crate::error::CaptureError;
use crate::postcode::PostcodeRecord;
use crate::supervisor::{SessionStatus, Supervisor};
use crate::transcript::TranscriptInfo;
use crate::utils::port_present;

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    Error,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct StartResponse {
    pub status: StartStatus,
    pub message: String,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Stopped,
    NotRunning,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct StopResponse {
    pub status: StopStatus,
    pub message: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PollResponse {
    pub status: SessionStatus,
    pub postcodes: Vec<PostcodeRecord>,
    pub count: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StopReason>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct SuccessResponse {
    pub status: &'static str,
    pub message: String,
}
impl SuccessResponse {
    fn new(message: impl Into<String>) -> Self {
        SuccessResponse {
            status: "success",
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ListResponse {
    pub status: &'static str,
    pub logs: Vec<TranscriptInfo>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct TranscriptResponse {
    pub status: &'static str,
    pub filename: String,
    pub content: String,
    pub lines: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub port: String,
    pub baudrate: u32,
    pub log_dir: String,
    pub log_dir_exists: bool,
    pub postcodes_in_memory: usize,
    pub capture_running: bool,
    pub capture_pgid: Option<u32>,
    pub port_present: bool,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}
impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorResponse {
            status: "error",
            message: message.into(),
        }
    }
}

/// A transport independent reply.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Reply {
    pub code: u16,
    pub content_type: &'static str,
    pub body: String,
    /// File name offered for download, for attachments.
    pub attachment: Option<String>,
}
impl Reply {
    pub fn json<T: Serialize>(code: u16, value: &T) -> Self {
        let body = serde_json::to_string(value).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","message":"serialization failed: {}"}}"#, e)
        });
        Reply {
            code,
            content_type: "application/json",
            body,
            attachment: None,
        }
    }

    fn error(code: u16, message: impl Into<String>) -> Self {
        Reply::json(code, &ErrorResponse::new(message))
    }

    fn from_error(error: &CaptureError) -> Self {
        match error {
            // Do not tell apart missing files and names outside the log dir.
            CaptureError::NotFound(_) | CaptureError::InvalidName(_) => {
                Reply::error(404, "File not found")
            }
            e => Reply::error(500, e.to_string()),
        }
    }
}

// =============================================================================
// Operations
// =============================================================================

#[derive(Clone)]
pub struct Api {
    supervisor: Arc<Supervisor>,
}
impl Api {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Api { supervisor }
    }

    /// Start a capture session, then give it the start grace period so that
    /// a terminal dying right away is reported in the response.
    pub fn start(&self) -> StartResponse {
        match self.supervisor.start() {
            Ok(started) => {
                thread::sleep(self.supervisor.settings().start_grace);
                let snapshot = self.supervisor.poll();
                let message = match (snapshot.status, snapshot.reason) {
                    (SessionStatus::Completed, Some(StopReason::ProcessExited)) => {
                        "Terminal exited right after start".to_string()
                    }
                    _ => match started.transcript {
                        Some(path) => format!("Capture started, logging to {}", path.display()),
                        None => "Capture started, transcript unavailable".to_string(),
                    },
                };
                StartResponse {
                    status: StartStatus::Started,
                    message,
                }
            }
            Err(e) => StartResponse {
                status: StartStatus::Error,
                message: e.to_string(),
            },
        }
    }

    pub fn stop(&self) -> StopResponse {
        if self.supervisor.stop() {
            StopResponse {
                status: StopStatus::Stopped,
                message: "Capture stopped".into(),
            }
        } else {
            StopResponse {
                status: StopStatus::NotRunning,
                message: "No capture in progress".into(),
            }
        }
    }

    pub fn poll(&self) -> PollResponse {
        let snapshot = self.supervisor.poll();
        let message = match (snapshot.status, snapshot.reason) {
            (SessionStatus::Running, _) => "Reading in progress".to_string(),
            (SessionStatus::Completed, Some(reason)) => format!("Reading completed ({})", reason),
            (SessionStatus::Completed, None) => "Reading completed".to_string(),
        };
        PollResponse {
            status: snapshot.status,
            count: snapshot.records.len(),
            postcodes: snapshot.records,
            message,
            reason: snapshot.reason,
        }
    }

    pub fn clear(&self) -> SuccessResponse {
        self.supervisor.clear();
        SuccessResponse::new("Live data cleared")
    }

    pub fn list_transcripts(&self) -> Result<ListResponse, CaptureError> {
        Ok(ListResponse {
            status: "success",
            logs: self.supervisor.transcripts().list()?,
        })
    }

    pub fn get_transcript(&self, name: &str) -> Result<TranscriptResponse, CaptureError> {
        let content = self.supervisor.transcripts().read(name)?;
        Ok(TranscriptResponse {
            status: "success",
            filename: name.to_owned(),
            lines: content.split('\n').count(),
            size: content.len(),
            content,
        })
    }

    pub fn delete_transcript(&self, name: &str) -> Result<SuccessResponse, CaptureError> {
        self.supervisor.transcripts().delete(name)?;
        info!("Deleted transcript {}", name);
        Ok(SuccessResponse::new(format!("Deleted {}", name)))
    }

    pub fn status(&self) -> StatusResponse {
        let settings = self.supervisor.settings();
        StatusResponse {
            status: "running",
            port: settings.port.clone(),
            baudrate: settings.baud_rate,
            log_dir: settings.log_dir.display().to_string(),
            log_dir_exists: settings.log_dir.is_dir(),
            postcodes_in_memory: self.supervisor.poll().records.len(),
            capture_running: self.supervisor.is_running(),
            capture_pgid: self.supervisor.active_pgid(),
            port_present: port_present(&settings.port),
        }
    }

    /// Dispatch a request for `url` (path and optional query string).
    pub fn route(&self, method: &str, url: &str) -> Reply {
        debug!("{} {}", method, url);
        if method != "GET" && method != "POST" {
            return Reply::error(405, format!("Method {} not allowed", method));
        }

        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, query),
            None => (url, ""),
        };
        match path.trim_end_matches('/') {
            "/start" => Reply::json(200, &self.start()),
            "/stop" => Reply::json(200, &self.stop()),
            "/poll" => Reply::json(200, &self.poll()),
            "/clear" => Reply::json(200, &self.clear()),
            "/status" => Reply::json(200, &self.status()),
            "/list_logs" => match self.list_transcripts() {
                Ok(list) => Reply::json(200, &list),
                Err(ref e) => Reply::from_error(e),
            },
            other => {
                if let Some(name) = other.strip_prefix("/get_log/") {
                    if query_flag(query, "download") {
                        self.download(name)
                    } else {
                        match self.get_transcript(name) {
                            Ok(transcript) => Reply::json(200, &transcript),
                            Err(ref e) => Reply::from_error(e),
                        }
                    }
                } else if let Some(name) = other.strip_prefix("/delete_log/") {
                    match self.delete_transcript(name) {
                        Ok(deleted) => Reply::json(200, &deleted),
                        Err(ref e) => Reply::from_error(e),
                    }
                } else {
                    Reply::error(404, format!("No route for {}", path))
                }
            }
        }
    }

    fn download(&self, name: &str) -> Reply {
        match self.supervisor.transcripts().read(name) {
            Ok(content) => Reply {
                code: 200,
                content_type: "text/plain; charset=utf-8",
                body: content,
                attachment: Some(name.to_owned()),
            },
            Err(ref e) => Reply::from_error(e),
        }
    }
}

fn query_flag(query: &str, key: &str) -> bool {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(k, v)| k == key && v.eq_ignore_ascii_case("true"))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsBuilder;
    use serde_json::Value;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn api(dir: &std::path::Path) -> Api {
        let settings = SettingsBuilder::new()
            .log_dir(dir)
            .command("/nonexistent/minicom", Vec::<String>::new())
            .start_grace(Duration::from_millis(0))
            .finalize();
        Api::new(Arc::new(Supervisor::new(settings).unwrap()))
    }

    fn body(reply: &Reply) -> Value {
        serde_json::from_str(&reply.body).unwrap()
    }

    #[test]
    fn stop_when_idle_is_not_running() {
        let tmp = TempDir::new().unwrap();
        let reply = api(tmp.path()).route("GET", "/stop");
        assert_eq!(reply.code, 200);
        assert_eq!(body(&reply)["status"], "not_running");
    }

    #[test]
    fn failed_start_reports_error_status() {
        let tmp = TempDir::new().unwrap();
        let reply = api(tmp.path()).route("GET", "/start");
        assert_eq!(reply.code, 200);
        let json = body(&reply);
        assert_eq!(json["status"], "error");
        assert!(json["message"]
            .as_str()
            .unwrap()
            .contains("/nonexistent/minicom"));
    }

    #[test]
    fn poll_shape() {
        let tmp = TempDir::new().unwrap();
        let json = body(&api(tmp.path()).route("GET", "/poll"));
        assert_eq!(json["status"], "completed");
        assert_eq!(json["count"], 0);
        assert_eq!(json["postcodes"], Value::Array(vec![]));
    }

    #[test]
    fn clear_succeeds() {
        let tmp = TempDir::new().unwrap();
        let json = body(&api(tmp.path()).route("POST", "/clear"));
        assert_eq!(json["status"], "success");
    }

    #[test]
    fn transcripts_routes() {
        let tmp = TempDir::new().unwrap();
        let api = api(tmp.path());
        fs::write(tmp.path().join("POSTCODE_LOG_a.txt"), "line 1\nline 2").unwrap();

        let json = body(&api.route("GET", "/list_logs"));
        assert_eq!(json["status"], "success");
        assert_eq!(json["logs"][0]["name"], "POSTCODE_LOG_a.txt");
        assert_eq!(json["logs"][0]["size"], 13);

        let json = body(&api.route("GET", "/get_log/POSTCODE_LOG_a.txt"));
        assert_eq!(json["content"], "line 1\nline 2");
        assert_eq!(json["lines"], 2);

        let reply = api.route("GET", "/get_log/POSTCODE_LOG_a.txt?download=true");
        assert_eq!(reply.content_type, "text/plain; charset=utf-8");
        assert_eq!(reply.body, "line 1\nline 2");
        assert_eq!(reply.attachment.as_deref(), Some("POSTCODE_LOG_a.txt"));

        let json = body(&api.route("GET", "/delete_log/POSTCODE_LOG_a.txt"));
        assert_eq!(json["status"], "success");
        assert_eq!(api.route("GET", "/get_log/POSTCODE_LOG_a.txt").code, 404);
    }

    #[test]
    fn traversal_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let logs = tmp.path().join("logs");
        let api = api(&logs);
        fs::write(tmp.path().join("secret.txt"), "secret").unwrap();

        let reply = api.route("GET", "/get_log/..%2Fsecret.txt");
        assert_eq!(reply.code, 404);
        let reply = api.route("GET", "/get_log/../secret.txt");
        assert_eq!(reply.code, 404);
        let reply = api.route("GET", "/delete_log/../secret.txt");
        assert_eq!(reply.code, 404);
        assert!(tmp.path().join("secret.txt").exists());
    }

    #[test]
    fn status_reports_settings() {
        let tmp = TempDir::new().unwrap();
        let json = body(&api(tmp.path()).route("GET", "/status"));
        assert_eq!(json["port"], "/dev/ttyAMA0");
        assert_eq!(json["baudrate"], 115_200);
        assert_eq!(json["log_dir_exists"], true);
        assert_eq!(json["capture_running"], false);
        assert_eq!(json["capture_pgid"], Value::Null);
    }

    #[test]
    fn unknown_route_and_method() {
        let tmp = TempDir::new().unwrap();
        let api = api(tmp.path());
        assert_eq!(api.route("GET", "/nope").code, 404);
        assert_eq!(api.route("DELETE", "/stop").code, 405);
    }

    #[test]
    fn query_flags() {
        assert!(query_flag("download=true", "download"));
        assert!(query_flag("a=1&download=TRUE", "download"));
        assert!(!query_flag("download=false", "download"));
        assert!(!query_flag("", "download"));
    }
}
