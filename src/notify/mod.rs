// Health-check notifications (healthchecks.io ping API)

use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use thiserror::Error;

/// Lifecycle events reported to the health-check endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    Start,
    Fail,
    Complete,
}

impl HealthEvent {
    /// Path segment appended to the base URL. The success ping is the base
    /// URL itself.
    pub fn path_suffix(self) -> Option<&'static str> {
        match self {
            HealthEvent::Start => Some("start"),
            HealthEvent::Fail => Some("fail"),
            HealthEvent::Complete => None,
        }
    }
}

impl fmt::Display for HealthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthEvent::Start => f.write_str("start"),
            HealthEvent::Fail => f.write_str("fail"),
            HealthEvent::Complete => f.write_str("complete"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Health check endpoint returned {status}")]
    Status { status: reqwest::StatusCode },
}

/// Sends lifecycle signals to an external monitor.
pub trait Notifier {
    fn notify(&self, event: HealthEvent, run_id: &str) -> Result<(), NotifyError>;
}

/// Build the URL an event is posted to.
pub fn event_url(base_url: &str, event: HealthEvent) -> String {
    let base = base_url.trim_end_matches('/');
    match event.path_suffix() {
        Some(suffix) => format!("{}/{}", base, suffix),
        None => base.to_string(),
    }
}

/// Notifier backed by a blocking reqwest client.
pub struct HealthChecks {
    base_url: String,
    client: Client,
}

impl HealthChecks {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

impl Notifier for HealthChecks {
    fn notify(&self, event: HealthEvent, run_id: &str) -> Result<(), NotifyError> {
        let url = event_url(&self.base_url, event);
        tracing::debug!("Sending health check {} to {}", event, url);

        let response = self.client.post(&url).form(&[("rid", run_id)]).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status { status });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Notifier that records events, optionally failing every call.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingNotifier {
        pub events: Arc<Mutex<Vec<(HealthEvent, String)>>>,
        pub fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, event: HealthEvent, run_id: &str) -> Result<(), NotifyError> {
            self.events
                .lock()
                .unwrap()
                .push((event, run_id.to_string()));
            if self.fail {
                return Err(NotifyError::Status {
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_event_urls() {
        let base = "https://hc-ping.com/0f1e";
        assert_eq!(
            event_url(base, HealthEvent::Start),
            "https://hc-ping.com/0f1e/start"
        );
        assert_eq!(
            event_url(base, HealthEvent::Fail),
            "https://hc-ping.com/0f1e/fail"
        );
        assert_eq!(
            event_url(base, HealthEvent::Complete),
            "https://hc-ping.com/0f1e"
        );
    }

    #[test]
    fn test_event_url_trims_trailing_slash() {
        assert_eq!(
            event_url("http://localhost:8000/ping/abc/", HealthEvent::Start),
            "http://localhost:8000/ping/abc/start"
        );
        assert_eq!(
            event_url("http://localhost:8000/ping/abc/", HealthEvent::Complete),
            "http://localhost:8000/ping/abc"
        );
    }

    #[test]
    fn test_event_display() {
        assert_eq!(HealthEvent::Start.to_string(), "start");
        assert_eq!(HealthEvent::Fail.to_string(), "fail");
        assert_eq!(HealthEvent::Complete.to_string(), "complete");
    }

    #[test]
    fn test_unreachable_endpoint_returns_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let notifier =
            HealthChecks::new("http://127.0.0.1:9/ping", Duration::from_secs(2)).expect("client");
        let result = notifier.notify(HealthEvent::Start, "run");
        assert!(matches!(result, Err(NotifyError::Request(_))));
    }
}
