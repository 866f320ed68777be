//! Best-effort telemetry sidecar
//!
//! Posts `{level, message}` events to the log observer. Reporting never
//! blocks the caller and never fails it: every outcome of the post is
//! discarded after a trace-level log line.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::config::TelemetryConfig;

/// Event severity as understood by the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize)]
struct Event<'a> {
    level: Level,
    message: &'a str,
}

#[derive(Debug)]
struct Sidecar {
    client: reqwest::Client,
    url: String,
}

/// Handle to the telemetry sidecar, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    inner: Option<Arc<Sidecar>>,
}

impl Telemetry {
    /// Create a sidecar posting to the configured observer
    ///
    /// Returns a disabled sidecar when telemetry is turned off or the HTTP
    /// client cannot be built.
    #[must_use]
    pub fn new(config: &TelemetryConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        match reqwest::Client::builder().timeout(config.timeout).build() {
            Ok(client) => Self {
                inner: Some(Arc::new(Sidecar {
                    client,
                    url: config.url.clone(),
                })),
            },
            Err(e) => {
                tracing::warn!(error = %e, "telemetry client unavailable, reporting disabled");
                Self::disabled()
            }
        }
    }

    /// A sidecar that drops every event
    #[must_use]
    pub const fn disabled() -> Self {
        Self { inner: None }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Report an event without waiting for or observing the outcome
    ///
    /// Does nothing outside a Tokio runtime.
    pub fn report_best_effort(&self, level: Level, message: impl Into<String>) {
        let Some(sidecar) = self.inner.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let message = message.into();
        drop(handle.spawn(async move {
            match sidecar.post(level, &message).await {
                Ok(()) => tracing::trace!(%level, "telemetry event delivered"),
                Err(e) => tracing::trace!(%level, error = %e, "telemetry event dropped"),
            }
        }));
    }

    /// Post an event and wait for the outcome
    ///
    /// # Errors
    ///
    /// Returns error if the observer is unreachable, times out, or answers
    /// with a non-success status
    pub async fn report(&self, level: Level, message: &str) -> Result<()> {
        match &self.inner {
            Some(sidecar) => sidecar.post(level, message).await,
            None => Ok(()),
        }
    }
}

impl Sidecar {
    async fn post(&self, level: Level, message: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&Event { level, message })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
