//! Configuration management
//!
//! Hosts hand us settings as JSON, either as a bare object or nested under a
//! `codedefects` key next to their own settings. Partial updates merge section by
//! section, so a host that only knows about the queue section cannot reset session
//! defaults by accident. Which rules are enabled and where settings are persisted
//! belongs to the host, not here.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Whether project scans of different sessions share one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    Shared,
    PerSession,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub mode: QueueMode,

    pub history_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub background_scanning_default: bool,

    /// Upper bound between cancellation/deadline checks of a blocked caller.
    pub wait_poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub thread_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mode: QueueMode::Shared,
            history_window: 100,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            background_scanning_default: false,
            wait_poll_interval_ms: 25,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            thread_name: "codedefects-notifier".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }
}

impl CoordinatorConfig {
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let settings = value.get("codedefects").cloned().unwrap_or(value);

        if let Ok(config) = serde_json::from_value::<CoordinatorConfig>(settings.clone()) {
            debug!("Deserialized full coordinator configuration");
            return Ok(config);
        }

        let mut config = CoordinatorConfig::default();
        config.update_from_value(settings)?;
        Ok(config)
    }

    /// Replaces each section present in `value`; sections that fail to parse are
    /// reported and the rest still apply.
    pub fn update_from_value(&mut self, value: serde_json::Value) -> Result<(), serde_json::Error> {
        let settings = value.get("codedefects").cloned().unwrap_or(value);
        let mut first_error = None;

        if let Some(queue) = settings.get("queue") {
            match serde_json::from_value::<QueueConfig>(queue.clone()) {
                Ok(queue) => {
                    self.queue = queue;
                    debug!("Updated queue configuration");
                }
                Err(e) => first_error = first_error.or(Some(e)),
            }
        }

        if let Some(session) = settings.get("session") {
            match serde_json::from_value::<SessionConfig>(session.clone()) {
                Ok(session) => {
                    self.session = session;
                    debug!("Updated session configuration");
                }
                Err(e) => first_error = first_error.or(Some(e)),
            }
        }

        if let Some(notifications) = settings.get("notifications") {
            match serde_json::from_value::<NotificationConfig>(notifications.clone()) {
                Ok(notifications) => {
                    self.notifications = notifications;
                    debug!("Updated notification configuration");
                }
                Err(e) => first_error = first_error.or(Some(e)),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Coordinator configuration updated");
                Ok(())
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.queue.history_window == 0 {
            return Err("Queue history window must be greater than 0".to_string());
        }

        if self.session.wait_poll_interval_ms == 0 {
            return Err("Wait poll interval must be greater than 0".to_string());
        }

        if self.notifications.thread_name.trim().is_empty() {
            return Err("Notification thread name must not be empty".to_string());
        }

        Ok(())
    }
}
