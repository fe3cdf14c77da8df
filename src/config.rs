//! Agent configuration.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dispatcher::{EventDispatcher, EvictWhenIdle, RetainAll};
use crate::error::ValidationError;
use crate::tree::FactPath;

/// Default location of the event id inside a snapshot.
pub const DEFAULT_EVENT_ID_PATH: &str = "xi.event.id";

/// Which retention policy the agent's dispatcher uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionMode {
    /// Keep every record for the life of the agent.
    #[default]
    RetainAll,
    /// Drop a record as soon as its event goes idle.
    EvictWhenIdle,
}

impl RetentionMode {
    /// Installs the matching [`RetentionPolicy`](crate::RetentionPolicy).
    #[must_use]
    pub fn apply(self, dispatcher: EventDispatcher) -> EventDispatcher {
        match self {
            Self::RetainAll => dispatcher.with_retention(RetainAll),
            Self::EvictWhenIdle => dispatcher.with_retention(EvictWhenIdle),
        }
    }
}

impl FromStr for RetentionMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain_all" => Ok(Self::RetainAll),
            "evict_when_idle" => Ok(Self::EvictWhenIdle),
            other => Err(ValidationError::MalformedSnapshot {
                reason: format!("unknown retention mode '{other}'"),
            }),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name sent to the registry on registration.
    pub name: String,
    /// Callback URL advertised to the registry.
    #[serde(default)]
    pub url: Option<String>,
    /// Where inbound snapshots carry their event id.
    #[serde(default = "default_event_id_path")]
    pub event_id_path: String,
    #[serde(default)]
    pub retention: RetentionMode,
}

fn default_event_id_path() -> String {
    DEFAULT_EVENT_ID_PATH.to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: None,
            event_id_path: default_event_id_path(),
            retention: RetentionMode::default(),
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_retention(mut self, retention: RetentionMode) -> Self {
        self.retention = retention;
        self
    }

    /// Reads `XAL_AGENT_NAME`, `XAL_AGENT_URL`, `XAL_EVENT_ID_PATH` and
    /// `XAL_RETENTION`.
    ///
    /// # Errors
    ///
    /// `MissingField` without a name, `InvalidPath` for a bad event id path,
    /// `MalformedSnapshot` for an unknown retention mode.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = lookup("XAL_AGENT_NAME")
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| ValidationError::MissingField {
                field: "XAL_AGENT_NAME".to_string(),
            })?;
        let config = Self {
            name,
            url: lookup("XAL_AGENT_URL").filter(|u| !u.trim().is_empty()),
            event_id_path: lookup("XAL_EVENT_ID_PATH").unwrap_or_else(default_event_id_path),
            retention: lookup("XAL_RETENTION")
                .map(|r| r.parse::<RetentionMode>())
                .transpose()?
                .unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// `MissingField` for an empty name, `InvalidPath` for a bad event id path.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "name".to_string(),
            });
        }
        FactPath::parse(&self.event_id_path)?;
        Ok(())
    }
}
