//! Orchestrator configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default global session cap
const DEFAULT_MAX_SESSIONS: usize = 50;

/// Default per-owner session cap
const DEFAULT_MAX_SESSIONS_PER_OWNER: usize = 3;

/// Default owner cooldown between creation attempts (30 seconds)
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Transient disconnects tolerated before giving up
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Fixed delay before a transient reconnect
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Fixed delay before a protocol-requested restart
const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(2);

/// Consecutive restarts allowed without a successful open
const DEFAULT_MAX_RESTART_RETRIES: u32 = 1;

/// Lifetime of an authentication prompt (60 seconds)
const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Inactivity window before health eviction (10 minutes)
const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Health sweep interval
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Cleanup sweep interval
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Maximum live sessions across all owners
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Maximum live sessions per owner
    #[serde(default = "default_max_sessions_per_owner")]
    pub max_sessions_per_owner: usize,

    /// Minimum time between two creation attempts of one owner (seconds)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Transient disconnects retried before teardown
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Delay before a transient reconnect (ms)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Delay before a protocol-requested restart (ms)
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Consecutive restart requests honoured without a successful open
    #[serde(default = "default_max_restart_retries")]
    pub max_restart_retries: u32,

    /// Lifetime of an authentication prompt (seconds)
    #[serde(default = "default_prompt_timeout_secs")]
    pub prompt_timeout_secs: u64,

    /// Inactivity window enforced by the health monitor (seconds)
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    /// Health sweep interval (seconds)
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Cleanup sweep interval (seconds)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Group width used when formatting pairing codes
    #[serde(default = "default_pairing_code_group")]
    pub pairing_code_group: usize,

    /// Minimum edge length of the rendered scannable code (px)
    #[serde(default = "default_qr_min_dimension")]
    pub qr_min_dimension: u32,

    /// Send a notice when a prompt expires unanswered
    #[serde(default)]
    pub notify_prompt_expiry: bool,

    /// Tell the owner when the health monitor evicts a session
    #[serde(default = "default_true")]
    pub notify_on_eviction: bool,

    /// Delete a session's stored credentials when it is torn down
    #[serde(default = "default_true")]
    pub purge_credentials_on_teardown: bool,

    /// Root directory for per-session credential storage
    #[serde(default)]
    pub credentials_dir: Option<PathBuf>,
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_max_sessions_per_owner() -> usize {
    DEFAULT_MAX_SESSIONS_PER_OWNER
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN.as_secs()
}

fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_millis() as u64
}

fn default_restart_delay_ms() -> u64 {
    DEFAULT_RESTART_DELAY.as_millis() as u64
}

fn default_max_restart_retries() -> u32 {
    DEFAULT_MAX_RESTART_RETRIES
}

fn default_prompt_timeout_secs() -> u64 {
    DEFAULT_PROMPT_TIMEOUT.as_secs()
}

fn default_inactivity_timeout_secs() -> u64 {
    DEFAULT_INACTIVITY_TIMEOUT.as_secs()
}

fn default_health_interval_secs() -> u64 {
    DEFAULT_HEALTH_INTERVAL.as_secs()
}

fn default_cleanup_interval_secs() -> u64 {
    DEFAULT_CLEANUP_INTERVAL.as_secs()
}

fn default_pairing_code_group() -> usize {
    4
}

fn default_qr_min_dimension() -> u32 {
    256
}

fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_sessions_per_owner: DEFAULT_MAX_SESSIONS_PER_OWNER,
            cooldown_secs: DEFAULT_COOLDOWN.as_secs(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            max_restart_retries: DEFAULT_MAX_RESTART_RETRIES,
            prompt_timeout_secs: DEFAULT_PROMPT_TIMEOUT.as_secs(),
            inactivity_timeout_secs: DEFAULT_INACTIVITY_TIMEOUT.as_secs(),
            health_interval_secs: DEFAULT_HEALTH_INTERVAL.as_secs(),
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL.as_secs(),
            pairing_code_group: default_pairing_code_group(),
            qr_min_dimension: default_qr_min_dimension(),
            notify_prompt_expiry: false,
            notify_on_eviction: true,
            purge_credentials_on_teardown: true,
            credentials_dir: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Cooldown entries older than this are purged by the cleanup service
    pub fn cooldown_retention(&self) -> Duration {
        self.cooldown() * 2
    }

    /// Reject configurations the orchestrator cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("maxSessions must be at least 1".into()));
        }
        if self.max_sessions_per_owner == 0 {
            return Err(ConfigError::Invalid(
                "maxSessionsPerOwner must be at least 1".into(),
            ));
        }
        if self.max_sessions_per_owner > self.max_sessions {
            return Err(ConfigError::Invalid(format!(
                "maxSessionsPerOwner ({}) exceeds maxSessions ({})",
                self.max_sessions_per_owner, self.max_sessions
            )));
        }
        if self.health_interval_secs == 0 || self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep intervals must be non-zero".into()));
        }
        if self.prompt_timeout_secs == 0 {
            return Err(ConfigError::Invalid("promptTimeoutSecs must be non-zero".into()));
        }
        if self.pairing_code_group == 0 {
            return Err(ConfigError::Invalid("pairingCodeGroup must be non-zero".into()));
        }
        Ok(())
    }
}
