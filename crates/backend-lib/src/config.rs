// ============================
// syncwatch-backend-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Settings are layered with `figment`: built-in defaults, then an optional
//! TOML file, then `SYNCWATCH_`-prefixed environment variables (nested keys
//! separated by `__`, e.g. `SYNCWATCH_LIMITS__MAX_ROOMS=200`).
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "syncwatch.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SYNCWATCH_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Log level used when `RUST_LOG` is not set
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Allow cross-origin requests from any origin
    pub cors_allow_any: bool,
    /// Capacity and input size limits
    pub limits: Limits,
    /// Per-connection event admission
    pub rate_limits: RateLimitSettings,
    /// Playback synchronization timing
    pub sync: SyncSettings,
    /// Call supervision timing
    pub call: CallSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Capacity and input size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_rooms: usize,
    pub max_members_per_room: usize,
    pub max_room_id_len: usize,
    pub max_display_name_len: usize,
    pub max_chat_len: usize,
    pub min_video_id_len: usize,
    pub max_video_id_len: usize,
    /// Largest WebSocket message accepted from a client
    pub max_message_bytes: usize,
}

/// Events admitted per connection and event kind within one window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub window_ms: u64,
    pub sync: u32,
    pub chat: u32,
    pub hard_sync: u32,
    pub control: u32,
    pub signaling: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Drift clients tolerate before seeking, in seconds
    pub tolerance_secs: f64,
    /// Delay between hard-sync prepare and resume
    pub hard_sync_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSettings {
    /// How long a disrupted call may take to recover before it is ended
    pub recovery_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            cors_allow_any: true,
            limits: Limits::default(),
            rate_limits: RateLimitSettings::default(),
            sync: SyncSettings::default(),
            call: CallSettings::default(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_rooms: 1000,
            max_members_per_room: 50,
            max_room_id_len: 32,
            max_display_name_len: 24,
            max_chat_len: 300,
            min_video_id_len: 5,
            max_video_id_len: 64,
            max_message_bytes: 64 * 1024,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_ms: 1000,
            sync: 3,
            chat: 2,
            hard_sync: 2,
            control: 5,
            signaling: 50,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            tolerance_secs: 0.5,
            hard_sync_settle_ms: 1500,
        }
    }
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            recovery_timeout_secs: 120,
        }
    }
}

impl Settings {
    /// Load settings from a specific TOML file (if present) and the environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let settings: Settings = Self::figment(path.as_ref())
            .extract()
            .map_err(|e| AppError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Start building settings from the defaults
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder {
            settings: Settings::default(),
        }
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(AppError::Config(format!("unknown log level '{}'", self.log_level)));
        }
        let limits = &self.limits;
        if limits.max_rooms == 0 || limits.max_members_per_room == 0 {
            return Err(AppError::Config("room and member caps must be positive".to_string()));
        }
        if limits.max_room_id_len == 0 || limits.max_chat_len == 0 || limits.max_display_name_len == 0 {
            return Err(AppError::Config("input length limits must be positive".to_string()));
        }
        if limits.min_video_id_len > limits.max_video_id_len {
            return Err(AppError::Config("min_video_id_len exceeds max_video_id_len".to_string()));
        }
        let rates = &self.rate_limits;
        if rates.window_ms == 0
            || [rates.sync, rates.chat, rates.hard_sync, rates.control, rates.signaling].contains(&0)
        {
            return Err(AppError::Config("rate limit window and allowances must be positive".to_string()));
        }
        if !self.sync.tolerance_secs.is_finite() || self.sync.tolerance_secs < 0.0 {
            return Err(AppError::Config("sync tolerance must be a non-negative number".to_string()));
        }
        if self.call.recovery_timeout_secs == 0 {
            return Err(AppError::Config("recovery timeout must be positive".to_string()));
        }
        Ok(())
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_limits.window_ms)
    }

    pub fn hard_sync_settle(&self) -> Duration {
        Duration::from_millis(self.sync.hard_sync_settle_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.call.recovery_timeout_secs)
    }
}

/// Builder for [`Settings`], validated on `build`
#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.settings.bind_addr = addr;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.settings.log_level = level.into();
        self
    }

    pub fn max_rooms(mut self, max_rooms: usize) -> Self {
        self.settings.limits.max_rooms = max_rooms;
        self
    }

    pub fn max_members_per_room(mut self, max_members: usize) -> Self {
        self.settings.limits.max_members_per_room = max_members;
        self
    }

    pub fn rate_limits(mut self, rate_limits: RateLimitSettings) -> Self {
        self.settings.rate_limits = rate_limits;
        self
    }

    pub fn hard_sync_settle_ms(mut self, millis: u64) -> Self {
        self.settings.sync.hard_sync_settle_ms = millis;
        self
    }

    pub fn recovery_timeout_secs(mut self, secs: u64) -> Self {
        self.settings.call.recovery_timeout_secs = secs;
        self
    }

    pub fn build(self) -> Result<Settings, AppError> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
