//! Queue Configuration
//!
//! [`QueueConfig`] is built once by the caller and never changes afterwards.
//! It can be assembled in code with the `with_*` builder methods or
//! deserialised from an options section, accepting both the snake_case field
//! names and the PascalCase names used by existing deployments:
//!
//! ```
//! use bucketq::QueueConfig;
//!
//! let config = QueueConfig::default()
//!     .with_host("10.0.0.5")
//!     .with_port(6380)
//!     .with_database(2)
//!     .with_hours_format("%Y%m%d%H");
//! assert!(config.validate().is_ok());
//! assert_eq!(config.address(), "10.0.0.5:6380");
//! ```

use crate::bucket::BucketFormats;
use crate::error::{QueueError, Result};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use serde::Deserialize;

/// Connection and bucket-format settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Store host name or IP address
    #[serde(alias = "Host")]
    pub host: String,

    /// Store port
    #[serde(alias = "Port")]
    pub port: u16,

    /// Password sent with `AUTH`, if any
    #[serde(alias = "Password")]
    pub password: Option<String>,

    /// Database index the buckets live in
    #[serde(alias = "DefaultDatabase", alias = "Database")]
    pub database: i64,

    /// Custom timestamp format for hour buckets
    #[serde(alias = "HoursFormatKeySuffix")]
    pub hours_format: Option<String>,

    /// Custom timestamp format for minute buckets
    #[serde(alias = "MinutesFormatKeySuffix")]
    pub minutes_format: Option<String>,

    /// Custom timestamp format for day buckets
    #[serde(alias = "DaysFormatKeySuffix")]
    pub days_format: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            password: None,
            database: 0,
            hours_format: None,
            minutes_format: None,
            days_format: None,
        }
    }
}

impl QueueConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    pub fn with_hours_format(mut self, format: impl Into<String>) -> Self {
        self.hours_format = Some(format.into());
        self
    }

    pub fn with_minutes_format(mut self, format: impl Into<String>) -> Self {
        self.minutes_format = Some(format.into());
        self
    }

    pub fn with_days_format(mut self, format: impl Into<String>) -> Self {
        self.days_format = Some(format.into());
        self
    }

    /// `host:port` for the TCP connection.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks every setting, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(QueueError::config("host must not be empty"));
        }
        if self.port == 0 {
            return Err(QueueError::config("port must not be 0"));
        }
        if self.database < 0 {
            return Err(QueueError::config(format!(
                "database index must be >= 0, got {}",
                self.database
            )));
        }
        self.formats().map(|_| ())
    }

    /// Validated bucket formats, with defaults for unset slots.
    pub fn formats(&self) -> Result<BucketFormats> {
        BucketFormats::new(
            self.minutes_format.as_deref(),
            self.hours_format.as_deref(),
            self.days_format.as_deref(),
        )
    }
}
