//! Bridge configuration.
//!
//! Every field has a default, so an empty file (or no file) yields the
//! classic setup: peers on `127.0.0.1:5000`, 100 ms bus wait, and a cyclic
//! frame 200 every 100 ms carrying `0..8`.
//!
//! ```toml
//! listen_addr = "127.0.0.1:5000"
//! poll_timeout_ms = 100
//! writer_channel_capacity = 1024
//! max_record_len = 4096
//!
//! [cyclic]
//! id = 200
//! period_ms = 100
//! data = [0, 1, 2, 3, 4, 5, 6, 7]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::{CyclicSpec, DEFAULT_CYCLIC_ID, DEFAULT_CYCLIC_PERIOD};
use crate::error::{BridgeError, Result};
use crate::protocol::DEFAULT_MAX_RECORD_LEN;
use crate::writer::DEFAULT_CHANNEL_CAPACITY;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Address the peer listener binds to.
    pub listen_addr: String,
    /// Upper bound on one bus wait; also bounds shutdown latency.
    pub poll_timeout_ms: u64,
    /// Records queued per peer before new ones are dropped.
    pub writer_channel_capacity: usize,
    /// Longest accepted peer record, terminator excluded.
    pub max_record_len: usize,
    /// The periodic frame.
    pub cyclic: CyclicConfig,
}

/// `[cyclic]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CyclicConfig {
    pub id: u32,
    pub period_ms: u64,
    pub data: Vec<u8>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            writer_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            cyclic: CyclicConfig::default(),
        }
    }
}

impl Default for CyclicConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_CYCLIC_ID,
            period_ms: DEFAULT_CYCLIC_PERIOD.as_millis() as u64,
            data: (0..8).collect(),
        }
    }
}

impl BridgeConfig {
    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            return Err(BridgeError::Config("listen_addr is empty".to_string()));
        }
        if self.poll_timeout_ms == 0 {
            return Err(BridgeError::Config(
                "poll_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.writer_channel_capacity == 0 {
            return Err(BridgeError::Config(
                "writer_channel_capacity must be non-zero".to_string(),
            ));
        }
        if self.max_record_len == 0 {
            return Err(BridgeError::Config(
                "max_record_len must be non-zero".to_string(),
            ));
        }
        self.cyclic_spec().map(|_| ())
    }

    #[inline]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// The `[cyclic]` section as a validated [`CyclicSpec`].
    pub fn cyclic_spec(&self) -> Result<CyclicSpec> {
        CyclicSpec::new(
            self.cyclic.id,
            Duration::from_millis(self.cyclic.period_ms),
            &self.cyclic.data,
        )
        .map_err(|e| match e {
            BridgeError::Config(msg) => BridgeError::Config(format!("[cyclic] {}", msg)),
            other => BridgeError::Config(format!("[cyclic] {}", other)),
        })
    }
}
