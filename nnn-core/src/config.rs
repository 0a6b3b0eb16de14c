use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::PduBuffer;
use crate::fib::Fib;
use crate::nnpt::Nnpt;
use crate::strategy::Context;
use crate::trie::{CountingPolicy, PolicyKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Table sizing and timing knobs for one forwarder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Maximum number of FIB entries; unbounded when absent.
    pub fib_capacity: Option<usize>,
    pub fib_policy: PolicyKind,
    /// Maximum number of buffered destinations; unbounded when absent.
    pub buffer_capacity: Option<usize>,
    pub max_queue_len: usize,
    pub retransmission_ms: u64,
    /// How long before lease expiry a binding is due for renewal.
    pub lease_guard_ms: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            fib_capacity: None,
            fib_policy: PolicyKind::Counting,
            buffer_capacity: None,
            max_queue_len: 64,
            retransmission_ms: 1000,
            lease_guard_ms: 1000,
        }
    }
}

impl ForwarderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fib_capacity == Some(0) {
            return Err(ConfigError::Zero("fib_capacity"));
        }
        if self.buffer_capacity == Some(0) {
            return Err(ConfigError::Zero("buffer_capacity"));
        }
        if self.max_queue_len == 0 {
            return Err(ConfigError::Zero("max_queue_len"));
        }
        if self.lease_guard_ms == 0 {
            return Err(ConfigError::Zero("lease_guard_ms"));
        }
        Ok(())
    }

    pub fn retransmission(&self) -> Duration {
        Duration::from_millis(self.retransmission_ms)
    }

    pub fn lease_guard(&self) -> Duration {
        Duration::from_millis(self.lease_guard_ms)
    }

    pub fn build_fib(&self) -> Fib {
        Fib::with_policy(self.fib_policy.build(self.fib_capacity))
    }

    pub fn build_nnpt(&self) -> Nnpt {
        Nnpt::with_renew_guard(self.lease_guard())
    }

    pub fn build_buffer(&self) -> PduBuffer {
        PduBuffer::with_limits(
            self.retransmission(),
            self.max_queue_len,
            Box::new(CountingPolicy::new(self.buffer_capacity)),
        )
    }

    /// Validate and build a context holding all three tables.
    pub fn build_context(&self) -> Result<Context, ConfigError> {
        self.validate()?;
        Ok(Context::new(
            self.build_fib(),
            self.build_nnpt(),
            self.build_buffer(),
        ))
    }
}
