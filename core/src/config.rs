use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tunables of a reader session.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Pause between two full poll iterations.
    #[cfg_attr(feature = "serde", serde(with = "millis", rename = "poll_interval_ms"))]
    pub poll_interval: Duration,

    /// Budget of every status query and read in the poll loop.
    pub max_attempts: u32,

    /// Budget of both the write and the read-back when provisioning.
    pub provision_attempts: u32,

    /// Capacity of the presence event channel.
    pub event_buffer: usize,
}

impl SessionConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_provision_attempts(mut self, provision_attempts: u32) -> Self {
        self.provision_attempts = provision_attempts;
        self
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }

    pub fn poll_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
    }

    pub fn provision_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.provision_attempts)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: RetryPolicy::DEFAULT.max_attempts,
            provision_attempts: RetryPolicy::PROVISION.max_attempts,
            event_buffer: 16,
        }
    }
}

#[cfg(feature = "serde")]
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
