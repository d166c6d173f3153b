//! Configuration for documents and awareness.

use std::time::Duration;
use ynb_core::ClientId;

/// Configuration for a shared document.
#[derive(Clone, Debug)]
pub struct DocConfig {
    /// Fixed replica id. A random id is drawn when unset.
    pub client_id: Option<ClientId>,
    /// Tracked transactions closer together than this merge into one undo step.
    pub capture_timeout: Duration,
    /// Buffer size of the change and update channels.
    pub event_capacity: usize,
    /// Presence settings for the container's awareness channel.
    pub awareness: AwarenessConfig,
}

impl Default for DocConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            capture_timeout: Duration::ZERO,
            event_capacity: 100,
            awareness: AwarenessConfig::default(),
        }
    }
}

impl DocConfig {
    pub fn builder() -> DocConfigBuilder {
        DocConfigBuilder::default()
    }

    /// The configured client id, or a fresh random one.
    pub fn resolve_client_id(&self) -> ClientId {
        self.client_id.unwrap_or_else(random_client_id)
    }
}

/// Draw a random replica id that fits in 53 bits.
pub fn random_client_id() -> ClientId {
    (ulid::Ulid::new().random() as u64) & ((1u64 << 53) - 1)
}

/// Builder for [`DocConfig`].
#[derive(Default)]
pub struct DocConfigBuilder {
    config: DocConfig,
}

impl DocConfigBuilder {
    pub fn client_id(mut self, id: ClientId) -> Self {
        self.config.client_id = Some(id);
        self
    }

    pub fn capture_timeout(mut self, timeout: Duration) -> Self {
        self.config.capture_timeout = timeout;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn awareness(mut self, awareness: AwarenessConfig) -> Self {
        self.config.awareness = awareness;
        self
    }

    pub fn build(self) -> DocConfig {
        self.config
    }
}

/// Timing of the awareness liveness protocol.
#[derive(Clone, Debug)]
pub struct AwarenessConfig {
    /// Period of the outdated-state check.
    pub check_interval: Duration,
    /// The local state is re-broadcast once it is this old.
    pub renew_after: Duration,
    /// Remote states not refreshed for this long are dropped.
    pub outdated_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for AwarenessConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(3),
            renew_after: Duration::from_secs(15),
            outdated_timeout: Duration::from_secs(30),
            event_capacity: 100,
        }
    }
}

impl AwarenessConfig {
    pub fn builder() -> AwarenessConfigBuilder {
        AwarenessConfigBuilder::default()
    }
}

/// Builder for [`AwarenessConfig`].
#[derive(Default)]
pub struct AwarenessConfigBuilder {
    config: AwarenessConfig,
}

impl AwarenessConfigBuilder {
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.config.check_interval = interval;
        self
    }

    pub fn renew_after(mut self, after: Duration) -> Self {
        self.config.renew_after = after;
        self
    }

    pub fn outdated_timeout(mut self, timeout: Duration) -> Self {
        self.config.outdated_timeout = timeout;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> AwarenessConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DocConfig::default();
        assert_eq!(config.capture_timeout, Duration::ZERO);
        assert_eq!(config.awareness.check_interval, Duration::from_secs(3));
        assert_eq!(config.awareness.renew_after, Duration::from_secs(15));
        assert_eq!(config.awareness.outdated_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder() {
        let config = DocConfig::builder()
            .client_id(42)
            .event_capacity(0)
            .awareness(
                AwarenessConfig::builder()
                    .outdated_timeout(Duration::from_millis(50))
                    .build(),
            )
            .build();

        assert_eq!(config.resolve_client_id(), 42);
        assert_eq!(config.event_capacity, 1);
        assert_eq!(config.awareness.outdated_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_random_client_ids_differ() {
        let a = random_client_id();
        let b = random_client_id();
        assert_ne!(a, b);
        assert!(a < (1u64 << 53));
    }
}
