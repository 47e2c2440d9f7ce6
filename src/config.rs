//! Construction-time configuration of a dispatcher.

use crate::error::ConfigError;
pub use crate::overflow::{Capacity, OverflowPolicy};
pub use crate::replay::Retention;

/// Default bounded capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// Initial slot count of an unbounded buffer.
pub const UNBOUNDED_INITIAL_CAPACITY: usize = 16;

/// How many subscriptions may be live at once, and what a new one sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmissionMode {
    /// Exactly one live subscription. It receives everything still buffered,
    /// including items published before it attached.
    Unicast,
    /// Any number of subscriptions, each starting at the write cursor.
    #[default]
    Multicast,
    /// Any number of subscriptions, each seeded with retained history first.
    MulticastReplay(Retention),
}

impl EmissionMode {
    pub fn replay_retention(&self) -> Option<Retention> {
        match self {
            EmissionMode::MulticastReplay(retention) => Some(*retention),
            _ => None,
        }
    }
}

/// Configuration for a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatcherConfig {
    /// Structural limit of the buffer.
    pub capacity: Capacity,

    /// Strategy applied when a publish finds the buffer full.
    pub overflow_policy: OverflowPolicy,

    /// Unicast, multicast or multicast with replay.
    pub emission_mode: EmissionMode,
}

impl DispatcherConfig {
    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> DispatcherConfigBuilder {
        DispatcherConfigBuilder::default()
    }

    /// Unicast with default capacity and policy.
    #[must_use]
    pub fn unicast() -> Self {
        Self {
            emission_mode: EmissionMode::Unicast,
            ..Default::default()
        }
    }

    /// Multicast with default capacity and policy.
    #[must_use]
    pub fn multicast() -> Self {
        Self::default()
    }

    /// Multicast with replay of the given retention.
    #[must_use]
    pub fn replay(retention: Retention) -> Self {
        Self {
            emission_mode: EmissionMode::MulticastReplay(retention),
            ..Default::default()
        }
    }

    /// Checks the configuration for values the dispatcher cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == Capacity::Bounded(0) {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.emission_mode.replay_retention() == Some(Retention::KeepLast(0)) {
            return Err(ConfigError::ZeroRetention);
        }
        Ok(())
    }

    /// Slot count the ring buffer starts with.
    pub(crate) fn initial_slots(&self) -> usize {
        match self.capacity {
            Capacity::Bounded(n) => n.max(1),
            Capacity::Unbounded => UNBOUNDED_INITIAL_CAPACITY,
        }
    }
}

/// Builder for [`DispatcherConfig`].
#[derive(Debug, Default)]
pub struct DispatcherConfigBuilder {
    capacity: Option<Capacity>,
    overflow_policy: Option<OverflowPolicy>,
    emission_mode: Option<EmissionMode>,
}

impl DispatcherConfigBuilder {
    /// Sets the buffer capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the overflow policy.
    #[must_use]
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = Some(policy);
        self
    }

    /// Sets the emission mode.
    #[must_use]
    pub fn emission_mode(mut self, mode: EmissionMode) -> Self {
        self.emission_mode = Some(mode);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<DispatcherConfig, ConfigError> {
        let config = DispatcherConfig {
            capacity: self.capacity.unwrap_or_default(),
            overflow_policy: self.overflow_policy.unwrap_or_default(),
            emission_mode: self.emission_mode.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}
