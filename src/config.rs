//! Protocol constants and the tunable `Config`.

/// Fixed wire-format version. Any header carrying another value fails
/// decode with [`crate::Error::ProtocolViolation`].
pub const VERSION: u8 = 0x01;

/// Size in bytes of the fixed frame header.
pub const HEADER_SIZE: usize = 20;

/// Size in bytes of the extension sub-header (`extension_type`, `extension_length`).
pub const EXTENSION_HEADER_SIZE: usize = 2;

/// Maximum application payload carried by a single DATA frame.
pub const MAX_UTP_DATA: usize = 400;

/// Sender-side credit ceiling: the maximum number of un-acked frames a
/// sender may hold in `send_buffer` at once.
pub const UTP_WINDOW_SIZE: u16 = 10;

/// Idle-timeout interval, expressed in microseconds to match the core's
/// monotonic clock unit. On expiry a connection is killed locally.
pub const MAX_UTP_IDLE_US: u64 = 10_000_000;

/// Retry-timer interval, expressed in microseconds.
pub const UTP_RETRY_TIME_US: u64 = 500_000;

/// Interval of the connection table's idle-linger sweep.
pub const SWEEP_INTERVAL_US: u64 = 30_000_000;

/// Tunable knobs for a [`crate::UtpCore`] instance.
///
/// The wire-format invariants (header layout, extension framing, 16-bit
/// sequence space) are never exposed here; only the timing and window
/// parameters an embedder might plausibly want to tune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum un-acked frames a sender may hold at once.
    pub window_size: u16,

    /// Idle timeout in microseconds.
    pub idle_timeout_us: u64,

    /// Retry-timer interval in microseconds.
    pub retry_interval_us: u64,

    /// Periodic connection-table sweep interval in microseconds.
    pub sweep_interval_us: u64,

    /// Maximum DATA payload size in bytes.
    pub max_payload: usize,
}

impl Config {
    /// Returns a [`ConfigBuilder`] seeded with the protocol-mandated defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder(Config::default())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: UTP_WINDOW_SIZE,
            idle_timeout_us: MAX_UTP_IDLE_US,
            retry_interval_us: UTP_RETRY_TIME_US,
            sweep_interval_us: SWEEP_INTERVAL_US,
            max_payload: MAX_UTP_DATA,
        }
    }
}

/// Fluent builder for [`Config`], in a fluent-builder style.
#[derive(Debug, Clone, Copy)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn window_size(mut self, window_size: u16) -> Self {
        self.0.window_size = window_size;
        self
    }

    pub fn idle_timeout_us(mut self, idle_timeout_us: u64) -> Self {
        self.0.idle_timeout_us = idle_timeout_us;
        self
    }

    pub fn retry_interval_us(mut self, retry_interval_us: u64) -> Self {
        self.0.retry_interval_us = retry_interval_us;
        self
    }

    pub fn sweep_interval_us(mut self, sweep_interval_us: u64) -> Self {
        self.0.sweep_interval_us = sweep_interval_us;
        self
    }

    pub fn max_payload(mut self, max_payload: usize) -> Self {
        self.0.max_payload = max_payload;
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.window_size, 10);
        assert_eq!(cfg.idle_timeout_us, 10_000_000);
        assert_eq!(cfg.retry_interval_us, 500_000);
        assert_eq!(cfg.max_payload, 400);
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = Config::builder().window_size(4).max_payload(100).build();
        assert_eq!(cfg.window_size, 4);
        assert_eq!(cfg.max_payload, 100);
        assert_eq!(cfg.retry_interval_us, UTP_RETRY_TIME_US);
    }
}
