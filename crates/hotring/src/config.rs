/// Configuration for [`ByteRing`](crate::ByteRing).
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    /// Requested capacity in bytes; rounded up to the next power of two.
    pub capacity_bytes: usize,
    /// Enable metrics collection (slight overhead)
    pub enable_metrics: bool,
}

impl RingConfig {
    /// Maximum ring capacity (1 GiB) to prevent excessive memory usage.
    pub const MAX_CAPACITY: usize = 1 << 30;

    /// Creates a new configuration with custom settings.
    ///
    /// # Panics
    ///
    /// Panics if `capacity_bytes` is 0 or would round above [`Self::MAX_CAPACITY`].
    pub const fn new(capacity_bytes: usize, enable_metrics: bool) -> Self {
        assert!(capacity_bytes > 0, "capacity_bytes must be non-zero");
        assert!(
            capacity_bytes <= Self::MAX_CAPACITY,
            "capacity_bytes must not exceed 1 GiB"
        );

        Self {
            capacity_bytes,
            enable_metrics,
        }
    }

    /// Returns the effective capacity: `capacity_bytes` rounded up to a power of two.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity_bytes.next_power_of_two()
    }

    /// Returns the mask for index wrapping.
    #[inline]
    pub const fn mask(&self) -> usize {
        self.capacity() - 1
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 1 << 20, // 1 MiB
            enable_metrics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_up_to_power_of_two() {
        let config = RingConfig::new(1000, false);
        assert_eq!(config.capacity(), 1024);
        assert_eq!(config.mask(), 1023);
    }

    #[test]
    fn test_exact_power_of_two_unchanged() {
        let config = RingConfig::new(4096, false);
        assert_eq!(config.capacity(), 4096);
    }
}
