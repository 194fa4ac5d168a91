use std::time::Duration;

use anyhow::bail;
use codec::request::DEFAULT_PART_SIZE;

pub struct ClusterConfig {
    /// Per-chunk byte ceiling for multipart encoding, and the threshold below
    ///  which a packed payload travels in a single frame. Both peers must use
    ///  the same value - the receiver cannot tell a mis-chunked stream from a
    ///  corrupted one.
    pub part_size: usize,

    /// Capacity of the per-connection inbound packet channel. A peer that
    ///  outruns the dispatcher fills the channel and then stalls in the TCP
    ///  window - that stall is the only flow control this transport has.
    pub recv_channel_capacity: usize,

    /// Capacity of the per-connection write-coalescing queue.
    pub write_queue_capacity: usize,

    /// How long dialing a peer may take before the caller gets an error.
    pub dial_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> ClusterConfig {
        ClusterConfig {
            part_size: DEFAULT_PART_SIZE,
            recv_channel_capacity: 1000,
            write_queue_capacity: 256,
            dial_timeout: Duration::from_secs(5),
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.part_size < 16 {
            bail!("part size {} is too small to be useful", self.part_size);
        }
        // the largest single frame is a name-addressed request just under the
        // threshold: part_size - 1 + 6 + 255 must fit the u16 length prefix
        if self.part_size > 0xf000 {
            bail!(
                "part size {} leaves no room for addressing in the u16 frame length",
                self.part_size
            );
        }
        if self.recv_channel_capacity == 0 {
            bail!("receive channel capacity must be positive");
        }
        if self.write_queue_capacity == 0 {
            bail!("write queue capacity must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ClusterConfig::default().validate().is_ok());
    }

    #[rstest]
    #[case::smallest_useful(16, true)]
    #[case::too_small(4, false)]
    #[case::upper_bound(0xf000, true)]
    #[case::no_room_for_addressing(0x10000, false)]
    fn test_part_size_bounds(#[case] part_size: usize, #[case] valid: bool) {
        let config = ClusterConfig { part_size, ..ClusterConfig::default() };
        assert_eq!(config.validate().is_ok(), valid);
    }

    #[test]
    fn test_zero_capacities_are_rejected() {
        let config = ClusterConfig { recv_channel_capacity: 0, ..ClusterConfig::default() };
        assert!(config.validate().is_err());

        let config = ClusterConfig { write_queue_capacity: 0, ..ClusterConfig::default() };
        assert!(config.validate().is_err());
    }
}
