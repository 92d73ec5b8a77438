//! Configuration structs for booting and talking to the DFE CPU
//!
//! [`Config`] carries the run-time timing parameters. The sizes that shape
//! buffers are compile-time constants, since they have to agree with the
//! firmware build.

/// Bytes written per transfer while streaming an image
pub const CHUNK_SIZE: usize = 256;

/// Size of one mailbox buffer
pub const MAILBOX_LINK_SIZE: usize = 256;

/// Number of mailbox links
pub const NUM_LINKS: usize = 4;

/// Number of DFE cores with an exception flag
pub const NUM_CORES: usize = 4;

/// Longest image path accepted, terminator included
pub const MAX_PATH_LEN: usize = 256;

/// Timing configuration
///
/// All values are in microseconds. A poll loop with a timeout `T` and an
/// interval `I` checks `T / I` times, or once if `I` is zero.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// How long to wait for the DFE to report `READY`
    pub boot_timeout_us: u32,
    /// Delay between two reads of the DFE boot status
    pub boot_interval_us: u32,
    /// How long to wait for the radio CPU before starting the DFE
    pub companion_timeout_us: u32,
    /// Delay between two reads of the radio CPU boot status
    pub companion_interval_us: u32,
    /// How long to wait for a busy mailbox to free up
    pub mailbox_busy_timeout_us: u32,
    /// Delay between two reads of the mailbox busy flag
    pub mailbox_busy_interval_us: u32,
    /// How long to wait for a command response
    pub response_timeout_us: u32,
    /// Delay between two reads of the command status
    pub response_interval_us: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            boot_timeout_us: 10_000_000,
            boot_interval_us: 1_000,
            companion_timeout_us: 1_000_000,
            companion_interval_us: 1_000,
            mailbox_busy_timeout_us: 2_000_000,
            mailbox_busy_interval_us: 100,
            response_timeout_us: 2_000_000,
            response_interval_us: 100,
        }
    }
}

/// Number of checks a poll loop may make before giving up
///
/// The interval is clamped to the timeout first. A zero interval means a
/// single check.
pub fn poll_budget(timeout_us: u32, interval_us: u32) -> (u32, u32) {
    let interval_us = interval_us.min(timeout_us);
    let checks = if interval_us == 0 {
        1
    } else {
        timeout_us / interval_us
    };

    (checks, interval_us)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn budget_is_timeout_over_interval() {
        assert_eq!(poll_budget(10_000, 1_000), (10, 1_000));
        assert_eq!(poll_budget(10_500, 1_000), (10, 1_000));
        assert_eq!(poll_budget(500, 1_000), (1, 500));
    }

    #[test]
    fn zero_interval_checks_once() {
        assert_eq!(poll_budget(10_000, 0), (1, 0));
        assert_eq!(poll_budget(0, 0), (1, 0));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_is_serializable() {
        fn assert_serde<T: serde::Serialize + for<'de> serde::Deserialize<'de>>() {}

        assert_serde::<Config>();
    }
}
