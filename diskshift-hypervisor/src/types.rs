//! Core types shared by all hypervisor backends.

use serde::{Deserialize, Serialize};

/// Progress counters of an active block-copy job, as reported by the
/// hypervisor for a single disk device.
///
/// The orchestrator never owns this state; it is queried fresh on every
/// poll. An absent job (the query returning `None`) means the device has
/// no copy in flight, which monitoring treats as complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockJobStatus {
    /// Bytes processed so far.
    pub cur: u64,
    /// Total bytes to process.
    pub end: u64,
}

impl BlockJobStatus {
    /// Completion percentage, floor-divided.
    ///
    /// A zeroed `end` counter is libvirt's "no job" shape and reads as 100%.
    pub fn percent(&self) -> u8 {
        if self.end == 0 || self.cur >= self.end {
            100
        } else {
            // Widened so byte counters near u64::MAX cannot overflow the
            // intermediate product.
            (100u128 * u128::from(self.cur) / u128::from(self.end)) as u8
        }
    }

    /// Whether the job has copied everything it was asked to.
    pub fn is_complete(&self) -> bool {
        self.percent() == 100
    }
}

/// Destination of a block-copy job: either a flat file or a volume inside
/// a named storage pool. Mutually exclusive by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockCopyTarget {
    /// Copy into a file at the given absolute path.
    File {
        /// Full path of the destination backing file.
        path: String,
    },
    /// Copy into a managed storage-pool volume.
    Volume {
        /// Storage pool name.
        pool: String,
        /// Volume name within the pool.
        volume: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_floors() {
        let status = BlockJobStatus { cur: 1, end: 3 };
        assert_eq!(status.percent(), 33);
        assert!(!status.is_complete());
    }

    #[test]
    fn percent_caps_at_100() {
        let status = BlockJobStatus { cur: 10, end: 3 };
        assert_eq!(status.percent(), 100);
        assert!(status.is_complete());
    }

    #[test]
    fn percent_handles_huge_byte_counters() {
        let status = BlockJobStatus {
            cur: u64::MAX / 2,
            end: u64::MAX,
        };
        assert_eq!(status.percent(), 49);

        let status = BlockJobStatus {
            cur: u64::MAX - 1,
            end: u64::MAX,
        };
        assert_eq!(status.percent(), 99);
        assert!(!status.is_complete());
    }

    #[test]
    fn zeroed_counters_are_complete() {
        let status = BlockJobStatus { cur: 0, end: 0 };
        assert!(status.is_complete());
    }
}
