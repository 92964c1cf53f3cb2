//! Core type definitions for Volplane
//!
//! This module defines the fundamental types used throughout the system
//! including identifiers, durability policies and device storage accounting.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of kilobytes in a gigabyte; all device and brick sizes are in KB
pub const KB_PER_GB: u64 = 1024 * 1024;

/// Generate a new opaque entity identifier (32 lowercase hex characters)
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Replication/dispersion scheme applied to a volume.
///
/// The variant is serialized with an explicit tag so that stored records
/// and JSON dumps reconstruct the right scheme on load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityPolicy {
    /// Plain distribution, one brick per set
    #[default]
    None,
    /// N-way replication
    Replica { replica: u32 },
    /// Erasure coded dispersion
    Dispersion { data: u32, redundancy: u32 },
}

impl DurabilityPolicy {
    pub const DEFAULT_REPLICA: u32 = 3;
    /// Largest number of bricks a single redundancy set may span
    pub const MAX_SET_SIZE: u32 = 64;

    /// Number of bricks that must appear together in one create/add operation
    #[must_use]
    pub const fn set_size(&self) -> usize {
        match self {
            Self::None => 1,
            Self::Replica { replica } => *replica as usize,
            Self::Dispersion { data, redundancy } => data.saturating_add(*redundancy) as usize,
        }
    }

    /// How many redundancy sets may be named in a single add-brick command
    #[must_use]
    pub const fn max_sets_per_command(&self) -> usize {
        match self {
            Self::None => 15,
            Self::Replica { .. } => 5,
            Self::Dispersion { .. } => 1,
        }
    }

    /// Size in KB of each brick when `volume_size_kb` is spread over `num_sets`
    #[must_use]
    pub const fn brick_size_kb(&self, volume_size_kb: u64, num_sets: u64) -> u64 {
        if num_sets == 0 {
            return 0;
        }
        match self {
            Self::None | Self::Replica { .. } => volume_size_kb / num_sets,
            Self::Dispersion { data, .. } => volume_size_kb / num_sets.saturating_mul(*data as u64),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::None => Ok(()),
            Self::Replica { replica } => {
                if replica == 0 {
                    return Err(Error::validation("replica count must be at least 1"));
                }
                if replica > Self::MAX_SET_SIZE {
                    return Err(Error::validation(format!(
                        "replica count {replica} exceeds the maximum of {}",
                        Self::MAX_SET_SIZE
                    )));
                }
                Ok(())
            }
            Self::Dispersion { data, redundancy } => {
                if data < 2 {
                    return Err(Error::validation(
                        "dispersion requires at least 2 data bricks",
                    ));
                }
                if redundancy == 0 || redundancy >= data {
                    return Err(Error::validation(format!(
                        "invalid dispersion redundancy {redundancy} for {data} data bricks"
                    )));
                }
                match data.checked_add(redundancy) {
                    Some(total) if total <= Self::MAX_SET_SIZE => Ok(()),
                    _ => Err(Error::validation(format!(
                        "dispersion {data}+{redundancy} exceeds the maximum set size of {}",
                        Self::MAX_SET_SIZE
                    ))),
                }
            }
        }
    }
}

impl fmt::Display for DurabilityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Replica { replica } => write!(f, "replica {replica}"),
            Self::Dispersion { data, redundancy } => write!(f, "disperse {data}+{redundancy}"),
        }
    }
}

/// Administrative state of a node or device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    #[default]
    Online,
    Offline,
    Failed,
}

/// Capacity accounting for a device, in KB
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSize {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

impl StorageSize {
    #[must_use]
    pub const fn new(total: u64) -> Self {
        Self {
            total,
            free: total,
            used: 0,
        }
    }

    /// Reserve `amount` KB, failing if the device does not have it
    pub fn allocate(&mut self, amount: u64) -> Result<()> {
        if amount > self.free {
            return Err(Error::NoSpace(format!(
                "requested {amount} KB, only {} KB free",
                self.free
            )));
        }
        self.free -= amount;
        self.used += amount;
        Ok(())
    }

    /// Return `amount` KB to the free pool
    pub const fn release(&mut self, amount: u64) {
        let amount = if amount > self.used { self.used } else { amount };
        self.used -= amount;
        self.free += amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_sizes() {
        assert_eq!(DurabilityPolicy::None.set_size(), 1);
        assert_eq!(DurabilityPolicy::Replica { replica: 3 }.set_size(), 3);
        assert_eq!(
            DurabilityPolicy::Dispersion {
                data: 4,
                redundancy: 2
            }
            .set_size(),
            6
        );
    }

    #[test]
    fn test_validate() {
        assert!(DurabilityPolicy::Replica { replica: 0 }.validate().is_err());
        assert!(DurabilityPolicy::Replica { replica: 3 }.validate().is_ok());
        assert!(
            DurabilityPolicy::Dispersion {
                data: 4,
                redundancy: 4
            }
            .validate()
            .is_err()
        );
        assert!(
            DurabilityPolicy::Dispersion {
                data: 8,
                redundancy: 3
            }
            .validate()
            .is_ok()
        );
    }

    #[test]
    fn test_validate_rejects_oversized_sets() {
        let huge = DurabilityPolicy::Dispersion {
            data: u32::MAX,
            redundancy: 1,
        };
        assert!(huge.validate().unwrap_err().is_validation());
        assert_eq!(huge.set_size(), u32::MAX as usize);
        assert_eq!(huge.brick_size_kb(KB_PER_GB, u64::MAX), 0);

        assert!(
            DurabilityPolicy::Replica {
                replica: DurabilityPolicy::MAX_SET_SIZE + 1
            }
            .validate()
            .is_err()
        );
        assert!(
            DurabilityPolicy::Dispersion {
                data: 60,
                redundancy: 4
            }
            .validate()
            .is_ok()
        );
        assert!(
            DurabilityPolicy::Dispersion {
                data: 60,
                redundancy: 5
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_brick_size() {
        let replica = DurabilityPolicy::Replica { replica: 3 };
        assert_eq!(replica.brick_size_kb(100 * KB_PER_GB, 2), 50 * KB_PER_GB);
        let ec = DurabilityPolicy::Dispersion {
            data: 4,
            redundancy: 2,
        };
        assert_eq!(ec.brick_size_kb(100 * KB_PER_GB, 1), 25 * KB_PER_GB);
    }

    #[test]
    fn test_policy_tag_survives_json_and_bincode() {
        let policy = DurabilityPolicy::Dispersion {
            data: 4,
            redundancy: 2,
        };
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("dispersion"));
        assert_eq!(
            serde_json::from_str::<DurabilityPolicy>(&json).unwrap(),
            policy
        );
        let bytes = bincode::serialize(&policy).unwrap();
        assert_eq!(
            bincode::deserialize::<DurabilityPolicy>(&bytes).unwrap(),
            policy
        );
    }

    #[test]
    fn test_storage_accounting() {
        let mut size = StorageSize::new(100);
        size.allocate(60).unwrap();
        assert_eq!(size.free, 40);
        assert!(size.allocate(50).is_err());
        size.release(60);
        assert_eq!(size, StorageSize::new(100));
    }

    #[test]
    fn test_new_id_is_hex() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
