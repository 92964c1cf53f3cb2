//! Brick placement.
//!
//! Operations hand the allocator a snapshot of the devices of one cluster
//! and get back one device per brick. Placement policy lives behind the
//! [`Allocator`] trait; [`SimpleAllocator`] is the default.

use volplane_common::{Error, Result};

/// A device that may receive bricks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub node_id: String,
    pub device_id: String,
    pub zone: u32,
    pub free_kb: u64,
}

pub trait Allocator: Send + Sync {
    /// Choose `num_sets * set_size` devices for bricks needing
    /// `footprint_kb` each. The result is ordered set by set.
    fn place(
        &self,
        candidates: &[DeviceCandidate],
        footprint_kb: u64,
        num_sets: usize,
        set_size: usize,
    ) -> Result<Vec<DeviceCandidate>>;
}

/// First fit by free space. Bricks of one redundancy set always land on
/// distinct nodes, preferring distinct zones.
#[derive(Debug, Default)]
pub struct SimpleAllocator;

impl SimpleAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Allocator for SimpleAllocator {
    fn place(
        &self,
        candidates: &[DeviceCandidate],
        footprint_kb: u64,
        num_sets: usize,
        set_size: usize,
    ) -> Result<Vec<DeviceCandidate>> {
        let mut pool: Vec<DeviceCandidate> = candidates.to_vec();
        let mut placed = Vec::with_capacity(num_sets * set_size);

        for set in 0..num_sets {
            let mut nodes: Vec<String> = Vec::with_capacity(set_size);
            let mut zones: Vec<u32> = Vec::with_capacity(set_size);

            for _ in 0..set_size {
                // Most free space first, then an unused zone
                pool.sort_by(|a, b| b.free_kb.cmp(&a.free_kb));
                let eligible = |d: &&mut DeviceCandidate| {
                    d.free_kb >= footprint_kb && !nodes.contains(&d.node_id)
                };
                let pick = pool
                    .iter_mut()
                    .filter(eligible)
                    .min_by_key(|d| usize::from(zones.contains(&d.zone)))
                    .ok_or_else(|| {
                        Error::NoSpace(format!(
                            "no device with {footprint_kb} KB free on a distinct node for set {set}"
                        ))
                    })?;

                pick.free_kb -= footprint_kb;
                nodes.push(pick.node_id.clone());
                zones.push(pick.zone);
                placed.push(pick.clone());
            }
        }
        Ok(placed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(node: &str, device: &str, zone: u32, free_kb: u64) -> DeviceCandidate {
        DeviceCandidate {
            node_id: node.into(),
            device_id: device.into(),
            zone,
            free_kb,
        }
    }

    #[test]
    fn test_sets_span_distinct_nodes() {
        let candidates = vec![
            device("n1", "d1", 1, 100),
            device("n1", "d2", 1, 100),
            device("n2", "d3", 2, 100),
            device("n3", "d4", 3, 100),
        ];
        let placed = SimpleAllocator::new()
            .place(&candidates, 40, 2, 3)
            .unwrap();
        assert_eq!(placed.len(), 6);
        for set in placed.chunks(3) {
            let mut nodes: Vec<&str> = set.iter().map(|d| d.node_id.as_str()).collect();
            nodes.sort_unstable();
            nodes.dedup();
            assert_eq!(nodes.len(), 3);
        }
    }

    #[test]
    fn test_not_enough_nodes_is_no_space() {
        let candidates = vec![device("n1", "d1", 1, 1000), device("n2", "d2", 1, 1000)];
        let err = SimpleAllocator::new()
            .place(&candidates, 10, 1, 3)
            .unwrap_err();
        assert!(matches!(err, Error::NoSpace(_)));
    }

    #[test]
    fn test_free_space_is_consumed_across_sets() {
        let candidates = vec![device("n1", "d1", 1, 100), device("n2", "d2", 2, 100)];
        let allocator = SimpleAllocator::new();
        assert!(allocator.place(&candidates, 50, 2, 2).is_ok());
        assert!(allocator.place(&candidates, 50, 3, 2).is_err());
    }

    #[test]
    fn test_prefers_unused_zone() {
        let candidates = vec![
            device("n1", "d1", 1, 300),
            device("n2", "d2", 1, 200),
            device("n3", "d3", 2, 100),
        ];
        let placed = SimpleAllocator::new()
            .place(&candidates, 10, 1, 2)
            .unwrap();
        assert_eq!(placed[0].device_id, "d1");
        assert_eq!(placed[1].device_id, "d3");
    }
}
