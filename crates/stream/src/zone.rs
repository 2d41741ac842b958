use glam::Vec3;
use meridian_common::ZoneId;
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Extent used for the unbounded Y/Z axes of a linear partition.
pub const UNBOUNDED: f32 = 1e9;

/// Axis-aligned bounds, half-open: `min <= p < max` on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl ZoneBounds {
    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmplt(self.max).all()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    /// Index of the shard that simulates this zone.
    pub shard_index: usize,
    pub node_id: String,
    pub bounds: ZoneBounds,
    pub version: u32,
}

/// Static partition of world space into zones.
#[derive(Debug, Clone)]
pub struct ZoneManager {
    node_id: String,
    zones: Vec<Zone>,
}

impl ZoneManager {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            zones: Vec::new(),
        }
    }

    /// Split X into `count` slabs of `width`, zone `i` covering
    /// `[i * width, (i + 1) * width)`. Y and Z are unbounded.
    pub fn init_linear_x(&mut self, count: u32, width: f32) -> Result<&[Zone], StreamError> {
        if count == 0 {
            return Err(StreamError::NoZones);
        }
        if !(width.is_finite() && width > 0.0) {
            return Err(StreamError::InvalidZoneWidth(width));
        }
        self.zones = (0..count)
            .map(|i| Zone {
                id: ZoneId(i),
                shard_index: i as usize,
                node_id: self.node_id.clone(),
                bounds: ZoneBounds {
                    min: Vec3::new(i as f32 * width, -UNBOUNDED, -UNBOUNDED),
                    max: Vec3::new((i + 1) as f32 * width, UNBOUNDED, UNBOUNDED),
                },
                version: 1,
            })
            .collect();
        tracing::info!(count, width, node = %self.node_id, "zones initialised");
        Ok(&self.zones)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn get(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == id)
    }

    pub fn by_shard_index(&self, index: usize) -> Option<&Zone> {
        self.zones.iter().find(|z| z.shard_index == index)
    }

    /// Zone whose X range contains `pos.x`.
    pub fn zone_by_position(&self, pos: Vec3) -> Option<&Zone> {
        self.zones
            .iter()
            .find(|z| pos.x >= z.bounds.min.x && pos.x < z.bounds.max.x)
    }

    /// Neighbour across the X edge `pos` has crossed, if any. Leaving
    /// through Y/Z, or past either end of the partition, yields `None`.
    pub fn neighbor_for_exit(&self, current: &Zone, pos: Vec3) -> Option<&Zone> {
        if pos.x < current.bounds.min.x {
            let id = current.id.0.checked_sub(1)?;
            return self.get(ZoneId(id));
        }
        if pos.x >= current.bounds.max.x {
            return self.get(ZoneId(current.id.0 + 1));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_zones() -> ZoneManager {
        let mut zm = ZoneManager::new("node-a");
        zm.init_linear_x(3, 512.0).unwrap();
        zm
    }

    #[test]
    fn linear_bounds() {
        let zm = three_zones();
        let z1 = zm.get(ZoneId(1)).unwrap();
        assert_eq!(z1.bounds.min.x, 512.0);
        assert_eq!(z1.bounds.max.x, 1024.0);
        assert_eq!(z1.bounds.min.y, -UNBOUNDED);
        assert_eq!(z1.version, 1);
        assert_eq!(z1.node_id, "node-a");
        assert!(z1.bounds.contains(Vec3::new(512.0, 0.0, 0.0)));
        assert!(!z1.bounds.contains(Vec3::new(1024.0, 0.0, 0.0)));
    }

    #[test]
    fn position_lookup() {
        let zm = three_zones();
        assert_eq!(zm.zone_by_position(Vec3::new(10.0, 0.0, 0.0)).unwrap().id, ZoneId(0));
        assert_eq!(zm.zone_by_position(Vec3::new(1023.9, 5.0, 0.0)).unwrap().id, ZoneId(1));
        assert!(zm.zone_by_position(Vec3::new(-1.0, 0.0, 0.0)).is_none());
        assert!(zm.zone_by_position(Vec3::new(1536.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn neighbours_at_edges() {
        let zm = three_zones();
        let z0 = zm.get(ZoneId(0)).unwrap();
        let z2 = zm.get(ZoneId(2)).unwrap();

        let right = zm.neighbor_for_exit(z0, Vec3::new(512.0, 0.0, 0.0)).unwrap();
        assert_eq!(right.id, ZoneId(1));
        assert!(zm.neighbor_for_exit(z0, Vec3::new(-0.5, 0.0, 0.0)).is_none());
        assert!(zm.neighbor_for_exit(z2, Vec3::new(2000.0, 0.0, 0.0)).is_none());
        assert_eq!(
            zm.neighbor_for_exit(z2, Vec3::new(1000.0, 0.0, 0.0)).unwrap().id,
            ZoneId(1)
        );
        assert!(zm.neighbor_for_exit(z0, Vec3::new(100.0, 5e9, 0.0)).is_none());
    }

    #[test]
    fn init_rejects_bad_input() {
        let mut zm = ZoneManager::new("n");
        assert_eq!(zm.init_linear_x(0, 10.0).unwrap_err(), StreamError::NoZones);
        assert!(matches!(
            zm.init_linear_x(2, -1.0),
            Err(StreamError::InvalidZoneWidth(_))
        ));
    }
}
