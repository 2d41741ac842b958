use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;

use glam::Vec3;
use meridian_common::EntityId;

use crate::error::StreamError;

/// A 3D cell coordinate in the AOI grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Uniform grid bucketing entities by `floor(position / cell_size)`.
///
/// Only non-empty cells are stored. The grid answers coarse candidate
/// queries; exact distance filtering is the caller's job (see
/// [`within_radius`]).
#[derive(Debug, Clone)]
pub struct AoiGrid {
    cell_size: f32,
    cells: HashMap<CellCoord, HashSet<EntityId>>,
    entity_cell: HashMap<EntityId, CellCoord>,
}

impl AoiGrid {
    pub fn new(cell_size: f32) -> Result<Self, StreamError> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(StreamError::InvalidCellSize(cell_size));
        }
        Ok(Self {
            cell_size,
            cells: HashMap::new(),
            entity_cell: HashMap::new(),
        })
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn position_to_cell(&self, pos: Vec3) -> CellCoord {
        CellCoord {
            x: (pos.x / self.cell_size).floor() as i32,
            y: (pos.y / self.cell_size).floor() as i32,
            z: (pos.z / self.cell_size).floor() as i32,
        }
    }

    /// Place or move an entity. Returns true when its cell changed.
    pub fn upsert(&mut self, entity: EntityId, pos: Vec3) -> bool {
        let cell = self.position_to_cell(pos);
        let prev = self.entity_cell.insert(entity, cell);
        if prev == Some(cell) {
            return false;
        }
        if let Some(prev) = prev {
            self.detach(entity, prev);
        }
        self.cells.entry(cell).or_default().insert(entity);
        true
    }

    pub fn remove(&mut self, entity: EntityId) -> bool {
        match self.entity_cell.remove(&entity) {
            Some(cell) => {
                self.detach(entity, cell);
                true
            }
            None => false,
        }
    }

    /// Drop every entity for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(EntityId) -> bool) -> usize {
        let gone: Vec<EntityId> = self
            .entity_cell
            .keys()
            .copied()
            .filter(|&e| !keep(e))
            .collect();
        for e in &gone {
            self.remove(*e);
        }
        gone.len()
    }

    fn detach(&mut self, entity: EntityId, cell: CellCoord) {
        if let Some(set) = self.cells.get_mut(&cell) {
            set.remove(&entity);
            if set.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    pub fn cell_of(&self, entity: EntityId) -> Option<CellCoord> {
        self.entity_cell.get(&entity).copied()
    }

    /// Entities in every cell within `ceil(radius / cell_size)` cells of
    /// `pos` along each axis. Unordered, unfiltered by distance.
    ///
    /// The cube is clamped to the `i32` cell range. When it spans more cells
    /// than are occupied, the occupied cells are scanned instead.
    pub fn query_cells(&self, pos: Vec3, radius: f32) -> Vec<EntityId> {
        let center = self.position_to_cell(pos);
        let r = (radius.max(0.0) / self.cell_size).ceil() as i32;
        let axis = |c: i32| c.saturating_sub(r)..=c.saturating_add(r);
        let (xs, ys, zs) = (axis(center.x), axis(center.y), axis(center.z));
        let span = |a: &RangeInclusive<i32>| (i64::from(*a.end()) - i64::from(*a.start()) + 1) as u64;
        let volume = span(&xs).saturating_mul(span(&ys)).saturating_mul(span(&zs));

        if volume > self.cells.len() as u64 {
            return self
                .cells
                .iter()
                .filter(|(c, _)| xs.contains(&c.x) && ys.contains(&c.y) && zs.contains(&c.z))
                .flat_map(|(_, set)| set.iter().copied())
                .collect();
        }
        let mut out = Vec::new();
        for x in xs {
            for y in ys.clone() {
                for z in zs.clone() {
                    if let Some(set) = self.cells.get(&CellCoord::new(x, y, z)) {
                        out.extend(set.iter().copied());
                    }
                }
            }
        }
        out
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.entity_cell.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_cell.is_empty()
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.entity_cell.clear();
    }
}

/// Exact squared-distance test on all three axes.
pub fn within_radius(a: Vec3, b: Vec3, radius: f32) -> bool {
    a.distance_squared(b) <= radius * radius
}
