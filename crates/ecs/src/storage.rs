//! Sparse-set component storage.
//!
//! Each store maps entity slots to dense rows. Structured stores keep one
//! column per field, `count` elements per row. Removal swaps the last row
//! into the hole, so rows stay packed with no tombstones.

use meridian_common::EntityId;

use crate::component::{ComponentDef, ComponentId, ComponentKind, FieldType};

const NO_ROW: u32 = u32::MAX;

/// Numeric column backing one structured field.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    F32(Vec<f32>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    F64(Vec<f64>),
}

impl Column {
    pub fn new(ty: FieldType) -> Self {
        match ty {
            FieldType::F32 => Self::F32(Vec::new()),
            FieldType::I32 => Self::I32(Vec::new()),
            FieldType::U32 => Self::U32(Vec::new()),
            FieldType::F64 => Self::F64(Vec::new()),
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Self::F32(_) => FieldType::F32,
            Self::I32(_) => FieldType::I32,
            Self::U32(_) => FieldType::U32,
            Self::F64(_) => FieldType::F64,
        }
    }

    fn push_zeros(&mut self, n: usize) {
        match self {
            Self::F32(v) => v.resize(v.len() + n, 0.0),
            Self::I32(v) => v.resize(v.len() + n, 0),
            Self::U32(v) => v.resize(v.len() + n, 0),
            Self::F64(v) => v.resize(v.len() + n, 0.0),
        }
    }

    fn swap_remove_row(&mut self, row: usize, count: usize) {
        match self {
            Self::F32(v) => swap_remove_chunk(v, row, count),
            Self::I32(v) => swap_remove_chunk(v, row, count),
            Self::U32(v) => swap_remove_chunk(v, row, count),
            Self::F64(v) => swap_remove_chunk(v, row, count),
        }
    }

    /// Copy a row out as f64, for the name-keyed debug layer.
    pub fn row_f64(&self, row: usize, count: usize) -> Vec<f64> {
        let range = row * count..(row + 1) * count;
        match self {
            Self::F32(v) => v[range].iter().map(|&x| x as f64).collect(),
            Self::I32(v) => v[range].iter().map(|&x| x as f64).collect(),
            Self::U32(v) => v[range].iter().map(|&x| x as f64).collect(),
            Self::F64(v) => v[range].to_vec(),
        }
    }

    /// Write up to `count` values into a row, converting from f64.
    pub fn set_row_f64(&mut self, row: usize, count: usize, values: &[f64]) {
        let n = values.len().min(count);
        let base = row * count;
        match self {
            Self::F32(v) => v[base..base + n]
                .iter_mut()
                .zip(values)
                .for_each(|(d, &s)| *d = s as f32),
            Self::I32(v) => v[base..base + n]
                .iter_mut()
                .zip(values)
                .for_each(|(d, &s)| *d = s as i32),
            Self::U32(v) => v[base..base + n]
                .iter_mut()
                .zip(values)
                .for_each(|(d, &s)| *d = s as u32),
            Self::F64(v) => v[base..base + n].copy_from_slice(&values[..n]),
        }
    }
}

fn swap_remove_chunk<T: Copy>(v: &mut Vec<T>, row: usize, count: usize) {
    let last = v.len() / count - 1;
    if row != last {
        for k in 0..count {
            v.swap(row * count + k, last * count + k);
        }
    }
    v.truncate(last * count);
}

/// Entity slot → dense row mapping.
#[derive(Debug, Clone, Default)]
pub struct SparseIndex {
    sparse: Vec<u32>,
    dense: Vec<EntityId>,
}

impl SparseIndex {
    pub fn row_of(&self, entity: EntityId) -> Option<usize> {
        let row = *self.sparse.get(entity.index())?;
        if row == NO_ROW {
            return None;
        }
        // Generation check: a recycled slot must not see the old holder's row.
        (self.dense[row as usize] == entity).then_some(row as usize)
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.row_of(entity).is_some()
    }

    fn push(&mut self, entity: EntityId) -> usize {
        let slot = entity.index();
        if slot >= self.sparse.len() {
            self.sparse.resize(slot + 1, NO_ROW);
        }
        let row = self.dense.len();
        self.sparse[slot] = row as u32;
        self.dense.push(entity);
        row
    }

    /// Swap-remove; returns the freed row.
    fn swap_remove(&mut self, entity: EntityId) -> Option<usize> {
        let row = self.row_of(entity)?;
        let last = self.dense.len() - 1;
        if row != last {
            let moved = self.dense[last];
            self.dense[row] = moved;
            self.sparse[moved.index()] = row as u32;
        }
        self.dense.pop();
        self.sparse[entity.index()] = NO_ROW;
        Some(row)
    }

    pub fn entities(&self) -> &[EntityId] {
        &self.dense
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }
}

/// Storage for one component type.
///
/// Tag stores hold only the sparse index. Structured stores add one column
/// per field plus a per-row changed flag.
#[derive(Debug, Clone)]
pub struct ComponentStore {
    id: ComponentId,
    kind: ComponentKind,
    counts: Vec<usize>,
    index: SparseIndex,
    columns: Vec<Column>,
    changed: Vec<bool>,
}

impl ComponentStore {
    pub fn new(id: ComponentId, def: &ComponentDef) -> Self {
        let (counts, columns) = match def.kind {
            ComponentKind::Tag => (Vec::new(), Vec::new()),
            ComponentKind::Structured => (
                def.fields.iter().map(|f| f.count).collect(),
                def.fields.iter().map(|f| Column::new(f.ty)).collect(),
            ),
        };
        Self {
            id,
            kind: def.kind,
            counts,
            index: SparseIndex::default(),
            columns,
            changed: Vec::new(),
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.index.contains(entity)
    }

    pub fn row_of(&self, entity: EntityId) -> Option<usize> {
        self.index.row_of(entity)
    }

    /// Append a zero-filled row for `entity`. Caller ensures it is absent.
    pub(crate) fn insert(&mut self, entity: EntityId) -> usize {
        let row = self.index.push(entity);
        for (col, &count) in self.columns.iter_mut().zip(&self.counts) {
            col.push_zeros(count);
        }
        if self.kind == ComponentKind::Structured {
            self.changed.push(true);
        }
        row
    }

    pub(crate) fn remove(&mut self, entity: EntityId) -> bool {
        let Some(row) = self.index.swap_remove(entity) else {
            return false;
        };
        for (col, &count) in self.columns.iter_mut().zip(&self.counts) {
            col.swap_remove_row(row, count);
        }
        if self.kind == ComponentKind::Structured {
            self.changed.swap_remove(row);
        }
        true
    }

    pub fn column(&self, field: usize) -> Option<&Column> {
        self.columns.get(field)
    }

    pub(crate) fn column_mut(&mut self, field: usize) -> Option<&mut Column> {
        self.columns.get_mut(field)
    }

    pub fn field_count(&self, field: usize) -> usize {
        self.counts.get(field).copied().unwrap_or(0)
    }

    pub fn is_changed(&self, entity: EntityId) -> bool {
        self.row_of(entity)
            .and_then(|row| self.changed.get(row).copied())
            .unwrap_or(false)
    }

    pub(crate) fn mark_changed(&mut self, row: usize) {
        if let Some(flag) = self.changed.get_mut(row) {
            *flag = true;
        }
    }

    pub(crate) fn clear_changed(&mut self) {
        self.changed.iter_mut().for_each(|f| *f = false);
    }

    pub fn entities(&self) -> &[EntityId] {
        self.index.entities()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
