use std::fmt;

use crate::storage::Column;

/// Dense component identifier, assigned in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u32);

impl ComponentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// Presence only, no data.
    Tag,
    /// One numeric column per field.
    Structured,
}

/// Numeric element type of a structured field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    F32,
    I32,
    U32,
    F64,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::F32 => "f32",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::F64 => "f64",
        };
        f.write_str(s)
    }
}

/// A named field with a fixed element count (1 for scalars, 3 for vectors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub count: usize,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: FieldType, count: usize) -> Self {
        Self {
            name: name.into(),
            ty,
            count: count.max(1),
        }
    }

    pub fn scalar(name: impl Into<String>, ty: FieldType) -> Self {
        Self::new(name, ty, 1)
    }
}

/// Component definition as supplied at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDef {
    pub name: String,
    pub kind: ComponentKind,
    pub fields: Vec<FieldSpec>,
}

impl ComponentDef {
    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::Tag,
            fields: Vec::new(),
        }
    }

    pub fn structured(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::Structured,
            fields,
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Resolved reference to one field of a registered component.
///
/// Obtained once through [`crate::World::field`]; hot-path reads and writes
/// go through the handle and never touch field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldHandle {
    pub component: ComponentId,
    pub(crate) field: u16,
    pub ty: FieldType,
    pub count: usize,
}

impl FieldHandle {
    pub fn field_index(&self) -> usize {
        self.field as usize
    }
}

/// Numeric element types that can back a structured column.
pub trait Scalar: Copy + Default + PartialEq + fmt::Debug + Send + 'static {
    const TYPE: FieldType;

    fn slice(col: &Column) -> Option<&[Self]>;
    fn slice_mut(col: &mut Column) -> Option<&mut [Self]>;
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
}

macro_rules! impl_scalar {
    ($t:ty, $variant:ident) => {
        impl Scalar for $t {
            const TYPE: FieldType = FieldType::$variant;

            fn slice(col: &Column) -> Option<&[Self]> {
                match col {
                    Column::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn slice_mut(col: &mut Column) -> Option<&mut [Self]> {
                match col {
                    Column::$variant(v) => Some(v.as_mut_slice()),
                    _ => None,
                }
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(v: f64) -> Self {
                v as $t
            }
        }
    };
}

impl_scalar!(f32, F32);
impl_scalar!(i32, I32);
impl_scalar!(u32, U32);
impl_scalar!(f64, F64);
