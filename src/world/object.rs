//! Live object model: ids, values, property bags, classes.

use std::collections::BTreeMap;
use std::fmt;

// ---- Object flags ----

pub const OBJ_TRANSIENT: u32 = 0x0000_0001;
pub const OBJ_PENDING_KILL: u32 = 0x0000_0002;
pub const OBJ_PUBLIC: u32 = 0x0000_0004;
pub const OBJ_STANDALONE: u32 = 0x0000_0008;
pub const OBJ_TRANSACTIONAL: u32 = 0x0000_0010;

/// Bits stored in an Element and restored on load.
pub const OBJ_PERSISTED_MASK: u32 = OBJ_PUBLIC | OBJ_STANDALONE | OBJ_TRANSACTIONAL;

/// Handle of an object inside a `World` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) u32);

impl ObjectId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Property value. Object references are ids, never owning pointers.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
    Name(String),
    Object(Option<ObjectId>),
    Array(Vec<Value>),
}

impl Value {
    /// Visit every object reference held by this value (arrays included).
    pub fn for_each_object<F: FnMut(ObjectId)>(&self, f: &mut F) {
        match self {
            Value::Object(Some(id)) => f(*id),
            Value::Array(items) => {
                for v in items {
                    v.for_each_object(f);
                }
            }
            _ => {}
        }
    }

    /// Visit every symbolic name held by this value.
    pub fn for_each_name<F: FnMut(&str)>(&self, f: &mut F) {
        match self {
            Value::Name(n) => f(n),
            Value::Array(items) => {
                for v in items {
                    v.for_each_name(f);
                }
            }
            _ => {}
        }
    }
}

/// Ordered property bag (deterministic iteration = deterministic payloads).
pub type Props = BTreeMap<String, Value>;

/// Where an object was loaded from in the external asset store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linker {
    pub package: String,
    pub export_index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub super_class: Option<ObjectId>,
    /// Flattened defaults (super class defaults already merged in).
    pub defaults: Props,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    Package,
    Class(ClassInfo),
    Instance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub name: String,
    pub class: Option<ObjectId>,
    pub outer: Option<ObjectId>,
    pub flags: u32,
    pub kind: ObjectKind,
    pub props: Props,
    pub linker: Option<Linker>,
}

impl Object {
    #[inline]
    pub fn is_pending_kill(&self) -> bool {
        self.flags & OBJ_PENDING_KILL != 0
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        self.flags & OBJ_TRANSIENT != 0
    }

    #[inline]
    pub fn is_class(&self) -> bool {
        matches!(self.kind, ObjectKind::Class(_))
    }

    #[inline]
    pub fn is_package(&self) -> bool {
        matches!(self.kind, ObjectKind::Package)
    }

    #[inline]
    pub fn is_instance(&self) -> bool {
        matches!(self.kind, ObjectKind::Instance)
    }

    pub fn class_info(&self) -> Option<&ClassInfo> {
        match &self.kind {
            ObjectKind::Class(info) => Some(info),
            _ => None,
        }
    }

    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }
}
