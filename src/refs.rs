//! Reference codec: live identity <-> integer index.
//!
//! Two coordinate spaces that never mix:
//! - `SnapshotRef`: unsigned, 0 = null, N = N-th Element (1-based) of *this* snapshot.
//!   The only kind of reference that is ever written to a snapshot file.
//! - `StoreRef`: signed, >0 = export of an asset-store package, <0 = import of that
//!   package (resolved by path). Only used while computing a delta baseline.

use std::fmt;

use anyhow::Result;

use crate::world::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct SnapshotRef(u32);

impl SnapshotRef {
    pub const NULL: SnapshotRef = SnapshotRef(0);

    /// Reference to the Element at 0-based `slot`.
    pub fn from_slot(slot: usize) -> Self {
        SnapshotRef(slot as u32 + 1)
    }

    pub fn from_raw(raw: u32) -> Self {
        SnapshotRef(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// 0-based Element slot, `None` for null.
    pub fn slot(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0 as usize - 1)
        }
    }
}

impl fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StoreRef(pub i32);

/// Decoded meaning of a `StoreRef`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTarget {
    Null,
    Export(usize),
    Import(usize),
}

impl StoreRef {
    pub fn export(index: usize) -> Self {
        StoreRef(index as i32 + 1)
    }

    pub fn import(index: usize) -> Self {
        StoreRef(-(index as i32) - 1)
    }

    pub fn target(self) -> StoreTarget {
        match self.0 {
            0 => StoreTarget::Null,
            n if n > 0 => StoreTarget::Export(n as usize - 1),
            n => StoreTarget::Import((-(n as i64) - 1) as usize),
        }
    }
}

/// Result of decoding an object index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Null,
    Object(ObjectId),
    /// Index is valid but names nothing live; a baseline value holding it is dropped
    /// so the property is always emitted.
    Unresolved,
}

/// Encoding side: identity -> index.
pub trait RefSink {
    fn name_index(&mut self, name: &str) -> Result<i32>;
    fn object_index(&mut self, object: Option<ObjectId>) -> Result<i32>;
}

/// Decoding side: index -> identity.
pub trait RefSource {
    fn name_at(&self, index: i32) -> Result<String>;
    fn object_at(&self, index: i32) -> Result<Slot>;
}
