//! Persisted Element record and reach-spec edge.
//!
//! Element:   [flags u32 LE][name idx][class ref][outer ref][origin u8][payload: count + bytes]
//! ReachSpec: [distance][start ref][end ref][radius][height][flags] (compact) + [pruned u8]

use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Write};

use crate::compact::{read_bytes, read_compact, read_index, write_bytes, write_compact, write_index};
use crate::refs::SnapshotRef;

/// How the reconstructor obtains the live object for an Element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Origin {
    /// Construct fresh (or replace in place).
    NewInstance = 0,
    /// Must already exist; located by path only.
    ImportOnly = 1,
    /// Live lookup, else load from the asset store.
    Unresolved = 2,
}

impl Origin {
    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Origin::NewInstance),
            1 => Ok(Origin::ImportOnly),
            2 => Ok(Origin::Unresolved),
            other => Err(anyhow!("unknown element origin marker {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRecord {
    pub flags: u32,
    pub name: u32,
    pub class: SnapshotRef,
    pub outer: SnapshotRef,
    pub origin: Origin,
    pub payload: Vec<u8>,
}

impl ElementRecord {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<LittleEndian>(self.flags)?;
        write_index(w, self.name as usize)?;
        write_index(w, self.class.raw() as usize)?;
        write_index(w, self.outer.raw() as usize)?;
        w.write_u8(self.origin as u8)?;
        write_bytes(w, &self.payload)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R, max_payload: usize) -> Result<Self> {
        let flags = r.read_u32::<LittleEndian>()?;
        let name = read_u32_index(r)?;
        let class = SnapshotRef::from_raw(read_u32_index(r)?);
        let outer = SnapshotRef::from_raw(read_u32_index(r)?);
        let origin = Origin::from_u8(r.read_u8()?)?;
        let payload = read_bytes(r, max_payload)?;
        Ok(Self {
            flags,
            name,
            class,
            outer,
            origin,
            payload,
        })
    }
}

/// Reach spec with endpoints in snapshot coordinates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactReachSpec {
    pub distance: i32,
    pub start: SnapshotRef,
    pub end: SnapshotRef,
    pub collision_radius: i32,
    pub collision_height: i32,
    pub reach_flags: i32,
    pub pruned: bool,
}

impl CompactReachSpec {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        write_compact(w, self.distance)?;
        write_index(w, self.start.raw() as usize)?;
        write_index(w, self.end.raw() as usize)?;
        write_compact(w, self.collision_radius)?;
        write_compact(w, self.collision_height)?;
        write_compact(w, self.reach_flags)?;
        w.write_u8(u8::from(self.pruned))?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            distance: read_compact(r)?,
            start: SnapshotRef::from_raw(read_u32_index(r)?),
            end: SnapshotRef::from_raw(read_u32_index(r)?),
            collision_radius: read_compact(r)?,
            collision_height: read_compact(r)?,
            reach_flags: read_compact(r)?,
            pruned: r.read_u8()? != 0,
        })
    }
}

pub(crate) fn read_u32_index<R: Read>(r: &mut R) -> Result<u32> {
    Ok(read_index(r)? as u32)
}
