//! Header + summary block.
//!
//! Layout:
//!   [magic3 "USX"][version u8]
//!   players:  [count compact] + [string]...
//!   title:    [string]
//!   notes:    [string]
//!   url:      [string]
//!   guid:     [u32 LE] x4

use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::fmt;
use std::io::{Read, Write};

use crate::compact::{read_count, read_string, write_index, write_string};
use crate::consts::{MAX_TABLE_LEN, SAVE_MAGIC, SAVE_VERSION_CURRENT};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Guid(pub [u32; 4]);

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}{:08X}{:08X}{:08X}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SaveSummary {
    /// Format version the file was written with (set on read).
    pub version: u8,
    pub players: Vec<String>,
    pub title: String,
    pub notes: String,
    pub url: String,
    pub guid: Guid,
}

impl SaveSummary {
    /// Root identifier: map part of the URL (`proto://host/Map?opt` -> `Map`).
    pub fn map(&self) -> &str {
        map_of_url(&self.url)
    }

    /// Only summaries with a non-empty root identifier are accepted.
    pub fn is_valid(&self) -> bool {
        !self.map().is_empty()
    }
}

pub fn map_of_url(url: &str) -> &str {
    let no_opts = url.split('?').next().unwrap_or("");
    let no_proto = match no_opts.find("://") {
        Some(p) => &no_opts[p + 3..],
        None => no_opts,
    };
    let map = match no_proto.rfind('/') {
        Some(p) => &no_proto[p + 1..],
        None => no_proto,
    };
    map.trim()
}

pub fn write_header<W: Write>(w: &mut W) -> Result<()> {
    w.write_all(SAVE_MAGIC)?;
    w.write_u8(SAVE_VERSION_CURRENT)?;
    Ok(())
}

/// Read and gate the header; returns the file version.
pub fn read_header<R: Read>(r: &mut R) -> Result<u8> {
    let mut magic = [0u8; 3];
    r.read_exact(&mut magic)?;
    if &magic != SAVE_MAGIC {
        return Err(anyhow!(
            "bad snapshot magic (expected {:?}, got {:?})",
            SAVE_MAGIC,
            magic
        ));
    }
    let version = r.read_u8()?;
    if version == 0 || version > SAVE_VERSION_CURRENT {
        return Err(anyhow!(
            "unsupported snapshot version {} (supported 1..={})",
            version,
            SAVE_VERSION_CURRENT
        ));
    }
    Ok(version)
}

impl SaveSummary {
    /// Header + summary.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        write_header(w)?;
        write_index(w, self.players.len())?;
        for p in &self.players {
            write_string(w, p)?;
        }
        write_string(w, &self.title)?;
        write_string(w, &self.notes)?;
        write_string(w, &self.url)?;
        for part in self.guid.0 {
            w.write_u32::<LittleEndian>(part)?;
        }
        Ok(())
    }

    /// Header + summary; stops right after the GUID.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let version = read_header(r)?;
        let n = read_count(r, MAX_TABLE_LEN, "player")?;
        let mut players = Vec::with_capacity(n.min(64));
        for _ in 0..n {
            players.push(read_string(r)?);
        }
        let title = read_string(r)?;
        let notes = read_string(r)?;
        let url = read_string(r)?;
        let mut guid = [0u32; 4];
        for part in guid.iter_mut() {
            *part = r.read_u32::<LittleEndian>()?;
        }
        Ok(Self {
            version,
            players,
            title,
            notes,
            url,
            guid: Guid(guid),
        })
    }
}
