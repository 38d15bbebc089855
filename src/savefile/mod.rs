//! savefile: on-disk snapshot layout (.usx).
//!
//! Порядок блоков:
//!   [header: magic3 + version u8]
//!   [summary]                               (см. summary.rs)
//!   [travel info: count + (key str, value str)...]
//!   [names: count + zero-terminated names]  (см. names.rs)
//!   [elements: count + ElementRecord...]    (см. element.rs)
//!   [actors: count + snapshot ref...]
//!   [reach specs: count + CompactReachSpec...]
//!   [crc32 u32 LE] : над всеми предыдущими байтами
//!
//! Быстрый путь (`read_summary_from`) читает только header + summary и CRC не трогает.

pub mod element;
pub mod summary;

use anyhow::{anyhow, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::compact::{read_count, read_string, write_index, write_string};
use crate::consts::MAX_TABLE_LEN;
use crate::names::NameTable;
use crate::refs::SnapshotRef;

pub use element::{CompactReachSpec, ElementRecord, Origin};
pub use summary::{map_of_url, read_header, write_header, Guid, SaveSummary};

/// Fully decoded snapshot file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveFile {
    pub summary: SaveSummary,
    pub travel_info: BTreeMap<String, String>,
    pub names: NameTable,
    pub elements: Vec<ElementRecord>,
    pub actors: Vec<SnapshotRef>,
    pub reach_specs: Vec<CompactReachSpec>,
}

impl SaveFile {
    pub fn write_to<W: Write>(&self, w: W) -> Result<W> {
        let mut cw = CrcWriter::new(w);
        self.summary.write_to(&mut cw).context("write summary")?;

        write_index(&mut cw, self.travel_info.len())?;
        for (k, v) in &self.travel_info {
            write_string(&mut cw, k)?;
            write_string(&mut cw, v)?;
        }

        self.names.write_to(&mut cw).context("write name table")?;

        write_index(&mut cw, self.elements.len())?;
        for e in &self.elements {
            e.write_to(&mut cw)?;
        }

        write_index(&mut cw, self.actors.len())?;
        for a in &self.actors {
            write_index(&mut cw, a.raw() as usize)?;
        }

        write_index(&mut cw, self.reach_specs.len())?;
        for rs in &self.reach_specs {
            rs.write_to(&mut cw)?;
        }

        let (mut w, crc) = cw.finish();
        w.write_u32::<LittleEndian>(crc)?;
        Ok(w)
    }

    /// Full read with CRC verification. Any structural problem is an error.
    pub fn read_from<R: Read>(r: R, max_payload: usize) -> Result<Self> {
        let mut cr = CrcReader::new(r);
        let summary = SaveSummary::read_from(&mut cr).context("read summary")?;

        let n = read_count(&mut cr, MAX_TABLE_LEN, "travel info")?;
        let mut travel_info = BTreeMap::new();
        for _ in 0..n {
            let k = read_string(&mut cr)?;
            let v = read_string(&mut cr)?;
            travel_info.insert(k, v);
        }

        let names = NameTable::read_from(&mut cr).context("read name table")?;

        let n = read_count(&mut cr, MAX_TABLE_LEN, "element")?;
        let mut elements = Vec::with_capacity(n.min(4096));
        for i in 0..n {
            let e = ElementRecord::read_from(&mut cr, max_payload)
                .with_context(|| format!("read element #{}", i))?;
            elements.push(e);
        }

        let n = read_count(&mut cr, MAX_TABLE_LEN, "actor")?;
        let mut actors = Vec::with_capacity(n.min(4096));
        for _ in 0..n {
            actors.push(SnapshotRef::from_raw(element::read_u32_index(&mut cr)?));
        }

        let n = read_count(&mut cr, MAX_TABLE_LEN, "reach spec")?;
        let mut reach_specs = Vec::with_capacity(n.min(4096));
        for i in 0..n {
            let rs = CompactReachSpec::read_from(&mut cr)
                .with_context(|| format!("read reach spec #{}", i))?;
            reach_specs.push(rs);
        }

        let (mut r, computed) = cr.finish();
        let stored = r
            .read_u32::<LittleEndian>()
            .context("read crc32 trailer")?;
        if stored != computed {
            return Err(anyhow!(
                "snapshot crc mismatch (stored={:08x}, computed={:08x})",
                stored,
                computed
            ));
        }

        Ok(Self {
            summary,
            travel_info,
            names,
            elements,
            actors,
            reach_specs,
        })
    }
}

/// Header + summary only; the rest of the stream is never touched.
pub fn read_summary_from<R: Read>(r: &mut R) -> Result<SaveSummary> {
    SaveSummary::read_from(r)
}

struct CrcWriter<W> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
        }
    }

    fn finish(self) -> (W, u32) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

struct CrcReader<R> {
    inner: R,
    hasher: Hasher,
}

impl<R: Read> CrcReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
        }
    }

    fn finish(self) -> (R, u32) {
        (self.inner, self.hasher.finalize())
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
