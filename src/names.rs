//! Name table and per-pass interner.
//!
//! Индекс 0 зарезервирован под sentinel `None`; пустое имя всегда даёт 0 и в
//! таблицу не добавляется. Отметка «уже видели» живёт в самом интернере, то есть
//! ровно один проход save: общих флагов на именах нет.

use anyhow::{anyhow, Result};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Read, Write};

use crate::compact::{read_count, write_index};
use crate::consts::{MAX_TABLE_LEN, NAME_NONE, NAME_SIZE, NAME_ZERO_SUBST};

/// Ordered, unique names; insertion order = index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTable {
    names: Vec<String>,
}

impl Default for NameTable {
    fn default() -> Self {
        Self {
            names: vec![NAME_NONE.to_string()],
        }
    }
}

impl NameTable {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|s| s.as_str())
    }

    /// Names as read from disk (index 0 included).
    pub fn from_names(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        write_index(w, self.names.len())?;
        for n in &self.names {
            write_name(w, n)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let count = read_count(r, MAX_TABLE_LEN, "name")?;
        let mut names = Vec::with_capacity(count);
        for i in 0..count {
            let n = read_name(r).map_err(|e| anyhow!("name #{}: {}", i, e))?;
            names.push(n);
        }
        Ok(Self { names })
    }
}

/// Is the name storable (terminator included) within `NAME_SIZE`?
pub fn name_fits(name: &str) -> bool {
    name.len() < NAME_SIZE
}

fn write_name<W: Write>(w: &mut W, name: &str) -> Result<()> {
    if !name_fits(name) {
        return Err(anyhow!("name '{}' is longer than {} B", name, NAME_SIZE - 1));
    }
    let mut buf = Vec::with_capacity(name.len() + 1);
    for &b in name.as_bytes() {
        buf.push(if b == 0 { NAME_ZERO_SUBST } else { b });
    }
    buf.push(0);
    w.write_all(&buf)?;
    Ok(())
}

/// Scan up to the terminator; no terminator within `NAME_SIZE` bytes is fatal.
fn read_name<R: Read>(r: &mut R) -> Result<String> {
    let mut buf = Vec::with_capacity(16);
    while buf.len() < NAME_SIZE {
        let b = r.read_u8()?;
        if b == 0 {
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
        buf.push(b);
    }
    Err(anyhow!("name exceeds {} B without terminator", NAME_SIZE))
}

/// Interner for one save pass.
#[derive(Debug, Clone)]
pub struct NameInterner {
    table: NameTable,
    seen: HashMap<String, u32>,
}

impl Default for NameInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl NameInterner {
    /// Fresh pass; the `None` sentinel is interned first so index 0 is stable.
    pub fn new() -> Self {
        let mut seen = HashMap::new();
        seen.insert(NAME_NONE.to_string(), 0);
        Self {
            table: NameTable::default(),
            seen,
        }
    }

    pub fn intern(&mut self, name: &str) -> u32 {
        if name.is_empty() {
            return 0;
        }
        if let Some(&idx) = self.seen.get(name) {
            return idx;
        }
        let idx = self.table.names.len() as u32;
        self.table.names.push(name.to_string());
        self.seen.insert(name.to_string(), idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn table(&self) -> &NameTable {
        &self.table
    }

    pub fn into_table(self) -> NameTable {
        self.table
    }
}
