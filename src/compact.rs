//! Compact index codec and length-prefixed primitives.
//!
//! Compact index (signed, 1..=5 bytes):
//!   byte0: [sign 1][more 1][value 6]
//!   byteN: [more 1][value 7]
//! Counts and table indices are non-negative compact indices.

use anyhow::{anyhow, Result};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::consts::MAX_STRING_LEN;

const MAX_COMPACT_BYTES: usize = 5;

pub fn write_compact<W: Write>(w: &mut W, v: i32) -> Result<()> {
    let mut rest = v.unsigned_abs();
    let mut b0: u8 = if v < 0 { 0x80 } else { 0 };
    if rest < 0x40 {
        b0 |= rest as u8;
        w.write_u8(b0)?;
        return Ok(());
    }
    b0 |= 0x40 | (rest & 0x3f) as u8;
    w.write_u8(b0)?;
    rest >>= 6;
    while rest >= 0x80 {
        w.write_u8(0x80 | (rest & 0x7f) as u8)?;
        rest >>= 7;
    }
    w.write_u8(rest as u8)?;
    Ok(())
}

pub fn read_compact<R: Read>(r: &mut R) -> Result<i32> {
    let b0 = r.read_u8()?;
    let negative = b0 & 0x80 != 0;
    let mut v: u64 = (b0 & 0x3f) as u64;
    if b0 & 0x40 != 0 {
        let mut shift = 6;
        let mut n = 1;
        loop {
            if n >= MAX_COMPACT_BYTES {
                return Err(anyhow!("compact index longer than {} bytes", MAX_COMPACT_BYTES));
            }
            let b = r.read_u8()?;
            n += 1;
            v |= ((b & 0x7f) as u64) << shift;
            shift += 7;
            if b & 0x80 == 0 {
                break;
            }
        }
    }
    if v > u32::MAX as u64 {
        return Err(anyhow!("compact index overflow ({})", v));
    }
    let v = v as u32;
    Ok(if negative {
        (v as i32).wrapping_neg()
    } else {
        v as i32
    })
}

/// Non-negative compact value (counts, snapshot indices).
pub fn write_index<W: Write>(w: &mut W, v: usize) -> Result<()> {
    let v = i32::try_from(v).map_err(|_| anyhow!("index {} does not fit a compact index", v))?;
    write_compact(w, v)
}

pub fn read_index<R: Read>(r: &mut R) -> Result<usize> {
    let v = read_compact(r)?;
    if v < 0 {
        return Err(anyhow!("negative index/count {}", v));
    }
    Ok(v as usize)
}

/// Count prefix with an upper bound (guards allocations on corrupt input).
pub fn read_count<R: Read>(r: &mut R, max: usize, what: &str) -> Result<usize> {
    let n = read_index(r)?;
    if n > max {
        return Err(anyhow!("{} count {} exceeds limit {}", what, n, max));
    }
    Ok(n)
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> Result<()> {
    if s.len() > MAX_STRING_LEN {
        return Err(anyhow!("string of {} B exceeds {} B", s.len(), MAX_STRING_LEN));
    }
    write_index(w, s.len())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

pub fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let bytes = read_bytes(r, MAX_STRING_LEN)?;
    String::from_utf8(bytes).map_err(|e| anyhow!("string is not UTF-8: {}", e))
}

pub fn write_bytes<W: Write>(w: &mut W, b: &[u8]) -> Result<()> {
    write_index(w, b.len())?;
    w.write_all(b)?;
    Ok(())
}

pub fn read_bytes<R: Read>(r: &mut R, max: usize) -> Result<Vec<u8>> {
    let n = read_count(r, max, "byte")?;
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
