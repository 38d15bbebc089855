//! Property payload codec.
//!
//! Payload = tagged records terminated by the `None` name (index 0):
//!   [name idx compact][tag u8][value]
//! Tags: 1 bool(u8) | 2 int(compact) | 3 float(f32 LE) | 4 str | 5 name(compact)
//!       | 6 object(compact ref) | 7 array(compact count + [tag][value]...)
//!
//! Only properties that differ from the baseline are written, so an object equal to
//! its class defaults has a one-byte payload. A class Element appends its class
//! section: [super ref compact][defaults: full record list]. Indices go through `RefSink`/`RefSource`,
//! which decide the coordinate space (snapshot or asset store).

use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::compact::{read_compact, read_count, read_string, write_compact, write_index, write_string};
use crate::refs::{RefSink, RefSource, Slot};
use crate::world::{ObjectId, Props, Value};

const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_NAME: u8 = 5;
const TAG_OBJECT: u8 = 6;
const TAG_ARRAY: u8 = 7;

const MAX_ARRAY_LEN: usize = 1 << 20;
const MAX_DEPTH: usize = 16;

/// Encode `props` as a delta against `baseline`. Returns the number of records written.
pub fn write_delta<S: RefSink>(
    out: &mut Vec<u8>,
    props: &Props,
    baseline: Option<&Props>,
    sink: &mut S,
) -> Result<usize> {
    let mut written = 0usize;
    for (key, value) in props {
        if baseline.and_then(|b| b.get(key)) == Some(value) {
            continue;
        }
        let idx = sink.name_index(key)?;
        if idx == 0 {
            return Err(anyhow!("property name '{}' maps to the None index", key));
        }
        write_compact(out, idx)?;
        write_value(out, value, sink, 0)?;
        written += 1;
    }
    write_compact(out, 0)?;
    Ok(written)
}

fn write_value<S: RefSink>(out: &mut Vec<u8>, value: &Value, sink: &mut S, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(anyhow!("array nesting deeper than {}", MAX_DEPTH));
    }
    match value {
        Value::Bool(b) => {
            out.write_u8(TAG_BOOL)?;
            out.write_u8(u8::from(*b))?;
        }
        Value::Int(i) => {
            out.write_u8(TAG_INT)?;
            write_compact(out, *i)?;
        }
        Value::Float(f) => {
            out.write_u8(TAG_FLOAT)?;
            out.write_f32::<LittleEndian>(*f)?;
        }
        Value::Str(s) => {
            out.write_u8(TAG_STR)?;
            write_string(out, s)?;
        }
        Value::Name(n) => {
            // "" и None делят индекс 0; пустое имя не переживёт чтение.
            if n.is_empty() {
                return Err(anyhow!("empty name value"));
            }
            out.write_u8(TAG_NAME)?;
            let idx = sink.name_index(n)?;
            write_compact(out, idx)?;
        }
        Value::Object(o) => {
            out.write_u8(TAG_OBJECT)?;
            let idx = sink.object_index(*o)?;
            write_compact(out, idx)?;
        }
        Value::Array(items) => {
            out.write_u8(TAG_ARRAY)?;
            write_index(out, items.len())?;
            for v in items {
                write_value(out, v, sink, depth + 1)?;
            }
        }
    }
    Ok(())
}

/// Decode a payload. A `None` value marks a property whose reference could not be
/// resolved in the source's coordinate space.
pub fn read_props<S: RefSource>(buf: &[u8], source: &S) -> Result<Vec<(String, Option<Value>)>> {
    let mut r = Cursor::new(buf);
    let out = read_records(&mut r, source)?;
    expect_end(&r, buf.len())?;
    Ok(out)
}

/// Super class and flattened defaults of a class Element.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassState {
    pub super_class: Slot,
    pub defaults: Vec<(String, Option<Value>)>,
}

/// Append the class section. Defaults are written in full, so decoding never
/// depends on the super class being restored first.
pub fn write_class_state<S: RefSink>(
    out: &mut Vec<u8>,
    super_class: Option<ObjectId>,
    defaults: &Props,
    sink: &mut S,
) -> Result<()> {
    let idx = sink.object_index(super_class)?;
    write_compact(out, idx)?;
    write_delta(out, defaults, None, sink)?;
    Ok(())
}

/// Decode the payload of a class Element: own properties, then the class section.
pub fn read_class_payload<S: RefSource>(
    buf: &[u8],
    source: &S,
) -> Result<(Vec<(String, Option<Value>)>, ClassState)> {
    let mut r = Cursor::new(buf);
    let props = read_records(&mut r, source)?;
    let super_idx = read_compact(&mut r).map_err(|e| anyhow!("class section truncated: {}", e))?;
    let super_class = source.object_at(super_idx)?;
    let defaults = read_records(&mut r, source).map_err(|e| anyhow!("class defaults: {}", e))?;
    expect_end(&r, buf.len())?;
    Ok((
        props,
        ClassState {
            super_class,
            defaults,
        },
    ))
}

fn read_records<S: RefSource>(r: &mut Cursor<&[u8]>, source: &S) -> Result<Vec<(String, Option<Value>)>> {
    let mut out = Vec::new();
    loop {
        let idx = read_compact(r).map_err(|e| anyhow!("payload truncated before terminator: {}", e))?;
        if idx == 0 {
            break;
        }
        let key = source.name_at(idx)?;
        let value = read_value(r, source, 0).map_err(|e| anyhow!("property '{}': {}", key, e))?;
        out.push((key, value));
    }
    Ok(out)
}

fn expect_end(r: &Cursor<&[u8]>, len: usize) -> Result<()> {
    let pos = r.position() as usize;
    if pos != len {
        return Err(anyhow!("{} trailing byte(s) after payload terminator", len - pos));
    }
    Ok(())
}

fn read_value<R: Read, S: RefSource>(r: &mut R, source: &S, depth: usize) -> Result<Option<Value>> {
    if depth > MAX_DEPTH {
        return Err(anyhow!("array nesting deeper than {}", MAX_DEPTH));
    }
    let tag = r.read_u8()?;
    let v = match tag {
        TAG_BOOL => Value::Bool(r.read_u8()? != 0),
        TAG_INT => Value::Int(read_compact(r)?),
        TAG_FLOAT => Value::Float(r.read_f32::<LittleEndian>()?),
        TAG_STR => Value::Str(read_string(r)?),
        TAG_NAME => Value::Name(source.name_at(read_compact(r)?)?),
        TAG_OBJECT => match source.object_at(read_compact(r)?)? {
            Slot::Null => Value::Object(None),
            Slot::Object(id) => Value::Object(Some(id)),
            Slot::Unresolved => return Ok(None),
        },
        TAG_ARRAY => {
            let n = read_count(r, MAX_ARRAY_LEN, "array")?;
            let mut items = Vec::with_capacity(n.min(1024));
            let mut unresolved = false;
            for _ in 0..n {
                match read_value(r, source, depth + 1)? {
                    Some(v) => items.push(v),
                    None => unresolved = true,
                }
            }
            if unresolved {
                return Ok(None);
            }
            Value::Array(items)
        }
        other => return Err(anyhow!("unknown property tag {}", other)),
    };
    Ok(Some(v))
}
