//! zstd layer for snapshot files (`Save1.usx` <-> `Save1.usx.zst`).
//!
//! Сам формат снапшота сжатия не знает: это отдельный поток поверх файла.
//! `open_snapshot` выбирает декодер по расширению, так что load и catalog
//! принимают оба варианта.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use zstd::stream::read::Decoder as ZstdDecoder;
use zstd::stream::write::Encoder as ZstdEncoder;

use crate::consts::COMPRESSED_EXT;
use crate::util::write_atomic;

pub const DEFAULT_LEVEL: i32 = 3;

pub fn is_compressed(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case(COMPRESSED_EXT))
        .unwrap_or(false)
}

/// Buffered reader over a snapshot file, decompressing `*.zst` on the fly.
pub fn open_snapshot(path: &Path) -> Result<Box<dyn Read>> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    if is_compressed(path) {
        let dec = ZstdDecoder::new(f).context("create zstd decoder")?;
        Ok(Box::new(dec))
    } else {
        Ok(Box::new(BufReader::new(f)))
    }
}

/// Compress `src` into `dest` (atomic). Returns the compressed size.
pub fn compress_file(src: &Path, dest: &Path, level: i32, fsync: bool) -> Result<u64> {
    let mut input = BufReader::new(File::open(src).with_context(|| format!("open {}", src.display()))?);
    write_atomic(dest, fsync, |w| {
        let mut enc = ZstdEncoder::new(w, level).context("create zstd encoder")?;
        io::copy(&mut input, &mut enc).with_context(|| format!("compress {}", src.display()))?;
        enc.finish().context("finish zstd stream")?;
        Ok(())
    })
}

/// Decompress `src` (zstd) into `dest` (atomic). Returns the decompressed size.
pub fn decompress_file(src: &Path, dest: &Path, fsync: bool) -> Result<u64> {
    let f = File::open(src).with_context(|| format!("open {}", src.display()))?;
    let mut dec = ZstdDecoder::new(f).context("create zstd decoder")?;
    write_atomic(dest, fsync, |w| {
        io::copy(&mut dec, w).with_context(|| format!("decompress {}", src.display()))?;
        Ok(())
    })
}
