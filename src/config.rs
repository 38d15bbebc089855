//! Centralized configuration and builder for the snapshot engine.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - SaverConfig::from_env() reads the SNAP_* variables.
//! - SaverBuilder for code that prefers explicit setup over ENV.
//!
//! Env:
//! - SNAP_SAVE_DIR         : directory for numbered save slots (default "Save")
//! - SNAP_EXCLUDE_CLASSES  : comma-separated class names never written (default "StatLog")
//! - SNAP_MAX_PAYLOAD_BYTES: per-element payload cap, save and load (default 16 MiB)
//! - SNAP_FSYNC            : fsync file + directory on save (default true)

use std::fmt;
use std::path::{Path, PathBuf};

use crate::consts::{DEFAULT_EXCLUDE_CLASSES, DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_SAVE_DIR, SAVE_EXT};

#[derive(Clone, Debug)]
pub struct SaverConfig {
    /// Where `save_slot` puts `Save<N>.usx`.
    /// Env: SNAP_SAVE_DIR
    pub save_dir: PathBuf,

    /// Objects whose class (or any super class) has one of these names are skipped.
    /// Env: SNAP_EXCLUDE_CLASSES = "StatLog,DebugDraw"
    pub exclude_classes: Vec<String>,

    /// Upper bound for one Element payload.
    /// Env: SNAP_MAX_PAYLOAD_BYTES
    pub max_payload_bytes: usize,

    /// Env: SNAP_FSYNC = 0|1|true|false
    pub fsync: bool,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from(DEFAULT_SAVE_DIR),
            exclude_classes: DEFAULT_EXCLUDE_CLASSES.iter().map(|s| s.to_string()).collect(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            fsync: true,
        }
    }
}

impl SaverConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SNAP_SAVE_DIR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.save_dir = PathBuf::from(s);
            }
        }

        if let Ok(v) = std::env::var("SNAP_EXCLUDE_CLASSES") {
            cfg.exclude_classes = parse_list(&v);
        }

        if let Ok(v) = std::env::var("SNAP_MAX_PAYLOAD_BYTES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                if n > 0 {
                    cfg.max_payload_bytes = n;
                }
            }
        }

        if let Ok(v) = std::env::var("SNAP_FSYNC") {
            let s = v.trim().to_ascii_lowercase();
            cfg.fsync = s == "1" || s == "true" || s == "on" || s == "yes";
        }

        cfg
    }

    pub fn with_save_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.save_dir = dir.into();
        self
    }

    pub fn with_exclude_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_classes = classes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_payload_bytes(mut self, n: usize) -> Self {
        self.max_payload_bytes = n.max(1);
        self
    }

    pub fn with_fsync(mut self, on: bool) -> Self {
        self.fsync = on;
        self
    }

    /// `<save_dir>/Save<slot>.usx`
    pub fn slot_path(&self, slot: u32) -> PathBuf {
        slot_path(&self.save_dir, slot)
    }
}

pub fn slot_path(dir: &Path, slot: u32) -> PathBuf {
    dir.join(format!("Save{}.{}", slot, SAVE_EXT))
}

fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(|x| x.to_string())
        .collect()
}

impl fmt::Display for SaverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SaverConfig {{ save_dir: {}, exclude_classes: [{}], max_payload_bytes: {}, fsync: {} }}",
            self.save_dir.display(),
            self.exclude_classes.join(","),
            self.max_payload_bytes,
            self.fsync
        )
    }
}

/// Builder for SaverConfig (starts from ENV).
pub struct SaverBuilder {
    cfg: SaverConfig,
}

impl SaverBuilder {
    pub fn new() -> Self {
        Self {
            cfg: SaverConfig::from_env(),
        }
    }

    /// Start from defaults, ignoring ENV.
    pub fn defaults() -> Self {
        Self {
            cfg: SaverConfig::default(),
        }
    }

    pub fn save_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cfg = self.cfg.with_save_dir(dir);
        self
    }

    pub fn exclude_class<S: Into<String>>(mut self, class: S) -> Self {
        self.cfg.exclude_classes.push(class.into());
        self
    }

    pub fn max_payload_bytes(mut self, n: usize) -> Self {
        self.cfg = self.cfg.with_max_payload_bytes(n);
        self
    }

    pub fn fsync(mut self, on: bool) -> Self {
        self.cfg = self.cfg.with_fsync(on);
        self
    }

    pub fn build(self) -> SaverConfig {
        self.cfg
    }
}

impl Default for SaverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
