use anyhow::{anyhow, Context, Result};
use std::any::Any;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// `<path>.tmp` next to the destination (same filesystem, so rename is atomic).
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

#[cfg(unix)]
pub fn fsync_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
    }
    Ok(())
}
#[cfg(not(unix))]
pub fn fsync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Атомарная запись: tmp -> (fsync) -> rename -> (fsync каталога, best-effort).
/// Returns the number of bytes written.
pub fn write_atomic<F>(path: &Path, fsync: bool, write: F) -> Result<u64>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
    }

    let tmp = tmp_path(path);
    let _ = fs::remove_file(&tmp); // best-effort

    let f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .with_context(|| format!("open tmp {}", tmp.display()))?;
    let mut w = BufWriter::new(f);

    let res = write(&mut w).and_then(|_| w.flush().map_err(Into::into));
    if let Err(e) = res {
        drop(w);
        let _ = fs::remove_file(&tmp);
        return Err(e.context(format!("write {}", tmp.display())));
    }
    let f = w
        .into_inner()
        .map_err(|e| anyhow!("flush {}: {}", tmp.display(), e.error()))?;
    if fsync {
        f.sync_all()?;
    }
    let len = f.metadata()?.len();
    drop(f);

    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    if fsync {
        let _ = fsync_dir(path);
    }
    Ok(len)
}

/// Human-readable payload of a caught panic.
pub fn panic_message(p: &(dyn Any + Send)) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
