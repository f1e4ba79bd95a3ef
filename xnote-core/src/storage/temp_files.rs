//! Private temporary files with secure deletion
//!
//! Export and import stage archives and extracted entries in a private
//! cache folder. Every artifact handed out here is tracked until it is
//! wiped: its bytes are overwritten with random data several times and
//! synced to disk before the file is unlinked.

use crate::config::{OVERWRITE_BUFFER_SIZE, SECURE_DELETE_PASSES};
use crate::error::Result;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Allocates and wipes temporary artifacts under one cache root
pub struct TempFileManager {
    root: PathBuf,
    tracked: Mutex<HashSet<PathBuf>>,
}

impl TempFileManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tracked: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create an owner-only directory named `<prefix>_<millis>_<random>`
    pub fn create_secure_temp_dir(&self, prefix: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(unique_name(prefix));

        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&path)?;

        self.tracked.lock().insert(path.clone());
        tracing::debug!("Created temp dir: {:?}", path);
        Ok(path)
    }

    /// Create an empty owner-only file named `<prefix>_<millis>_<random><suffix>`
    pub fn create_secure_temp_file(&self, prefix: &str, suffix: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let path = self
            .root
            .join(format!("{}{}", unique_name(prefix), suffix));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(&path)?;

        self.tracked.lock().insert(path.clone());
        tracing::debug!("Created temp file: {:?}", path);
        Ok(path)
    }

    /// Overwrite a file with random bytes, then unlink it.
    ///
    /// Returns false when any step failed; the failure is logged. A file
    /// that no longer exists counts as deleted.
    pub fn secure_delete(&self, path: &Path) -> bool {
        let ok = wipe_file(path);
        self.untrack(path);
        ok
    }

    /// Wipe every file below a directory, then remove the directory
    pub fn secure_delete_dir(&self, path: &Path) -> bool {
        let ok = wipe_dir(path);
        self.tracked.lock().retain(|p| !p.starts_with(path));
        ok
    }

    /// Securely delete every tracked artifact, returns how many failed
    pub fn cleanup_all(&self) -> usize {
        let drained: Vec<PathBuf> = self.tracked.lock().drain().collect();
        if drained.is_empty() {
            return 0;
        }

        let mut failures = 0;
        for path in &drained {
            let ok = if path.is_dir() {
                wipe_dir(path)
            } else {
                wipe_file(path)
            };
            if !ok {
                failures += 1;
            }
        }

        tracing::info!(
            "Cleaned up {} temp artifacts ({} failures)",
            drained.len(),
            failures
        );
        failures
    }

    /// Number of artifacts not yet deleted
    pub fn active_count(&self) -> usize {
        self.tracked.lock().len()
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.tracked.lock().contains(path)
    }

    fn untrack(&self, path: &Path) {
        self.tracked.lock().remove(path);
    }
}

fn unique_name(prefix: &str) -> String {
    format!(
        "{}_{}_{:016x}",
        prefix,
        Utc::now().timestamp_millis(),
        OsRng.next_u64()
    )
}

fn wipe_file(path: &Path) -> bool {
    if !path.exists() {
        return true;
    }

    let overwritten = match overwrite(path) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Failed to overwrite {:?}: {}", path, e);
            false
        }
    };

    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Securely deleted: {:?}", path);
            overwritten
        }
        Err(e) => {
            tracing::error!("Failed to remove {:?}: {}", path, e);
            false
        }
    }
}

fn wipe_dir(path: &Path) -> bool {
    if !path.exists() {
        return true;
    }

    let mut ok = true;
    match fs::read_dir(path) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let child = entry.path();
                let child_ok = if child.is_dir() {
                    wipe_dir(&child)
                } else {
                    wipe_file(&child)
                };
                ok &= child_ok;
            }
        }
        Err(e) => {
            tracing::error!("Failed to read temp dir {:?}: {}", path, e);
            ok = false;
        }
    }

    if let Err(e) = fs::remove_dir_all(path) {
        tracing::error!("Failed to remove temp dir {:?}: {}", path, e);
        return false;
    }

    ok
}

fn overwrite(path: &Path) -> std::io::Result<()> {
    let len = fs::metadata(path)?.len();
    let mut file = OpenOptions::new().write(true).open(path)?;
    let mut buffer = vec![0u8; OVERWRITE_BUFFER_SIZE];

    for _ in 0..SECURE_DELETE_PASSES {
        file.seek(SeekFrom::Start(0))?;
        write_random(&mut file, len, &mut buffer)?;
        file.flush()?;
        file.sync_all()?;
    }

    Ok(())
}

fn write_random(file: &mut File, len: u64, buffer: &mut [u8]) -> std::io::Result<()> {
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(buffer.len() as u64) as usize;
        OsRng.fill_bytes(&mut buffer[..chunk]);
        file.write_all(&buffer[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}
