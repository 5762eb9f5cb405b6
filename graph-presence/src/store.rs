//! Durable extension to session-id mapping.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{PresenceError, Result};

/// JSON file holding one session id per extension.
///
/// The file is human-editable; deleting it recreates an empty map on the
/// next load. Every mutation rewrites the whole file before returning.
#[derive(Debug)]
pub struct SessionIdStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl SessionIdStore {
    /// Load `path`, creating it (and its parent directories) when missing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match fs::read(&path) {
            Ok(data) if data.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(data) => serde_json::from_slice::<Option<BTreeMap<String, String>>>(&data)
                .map_err(|source| PresenceError::StoreFormat {
                    path: path.display().to_string(),
                    source,
                })?
                .unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let entries = BTreeMap::new();
                write_atomic(&path, &entries)?;
                info!(path = %path.display(), "created empty session state file");
                entries
            }
            Err(source) => {
                return Err(PresenceError::StoreIo {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        debug!(path = %path.display(), entries = entries.len(), "loaded session state");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, extension: &str) -> Option<String> {
        self.entries.lock().get(extension).cloned()
    }

    /// Record `session_id` for `extension` and persist the whole map.
    pub fn set(&self, extension: &str, session_id: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(extension.to_string(), session_id.to_string());
        write_atomic(&self.path, &entries)
    }

    /// Existing id for `extension`, or a new one generated by `create` and persisted.
    pub fn get_or_insert_with(&self, extension: &str, create: impl FnOnce() -> String) -> Result<String> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(extension) {
            return Ok(existing.clone());
        }
        let session_id = create();
        entries.insert(extension.to_string(), session_id.clone());
        write_atomic(&self.path, &entries)?;
        Ok(session_id)
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().clone()
    }
}

/// Write to a sibling temp file, then rename over `path`.
fn write_atomic(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    let io_err = |source| PresenceError::StoreIo {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let json = serde_json::to_vec_pretty(entries).map_err(|source| PresenceError::StoreFormat {
        path: path.display().to_string(),
        source,
    })?;

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp).map_err(io_err)?;
    file.write_all(&json).map_err(io_err)?;
    file.write_all(b"\n").map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&tmp, path).map_err(io_err)
}
