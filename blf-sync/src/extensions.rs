//! Monitored extension list.
//!
//! The list maps each PBX extension to the sign-in name of the Teams user
//! whose presence mirrors it. It is read once at startup from JSON
//! (`[{"extension": "1001", "email": "alice@example.com"}]`) or CSV
//! (`extension,email` rows, header optional).

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ExtensionsError {
    #[error("extensions file not found: tried {}", display_paths(.tried))]
    NotFound { tried: Vec<PathBuf> },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid extensions JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid extensions CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("no extensions configured in {0}")]
    Empty(PathBuf),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" and ")
}

/// One monitored line and the user it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionEntry {
    pub extension: String,
    pub email: String,
}

/// Loaded extension list with lookup by extension.
#[derive(Debug, Clone, Default)]
pub struct ExtensionDirectory {
    extensions: Vec<String>,
    emails: HashMap<String, String>,
    source: PathBuf,
}

impl ExtensionDirectory {
    /// Build from entries, trimming values and dropping blanks and repeats.
    pub fn from_entries(entries: Vec<ExtensionEntry>, source: impl Into<PathBuf>) -> Self {
        let mut directory = Self {
            source: source.into(),
            ..Self::default()
        };
        for entry in entries {
            let extension = entry.extension.trim().to_string();
            let email = entry.email.trim().to_string();
            if extension.is_empty() || email.is_empty() {
                warn!(extension = %extension, email = %email, "incomplete extension entry skipped");
                continue;
            }
            if directory.emails.contains_key(&extension) {
                warn!(extension = %extension, "duplicate extension entry, keeping the first");
                continue;
            }
            directory.extensions.push(extension.clone());
            directory.emails.insert(extension, email);
        }
        directory
    }

    /// Extensions in file order
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn email_for(&self, extension: &str) -> Option<&str> {
        self.emails.get(extension).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// File the list was read from
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Load the extension list from `path`.
///
/// An existing `.csv` is read as CSV and any other existing file as JSON.
/// A missing `*.json` falls back to the sibling `*.csv`. An empty list is
/// an error.
pub fn load_extensions(path: impl AsRef<Path>) -> Result<ExtensionDirectory, ExtensionsError> {
    let path = path.as_ref();

    let (entries, source) = if path.exists() {
        if is_csv(path) {
            (read_csv_file(path)?, path.to_path_buf())
        } else {
            (read_json_file(path)?, path.to_path_buf())
        }
    } else if path.extension().map_or(false, |ext| ext == "json") {
        let csv_path = path.with_extension("csv");
        if !csv_path.exists() {
            return Err(ExtensionsError::NotFound {
                tried: vec![path.to_path_buf(), csv_path],
            });
        }
        (read_csv_file(&csv_path)?, csv_path)
    } else {
        return Err(ExtensionsError::NotFound {
            tried: vec![path.to_path_buf()],
        });
    };

    let directory = ExtensionDirectory::from_entries(entries, source);
    if directory.is_empty() {
        return Err(ExtensionsError::Empty(directory.source));
    }
    Ok(directory)
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"))
}

fn read_json_file(path: &Path) -> Result<Vec<ExtensionEntry>, ExtensionsError> {
    let data = fs::read(path).map_err(|source| ExtensionsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| ExtensionsError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn read_csv_file(path: &Path) -> Result<Vec<ExtensionEntry>, ExtensionsError> {
    let file = fs::File::open(path).map_err(|source| ExtensionsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_csv(file).map_err(|source| ExtensionsError::Csv {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse `extension,email` rows.
///
/// A first row reading `extension,email` (any case) is a header. Cells are
/// trimmed; rows with fewer than two cells or two blank cells are skipped.
pub fn parse_csv(reader: impl Read) -> Result<Vec<ExtensionEntry>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut entries = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let (Some(extension), Some(email)) = (record.get(0), record.get(1)) else {
            continue;
        };
        if extension.is_empty() && email.is_empty() {
            continue;
        }
        if index == 0 && extension.eq_ignore_ascii_case("extension") && email.eq_ignore_ascii_case("email") {
            continue;
        }
        entries.push(ExtensionEntry {
            extension: extension.to_string(),
            email: email.to_string(),
        });
    }
    Ok(entries)
}
