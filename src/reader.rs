//! Keyed value reads from kernel pseudo-files.
//!
//! Pseudo-files such as `/proc/meminfo`, `/proc/vmstat` or `/proc/zoneinfo`
//! are line oriented: the first whitespace-separated field is a key (with an
//! optional trailing `:`), the remaining fields are values. The `Reader`
//! trait is the seam the observers read through; `FileReader` is the
//! filesystem-backed implementation.

use ahash::AHashMap as HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Buffer size used for line-oriented pseudo-file reads.
const READ_BUFFER_KB: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Key '{key}' was not found in '{path}'")]
    KeyNotFound { path: String, key: String },

    #[error("Failed to parse '{value}' for '{key}' in '{path}'")]
    Parse {
        path: String,
        key: String,
        value: String,
    },
}

/// Capability interface for reading raw values out of pseudo-files.
///
/// Every method fails with `ReadError` when the file or the key is absent
/// or the value is malformed.
pub trait Reader: Send + Sync {
    /// Returns the text following `key` on its line (all remaining fields,
    /// single-space separated).
    fn read_text(&self, path: &str, key: &str) -> Result<String, ReadError>;

    /// Returns every integer that follows `key`, one per matching line.
    fn read_all_ints(&self, path: &str, key: &str) -> Result<Vec<i64>, ReadError>;

    /// Parses the whole (trimmed) file as one integer.
    fn read_whole_int(&self, path: &str) -> Result<i64, ReadError>;

    /// Returns every `key value` pair of the file whose value parses as a float.
    fn read_float_map(&self, path: &str) -> Result<HashMap<String, f64>, ReadError>;

    /// Parses the first field after `key` as an integer.
    fn read_int(&self, path: &str, key: &str) -> Result<i64, ReadError> {
        let text = self.read_text(path, key)?;
        first_field(&text)
            .parse::<i64>()
            .map_err(|_| ReadError::Parse {
                path: path.to_string(),
                key: key.to_string(),
                value: text.clone(),
            })
    }

    /// Parses the first field after `key` as a float.
    fn read_float(&self, path: &str, key: &str) -> Result<f64, ReadError> {
        let text = self.read_text(path, key)?;
        first_field(&text)
            .parse::<f64>()
            .map_err(|_| ReadError::Parse {
                path: path.to_string(),
                key: key.to_string(),
                value: text.clone(),
            })
    }
}

fn first_field(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

/// Strips the trailing ':' used by meminfo-style keys.
fn trim_key(field: &str) -> &str {
    field.strip_suffix(':').unwrap_or(field)
}

/// Filesystem-backed `Reader`.
///
/// With a root set, absolute paths are resolved below it, which lets tests
/// point the observers at a fixture tree.
#[derive(Debug, Clone, Default)]
pub struct FileReader {
    root: Option<PathBuf>,
}

impl FileReader {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        }
    }

    fn open_lines(&self, path: &str) -> Result<std::io::Lines<BufReader<fs::File>>, ReadError> {
        let resolved = self.resolve(path);
        let file = fs::File::open(&resolved).map_err(|source| io_error(&resolved, source))?;
        Ok(BufReader::with_capacity(READ_BUFFER_KB * 1024, file).lines())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ReadError {
    ReadError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl Reader for FileReader {
    fn read_text(&self, path: &str, key: &str) -> Result<String, ReadError> {
        for line in self.open_lines(path)? {
            let line = line.map_err(|source| io_error(Path::new(path), source))?;
            let mut fields = line.split_whitespace();
            let Some(first) = fields.next() else {
                continue;
            };
            if trim_key(first) == key {
                let rest: Vec<&str> = fields.collect();
                if rest.is_empty() {
                    break;
                }
                return Ok(rest.join(" "));
            }
        }

        Err(ReadError::KeyNotFound {
            path: path.to_string(),
            key: key.to_string(),
        })
    }

    fn read_all_ints(&self, path: &str, key: &str) -> Result<Vec<i64>, ReadError> {
        let mut result = Vec::new();
        for line in self.open_lines(path)? {
            let line = line.map_err(|source| io_error(Path::new(path), source))?;
            let mut fields = line.split_whitespace();
            if fields.next() != Some(key) {
                continue;
            }
            // Lines that share the key but carry a non-integer are skipped
            if let Some(Ok(value)) = fields.next().map(str::parse::<i64>) {
                result.push(value);
            }
        }
        Ok(result)
    }

    fn read_whole_int(&self, path: &str) -> Result<i64, ReadError> {
        let resolved = self.resolve(path);
        let content = fs::read_to_string(&resolved).map_err(|source| io_error(&resolved, source))?;
        let trimmed = content.trim();
        trimmed.parse::<i64>().map_err(|_| ReadError::Parse {
            path: path.to_string(),
            key: String::new(),
            value: trimmed.to_string(),
        })
    }

    fn read_float_map(&self, path: &str) -> Result<HashMap<String, f64>, ReadError> {
        let mut result = HashMap::new();
        for line in self.open_lines(path)? {
            let line = line.map_err(|source| io_error(Path::new(path), source))?;
            let mut fields = line.split_whitespace();
            let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
                continue;
            };
            let key = trim_key(key);
            match value.parse::<f64>() {
                Ok(v) => {
                    result.insert(key.to_string(), v);
                }
                Err(e) => {
                    debug!("Error '{}' while parsing '{}' in '{}'", e, key, path);
                }
            }
        }
        Ok(result)
    }
}
