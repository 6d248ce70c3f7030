//! Captured code records and their on-disk set
//!
//! Each record is one comma-delimited line:
//! `color,code,length,repeat,pulse_length,sync_factor,one,zero,inverted,timestamp`

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};

use crate::core::{Error, Result};
use crate::protocol::RcCodeData;

/// Color given to newly captured codes: opaque white in the packed
/// 64-bit ARGB format used by the record files
pub const DEFAULT_COLOR: u64 = 0xFFFF_FFFF_0000_0000;

/// Number of fields in a record line
const FIELD_COUNT: usize = 10;

/// A captured code with its display color and capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RcCode {
    /// Packed display color
    pub color: u64,
    /// Code parameters
    pub data: RcCodeData,
    /// Capture time, milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl RcCode {
    /// Record for a code captured now, with the default color
    pub fn captured(data: RcCodeData) -> Self {
        RcCode {
            color: DEFAULT_COLOR,
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Capture time, if the timestamp is representable
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

impl fmt::Display for RcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data;
        write!(
            f,
            "{},{},{},{},{},{},{},{},{},{}",
            self.color,
            d.code,
            d.length,
            d.repeat,
            d.pulse_length,
            d.sync_factor,
            d.one,
            d.zero,
            d.inverted,
            self.timestamp
        )
    }
}

fn field<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::store(format!("invalid {}: {:?}", name, value)))
}

/// Codes above `i32::MAX` may have been written as negative numbers
fn code_field(value: &str) -> Result<u32> {
    let value = value.trim();
    value
        .parse::<u32>()
        .or_else(|_| value.parse::<i32>().map(|v| v as u32))
        .map_err(|_| Error::store(format!("invalid code: {:?}", value)))
}

fn bool_field(value: &str) -> Result<bool> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(Error::store(format!("invalid inverted flag: {:?}", value)))
    }
}

impl FromStr for RcCode {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != FIELD_COUNT {
            return Err(Error::store(format!(
                "expected {} fields, got {}",
                FIELD_COUNT,
                fields.len()
            )));
        }

        Ok(RcCode {
            color: field("color", fields[0])?,
            data: RcCodeData {
                code: code_field(fields[1])?,
                length: field("length", fields[2])?,
                repeat: field("repeat", fields[3])?,
                pulse_length: field("pulse length", fields[4])?,
                sync_factor: field("sync factor", fields[5])?,
                one: field("one", fields[6])?,
                zero: field("zero", fields[7])?,
                inverted: bool_field(fields[8])?,
            },
            timestamp: field("timestamp", fields[9])?,
        })
    }
}

/// Set of captured codes persisted as a text file, one record per line
#[derive(Debug)]
pub struct CodeStore {
    path: PathBuf,
    codes: Vec<RcCode>,
}

impl CodeStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = CodeStore {
            path: path.into(),
            codes: Vec::new(),
        };
        store.load()?;
        Ok(store)
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rereads the backing file, discarding unsaved changes
    pub fn load(&mut self) -> Result<()> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut codes = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let code: RcCode = line.parse().map_err(|e| {
                Error::store(format!("{}:{}: {}", self.path.display(), number + 1, e))
            })?;
            if !codes.contains(&code) {
                codes.push(code);
            }
        }

        // Records form a set; present them oldest first
        codes.sort_by_key(|c| c.timestamp);
        debug!("Loaded {} codes from {}", codes.len(), self.path.display());
        self.codes = codes;
        Ok(())
    }

    /// Writes the set back. An empty set removes the file.
    pub fn save(&self) -> Result<()> {
        if self.codes.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => {
                    info!("Cleared {}", self.path.display());
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.io_error(e)),
            };
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let mut contents = String::new();
        for code in &self.codes {
            contents.push_str(&code.to_string());
            contents.push('\n');
        }

        // Replace the file in one step so readers never see a partial set
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, contents).map_err(|e| self.io_error(e))?;
        fs::rename(&staging, &self.path).map_err(|e| self.io_error(e))?;

        debug!("Saved {} codes to {}", self.codes.len(), self.path.display());
        Ok(())
    }

    /// Stored codes, oldest first
    pub fn codes(&self) -> &[RcCode] {
        &self.codes
    }

    /// Adds a code in capture order. Returns false if an identical record is
    /// already stored.
    pub fn insert(&mut self, code: RcCode) -> bool {
        if self.codes.contains(&code) {
            return false;
        }
        let at = self.codes.partition_point(|c| c.timestamp <= code.timestamp);
        self.codes.insert(at, code);
        true
    }

    /// Replaces `old` with `new`. Returns false if `old` is not stored.
    ///
    /// If `new` is already stored elsewhere, `old` is simply dropped.
    pub fn replace(&mut self, old: &RcCode, new: RcCode) -> bool {
        let Some(index) = self.codes.iter().position(|c| c == old) else {
            return false;
        };
        self.codes.remove(index);
        self.insert(new);
        true
    }

    /// Removes a code. Returns false if it was not stored.
    pub fn remove(&mut self, code: &RcCode) -> bool {
        let before = self.codes.len();
        self.codes.retain(|c| c != code);
        self.codes.len() != before
    }

    /// Removes every code
    pub fn clear(&mut self) {
        self.codes.clear();
    }

    fn io_error(&self, err: io::Error) -> Error {
        Error::store(format!("{}: {}", self.path.display(), err))
    }
}
