//! Append-only message logs with optional daily rotation
//!
//! A log is a plain sequence of records, no file header or checksum:
//! ```text
//! [timestamp:u32 BE][length:u16 BE][length bytes = one wire message]
//! ```
//! Rotating logs are named `<basename>-<YYYYMMDD>.log` (UTC date), fixed logs
//! `<basename>.log`. Rotation is checked once per write: when the day of the
//! new timestamp differs from the day the file was opened on, the handle is
//! swapped for the new day's file. If that file cannot be opened the write
//! is dropped, the previous handle is kept, and the next write retries.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::timestamp::{day_of, from_timestamp, to_timestamp};

pub const RECORD_HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Sequential reads only
    Read,
    /// Create if missing, write at end
    Append,
    /// Truncate, then write
    Rewrite,
}

impl OpenMode {
    fn name(self) -> &'static str {
        match self {
            OpenMode::Read => "read",
            OpenMode::Append => "append",
            OpenMode::Rewrite => "rewrite",
        }
    }

    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            OpenMode::Read => options.read(true),
            OpenMode::Append => options.create(true).append(true),
            OpenMode::Rewrite => options.create(true).write(true).truncate(true),
        };
        options
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One stored message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

/// Rotation bookkeeping for date-stamped logs
#[derive(Debug)]
struct Rotation {
    dir: PathBuf,
    basename: String,
    day: u32,
}

impl Rotation {
    fn path_for(&self, timestamp: u32) -> PathBuf {
        rotated_path(&self.dir, &self.basename, timestamp)
    }
}

/// Path of the rotating log covering `timestamp`
pub fn rotated_path(dir: &Path, basename: &str, timestamp: u32) -> PathBuf {
    let date = from_timestamp(timestamp).format("%Y%m%d");
    dir.join(format!("{}-{}.log", basename, date))
}

/// Path of a non-rotating log
pub fn fixed_path(dir: &Path, basename: &str) -> PathBuf {
    dir.join(format!("{}.log", basename))
}

#[derive(Debug)]
pub struct LogFile {
    mode: OpenMode,
    path: PathBuf,
    rotation: Option<Rotation>,
    file: Option<File>,
}

impl LogFile {
    /// Open a log at an explicit path
    pub fn open(path: impl Into<PathBuf>, mode: OpenMode) -> Result<Self> {
        let mut log = LogFile {
            mode,
            path: path.into(),
            rotation: None,
            file: None,
        };
        log.reopen()?;
        Ok(log)
    }

    /// Open the date-stamped log for the day containing `now`
    pub fn open_rotating(
        dir: impl Into<PathBuf>,
        basename: &str,
        now: DateTime<Utc>,
        mode: OpenMode,
    ) -> Result<Self> {
        let timestamp = to_timestamp(now);
        let rotation = Rotation {
            dir: dir.into(),
            basename: basename.to_string(),
            day: day_of(timestamp),
        };
        let mut log = LogFile {
            mode,
            path: rotation.path_for(timestamp),
            rotation: Some(rotation),
            file: None,
        };
        log.reopen()?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Open the current path; fails if a handle is already held
    pub fn reopen(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Err(Error::AlreadyOpen(self.path.display().to_string()));
        }
        let file = self.mode.options().open(&self.path)?;
        debug!("opened log {} ({})", self.path.display(), self.mode);
        self.file = Some(file);
        Ok(())
    }

    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("closed log {}", self.path.display());
        }
    }

    fn invalid_mode(&self) -> Error {
        Error::InvalidMode {
            path: self.path.display().to_string(),
            mode: self.mode.name(),
        }
    }

    /// Append one message stamped with the current time
    pub fn write_message(&mut self, payload: &[u8]) -> Result<()> {
        self.write_message_at(Utc::now(), payload)
    }

    /// Append one message stamped with `now`, rotating first if the day changed
    pub fn write_message_at(&mut self, now: DateTime<Utc>, payload: &[u8]) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Err(self.invalid_mode());
        }
        let length = u16::try_from(payload.len()).map_err(|_| Error::RecordTooLarge(payload.len()))?;
        let timestamp = to_timestamp(now);
        self.rotate_if_needed(timestamp)?;

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        record.extend_from_slice(&timestamp.to_be_bytes());
        record.extend_from_slice(&length.to_be_bytes());
        record.extend_from_slice(payload);

        let path = self.path.display().to_string();
        let file = self.file.as_mut().ok_or(Error::NotOpen(path))?;
        file.write_all(&record)?;
        file.flush()?;
        Ok(())
    }

    fn rotate_if_needed(&mut self, timestamp: u32) -> Result<()> {
        let Some(rotation) = &self.rotation else {
            return Ok(());
        };
        let day = day_of(timestamp);
        if day == rotation.day {
            return Ok(());
        }

        let next_path = rotation.path_for(timestamp);
        let file = match self.mode.options().open(&next_path) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    "log rotation to {} failed, keeping {}: {}",
                    next_path.display(),
                    self.path.display(),
                    e
                );
                return Err(e.into());
            }
        };

        info!("rotating log {} -> {}", self.path.display(), next_path.display());
        self.file = Some(file);
        self.path = next_path;
        if let Some(rotation) = self.rotation.as_mut() {
            rotation.day = day;
        }
        Ok(())
    }

    /// Read the next record. `Ok(None)` marks a clean end of file; a record
    /// cut short is an error.
    pub fn read_message(&mut self) -> Result<Option<LogRecord>> {
        if self.mode != OpenMode::Read {
            return Err(self.invalid_mode());
        }
        let path = self.path.display().to_string();
        let file = self.file.as_mut().ok_or_else(|| Error::NotOpen(path.clone()))?;

        let mut header = [0u8; RECORD_HEADER_LEN];
        match read_full(file, &mut header)? {
            0 => return Ok(None),
            RECORD_HEADER_LEN => {}
            n => {
                return Err(Error::TruncatedRecord {
                    path,
                    detail: format!("{} of {} header bytes", n, RECORD_HEADER_LEN),
                })
            }
        }

        let timestamp = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        let mut payload = vec![0u8; length];
        let n = read_full(file, &mut payload)?;
        if n != length {
            return Err(Error::TruncatedRecord {
                path,
                detail: format!("{} of {} payload bytes", n, length),
            });
        }

        Ok(Some(LogRecord { timestamp, payload }))
    }
}

impl Drop for LogFile {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fill `buf` as far as the file allows; returns the number of bytes read
fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn read_all(path: &Path) -> Vec<LogRecord> {
        let mut log = LogFile::open(path, OpenMode::Read).unwrap();
        let mut records = Vec::new();
        while let Some(record) = log.read_message().unwrap() {
            records.push(record);
        }
        records
    }

    #[test]
    fn test_record_layout() {
        let dir = tempdir().unwrap();
        let path = fixed_path(dir.path(), "host");
        let mut log = LogFile::open(&path, OpenMode::Rewrite).unwrap();
        log.write_message_at(at(2000, 1, 1, 0, 0, 5), &[0xaa, 0xbb]).unwrap();
        drop(log);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 5, 0, 2, 0xaa, 0xbb]);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = fixed_path(dir.path(), "host");
        let mut log = LogFile::open(&path, OpenMode::Append).unwrap();
        log.write_message_at(at(2024, 5, 1, 12, 0, 0), b"first").unwrap();
        log.write_message_at(at(2024, 5, 1, 12, 0, 10), b"").unwrap();
        log.write_message_at(at(2024, 5, 1, 12, 0, 20), b"third").unwrap();
        drop(log);

        let records = read_all(&path);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].payload, b"first");
        assert!(records[1].payload.is_empty());
        assert_eq!(records[2].timestamp, to_timestamp(at(2024, 5, 1, 12, 0, 20)));
    }

    #[test]
    fn test_append_keeps_and_rewrite_truncates() {
        let dir = tempdir().unwrap();
        let path = fixed_path(dir.path(), "peer");
        let now = at(2024, 5, 1, 0, 0, 0);

        LogFile::open(&path, OpenMode::Append).unwrap().write_message_at(now, b"a").unwrap();
        LogFile::open(&path, OpenMode::Append).unwrap().write_message_at(now, b"b").unwrap();
        assert_eq!(read_all(&path).len(), 2);

        LogFile::open(&path, OpenMode::Rewrite).unwrap().write_message_at(now, b"c").unwrap();
        let records = read_all(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"c");
    }

    #[test]
    fn test_mode_enforcement() {
        let dir = tempdir().unwrap();
        let path = fixed_path(dir.path(), "host");
        let mut writer = LogFile::open(&path, OpenMode::Append).unwrap();
        assert!(matches!(writer.read_message(), Err(Error::InvalidMode { .. })));

        let mut reader = LogFile::open(&path, OpenMode::Read).unwrap();
        assert!(matches!(reader.write_message(b"x"), Err(Error::InvalidMode { .. })));
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = tempdir().unwrap();
        let result = LogFile::open(dir.path().join("absent.log"), OpenMode::Read);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_reopen_while_open_fails() {
        let dir = tempdir().unwrap();
        let mut log = LogFile::open(fixed_path(dir.path(), "host"), OpenMode::Append).unwrap();
        assert!(matches!(log.reopen(), Err(Error::AlreadyOpen(_))));
        log.close();
        assert!(!log.is_open());
        log.reopen().unwrap();
    }

    #[test]
    fn test_truncated_record_is_error() {
        let dir = tempdir().unwrap();
        let path = fixed_path(dir.path(), "host");
        let mut log = LogFile::open(&path, OpenMode::Rewrite).unwrap();
        log.write_message_at(at(2024, 1, 1, 0, 0, 0), b"complete").unwrap();
        drop(log);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0, 0, 0, 1, 0, 9, 1, 2]);
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = LogFile::open(&path, OpenMode::Read).unwrap();
        assert!(reader.read_message().unwrap().is_some());
        assert!(matches!(reader.read_message(), Err(Error::TruncatedRecord { .. })));
    }

    #[test]
    fn test_record_too_large() {
        let dir = tempdir().unwrap();
        let mut log = LogFile::open(fixed_path(dir.path(), "host"), OpenMode::Append).unwrap();
        let payload = vec![0u8; 65536];
        assert!(matches!(log.write_message(&payload), Err(Error::RecordTooLarge(65536))));
    }

    #[test]
    fn test_rotation_at_midnight() {
        let dir = tempdir().unwrap();
        let before = at(2024, 3, 9, 23, 59, 59);
        let after = at(2024, 3, 10, 0, 0, 1);

        let mut log = LogFile::open_rotating(dir.path(), "host", before, OpenMode::Append).unwrap();
        assert_eq!(log.path(), dir.path().join("host-20240309.log"));
        log.write_message_at(before, b"late").unwrap();
        log.write_message_at(after, b"early").unwrap();
        assert_eq!(log.path(), dir.path().join("host-20240310.log"));
        drop(log);

        let first = read_all(&dir.path().join("host-20240309.log"));
        let second = read_all(&dir.path().join("host-20240310.log"));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].payload, b"late");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload, b"early");
    }

    #[test]
    fn test_failed_rotation_keeps_previous_handle() {
        let dir = tempdir().unwrap();
        let before = at(2024, 3, 9, 12, 0, 0);
        let after = at(2024, 3, 10, 12, 0, 0);

        let mut log = LogFile::open_rotating(dir.path(), "host", before, OpenMode::Append).unwrap();
        // a directory squatting on the next day's name makes the open fail
        std::fs::create_dir(dir.path().join("host-20240310.log")).unwrap();

        assert!(log.write_message_at(after, b"dropped").is_err());
        assert_eq!(log.path(), dir.path().join("host-20240309.log"));
        log.write_message_at(before, b"kept").unwrap();
        drop(log);

        let records = read_all(&dir.path().join("host-20240309.log"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"kept");
    }

    #[test]
    fn test_fixed_log_never_rotates() {
        let dir = tempdir().unwrap();
        let path = fixed_path(dir.path(), "host");
        let mut log = LogFile::open(&path, OpenMode::Append).unwrap();
        log.write_message_at(at(2024, 3, 9, 23, 59, 59), b"a").unwrap();
        log.write_message_at(at(2024, 3, 10, 0, 0, 1), b"b").unwrap();
        assert_eq!(log.path(), path.as_path());
        drop(log);
        assert_eq!(read_all(&path).len(), 2);
    }
}
