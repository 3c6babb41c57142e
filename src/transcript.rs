//! On-disk transcripts of capture sessions.
//!
//! A [`Transcript`] is the write side, owned by one capture session for its
//! whole lifetime. A [`TranscriptStore`] is the read side, listing, reading
//! and deleting the transcripts kept in the configured directory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use log::debug;
use serde::Serialize;

use crate::error::CaptureError;
use crate::settings::Settings;

const FILE_PREFIX: &str = "POSTCODE_LOG_";
const FILE_EXTENSION: &str = "txt";
const LISTING_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// Transcript writer
// =============================================================================

/// Append-only transcript of one capture session. Every write is flushed
/// before it returns; the file is closed when the transcript is dropped.
#[derive(Debug)]
pub struct Transcript {
    path: PathBuf,
    file: File,
}
impl Transcript {
    /// Create a new transcript file in the settings' log directory, named
    /// after `started`, and write its header.
    pub fn create(settings: &Settings, started: DateTime<Local>) -> io::Result<Self> {
        fs::create_dir_all(&settings.log_dir)?;
        let stamp = started.format("%d-%m-%y-%H-%M-%S").to_string();
        let (path, file) = create_unique(&settings.log_dir, &stamp)?;
        debug!("transcript: {}", path.display());

        let mut transcript = Transcript { path, file };
        transcript.write_flushed(&format!(
            "Postcode Log - Started at {}\nPort: {}, Baudrate: {}\n{}\n",
            stamp,
            settings.port,
            settings.baud_rate,
            "=".repeat(50)
        ))?;
        Ok(transcript)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one captured line, stamped with `timestamp` (`HH:MM:SS`).
    pub fn write_line(&mut self, timestamp: &str, line: &str) -> io::Result<()> {
        self.write_flushed(&format!("[{}] {}\n", timestamp, line))
    }

    /// Write the summary footer. Consumes the transcript, closing the file.
    pub fn finish(mut self, ended: DateTime<Local>, total_postcodes: usize) -> io::Result<()> {
        self.write_flushed(&format!(
            "\nSession ended at {}\nTotal postcodes captured: {}\n",
            ended.format("%H:%M:%S"),
            total_postcodes
        ))
    }

    fn write_flushed(&mut self, text: &str) -> io::Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.file.flush()
    }
}

/// Create a new file for `stamp`, adding a numeric suffix when a transcript
/// with the same name already exists.
fn create_unique(dir: &Path, stamp: &str) -> io::Result<(PathBuf, File)> {
    let mut attempt = 0;
    loop {
        let name = if attempt == 0 {
            format!("{}{}.{}", FILE_PREFIX, stamp, FILE_EXTENSION)
        } else {
            format!("{}{}-{}.{}", FILE_PREFIX, stamp, attempt, FILE_EXTENSION)
        };
        let path = dir.join(name);
        match OpenOptions::new().append(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

// =============================================================================
// Transcript store
// =============================================================================

/// Metadata of a stored transcript.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct TranscriptInfo {
    pub name: String,
    pub size: u64,
    /// `%Y-%m-%d %H:%M:%S`, local time.
    pub modified: String,
    /// `%Y-%m-%d %H:%M:%S`, local time. Same as `modified` when the
    /// filesystem does not record creation times.
    pub created: String,
    #[serde(skip)]
    modified_at: SystemTime,
}

/// Access to the transcripts kept in one directory. Names given to the store
/// must be plain file names inside that directory.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    dir: PathBuf,
}
impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TranscriptStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All transcripts, newest first. A missing directory has no transcripts.
    pub fn list(&self) -> Result<Vec<TranscriptInfo>, CaptureError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut transcripts = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified_at = metadata.modified()?;
            let created_at = metadata.created().unwrap_or(modified_at);
            transcripts.push(TranscriptInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                modified: format_time(modified_at),
                created: format_time(created_at),
                modified_at,
            });
        }
        transcripts.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(transcripts)
    }

    /// The path of transcript `name`, rejecting anything that is not an
    /// existing file directly inside the store directory.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, CaptureError> {
        let mut components = Path::new(name).components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(std::path::Component::Normal(c)), None) if c == name
        );
        if !plain || name.contains('\\') {
            return Err(CaptureError::InvalidName(name.to_owned()));
        }

        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(CaptureError::NotFound(name.to_owned()));
        }
        // A symlink may still lead somewhere else.
        let dir = self.dir.canonicalize()?;
        if !path.canonicalize()?.starts_with(&dir) {
            return Err(CaptureError::InvalidName(name.to_owned()));
        }
        Ok(path)
    }

    /// The raw text of transcript `name`.
    pub fn read(&self, name: &str) -> Result<String, CaptureError> {
        let path = self.resolve(name)?;
        let bytes = fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn delete(&self, name: &str) -> Result<(), CaptureError> {
        let path = self.resolve(name)?;
        fs::remove_file(path)?;
        Ok(())
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format(LISTING_TIME_FORMAT)
        .to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsBuilder;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn settings(dir: &Path) -> Settings {
        SettingsBuilder::new()
            .port("/dev/ttyS0")
            .baud_rate(115_200)
            .log_dir(dir)
            .finalize()
    }

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn header_lines_and_footer() {
        let tmp = TempDir::new().unwrap();
        let mut transcript = Transcript::create(&settings(tmp.path()), started()).unwrap();
        let path = transcript.path().to_owned();
        assert_eq!(
            path.file_name().unwrap(),
            "POSTCODE_LOG_09-03-24-14-05-07.txt"
        );

        transcript.write_line("14:05:08", "e3").unwrap();
        // Flushed before the transcript is finished.
        let partial = fs::read_to_string(&path).unwrap();
        assert!(partial.ends_with("[14:05:08] e3\n"));

        transcript
            .finish(Local.with_ymd_and_hms(2024, 3, 9, 14, 6, 0).unwrap(), 1)
            .unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            format!(
                "Postcode Log - Started at 09-03-24-14-05-07\n\
                 Port: /dev/ttyS0, Baudrate: 115200\n\
                 {}\n\
                 [14:05:08] e3\n\
                 \n\
                 Session ended at 14:06:00\n\
                 Total postcodes captured: 1\n",
                "=".repeat(50)
            )
        );
    }

    #[test]
    fn same_second_sessions_get_distinct_files() {
        let tmp = TempDir::new().unwrap();
        let first = Transcript::create(&settings(tmp.path()), started()).unwrap();
        let second = Transcript::create(&settings(tmp.path()), started()).unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(
            second.path().file_name().unwrap(),
            "POSTCODE_LOG_09-03-24-14-05-07-1.txt"
        );
    }

    #[test]
    fn creates_missing_log_dir() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a/b");
        let transcript = Transcript::create(&settings(&nested), started()).unwrap();
        assert!(transcript.path().starts_with(&nested));
    }

    #[test]
    fn list_only_txt_files_newest_first() {
        let tmp = TempDir::new().unwrap();
        let older = tmp.path().join("POSTCODE_LOG_old.txt");
        let newer = tmp.path().join("POSTCODE_LOG_new.txt");
        fs::write(&older, "old").unwrap();
        fs::write(&newer, "newer").unwrap();
        fs::write(tmp.path().join("notes.md"), "skip").unwrap();
        fs::create_dir(tmp.path().join("dir.txt")).unwrap();

        let past = SystemTime::now() - std::time::Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&older)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let store = TranscriptStore::new(tmp.path());
        let listed = store.list().unwrap();
        let names: Vec<&str> = listed.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["POSTCODE_LOG_new.txt", "POSTCODE_LOG_old.txt"]);
        assert_eq!(listed[0].size, 5);
        assert_eq!(listed[0].modified.len(), "2024-03-09 14:05:07".len());
    }

    #[test]
    fn list_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = TranscriptStore::new(tmp.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn read_and_delete() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("POSTCODE_LOG_a.txt"), "content").unwrap();
        let store = TranscriptStore::new(tmp.path());

        assert_eq!(store.read("POSTCODE_LOG_a.txt").unwrap(), "content");
        store.delete("POSTCODE_LOG_a.txt").unwrap();
        assert!(matches!(
            store.read("POSTCODE_LOG_a.txt"),
            Err(CaptureError::NotFound(_))
        ));
    }

    #[test]
    fn rejects_path_traversal() {
        let tmp = TempDir::new().unwrap();
        let logs = tmp.path().join("logs");
        fs::create_dir(&logs).unwrap();
        fs::write(tmp.path().join("secret.txt"), "secret").unwrap();
        let store = TranscriptStore::new(&logs);

        for name in ["../secret.txt", "/etc/passwd", "..", ".", "", "a/b.txt", "..\\x"] {
            assert!(
                matches!(store.read(name), Err(CaptureError::InvalidName(_))),
                "{:?} should be rejected",
                name
            );
        }
        assert!(matches!(
            store.delete("../secret.txt"),
            Err(CaptureError::InvalidName(_))
        ));
        assert!(tmp.path().join("secret.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let tmp = TempDir::new().unwrap();
        let logs = tmp.path().join("logs");
        fs::create_dir(&logs).unwrap();
        fs::write(tmp.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("secret.txt"), logs.join("link.txt")).unwrap();

        let store = TranscriptStore::new(&logs);
        assert!(matches!(
            store.read("link.txt"),
            Err(CaptureError::InvalidName(_))
        ));
    }
}
