//! Source readers and source bindings.
//!
//! A file-backed session keeps a byte offset into its file and reads only what
//! was appended since the last poll. The file is opened, read and closed within
//! a single poll so rotation or truncation between polls is always observed
//! through a fresh `stat`.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Result of a `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub exists: bool,
}

/// Filesystem capability used by file-backed sessions.
pub trait FileSystem {
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Read up to `length` bytes starting at `offset`.
    fn read_range(&self, path: &Path, offset: u64, length: u64) -> io::Result<Vec<u8>>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(FileStat {
                size: meta.len(),
                exists: true,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(FileStat {
                size: 0,
                exists: false,
            }),
            Err(err) => Err(err),
        }
    }

    fn read_range(&self, path: &Path, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
        // The file may have been truncated between stat and read; take what is there.
        file.take(length).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// What a single poll of a file found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Newly appended bytes.
    Data(Vec<u8>),
    /// Size unchanged since the last poll.
    NoChange,
    /// The file shrank; the offset was reset to zero. The caller must discard
    /// its partial tail. Nothing is read on this poll.
    Truncated { previous_offset: u64, size: u64 },
    /// The file is missing or could not be read.
    Unavailable { reason: String },
}

/// Offset-tracking reader for one file.
#[derive(Debug, Clone)]
pub struct FileReader {
    path: PathBuf,
    offset: u64,
}

impl FileReader {
    /// Reader that starts at byte 0.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_offset(path, 0)
    }

    /// Reader that resumes from `offset` (e.g. the current end of file, to skip
    /// existing content).
    #[must_use]
    pub fn with_offset(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Stat the file and read whatever was appended, at most `max_bytes`.
    pub fn poll<F: FileSystem + ?Sized>(&mut self, fs: &F, max_bytes: u64) -> ReadOutcome {
        let stat = match fs.stat(&self.path) {
            Ok(stat) => stat,
            Err(err) => {
                return ReadOutcome::Unavailable {
                    reason: err.to_string(),
                };
            }
        };

        if !stat.exists {
            return ReadOutcome::Unavailable {
                reason: "file does not exist".to_string(),
            };
        }

        if stat.size < self.offset {
            let previous_offset = self.offset;
            self.offset = 0;
            debug!(
                path = %self.path.display(),
                previous_offset,
                size = stat.size,
                "File shrank, resetting offset"
            );
            return ReadOutcome::Truncated {
                previous_offset,
                size: stat.size,
            };
        }

        if stat.size == self.offset {
            trace!(path = %self.path.display(), "File unchanged");
            return ReadOutcome::NoChange;
        }

        let length = (stat.size - self.offset).min(max_bytes.max(1));
        match fs.read_range(&self.path, self.offset, length) {
            Ok(bytes) if bytes.is_empty() => ReadOutcome::NoChange,
            Ok(bytes) => {
                self.offset += bytes.len() as u64;
                ReadOutcome::Data(bytes)
            }
            Err(err) => ReadOutcome::Unavailable {
                reason: err.to_string(),
            },
        }
    }

    /// Jump to the current end of the file, discarding unread bytes.
    ///
    /// Never moves the offset backwards.
    pub fn skip_to_end<F: FileSystem + ?Sized>(&mut self, fs: &F) {
        if let Ok(stat) = fs.stat(&self.path) {
            if stat.exists && stat.size > self.offset {
                self.offset = stat.size;
            }
        }
    }
}

/// Process-backed binding state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessBinding {
    /// Supervisor handle (pid, job id, or any host-assigned number).
    pub handle: u64,
    /// Set once the process has exited; no further chunks are accepted.
    pub exhausted: bool,
}

/// How a session receives its lines.
#[derive(Debug, Clone)]
pub enum SourceBinding {
    /// Poll a file for appended bytes.
    File(FileReader),
    /// Chunks pushed by a process supervisor.
    Process(ProcessBinding),
    /// Lines are appended by someone else; only annotation and follow apply.
    Foreign,
}

impl SourceBinding {
    #[must_use]
    pub fn kind(&self) -> BindingKind {
        match self {
            Self::File(_) => BindingKind::File,
            Self::Process(_) => BindingKind::Process,
            Self::Foreign => BindingKind::Foreign,
        }
    }

    /// Whether the binding will never produce more data.
    #[must_use]
    pub fn at_end(&self) -> bool {
        match self {
            Self::Process(p) => p.exhausted,
            Self::File(_) | Self::Foreign => false,
        }
    }

    /// Current file offset, if file-backed.
    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::File(reader) => Some(reader.offset()),
            Self::Process(_) | Self::Foreign => None,
        }
    }
}

/// Serializable tag for a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    File,
    Process,
    Foreign,
}
