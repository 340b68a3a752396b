use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Backend holding the serialized cache of one capture.
pub trait CacheStorage {
    /// Open the stored cache for reading; `None` when nothing is stored.
    fn open(&self) -> io::Result<Option<Box<dyn Read + '_>>>;

    /// Replace the stored cache with the bytes produced by `write`.
    ///
    /// Implementations must not expose a partially written cache: either the
    /// previous contents or the complete new contents are visible afterwards.
    fn commit(&self, write: &mut dyn FnMut(&mut dyn Write) -> io::Result<()>) -> io::Result<()>;

    /// Remove the stored cache, if any.
    fn discard(&self) -> io::Result<()>;

    /// Human readable location for log messages.
    fn describe(&self) -> String;
}

/// Cache stored next to the capture file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache path for a capture: the capture path with `suffix` appended.
    pub fn for_capture(capture: &Path, suffix: &str) -> Self {
        let mut path = OsString::from(capture.as_os_str());
        path.push(suffix);
        Self { path: PathBuf::from(path) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStorage for FileStorage {
    fn open(&self) -> io::Result<Option<Box<dyn Read + '_>>> {
        match File::open(&self.path) {
            Ok(file) => Ok(Some(Box::new(BufReader::new(file)))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn commit(&self, write: &mut dyn FnMut(&mut dyn Write) -> io::Result<()>) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Written beside the target so the final rename stays on one filesystem.
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            write(&mut writer)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn discard(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
