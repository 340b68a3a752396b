mod common;

use std::cell::RefCell;
use std::fs;
use std::io::{self, Cursor, Read, Write};

use psptrace_core::cache::{
    parse_all, CacheError, CacheSource, CacheStorage, CaptureCache, CaptureIdentity, FileStorage,
    CACHE_MAGIC,
};
use psptrace_core::capture::CaptureParser;
use psptrace_core::config::CACHE_SUFFIX;
use serde::Serialize;
use tempfile::tempdir;

use common::{spi_capture, write_file};

/// Cache kept in memory, optionally refusing writes.
#[derive(Default)]
struct MemoryStorage {
    bytes: RefCell<Option<Vec<u8>>>,
    fail_writes: bool,
}

impl CacheStorage for MemoryStorage {
    fn open(&self) -> io::Result<Option<Box<dyn Read + '_>>> {
        Ok(self.bytes.borrow().clone().map(|bytes| Box::new(Cursor::new(bytes)) as Box<dyn Read + '_>))
    }

    fn commit(&self, write: &mut dyn FnMut(&mut dyn Write) -> io::Result<()>) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        let mut buffer = Vec::new();
        write(&mut buffer)?;
        *self.bytes.borrow_mut() = Some(buffer);
        Ok(())
    }

    fn discard(&self) -> io::Result<()> {
        *self.bytes.borrow_mut() = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

fn capture_file(dir: &std::path::Path) -> std::path::PathBuf {
    write_file(
        dir,
        "capture.csv",
        spi_capture(&[(0.0, 0x020000, 0x1c), (100.0, 0x077000, 0x40), (4000.0, 0x077000, 0x40)]),
    )
}

#[test]
fn second_load_hits_cache_with_identical_records() {
    let dir = tempdir().expect("tempdir");
    let csv = capture_file(dir.path());
    let parser = CaptureParser::open(&csv).expect("open");
    let cache = CaptureCache::for_capture(&csv, CACHE_SUFFIX).expect("cache");

    let built = cache.load_or_build(&parser).expect("build");
    assert_eq!(built.source, CacheSource::Built);
    assert!(cache.storage().path().exists());
    assert_eq!(cache.storage().path(), dir.path().join("capture.csv.psptrace-cache"));

    let hit = cache.load_or_build(&parser).expect("hit");
    assert_eq!(hit.source, CacheSource::Hit);
    assert_eq!(hit.records, built.records);
    assert_eq!(hit.stats, built.stats);
    assert_eq!(hit.format, built.format);
}

#[test]
fn changed_capture_is_reparsed() {
    let dir = tempdir().expect("tempdir");
    let csv = capture_file(dir.path());
    let parser = CaptureParser::open(&csv).expect("open");
    CaptureCache::for_capture(&csv, CACHE_SUFFIX).expect("cache").load_or_build(&parser).expect("build");

    fs::write(&csv, spi_capture(&[(0.0, 0x030000, 8)])).expect("rewrite capture");
    let cache = CaptureCache::for_capture(&csv, CACHE_SUFFIX).expect("cache");
    let rebuilt = cache.load_or_build(&parser).expect("rebuild");

    assert_eq!(rebuilt.source, CacheSource::Built);
    assert_eq!(rebuilt.records.len(), 1);
    assert_eq!(rebuilt.records[0].address, 0x030000);
}

#[test]
fn corrupt_cache_is_discarded_and_rebuilt() {
    let dir = tempdir().expect("tempdir");
    let csv = capture_file(dir.path());
    let parser = CaptureParser::open(&csv).expect("open");
    let cache = CaptureCache::for_capture(&csv, CACHE_SUFFIX).expect("cache");
    fs::write(cache.storage().path(), b"definitely not messagepack").expect("corrupt");

    assert!(matches!(cache.load(), Err(CacheError::Corrupt(_))));
    let rebuilt = cache.load_or_build(&parser).expect("rebuild");
    assert_eq!(rebuilt.source, CacheSource::Built);
    assert_eq!(rebuilt.records.len(), 3);
    assert_eq!(cache.load_or_build(&parser).expect("hit").source, CacheSource::Hit);
}

#[test]
fn truncated_cache_is_corrupt() {
    let dir = tempdir().expect("tempdir");
    let csv = capture_file(dir.path());
    let parser = CaptureParser::open(&csv).expect("open");
    let cache = CaptureCache::for_capture(&csv, CACHE_SUFFIX).expect("cache");
    cache.load_or_build(&parser).expect("build");

    let bytes = fs::read(cache.storage().path()).expect("read cache");
    fs::write(cache.storage().path(), &bytes[..bytes.len() - 10]).expect("truncate");
    assert!(matches!(cache.load(), Err(CacheError::Corrupt(_))));
}

#[test]
fn foreign_format_version_is_rejected_then_replaced() {
    #[derive(Serialize)]
    struct Preamble {
        magic: String,
        format_version: u32,
    }

    let dir = tempdir().expect("tempdir");
    let csv = capture_file(dir.path());
    let parser = CaptureParser::open(&csv).expect("open");
    let cache = CaptureCache::for_capture(&csv, CACHE_SUFFIX).expect("cache");
    let preamble = Preamble { magic: CACHE_MAGIC.to_string(), format_version: 999 };
    fs::write(cache.storage().path(), rmp_serde::to_vec(&preamble).expect("encode")).expect("write");

    assert!(matches!(cache.load(), Err(CacheError::VersionMismatch { found: 999, .. })));
    assert_eq!(cache.load_or_build(&parser).expect("rebuild").source, CacheSource::Built);
    assert!(cache.load().expect("load").is_some());
}

#[test]
fn write_failure_still_returns_parsed_capture() {
    let dir = tempdir().expect("tempdir");
    let csv = capture_file(dir.path());
    let parser = CaptureParser::open(&csv).expect("open");
    let identity = CaptureIdentity::of_file(&csv).expect("identity");
    let cache = CaptureCache::new(MemoryStorage { fail_writes: true, ..Default::default() }, identity);

    let first = cache.load_or_build(&parser).expect("build");
    assert_eq!(first.records.len(), 3);
    assert_eq!(first.source, CacheSource::Built);
    assert_eq!(cache.load_or_build(&parser).expect("again").source, CacheSource::Built);
}

#[test]
fn injected_storage_round_trips_through_cache() {
    let dir = tempdir().expect("tempdir");
    let csv = capture_file(dir.path());
    let parser = CaptureParser::open(&csv).expect("open");
    let identity = CaptureIdentity::of_file(&csv).expect("identity");
    let cache = CaptureCache::new(MemoryStorage::default(), identity);

    let built = cache.load_or_build(&parser).expect("build");
    let hit = cache.load_or_build(&parser).expect("hit");
    assert_eq!(hit.source, CacheSource::Hit);
    assert_eq!(hit.records, built.records);
    assert_eq!(built.records, parse_all(&parser).expect("parse").records);
}

#[test]
fn cache_for_other_capture_is_stale() {
    let dir = tempdir().expect("tempdir");
    let csv = capture_file(dir.path());
    let other = write_file(dir.path(), "other.csv", spi_capture(&[(0.0, 0x1000, 4)]));
    let parser = CaptureParser::open(&csv).expect("open");

    let storage = FileStorage::new(dir.path().join("shared.cache"));
    let cache = CaptureCache::new(storage.clone(), CaptureIdentity::of_file(&csv).expect("identity"));
    cache.load_or_build(&parser).expect("build");

    let other_cache = CaptureCache::new(storage, CaptureIdentity::of_file(&other).expect("identity"));
    assert!(other_cache.load().expect("load").is_none());
}
