mod common;

use psptrace_core::cache::{parse_all, CacheSource};
use psptrace_core::capture::CaptureParser;
use psptrace_core::config::{TraceConfig, ViewOptions};
use psptrace_core::layout::LayoutIndex;
use psptrace_core::session::{SessionError, TraceSession};
use tempfile::tempdir;

use common::{psp_image, scenario_layout, spi_capture, write_file};

const MANIFEST: &str = r#"
entries:
  - { start: "0x20000", size: "0x40", type: "Firmware Entry Table" }
  - { start: "0x77000", size: "0x400", type: "Directory: $PSP", source: 0 }
  - { start: "0x77000", size: "0x400", type: "Directory: $PSP", source: 1 }
"#;

fn boot_capture() -> String {
    spi_capture(&[
        (0.0, 0x020000, 0x1c),
        (10.0, 0x077000, 0x12a),
        (15.0, 0x077000, 0x12a),
        (3500.0, 0x077000, 0x12a),
    ])
}

#[test]
fn session_renders_overview_and_reuses_cache() {
    let dir = tempdir().expect("tempdir");
    let csv = write_file(dir.path(), "boot.csv", boot_capture());
    let rom = write_file(dir.path(), "layout.yaml", MANIFEST);

    let session = TraceSession::open(&csv, &rom, TraceConfig::default()).expect("open");
    assert_eq!(session.capture().source, CacheSource::Built);
    assert_eq!(session.capture_path(), csv.as_path());
    assert_eq!(session.index().len(), 3);
    assert!(dir.path().join("boot.csv.psptrace-cache").exists());

    let options = ViewOptions { overview: true, no_duplicates: true, ..ViewOptions::default() };
    let rows = session.run(&options);
    let groups: Vec<_> = rows.iter().filter_map(|row| row.as_group()).collect();
    let tags: Vec<&str> = groups.iter().map(|g| g.type_tag.as_str()).collect();
    assert_eq!(tags, vec!["Firmware Entry Table", "Directory: $PSP", "Directory: $PSP"]);
    assert_eq!(groups[1].multiplicity, Some(2));
    assert_eq!(rows.len(), 4);

    let reopened = TraceSession::open(&csv, &rom, TraceConfig::default()).expect("reopen");
    assert_eq!(reopened.capture().source, CacheSource::Hit);
    assert_eq!(reopened.run(&options), rows);
}

#[test]
fn session_walks_raw_rom_image() {
    let dir = tempdir().expect("tempdir");
    let csv = write_file(dir.path(), "boot.csv", spi_capture(&[(0.0, 0x078000, 0x40), (1.0, 0x091000, 0x10)]));
    let rom = write_file(dir.path(), "bios.bin", psp_image());

    let session = TraceSession::open(&csv, &rom, TraceConfig::default()).expect("open");
    let rows = session.run(&ViewOptions::default());
    let groups: Vec<_> = rows.iter().filter_map(|row| row.as_group()).collect();
    assert_eq!(groups[0].type_tag, "PSP_FW_BOOT_LOADER");
    assert_eq!(groups[0].tags, vec!["CCP".to_string()]);
    assert_eq!(groups[1].type_tag, "PSP_FW_TRUSTED_OS");
    assert_eq!(groups[1].info_tag.as_deref(), Some("L2"));
}

#[test]
fn session_from_parsed_capture_and_prebuilt_index() {
    let dir = tempdir().expect("tempdir");
    let csv = write_file(dir.path(), "boot.csv", boot_capture());
    let capture = parse_all(&CaptureParser::open(&csv).expect("parser")).expect("parse");
    assert_eq!(capture.source, CacheSource::Built);

    let session = TraceSession::from_parts(capture, LayoutIndex::build(scenario_layout()), TraceConfig::default());
    assert_eq!(session.capture_path(), std::path::Path::new(""));
    assert!(!dir.path().join("boot.csv.psptrace-cache").exists());

    let rows = session.run(&ViewOptions { overview: true, ..ViewOptions::default() });
    let tags: Vec<&str> = rows.iter().filter_map(|row| row.as_group()).map(|g| g.type_tag.as_str()).collect();
    assert_eq!(tags, vec!["Firmware Entry Table", "Directory: $PSP", "Directory: $PSP"]);
    assert_eq!(rows.len(), 4);
}

#[test]
fn limit_applies_to_records_before_aggregation() {
    let dir = tempdir().expect("tempdir");
    let csv = write_file(dir.path(), "boot.csv", boot_capture());
    let rom = write_file(dir.path(), "layout.yaml", MANIFEST);
    let session = TraceSession::open(&csv, &rom, TraceConfig::default()).expect("open");

    let limited = ViewOptions { limit: Some(2), ..ViewOptions::default() };
    assert_eq!(session.records(&limited).len(), 2);
    assert_eq!(session.run(&limited).len(), 2);

    let generous = ViewOptions { limit: Some(100), ..ViewOptions::default() };
    assert_eq!(session.records(&generous).len(), 4);

    let zero = ViewOptions { limit: Some(0), ..ViewOptions::default() };
    assert!(session.run(&zero).is_empty());
}

#[test]
fn custom_cache_suffix_is_used() {
    let dir = tempdir().expect("tempdir");
    let csv = write_file(dir.path(), "boot.csv", boot_capture());
    let rom = write_file(dir.path(), "layout.yaml", MANIFEST);
    let config = TraceConfig { cache_suffix: ".alt".to_string(), ..TraceConfig::default() };

    TraceSession::open(&csv, &rom, config).expect("open");
    assert!(dir.path().join("boot.csv.alt").exists());
    assert!(!dir.path().join("boot.csv.psptrace-cache").exists());
}

#[test]
fn missing_inputs_are_fatal() {
    let dir = tempdir().expect("tempdir");
    let csv = write_file(dir.path(), "boot.csv", boot_capture());
    let rom = write_file(dir.path(), "layout.yaml", MANIFEST);

    let err = TraceSession::open(&dir.path().join("nope.csv"), &rom, TraceConfig::default()).unwrap_err();
    assert!(matches!(err, SessionError::CaptureNotFound(_)));

    let err = TraceSession::open(&csv, &dir.path().join("nope.bin"), TraceConfig::default()).unwrap_err();
    assert!(matches!(err, SessionError::RomNotFound(_)));
    assert!(err.to_string().contains("nope.bin"));
}

#[test]
fn unrecognized_capture_is_fatal() {
    let dir = tempdir().expect("tempdir");
    let csv = write_file(dir.path(), "boot.csv", "not,a,capture\n");
    let rom = write_file(dir.path(), "layout.yaml", MANIFEST);
    let err = TraceSession::open(&csv, &rom, TraceConfig::default()).unwrap_err();
    assert!(matches!(err, SessionError::Capture(_)));
}
