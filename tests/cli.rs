//! Runs the `structmap` binary against temporary map and data files.

use std::io::Write;
use std::process::{Command, Output};
use tempfile::NamedTempFile;

fn file_with(bytes: &[u8]) -> NamedTempFile {
    let mut f = NamedTempFile::new().expect("temp file");
    f.write_all(bytes).expect("write temp file");
    f.flush().expect("flush temp file");
    f
}

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_structmap"))
        .args(args)
        .output()
        .expect("run structmap")
}

fn path(f: &NamedTempFile) -> &str {
    f.path().to_str().expect("utf-8 temp path")
}

const MAP: &str = "struct Main { uint16 id; uint8 flags; };\n";

#[test]
fn decodes_file_to_stdout() {
    let map = file_with(MAP.as_bytes());
    let data = file_with(&[0x34, 0x12, 0x01]);
    let out = run(&[path(&map), path(&data)]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "id = 4660 (0x1234)\nflags = 1 (0x01)\n");
}

#[test]
fn big_endian_flag() {
    let map = file_with(MAP.as_bytes());
    let data = file_with(&[0x34, 0x12, 0x01]);
    let out = run(&["--big-endian", path(&map), path(&data)]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).starts_with("id = 13330 (0x3412)\n"));
}

#[test]
fn offset_and_length_select_a_window() {
    let map = file_with(b"struct Main { uint8 b[10]; };");
    let data = file_with(&[0, 1, 2, 3, 4, 5]);
    let out = run(&["--offset", "2", "--length", "3", path(&map), path(&data)]);
    assert!(out.status.success());
    assert_eq!(
        String::from_utf8_lossy(&out.stdout),
        "b:\n  [0] = 2 (0x02)\n  [1] = 3 (0x03)\n  [2] = 4 (0x04)\n"
    );
}

#[test]
fn offset_past_end_fails() {
    let map = file_with(MAP.as_bytes());
    let data = file_with(&[1, 2]);
    let out = run(&["--offset", "9", path(&map), path(&data)]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("beyond the end"));
}

#[test]
fn identify_lists_every_candidate() {
    let map = file_with(
        b"struct Gif { char3 magic = \"GIF\"; char3 version; };\n\
          struct Bmp { char2 magic = \"BM\"; uint32 size; };\n",
    );
    let data = file_with(b"GIF89a");
    let out = run(&["--identify", path(&map), path(&data)]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "Gif: match (6 bytes)");
    assert!(lines[1].starts_with("Bmp: no match at byte 2 ("), "{}", lines[1]);
}

#[test]
fn compile_errors_go_to_stderr_and_fail() {
    let map = file_with(b"struct Main { Widget w; };");
    let data = file_with(&[0]);
    let out = run(&[path(&map), path(&data)]);
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains(":1 - expected type, got 'Widget' instead"), "{stderr}");
}

#[test]
fn constraint_mismatch_exits_with_failure_after_partial_trace() {
    let map = file_with(b"struct Main { uint8 magic = 0x7F; uint8 rest; };");
    let data = file_with(&[0x7E, 0]);
    let out = run(&[path(&map), path(&data)]);
    assert!(!out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "magic = 126 (0x7e)\nValue Mismatch!\n");
}
