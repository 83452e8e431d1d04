use std::fs;

use sitexport_engine::{ensure_output_dir, AtomicFileWriter};
use tempfile::TempDir;

#[test]
fn creates_missing_output_dir() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("site").join("articles");
    assert!(!new_dir.exists());
    ensure_output_dir(&new_dir).unwrap();
    assert!(new_dir.is_dir());
}

#[test]
fn atomic_write_replaces_existing_files() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().join("articles"));

    let first = writer.write("foo.html", b"<p>old</p>").unwrap();
    assert_eq!(first.file_name().unwrap(), "foo.html");
    assert_eq!(fs::read(&first).unwrap(), b"<p>old</p>");

    let second = writer.write("foo.html", b"<p>new</p>").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read(&second).unwrap(), b"<p>new</p>");
}

#[test]
fn no_partial_file_on_error() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    let result = writer.write("logo.png", &[0x89, b'P', b'N', b'G']);
    assert!(result.is_err());
    assert!(!file_path.with_file_name("logo.png").exists());
}
