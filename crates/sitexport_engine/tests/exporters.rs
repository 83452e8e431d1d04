use std::fs::{self, File};
use std::io::Read;

use pretty_assertions::assert_eq;
use sitexport_core::{Destination, DestinationConfig, DestinationKind};
use sitexport_engine::{create_exporter, Exporter, ExporterError, FolderExporter};
use tempfile::TempDir;

fn segments(path: &[&str]) -> Vec<String> {
    path.iter().map(|segment| segment.to_string()).collect()
}

#[test]
fn folder_exporter_writes_nested_files_and_removes_them() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("public");
    let mut exporter = FolderExporter::new(root.clone());

    exporter.open().unwrap();
    assert!(root.is_dir());
    exporter
        .write_file(&segments(&["articles", "foo.html"]), b"<p>foo</p>", Some("text/html"))
        .unwrap();
    assert_eq!(fs::read(root.join("articles/foo.html")).unwrap(), b"<p>foo</p>");

    exporter.remove_file(&segments(&["articles", "foo.html"])).unwrap();
    assert!(!root.join("articles/foo.html").exists());
    // Removing what is already gone is not an error.
    exporter.remove_file(&segments(&["articles", "foo.html"])).unwrap();
    exporter.close().unwrap();
}

#[test]
fn folder_exporter_refuses_paths_outside_its_root() {
    let temp = TempDir::new().unwrap();
    let mut exporter = FolderExporter::new(temp.path().join("public"));
    exporter.open().unwrap();

    let err = exporter
        .write_file(&segments(&["..", "escape.html"]), b"x", None)
        .unwrap_err();
    assert!(matches!(err, ExporterError::InvalidPath(_)));
    assert!(!temp.path().join("escape.html").exists());
}

#[test]
fn zip_destinations_pack_every_file_into_one_archive() {
    let temp = TempDir::new().unwrap();
    let config = DestinationConfig::new(
        "archive",
        DestinationKind::Zip {
            zip_folder: Some(temp.path().to_path_buf()),
        },
    );
    let destination = Destination::new(1, config).unwrap();
    let mut exporter = create_exporter(&destination, 12).unwrap();
    let archive_path = temp.path().join("12.zip");
    assert_eq!(exporter.location(), Some(archive_path.clone()));

    exporter.open().unwrap();
    exporter
        .write_file(&segments(&["index.html"]), b"<p>home</p>", Some("text/html"))
        .unwrap();
    exporter
        .write_file(&segments(&["img", "logo.png"]), &[1, 2, 3], Some("image/png"))
        .unwrap();
    assert!(matches!(
        exporter.remove_file(&segments(&["index.html"])),
        Err(ExporterError::RemoveUnsupported("zip"))
    ));
    exporter.close().unwrap();

    let mut archive = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
    let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["img/logo.png", "index.html"]);

    let mut home = String::new();
    archive
        .by_name("index.html")
        .unwrap()
        .read_to_string(&mut home)
        .unwrap();
    assert_eq!(home, "<p>home</p>");
}

#[test]
fn folder_destinations_build_folder_exporters() {
    let temp = TempDir::new().unwrap();
    let destination =
        Destination::new(1, DestinationConfig::folder("public", temp.path().join("out"))).unwrap();
    let mut exporter = create_exporter(&destination, 1).unwrap();
    assert_eq!(exporter.location(), None);

    exporter.open().unwrap();
    exporter
        .write_file(&segments(&["index.html"]), b"home", None)
        .unwrap();
    exporter.close().unwrap();
    assert_eq!(fs::read(temp.path().join("out/index.html")).unwrap(), b"home");
}
