//! Build script for solrset-operator
//!
//! Packages the `_checksums` configset directory into a zip archive in
//! `OUT_DIR` so the binary can stream it to Solr as a single blob.

use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::Path;

fn main() {
    let manifest_dir =
        std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR should be set");
    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR should be set");

    let src_dir = Path::new(&manifest_dir).join("configsets/checksums");
    println!("cargo:rerun-if-changed={}", src_dir.display());

    let zip_path = Path::new(&out_dir).join("checksums-configset.zip");
    let file = File::create(&zip_path)
        .unwrap_or_else(|e| panic!("failed to create {}: {}", zip_path.display(), e));

    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    // Sort entries so the archive bytes (and therefore the uploaded blob)
    // are stable across builds.
    let mut entries: Vec<_> = fs::read_dir(&src_dir)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", src_dir.display(), e))
        .map(|entry| entry.expect("readable directory entry").path())
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    for path in entries {
        let name = path
            .file_name()
            .expect("file should have a name")
            .to_string_lossy()
            .into_owned();
        println!("cargo:rerun-if-changed={}", path.display());

        let data =
            fs::read(&path).unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e));
        zip.start_file(name, options)
            .expect("zip entry should be writable");
        zip.write_all(&data).expect("zip entry should be writable");
    }

    zip.finish().expect("zip archive should finalize");
}
