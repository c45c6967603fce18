//! Shared fixtures for integration tests.

#![allow(dead_code)]

pub mod release_server;

use std::io::{Cursor, Write};
use std::path::Path;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use jpidwr::config::REQUIRED_DATASETS;
use jpidwr::manager::RetryPolicy;
use jpidwr::{DataConfig, VersionTag};
use serde_json::json;
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use release_server::ReleaseServer;

pub const ARCHIVE_NAME: &str = "jp_idwr_db-parquet.zip";
pub const MANIFEST_NAME: &str = "manifest.json";

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Table files for every required dataset, with bodies tagged by `label`.
pub fn default_tables(label: &str) -> Vec<(String, Vec<u8>)> {
    REQUIRED_DATASETS
        .iter()
        .map(|name| (name.to_string(), format!("{}:{}", label, name).into_bytes()))
        .collect()
}

/// Deflated zip of flat entries, as the release build script writes it.
pub fn zip_archive(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
        .unix_permissions(0o644);
    for (path, data) in files {
        writer.start_file(path.as_str(), options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn tar_gz(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, path, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Manifest for `archive` listing `files` with their true digests.
pub fn manifest_for(
    version: &str,
    archive: &[u8],
    files: &[(String, Vec<u8>)],
) -> serde_json::Value {
    let entries: serde_json::Map<String, serde_json::Value> = files
        .iter()
        .map(|(path, data)| {
            (
                path.clone(),
                json!({ "sha256": sha256_hex(data), "size_bytes": data.len() }),
            )
        })
        .collect();

    json!({
        "archive": ARCHIVE_NAME,
        "archive_sha256": sha256_hex(archive),
        "files": entries,
        "release_tag": version,
    })
}

/// `manifest.json` listing each of `files` as a separate parquet asset.
pub fn tables_manifest(version: &str, files: &[(String, Vec<u8>)]) -> serde_json::Value {
    let tables: Vec<serde_json::Value> = files
        .iter()
        .map(|(file, data)| {
            json!({
                "name": file.trim_end_matches(".parquet"),
                "file": file,
                "format": "parquet",
                "size_bytes": data.len(),
                "sha256": sha256_hex(data),
                "schema": [],
                "stats": { "rows": 1 },
            })
        })
        .collect();

    json!({
        "spec_version": "1.0.0",
        "dataset_id": "jp_idwr_db",
        "data_version": version.trim_start_matches('v'),
        "release_tag": version,
        "published_at": "2025-01-01T00:00:00Z",
        "license": "GPL-3.0-or-later",
        "homepage": "https://example.invalid",
        "assets_base_url": format!("https://example.invalid/download/{}", version),
        "tables": tables,
    })
}

/// Publish `files` for `version` as individually hosted tables.
pub fn publish_tables(server: &ReleaseServer, version: &str, files: &[(String, Vec<u8>)]) {
    let manifest = tables_manifest(version, files);
    server.serve(version, MANIFEST_NAME, serde_json::to_vec(&manifest).unwrap());
    for (file, data) in files {
        server.serve(version, file, data.clone());
    }
}

/// Publish a consistent archive release of `files` for `version` on `server`.
pub fn publish(server: &ReleaseServer, version: &str, files: &[(String, Vec<u8>)]) {
    let archive = zip_archive(files);
    let manifest = manifest_for(version, &archive, files);
    publish_raw(server, version, &manifest, archive);
}

/// Publish an arbitrary manifest and archive pair.
pub fn publish_raw(
    server: &ReleaseServer,
    version: &str,
    manifest: &serde_json::Value,
    archive: Vec<u8>,
) {
    server.serve(version, MANIFEST_NAME, serde_json::to_vec(manifest).unwrap());
    server.serve(version, ARCHIVE_NAME, archive);
}

/// Retry policy with short real delays so backoff code runs.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

/// Configuration pointing at `server` with a cache under `root`.
pub fn config(server: &ReleaseServer, root: &Path, version: &str) -> DataConfig {
    DataConfig::new(VersionTag::parse(version).unwrap(), root)
        .with_base_url(server.base_url())
        .unwrap()
        .with_timeout(Duration::from_secs(10))
        .with_retry(fast_retry())
}
