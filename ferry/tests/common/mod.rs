//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use ferry::archive::{
    Archive, UnpackLimits, DatasetRecord, ModelRecord, ProjectRecord, SuiteRecord, SuiteTestRecord,
};
use ferry::security::RolePermissionEvaluator;
use ferry::staging::StagingManager;
use ferry::transfer::TransferService;
use ferry_storage::{EntityStore, SqliteStore, User};
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

pub const UNPACK_LIMITS: UnpackLimits = UnpackLimits::new(64 * 1024 * 1024, 256);

pub fn project(key: &str, owner: &str, guests: &[&str]) -> ProjectRecord {
    ProjectRecord {
        key: key.to_string(),
        name: format!("Project {}", key),
        description: Some("credit risk".to_string()),
        owner: owner.to_string(),
        guests: guests.iter().map(|g| g.to_string()).collect(),
    }
}

pub fn dataset(id: &str, owner: &str) -> DatasetRecord {
    DatasetRecord {
        id: id.to_string(),
        name: format!("dataset {}", id),
        owner: owner.to_string(),
        target: Some("default".to_string()),
        column_types: BTreeMap::from([
            ("income".to_string(), "numeric".to_string()),
            ("region".to_string(), "category".to_string()),
        ]),
    }
}

pub fn model(id: &str, owner: &str) -> ModelRecord {
    ModelRecord {
        id: id.to_string(),
        name: format!("model {}", id),
        owner: owner.to_string(),
        language: "PYTHON".to_string(),
        language_version: "3.11".to_string(),
        feature_names: vec!["income".to_string(), "region".to_string()],
        classification_labels: vec!["no".to_string(), "yes".to_string()],
    }
}

/// `proj-7` with one dataset owned by `u1` and nothing else.
pub fn minimal_archive() -> Archive {
    let mut archive = Archive::new(project("proj-7", "u1", &[]), Some("exporter".to_string()));
    archive.add_dataset(dataset("d1", "u1"), Bytes::from_static(b"income,region\n1,north\n"));
    archive
}

/// `proj-7` owned by `u1`, guest `u2`, one dataset, one model owned by `u2`
/// and a suite wired to both.
pub fn full_archive() -> Archive {
    let mut archive = Archive::new(project("proj-7", "u1", &["u2"]), Some("exporter".to_string()));
    archive.add_dataset(dataset("d1", "u1"), Bytes::from_static(b"income,region\n1,north\n"));
    archive.add_model(model("m1", "u2"), Bytes::from(vec![7u8; 2048]));
    archive.add_suite(SuiteRecord {
        id: "s1".to_string(),
        name: "smoke".to_string(),
        tests: vec![SuiteTestRecord {
            name: "f1 above threshold".to_string(),
            test_id: "ferry.testing.test_f1".to_string(),
            params: BTreeMap::from([("threshold".to_string(), json!("0.7"))]),
            dataset: Some("d1".to_string()),
            model: Some("m1".to_string()),
        }],
    });
    archive
}

pub fn encoded(archive: &Archive) -> Bytes {
    Bytes::from(ferry::archive::encode_to_vec(archive).unwrap())
}

pub fn user(login: &str) -> User {
    User {
        login: login.to_string(),
        display_name: None,
        roles: vec!["ROLE_AI_CREATOR".to_string()],
        enabled: true,
    }
}

pub async fn store_with_users(logins: &[&str]) -> Arc<SqliteStore> {
    let store = SqliteStore::in_memory().unwrap();
    let mut tx = store.begin().await.unwrap();
    for login in logins {
        tx.upsert_user(user(login)).await.unwrap();
    }
    tx.commit().await.unwrap();
    Arc::new(store)
}

pub struct Harness {
    pub temp: TempDir,
    pub staging: Arc<StagingManager>,
    pub service: TransferService,
}

pub fn harness(store: Arc<dyn EntityStore>) -> Harness {
    let temp = TempDir::new().unwrap();
    let staging = StagingManager::new(temp.path().join("staging"), 8).unwrap();
    let service = TransferService::new(
        store,
        staging.clone(),
        Arc::new(RolePermissionEvaluator),
        UNPACK_LIMITS,
    );
    Harness {
        temp,
        staging,
        service,
    }
}

/// Build a tar+zstd stream from raw entries, bypassing the encoder.
pub fn raw_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, path, *content).unwrap();
    }
    compress(&builder.into_inner().unwrap())
}

/// Like [`raw_archive`] but writes the entry name verbatim, so paths the
/// tar builder would refuse (`../x`, `/etc/x`) end up in the stream.
pub fn raw_archive_with_name(name: &str, content: &[u8], entry_type: tar::EntryType) -> Vec<u8> {
    let mut header = tar::Header::new_gnu();
    {
        let gnu = header.as_gnu_mut().unwrap();
        gnu.name[..name.len()].copy_from_slice(name.as_bytes());
    }
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(entry_type);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, content).unwrap();
    compress(&builder.into_inner().unwrap())
}

/// One regular entry whose header declares `declared_size` bytes while only
/// `content` follows in the stream.
pub fn raw_archive_with_declared_size(name: &str, content: &[u8], declared_size: u64) -> Vec<u8> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name).unwrap();
    header.set_size(declared_size);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, content).unwrap();
    compress(&builder.into_inner().unwrap())
}

/// `count` empty regular files named `junk/<n>`.
pub fn raw_archive_of_empty_entries(count: usize) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for n in 0..count {
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        builder
            .append_data(&mut header, format!("junk/{}", n), &b""[..])
            .unwrap();
    }
    compress(&builder.into_inner().unwrap())
}

pub fn compress(tar_bytes: &[u8]) -> Vec<u8> {
    let mut encoder = zstd::stream::Encoder::new(Vec::new(), 3).unwrap();
    encoder.write_all(tar_bytes).unwrap();
    encoder.finish().unwrap()
}

pub fn manifest_json(version: u32, key: &str, roster: &[&str]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "format": "ferry-archive",
        "version": version,
        "project_key": key,
        "exported_at": "2024-01-01T00:00:00+00:00",
        "roster": roster,
    }))
    .unwrap()
}

pub fn project_json(key: &str, owner: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "key": key,
        "name": "Hand made",
        "owner": owner,
    }))
    .unwrap()
}
