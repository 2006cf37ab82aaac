//! Archive codec: round trips, determinism and rejection of hostile or
//! corrupt input.

mod common;

use bytes::Bytes;
use common::*;
use ferry::archive::{self, Archive, SuiteRecord, SuiteTestRecord, UnpackLimits};
use ferry::ErrorKind;
use proptest::prelude::*;
use std::collections::BTreeMap;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn test_full_archive_round_trip() {
    let original = full_archive();
    let bytes = archive::encode_to_vec(&original).unwrap();
    let decoded = archive::decode(&bytes).unwrap();

    assert_eq!(decoded, original);
    assert_eq!(decoded.manifest.roster, vec!["u1", "u2"]);
    assert_eq!(
        decoded.models["m1"].blob.read().unwrap(),
        Bytes::from(vec![7u8; 2048])
    );
    assert!(decoded.skipped_entries.is_empty());
}

#[test]
fn test_encoding_is_deterministic() {
    let original = full_archive();
    let first = archive::encode_to_vec(&original).unwrap();
    let second = archive::encode_to_vec(&original).unwrap();
    assert_eq!(first, second);

    let reencoded = archive::encode_to_vec(&archive::decode(&first).unwrap()).unwrap();
    assert_eq!(reencoded, first);
}

#[test]
fn test_unpack_then_decode_dir_matches_decode() {
    let original = full_archive();
    let bytes = archive::encode_to_vec(&original).unwrap();

    let dir = TempDir::new().unwrap();
    let stats = archive::unpack(&bytes[..], dir.path(), UNPACK_LIMITS).unwrap();
    // manifest, project, 2 x (meta + blob), suite
    assert_eq!(stats.files, 7);

    let from_dir = archive::decode_dir(dir.path()).unwrap();
    assert_eq!(from_dir, original);
    assert!(dir.path().join("datasets/d1/data.bin").is_file());

    // Blobs spooled to disk re-encode to the same bytes.
    assert_eq!(archive::encode_to_vec(&from_dir).unwrap(), bytes);
}

#[test]
fn test_empty_project_round_trips() {
    let original = Archive::new(project("empty", "owner", &[]), None);
    assert!(original.is_empty());

    let decoded = archive::decode(&archive::encode_to_vec(&original).unwrap()).unwrap();
    assert_eq!(decoded, original);
    assert_eq!(decoded.manifest.roster, vec!["owner"]);
}

// ---------------------------------------------------------------------------
// Corrupt input
// ---------------------------------------------------------------------------

#[test]
fn test_garbage_is_malformed() {
    let err = archive::decode(b"definitely not zstd").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);
}

#[test]
fn test_truncated_archive_is_malformed() {
    let bytes = archive::encode_to_vec(&full_archive()).unwrap();
    for cut in [1, bytes.len() / 3, bytes.len() / 2] {
        let err = archive::decode(&bytes[..cut]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArchive, "cut at {}", cut);
    }
}

#[test]
fn test_truncated_archive_fails_unpack() {
    let bytes = archive::encode_to_vec(&full_archive()).unwrap();
    let dir = TempDir::new().unwrap();
    let err = archive::unpack(&bytes[..bytes.len() / 2], dir.path(), UNPACK_LIMITS).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnpackFailed);
}

#[test]
fn test_missing_manifest_is_malformed() {
    let bytes = raw_archive(&[("project.json", &project_json("p", "u1"))]);
    let err = archive::decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);
}

#[test]
fn test_newer_version_is_unsupported() {
    let bytes = raw_archive(&[
        ("manifest.json", &manifest_json(2, "p", &["u1"])),
        ("project.json", &project_json("p", "u1")),
    ]);
    let err = archive::decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);
}

#[test]
fn test_foreign_format_is_malformed() {
    let manifest = serde_json::to_vec(&serde_json::json!({
        "format": "something-else",
        "version": 1,
    }))
    .unwrap();
    let bytes = raw_archive(&[("manifest.json", &manifest)]);
    let err = archive::decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);
}

#[test]
fn test_roster_must_match_references() {
    let bytes = raw_archive(&[
        ("manifest.json", &manifest_json(1, "p", &["u1", "ghost"])),
        ("project.json", &project_json("p", "u1")),
    ]);
    let err = archive::decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);

    let bytes = raw_archive(&[
        ("manifest.json", &manifest_json(1, "p", &["u1"])),
        ("project.json", &project_json("p", "u1")),
    ]);
    assert!(archive::decode(&bytes).is_ok());
}

#[test]
fn test_dangling_suite_reference_is_malformed() {
    let mut archive = minimal_archive();
    archive.add_suite(SuiteRecord {
        id: "s1".to_string(),
        name: "broken".to_string(),
        tests: vec![SuiteTestRecord {
            name: "t".to_string(),
            test_id: "ferry.testing.test_accuracy".to_string(),
            params: BTreeMap::new(),
            dataset: Some("d1".to_string()),
            model: Some("missing".to_string()),
        }],
    });
    let bytes = archive::encode_to_vec(&archive).unwrap();
    let err = archive::decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);
}

#[test]
fn test_blob_digest_is_verified() {
    let meta = serde_json::to_vec(&serde_json::json!({
        "project_key": "p",
        "id": "d1",
        "name": "train",
        "owner": "u1",
        "blob": {"size": 3, "sha256": "00"},
    }))
    .unwrap();
    let bytes = raw_archive(&[
        ("manifest.json", &manifest_json(1, "p", &["u1"])),
        ("project.json", &project_json("p", "u1")),
        ("datasets/d1/meta.json", &meta),
        ("datasets/d1/data.bin", b"abc"),
    ]);
    let err = archive::decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);
}

#[test]
fn test_unknown_entries_are_skipped() {
    let bytes = raw_archive(&[
        ("manifest.json", &manifest_json(1, "p", &["u1"])),
        ("project.json", &project_json("p", "u1")),
        ("notes/README.md", b"hello"),
    ]);
    let decoded = archive::decode(&bytes).unwrap();
    assert_eq!(decoded.skipped_entries, vec!["notes/README.md"]);
    assert!(decoded.is_empty());
}

// ---------------------------------------------------------------------------
// Hostile input to unpack
// ---------------------------------------------------------------------------

#[test]
fn test_unpack_rejects_parent_traversal() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("workspace");
    std::fs::create_dir(&target).unwrap();

    let bytes = raw_archive_with_name("../escaped.txt", b"pwned", tar::EntryType::Regular);
    let err = archive::unpack(&bytes[..], &target, UNPACK_LIMITS).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnpackFailed);
    assert!(!temp.path().join("escaped.txt").exists());
}

#[test]
fn test_unpack_rejects_absolute_paths() {
    let dir = TempDir::new().unwrap();
    let bytes = raw_archive_with_name("/tmp/ferry-absolute.txt", b"x", tar::EntryType::Regular);
    let err = archive::unpack(&bytes[..], dir.path(), UNPACK_LIMITS).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnpackFailed);
}

#[test]
fn test_unpack_rejects_links() {
    let dir = TempDir::new().unwrap();
    let bytes = raw_archive_with_name("link", b"", tar::EntryType::Symlink);
    let err = archive::unpack(&bytes[..], dir.path(), UNPACK_LIMITS).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnpackFailed);
    assert!(!dir.path().join("link").exists());
}

#[test]
fn test_unpack_enforces_size_limit() {
    let bytes = archive::encode_to_vec(&full_archive()).unwrap();
    let dir = TempDir::new().unwrap();
    let err = archive::unpack(&bytes[..], dir.path(), UnpackLimits::new(1024, 256)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnpackFailed);
}

#[test]
fn test_unpack_enforces_entry_limit() {
    let limits = UnpackLimits::new(1024, 16);
    let dir = TempDir::new().unwrap();

    let bytes = raw_archive_of_empty_entries(16);
    let at_limit = archive::unpack(&bytes[..], dir.path(), limits).unwrap();
    assert_eq!(at_limit.files, 16);

    let dir = TempDir::new().unwrap();
    let bytes = raw_archive_of_empty_entries(17);
    let err = archive::unpack(&bytes[..], dir.path(), limits).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnpackFailed);
    assert!(err.to_string().contains("more than 16 entries"));
}

#[test]
fn test_decode_enforces_entry_limit() {
    let bytes = raw_archive_of_empty_entries(17);
    let err = archive::decode_with_limits(&bytes, UnpackLimits::new(1024, 16)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);
}

#[test]
fn test_decode_rejects_huge_declared_size() {
    for declared in [u64::MAX - 1024, u64::MAX / 2] {
        let bytes = raw_archive_with_declared_size("datasets/d1/data.bin", b"tiny", declared);
        let err = archive::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArchive);
    }
}

#[test]
fn test_unpack_rejects_huge_declared_size() {
    let dir = TempDir::new().unwrap();
    let bytes = raw_archive_with_declared_size("datasets/d1/data.bin", b"tiny", u64::MAX - 1024);
    let err = archive::unpack(&bytes[..], dir.path(), UNPACK_LIMITS).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnpackFailed);
}

#[test]
fn test_decode_rejects_entry_shorter_than_declared() {
    let bytes = raw_archive_with_declared_size("notes.txt", b"tiny", 4096);
    let err = archive::decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);
}

#[test]
fn test_unpack_garbage() {
    let dir = TempDir::new().unwrap();
    let err = archive::unpack(&b"garbage"[..], dir.path(), UNPACK_LIMITS).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnpackFailed);
}

// ---------------------------------------------------------------------------
// Property: decode(encode(a)) == a and re-encoding is byte-identical
// ---------------------------------------------------------------------------

fn arb_user() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["u1", "u2", "u3", "svc_bot"]).prop_map(str::to_string)
}

fn arb_id() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_-]{1,16}"
}

fn arb_archive() -> impl Strategy<Value = Archive> {
    (
        arb_user(),
        prop::collection::vec(arb_user(), 0..3),
        prop::collection::btree_map(arb_id(), (arb_user(), prop::collection::vec(any::<u8>(), 0..512)), 0..4),
        prop::collection::btree_map(arb_id(), (arb_user(), prop::collection::vec(any::<u8>(), 0..512)), 0..3),
        prop::collection::vec("[a-z ]{1,20}", 0..3),
    )
        .prop_map(|(owner, guests, datasets, models, suite_names)| {
            let guests: Vec<&str> = guests.iter().map(String::as_str).collect();
            let mut archive = Archive::new(project("prop", &owner, &guests), None);
            for (id, (owner, content)) in &datasets {
                archive.add_dataset(dataset(id, owner), Bytes::from(content.clone()));
            }
            for (id, (owner, content)) in &models {
                archive.add_model(model(id, owner), Bytes::from(content.clone()));
            }
            let first_dataset = datasets.keys().next().cloned();
            let first_model = models.keys().next().cloned();
            for (i, name) in suite_names.into_iter().enumerate() {
                archive.add_suite(SuiteRecord {
                    id: format!("s{}", i),
                    name,
                    tests: vec![SuiteTestRecord {
                        name: "check".to_string(),
                        test_id: "ferry.testing.test_metamorphic".to_string(),
                        params: BTreeMap::from([(
                            "direction".to_string(),
                            serde_json::json!("increasing"),
                        )]),
                        dataset: first_dataset.clone(),
                        model: first_model.clone(),
                    }],
                });
            }
            archive
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_round_trip(original in arb_archive()) {
        let bytes = archive::encode_to_vec(&original).unwrap();
        let decoded = archive::decode(&bytes).unwrap();

        prop_assert_eq!(&decoded, &original);
        for (id, entry) in &original.datasets {
            prop_assert_eq!(
                decoded.datasets[id].blob.read().unwrap(),
                entry.blob.read().unwrap()
            );
        }
        prop_assert_eq!(archive::encode_to_vec(&decoded).unwrap(), bytes);
    }
}
