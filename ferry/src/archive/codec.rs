//! Archive encoding and decoding.
//!
//! An archive is a zstd-compressed tar stream:
//!
//! ```text
//! manifest.json
//! project.json
//! datasets/<id>/meta.json    datasets/<id>/data.bin
//! models/<id>/meta.json      models/<id>/model.bin
//! suites/<id>.json
//! ```
//!
//! Output is deterministic: entries are written in the order above with ids
//! sorted, every header carries mode 0644, mtime 0 and uid/gid 0.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use super::types::{
    is_valid_entity_id, Archive, Blob, BlobDigest, DatasetEntry, DatasetRecord, Manifest,
    ModelEntry, ModelRecord, ProjectRecord, SuiteRecord, ARCHIVE_FORMAT, ARCHIVE_VERSION,
};

const ZSTD_LEVEL: i32 = 3;

/// Upper bound on the buffer reserved up front for one in-memory entry.
const MAX_PREALLOC: u64 = 64 * 1024;

const MANIFEST_PATH: &str = "manifest.json";
const PROJECT_PATH: &str = "project.json";

/// On-wire metadata: the record plus the owning project key and blob digest.
#[derive(Serialize)]
struct MetaOut<'a, T> {
    project_key: &'a str,
    #[serde(flatten)]
    record: &'a T,
    #[serde(skip_serializing_if = "Option::is_none")]
    blob: Option<&'a BlobDigest>,
}

#[derive(Deserialize)]
struct MetaIn<T> {
    project_key: String,
    #[serde(flatten)]
    record: T,
    #[serde(default)]
    blob: Option<BlobDigest>,
}

/// Just enough of the manifest to reject foreign or future archives before
/// the rest is parsed.
#[derive(Deserialize)]
struct ManifestHeader {
    format: String,
    version: u32,
}

/// Bounds applied while reading untrusted archive bytes.
///
/// Every tar entry counts against `max_entries`, directories included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackLimits {
    pub max_bytes: u64,
    pub max_entries: u64,
}

impl UnpackLimits {
    pub const fn new(max_bytes: u64, max_entries: u64) -> Self {
        Self {
            max_bytes,
            max_entries,
        }
    }
}

impl Default for UnpackLimits {
    fn default() -> Self {
        Self::new(2 * 1024 * 1024 * 1024, 10_000)
    }
}

/// Totals reported by [`unpack`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackStats {
    pub files: u64,
    pub bytes: u64,
}

/// Encode `archive` into `writer`.
///
/// The manifest roster is recomputed from the entries.
pub fn encode<W: Write>(archive: &Archive, writer: W) -> Result<()> {
    let encoder = zstd::stream::Encoder::new(writer, ZSTD_LEVEL)
        .map_err(|e| Error::Internal(format!("Zstd encoder creation failed: {}", e)))?;
    let mut builder = tar::Builder::new(encoder);

    let manifest = Manifest {
        roster: archive.roster(),
        ..archive.manifest.clone()
    };
    let key = manifest.project_key.as_str();

    append_json(&mut builder, MANIFEST_PATH, &manifest)?;
    append_json(&mut builder, PROJECT_PATH, &archive.project)?;

    for (id, entry) in &archive.datasets {
        let meta = MetaOut {
            project_key: key,
            record: &entry.record,
            blob: Some(&entry.digest),
        };
        append_json(&mut builder, &format!("datasets/{}/meta.json", id), &meta)?;
        append_blob(&mut builder, &format!("datasets/{}/data.bin", id), &entry.blob)?;
    }

    for (id, entry) in &archive.models {
        let meta = MetaOut {
            project_key: key,
            record: &entry.record,
            blob: Some(&entry.digest),
        };
        append_json(&mut builder, &format!("models/{}/meta.json", id), &meta)?;
        append_blob(&mut builder, &format!("models/{}/model.bin", id), &entry.blob)?;
    }

    for (id, suite) in &archive.suites {
        let meta = MetaOut::<SuiteRecord> {
            project_key: key,
            record: suite,
            blob: None,
        };
        append_json(&mut builder, &format!("suites/{}.json", id), &meta)?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::Internal(format!("Archive finalization failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Internal(format!("Zstd finalization failed: {}", e)))?;

    Ok(())
}

/// Encode `archive` into a fresh buffer.
pub fn encode_to_vec(archive: &Archive) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode(archive, &mut out)?;
    Ok(out)
}

/// Decode an archive held in memory under the default [`UnpackLimits`].
/// Blobs are kept inline.
///
/// # Errors
///
/// `MalformedArchive` for any structural corruption, `UnsupportedVersion`
/// for a newer format version.
pub fn decode(bytes: &[u8]) -> Result<Archive> {
    decode_with_limits(bytes, UnpackLimits::default())
}

/// Like [`decode`], rejecting archives that exceed `limits` as malformed.
pub fn decode_with_limits(bytes: &[u8], limits: UnpackLimits) -> Result<Archive> {
    let decoder = zstd::stream::Decoder::new(bytes)
        .map_err(|e| Error::MalformedArchive(format!("Zstd decoder creation failed: {}", e)))?;
    let mut tar = tar::Archive::new(decoder);

    let mut staged = BTreeMap::new();
    let mut entries = 0u64;
    let mut total = 0u64;
    for entry_result in tar
        .entries()
        .map_err(|e| Error::MalformedArchive(format!("Cannot read entries: {}", e)))?
    {
        let mut entry = entry_result
            .map_err(|e| Error::MalformedArchive(format!("Entry read failed: {}", e)))?;
        entries += 1;
        if entries > limits.max_entries {
            return Err(Error::MalformedArchive(format!(
                "Archive has more than {} entries",
                limits.max_entries
            )));
        }
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            continue;
        }
        let path = entry_path(&entry).map_err(Error::MalformedArchive)?;
        if !entry_type.is_file() {
            return Err(Error::MalformedArchive(format!(
                "Unsupported entry type for '{}'",
                path
            )));
        }

        // The declared size is attacker-controlled: bound it before reading
        let size = entry
            .header()
            .size()
            .map_err(|e| Error::MalformedArchive(format!("Bad size for '{}': {}", path, e)))?;
        if total.saturating_add(size) > limits.max_bytes {
            return Err(Error::MalformedArchive(format!(
                "Archive exceeds the limit of {} bytes",
                limits.max_bytes
            )));
        }

        let mut content = Vec::with_capacity(size.min(MAX_PREALLOC) as usize);
        entry
            .by_ref()
            .take(size)
            .read_to_end(&mut content)
            .map_err(|e| Error::MalformedArchive(format!("Entry read failed: {}", e)))?;
        if content.len() as u64 != size {
            return Err(Error::MalformedArchive(format!("Entry '{}' is truncated", path)));
        }
        total += size;

        if staged.insert(path.clone(), Staged::Memory(content)).is_some() {
            return Err(Error::MalformedArchive(format!("Duplicate entry '{}'", path)));
        }
    }

    assemble(staged)
}

/// Stream-extract an archive into `dir` without interpreting it.
///
/// Rejects absolute paths, `..` components, links and special files, and
/// stops once the archive goes past either bound in `limits`.
///
/// # Errors
///
/// Every failure, including a corrupt compressed stream, is `UnpackFailed`.
pub fn unpack<R: Read>(reader: R, dir: &Path, limits: UnpackLimits) -> Result<UnpackStats> {
    let decoder = zstd::stream::Decoder::new(reader)
        .map_err(|e| Error::UnpackFailed(format!("Zstd decoder creation failed: {}", e)))?;
    let mut tar = tar::Archive::new(decoder);
    let mut stats = UnpackStats::default();
    let mut entries = 0u64;

    for entry_result in tar
        .entries()
        .map_err(|e| Error::UnpackFailed(format!("Cannot read entries: {}", e)))?
    {
        let mut entry =
            entry_result.map_err(|e| Error::UnpackFailed(format!("Entry read failed: {}", e)))?;
        entries += 1;
        if entries > limits.max_entries {
            return Err(Error::UnpackFailed(format!(
                "Archive has more than {} entries",
                limits.max_entries
            )));
        }
        let path = entry_path(&entry).map_err(Error::UnpackFailed)?;
        let dest = dir.join(&path);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            fs::create_dir_all(&dest)
                .map_err(|e| Error::UnpackFailed(format!("Cannot create directory: {}", e)))?;
            continue;
        }
        if !entry_type.is_file() {
            return Err(Error::UnpackFailed(format!(
                "Unsupported entry type {:?} for '{}'",
                entry_type, path
            )));
        }

        let size = entry
            .header()
            .size()
            .map_err(|e| Error::UnpackFailed(format!("Bad entry size: {}", e)))?;
        if stats.bytes.saturating_add(size) > limits.max_bytes {
            return Err(Error::UnpackFailed(format!(
                "Archive exceeds the unpack limit of {} bytes",
                limits.max_bytes
            )));
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::UnpackFailed(format!("Cannot create directory: {}", e)))?;
        }
        let mut output = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest)
            .map_err(|e| Error::UnpackFailed(format!("Cannot create '{}': {}", path, e)))?;
        let written = io::copy(&mut entry, &mut output)
            .map_err(|e| Error::UnpackFailed(format!("Extract failed: {}", e)))?;

        stats.files += 1;
        stats.bytes += written;
    }

    debug!(files = stats.files, bytes = stats.bytes, "Archive unpacked");
    Ok(stats)
}

/// Decode an archive previously extracted by [`unpack`]. Blobs stay on disk.
pub fn decode_dir(dir: &Path) -> Result<Archive> {
    let mut staged = BTreeMap::new();
    collect_files(dir, dir, &mut staged)?;
    assemble(staged)
}

/// Raw bytes of one archive entry, in memory or in a workspace.
enum Staged {
    Memory(Vec<u8>),
    File(PathBuf),
}

impl Staged {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        match self {
            Staged::Memory(content) => Ok(content.clone()),
            Staged::File(file) => fs::read(file)
                .map_err(|e| Error::Internal(format!("Cannot read '{}': {}", path, e))),
        }
    }

    fn into_blob(self, path: &str, expected: &BlobDigest) -> Result<Blob> {
        let (digest, blob) = match self {
            Staged::Memory(content) => (BlobDigest::of(&content), Blob::Memory(content.into())),
            Staged::File(file) => {
                let digest = BlobDigest::of_file(&file)
                    .map_err(|e| Error::Internal(format!("Cannot read '{}': {}", path, e)))?;
                (digest, Blob::File(file))
            }
        };
        if &digest != expected {
            return Err(Error::MalformedArchive(format!(
                "Digest mismatch for '{}'",
                path
            )));
        }
        Ok(blob)
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut BTreeMap<String, Staged>) -> Result<()> {
    let read_dir = fs::read_dir(dir)
        .map_err(|e| Error::Internal(format!("Cannot read directory: {}", e)))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| Error::Internal(format!("Directory entry error: {}", e)))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| Error::Internal(format!("Directory entry error: {}", e)))?;

        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| Error::Internal(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.insert(relative, Staged::File(path));
        }
    }
    Ok(())
}

/// Where an entry path lands in the archive layout.
#[derive(Debug, PartialEq, Eq)]
enum EntryRole<'a> {
    Manifest,
    Project,
    DatasetMeta(&'a str),
    DatasetData(&'a str),
    ModelMeta(&'a str),
    ModelData(&'a str),
    Suite(&'a str),
    Unknown,
}

fn classify(path: &str) -> EntryRole<'_> {
    let parts: Vec<&str> = path.split('/').collect();
    match parts.as_slice() {
        [MANIFEST_PATH] => EntryRole::Manifest,
        [PROJECT_PATH] => EntryRole::Project,
        ["datasets", id, "meta.json"] => EntryRole::DatasetMeta(id),
        ["datasets", id, "data.bin"] => EntryRole::DatasetData(id),
        ["models", id, "meta.json"] => EntryRole::ModelMeta(id),
        ["models", id, "model.bin"] => EntryRole::ModelData(id),
        ["suites", file] => match file.strip_suffix(".json") {
            Some(id) => EntryRole::Suite(id),
            None => EntryRole::Unknown,
        },
        _ => EntryRole::Unknown,
    }
}

fn parse_json<T: DeserializeOwned>(path: &str, content: &[u8]) -> Result<T> {
    serde_json::from_slice(content)
        .map_err(|e| Error::MalformedArchive(format!("Cannot parse '{}': {}", path, e)))
}

fn check_id(path: &str, id: &str) -> Result<()> {
    if is_valid_entity_id(id) {
        Ok(())
    } else {
        Err(Error::MalformedArchive(format!(
            "Invalid entity id in '{}'",
            path
        )))
    }
}

/// Build and validate an [`Archive`] from entries keyed by path.
fn assemble(mut staged: BTreeMap<String, Staged>) -> Result<Archive> {
    let manifest_bytes = staged
        .remove(MANIFEST_PATH)
        .ok_or_else(|| Error::MalformedArchive("No manifest.json in archive".to_string()))?
        .read(MANIFEST_PATH)?;

    let header: ManifestHeader = parse_json(MANIFEST_PATH, &manifest_bytes)?;
    if header.format != ARCHIVE_FORMAT {
        return Err(Error::MalformedArchive(format!(
            "Unknown archive format '{}'",
            header.format
        )));
    }
    if header.version == 0 || header.version > ARCHIVE_VERSION {
        return Err(Error::UnsupportedVersion {
            found: header.version,
            supported: ARCHIVE_VERSION,
        });
    }
    let manifest: Manifest = parse_json(MANIFEST_PATH, &manifest_bytes)?;

    let project: ProjectRecord = match staged.remove(PROJECT_PATH) {
        Some(raw) => parse_json(PROJECT_PATH, &raw.read(PROJECT_PATH)?)?,
        None => {
            return Err(Error::MalformedArchive(
                "No project.json in archive".to_string(),
            ))
        }
    };
    if project.key != manifest.project_key {
        return Err(Error::MalformedArchive(format!(
            "project.json declares key '{}' but manifest declares '{}'",
            project.key, manifest.project_key
        )));
    }

    let key = manifest.project_key.clone();
    let check_key = |path: &str, declared: &str| -> Result<()> {
        if declared == key {
            Ok(())
        } else {
            Err(Error::MalformedArchive(format!(
                "'{}' belongs to project '{}', not '{}'",
                path, declared, key
            )))
        }
    };

    let mut dataset_meta = BTreeMap::new();
    let mut dataset_data = BTreeMap::new();
    let mut model_meta = BTreeMap::new();
    let mut model_data = BTreeMap::new();
    let mut suites = BTreeMap::new();
    let mut skipped_entries = Vec::new();

    for (path, raw) in staged {
        match classify(&path) {
            EntryRole::DatasetMeta(id) => {
                check_id(&path, id)?;
                let meta: MetaIn<DatasetRecord> = parse_json(&path, &raw.read(&path)?)?;
                check_key(&path, &meta.project_key)?;
                if meta.record.id != id {
                    return Err(Error::MalformedArchive(format!(
                        "'{}' declares id '{}'",
                        path, meta.record.id
                    )));
                }
                dataset_meta.insert(id.to_string(), meta);
            }
            EntryRole::DatasetData(id) => {
                check_id(&path, id)?;
                dataset_data.insert(id.to_string(), (path.clone(), raw));
            }
            EntryRole::ModelMeta(id) => {
                check_id(&path, id)?;
                let meta: MetaIn<ModelRecord> = parse_json(&path, &raw.read(&path)?)?;
                check_key(&path, &meta.project_key)?;
                if meta.record.id != id {
                    return Err(Error::MalformedArchive(format!(
                        "'{}' declares id '{}'",
                        path, meta.record.id
                    )));
                }
                model_meta.insert(id.to_string(), meta);
            }
            EntryRole::ModelData(id) => {
                check_id(&path, id)?;
                model_data.insert(id.to_string(), (path.clone(), raw));
            }
            EntryRole::Suite(id) => {
                check_id(&path, id)?;
                let meta: MetaIn<SuiteRecord> = parse_json(&path, &raw.read(&path)?)?;
                check_key(&path, &meta.project_key)?;
                if meta.record.id != id {
                    return Err(Error::MalformedArchive(format!(
                        "'{}' declares id '{}'",
                        path, meta.record.id
                    )));
                }
                suites.insert(id.to_string(), meta.record);
            }
            EntryRole::Manifest | EntryRole::Project | EntryRole::Unknown => {
                debug!(path = %path, "Skipping unknown archive entry");
                skipped_entries.push(path);
            }
        }
    }
    if !skipped_entries.is_empty() {
        warn!(skipped = skipped_entries.len(), "Archive contains unknown entries");
    }

    let mut datasets = BTreeMap::new();
    for (id, meta) in dataset_meta {
        let digest = meta.blob.ok_or_else(|| {
            Error::MalformedArchive(format!("Dataset '{}' has no blob digest", id))
        })?;
        let (path, raw) = dataset_data
            .remove(&id)
            .ok_or_else(|| Error::MalformedArchive(format!("Dataset '{}' has no data", id)))?;
        let blob = raw.into_blob(&path, &digest)?;
        datasets.insert(
            id,
            DatasetEntry {
                record: meta.record,
                digest,
                blob,
            },
        );
    }
    if let Some(id) = dataset_data.keys().next() {
        return Err(Error::MalformedArchive(format!(
            "Dataset data '{}' has no metadata",
            id
        )));
    }

    let mut models = BTreeMap::new();
    for (id, meta) in model_meta {
        let digest = meta.blob.ok_or_else(|| {
            Error::MalformedArchive(format!("Model '{}' has no blob digest", id))
        })?;
        let (path, raw) = model_data
            .remove(&id)
            .ok_or_else(|| Error::MalformedArchive(format!("Model '{}' has no data", id)))?;
        let blob = raw.into_blob(&path, &digest)?;
        models.insert(
            id,
            ModelEntry {
                record: meta.record,
                digest,
                blob,
            },
        );
    }
    if let Some(id) = model_data.keys().next() {
        return Err(Error::MalformedArchive(format!(
            "Model data '{}' has no metadata",
            id
        )));
    }

    for suite in suites.values() {
        for test in &suite.tests {
            if let Some(dataset) = &test.dataset {
                if !datasets.contains_key(dataset) {
                    return Err(Error::MalformedArchive(format!(
                        "Suite '{}' references unknown dataset '{}'",
                        suite.id, dataset
                    )));
                }
            }
            if let Some(model) = &test.model {
                if !models.contains_key(model) {
                    return Err(Error::MalformedArchive(format!(
                        "Suite '{}' references unknown model '{}'",
                        suite.id, model
                    )));
                }
            }
        }
    }

    let archive = Archive {
        manifest,
        project,
        datasets,
        models,
        suites,
        skipped_entries,
    };

    if archive.manifest.roster != archive.roster() {
        return Err(Error::MalformedArchive(
            "Manifest roster does not match the users referenced by the archive".to_string(),
        ));
    }

    Ok(archive)
}

/// Relative entry path as a `/`-joined string, or an error message when the
/// path could escape the extraction root.
fn entry_path<R: Read>(entry: &tar::Entry<'_, R>) -> std::result::Result<String, String> {
    let path = entry
        .path()
        .map_err(|e| format!("Path read failed: {}", e))?;

    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("Entry '{}' escapes the archive root", path.display()))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("Entry '{}' is absolute", path.display()))
            }
        }
    }
    if parts.is_empty() {
        return Err("Entry with empty path".to_string());
    }
    Ok(parts.join("/"))
}

fn append_json<W: Write, T: Serialize>(
    builder: &mut tar::Builder<W>,
    path: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::Internal(format!("Serialization of '{}' failed: {}", path, e)))?;
    append_bytes(builder, path, json.len() as u64, json.as_slice())
}

fn append_blob<W: Write>(builder: &mut tar::Builder<W>, path: &str, blob: &Blob) -> Result<()> {
    match blob {
        Blob::Memory(bytes) => append_bytes(builder, path, bytes.len() as u64, &bytes[..]),
        Blob::File(file) => {
            let mut source = File::open(file)
                .map_err(|e| Error::Internal(format!("Cannot open blob '{}': {}", path, e)))?;
            let size = source
                .metadata()
                .map_err(|e| Error::Internal(format!("Cannot stat blob '{}': {}", path, e)))?
                .len();
            append_bytes(builder, path, size, &mut source)
        }
    }
}

/// Append one regular file with a normalized header.
fn append_bytes<W: Write, R: Read>(
    builder: &mut tar::Builder<W>,
    path: &str,
    size: u64,
    data: R,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(size);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);

    builder
        .append_data(&mut header, path, data)
        .map_err(|e| Error::Internal(format!("Archive append failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("manifest.json"), EntryRole::Manifest);
        assert_eq!(classify("datasets/d1/meta.json"), EntryRole::DatasetMeta("d1"));
        assert_eq!(classify("models/m1/model.bin"), EntryRole::ModelData("m1"));
        assert_eq!(classify("suites/s1.json"), EntryRole::Suite("s1"));
        assert_eq!(classify("suites/s1.yaml"), EntryRole::Unknown);
        assert_eq!(classify("README.md"), EntryRole::Unknown);
        assert_eq!(classify("datasets/d1/extra/meta.json"), EntryRole::Unknown);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"definitely not zstd").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MalformedArchive);
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = unpack(
            &b"definitely not zstd"[..],
            temp.path(),
            UnpackLimits::new(1024, 16),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnpackFailed);
    }
}
