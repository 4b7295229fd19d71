//! Hash-verified checkpoint storage.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<research_id>/<phase>.json   one record per (research, phase)
//! <root>/<research_id>/latest.json    pointer to the most recent record
//! ```
//!
//! Every file is written through a temp file and a rename, and the pointer
//! is only repointed after its record is on disk. Record hashes are SHA-256
//! over canonical JSON (object keys sorted recursively), so map ordering
//! never causes a false integrity failure.

use crate::error::CheckpointError;
use crate::persistence::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File stem of the per-research pointer record.
pub const LATEST_POINTER: &str = "latest";
/// Name of the manifest entry inside an export archive.
pub const MANIFEST_NAME: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStage {
    /// Written on entry to a phase.
    Started,
    /// Written after a phase's output was recorded.
    Completed,
    /// Intermediate progress within a long phase.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub stage: CheckpointStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_interviews: Option<usize>,
}

impl CheckpointMetadata {
    pub fn started() -> Self {
        Self {
            stage: CheckpointStage::Started,
            completed_interviews: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            stage: CheckpointStage::Completed,
            completed_interviews: None,
        }
    }

    pub fn partial(completed_interviews: usize) -> Self {
        Self {
            stage: CheckpointStage::Partial,
            completed_interviews: Some(completed_interviews),
        }
    }
}

/// The persisted envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub research_id: String,
    pub phase: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub hash: String,
    pub metadata: CheckpointMetadata,
}

impl CheckpointRecord {
    /// Deserialize the snapshot.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, CheckpointError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Recompute the content hash and compare it with the stored one.
    pub fn verify(&self) -> Result<(), CheckpointError> {
        let actual = content_hash(&self.data)?;
        if actual != self.hash {
            return Err(CheckpointError::Integrity {
                research_id: self.research_id.clone(),
                phase: self.phase.clone(),
                expected: self.hash.clone(),
                actual,
            });
        }
        Ok(())
    }

    fn info(&self) -> CheckpointInfo {
        CheckpointInfo {
            research_id: self.research_id.clone(),
            phase: self.phase.clone(),
            timestamp: self.timestamp,
            hash: self.hash.clone(),
            stage: self.metadata.stage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LatestPointer {
    research_id: String,
    phase: String,
    timestamp: DateTime<Utc>,
    hash: String,
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub research_id: String,
    pub phase: String,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    pub stage: CheckpointStage,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    research_id: String,
    exported_at: DateTime<Utc>,
    entries: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    phase: String,
    file: String,
    hash: String,
}

/// Recursively sort object keys.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// SHA-256 hex digest of the canonical JSON encoding of `value`.
pub fn content_hash(value: &Value) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(&canonicalize(value))?;
    Ok(hex_sha256(&bytes))
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn validate_key(key: &str) -> Result<(), CheckpointError> {
    let valid = !key.is_empty()
        && key != LATEST_POINTER
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidKey {
            key: key.to_string(),
        })
    }
}

fn archive_error(path: &Path, err: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Archive {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Filesystem checkpoint store.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    root: PathBuf,
}

impl CheckpointManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn research_dir(&self, research_id: &str) -> PathBuf {
        self.root.join(research_id)
    }

    fn record_path(&self, research_id: &str, phase: &str) -> PathBuf {
        self.research_dir(research_id).join(format!("{phase}.json"))
    }

    fn pointer_path(&self, research_id: &str) -> PathBuf {
        self.research_dir(research_id)
            .join(format!("{LATEST_POINTER}.json"))
    }

    /// Hash and persist `data` for (research, phase), then repoint `latest`.
    pub fn save<T: Serialize + ?Sized>(
        &self,
        research_id: &str,
        phase: &str,
        data: &T,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointRecord, CheckpointError> {
        validate_key(research_id)?;
        validate_key(phase)?;

        let data = serde_json::to_value(data)?;
        let hash = content_hash(&data)?;
        let record = CheckpointRecord {
            research_id: research_id.to_string(),
            phase: phase.to_string(),
            timestamp: Utc::now(),
            data,
            hash,
            metadata,
        };
        self.write_record(&record)?;
        debug!(
            research_id,
            phase,
            stage = ?record.metadata.stage,
            hash = %record.hash,
            "Checkpoint saved"
        );
        Ok(record)
    }

    fn write_record(&self, record: &CheckpointRecord) -> Result<(), CheckpointError> {
        write_json_atomic(&self.record_path(&record.research_id, &record.phase), record)?;
        self.write_pointer(record)
    }

    fn write_pointer(&self, record: &CheckpointRecord) -> Result<(), CheckpointError> {
        let pointer = LatestPointer {
            research_id: record.research_id.clone(),
            phase: record.phase.clone(),
            timestamp: record.timestamp,
            hash: record.hash.clone(),
        };
        write_json_atomic(&self.pointer_path(&record.research_id), &pointer)?;
        Ok(())
    }

    /// Load and verify a record. Without a phase, the `latest` pointer decides.
    pub fn load(
        &self,
        research_id: &str,
        phase: Option<&str>,
    ) -> Result<CheckpointRecord, CheckpointError> {
        validate_key(research_id)?;
        let (phase, pointer_hash) = match phase {
            Some(phase) => {
                validate_key(phase)?;
                (phase.to_string(), None)
            }
            None => {
                let pointer: LatestPointer = read_json(&self.pointer_path(research_id))?
                    .ok_or_else(|| CheckpointError::NotFound {
                        research_id: research_id.to_string(),
                        phase: None,
                    })?;
                (pointer.phase, Some(pointer.hash))
            }
        };

        let record: CheckpointRecord = read_json(&self.record_path(research_id, &phase))?
            .ok_or_else(|| CheckpointError::NotFound {
                research_id: research_id.to_string(),
                phase: Some(phase.clone()),
            })?;
        record.verify()?;

        if let Some(pointer_hash) = pointer_hash
            && pointer_hash != record.hash
        {
            // The record was rewritten after the pointer; the record is self-consistent.
            warn!(
                research_id,
                phase = %record.phase,
                "Latest pointer is behind its record"
            );
        }
        Ok(record)
    }

    /// Load and deserialize the snapshot.
    pub fn load_data<T: DeserializeOwned>(
        &self,
        research_id: &str,
        phase: Option<&str>,
    ) -> Result<T, CheckpointError> {
        self.load(research_id, phase)?.data_as()
    }

    /// Enumerate checkpoints newest-first, optionally for one research.
    pub fn list(&self, research_id: Option<&str>) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let ids = match research_id {
            Some(id) => {
                validate_key(id)?;
                vec![id.to_string()]
            }
            None => self.research_ids()?,
        };

        let mut infos = Vec::new();
        for id in ids {
            let dir = self.research_dir(&id);
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                let Some(stem) = record_stem(&path) else {
                    continue;
                };
                if stem == LATEST_POINTER {
                    continue;
                }
                match read_json::<CheckpointRecord>(&path) {
                    Ok(Some(record)) => infos.push(record.info()),
                    Ok(None) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
                }
            }
        }
        infos.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.research_id.cmp(&b.research_id))
                .then_with(|| a.phase.cmp(&b.phase))
        });
        Ok(infos)
    }

    fn research_ids(&self) -> Result<Vec<String>, CheckpointError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(ids)
    }

    /// Remove every checkpoint of a research. Returns the number of records removed.
    pub fn delete(&self, research_id: &str) -> Result<usize, CheckpointError> {
        let removed = self.list(Some(research_id))?.len();
        let dir = self.research_dir(research_id);
        if !dir.is_dir() {
            return Err(CheckpointError::NotFound {
                research_id: research_id.to_string(),
                phase: None,
            });
        }
        fs::remove_dir_all(&dir)?;
        info!(research_id, removed, "Checkpoints deleted");
        Ok(removed)
    }

    /// Bundle every record of a research into a zip archive with a manifest.
    pub fn export(&self, research_id: &str, archive_path: &Path) -> Result<usize, CheckpointError> {
        let infos = self.list(Some(research_id))?;
        if infos.is_empty() {
            return Err(CheckpointError::NotFound {
                research_id: research_id.to_string(),
                phase: None,
            });
        }

        if let Some(parent) = archive_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(archive_path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let mut entries = Vec::with_capacity(infos.len());
        for info in &infos {
            let record = self.load(research_id, Some(info.phase.as_str()))?;
            let name = format!("{}.json", record.phase);
            let bytes = serde_json::to_vec_pretty(&record)?;
            zip.start_file(name.as_str(), options)
                .map_err(|e| archive_error(archive_path, e))?;
            zip.write_all(&bytes)?;
            entries.push(ManifestEntry {
                phase: record.phase,
                file: name,
                hash: record.hash,
            });
        }

        let manifest = Manifest {
            research_id: research_id.to_string(),
            exported_at: Utc::now(),
            entries,
        };
        zip.start_file(MANIFEST_NAME, options)
            .map_err(|e| archive_error(archive_path, e))?;
        zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
        zip.finish().map_err(|e| archive_error(archive_path, e))?;

        info!(research_id, records = manifest.entries.len(), path = %archive_path.display(), "Checkpoints exported");
        Ok(manifest.entries.len())
    }

    /// Verify and replay an exported archive into this store.
    /// Returns the imported research id.
    pub fn import(&self, archive_path: &Path) -> Result<String, CheckpointError> {
        let file = File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| archive_error(archive_path, e))?;

        let manifest: Manifest = {
            let mut entry = archive
                .by_name(MANIFEST_NAME)
                .map_err(|e| archive_error(archive_path, e))?;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            serde_json::from_slice(&buf)?
        };
        validate_key(&manifest.research_id)?;

        let mut records = Vec::with_capacity(manifest.entries.len());
        for entry in &manifest.entries {
            let record: CheckpointRecord = {
                let mut file = archive
                    .by_name(&entry.file)
                    .map_err(|e| archive_error(archive_path, e))?;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                serde_json::from_slice(&buf)?
            };
            validate_key(&record.phase)?;
            if record.research_id != manifest.research_id {
                return Err(archive_error(
                    archive_path,
                    format!(
                        "record {} belongs to research {}, manifest says {}",
                        entry.file, record.research_id, manifest.research_id
                    ),
                ));
            }
            record.verify()?;
            if record.hash != entry.hash {
                return Err(CheckpointError::Integrity {
                    research_id: record.research_id,
                    phase: record.phase,
                    expected: entry.hash.clone(),
                    actual: record.hash,
                });
            }
            records.push(record);
        }

        let Some(newest) = records.iter().max_by_key(|r| r.timestamp).cloned() else {
            return Err(archive_error(archive_path, "archive contains no records"));
        };
        for record in &records {
            write_json_atomic(&self.record_path(&record.research_id, &record.phase), record)?;
        }
        self.write_pointer(&newest)?;

        info!(
            research_id = %manifest.research_id,
            records = records.len(),
            "Checkpoints imported"
        );
        Ok(manifest.research_id)
    }
}

fn record_stem(path: &Path) -> Option<&str> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    (!stem.starts_with('.')).then_some(stem)
}
