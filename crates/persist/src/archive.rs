//! In-memory node archive with an optional on-disk image.
//!
//! Layout of a saved archive directory:
//! ```text
//! nodes.cbor.zst   - every record, CBOR encoded then zstd compressed
//! manifest.json    - schema version, record count, SHA-256 of nodes.cbor.zst
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use spatial_common::{Coord, SimTime};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const ARCHIVE_SCHEMA_VERSION: u32 = 1;

const NODES_FILE: &str = "nodes.cbor.zst";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed for {what}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        what: String,
        expected: String,
        actual: String,
    },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
}

/// One archived payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub coord: Coord,
    /// `network_version` of the node when it was stored.
    pub version: u32,
    pub saved_at: SimTime,
    /// Hex SHA-256 of `payload`.
    pub sha256: String,
    /// zstd-compressed CBOR of the node payload.
    pub payload: Vec<u8>,
}

/// Contents of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub schema_version: u32,
    pub record_count: usize,
    pub sha256: String,
}

/// Thread-safe store of node payloads keyed by coordinate.
///
/// Load and unload processors run one worker per level, so all access goes
/// through `&self`.
#[derive(Debug, Default)]
pub struct NodeArchive {
    records: Mutex<HashMap<Coord, ArchiveRecord>>,
}

impl NodeArchive {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<Coord, ArchiveRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn contains(&self, coord: Coord) -> bool {
        self.records().contains_key(&coord)
    }

    pub fn version_of(&self, coord: Coord) -> Option<u32> {
        self.records().get(&coord).map(|r| r.version)
    }

    pub fn remove(&self, coord: Coord) -> Option<ArchiveRecord> {
        self.records().remove(&coord)
    }

    /// Archived coordinates, sorted by level then position.
    pub fn coords(&self) -> Vec<Coord> {
        let mut coords: Vec<Coord> = self.records().keys().copied().collect();
        coords.sort_unstable_by_key(|c| (c.level, c.pos.x, c.pos.y, c.pos.z));
        coords
    }

    /// Store `payload` for `coord`. Returns `false` without storing when
    /// the archive already holds a newer version.
    pub fn store<N: Serialize>(
        &self,
        coord: Coord,
        version: u32,
        saved_at: SimTime,
        payload: &N,
    ) -> Result<bool, ArchiveError> {
        if self.version_of(coord).is_some_and(|v| v > version) {
            tracing::trace!(%coord, version, "archive holds newer payload, store skipped");
            return Ok(false);
        }
        let compressed = zstd_compress(&cbor_serialize(payload)?)?;
        let record = ArchiveRecord {
            coord,
            version,
            saved_at,
            sha256: sha256_hex(&compressed),
            payload: compressed,
        };
        let mut records = self.records();
        if records.get(&coord).is_some_and(|r| r.version > version) {
            return Ok(false);
        }
        records.insert(coord, record);
        Ok(true)
    }

    /// Decode the payload stored for `coord` if its version is at least
    /// `min_version`. Returns the stored version with the payload.
    pub fn restore<N: DeserializeOwned>(
        &self,
        coord: Coord,
        min_version: u32,
    ) -> Result<Option<(u32, N)>, ArchiveError> {
        let Some(record) = self.records().get(&coord).cloned() else {
            return Ok(None);
        };
        if record.version < min_version {
            tracing::trace!(%coord, stored = record.version, min_version, "stale archive record");
            return Ok(None);
        }
        verify(&format!("node {coord}"), &record.sha256, &record.payload)?;
        let payload = cbor_deserialize(&zstd_decompress(&record.payload)?)?;
        Ok(Some((record.version, payload)))
    }

    /// Write every record to `dir`, creating it if needed.
    pub fn save_to_dir(&self, dir: &Path) -> Result<ArchiveManifest, ArchiveError> {
        std::fs::create_dir_all(dir)?;
        let mut records: Vec<ArchiveRecord> = self.records().values().cloned().collect();
        records.sort_unstable_by_key(|r| (r.coord.level, r.coord.pos.x, r.coord.pos.y, r.coord.pos.z));

        let compressed = zstd_compress(&cbor_serialize(&records)?)?;
        let manifest = ArchiveManifest {
            schema_version: ARCHIVE_SCHEMA_VERSION,
            record_count: records.len(),
            sha256: sha256_hex(&compressed),
        };
        std::fs::write(dir.join(NODES_FILE), &compressed)?;
        serde_json::to_writer_pretty(std::fs::File::create(dir.join(MANIFEST_FILE))?, &manifest)?;
        tracing::debug!(dir = %dir.display(), records = records.len(), "archive saved");
        Ok(manifest)
    }

    /// Read an archive written by [`NodeArchive::save_to_dir`]. Fails closed
    /// on a schema or hash mismatch.
    pub fn open_dir(dir: &Path) -> Result<Self, ArchiveError> {
        let manifest: ArchiveManifest =
            serde_json::from_reader(std::fs::File::open(dir.join(MANIFEST_FILE))?)?;
        if manifest.schema_version != ARCHIVE_SCHEMA_VERSION {
            return Err(ArchiveError::SchemaMismatch {
                file_version: manifest.schema_version,
                expected_version: ARCHIVE_SCHEMA_VERSION,
            });
        }
        let compressed = std::fs::read(dir.join(NODES_FILE))?;
        verify(NODES_FILE, &manifest.sha256, &compressed)?;
        let records: Vec<ArchiveRecord> = cbor_deserialize(&zstd_decompress(&compressed)?)?;
        tracing::debug!(dir = %dir.display(), records = records.len(), "archive opened");
        Ok(Self {
            records: Mutex::new(records.into_iter().map(|r| (r.coord, r)).collect()),
        })
    }
}

fn verify(what: &str, expected: &str, data: &[u8]) -> Result<(), ArchiveError> {
    let actual = sha256_hex(data);
    if actual != expected {
        return Err(ArchiveError::IntegrityMismatch {
            what: what.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ArchiveError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| ArchiveError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, ArchiveError> {
    ciborium::from_reader(data).map_err(|e| ArchiveError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_restore() {
        let archive = NodeArchive::new();
        let coord = Coord::from_xyz(1, -2, 3, 0);
        assert!(archive.store(coord, 2, SimTime::ZERO, &vec![1u32, 2, 3]).unwrap());
        assert_eq!(archive.len(), 1);

        let (version, payload): (u32, Vec<u32>) = archive.restore(coord, 0).unwrap().unwrap();
        assert_eq!(version, 2);
        assert_eq!(payload, vec![1, 2, 3]);
        assert!(archive.restore::<Vec<u32>>(Coord::default(), 0).unwrap().is_none());
    }

    #[test]
    fn older_version_never_replaces_newer() {
        let archive = NodeArchive::new();
        let coord = Coord::default();
        archive.store(coord, 5, SimTime::ZERO, &"new").unwrap();
        assert!(!archive.store(coord, 3, SimTime::ZERO, &"old").unwrap());
        let (_, payload): (u32, String) = archive.restore(coord, 0).unwrap().unwrap();
        assert_eq!(payload, "new");
    }

    #[test]
    fn stale_record_is_not_restored() {
        let archive = NodeArchive::new();
        let coord = Coord::default();
        archive.store(coord, 1, SimTime::ZERO, &7u8).unwrap();
        assert!(archive.restore::<u8>(coord, 2).unwrap().is_none());
        assert!(archive.restore::<u8>(coord, 1).unwrap().is_some());
    }

    #[test]
    fn corrupted_payload_fails_closed() {
        let archive = NodeArchive::new();
        let coord = Coord::default();
        archive.store(coord, 1, SimTime::ZERO, &7u8).unwrap();
        if let Some(record) = archive.records().get_mut(&coord) {
            if let Some(byte) = record.payload.last_mut() {
                *byte ^= 0xff;
            }
        }
        assert!(matches!(
            archive.restore::<u8>(coord, 0),
            Err(ArchiveError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn directory_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("archive");
        let archive = NodeArchive::new();
        archive.store(Coord::from_xyz(0, 0, 0, 1), 1, SimTime::ZERO, &10u64).unwrap();
        archive.store(Coord::default(), 4, SimTime::from_micros(9), &20u64).unwrap();
        let manifest = archive.save_to_dir(&dir).unwrap();
        assert_eq!(manifest.record_count, 2);

        let reopened = NodeArchive::open_dir(&dir).unwrap();
        assert_eq!(reopened.coords(), archive.coords());
        assert_eq!(reopened.version_of(Coord::default()), Some(4));
        let (_, v): (u32, u64) = reopened.restore(Coord::default(), 0).unwrap().unwrap();
        assert_eq!(v, 20);
    }

    #[test]
    fn tampered_image_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("archive");
        let archive = NodeArchive::new();
        archive.store(Coord::default(), 1, SimTime::ZERO, &1u8).unwrap();
        archive.save_to_dir(&dir).unwrap();

        let path = dir.join(NODES_FILE);
        let mut data = std::fs::read(&path).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(&path, &data).unwrap();
        assert!(matches!(
            NodeArchive::open_dir(&dir),
            Err(ArchiveError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn schema_mismatch_fails_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("archive");
        NodeArchive::new().save_to_dir(&dir).unwrap();
        let manifest_path = dir.join(MANIFEST_FILE);
        let mut manifest: ArchiveManifest =
            serde_json::from_reader(std::fs::File::open(&manifest_path).unwrap()).unwrap();
        manifest.schema_version = 999;
        serde_json::to_writer_pretty(std::fs::File::create(&manifest_path).unwrap(), &manifest)
            .unwrap();

        match NodeArchive::open_dir(&dir) {
            Err(ArchiveError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 999);
                assert_eq!(expected_version, ARCHIVE_SCHEMA_VERSION);
            }
            other => panic!("expected SchemaMismatch, got: {other:?}"),
        }
    }
}
