//! Content-addressed blob storage with BLAKE3 hashing
//!
//! Holds the full text of every ingested item so a workspace can be
//! re-chunked and re-embedded after a restart.

use crate::error::{AmemError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Extension of zstd-compressed blobs
const COMPRESSED_EXT: &str = "zst";

/// Outcome of a blob write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobWrite {
    /// 32 hex character BLAKE3 hash of the uncompressed content
    pub hash: String,
    /// Whether the blob is stored zstd-compressed
    pub compressed: bool,
    /// False when identical content was already stored
    pub is_new: bool,
}

/// Content-addressed blob storage
pub struct BlobStore {
    base_path: PathBuf,
    compression_threshold: usize,
}

impl BlobStore {
    /// Create a new blob store at the given base path
    pub fn new(base_path: PathBuf, compression_threshold: usize) -> Result<Self> {
        let blobs_dir = base_path.join("blobs");
        fs::create_dir_all(&blobs_dir).map_err(|e| AmemError::Io {
            source: e,
            context: format!("Failed to create blobs directory: {}", blobs_dir.display()),
        })?;

        Ok(Self {
            base_path,
            compression_threshold,
        })
    }

    /// BLAKE3 hash used as the blob key
    pub fn hash_data(data: &[u8]) -> String {
        let hash = blake3::hash(data);
        format!("{:.32}", hash.to_hex())
    }

    /// Write data to blob storage
    pub fn write(&self, data: &[u8]) -> Result<BlobWrite> {
        let hash = Self::hash_data(data);

        if let Some(existing) = self.locate(&hash) {
            return Ok(BlobWrite {
                compressed: is_compressed(&existing),
                hash,
                is_new: false,
            });
        }

        let compress = data.len() >= self.compression_threshold;
        let final_path = if compress {
            self.blob_path(&hash).with_extension(COMPRESSED_EXT)
        } else {
            self.blob_path(&hash)
        };

        let parent = final_path
            .parent()
            .ok_or_else(|| AmemError::Config("Invalid blob path".to_string()))?;
        fs::create_dir_all(parent).map_err(|e| AmemError::Io {
            source: e,
            context: format!("Failed to create blob directory: {}", parent.display()),
        })?;

        let payload = if compress {
            zstd::encode_all(data, 3).map_err(|e| AmemError::Io {
                source: e,
                context: "Failed to compress blob data".to_string(),
            })?
        } else {
            data.to_vec()
        };

        // Write to a temp file, then rename into place
        let temp_path = parent.join(format!("{}.tmp", hash));
        let mut file = fs::File::create(&temp_path).map_err(|e| AmemError::Io {
            source: e,
            context: format!("Failed to create temp blob file: {}", temp_path.display()),
        })?;
        file.write_all(&payload).map_err(|e| AmemError::Io {
            source: e,
            context: format!("Failed to write blob data: {}", temp_path.display()),
        })?;
        file.sync_all().map_err(|e| AmemError::Io {
            source: e,
            context: format!("Failed to sync blob file: {}", temp_path.display()),
        })?;
        drop(file);

        fs::rename(&temp_path, &final_path).map_err(|e| AmemError::Io {
            source: e,
            context: format!(
                "Failed to move blob into place: {} -> {}",
                temp_path.display(),
                final_path.display()
            ),
        })?;

        tracing::debug!(
            "Stored blob {} ({} bytes, compressed: {})",
            hash,
            data.len(),
            compress
        );

        Ok(BlobWrite {
            hash,
            compressed: compress,
            is_new: true,
        })
    }

    /// Read data from blob storage
    pub fn read(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self
            .locate(hash)
            .ok_or_else(|| AmemError::not_found("blob", hash))?;

        let data = fs::read(&path).map_err(|e| AmemError::Io {
            source: e,
            context: format!("Failed to read blob: {}", path.display()),
        })?;

        if is_compressed(&path) {
            zstd::decode_all(&data[..]).map_err(|e| AmemError::Io {
                source: e,
                context: format!("Failed to decompress blob: {}", path.display()),
            })
        } else {
            Ok(data)
        }
    }

    /// Check if a blob exists
    pub fn exists(&self, hash: &str) -> bool {
        self.locate(hash).is_some()
    }

    /// Size of the blob on disk
    pub fn size(&self, hash: &str) -> Result<u64> {
        let path = self
            .locate(hash)
            .ok_or_else(|| AmemError::not_found("blob", hash))?;
        let metadata = fs::metadata(&path).map_err(|e| AmemError::Io {
            source: e,
            context: format!("Failed to get blob metadata: {}", path.display()),
        })?;
        Ok(metadata.len())
    }

    /// Stored path of a blob, compressed or not
    fn locate(&self, hash: &str) -> Option<PathBuf> {
        if hash.len() < 4 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let plain = self.blob_path(hash);
        let compressed = plain.with_extension(COMPRESSED_EXT);
        [plain, compressed].into_iter().find(|p| p.is_file())
    }

    /// Two-level sharding: blobs/ab/cd/abcdef123456...
    fn blob_path(&self, hash: &str) -> PathBuf {
        self.base_path
            .join("blobs")
            .join(&hash[0..2])
            .join(&hash[2..4])
            .join(hash)
    }
}

fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == COMPRESSED_EXT)
}
