//! Content-addressed file store.
//!
//! Uploads are streamed into a shared staging directory and named by their
//! BLAKE3 hash once the whole stream has been read. Saving a post later
//! commits each referenced blob into the owner's file directory with a
//! rename, so a blob is either fully present under its hash or absent.
//!
//! Nothing is ever removed. Committed blobs outlive the posts that
//! reference them, and staged blobs stay put until a commit moves them:
//! uploads no post references, and uploads of a hash the owner already has,
//! remain in staging indefinitely.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

const STAGE_PREFIX: &str = ".stage-";
const COMMIT_PREFIX: &str = ".commit-";
const READ_CHUNK: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// ContentHash
// ---------------------------------------------------------------------------

/// Lowercase hex BLAKE3 digest. Always exactly 64 characters, so it is safe
/// to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |why: &str| StoreError::validation(format!("invalid content hash {s:?}: {why}"));

        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(invalid("must be lowercase hex"));
        }
        let bytes = hex::decode(s).map_err(|e| invalid(&e.to_string()))?;
        if bytes.len() != blake3::OUT_LEN {
            return Err(invalid("wrong length"));
        }
        Ok(Self(s.to_string()))
    }

    /// Hash a byte slice directly.
    pub fn of(data: &[u8]) -> Self {
        blake3::hash(data).into()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<blake3::Hash> for ContentHash {
    fn from(hash: blake3::Hash) -> Self {
        Self(hash.to_hex().to_string())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Result of staging an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBlob {
    pub hash: ContentHash,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    staging_dir: PathBuf,
    max_file_size: u64,
}

impl FileStore {
    pub fn new(staging_dir: PathBuf, max_file_size: u64) -> Result<Self> {
        fs::create_dir_all(&staging_dir)?;

        info!(path = %staging_dir.display(), "File staging area initialized");

        Ok(Self {
            staging_dir,
            max_file_size,
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Stream `reader` into the staging area and return its content hash.
    ///
    /// Staging identical content twice yields the same hash and a single
    /// staged blob. On any error nothing is left in the staging area.
    pub fn stage<R: Read>(&self, mut reader: R) -> Result<StagedBlob> {
        let mut tmp = tempfile::Builder::new()
            .prefix(STAGE_PREFIX)
            .tempfile_in(&self.staging_dir)?;

        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; READ_CHUNK];
        let mut size: u64 = 0;

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            size += n as u64;
            if size > self.max_file_size {
                return Err(StoreError::FileTooLarge {
                    size,
                    max: self.max_file_size,
                });
            }
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])?;
        }
        tmp.as_file().sync_all()?;

        let hash = ContentHash::from(hasher.finalize());
        let dest = self.staged_path(&hash);

        if dest.exists() {
            debug!(hash = %hash, size, "Upload already staged");
            return Ok(StagedBlob { hash, size });
        }

        if let Err(e) = tmp.persist_noclobber(&dest) {
            // Another upload of the same bytes got there first.
            if !dest.exists() {
                return Err(e.error.into());
            }
        }

        debug!(hash = %hash, size, "Staged upload");
        Ok(StagedBlob { hash, size })
    }

    /// Move a staged blob into `owner_dir`, named by its hash.
    ///
    /// Committing a hash the owner already has is a no-op. Returns the size
    /// of the committed blob. On failure the staged copy is left in place.
    pub fn commit(&self, hash: &ContentHash, owner_dir: &Path) -> Result<u64> {
        fs::create_dir_all(owner_dir)?;

        let dest = Self::committed_path(hash, owner_dir);
        if let Some(size) = existing_size(&dest)? {
            debug!(hash = %hash, dest = %dest.display(), "Blob already committed");
            return Ok(size);
        }

        let src = self.staged_path(hash);
        let size = match existing_size(&src)? {
            Some(size) => size,
            None => {
                // A concurrent commit may have just moved it.
                return existing_size(&dest)?
                    .ok_or_else(|| StoreError::not_found(format!("staged file {hash}")));
            }
        };

        match fs::rename(&src, &dest) {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) => {
                debug!(hash = %hash, "Cross-device commit, falling back to copy");
                copy_into(&src, owner_dir, &dest)?;
                if let Err(e) = fs::remove_file(&src) {
                    warn!(hash = %hash, error = %e, "Failed to remove staged copy after commit");
                }
            }
            Err(e) => {
                if let Some(size) = existing_size(&dest)? {
                    return Ok(size);
                }
                return Err(e.into());
            }
        }

        debug!(hash = %hash, size, dest = %dest.display(), "Committed blob");
        Ok(size)
    }

    pub fn staged_path(&self, hash: &ContentHash) -> PathBuf {
        self.staging_dir.join(hash.as_str())
    }

    pub fn is_staged(&self, hash: &ContentHash) -> bool {
        self.staged_path(hash).is_file()
    }

    pub fn committed_path(hash: &ContentHash, owner_dir: &Path) -> PathBuf {
        owner_dir.join(hash.as_str())
    }

    pub fn is_committed(hash: &ContentHash, owner_dir: &Path) -> bool {
        Self::committed_path(hash, owner_dir).is_file()
    }

    /// Open a committed blob for reading.
    pub fn open_committed(hash: &ContentHash, owner_dir: &Path) -> Result<fs::File> {
        fs::File::open(Self::committed_path(hash, owner_dir)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::not_found(format!("file {hash}"))
            } else {
                StoreError::Io(e)
            }
        })
    }

    /// Hashes currently waiting in the staging area.
    pub fn staged_hashes(&self) -> Result<Vec<ContentHash>> {
        let mut hashes = Vec::new();
        for entry in fs::read_dir(&self.staging_dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(hash) = ContentHash::parse(name) {
                    hashes.push(hash);
                }
            }
        }
        hashes.sort();
        Ok(hashes)
    }
}

fn existing_size(path: &Path) -> Result<Option<u64>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// Copy through a temp file in the destination directory so the final
// rename stays on one device.
fn copy_into(src: &Path, dir: &Path, dest: &Path) -> io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(COMMIT_PREFIX)
        .tempfile_in(dir)?;
    let mut reader = fs::File::open(src)?;
    io::copy(&mut reader, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_err: &io::Error) -> bool {
    false
}
