//! # Payment Proof Storage
//!
//! The buyer uploads a receipt image or PDF; storage keeps the bytes and
//! hands back a [`ProofRef`] the transaction records. Files are named
//! `proof_<transaction uuid>_<random uuid>.<ext>` so uploads never collide
//! and never reuse a client-supplied name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use istyle_core::{ProofRef, TransactionId};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::ProofStorageError;

/// Largest accepted upload.
pub const MAX_PROOF_BYTES: usize = 10 * 1024 * 1024;

/// Accepted proof file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProofFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Pdf,
}

impl ProofFormat {
    /// Resolve a file extension (`png`, `jpg`, `jpeg`, ...), case-insensitive.
    pub fn from_extension(ext: &str) -> Result<Self, ProofStorageError> {
        match ext.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "gif" => Ok(Self::Gif),
            "webp" => Ok(Self::Webp),
            "pdf" => Ok(Self::Pdf),
            _ => Err(ProofStorageError::UnsupportedType(ext.to_string())),
        }
    }

    /// Resolve a MIME type, ignoring parameters such as `; charset=`.
    pub fn from_content_type(content_type: &str) -> Result<Self, ProofStorageError> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "image/png" => Ok(Self::Png),
            "image/jpeg" | "image/jpg" => Ok(Self::Jpeg),
            "image/gif" => Ok(Self::Gif),
            "image/webp" => Ok(Self::Webp),
            "application/pdf" => Ok(Self::Pdf),
            _ => Err(ProofStorageError::UnsupportedType(content_type.to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Pdf => "pdf",
        }
    }

    /// The format encoded in a reference's file extension.
    pub fn of_reference(proof: &ProofRef) -> Result<Self, ProofStorageError> {
        let ext = proof
            .as_str()
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .ok_or_else(|| ProofStorageError::UnsupportedType(proof.as_str().to_string()))?;
        Self::from_extension(ext)
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Pdf => "application/pdf",
        }
    }
}

/// Stores payment proof artifacts.
pub trait ProofStorage: Send + Sync {
    /// Persist `bytes` for `transaction` and return the reference to record.
    fn store(
        &self,
        transaction: TransactionId,
        format: ProofFormat,
        bytes: &[u8],
    ) -> Result<ProofRef, ProofStorageError>;

    /// The stored bytes, or `None` when this storage holds nothing under
    /// `proof`.
    fn load(&self, proof: &ProofRef) -> Result<Option<Vec<u8>>, ProofStorageError>;

    /// Delete a stored proof. Removing an absent proof is not an error.
    fn remove(&self, proof: &ProofRef) -> Result<(), ProofStorageError>;
}

/// Remove a stored proof that no committed transaction references. A
/// failure is logged, not returned: the caller is already reporting the
/// error that made the proof unreferenced.
pub fn discard_proof(storage: &dyn ProofStorage, proof: &ProofRef) {
    match storage.remove(proof) {
        Ok(()) => tracing::debug!(proof = %proof.as_str(), "discarded unreferenced payment proof"),
        Err(err) => tracing::warn!(
            proof = %proof.as_str(),
            error = %err,
            "failed to discard unreferenced payment proof"
        ),
    }
}

fn check_upload(bytes: &[u8]) -> Result<(), ProofStorageError> {
    if bytes.is_empty() {
        return Err(ProofStorageError::Empty);
    }
    if bytes.len() > MAX_PROOF_BYTES {
        return Err(ProofStorageError::TooLarge {
            max: MAX_PROOF_BYTES,
        });
    }
    Ok(())
}

fn file_name(transaction: TransactionId, format: ProofFormat) -> String {
    format!(
        "proof_{}_{}.{}",
        transaction.as_uuid().simple(),
        Uuid::new_v4().simple(),
        format.extension()
    )
}

// -- Local filesystem ---------------------------------------------------------

/// Writes proofs into a directory served under `/uploads/`.
#[derive(Debug, Clone)]
pub struct LocalProofStorage {
    dir: PathBuf,
}

impl LocalProofStorage {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ProofStorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Filesystem path of a reference this storage issued.
    pub fn resolve(&self, proof: &ProofRef) -> Option<PathBuf> {
        let name = proof.as_str().strip_prefix("/uploads/")?;
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        Some(self.dir.join(name))
    }
}

impl ProofStorage for LocalProofStorage {
    fn store(
        &self,
        transaction: TransactionId,
        format: ProofFormat,
        bytes: &[u8],
    ) -> Result<ProofRef, ProofStorageError> {
        check_upload(bytes)?;
        let name = file_name(transaction, format);
        std::fs::write(self.dir.join(&name), bytes)?;
        tracing::debug!(%transaction, file = %name, size = bytes.len(), "stored payment proof");
        Ok(ProofRef::new(format!("/uploads/{name}"))?)
    }

    fn load(&self, proof: &ProofRef) -> Result<Option<Vec<u8>>, ProofStorageError> {
        let Some(path) = self.resolve(proof) else {
            return Ok(None);
        };
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn remove(&self, proof: &ProofRef) -> Result<(), ProofStorageError> {
        let Some(path) = self.resolve(proof) else {
            return Ok(());
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(file = %path.display(), "removed payment proof");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

// -- In memory ----------------------------------------------------------------

/// Keeps proofs in memory. For tests and the CLI replay.
#[derive(Debug, Clone, Default)]
pub struct MemoryProofStorage {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryProofStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, proof: &ProofRef) -> Option<Vec<u8>> {
        self.files.read().get(proof.as_str()).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProofStorage for MemoryProofStorage {
    fn store(
        &self,
        transaction: TransactionId,
        format: ProofFormat,
        bytes: &[u8],
    ) -> Result<ProofRef, ProofStorageError> {
        check_upload(bytes)?;
        let reference = format!("memory://{}", file_name(transaction, format));
        self.files.write().insert(reference.clone(), bytes.to_vec());
        Ok(ProofRef::new(reference)?)
    }

    fn load(&self, proof: &ProofRef) -> Result<Option<Vec<u8>>, ProofStorageError> {
        Ok(self.get(proof))
    }

    fn remove(&self, proof: &ProofRef) -> Result<(), ProofStorageError> {
        self.files.write().remove(proof.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_from_extension_and_mime() {
        assert_eq!(ProofFormat::from_extension("JPEG").unwrap(), ProofFormat::Jpeg);
        assert_eq!(ProofFormat::from_extension(".webp").unwrap(), ProofFormat::Webp);
        assert_eq!(
            ProofFormat::from_content_type("application/pdf; name=x").unwrap(),
            ProofFormat::Pdf
        );
        assert!(matches!(
            ProofFormat::from_extension("exe"),
            Err(ProofStorageError::UnsupportedType(_))
        ));
        assert!(ProofFormat::from_content_type("text/html").is_err());
    }

    #[test]
    fn memory_storage_keeps_bytes() {
        let storage = MemoryProofStorage::new();
        let tx = TransactionId::new();
        let proof = storage.store(tx, ProofFormat::Png, b"\x89PNG").unwrap();
        assert!(proof.as_str().starts_with("memory://proof_"));
        assert!(proof.as_str().ends_with(".png"));
        assert!(proof.as_str().contains(&tx.as_uuid().simple().to_string()));
        assert_eq!(storage.get(&proof).unwrap(), b"\x89PNG".to_vec());
    }

    #[test]
    fn empty_and_oversized_uploads_rejected() {
        let storage = MemoryProofStorage::new();
        assert!(matches!(
            storage.store(TransactionId::new(), ProofFormat::Pdf, &[]),
            Err(ProofStorageError::Empty)
        ));
        let big = vec![0u8; MAX_PROOF_BYTES + 1];
        assert!(matches!(
            storage.store(TransactionId::new(), ProofFormat::Pdf, &big),
            Err(ProofStorageError::TooLarge { .. })
        ));
        assert!(storage.is_empty());
    }

    #[test]
    fn each_upload_gets_a_fresh_name() {
        let storage = MemoryProofStorage::new();
        let tx = TransactionId::new();
        let a = storage.store(tx, ProofFormat::Gif, b"a").unwrap();
        let b = storage.store(tx, ProofFormat::Gif, b"b").unwrap();
        assert_ne!(a, b);
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn remove_forgets_the_upload() {
        let storage = MemoryProofStorage::new();
        let proof = storage.store(TransactionId::new(), ProofFormat::Webp, b"riff").unwrap();
        assert_eq!(ProofFormat::of_reference(&proof).unwrap(), ProofFormat::Webp);
        storage.remove(&proof).unwrap();
        assert!(storage.load(&proof).unwrap().is_none());
        storage.remove(&proof).unwrap();
        assert!(storage.is_empty());
    }
}
