//! Local filesystem proof storage.

use istyle_core::{ProofRef, TransactionId, UserId};
use istyle_market::{
    LocalProofStorage, Marketplace, MemoryProofStorage, NewListing, ProofFormat, ProofStorage,
    ProofStorageError,
};
use istyle_state::{ErrorKind, Listing, ListingKind, TransactionStatus};

fn dress(market: &Marketplace) -> Listing {
    market
        .create_listing(
            UserId::new(),
            NewListing {
                title: "Cotton dress".into(),
                description: String::new(),
                kind: ListingKind::Sale,
                price: Some("22.50".into()),
            },
        )
        .unwrap()
}

#[test]
fn stores_file_under_upload_dir() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalProofStorage::new(dir.path().join("uploads")).unwrap();
    let tx = TransactionId::new();

    let proof = storage.store(tx, ProofFormat::Jpeg, b"\xff\xd8\xff").unwrap();
    let reference = proof.as_str();
    assert!(reference.starts_with("/uploads/proof_"));
    assert!(reference.ends_with(".jpg"));
    assert!(reference.contains(&tx.as_uuid().simple().to_string()));

    let path = storage.resolve(&proof).unwrap();
    assert!(path.starts_with(storage.dir()));
    assert_eq!(std::fs::read(path).unwrap(), b"\xff\xd8\xff".to_vec());
}

#[test]
fn resolve_rejects_foreign_references() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalProofStorage::new(dir.path()).unwrap();
    for bad in ["/uploads/../etc/passwd", "/elsewhere/proof.png", "/uploads/"] {
        let proof = istyle_core::ProofRef::new(bad).unwrap();
        assert!(storage.resolve(&proof).is_none(), "{bad}");
    }
}

#[test]
fn empty_upload_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalProofStorage::new(dir.path()).unwrap();
    let err = storage
        .store(TransactionId::new(), ProofFormat::Pdf, &[])
        .unwrap_err();
    assert!(matches!(err, ProofStorageError::Empty));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn submit_payment_proof_through_local_storage() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalProofStorage::new(dir.path()).unwrap();
    let market = Marketplace::in_memory();
    let listing = dress(&market);
    let buyer = UserId::new();
    let tx = market.initiate(buyer, listing.id, None).unwrap();

    let tx = market
        .submit_payment_proof(buyer, tx.id, &storage, ProofFormat::Pdf, b"%PDF-1.4")
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::PaymentSent);
    let proof = tx.payment_proof_ref.unwrap();
    assert!(proof.as_str().ends_with(".pdf"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn local_storage_loads_and_removes() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalProofStorage::new(dir.path()).unwrap();
    let proof = storage
        .store(TransactionId::new(), ProofFormat::Png, b"\x89PNG")
        .unwrap();
    assert_eq!(storage.load(&proof).unwrap(), Some(b"\x89PNG".to_vec()));

    storage.remove(&proof).unwrap();
    assert_eq!(storage.load(&proof).unwrap(), None);
    storage.remove(&proof).unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    let foreign = ProofRef::new("/elsewhere/proof.png").unwrap();
    assert_eq!(storage.load(&foreign).unwrap(), None);
}

/// Lets the seller cancel while the buyer's upload is being written.
struct CancelDuringUpload {
    inner: MemoryProofStorage,
    market: Marketplace,
    seller: UserId,
}

impl ProofStorage for CancelDuringUpload {
    fn store(
        &self,
        transaction: TransactionId,
        format: ProofFormat,
        bytes: &[u8],
    ) -> Result<ProofRef, ProofStorageError> {
        let proof = self.inner.store(transaction, format, bytes)?;
        self.market
            .cancel(self.seller, transaction, Some("sold elsewhere".into()))
            .unwrap();
        Ok(proof)
    }

    fn load(&self, proof: &ProofRef) -> Result<Option<Vec<u8>>, ProofStorageError> {
        self.inner.load(proof)
    }

    fn remove(&self, proof: &ProofRef) -> Result<(), ProofStorageError> {
        self.inner.remove(proof)
    }
}

#[test]
fn proof_is_removed_when_transaction_is_cancelled_mid_upload() {
    let market = Marketplace::in_memory();
    let listing = dress(&market);
    let buyer = UserId::new();
    let tx = market.initiate(buyer, listing.id, None).unwrap();
    let storage = CancelDuringUpload {
        inner: MemoryProofStorage::new(),
        market: market.clone(),
        seller: listing.owner_id,
    };

    let err = market
        .submit_payment_proof(buyer, tx.id, &storage, ProofFormat::Png, b"png")
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::InvalidTransition));
    assert!(storage.inner.is_empty());

    let tx = market.get_transaction(tx.id).unwrap();
    assert_eq!(tx.status, TransactionStatus::Cancelled);
    assert!(tx.payment_proof_ref.is_none());
}

#[test]
fn proof_is_removed_when_prepared_upload_goes_stale() {
    let market = Marketplace::in_memory();
    let listing = dress(&market);
    let buyer = UserId::new();
    let tx = market.initiate(buyer, listing.id, None).unwrap();
    let storage = MemoryProofStorage::new();

    let pending = market
        .prepare_payment_proof(buyer, tx.id, &storage, ProofFormat::Pdf, b"%PDF")
        .unwrap();
    assert_eq!(storage.len(), 1);
    market.cancel(buyer, tx.id, None).unwrap();

    let proof = pending.next.payment_proof_ref.clone().unwrap();
    let err = market.apply_transition(pending).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::InvalidTransition));
    istyle_market::discard_proof(&storage, &proof);
    assert!(storage.is_empty());
}
