//! Races on the same listing and the same transaction resolve to exactly
//! one winner; losers see ordinary lifecycle errors.

use std::sync::{Arc, Barrier};
use std::thread;

use istyle_core::{ProofRef, UserId};
use istyle_market::{Marketplace, NewListing};
use istyle_state::{ErrorKind, ListingKind, TransactionStatus};

fn listing(market: &Marketplace) -> istyle_state::Listing {
    market
        .create_listing(
            UserId::new(),
            NewListing {
                title: "Silk scarf".into(),
                description: String::new(),
                kind: ListingKind::Sale,
                price: Some("12".into()),
            },
        )
        .unwrap()
}

#[test]
fn two_buyers_race_for_one_listing() {
    for _ in 0..50 {
        let market = Arc::new(Marketplace::in_memory());
        let l = listing(&market);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (market, barrier) = (Arc::clone(&market), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    market.initiate(UserId::new(), l.id, None)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(err.kind(), Some(ErrorKind::InvalidTransition));
        }
        assert_eq!(market.transactions_for_listing(l.id).unwrap().len(), 1);
    }
}

#[test]
fn many_buyers_one_winner() {
    let market = Arc::new(Marketplace::in_memory());
    let l = listing(&market);
    let barrier = Arc::new(Barrier::new(16));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let (market, barrier) = (Arc::clone(&market), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                market.initiate(UserId::new(), l.id, None).is_ok()
            })
        })
        .collect();
    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1);
}

#[test]
fn concurrent_confirmations_commit_once() {
    for _ in 0..50 {
        let market = Arc::new(Marketplace::in_memory());
        let l = listing(&market);
        let buyer = UserId::new();
        let tx = market.initiate(buyer, l.id, None).unwrap();
        market
            .upload_payment_proof(buyer, tx.id, ProofRef::new("/uploads/p.png").unwrap())
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (market, barrier) = (Arc::clone(&market), Arc::clone(&barrier));
                let (seller, id) = (l.owner_id, tx.id);
                thread::spawn(move || {
                    barrier.wait();
                    market.confirm_payment(seller, id)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(err.kind(), Some(ErrorKind::InvalidTransition));
        }

        let stored = market.get_for(buyer, tx.id).unwrap();
        assert_eq!(stored.status, TransactionStatus::PaymentConfirmed);
        assert_eq!(stored.version, 3);
        assert_eq!(stored.transitions.len(), 3);
    }
}

#[test]
fn cancel_and_delivery_race_leaves_one_terminal_state() {
    for _ in 0..50 {
        let market = Arc::new(
            Marketplace::in_memory().with_policy(istyle_state::CancellationPolicy::EitherParty),
        );
        let l = listing(&market);
        let seller = l.owner_id;
        let buyer = UserId::new();
        let tx = market.initiate(buyer, l.id, None).unwrap();
        market
            .upload_payment_proof(buyer, tx.id, ProofRef::new("/uploads/p.png").unwrap())
            .unwrap();
        market.confirm_payment(seller, tx.id).unwrap();
        market.mark_shipped(seller, tx.id, None).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let deliver = {
            let (market, barrier, id) = (Arc::clone(&market), Arc::clone(&barrier), tx.id);
            thread::spawn(move || {
                barrier.wait();
                market.confirm_delivery(buyer, id)
            })
        };
        let cancel = {
            let (market, barrier, id) = (Arc::clone(&market), Arc::clone(&barrier), tx.id);
            thread::spawn(move || {
                barrier.wait();
                market.cancel(seller, id, None)
            })
        };
        let delivered = deliver.join().unwrap().is_ok();
        let cancelled = cancel.join().unwrap().is_ok();
        assert!(delivered ^ cancelled);

        let stored = market.get_for(buyer, tx.id).unwrap();
        if delivered {
            assert_eq!(stored.status, TransactionStatus::Delivered);
            assert!(!market.can_initiate(l.id).unwrap());
        } else {
            assert_eq!(stored.status, TransactionStatus::Cancelled);
            assert!(market.can_initiate(l.id).unwrap());
        }
    }
}
