//! Concurrent lock acquisition against the in-process store.

use hostgate_schema::OwnerToken;
use hostgate_store::{Acquire, LockManager, MemoryStore, Release};
use std::sync::{Arc, Barrier};

#[test]
fn exactly_one_contender_acquires() {
    let mgr = LockManager::new(Arc::new(MemoryStore::new()));
    let contenders = 16;
    let barrier = Arc::new(Barrier::new(contenders));

    let handles: Vec<_> = (0..contenders)
        .map(|i| {
            let mgr = mgr.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let owner = OwnerToken::new(format!("team-{i}__10.0.0.{i}"));
                barrier.wait();
                (owner.clone(), mgr.try_acquire("prod-goods-ms-001", &owner).unwrap())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results
        .iter()
        .filter(|(_, r)| *r == Acquire::Acquired)
        .map(|(o, _)| o.clone())
        .collect();
    assert_eq!(winners.len(), 1, "exactly one contender must win");

    // Every loser sees the winner as the holder.
    for (_, result) in results.iter().filter(|(_, r)| *r != Acquire::Acquired) {
        assert_eq!(*result, Acquire::AlreadyHeld(winners[0].clone()));
    }
}

#[test]
fn distinct_hostnames_do_not_contend() {
    let mgr = LockManager::new(Arc::new(MemoryStore::new()));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let mgr = mgr.clone();
            std::thread::spawn(move || {
                let owner = OwnerToken::new(format!("team-a__10.0.0.{i}"));
                mgr.try_acquire(&format!("prod-web-{i:03}"), &owner).unwrap()
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), Acquire::Acquired);
    }
}

#[test]
fn release_reopens_hostname_for_new_owner() {
    let mgr = LockManager::new(Arc::new(MemoryStore::new()));
    let first = OwnerToken::new("team-a__10.0.0.1");
    let second = OwnerToken::new("team-b__10.0.0.2");

    assert_eq!(
        mgr.try_acquire("prod-db-001", &first).unwrap(),
        Acquire::Acquired
    );
    assert_eq!(
        mgr.release("prod-db-001", Some(&first)).unwrap(),
        Release::Released
    );
    assert_eq!(
        mgr.try_acquire("prod-db-001", &second).unwrap(),
        Acquire::Acquired
    );
}
