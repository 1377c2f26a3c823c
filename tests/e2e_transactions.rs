//! End-to-end tests for transaction handling around compiles and for
//! concurrent readers of a shared runtime.

use std::thread;

use m3::{Runtime, TxMode};
use m3::tx::TxState;

#[test]
fn test_compiles_leave_no_open_transaction() {
    let runtime = Runtime::new().unwrap();
    let manager = runtime.transaction_manager();
    assert_eq!(manager.open_count(), 0);

    runtime.create_source("/ok.pure", "Class t::Ok {}").unwrap();
    runtime.compile().unwrap();
    assert_eq!(manager.open_count(), 0);

    runtime.create_source("/bad.pure", "Class t::Bad extends t::Nope {}").unwrap();
    runtime.compile().unwrap_err();
    assert_eq!(manager.open_count(), 0);
    assert_eq!(manager.current(), None);
}

#[test]
fn test_repeated_compiles_do_not_accumulate_transactions() {
    let runtime = Runtime::new().unwrap();
    let manager = runtime.transaction_manager();
    for round in 0..100 {
        runtime.add_or_update_source("/loop.pure", &format!("Class t::C{round} {{}}")).unwrap();
        runtime.compile().unwrap();
        let marker = manager.begin(TxMode::ReadOnly);
        assert_eq!(manager.open_count(), 1, "round {round}");
        marker.rollback().unwrap();
        assert_eq!(manager.state(marker.id()), None);
    }
    assert_eq!(manager.open_count(), 0);
}

#[test]
fn test_failed_compile_can_be_fixed_and_retried() {
    let runtime = Runtime::new().unwrap();
    runtime.create_source("/a.pure", "Class t::A { b: t::B[1]; }").unwrap();
    runtime.compile().unwrap_err();
    runtime.create_source("/b.pure", "Class t::B {}").unwrap();
    let report = runtime.compile().unwrap();
    assert_eq!(report.sources_parsed, 2);
    runtime.validate().unwrap();
}

#[test]
fn test_readers_on_other_threads() {
    let runtime = Runtime::new().unwrap();
    runtime.create_source("/m.pure", "Class m::Animal {}\nClass m::Dog extends m::Animal {}").unwrap();
    runtime.compile().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let reader = runtime.clone();
            thread::spawn(move || {
                (0..50).all(|_| {
                    reader.subtype_of("m::Dog", "m::Animal").unwrap() && reader.get_element("m::Dog").is_some()
                })
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }
}

#[test]
fn test_transaction_state_conflicts() {
    let runtime = Runtime::new().unwrap();
    let manager = runtime.transaction_manager();
    let tx = manager.begin(TxMode::ReadOnly);
    {
        let _scope = tx.open_in_current_thread().unwrap();
        let other = manager.clone();
        assert_eq!(thread::spawn(move || other.current()).join().unwrap(), None);
    }
    tx.commit().unwrap();
    assert_eq!(tx.state(), TxState::Committed);
    assert!(tx.commit().is_err());
    assert!(tx.open_in_current_thread().is_err());
}
