//! Decisions under concurrent load on shared state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use clinic_guard::security::{Action, DenialKind, RateWindow, ResourceType, Role};

mod common;

use common::{access, engine};

#[test]
fn test_concurrent_burst_admits_exactly_the_limit() {
    let e = engine();
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let allowed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let coordinator = Arc::clone(&e.coordinator);
            let barrier = Arc::clone(&barrier);
            let allowed = Arc::clone(&allowed);
            thread::spawn(move || {
                let request = access("dr-shared", Role::Doctor, Action::Read, ResourceType::MedicalRecord);
                barrier.wait();
                let decision = coordinator.validate_and_record(&request);
                if decision.allowed {
                    allowed.fetch_add(1, Ordering::SeqCst);
                } else {
                    assert_eq!(
                        decision.denial_kind,
                        Some(DenialKind::RateLimitExceeded(RateWindow::Burst))
                    );
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // medical_access burst limit is 5.
    assert_eq!(allowed.load(Ordering::SeqCst), 5);

    let audit = e.coordinator.audit();
    assert_eq!(audit.entries(None).unwrap().len(), threads);
    assert!(audit.verify().unwrap().intact);
}

#[test]
fn test_independent_principals_do_not_contend() {
    let e = engine();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let coordinator = Arc::clone(&e.coordinator);
            thread::spawn(move || {
                let principal = format!("nurse-{}", i);
                (0..5)
                    .map(|_| {
                        coordinator
                            .validate_and_record(&access(&principal, Role::Nurse, Action::Read, ResourceType::Patient))
                            .allowed
                    })
                    .filter(|allowed| *allowed)
                    .count()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 5);
    }
    assert_eq!(e.coordinator.audit().entries(None).unwrap().len(), 40);
}
