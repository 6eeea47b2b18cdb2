//! Hardware mutex arbitration against the simulated falcon

use std::sync::Arc;

use pmu_core::{Error, MutexToken, Violation};
use pmu_hal::{Falcon, MutexArbiter};
use pmu_sim::{SimClock, SimFalcon};

fn falcon() -> (Arc<SimFalcon>, Falcon) {
    let sim = Arc::new(SimFalcon::new());
    let falcon = Falcon::new(sim.clone(), SimClock::new());
    (sim, falcon)
}

#[test]
fn test_acquire_release() {
    let (sim, falcon) = falcon();
    let arbiter = MutexArbiter::default();
    let ids = sim.free_mutex_ids();

    let token = arbiter.acquire(&falcon, 2, MutexToken::INVALID).unwrap();
    assert!(token.is_valid());
    assert_eq!(sim.mutex_owner(2), token.0);
    assert_eq!(sim.free_mutex_ids(), ids - 1);

    arbiter.release(&falcon, 2, token).unwrap();
    assert_eq!(sim.mutex_owner(2), 0);
    assert_eq!(sim.free_mutex_ids(), ids);
}

#[test]
fn test_reentrant_acquire() {
    let (sim, falcon) = falcon();
    let arbiter = MutexArbiter::default();

    let token = arbiter.acquire(&falcon, 3, MutexToken::INVALID).unwrap();
    assert_eq!(arbiter.acquire(&falcon, 3, token), Ok(token));
    assert_eq!(arbiter.ref_count(3), 2);

    arbiter.release(&falcon, 3, token).unwrap();
    // still held after the first release
    assert_eq!(sim.mutex_owner(3), token.0);

    arbiter.release(&falcon, 3, token).unwrap();
    assert_eq!(sim.mutex_owner(3), 0);

    assert_eq!(
        arbiter.release(&falcon, 3, token),
        Err(Error::ProtocolViolation(Violation::NotMutexOwner))
    );
}

#[test]
fn test_release_by_non_owner() {
    let (sim, falcon) = falcon();
    let arbiter = MutexArbiter::default();
    sim.hold_mutex(2, 0x80);

    assert_eq!(
        arbiter.release(&falcon, 2, MutexToken(0x11)),
        Err(Error::ProtocolViolation(Violation::NotMutexOwner))
    );
    assert_eq!(sim.mutex_owner(2), 0x80);
}

#[test]
fn test_contended_acquire_exhausts_retries() {
    let (sim, falcon) = falcon();
    let arbiter = MutexArbiter::new(4, 20);
    let ids = sim.free_mutex_ids();
    sim.hold_mutex(2, 0x80);

    assert_eq!(
        arbiter.acquire(&falcon, 2, MutexToken::INVALID),
        Err(Error::Busy)
    );
    // every losing candidate went back to the generator
    assert_eq!(sim.free_mutex_ids(), ids);
    // one sleep per failed attempt
    assert_eq!(falcon.now_us(), 5 * 20);

    sim.drop_mutex(2);
    assert!(arbiter.acquire(&falcon, 2, MutexToken::INVALID).is_ok());
}

#[test]
fn test_generator_exhausted() {
    let (sim, falcon) = falcon();
    let arbiter = MutexArbiter::default();
    sim.exhaust_mutex_ids(true);

    assert_eq!(
        arbiter.acquire(&falcon, 0, MutexToken::INVALID),
        Err(Error::Busy)
    );
    assert_eq!(falcon.now_us(), 0);
}

#[test]
fn test_out_of_range_id() {
    let (_sim, falcon) = falcon();
    let arbiter = MutexArbiter::default();
    assert_eq!(
        arbiter.acquire(&falcon, 16, MutexToken::INVALID),
        Err(Error::InvalidArgument)
    );
}
