use crate::{Error, RandSource, SessionRegistry, SessionToken, ThreadRandom};
use core::cell::Cell;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread::scope;

struct MockRand {
    rand: u128,
}

impl RandSource<u128> for MockRand {
    fn rand(&self) -> u128 {
        self.rand
    }
}

/// Replays `values` in order, then repeats the last one.
struct StepRand {
    values: Vec<u128>,
    index: Cell<usize>,
}

impl RandSource<u128> for StepRand {
    fn rand(&self) -> u128 {
        let i = self.index.get();
        self.index.set(i + 1);
        self.values[i.min(self.values.len() - 1)]
    }
}

#[test]
fn token_renders_as_32_lowercase_hex_chars() {
    let token = SessionToken::generate(&MockRand { rand: 0xdead_beef });
    assert_eq!(token.to_string(), "000000000000000000000000deadbeef");

    let token = SessionToken::generate(&ThreadRandom);
    let rendered = token.to_string();
    assert_eq!(rendered.len(), 32);
    assert!(rendered.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    assert_eq!(rendered.parse::<SessionToken>().unwrap(), token);
}

#[test]
fn token_parse_rejects_malformed_input() {
    for bad in [
        "",
        "abc",
        "000000000000000000000000DEADBEEF",
        "000000000000000000000000deadbeefa",
        "00000000000000000000000-deadbeef",
        "+00000000000000000000000deadbeef",
        "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz",
    ] {
        assert_eq!(bad.parse::<SessionToken>(), Err(Error::InvalidToken), "{bad:?}");
    }
}

#[test]
fn token_debug_does_not_leak_the_credential() {
    let token = SessionToken::from_raw(u128::MAX);
    let debug = format!("{token:?}");
    assert!(!debug.contains(&token.to_string()));
    assert!(debug.starts_with("SessionToken(ffffff"));
}

#[test]
fn register_issues_distinct_tokens() {
    let registry = SessionRegistry::new(3);
    let a = registry.register("a").unwrap();
    let b = registry.register("b").unwrap();
    let c = registry.register("c").unwrap();

    assert_eq!(HashSet::from([a, b, c]).len(), 3);
    assert_eq!(registry.len(), 3);
    registry.check_invariants();
}

#[test]
fn register_redraws_on_collision() {
    let registry = SessionRegistry::with_rng(
        2,
        StepRand {
            values: vec![7, 7, 7, 9],
            index: Cell::new(0),
        },
    );

    let a = registry.register("a").unwrap();
    let b = registry.register("b").unwrap();
    assert_eq!(a.to_raw(), 7);
    assert_eq!(b.to_raw(), 9);
    registry.check_invariants();
}

#[test]
fn register_fails_full_at_capacity() {
    let registry = SessionRegistry::new(2);
    registry.register("a").unwrap();
    registry.register("b").unwrap();

    assert_eq!(registry.register("c"), Err(Error::Full));
    assert_eq!(registry.len(), 2);
}

#[test]
fn register_checks_capacity_before_origin() {
    let registry = SessionRegistry::new(1);
    registry.register("a").unwrap();

    // Same origin at capacity still reports Full.
    assert_eq!(registry.register("a"), Err(Error::Full));
}

#[test]
fn register_fails_duplicate_for_live_origin() {
    let registry = SessionRegistry::new(5);
    let token = registry.register("10.1.1.1").unwrap();

    assert_eq!(registry.register("10.1.1.1"), Err(Error::Duplicate));

    registry.release(&token).unwrap();
    assert!(registry.register("10.1.1.1").is_ok());
    registry.check_invariants();
}

#[test]
fn release_unknown_token_is_not_found_and_changes_nothing() {
    let registry = SessionRegistry::new(2);
    let token = registry.register("a").unwrap();

    assert_eq!(
        registry.release(&SessionToken::from_raw(token.to_raw() ^ 1)),
        Err(Error::NotFound)
    );
    assert_eq!(registry.len(), 1);
    assert!(registry.is_valid(&token));

    assert_eq!(&*registry.release(&token).unwrap(), "a");
    assert_eq!(registry.release(&token), Err(Error::NotFound));
    assert!(registry.is_empty());
    registry.check_invariants();
}

#[test]
fn capacity_scenario_single_slot() {
    let registry = SessionRegistry::new(1);

    let t1 = registry.register("client-a").unwrap();
    assert_eq!(registry.register("client-b"), Err(Error::Full));

    registry.release(&t1).unwrap();
    let t2 = registry.register("client-b").unwrap();
    assert!(registry.is_valid(&t2));
    assert!(!registry.is_valid(&t1));
}

#[test]
fn concurrent_registrations_never_exceed_capacity() {
    const THREADS: usize = 32;
    const CAPACITY: usize = 5;

    for _ in 0..20 {
        let registry = SessionRegistry::new(CAPACITY);
        let barrier = Barrier::new(THREADS);

        let results: Vec<_> = scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|i| {
                    let registry = &registry;
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        registry.register(&format!("origin-{i}"))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let admitted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(admitted, CAPACITY);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| *e == Error::Full)
        );
        assert_eq!(registry.len(), CAPACITY);
        registry.check_invariants();
    }
}

#[test]
fn concurrent_same_origin_admits_exactly_one() {
    for _ in 0..50 {
        let registry = SessionRegistry::new(10);
        let barrier = Barrier::new(2);

        let (first, second) = scope(|s| {
            let a = s.spawn(|| {
                barrier.wait();
                registry.register("shared")
            });
            let b = s.spawn(|| {
                barrier.wait();
                registry.register("shared")
            });
            (a.join().unwrap(), b.join().unwrap())
        });

        let mut outcomes = [first.is_ok(), second.is_ok()];
        outcomes.sort_unstable();
        assert_eq!(outcomes, [false, true]);
        assert!(first == Err(Error::Duplicate) || second == Err(Error::Duplicate));
        assert_eq!(registry.len(), 1);
        registry.check_invariants();
    }
}

#[test]
fn concurrent_register_and_release_keep_index_in_sync() {
    let registry = SessionRegistry::new(4);

    scope(|s| {
        for t in 0..8 {
            let registry = &registry;
            s.spawn(move || {
                for round in 0..200 {
                    let origin = format!("{t}-{}", round % 3);
                    if let Ok(token) = registry.register(&origin) {
                        assert!(registry.is_valid(&token));
                        registry.release(&token).unwrap();
                    }
                }
            });
        }
    });

    assert!(registry.is_empty());
    registry.check_invariants();
}

#[test]
fn guard_releases_on_drop() {
    let registry = Arc::new(SessionRegistry::new(1));

    let guard = registry.register_guarded("a").unwrap();
    let token = guard.token();
    assert!(registry.is_valid(&token));
    assert_eq!(
        registry.register_guarded("b").err(),
        Some(Error::Full)
    );

    drop(guard);
    assert!(!registry.is_valid(&token));
    assert!(registry.register_guarded("b").is_ok());
}

#[test]
fn guard_drop_after_manual_release_is_a_no_op() {
    let registry = Arc::new(SessionRegistry::new(2));
    let guard = registry.register_guarded("a").unwrap();
    registry.release(&guard.token()).unwrap();

    let other = registry.register("b").unwrap();
    drop(guard);
    assert!(registry.is_valid(&other));
    registry.check_invariants();
}

#[test]
fn prediction_lease_is_exclusive_per_token() {
    let registry = Arc::new(SessionRegistry::new(2));
    let token = registry.register("a").unwrap();

    let lease = registry.begin_prediction(&token).unwrap();
    assert_eq!(lease.token(), token);
    assert_eq!(registry.begin_prediction(&token).err(), Some(Error::Busy));

    drop(lease);
    assert!(registry.begin_prediction(&token).is_ok());
}

#[test]
fn prediction_lease_requires_live_token() {
    let registry = Arc::new(SessionRegistry::new(2));
    let token = registry.register("a").unwrap();
    let lease = registry.begin_prediction(&token).unwrap();

    registry.release(&token).unwrap();
    assert_eq!(registry.begin_prediction(&token).err(), Some(Error::NotFound));

    // Dropping a lease for a released token must not resurrect it.
    drop(lease);
    assert!(!registry.is_valid(&token));
    registry.check_invariants();
}
