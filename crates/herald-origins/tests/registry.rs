use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use herald_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings, Deadline};
use herald_origins::{OriginError, OriginRegistry};
use herald_types::Origin;
use tempfile::NamedTempFile;

fn setup() -> (NamedTempFile, DbPool, OriginRegistry) {
    setup_with(DbRuntimeSettings::default())
}

fn setup_with(settings: DbRuntimeSettings) -> (NamedTempFile, DbPool, OriginRegistry) {
    let temp_file = NamedTempFile::new().expect("failed to create temp file");
    let pool = create_pool(
        temp_file.path().to_str().expect("temp path should be utf-8"),
        settings,
    )
    .expect("failed to create pool");
    run_migrations(&pool.get().unwrap()).expect("failed to run migrations");
    let registry = OriginRegistry::new(pool.clone());
    (temp_file, pool, registry)
}

fn classes_for(registry: &OriginRegistry, service_id: &str) -> Vec<String> {
    registry
        .list_origins(Deadline::none())
        .expect("list should succeed")
        .into_iter()
        .filter(|o| o.service_id == service_id)
        .map(|o| o.class)
        .collect()
}

#[test]
fn upsert_replaces_only_the_callers_set() {
    let (_file, _pool, registry) = setup();

    registry
        .upsert_origins("other", &[Origin::new("Other", "other.a")], Deadline::none())
        .unwrap();
    registry
        .upsert_origins("svc", &[Origin::new("One", "svc.one")], Deadline::none())
        .unwrap();
    registry
        .upsert_origins("svc", &[Origin::new("Two", "svc.two")], Deadline::none())
        .unwrap();

    assert_eq!(classes_for(&registry, "svc"), vec!["svc.two".to_string()]);
    assert_eq!(classes_for(&registry, "other"), vec!["other.a".to_string()]);
}

#[test]
fn conflicting_upsert_changes_nothing() {
    let (_file, _pool, registry) = setup();

    registry
        .upsert_origins("s1", &[Origin::new("X", "x")], Deadline::none())
        .unwrap();
    registry
        .upsert_origins("s2", &[Origin::new("Y", "y")], Deadline::none())
        .unwrap();

    let err = registry
        .upsert_origins(
            "s2",
            &[Origin::new("Z", "z"), Origin::new("X again", "x")],
            Deadline::none(),
        )
        .unwrap_err();
    assert!(matches!(err, OriginError::Conflict(ref class) if class == "x"), "{err:?}");

    assert_eq!(classes_for(&registry, "s1"), vec!["x".to_string()]);
    assert_eq!(
        classes_for(&registry, "s2"),
        vec!["y".to_string()],
        "failed replace must roll back its delete"
    );
}

#[test]
fn empty_service_id_is_rejected() {
    let (_file, _pool, registry) = setup();
    let err = registry
        .upsert_origins("  ", &[Origin::new("A", "a")], Deadline::none())
        .unwrap_err();
    assert!(matches!(err, OriginError::EmptyServiceId));
}

#[test]
fn blank_class_is_rejected() {
    let (_file, _pool, registry) = setup();
    let err = registry
        .upsert_origins(
            "svc",
            &[Origin::new("A", "a"), Origin::new("B", " ")],
            Deadline::none(),
        )
        .unwrap_err();
    assert!(matches!(err, OriginError::InvalidOrigin { index: 1, .. }));
}

#[test]
fn concurrent_upserts_for_one_service_never_duplicate() {
    let (_file, _pool, registry) = setup();
    let registry = Arc::new(registry);
    let payload = vec![Origin::new("One", "c.one"), Origin::new("Two", "c.two")];

    for workers in [1usize, 4, 16] {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let payload = payload.clone();
                thread::spawn(move || {
                    registry.upsert_origins(
                        "racer",
                        &payload,
                        Deadline::after(Duration::from_secs(30)),
                    )
                })
            })
            .collect();

        for handle in handles {
            handle
                .join()
                .expect("worker should not panic")
                .expect("every upsert should succeed");
        }

        let mut classes = classes_for(&registry, "racer");
        classes.sort();
        assert_eq!(classes, vec!["c.one".to_string(), "c.two".to_string()]);
    }
}

#[test]
fn upsert_times_out_behind_another_writer() {
    let (_file, pool, registry) = setup();

    let holder = pool.get().unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let err = registry
        .upsert_origins(
            "svc",
            &[Origin::new("A", "a")],
            Deadline::after(Duration::from_millis(100)),
        )
        .unwrap_err();
    assert!(matches!(err, OriginError::Timeout), "{err:?}");

    holder.execute_batch("ROLLBACK;").unwrap();
    registry
        .upsert_origins("svc", &[Origin::new("A", "a")], Deadline::none())
        .expect("upsert should succeed once the writer is gone");
}

#[test]
fn expired_deadline_fails_before_touching_the_store() {
    let (_file, _pool, registry) = setup();
    let err = registry
        .upsert_origins("svc", &[], Deadline::after(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(err, OriginError::Timeout));
    assert!(matches!(
        registry.list_origins(Deadline::after(Duration::ZERO)),
        Err(OriginError::Timeout)
    ));
}

#[test]
fn names_and_classes_are_stored_trimmed() {
    let (_file, _pool, registry) = setup();
    registry
        .upsert_origins("svc", &[Origin::new(" Disk ", " infra.disk ")], Deadline::none())
        .unwrap();

    let origins = registry.list_origins(Deadline::none()).unwrap();
    assert_eq!(origins.len(), 1);
    assert_eq!(origins[0].name, "Disk");
    assert_eq!(origins[0].class, "infra.disk");

    let err = registry
        .upsert_origins("other", &[Origin::new("Disk", "infra.disk")], Deadline::none())
        .unwrap_err();
    assert!(matches!(err, OriginError::Conflict(ref class) if class == "infra.disk"), "{err:?}");
}

#[test]
fn exhausted_pool_times_out_at_the_deadline() {
    let (_file, pool, registry) = setup_with(DbRuntimeSettings {
        pool_max_size: 1,
        ..DbRuntimeSettings::default()
    });
    let _only_connection = pool.get().unwrap();

    let started = Instant::now();
    let err = registry
        .upsert_origins(
            "svc",
            &[Origin::new("A", "a")],
            Deadline::after(Duration::from_millis(100)),
        )
        .unwrap_err();
    assert!(matches!(err, OriginError::Timeout), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(2), "waited {:?}", started.elapsed());

    let err = registry
        .list_origins(Deadline::after(Duration::from_millis(100)))
        .unwrap_err();
    assert!(matches!(err, OriginError::Timeout), "{err:?}");
}
