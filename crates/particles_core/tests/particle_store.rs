use particles_core::db::open_db_in_memory;
use particles_core::{
    DocumentKey, IdAllocationLock, Particle2D, Particle3D, ParticleId, ParticleListKey,
    ParticleRecord, ParticleRepository, ParticlesVersion, SqliteParticleRepository, StoreError,
    StoreNamespace,
};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::sync::Arc;

fn repo(conn: &Connection) -> SqliteParticleRepository<'_> {
    SqliteParticleRepository::try_new(conn, Arc::new(IdAllocationLock::global())).unwrap()
}

fn list_key(owner: &str, name: &str) -> ParticleListKey {
    ParticleListKey::new(owner, name).unwrap()
}

fn doc(owner: &str, name: &str, datum: &str) -> DocumentKey {
    list_key(owner, name).document(datum).unwrap()
}

fn virion(x: i64) -> ParticleRecord {
    Particle3D::unbinned(x, x + 1, x + 2, 40.0).unwrap().into()
}

fn pick(x: i64) -> ParticleRecord {
    Particle2D::new(x, x, 12.5).unwrap().into()
}

fn records(ids: &[ParticleId]) -> BTreeMap<ParticleId, ParticleRecord> {
    ids.iter()
        .map(|&id| (id, virion(i64::from(id) * 10)))
        .collect()
}

#[test]
fn missing_document_reads_as_empty() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let key = doc("p1", "virions", "ts_01");

    let set = repo.get_particles(&key).unwrap();
    assert!(set.is_empty());
    assert_eq!(set.version, ParticlesVersion::Unbinned);
    assert_eq!(repo.next_id(&key).unwrap(), 1);
    assert_eq!(repo.count(&key).unwrap(), 0);
    assert!(repo.get_thresholds(&key).unwrap().is_empty());
}

#[test]
fn import_replaces_document_and_resets_next_id() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let key = doc("p1", "virions", "ts_01");

    repo.import_particles(&key, ParticlesVersion::Unbinned, &records(&[1, 2, 5]))
        .unwrap();
    let set = repo.get_particles(&key).unwrap();
    assert_eq!(set.particles, records(&[1, 2, 5]));
    assert_eq!(repo.next_id(&key).unwrap(), 4);

    repo.import_particles(&key, ParticlesVersion::Unbinned, &records(&[7]))
        .unwrap();
    let set = repo.get_particles(&key).unwrap();
    assert_eq!(set.particles.keys().copied().collect::<Vec<_>>(), vec![7]);
    assert_eq!(repo.next_id(&key).unwrap(), 2);

    repo.import_particles(&key, ParticlesVersion::Unbinned, &BTreeMap::new())
        .unwrap();
    assert!(repo.get_particles(&key).unwrap().is_empty());
    assert_eq!(repo.next_id(&key).unwrap(), 1);
}

#[test]
fn import_rejects_zero_ids_and_mismatched_spaces() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let key = doc("p1", "virions", "ts_01");

    let err = repo
        .import_particles(&key, ParticlesVersion::Unbinned, &records(&[0, 1]))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidParticleId(0)));

    let err = repo
        .import_particles(&key, ParticlesVersion::Legacy, &records(&[1]))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidRecord(_)));
    assert_eq!(repo.next_id(&key).unwrap(), 1);
}

#[test]
fn legacy_import_cannot_downgrade_unbinned_document() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let key = doc("p1", "virions", "ts_01");
    let binned: BTreeMap<ParticleId, ParticleRecord> =
        BTreeMap::from([(1, Particle3D::binned(100, 200, 10, 5.0).unwrap().into())]);

    repo.import_particles(&key, ParticlesVersion::Legacy, &binned)
        .unwrap();
    repo.import_particles(&key, ParticlesVersion::Unbinned, &records(&[1, 2]))
        .unwrap();

    let err = repo
        .import_particles(&key, ParticlesVersion::Legacy, &binned)
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionDowngrade(ref doc_key) if doc_key == "p1/virions/ts_01"));

    let stored = repo.get_particles(&key).unwrap();
    assert_eq!(stored.version, ParticlesVersion::Unbinned);
    assert_eq!(stored.particles, records(&[1, 2]));
    assert_eq!(repo.next_id(&key).unwrap(), 3);
}

#[test]
fn add_never_reuses_deleted_ids() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let key = doc("p1", "picks", "mic_01");

    assert_eq!(repo.add_particle(&key, || pick(1)).unwrap(), 1);
    assert_eq!(repo.add_particle(&key, || pick(2)).unwrap(), 2);
    assert!(repo.delete_particle(&key, 1).unwrap());
    assert_eq!(repo.add_particle(&key, || pick(3)).unwrap(), 3);

    let set = repo.get_particles(&key).unwrap();
    assert_eq!(set.particles.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(set.particles[&3], pick(3));
    assert_eq!(repo.next_id(&key).unwrap(), 4);
}

#[test]
fn deleting_missing_particle_is_a_noop() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let key = doc("p1", "picks", "mic_01");

    repo.add_particle(&key, || pick(1)).unwrap();
    assert!(!repo.delete_particle(&key, 42).unwrap());
    assert_eq!(repo.count(&key).unwrap(), 1);
    assert_eq!(repo.next_id(&key).unwrap(), 2);

    let absent = doc("p1", "picks", "mic_02");
    assert!(!repo.delete_particle(&absent, 1).unwrap());
    assert_eq!(repo.next_id(&absent).unwrap(), 1);
}

#[test]
fn lazily_created_documents_take_version_from_first_record() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);

    let legacy = doc("p1", "virions", "ts_legacy");
    let binned: ParticleRecord = Particle3D::binned(10, 20, 5, 4.0).unwrap().into();
    repo.add_particle(&legacy, || binned).unwrap();
    assert_eq!(
        repo.get_particles(&legacy).unwrap().version,
        ParticlesVersion::Legacy
    );

    // Later records must match the document version.
    let err = repo.add_particle(&legacy, || virion(1)).unwrap_err();
    assert!(matches!(err, StoreError::InvalidRecord(_)));
    assert_eq!(repo.next_id(&legacy).unwrap(), 2);

    let current = doc("p1", "virions", "ts_current");
    repo.add_particle(&current, || virion(1)).unwrap();
    assert_eq!(
        repo.get_particles(&current).unwrap().version,
        ParticlesVersion::Unbinned
    );
}

#[test]
fn counts_cover_one_document_or_a_whole_list() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let list = list_key("p1", "virions");

    repo.import_particles(
        &list.document("ts_01").unwrap(),
        ParticlesVersion::Unbinned,
        &records(&[1, 2, 3]),
    )
    .unwrap();
    repo.import_particles(
        &list.document("ts_02").unwrap(),
        ParticlesVersion::Unbinned,
        &records(&[1, 2]),
    )
    .unwrap();
    repo.import_particles(
        &doc("p1", "other", "ts_01"),
        ParticlesVersion::Unbinned,
        &records(&[1]),
    )
    .unwrap();

    assert_eq!(repo.count(&list.document("ts_01").unwrap()).unwrap(), 3);
    assert_eq!(repo.count_all(&list).unwrap(), 5);
    assert_eq!(
        repo.list_datums(&list).unwrap(),
        vec!["ts_01".to_string(), "ts_02".to_string()]
    );
}

#[test]
fn thresholds_are_tracked_beside_geometry() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let key = doc("p1", "virions", "ts_01");

    let err = repo.set_threshold(&key, 1, Some(3)).unwrap_err();
    assert!(matches!(err, StoreError::DocumentNotFound(_)));

    repo.import_particles(&key, ParticlesVersion::Unbinned, &records(&[1, 2]))
        .unwrap();
    repo.set_threshold(&key, 1, Some(3)).unwrap();
    repo.set_threshold(&key, 2, Some(5)).unwrap();
    repo.set_threshold(&key, 2, Some(6)).unwrap();
    let err = repo.set_threshold(&key, 9, Some(1)).unwrap_err();
    assert!(matches!(
        err,
        StoreError::ParticleNotFound { particle_id: 9, .. }
    ));
    assert_eq!(
        repo.get_thresholds(&key).unwrap(),
        BTreeMap::from([(1, 3), (2, 6)])
    );

    repo.set_threshold(&key, 1, None).unwrap();
    assert_eq!(repo.get_thresholds(&key).unwrap(), BTreeMap::from([(2, 6)]));

    // Deleting a particle drops its threshold; re-import keeps the rest.
    repo.delete_particle(&key, 2).unwrap();
    assert!(repo.get_thresholds(&key).unwrap().is_empty());
    repo.set_threshold(&key, 1, Some(4)).unwrap();
    repo.import_particles(&key, ParticlesVersion::Unbinned, &records(&[1]))
        .unwrap();
    assert_eq!(repo.get_thresholds(&key).unwrap(), BTreeMap::from([(1, 4)]));
}

#[test]
fn delete_documents_by_datum_list_and_owner() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let list = list_key("p1", "virions");
    for key in [
        list.document("ts_01").unwrap(),
        list.document("ts_02").unwrap(),
        doc("p1", "picks", "ts_01"),
        doc("p2", "virions", "ts_01"),
    ] {
        repo.import_particles(&key, ParticlesVersion::Unbinned, &records(&[1]))
            .unwrap();
        repo.set_threshold(&key, 1, Some(2)).unwrap();
    }

    assert_eq!(repo.delete_documents(&list, Some("ts_01")).unwrap(), 1);
    assert_eq!(repo.list_datums(&list).unwrap(), vec!["ts_02".to_string()]);
    assert_eq!(repo.delete_documents(&list, None).unwrap(), 1);
    assert_eq!(repo.count_all(&list).unwrap(), 0);

    assert_eq!(repo.delete_owner("p1").unwrap(), 1);
    assert_eq!(repo.count(&doc("p1", "picks", "ts_01")).unwrap(), 0);
    assert_eq!(repo.count(&doc("p2", "virions", "ts_01")).unwrap(), 1);

    let orphans: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM particle_thresholds WHERE doc_key LIKE 'p1/%';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
}

#[test]
fn copy_all_preserves_ids_next_id_and_thresholds() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let source = doc("p1", "virions", "ts_01");

    repo.import_particles(&source, ParticlesVersion::Unbinned, &records(&[1, 2, 3]))
        .unwrap();
    repo.delete_particle(&source, 2).unwrap();
    repo.set_threshold(&source, 3, Some(7)).unwrap();

    let copied = repo
        .copy_all(
            &StoreNamespace::Owner("p1".to_string()),
            &StoreNamespace::Owner("p9".to_string()),
        )
        .unwrap();
    assert_eq!(copied, 1);

    let target = doc("p9", "virions", "ts_01");
    assert_eq!(
        repo.get_particles(&target).unwrap(),
        repo.get_particles(&source).unwrap()
    );
    assert_eq!(repo.next_id(&target).unwrap(), 4);
    assert_eq!(repo.get_thresholds(&target).unwrap(), BTreeMap::from([(3, 7)]));

    // Copies are independent of their source.
    repo.add_particle(&target, || virion(99)).unwrap();
    assert_eq!(repo.count(&source).unwrap(), 2);
}

#[test]
fn rename_all_moves_documents_between_lists() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let from = list_key("p1", "draft");
    let to = list_key("p1", "final");

    repo.import_particles(
        &from.document("ts_01").unwrap(),
        ParticlesVersion::Unbinned,
        &records(&[1, 2]),
    )
    .unwrap();
    repo.add_particle(&from.document("ts_01").unwrap(), || virion(30))
        .unwrap();

    let moved = repo
        .rename_all(
            &StoreNamespace::List(from.clone()),
            &StoreNamespace::List(to.clone()),
        )
        .unwrap();
    assert_eq!(moved, 1);
    assert_eq!(repo.count_all(&from).unwrap(), 0);
    assert!(repo.list_datums(&from).unwrap().is_empty());

    let renamed = to.document("ts_01").unwrap();
    assert_eq!(repo.count(&renamed).unwrap(), 3);
    assert_eq!(repo.next_id(&renamed).unwrap(), 4);
    assert_eq!(repo.add_particle(&renamed, || virion(40)).unwrap(), 4);
}

#[test]
fn copy_between_namespaces_of_different_shape_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);

    let err = repo
        .copy_all(
            &StoreNamespace::Owner("p1".to_string()),
            &StoreNamespace::List(list_key("p2", "virions")),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::NamespaceMismatch));
}

#[test]
fn corrupt_records_are_rejected_on_read() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let key = doc("p1", "virions", "ts_01");
    repo.import_particles(&key, ParticlesVersion::Unbinned, &records(&[1]))
        .unwrap();

    let binned_json = serde_json::to_string(&ParticleRecord::from(
        Particle3D::binned(1, 2, 3, 4.0).unwrap(),
    ))
    .unwrap();
    conn.execute(
        "UPDATE particles SET record = ?1 WHERE doc_key = 'p1/virions/ts_01';",
        [binned_json],
    )
    .unwrap();
    let err = repo.get_particles(&key).unwrap_err();
    match err {
        StoreError::CorruptRecord { key, .. } => assert_eq!(key, "p1/virions/ts_01#1"),
        other => panic!("unexpected error: {other}"),
    }

    conn.execute(
        "UPDATE particles SET record = '{\"kind\":\"4d\"}' WHERE doc_key = 'p1/virions/ts_01';",
        [],
    )
    .unwrap();
    assert!(matches!(
        repo.get_particles(&key).unwrap_err(),
        StoreError::CorruptRecord { .. }
    ));

    // Counting does not decode records.
    assert_eq!(repo.count(&key).unwrap(), 1);
}

#[test]
fn import_from_stale_snapshot_drops_concurrent_add() {
    let conn = open_db_in_memory().unwrap();
    let repo = repo(&conn);
    let key = doc("p1", "virions", "ts_01");
    repo.import_particles(&key, ParticlesVersion::Unbinned, &records(&[1, 2]))
        .unwrap();

    let snapshot = repo.get_particles(&key).unwrap();
    assert_eq!(repo.add_particle(&key, || virion(30)).unwrap(), 3);

    // Import is last-writer-wins and takes no allocation lock.
    repo.import_particles(&key, snapshot.version, &snapshot.particles)
        .unwrap();
    assert_eq!(repo.count(&key).unwrap(), 2);
    assert_eq!(repo.add_particle(&key, || virion(40)).unwrap(), 3);
}
