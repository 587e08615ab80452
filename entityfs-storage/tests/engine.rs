use entityfs_core::cancel::CancellationToken;
use entityfs_storage::{DeletionType, StorageEngine, StorageError, WriteRequest};

fn write(
    engine: &StorageEngine,
    namespace: &str,
    entity_id: &str,
    filename: &str,
    data: &[u8],
    deletion_type: DeletionType,
) -> entityfs_storage::StorageResult<entityfs_storage::FileHeader> {
    engine.write_or_delete(WriteRequest {
        namespace,
        entity_id,
        filename,
        old_revision: "",
        tombstone: false,
        data,
        authorship_metadata: None,
        directory: false,
        deletion_type,
    })
}

#[test]
fn write_then_read_round_trips() {
    let engine = StorageEngine::open_in_memory().unwrap();
    write(
        &engine,
        "simpsons",
        "homer",
        "religion",
        b"  Pastafarian  ",
        DeletionType::None,
    )
    .unwrap();

    let contents = engine.read_file("simpsons", "homer", "religion").unwrap();
    assert_eq!(contents.data, b"  Pastafarian  ");
    assert_eq!(contents.header.trimmed_length, "Pastafarian".len() as i64);
}

#[test]
fn rewrite_without_replace_guard_conflicts() {
    let engine = StorageEngine::open_in_memory().unwrap();
    write(&engine, "ns", "bart", "age", b"10", DeletionType::None).unwrap();
    let err = write(&engine, "ns", "bart", "age", b"11", DeletionType::None).unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists { .. }));
}

#[test]
fn replace_with_any_overwrites() {
    let engine = StorageEngine::open_in_memory().unwrap();
    write(&engine, "ns", "bart", "age", b"10", DeletionType::None).unwrap();
    write(&engine, "ns", "bart", "age", b"11", DeletionType::Any).unwrap();
    let contents = engine.read_file("ns", "bart", "age").unwrap();
    assert_eq!(contents.data, b"11");
}

#[test]
fn touch_rm_mkdir_same_name_succeeds() {
    let engine = StorageEngine::open_in_memory().unwrap();
    write(&engine, "ns", "lisa", "note", b"hi", DeletionType::None).unwrap();

    engine
        .write_or_delete(WriteRequest {
            namespace: "ns",
            entity_id: "lisa",
            filename: "note",
            old_revision: "",
            tombstone: true,
            data: b"",
            authorship_metadata: None,
            directory: false,
            deletion_type: DeletionType::Any,
        })
        .unwrap();

    engine
        .write_or_delete(WriteRequest {
            namespace: "ns",
            entity_id: "lisa",
            filename: "note",
            old_revision: "",
            tombstone: false,
            data: b"",
            authorship_metadata: None,
            directory: true,
            deletion_type: DeletionType::None,
        })
        .unwrap();

    let entity = engine.get_entity("ns", "lisa").unwrap();
    assert_eq!(entity.len(), 1);
    assert!(entity[0].directory);
}

#[test]
fn delete_of_absent_file_is_not_found() {
    let engine = StorageEngine::open_in_memory().unwrap();
    let err = engine
        .write_or_delete(WriteRequest {
            namespace: "ns",
            entity_id: "maggie",
            filename: "missing",
            old_revision: "",
            tombstone: true,
            data: b"",
            authorship_metadata: None,
            directory: false,
            deletion_type: DeletionType::Any,
        })
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[test]
fn revision_conflict_is_detected() {
    let engine = StorageEngine::open_in_memory().unwrap();
    write(&engine, "ns", "bart", "age", b"10", DeletionType::None).unwrap();
    let err = engine
        .write_or_delete(WriteRequest {
            namespace: "ns",
            entity_id: "bart",
            filename: "age",
            old_revision: "not-the-real-guid",
            tombstone: false,
            data: b"11",
            authorship_metadata: None,
            directory: false,
            deletion_type: DeletionType::Any,
        })
        .unwrap_err();
    assert!(matches!(err, StorageError::RevisionConflict { .. }));
}

#[test]
fn no_op_rewrite_coalesces_row_guid() {
    let engine = StorageEngine::open_in_memory().unwrap();
    let first = write(&engine, "ns", "bart", "age", b"10", DeletionType::None).unwrap();
    let second = engine
        .write_or_delete(WriteRequest {
            namespace: "ns",
            entity_id: "bart",
            filename: "age",
            old_revision: "",
            tombstone: false,
            data: b"10",
            authorship_metadata: None,
            directory: false,
            deletion_type: DeletionType::Any,
        })
        .unwrap();
    assert_eq!(first.row_guid, second.row_guid);
}

#[test]
fn type_conflict_between_file_and_directory() {
    let engine = StorageEngine::open_in_memory().unwrap();
    write(&engine, "ns", "bart", "scratch", b"", DeletionType::None).unwrap();
    let err = engine
        .write_or_delete(WriteRequest {
            namespace: "ns",
            entity_id: "bart",
            filename: "scratch",
            old_revision: "",
            tombstone: false,
            data: b"",
            authorship_metadata: None,
            directory: true,
            deletion_type: DeletionType::Dir,
        })
        .unwrap_err();
    assert!(matches!(err, StorageError::TypeConflict { .. }));
}

#[test]
fn namespaces_are_listed_distinctly() {
    let engine = StorageEngine::open_in_memory().unwrap();
    write(&engine, "simpsons", "homer", "religion", b"x", DeletionType::None).unwrap();
    write(&engine, "flanders", "ned", "religion", b"x", DeletionType::None).unwrap();
    let mut namespaces = engine.list_namespaces().unwrap();
    namespaces.sort();
    assert_eq!(namespaces, vec!["flanders".to_string(), "simpsons".to_string()]);
}

#[test]
fn stream_all_respects_cancellation() {
    let engine = StorageEngine::open_in_memory().unwrap();
    write(&engine, "ns", "a", "f", b"x", DeletionType::None).unwrap();
    write(&engine, "ns", "b", "f", b"x", DeletionType::None).unwrap();
    write(&engine, "ns", "c", "f", b"x", DeletionType::None).unwrap();

    let cancel = CancellationToken::new();
    let mut seen = Vec::new();
    let result = engine.stream_all("ns", &cancel, |entity_id| {
        seen.push(entity_id);
        if seen.len() == 1 {
            cancel.cancel();
        }
        Ok(())
    });
    assert!(matches!(result, Err(entityfs_storage::StorageError::Cancelled)));
    assert_eq!(seen.len(), 1);
}

#[test]
fn stream_query_matches_file_exists_clause() {
    let engine = StorageEngine::open_in_memory().unwrap();
    write(&engine, "simpsons", "homer", "religion", b"Pastafarian", DeletionType::None).unwrap();
    write(&engine, "simpsons", "marge", "hair", b"blue", DeletionType::None).unwrap();

    let clauses = entityfs_storage::query::parse("religion").unwrap();
    let cancel = CancellationToken::new();
    let mut matches = Vec::new();
    engine
        .stream_query("simpsons", &clauses, &cancel, |id| {
            matches.push(id);
            Ok(())
        })
        .unwrap();
    assert_eq!(matches, vec!["homer".to_string()]);
}

#[test]
fn database_metadata_reports_totals() {
    let engine = StorageEngine::open_in_memory().unwrap();
    write(&engine, "ns", "a", "f", b"hello", DeletionType::None).unwrap();
    let metadata = engine.get_database_metadata(false).unwrap();
    let totals = metadata.totals.unwrap();
    assert_eq!(totals.total_rows, 1);
    assert_eq!(totals.active_rows, 1);
    assert!(metadata.shard_key.is_some());
}

#[test]
fn persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entityfs.db");
    {
        let engine = StorageEngine::open(&path).unwrap();
        write(&engine, "ns", "homer", "religion", b"Pastafarian", DeletionType::None).unwrap();
    }
    let engine = StorageEngine::open(&path).unwrap();
    let contents = engine.read_file("ns", "homer", "religion").unwrap();
    assert_eq!(contents.data, b"Pastafarian");
}
