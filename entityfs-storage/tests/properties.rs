use entityfs_storage::{DeletionType, StorageEngine, WriteRequest};
use proptest::prelude::*;

fn write_any(engine: &StorageEngine, entity_id: &str, data: &[u8]) {
    engine
        .write_or_delete(WriteRequest {
            namespace: "ns",
            entity_id,
            filename: "f",
            old_revision: "",
            tombstone: false,
            data,
            authorship_metadata: None,
            directory: false,
            deletion_type: DeletionType::Any,
        })
        .unwrap();
}

proptest! {
    /// Invariant: read-back bytes always equal what was written, for any
    /// mix of whitespace and non-whitespace bytes the partitioner sees.
    #[test]
    fn write_read_round_trips_for_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let engine = StorageEngine::open_in_memory().unwrap();
        write_any(&engine, "e", &data);
        let contents = engine.read_file("ns", "e", "f").unwrap();
        prop_assert_eq!(contents.data, data);
    }

    /// Invariant: data_length always equals the written byte count, and
    /// trimmed_length never exceeds it.
    #[test]
    fn lengths_are_consistent(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let engine = StorageEngine::open_in_memory().unwrap();
        let header = engine.write_or_delete(WriteRequest {
            namespace: "ns",
            entity_id: "e",
            filename: "f",
            old_revision: "",
            tombstone: false,
            data: &data,
            authorship_metadata: None,
            directory: false,
            deletion_type: DeletionType::Any,
        }).unwrap();
        prop_assert_eq!(header.data_length as usize, data.len());
        prop_assert!(header.trimmed_length <= header.data_length);
    }

    /// Invariant: re-writing identical bytes never changes the row_guid.
    #[test]
    fn identical_rewrite_is_a_no_op(data in proptest::collection::vec(any::<u8>(), 0..128)) {
        let engine = StorageEngine::open_in_memory().unwrap();
        let first = engine.write_or_delete(WriteRequest {
            namespace: "ns", entity_id: "e", filename: "f", old_revision: "",
            tombstone: false, data: &data, authorship_metadata: None,
            directory: false, deletion_type: DeletionType::Any,
        }).unwrap();
        let second = engine.write_or_delete(WriteRequest {
            namespace: "ns", entity_id: "e", filename: "f", old_revision: "",
            tombstone: false, data: &data, authorship_metadata: None,
            directory: false, deletion_type: DeletionType::Any,
        }).unwrap();
        prop_assert_eq!(first.row_guid, second.row_guid);
    }
}
