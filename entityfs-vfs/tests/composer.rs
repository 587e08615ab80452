//! End-to-end scenarios over the composed tree (`spec.md` §8), driven
//! through the public `Composer` capability surface rather than raw SQL.

use std::sync::Arc;

use entityfs_core::cancel::CancellationToken;
use entityfs_core::config::Config;
use entityfs_storage::StorageEngine;
use entityfs_vfs::{Composer, DirEntryType, NodeType, OpenFlags, VfsError};

fn composer() -> Composer {
    let engine = Arc::new(StorageEngine::open_in_memory().unwrap());
    Composer::new(engine, Config::default(), ":memory:".to_string()).unwrap()
}

fn path(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn write_all(composer: &Composer, parts: &[&str], content: &[u8]) {
    let handle = composer.open_file(&path(parts), OpenFlags::default()).unwrap();
    handle.write(0, content).unwrap();
    handle.flush().unwrap();
    handle.release(false).unwrap();
}

#[test]
fn basic_write_read_round_trips() {
    let composer = composer();
    write_all(&composer, &["entities", "all", "e", "a"], b"hello world\n");
    let handle = composer
        .open_file(&path(&["entities", "all", "e", "a"]), OpenFlags::default())
        .unwrap();
    assert_eq!(handle.read(0, 4096).unwrap(), b"hello world\n");
}

#[test]
fn directory_lifecycle_matches_spec_scenario_seven() {
    let composer = composer();
    let d = path(&["entities", "all", "e", "d"]);
    composer.mkdir(&d).unwrap();
    composer.remove(&d, true).unwrap();
    write_all(&composer, &["entities", "all", "e", "d"], b"x");
    let handle = composer.open_file(&d, OpenFlags::default()).unwrap();
    assert_eq!(handle.read(0, 10).unwrap(), b"x");

    let f = path(&["entities", "all", "e", "f"]);
    write_all(&composer, &["entities", "all", "e", "f"], b"y");
    composer.remove(&f, false).unwrap();
    composer.mkdir(&f).unwrap();
    let attr = composer.attr(&f).unwrap();
    assert_eq!(attr.kind, NodeType::Directory);
}

#[test]
fn namespaces_isolate_the_same_entity_and_filename() {
    let composer = composer();
    write_all(&composer, &["entities", "all", "e", "a"], b"hello\n");
    write_all(
        &composer,
        &["namespace", "x", "entities", "all", "e", "a"],
        b"world\n",
    );
    composer
        .remove(&path(&["entities", "all", "e", "a"]), false)
        .unwrap();

    let err = composer
        .open_file(&path(&["entities", "all", "e", "a"]), OpenFlags::default())
        .unwrap_err();
    assert!(matches!(err, VfsError::NotFound(_)));

    let handle = composer
        .open_file(
            &path(&["namespace", "x", "entities", "all", "e", "a"]),
            OpenFlags::default(),
        )
        .unwrap();
    assert_eq!(handle.read(0, 16).unwrap(), b"world\n");
}

#[test]
fn query_all_shard_link_list_forms_agree_on_membership() {
    let composer = composer();
    write_all(&composer, &["entities", "all", "homer", "religion"], b"Pastafarian");
    write_all(&composer, &["entities", "all", "marge", "religion"], b"Presbyterian");

    let cancel = CancellationToken::new();
    let query_all = composer
        .readdir(&path(&["query", "religion=Pastafarian", "all"]), &cancel)
        .unwrap();
    assert_eq!(query_all.len(), 1);
    assert_eq!(query_all[0].name, "homer");
    assert_eq!(query_all[0].kind, DirEntryType::Directory);

    let link_target = composer
        .readlink(&path(&["entities", "link", "homer"]))
        .unwrap();

    let list_handle = composer
        .open_file(&path(&["query", "religion=Pastafarian", "list"]), OpenFlags::default())
        .unwrap();
    let listed = String::from_utf8(list_handle.read(0, 4096).unwrap()).unwrap();
    assert!(listed.contains(&link_target));
}

#[test]
fn forbidden_filenames_are_refused_under_entities_and_query() {
    let composer = composer();
    let err = composer
        .open_file(
            &path(&["entities", "all", "homer", ".DS_Store"]),
            OpenFlags::default(),
        )
        .unwrap_err();
    assert!(matches!(err, VfsError::ForbiddenName(_)));
}

#[test]
fn revision_conflict_surfaces_through_open_write_flush() {
    let composer = composer();
    write_all(&composer, &["entities", "all", "e", "a"], b"first");

    let stale = composer
        .open_file(&path(&["entities", "all", "e", "a"]), OpenFlags::default())
        .unwrap();
    stale.read(0, 16).unwrap();
    write_all(&composer, &["entities", "all", "e", "a"], b"second");

    stale.write(0, b"third").unwrap();
    let err = stale.flush().unwrap_err();
    assert!(matches!(err, VfsError::Storage(_)));
}

#[test]
fn readdir_reports_service_namespace_entities_query_subtrees() {
    let composer = composer();
    let cancel = CancellationToken::new();
    let mut names: Vec<String> = composer
        .readdir(&[], &cancel)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["entities", "namespace", "query", "service"]);

    let service_entries = composer.readdir(&path(&["service"]), &cancel).unwrap();
    assert!(service_entries.iter().any(|e| e.name == "pid"));
    assert!(service_entries.iter().any(|e| e.name == "stats" && e.kind == DirEntryType::Directory));
}
