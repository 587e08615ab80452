//! Directory structure *within* a single entity: attributes and
//! directories are both rows (`spec.md` §3), so an entity's tree is
//! entirely derived from its `FileHeader` list by filename prefix.

use entityfs_storage::FileHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
}

fn join(path: &[String]) -> String {
    path.join("/")
}

/// Find the header at exactly `path` (namespace/entity already fixed by
/// the caller), if any.
pub fn find<'a>(headers: &'a [FileHeader], path: &[String]) -> Option<&'a FileHeader> {
    let full = join(path);
    headers.iter().find(|h| h.filename == full)
}

/// Direct children of `path` (root is `path == []`), deduplicated by name.
pub fn children(headers: &[FileHeader], path: &[String]) -> Vec<Entry> {
    let prefix = if path.is_empty() {
        String::new()
    } else {
        format!("{}/", join(path))
    };
    let mut names: Vec<Entry> = Vec::new();
    for header in headers {
        let Some(rest) = header.filename.strip_prefix(&prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let name = rest.split('/').next().unwrap();
        let is_leaf = name == rest;
        if names.iter().any(|e: &Entry| e.name == name) {
            continue;
        }
        let kind = if is_leaf {
            if header.directory {
                EntryKind::Directory
            } else {
                EntryKind::File
            }
        } else {
            // An intermediate component only exists because of a deeper
            // file; the directory row for it (if any) will also appear in
            // `headers` and overwrite this guess via the `is_leaf` branch
            // when that header is visited, so default to Directory.
            EntryKind::Directory
        };
        names.push(Entry {
            name: name.to_string(),
            kind,
        });
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(filename: &str, directory: bool) -> FileHeader {
        FileHeader {
            namespace: "ns".into(),
            entity_id: "e".into(),
            filename: filename.into(),
            row_guid: "g".into(),
            timestamp_unix_nano: 0,
            tombstone: false,
            directory,
            data_length: 0,
            sha256: vec![],
            trimmed_length: 0,
            trimmed_sha256: vec![],
        }
    }

    #[test]
    fn root_children_are_direct_only() {
        let headers = vec![header("a", false), header("b/c", false), header("b", true)];
        let mut names: Vec<String> = children(&headers, &[]).into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn nested_children_resolve_under_prefix() {
        let headers = vec![header("b/c", false), header("b", true)];
        let path = vec!["b".to_string()];
        let names: Vec<String> = children(&headers, &path).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["c".to_string()]);
    }

    #[test]
    fn find_matches_exact_filename() {
        let headers = vec![header("a", false), header("b/c", false)];
        let found = find(&headers, &["b".to_string(), "c".to_string()]).unwrap();
        assert_eq!(found.filename, "b/c");
    }
}
