//! Filename and entity-id validation shared by the storage engine (write-path
//! guards), the virtual tree (`Lookup` rejection), and the query parser
//! (clause `filename` tokens). All three must agree on exactly the same
//! grammar, so it lives here once.

use once_cell::sync::Lazy;
use regex::Regex;

static COMPONENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap());

/// A single path component (one segment of an attribute path, or an entity
/// id) is valid iff it matches `^[A-Za-z0-9_.-]+$` and does not start with
/// `-` (reserved for query-clause negation in the virtual path grammar).
pub fn is_valid_component(s: &str) -> bool {
    !s.is_empty() && !s.starts_with('-') && COMPONENT_RE.is_match(s)
}

/// An entity id is a single valid component.
pub fn is_valid_entity_id(s: &str) -> bool {
    is_valid_component(s)
}

/// An attribute path is slash-delimited, each component individually valid,
/// with no leading or trailing slash and no empty component.
pub fn is_valid_attribute_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return false;
    }
    path.split('/').all(is_valid_component)
}
