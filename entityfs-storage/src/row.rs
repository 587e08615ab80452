//! The file row model (`spec.md` §3) and the header view returned by reads
//! and writes (everything but the content bytes).

/// Distinguishes how a deletion/write should treat an existing row at the
/// same `(namespace, entity_id, filename)` (`spec.md` §4.3 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionType {
    /// Plain write, no replace allowed: a present row is a conflict.
    None,
    /// Delete/replace a file; a present directory row is a conflict.
    File,
    /// Delete/replace a directory; a present non-directory row is a conflict.
    Dir,
    /// No type check: replace whatever is there.
    Any,
}

/// Metadata about a single file row, without content bytes. Returned by
/// `write_or_delete`, `read_file`, and `get_entity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub namespace: String,
    pub entity_id: String,
    pub filename: String,
    pub row_guid: String,
    pub timestamp_unix_nano: i64,
    pub tombstone: bool,
    pub directory: bool,
    pub data_length: i64,
    pub sha256: Vec<u8>,
    pub trimmed_length: i64,
    pub trimmed_sha256: Vec<u8>,
}

/// A file header together with its reconstructed content bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContents {
    pub header: FileHeader,
    pub data: Vec<u8>,
}

/// The full in-database row shape, used internally by the engine when
/// reading the currently-active row before deciding how to supersede it.
#[derive(Debug, Clone)]
pub(crate) struct ActiveRow {
    pub row_guid: String,
    pub directory: bool,
    pub tombstone: bool,
    pub timestamp_unix_nano: i64,
    pub whitespace_prefix: Option<Vec<u8>>,
    pub trimmed_data: Option<Vec<u8>>,
    pub whitespace_suffix: Option<Vec<u8>>,
    pub data_length: i64,
    pub sha256: Vec<u8>,
    pub trimmed_length: i64,
    pub trimmed_sha256: Vec<u8>,
}

impl ActiveRow {
    /// Reassemble the full byte content of this row (empty for directories
    /// and tombstones, whose content columns are always null).
    pub fn full_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data_length.max(0) as usize);
        if let Some(p) = &self.whitespace_prefix {
            out.extend_from_slice(p);
        }
        if let Some(t) = &self.trimmed_data {
            out.extend_from_slice(t);
        }
        if let Some(s) = &self.whitespace_suffix {
            out.extend_from_slice(s);
        }
        out
    }
}
