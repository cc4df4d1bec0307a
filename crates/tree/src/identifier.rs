use thiserror::Error;

/// Separator between identifier segments.
/// 識別碼區段之間的分隔符號。
pub const SEPARATOR: char = '.';

/// Reasons an identifier cannot be placed in the tree.
/// 識別碼無法放入樹狀結構的原因。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier `{identifier}` has an empty segment at position {position}")]
    EmptySegment { identifier: String, position: usize },
}

/// One validated segment of an identifier.
/// 已驗證的識別碼區段。
///
/// `end` is the byte offset where the prefix identifier ending in this
/// segment stops, so `&identifier[..end]` is the node identifier for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub name: &'a str,
    pub end: usize,
}

/// Splits an identifier into validated segments.
/// 將識別碼切分為已驗證的區段。
pub fn segments(identifier: &str) -> Result<Vec<Segment<'_>>, IdentifierError> {
    if identifier.is_empty() {
        return Err(IdentifierError::Empty);
    }

    let mut out = Vec::new();
    let mut start = 0usize;
    for (position, name) in identifier.split(SEPARATOR).enumerate() {
        if name.trim().is_empty() {
            return Err(IdentifierError::EmptySegment {
                identifier: identifier.to_string(),
                position,
            });
        }
        let end = start + name.len();
        out.push(Segment { name, end });
        start = end + SEPARATOR.len_utf8();
    }
    Ok(out)
}

/// Checks that an identifier is well formed.
/// 檢查識別碼格式是否正確。
pub fn validate(identifier: &str) -> Result<(), IdentifierError> {
    segments(identifier).map(|_| ())
}

/// Returns the parent identifier (empty for top-level identifiers).
/// 取得父節點識別碼；頂層節點回傳空字串。
pub fn parent_of(identifier: &str) -> &str {
    identifier
        .rsplit_once(SEPARATOR)
        .map(|(parent, _)| parent)
        .unwrap_or("")
}

/// Returns the last segment of an identifier.
/// 取得識別碼的最後一個區段。
pub fn name_of(identifier: &str) -> &str {
    identifier
        .rsplit_once(SEPARATOR)
        .map(|(_, name)| name)
        .unwrap_or(identifier)
}

/// Iterates the strict ancestors of an identifier, shortest first.
/// 由短至長列舉識別碼的所有祖先（不含自身）。
pub fn ancestors(identifier: &str) -> impl Iterator<Item = &str> + '_ {
    identifier
        .match_indices(SEPARATOR)
        .map(move |(offset, _)| &identifier[..offset])
}

/// Returns `true` when `identifier` equals `anchor` or lies below it.
/// 若識別碼等於錨點或位於其下方則回傳 `true`。
///
/// The empty anchor is the root and contains everything.
pub fn is_within(identifier: &str, anchor: &str) -> bool {
    if anchor.is_empty() {
        return true;
    }
    match identifier.strip_prefix(anchor) {
        Some("") => true,
        Some(rest) => rest.starts_with(SEPARATOR),
        None => false,
    }
}

/// Number of segments in an identifier (0 for the root).
/// 識別碼的區段數量（根節點為 0）。
pub fn depth(identifier: &str) -> usize {
    if identifier.is_empty() {
        0
    } else {
        identifier.matches(SEPARATOR).count() + 1
    }
}
