use std::collections::{BTreeSet, HashSet};
use std::hash::BuildHasher;

use crate::tree::TreeSnapshot;

/// Narrow lookup capability used when locating a patch anchor.
/// 尋找修補錨點時所需的最小查詢介面。
///
/// A rendering layer implements this over whatever it has actually
/// materialized, so reconciliation never needs to inspect its view handles.
pub trait NodeLookupProvider {
    fn contains_node(&self, identifier: &str) -> bool;
}

impl NodeLookupProvider for TreeSnapshot {
    fn contains_node(&self, identifier: &str) -> bool {
        self.contains(identifier)
    }
}

impl<S: BuildHasher> NodeLookupProvider for HashSet<String, S> {
    fn contains_node(&self, identifier: &str) -> bool {
        self.contains(identifier)
    }
}

impl NodeLookupProvider for BTreeSet<String> {
    fn contains_node(&self, identifier: &str) -> bool {
        self.contains(identifier)
    }
}

impl<T: NodeLookupProvider + ?Sized> NodeLookupProvider for &T {
    fn contains_node(&self, identifier: &str) -> bool {
        (**self).contains_node(identifier)
    }
}
