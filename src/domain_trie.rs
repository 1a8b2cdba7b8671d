use std::collections::HashMap;

struct DomainTrieNode<V> {
    children: HashMap<String, DomainTrieNode<V>>,
    values: Vec<V>,
}

/// Derives Default manually to avoid requiring V: Default, since all fields
/// default to empty regardless of V.
impl<V> Default for DomainTrieNode<V> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            values: Vec::new(),
        }
    }
}

/// Label-level trie keyed by domain suffix, TLD first.
///
/// Each node holds the values registered for the suffix spelled by the path
/// from the root (`"com"` -> `"notwild"` -> `"b"` for `b.notwild.com`), in
/// insertion order. Wildcard patterns are filed under the suffix that follows
/// their wildcard label, so finding the candidates for a hostname is a walk
/// over its labels rather than a scan of every pattern.
///
/// Labels are compared byte-for-byte; callers store and query lower-cased
/// names.
pub struct DomainTrie<V> {
    root: DomainTrieNode<V>,
    len: usize,
}

impl<V> Default for DomainTrie<V> {
    fn default() -> Self {
        Self {
            root: DomainTrieNode::default(),
            len: 0,
        }
    }
}

impl<V> DomainTrie<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value under `suffix`. An empty suffix files the value at the
    /// root.
    pub fn push(&mut self, suffix: &str, value: V) {
        self.walk_to_node(suffix).values.push(value);
        self.len += 1;
    }

    /// Values filed under exactly `suffix`, in insertion order.
    pub fn get(&self, suffix: &str) -> &[V] {
        let mut current = &self.root;
        if !suffix.is_empty() {
            for label in suffix.split('.').rev() {
                match current.children.get(label) {
                    Some(child) => current = child,
                    None => return &[],
                }
            }
        }
        &current.values
    }

    /// Every non-empty node on the path spelled by `name`, deepest first, each
    /// paired with the suffix of `name` it is filed under.
    pub fn suffixes<'a>(&'a self, name: &'a str) -> Vec<(&'a str, &'a [V])> {
        let mut found = vec![];
        if name.is_empty() {
            return found;
        }
        let mut current = &self.root;
        let mut start = name.len();
        for label in name.rsplit('.') {
            start -= label.len();
            match current.children.get(label) {
                Some(child) => current = child,
                None => break,
            }
            if !current.values.is_empty() {
                found.push((&name[start..], current.values.as_slice()));
            }
            start = start.saturating_sub(1);
        }
        found.reverse();
        found
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Walks (or creates) trie nodes for the given suffix, splitting by label
    /// in reverse order (TLD first), and returns the final node.
    fn walk_to_node(&mut self, suffix: &str) -> &mut DomainTrieNode<V> {
        let mut current = &mut self.root;
        if suffix.is_empty() {
            return current;
        }
        for label in suffix.split('.').rev() {
            current = current
                .children
                .entry(label.to_string())
                .or_insert_with(DomainTrieNode::default);
        }
        current
    }
}
