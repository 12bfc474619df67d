use std::fmt::Debug;
use std::mem;

use thiserror::Error;
use tracing::{debug, trace};

// https://en.wikipedia.org/wiki/B-tree
// A B-tree with minimum degree t (the CLRS convention) bounds every node to
// t-1..=2t-1 keys; internal nodes always hold one more child than keys.

// For a node with n keys we have the following:
// A root node when it is a leaf node: min 0 max 2t-1 keys, no children
// A root node when it is an internal node: min 1 max 2t-1 keys, n+1 children
// Any other internal node: min t-1 max 2t-1 keys, n+1 children
// Any other leaf node: min t-1 max 2t-1 keys, no children
// All leaves sit at the same depth.

// Insertion is preemptive: a full node is split before the descent enters it,
// so insert_non_full never meets a full node. Deletion is preemptive the same
// way: a minimally-filled child is refilled (borrow or merge) before the
// descent enters it, so deletion never re-ascends to repair a deficient node.

/// Errors surfaced by the tree's public operations.
///
/// Not-found conditions are ordinary results, never panics; capacity overruns
/// would be programming errors and are checked with debug assertions instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The minimum degree passed at construction was below 2.
    #[error("minimum degree must be at least 2, got {degree}")]
    InvalidDegree { degree: usize },
    /// The key targeted by a delete is not in the tree.
    #[error("key not found in tree")]
    KeyNotFound,
    /// A delete was attempted on a tree with no root.
    #[error("cannot delete from an empty tree")]
    EmptyTree,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BTree<T: Ord + Clone + Debug> {
    root: Option<Box<Node<T>>>,
    t: usize,
    allow_duplicates: bool,
}

// Key and child storage is allocated once, at node creation, sized for the
// node's maximum fill (2t-1 keys, 2t children). No operation grows it past
// that bound, so the buffers never reallocate.
#[derive(Clone, Debug, PartialEq)]
struct Node<T: Ord + Clone + Debug> {
    keys: Vec<T>,
    children: Vec<Box<Node<T>>>,
    leaf: bool,
    t: usize,
}

impl<T: Ord + Clone + Debug> BTree<T> {
    /// Creates an empty B-tree with minimum degree `t`.
    ///
    /// Duplicate keys are rejected: inserting a key already in the tree is a
    /// no-op that returns `false`. Use [`BTree::with_duplicates`] for the
    /// multiset variant.
    ///
    /// Returns `Error::InvalidDegree` for `t < 2`: a degree-1 node could not
    /// hold any keys once split.
    pub fn new(t: usize) -> Result<Self, Error> {
        Self::with_policy(t, false)
    }

    /// Creates an empty B-tree with minimum degree `t` that admits duplicate
    /// keys. The insertion descent places equal keys without checking for an
    /// existing occurrence; a delete removes one occurrence at a time.
    pub fn with_duplicates(t: usize) -> Result<Self, Error> {
        Self::with_policy(t, true)
    }

    fn with_policy(t: usize, allow_duplicates: bool) -> Result<Self, Error> {
        if t < 2 {
            return Err(Error::InvalidDegree { degree: t });
        }
        Ok(BTree { root: None, t, allow_duplicates })
    }

    /// The minimum degree the tree was created with.
    pub fn degree(&self) -> usize {
        self.t
    }

    /// Whether the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Searches for a key, returning true if it is present.
    pub fn search(&self, key: &T) -> bool {
        // Walk down iteratively; search never mutates, so no recursion needed
        let mut node = match &self.root {
            Some(root) => root.as_ref(),
            None => return false,
        };
        loop {
            let (found, idx) = node.find_slot(key);
            if found {
                return true;
            }
            if node.leaf {
                return false;
            }
            node = &node.children[idx];
        }
    }

    /// Inserts a key into the tree.
    ///
    /// Returns false (and leaves the tree untouched) when the key is already
    /// present and the tree rejects duplicates; true otherwise.
    pub fn insert(&mut self, key: T) -> bool {
        if !self.allow_duplicates && self.search(&key) {
            return false;
        }

        let Some(root) = self.root.as_mut() else {
            // First insertion: the key becomes the root, a single-key leaf
            let mut node = Node::new(self.t, true);
            node.keys.push(key);
            self.root = Some(Box::new(node));
            return true;
        };

        if root.is_full() {
            // A full root is split before any descent. This is the only point
            // where the tree gains a level: the old root becomes the sole
            // child of a fresh internal root, which the split then populates.
            debug!("root is full, splitting; tree height increases by one");
            let old_root = self.root.take().expect("root checked above");
            let mut new_root = Node::new(self.t, false);
            new_root.children.push(old_root);
            new_root.split_child(0);

            // The promoted key decides which of the two halves receives the
            // new key
            let idx = usize::from(new_root.keys[0] < key);
            new_root.children[idx].insert_non_full(key);
            self.root = Some(Box::new(new_root));
        } else {
            root.insert_non_full(key);
        }
        true
    }

    /// Deletes a key from the tree.
    ///
    /// Returns `Error::EmptyTree` when the tree has no root and
    /// `Error::KeyNotFound` when the key is absent; in both cases the tree is
    /// left unmodified. Membership is checked before the mutating descent so
    /// that a failed delete cannot leave preemptive fills behind.
    pub fn delete(&mut self, key: &T) -> Result<(), Error> {
        if self.root.is_none() {
            return Err(Error::EmptyTree);
        }
        if !self.search(key) {
            return Err(Error::KeyNotFound);
        }

        let root = self.root.as_mut().expect("root checked above");
        root.delete(key);

        // The root is the one node allowed to drop below minimum fill. When
        // it runs out of keys entirely it is discarded: an internal root is
        // replaced by its sole remaining child (the tree shrinks one level),
        // a leaf root by the empty tree.
        if root.keys.is_empty() {
            let mut old_root = self.root.take().expect("root checked above");
            if old_root.leaf {
                debug!("last key deleted, tree is now empty");
            } else {
                debug!("root emptied, tree height decreases by one");
                self.root = Some(old_root.children.remove(0));
            }
        }
        Ok(())
    }

    /// Returns an in-order iterator over the keys, ascending.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new(self.root.as_deref())
    }

    /// Collects the full key sequence in ascending order.
    pub fn traverse(&self) -> Vec<&T> {
        self.iter().collect()
    }

    /// Renders a hierarchical dump of the tree, one line per node with the
    /// node's level and key list, leaves marked `(Leaf)`. Diagnostic only;
    /// the layout it shows (beyond key order) is not part of the contract.
    pub fn structure(&self) -> String {
        let mut out = String::new();
        match &self.root {
            Some(root) => root.write_structure(&mut out, 0),
            None => out.push_str("Tree is empty"),
        }
        out
    }
}

impl<'a, T: Ord + Clone + Debug> IntoIterator for &'a BTree<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<T: Ord + Clone + Debug> Node<T> {
    fn new(t: usize, leaf: bool) -> Self {
        Node {
            keys: Vec::with_capacity(2 * t - 1),
            children: if leaf { Vec::new() } else { Vec::with_capacity(2 * t) },
            leaf,
            t,
        }
    }

    fn max_keys(&self) -> usize {
        2 * self.t - 1
    }

    fn is_full(&self) -> bool {
        self.keys.len() == self.max_keys()
    }

    /// Locates `key` within this node's key slots.
    ///
    /// Returns (true, idx) when keys[idx] equals the key, otherwise
    /// (false, idx) where idx is the first slot holding a greater key, which
    /// is both the insertion point and the child the key belongs under.
    fn find_slot(&self, key: &T) -> (bool, usize) {
        match self.keys.binary_search(key) {
            Ok(idx) => (true, idx),
            Err(idx) => (false, idx),
        }
    }

    /// Inserts a key below this node, splitting any full child before
    /// descending into it. Must only be called on a non-full node.
    fn insert_non_full(&mut self, key: T) {
        debug_assert!(!self.is_full(), "insert_non_full entered a full node");
        let (_, mut idx) = self.find_slot(&key);

        if self.leaf {
            // Base case: slot the key into place; the node has room
            self.keys.insert(idx, key);
        } else {
            if self.children[idx].is_full() {
                self.split_child(idx);
                // The promoted key now sits at idx; step right if the new key
                // belongs in the upper half
                if self.keys[idx] < key {
                    idx += 1;
                }
            }
            self.children[idx].insert_non_full(key);
        }
    }

    /// Splits the full child at `idx` into two minimally-filled nodes.
    ///
    /// The child keeps its lower t-1 keys, a new right sibling takes the
    /// upper t-1 (and, for internal children, the upper t children), and the
    /// middle key moves up into this node at `idx`. This is the only
    /// operation that creates nodes besides the root.
    fn split_child(&mut self, idx: usize) {
        let t = self.t;
        let child = &mut self.children[idx];
        debug_assert!(child.is_full(), "split_child called on a non-full child");

        let mut right = Node::new(t, child.leaf);
        right.keys.extend(child.keys.drain(t..));
        if !child.leaf {
            right.children.extend(child.children.drain(t..));
        }
        let middle = child.keys.pop().expect("full child missing its middle key");

        trace!(key = ?middle, "split child, promoting middle key");
        self.keys.insert(idx, middle);
        self.children.insert(idx + 1, Box::new(right));
        debug_assert!(self.keys.len() <= self.max_keys(), "split overfilled the parent");
    }

    /// Deletes a key from the subtree rooted at this node.
    ///
    /// Every child this descends into is guaranteed at least t keys first
    /// (via fill), so no ancestor ever needs repairing afterwards. The key is
    /// known to be present; reaching a leaf without finding it means the
    /// caller skipped the membership check.
    fn delete(&mut self, key: &T) {
        let t = self.t;
        let (found, idx) = self.find_slot(key);

        if found {
            if self.leaf {
                // The key sits in a leaf: remove it directly
                self.keys.remove(idx);
            } else if self.children[idx].keys.len() >= t {
                // Replace the key with its in-order predecessor, then delete
                // the predecessor from the left subtree (which can afford to
                // lose a key)
                let pred = self.children[idx].max_key().clone();
                self.children[idx].delete(&pred);
                self.keys[idx] = pred;
            } else if self.children[idx + 1].keys.len() >= t {
                // Symmetric: the successor from the right subtree
                let succ = self.children[idx + 1].min_key().clone();
                self.children[idx + 1].delete(&succ);
                self.keys[idx] = succ;
            } else {
                // Both neighbors are at minimum fill: fold the key and the
                // right child into the left child, then delete from the
                // merged node
                self.merge_children(idx);
                self.children[idx].delete(key);
            }
        } else if !self.leaf {
            // The key lives further down. Refill the target child first so
            // the recursion never enters a minimally-filled node.
            let was_last = idx == self.keys.len();
            if self.children[idx].keys.len() < t {
                self.fill(idx);
            }
            // A merge to the left absorbs the last child; follow it there
            if was_last && idx > self.keys.len() {
                self.children[idx - 1].delete(key);
            } else {
                self.children[idx].delete(key);
            }
        }
        // Not found in a leaf: nothing to do, the public delete has already
        // reported KeyNotFound before descending
    }

    /// Restores the child at `idx` to at least t keys, preferring a borrow
    /// from the left sibling, then the right, then a merge.
    fn fill(&mut self, idx: usize) {
        let t = self.t;
        if idx > 0 && self.children[idx - 1].keys.len() >= t {
            self.borrow_from_prev(idx);
        } else if idx < self.keys.len() && self.children[idx + 1].keys.len() >= t {
            self.borrow_from_next(idx);
        } else if idx < self.keys.len() {
            // Neither sibling can lend; merge with the right sibling when one
            // exists, else with the left
            self.merge_children(idx);
        } else {
            self.merge_children(idx - 1);
        }
    }

    /// Rotates one key through the parent from the left sibling: the
    /// sibling's last key moves up into this node, and the separating key
    /// moves down to lead the child (together with the sibling's last child,
    /// when internal).
    fn borrow_from_prev(&mut self, idx: usize) {
        trace!(idx, "borrowing from left sibling");
        let sibling = &mut self.children[idx - 1];
        let lent_key = sibling.keys.pop().expect("lending sibling has no keys");
        let lent_child = if sibling.leaf {
            None
        } else {
            Some(sibling.children.pop().expect("lending sibling has no children"))
        };

        let separator = mem::replace(&mut self.keys[idx - 1], lent_key);
        let child = &mut self.children[idx];
        child.keys.insert(0, separator);
        if let Some(grandchild) = lent_child {
            child.children.insert(0, grandchild);
        }
    }

    /// Mirror of `borrow_from_prev`: the right sibling's first key moves up,
    /// the separating key moves down to trail the child.
    fn borrow_from_next(&mut self, idx: usize) {
        trace!(idx, "borrowing from right sibling");
        let sibling = &mut self.children[idx + 1];
        let lent_key = sibling.keys.remove(0);
        let lent_child = if sibling.leaf {
            None
        } else {
            Some(sibling.children.remove(0))
        };

        let separator = mem::replace(&mut self.keys[idx], lent_key);
        let child = &mut self.children[idx];
        child.keys.push(separator);
        if let Some(grandchild) = lent_child {
            child.children.push(grandchild);
        }
    }

    /// Merges the child at `idx`, the separating key at `idx`, and the child
    /// at `idx + 1` into a single node. The inverse of a split: this node
    /// loses one key and one child, and the absorbed sibling is freed.
    fn merge_children(&mut self, idx: usize) {
        trace!(idx, "merging children around separator");
        let separator = self.keys.remove(idx);
        let mut right = self.children.remove(idx + 1);

        let left = &mut self.children[idx];
        left.keys.push(separator);
        left.keys.append(&mut right.keys);
        if !left.leaf {
            left.children.append(&mut right.children);
        }
        debug_assert!(left.keys.len() <= left.max_keys(), "merge overfilled a node");
        // The absorbed right sibling drops here
    }

    /// The largest key in the subtree rooted at this node.
    fn max_key(&self) -> &T {
        let mut node = self;
        while !node.leaf {
            node = node.children.last().expect("internal node missing children");
        }
        node.keys.last().expect("leaf node holds no keys")
    }

    /// The smallest key in the subtree rooted at this node.
    fn min_key(&self) -> &T {
        let mut node = self;
        while !node.leaf {
            node = node.children.first().expect("internal node missing children");
        }
        node.keys.first().expect("leaf node holds no keys")
    }

    fn write_structure(&self, out: &mut String, level: usize) {
        let indent = "    ".repeat(level);
        let keys = self
            .keys
            .iter()
            .map(|k| format!("{k:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        let marker = if self.leaf { " (Leaf)" } else { "" };
        out.push_str(&format!("{indent}Level {level}: [{keys}]{marker}\n"));

        for child in &self.children {
            child.write_structure(out, level + 1);
        }
    }
}

/// In-order iterator over a tree's keys.
///
/// Holds an explicit stack of (node, next key slot) frames instead of
/// recursing, so iteration state can live across `next` calls. The stack
/// depth equals the tree height.
pub struct Iter<'a, T: Ord + Clone + Debug> {
    stack: Vec<(&'a Node<T>, usize)>,
}

impl<'a, T: Ord + Clone + Debug> Iter<'a, T> {
    fn new(root: Option<&'a Node<T>>) -> Self {
        let mut iter = Iter { stack: Vec::new() };
        if let Some(node) = root {
            iter.push_left_spine(node);
        }
        iter
    }

    // Queue up the path to the smallest key below `node`: every node on the
    // way down contributes a frame starting at its first key slot
    fn push_left_spine(&mut self, mut node: &'a Node<T>) {
        loop {
            self.stack.push((node, 0));
            if node.leaf {
                break;
            }
            node = &node.children[0];
        }
    }
}

impl<'a, T: Ord + Clone + Debug> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        loop {
            let (node, idx) = self.stack.pop()?;
            if idx == node.keys.len() {
                // Node exhausted; resume its parent
                continue;
            }
            self.stack.push((node, idx + 1));
            if !node.leaf {
                // The subtree between this key and the next comes first
                self.push_left_spine(&node.children[idx + 1]);
            }
            return Some(&node.keys[idx]);
        }
    }
}

#[cfg(test)]
impl<T: Ord + Clone + Debug> BTree<T> {
    /// Walks the whole tree and asserts every structural invariant: fill
    /// bounds, child counts, per-node sortedness, uniform leaf depth, and
    /// global key ordering.
    fn check_invariants(&self) {
        if let Some(root) = &self.root {
            assert!(
                !root.keys.is_empty(),
                "a non-empty tree's root must hold at least one key"
            );
            root.check(self.t, true);
        }

        let keys = self.traverse();
        for pair in keys.windows(2) {
            if self.allow_duplicates {
                assert!(pair[0] <= pair[1], "traversal out of order: {pair:?}");
            } else {
                assert!(pair[0] < pair[1], "traversal not strictly ascending: {pair:?}");
            }
        }
    }
}

#[cfg(test)]
impl<T: Ord + Clone + Debug> Node<T> {
    /// Validates this subtree, returning its leaf depth.
    fn check(&self, t: usize, is_root: bool) -> usize {
        if !is_root {
            assert!(self.keys.len() >= t - 1, "node below minimum fill: {:?}", self.keys);
        }
        assert!(self.keys.len() <= 2 * t - 1, "node above maximum fill: {:?}", self.keys);
        for pair in self.keys.windows(2) {
            assert!(pair[0] <= pair[1], "node keys out of order: {:?}", self.keys);
        }

        if self.leaf {
            assert!(self.children.is_empty(), "leaf node owns children");
            return 1;
        }

        assert_eq!(
            self.children.len(),
            self.keys.len() + 1,
            "internal node child count must be key count + 1"
        );
        let depths: Vec<usize> = self.children.iter().map(|c| c.check(t, false)).collect();
        assert!(
            depths.windows(2).all(|d| d[0] == d[1]),
            "leaves at unequal depths: {depths:?}"
        );
        depths[0] + 1
    }
}
