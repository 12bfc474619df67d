//! An in-memory B-tree engine: an order-`t` balanced multiway search tree
//! with full deletion support (borrow-from-sibling and merge).
//!
//! The tree is a single-owner structure: it exclusively owns its node graph,
//! holds no global state, and is driven by single-threaded calls. For
//! concurrent use, wrap the whole tree in an external lock.

pub mod b_tree;

pub use b_tree::{BTree, Error, Iter};
