//! Access layer: the B+tree index and the record identifiers it stores.
//!
//! - **BPlusTree**: a disk-resident unique-key index over the buffer pool
//! - **RecordId**: opaque fixed-size identifier stored in leaf entries
//! - **KeyComparator**: pluggable total order over fixed-width key bytes

pub mod btree;
pub mod rid;

pub use btree::iterator::TreeIterator;
pub use btree::key::{BytesComparator, IntComparator, KeyComparator};
pub use btree::BPlusTree;
pub use rid::RecordId;
