//! Succinct-trie key index: construction, zero-copy view, iteration.

pub mod bits;
pub mod build;
pub mod iter;
pub mod trie;

pub use build::build_trie;
pub use iter::TrieIter;
pub use trie::LoudsTrie;
