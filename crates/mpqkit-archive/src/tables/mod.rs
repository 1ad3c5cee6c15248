//! Lookup tables: hash table, block table and hi-block table
//!
//! The hash and block tables are encrypted with fixed keys derived from the
//! names `(hash table)` and `(block table)`. Once loaded they are immutable.

pub mod block_table;
pub mod hash_table;
pub mod hi_block_table;

pub use block_table::{BLOCK_ENTRY_SIZE, BlockEntry, BlockFlags, BlockTable};
pub use hash_table::{
    BLOCK_INDEX_DELETED, BLOCK_INDEX_FREE, FileLookup, HASH_ENTRY_SIZE, HashEntry, HashSlot,
    HashTable, LOCALE_NEUTRAL,
};
pub use hi_block_table::HiBlockTable;
