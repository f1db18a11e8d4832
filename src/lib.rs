#![deny(missing_docs)]
//! `litelog` is an embedded, persistent key/value store organized as a
//! log-structured hash table in the Bitcask style. Values live in an
//! append-only segmented log on disk; a process-resident [`KeyDir`] maps
//! each live key to the segment and offset of its newest record, giving
//! O(1) point lookups. A background merger periodically compacts sealed
//! segments to reclaim dead records.
//!
//! ```no_run
//! # fn main() -> litelog::Result<()> {
//! let store = litelog::Store::open("/tmp/litelog-example")?;
//! store.write(b"hello", b"world")?;
//! assert_eq!(store.read(b"hello")?, b"world");
//! store.close()?;
//! # Ok(())
//! # }
//! ```

mod error;
mod keydir;
mod log;
mod lru;
mod merger;
mod options;
mod record;
mod segment;
mod store;

pub use error::{Error, Result};
pub use options::StoreOptions;
pub use store::Store;
