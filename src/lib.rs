#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod store;
pub mod table;

pub use store::EMPTY_KEY;
pub use store::NOT_FOUND;
pub use table::BatchTable;
pub use table::MAX_LOAD_FACTOR;
pub use table::MIN_LOAD_FACTOR;
pub use table::TableError;
