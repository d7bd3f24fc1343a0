//! Database connection management
//!
//! The pipeline owns its schema; this module only opens the pool with the
//! pragmas every racecast process relies on.

pub mod init;

pub use init::{init_database, init_memory_database};
