//! # storage-adapters
//!
//! Concrete implementations of the `domains` ports:
//! - `apk`: Android manifest reader ([`apk::ApkManifestReader`]).
//! - `memory`: in-process repositories and transactions.
//! - `postgres` (feature `db-postgres`): `sqlx` repositories and transactions.
//! - `storage`: object stores (in-memory, local filesystem, S3-compatible).

pub mod apk;
pub mod memory;
#[cfg(feature = "db-postgres")]
pub mod postgres;
pub mod storage;

pub use apk::ApkManifestReader;
pub use memory::MemoryDatabase;
#[cfg(feature = "db-postgres")]
pub use postgres::PgDatabase;
pub use storage::memory::MemoryObjectStore;
