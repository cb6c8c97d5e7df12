//! I/O module
//!
//! Handles fixture loading and account output.
//!
//! # Components
//!
//! - `csv_format` - Row formats, conversion into domain records, account output
//! - `loader` - Asynchronous fixture directory loading

pub mod csv_format;
pub mod loader;

pub use csv_format::write_accounts_csv;
pub use loader::{load_fixtures, Fixtures, ProviderFixture};
