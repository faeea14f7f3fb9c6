//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Default working directory of the network unit.
pub const NETWORK_DIR: &str = "./vpc";

/// Default working directory of the database unit.
pub const DATABASE_DIR: &str = "./database";

