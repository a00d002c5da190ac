//! TigerStyle Constants
//!
//! Every limit has a name, a unit suffix, and a single definition.

/// Maximum key length in characters (the key column is `VARCHAR(255)`)
pub const KEY_CHARS_MAX: usize = 255;

/// Default PostgreSQL host
pub const POSTGRES_HOST_DEFAULT: &str = "localhost";

/// Default PostgreSQL port
pub const POSTGRES_PORT_DEFAULT: u16 = 5432;

/// Default upper bound on pooled connections per backend
pub const POOL_CONNECTIONS_MAX_DEFAULT: u32 = 10;

/// Idle connections are closed after this long
pub const POOL_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Operations fail if no connection can be leased within this long
pub const POOL_ACQUIRE_TIMEOUT_MS: u64 = 2_000;
