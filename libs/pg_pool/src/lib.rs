pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod pool;
pub mod serializer;
pub mod stats;

pub use config::PoolConfig;
pub use connection::{Connection, QueryOutcome};
pub use error::{ConnectError, PoolError, QueryError};
pub use events::{ConnectionEvent, PoolEvent};
pub use pool::ConnectionPool;
pub use stats::PoolStats;
