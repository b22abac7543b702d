//! Generic async resource pools: a connection pool with health checks and
//! idle reaping, and a per-connection channel pool with lifetime expiry.

mod channel_pool;
mod connection_pool;

pub use channel_pool::{ChannelFactory, ChannelGuard, ChannelPool, ChannelPoolConfig};
pub use connection_pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolGuard, PoolStats};
