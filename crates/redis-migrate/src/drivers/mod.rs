//! Node driver implementations.
//!
//! This module provides concrete implementations of the core traits:
//!
//! - [`redis`]: Redis (and Redis-protocol compatible) nodes via the `redis` crate
//!
//! # Adding New Drivers
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement `NodeConnection` for the session type
//! 3. Implement `Connector` to open sessions from a `NodeEndpoint`

pub mod redis;

pub use self::redis::{RedisConnector, RedisNode};
