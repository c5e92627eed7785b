//! Accès PostGIS : pool de connexions, schéma, hydratation et écritures

pub mod load;
pub mod pool;
pub mod schema;
pub mod write;

pub use pool::{create_pool, test_connection, DatabaseConfig, SslMode};
