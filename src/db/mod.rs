pub mod connection;
pub mod migration_runner;
pub mod seed;
pub mod snapshot;

pub use connection::Database;
