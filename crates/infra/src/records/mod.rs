//! Record resolvers backed by real datastores.

pub mod postgres;

pub use postgres::{PgConnector, PostgresRecordResolver};
