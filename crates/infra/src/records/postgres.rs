//! Postgres-backed record resolver.
//!
//! Contact data lives in the CRM's `estate_buys` table, one row per application. The worker
//! is synchronous, so the resolver owns a small current-thread Tokio runtime and blocks on
//! each query; the SQLx pool inside handles reconnects once the first connection is made.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tokio::runtime::Runtime;
use tracing::debug;

use audsync_core::{ApplicationId, ContactRecord, RecordResolver, ResolveError};
use audsync_engine::Connector;

const CONTACTS_QUERY: &str = r#"
    SELECT
        eb.id,
        eb.contacts_id,
        eb.contacts_buy_phones,
        eb.contacts_buy_emails,
        eb.contacts_buy_sex,
        eb.contacts_buy_geo_country_name,
        eb.contacts_buy_geo_city_name,
        eb.contacts_buy_name,
        eb.name_first,
        eb.name_last,
        eb.contacts_buy_dob
    FROM estate_buys eb
    WHERE eb.id = ANY($1)
"#;

/// Opens the SQLx pool; used with the connection guardian at startup.
pub struct PgConnector {
    database_url: String,
    endpoint: String,
    max_connections: u32,
    runtime: Arc<Runtime>,
}

impl PgConnector {
    pub fn new(database_url: impl Into<String>, max_connections: u32) -> std::io::Result<Self> {
        let database_url = database_url.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            endpoint: crate::redact_url(&database_url),
            database_url,
            max_connections,
            runtime: Arc::new(runtime),
        })
    }
}

impl Connector for PgConnector {
    type Connection = PostgresRecordResolver;
    type Error = sqlx::Error;

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let pool = self.runtime.block_on(
            PgPoolOptions::new()
                .max_connections(self.max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&self.database_url),
        )?;

        Ok(PostgresRecordResolver {
            pool,
            runtime: Arc::clone(&self.runtime),
        })
    }
}

/// [`RecordResolver`] over the `estate_buys` table.
pub struct PostgresRecordResolver {
    pool: PgPool,
    runtime: Arc<Runtime>,
}

impl PostgresRecordResolver {
    /// Wrap an existing pool; `runtime` must be the one the pool was created on.
    pub fn new(pool: PgPool, runtime: Arc<Runtime>) -> Self {
        Self { pool, runtime }
    }
}

impl RecordResolver for PostgresRecordResolver {
    fn resolve(&self, ids: &[ApplicationId]) -> Result<Vec<ContactRecord>, ResolveError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self
            .runtime
            .block_on(
                sqlx::query(CONTACTS_QUERY)
                    .bind(ids.to_vec())
                    .fetch_all(&self.pool),
            )
            .map_err(|e| ResolveError::unavailable(e.to_string()))?;

        let records = rows
            .iter()
            .map(contact_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ResolveError::unavailable(format!("unexpected row shape: {e}")))?;

        debug!(requested = ids.len(), found = records.len(), "contact records loaded");
        Ok(records)
    }
}

fn contact_from_row(row: &PgRow) -> Result<ContactRecord, sqlx::Error> {
    Ok(ContactRecord {
        application_id: row.try_get("id")?,
        contact_id: row.try_get("contacts_id")?,
        phone: row.try_get("contacts_buy_phones")?,
        email: row.try_get("contacts_buy_emails")?,
        gender: row.try_get("contacts_buy_sex")?,
        country: row.try_get("contacts_buy_geo_country_name")?,
        city: row.try_get("contacts_buy_geo_city_name")?,
        full_name: row.try_get("contacts_buy_name")?,
        first_name: row.try_get("name_first")?,
        last_name: row.try_get("name_last")?,
        birth_date: row.try_get::<Option<NaiveDate>, _>("contacts_buy_dob")?,
    })
}
