//! Infrastructure layer: Redis Streams, Postgres, Yandex Audience, config.

pub mod broker;
pub mod config;
pub mod export;
pub mod records;
pub mod yandex;

pub use broker::{RedisStreamsBus, RedisStreamsError};
pub use config::{ConfigError, Secret, WorkerConfig};
pub use export::{ContactExport, ExportedCsv};
pub use records::{PgConnector, PostgresRecordResolver};
pub use yandex::{YandexAudienceClient, YandexError};

/// Connection URL without user info, safe for logs.
pub(crate) fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        Err(_) => raw
            .rsplit_once('@')
            .map_or_else(|| raw.to_string(), |(_, host)| host.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::redact_url;

    #[test]
    fn redact_strips_user_info() {
        assert_eq!(
            redact_url("postgres://crm:secret@db:5432/crm"),
            "postgres://db:5432/crm"
        );
        assert_eq!(redact_url("redis://localhost:6379"), "redis://localhost:6379");
        assert_eq!(redact_url("not a url@host"), "host");
    }
}
