//! Yandex Audience management API client.
//!
//! Blocking HTTP, one call per operation. Uploads are multipart CSV files of hashed
//! contacts (see [`crate::export`]); a freshly uploaded or modified segment stays in a
//! pending state until it is confirmed.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, multipart};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use audsync_core::{ContactRecord, ExternalId, PlatformError};
use audsync_engine::{AudienceApi, ModificationType, RemoteSegment, UploadReceipt};

use crate::export::ContactExport;

pub const DEFAULT_API_URL: &str = "https://api-audience.yandex.ru/v1/management/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum YandexError {
    #[error("invalid API url: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Yandex Audience returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("none of the records has a phone number")]
    NothingToUpload,
}

impl From<YandexError> for PlatformError {
    fn from(err: YandexError) -> Self {
        match err {
            YandexError::Status { status, body } => PlatformError::Rejected { status, body },
            YandexError::Http(e) if e.is_decode() => PlatformError::unexpected(e.to_string()),
            other @ YandexError::NothingToUpload => PlatformError::unexpected(other.to_string()),
            other => PlatformError::request(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SegmentList {
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
struct SegmentReply {
    segment: Segment,
}

#[derive(Debug, Deserialize)]
struct Segment {
    id: ExternalId,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: Option<String>,
}

pub struct YandexAudienceClient {
    http: Client,
    base_url: Url,
    oauth_token: String,
    export: ContactExport,
}

impl core::fmt::Debug for YandexAudienceClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("YandexAudienceClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl YandexAudienceClient {
    pub fn new(
        base_url: &str,
        oauth_token: impl Into<String>,
        export: ContactExport,
    ) -> Result<Self, YandexError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            base_url,
            oauth_token: oauth_token.into(),
            export,
        })
    }

    fn url(&self, path: &str) -> Result<Url, YandexError> {
        Ok(self.base_url.join(path)?)
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, YandexError> {
        let response = request
            .header("Authorization", format!("OAuth {}", self.oauth_token))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(YandexError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json()?)
    }

    fn csv_form(&self, records: &[ContactRecord]) -> Result<multipart::Form, YandexError> {
        let csv = self.export.to_csv(records);
        if csv.rows == 0 {
            return Err(YandexError::NothingToUpload);
        }
        debug!(rows = csv.rows, skipped = csv.skipped, "contacts exported");

        let part = multipart::Part::text(csv.body)
            .file_name("audience.csv")
            .mime_str("text/csv")?;
        Ok(multipart::Form::new().part("file", part))
    }

    pub fn list(&self) -> Result<Vec<RemoteSegment>, YandexError> {
        let reply: SegmentList = self.send(self.http.get(self.url("segments")?))?;
        Ok(reply
            .segments
            .into_iter()
            .map(|s| RemoteSegment {
                id: s.id,
                name: s.name,
            })
            .collect())
    }

    #[instrument(skip(self, records), fields(records = records.len()), err)]
    pub fn upload(
        &self,
        audience_name: &str,
        records: &[ContactRecord],
    ) -> Result<UploadReceipt, YandexError> {
        let form = self.csv_form(records)?;
        let reply: SegmentReply = self.send(
            self.http
                .post(self.url("segments/upload_csv_file")?)
                .multipart(form),
        )?;
        Ok(receipt(reply.segment))
    }

    #[instrument(skip(self, records), fields(external_id = %external_id, mode = modification.as_str(), records = records.len()), err)]
    pub fn modify_data(
        &self,
        external_id: &ExternalId,
        records: &[ContactRecord],
        modification: ModificationType,
    ) -> Result<UploadReceipt, YandexError> {
        let form = self.csv_form(records)?;
        let reply: SegmentReply = self.send(
            self.http
                .post(self.url(&format!("segment/{external_id}/modify_data"))?)
                .query(&[("modification_type", modification.as_str())])
                .multipart(form),
        )?;
        Ok(receipt(reply.segment))
    }

    #[instrument(skip(self), fields(external_id = %external_id), err)]
    pub fn confirm_segment(
        &self,
        external_id: &ExternalId,
        audience_name: &str,
    ) -> Result<(), YandexError> {
        let body = json!({
            "segment": {
                "name": audience_name,
                "content_type": "crm",
                "hashing_alg": "SHA256",
                "hashed": true,
            }
        });
        let _: serde_json::Value = self.send(
            self.http
                .post(self.url(&format!("segment/{external_id}/confirm"))?)
                .json(&body),
        )?;
        Ok(())
    }
}

fn receipt(segment: Segment) -> UploadReceipt {
    UploadReceipt {
        external_id: segment.id,
        status: segment.status.unwrap_or_else(|| "uploaded".to_string()),
    }
}

impl AudienceApi for YandexAudienceClient {
    fn list_segments(&self) -> Result<Vec<RemoteSegment>, PlatformError> {
        Ok(self.list()?)
    }

    fn upload_new(
        &self,
        audience_name: &str,
        records: &[ContactRecord],
    ) -> Result<UploadReceipt, PlatformError> {
        Ok(self.upload(audience_name, records)?)
    }

    fn modify(
        &self,
        external_id: &ExternalId,
        _audience_name: &str,
        records: &[ContactRecord],
        modification: ModificationType,
    ) -> Result<String, PlatformError> {
        Ok(self.modify_data(external_id, records, modification)?.status)
    }

    fn confirm(&self, external_id: &ExternalId, audience_name: &str) -> Result<(), PlatformError> {
        Ok(self.confirm_segment(external_id, audience_name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let client = YandexAudienceClient::new(
            "https://api-audience.yandex.ru/v1/management",
            "token",
            ContactExport::new(),
        )
        .unwrap();

        assert_eq!(
            client.url("segment/12/confirm").unwrap().as_str(),
            "https://api-audience.yandex.ru/v1/management/segment/12/confirm"
        );
    }

    #[test]
    fn segment_replies_decode_numeric_ids() {
        let list: SegmentList = serde_json::from_str(
            r#"{"segments":[{"id":101,"name":"Audience_61","status":"is_processed","type":"uploading"}]}"#,
        )
        .unwrap();
        assert_eq!(list.segments[0].id, ExternalId::number(101));
        assert_eq!(list.segments[0].name, "Audience_61");

        let reply: SegmentReply =
            serde_json::from_str(r#"{"segment":{"id":7,"status":"uploaded"}}"#).unwrap();
        assert_eq!(
            receipt(reply.segment),
            UploadReceipt {
                external_id: ExternalId::number(7),
                status: "uploaded".into()
            }
        );
    }

    #[test]
    fn upload_without_phones_fails_before_any_request() {
        let client = YandexAudienceClient::new(DEFAULT_API_URL, "token", ContactExport::new()).unwrap();

        let err = client
            .upload("Audience_1", &[ContactRecord::new(1).with_email("a@example.com")])
            .unwrap_err();
        assert!(matches!(err, YandexError::NothingToUpload));
        assert!(matches!(
            PlatformError::from(err),
            PlatformError::UnexpectedResponse(_)
        ));
    }

    #[test]
    fn rejected_status_maps_to_platform_rejection() {
        let err = YandexError::Status {
            status: 403,
            body: "forbidden".into(),
        };
        assert_eq!(
            PlatformError::from(err),
            PlatformError::Rejected {
                status: 403,
                body: "forbidden".into()
            }
        );
    }
}
