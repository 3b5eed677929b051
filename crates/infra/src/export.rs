//! Contact record export: SHA-256 hashed CSV rows for audience uploads.
//!
//! Platforms match audiences on hashed identifiers, so no plain-text contact data ever
//! leaves the worker. Every non-empty field is normalised, hashed with SHA-256 and
//! hex-encoded; empty fields stay empty.

use sha2::{Digest, Sha256};

use audsync_core::ContactRecord;

/// Column order of the exported CSV.
pub const CSV_HEADER: [&str; 9] = [
    "phone",
    "email",
    "ext_id",
    "gender",
    "country",
    "city",
    "first_name",
    "last_name",
    "birth_date",
];

/// Lowercase hex SHA-256 of `value`.
pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Digits-only phone as platforms expect it: `+` and `.` removed.
pub fn normalize_phone(phone: &str) -> String {
    phone
        .trim()
        .chars()
        .filter(|c| *c != '+' && *c != '.')
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ContactExport {
    default_country: Option<String>,
    default_city: Option<String>,
}

impl ContactExport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill missing country/city with these values before hashing.
    pub fn with_defaults(mut self, country: Option<String>, city: Option<String>) -> Self {
        self.default_country = country.filter(|c| !c.trim().is_empty());
        self.default_city = city.filter(|c| !c.trim().is_empty());
        self
    }

    /// One hashed row, or `None` for records without a phone number.
    pub fn hashed_row(&self, record: &ContactRecord) -> Option<[String; 9]> {
        let phone = record
            .phone
            .as_deref()
            .map(normalize_phone)
            .filter(|p| !p.is_empty())?;

        let (first_name, last_name) = split_name(record);
        let country = non_empty(record.country.as_deref()).or(self.default_country.as_deref());
        let city = non_empty(record.city.as_deref()).or(self.default_city.as_deref());
        let ext_id = record.contact_id.map(|id| id.to_string());
        let birth_date = record.birth_date.map(|d| d.format("%Y-%m-%d").to_string());

        Some([
            sha256_hex(&phone),
            hash_opt(record.email.as_deref()),
            hash_opt(ext_id.as_deref()),
            hash_opt(record.gender.as_deref()),
            hash_opt(country),
            hash_opt(city),
            hash_opt(first_name),
            hash_opt(last_name),
            hash_opt(birth_date.as_deref()),
        ])
    }

    /// Header plus one hashed row per exportable record.
    pub fn to_csv(&self, records: &[ContactRecord]) -> ExportedCsv {
        let mut body = CSV_HEADER.join(",");
        body.push('\n');

        let mut rows = 0;
        for row in records.iter().filter_map(|r| self.hashed_row(r)) {
            body.push_str(&row.join(","));
            body.push('\n');
            rows += 1;
        }

        ExportedCsv {
            body,
            rows,
            skipped: records.len() - rows,
        }
    }
}

/// A rendered CSV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedCsv {
    pub body: String,
    pub rows: usize,
    /// Records left out for lack of a phone number.
    pub skipped: usize,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn hash_opt(value: Option<&str>) -> String {
    non_empty(value).map(sha256_hex).unwrap_or_default()
}

/// Explicit first/last names win; otherwise the first two words of the full name.
fn split_name(record: &ContactRecord) -> (Option<&str>, Option<&str>) {
    let mut words = record
        .full_name
        .as_deref()
        .map(str::split_whitespace)
        .into_iter()
        .flatten();
    let from_full = (words.next(), words.next());

    (
        non_empty(record.first_name.as_deref()).or(from_full.0),
        non_empty(record.last_name.as_deref()).or(from_full.1),
    )
}
