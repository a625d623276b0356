//! Core domain model and name-derivation rules for the registration sync service.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "ranch-core";

/// Admission gate: a form name must lead with the pre-reg marker or a
/// `YY MM DD` date prefix to be considered at all.
static FORMAT_GATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:pre-reg\b|\d{2}\s+\d{2}\s+\d{2}\b)").expect("valid format gate regex")
});

static PRE_REG_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*pre-reg\b").expect("valid pre-reg regex"));

static DATE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{2})\s+(\d{2})\s+(\d{2})\b").expect("valid date prefix regex")
});

static LEADING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:pre-reg\s*|\d{2}\s+\d{2}\s+\d{2}\s*)").expect("valid leading regex")
});

static TRAILING_NUM_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s\d+\s*$").expect("valid trailing regex"));

/// Raw form summary as returned by the upstream search endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawForm {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub status: Option<String>,
}

/// Upstream value that arrives as either a JSON number or a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Numberish {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Numberish {
    pub fn as_text(&self) -> String {
        match self {
            Numberish::Int(n) => n.to_string(),
            Numberish::Float(f) => f.to_string(),
            Numberish::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BillingName {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldDataEntry {
    pub path: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawMembership {
    pub id: Option<i64>,
    pub membership_number: Option<Numberish>,
    pub member_number: Option<Numberish>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub order_email: Option<String>,
    pub status: Option<String>,
    pub level_id: Option<Numberish>,
    pub membership_level_id: Option<Numberish>,
    pub fee: Option<Numberish>,
    pub membership_fee: Option<Numberish>,
    pub total: Option<Numberish>,
    pub expiration_date: Option<String>,
    pub membership_expiration_date: Option<String>,
    pub created_at: Option<String>,
    pub created_date: Option<String>,
    pub updated_at: Option<String>,
    pub billing: Option<BillingName>,
    pub field_data: Option<Vec<FieldDataEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawRegistrant {
    pub id: Option<i64>,
    pub form_id: Option<Numberish>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub order_email: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<String>,
    pub created_date: Option<String>,
    pub billing: Option<BillingName>,
    pub field_data: Option<Vec<FieldDataEntry>>,
}

/// Persisted form row keyed by the upstream form id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormRow {
    pub id: i64,
    pub form_name: String,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub status: String,
    pub webpage_url: String,
    pub pre_reg: bool,
    /// Resolution could not be definitively confirmed. Diagnostics only,
    /// never persisted.
    pub link_uncertain: bool,
}

/// Persisted membership row keyed by the normalized member number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MembershipRow {
    pub member_number: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub level_id: Option<i64>,
    pub fee: Option<i64>,
    pub status: Option<String>,
    pub expiration_date: Option<String>,
}

/// Persisted registrant row keyed by (form_id, ext_id).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrantRow {
    pub ext_id: i64,
    pub form_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub status: Option<String>,
}

/// Why a fetched record was excluded from persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    NotOpen,
    NoId,
    NoName,
    BadFormat,
    NoDateNonPrereg,
    EmptySlug,
    #[serde(rename = "both-404")]
    Both404,
    Inconclusive,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::NotOpen => "not-open",
            DropReason::NoId => "no-id",
            DropReason::NoName => "no-name",
            DropReason::BadFormat => "bad-format",
            DropReason::NoDateNonPrereg => "no-date-non-prereg",
            DropReason::EmptySlug => "empty-slug",
            DropReason::Both404 => "both-404",
            DropReason::Inconclusive => "inconclusive",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded diagnostic sample of one skipped record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSample {
    pub reason: DropReason,
    pub id: Option<i64>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub status: Option<String>,
}

impl SkippedSample {
    pub fn from_form(reason: DropReason, form: &RawForm) -> Self {
        Self {
            reason,
            id: form.id,
            name: non_empty(form.name.as_deref()).map(str::to_string),
            title: non_empty(form.title.as_deref()).map(str::to_string),
            status: non_empty(form.status.as_deref()).map(str::to_string),
        }
    }
}

/// Bounded diagnostic note for a kept row whose link was a best guess.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkNote {
    pub note: String,
    pub id: i64,
    pub name: String,
    pub picked: String,
}

/// Per-run diagnostics snapshot, returned in the run report and discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total: u64,
    pub kept: u64,
    pub drops: BTreeMap<DropReason, u64>,
    pub skipped: Vec<SkippedSample>,
    pub notes: Vec<LinkNote>,
}

pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// True when the trimmed name leads with either recognized tag.
pub fn name_passes_format_gate(name: &str) -> bool {
    FORMAT_GATE.is_match(name)
}

pub fn is_pre_reg(name: &str) -> bool {
    PRE_REG_MARKER.is_match(name)
}

/// Scheduled date from a `YY MM DD` name prefix: UTC midnight, year 2000+YY.
/// Invalid calendar dates yield `None`.
pub fn date_from_name(name: &str) -> Option<DateTime<Utc>> {
    let caps = DATE_PREFIX.captures(name)?;
    let year = 2000 + caps[1].parse::<i32>().ok()?;
    let month = caps[2].parse::<u32>().ok()?;
    let day = caps[3].parse::<u32>().ok()?;
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single()
}

/// Candidate webpage path: strip the recognized lead-in and any trailing
/// digit group, collapse whitespace, lowercase, hyphen-join, prefix `w-`.
/// Empty string means "no path".
pub fn candidate_path(name: &str) -> String {
    let stripped = LEADING_PATTERN.replace(name.trim(), "");
    let stripped = TRAILING_NUM_GROUP.replace(&stripped, "");
    let stem = stripped.trim();
    if stem.is_empty() {
        return String::new();
    }
    let slug = stem
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();
    format!("w-{slug}")
}

/// Truncating number normalization for values that arrive as numbers or
/// decorated strings (`"#123 "`, `"12.9"`).
pub fn normalize_number(value: &Numberish) -> Option<i64> {
    match value {
        Numberish::Int(n) => Some(*n),
        Numberish::Float(f) if f.is_finite() => Some(f.trunc() as i64),
        Numberish::Float(_) => None,
        Numberish::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            let numeric: String = trimmed
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            numeric
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        }
    }
}

/// RFC 3339 first, then the date-time and date-only shapes the upstream
/// has been seen to emit.
pub fn parse_loose_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

fn field_lookup<'a>(field_data: Option<&'a [FieldDataEntry]>, path: &str) -> Option<&'a str> {
    field_data?
        .iter()
        .find(|entry| entry.path.as_deref() == Some(path))
        .and_then(|entry| entry.value.as_deref())
}

impl RawMembership {
    pub fn field_value(&self, path: &str) -> Option<&str> {
        field_lookup(self.field_data.as_deref(), path)
    }

    /// First present change timestamp, parsed; an unparseable value counts
    /// as no timestamp.
    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        [
            self.updated_at.as_deref(),
            self.created_at.as_deref(),
            self.created_date.as_deref(),
        ]
        .into_iter()
        .flatten()
        .next()
        .and_then(parse_loose_timestamp)
    }

    fn member_number_source(&self) -> Option<Numberish> {
        self.membership_number
            .clone()
            .or_else(|| self.member_number.clone())
            .or(self.id.map(Numberish::Int))
            .or_else(|| {
                self.field_value("membership.number")
                    .map(|v| Numberish::Text(v.to_string()))
            })
    }

    fn level_id_source(&self) -> Option<Numberish> {
        self.membership_level_id
            .clone()
            .or_else(|| self.level_id.clone())
            .or_else(|| {
                self.field_value("membership.levelId")
                    .or_else(|| self.field_value("membership.level_id"))
                    .map(|v| Numberish::Text(v.to_string()))
            })
    }

    fn fee_source(&self) -> Option<Numberish> {
        self.membership_fee
            .clone()
            .or_else(|| self.fee.clone())
            .or_else(|| self.total.clone())
            .or_else(|| {
                self.field_value("membership.fee")
                    .map(|v| Numberish::Text(v.to_string()))
            })
    }
}

/// Membership row from the raw record's fallback chain. `None` when no
/// member number can be normalized from the first present source.
pub fn membership_row(raw: &RawMembership) -> Option<MembershipRow> {
    let member_number = raw
        .member_number_source()
        .as_ref()
        .and_then(normalize_number)?;

    let first_name = raw
        .first_name
        .clone()
        .or_else(|| raw.billing.as_ref().and_then(|b| b.first_name.clone()))
        .or_else(|| raw.field_value("name.first").map(str::to_string));
    let last_name = raw
        .last_name
        .clone()
        .or_else(|| raw.billing.as_ref().and_then(|b| b.last_name.clone()))
        .or_else(|| raw.field_value("name.last").map(str::to_string));
    let email = raw
        .email
        .clone()
        .or_else(|| raw.order_email.clone())
        .or_else(|| raw.field_value("email").map(str::to_string));

    let level_id = raw.level_id_source().as_ref().and_then(normalize_number);
    let fee = raw.fee_source().as_ref().and_then(normalize_number);
    let expiration_date = raw
        .expiration_date
        .clone()
        .or_else(|| raw.membership_expiration_date.clone())
        .or_else(|| {
            raw.field_value("membership.expirationDate")
                .or_else(|| raw.field_value("membership.expiration_date"))
                .map(str::to_string)
        });
    let status = raw
        .status
        .clone()
        .or_else(|| raw.field_value("membership.status").map(str::to_string));

    Some(MembershipRow {
        member_number,
        first_name,
        last_name,
        email,
        level_id,
        fee,
        status,
        expiration_date,
    })
}

impl RawRegistrant {
    pub fn field_value(&self, path: &str) -> Option<&str> {
        field_lookup(self.field_data.as_deref(), path)
    }

    /// Upstream's formId echo, stringified; empty when absent.
    pub fn form_id_text(&self) -> String {
        self.form_id
            .as_ref()
            .map(Numberish::as_text)
            .unwrap_or_default()
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        [self.created_at.as_deref(), self.created_date.as_deref()]
            .into_iter()
            .flatten()
            .next()
            .and_then(parse_loose_timestamp)
    }
}

pub fn is_excluded_registrant_status(status: Option<&str>) -> bool {
    let Some(value) = non_empty(status) else {
        return false;
    };
    matches!(
        value.to_ascii_lowercase().as_str(),
        "cancelled" | "canceled" | "abandoned"
    )
}

/// Registrant row; `None` when the upstream record carries no numeric id.
pub fn registrant_row(raw: &RawRegistrant, fallback_form_id: &str) -> Option<RegistrantRow> {
    let ext_id = raw.id?;
    let echoed = raw.form_id_text();
    let form_id = if echoed.is_empty() {
        fallback_form_id.to_string()
    } else {
        echoed
    };
    let first_name = raw
        .first_name
        .clone()
        .or_else(|| raw.billing.as_ref().and_then(|b| b.first_name.clone()))
        .or_else(|| raw.field_value("name.first").map(str::to_string));
    let last_name = raw
        .last_name
        .clone()
        .or_else(|| raw.billing.as_ref().and_then(|b| b.last_name.clone()))
        .or_else(|| raw.field_value("name.last").map(str::to_string));
    let email = raw
        .order_email
        .clone()
        .or_else(|| raw.field_value("email").map(str::to_string));

    Some(RegistrantRow {
        ext_id,
        form_id,
        first_name,
        last_name,
        email,
        status: raw.status.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_gate_requires_a_recognized_lead_in() {
        assert!(name_passes_format_gate("Pre-Reg Spring Basics"));
        assert!(name_passes_format_gate("  pre-reg evening session"));
        assert!(name_passes_format_gate("25 03 14 Intro Workshop 2"));
        assert!(!name_passes_format_gate("Intro Workshop"));
        assert!(!name_passes_format_gate("2025 03 14 Intro Workshop"));
        assert!(!name_passes_format_gate("pre-registration open"));
    }

    #[test]
    fn dated_name_yields_utc_midnight_and_slug() {
        let name = "25 03 14 Intro Workshop 2";
        assert!(!is_pre_reg(name));
        assert_eq!(
            date_from_name(name),
            Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).single()
        );
        assert_eq!(candidate_path(name), "w-intro-workshop");
    }

    #[test]
    fn pre_reg_name_skips_date_and_keeps_slug() {
        let name = "Pre-Reg Spring Basics";
        assert!(is_pre_reg(name));
        assert_eq!(date_from_name(name), None);
        assert_eq!(candidate_path(name), "w-spring-basics");
    }

    #[test]
    fn invalid_calendar_date_is_rejected() {
        assert_eq!(date_from_name("25 13 40 Ghost Event"), None);
        assert_eq!(date_from_name("25 02 30 Leap Mistake"), None);
    }

    #[test]
    fn slug_collapses_whitespace_and_lowercases() {
        assert_eq!(
            candidate_path("25 03 14  Rope   Care Clinic  17"),
            "w-rope-care-clinic"
        );
        assert_eq!(candidate_path("pre-reg   "), "");
        assert_eq!(candidate_path("25 03 14"), "");
        // A lone trailing number only counts as a trailing group when a
        // word precedes it.
        assert_eq!(candidate_path("25 03 14 7"), "w-7");
    }

    #[test]
    fn normalize_number_handles_numbers_and_decorated_strings() {
        assert_eq!(normalize_number(&Numberish::Int(42)), Some(42));
        assert_eq!(normalize_number(&Numberish::Float(12.9)), Some(12));
        assert_eq!(
            normalize_number(&Numberish::Text("#123 ".to_string())),
            Some(123)
        );
        assert_eq!(
            normalize_number(&Numberish::Text("12.9".to_string())),
            Some(12)
        );
        assert_eq!(normalize_number(&Numberish::Text("  ".to_string())), None);
        assert_eq!(normalize_number(&Numberish::Text("n/a".to_string())), None);
        // The dash is part of the numeric character set, so a leading "M-"
        // decoration yields a negative number rather than stripping to 100.
        assert_eq!(
            normalize_number(&Numberish::Text("M-100".to_string())),
            Some(-100)
        );
    }

    #[test]
    fn membership_row_walks_the_fallback_chain() {
        let raw = RawMembership {
            id: Some(9),
            member_number: Some(Numberish::Text("#0042".to_string())),
            billing: Some(BillingName {
                first_name: Some("Sam".to_string()),
                last_name: None,
            }),
            order_email: Some("sam@example.com".to_string()),
            field_data: Some(vec![FieldDataEntry {
                path: Some("name.last".to_string()),
                value: Some("Rider".to_string()),
            }]),
            ..Default::default()
        };
        let row = membership_row(&raw).expect("member number resolves");
        assert_eq!(row.member_number, 42);
        assert_eq!(row.first_name.as_deref(), Some("Sam"));
        assert_eq!(row.last_name.as_deref(), Some("Rider"));
        assert_eq!(row.email.as_deref(), Some("sam@example.com"));
    }

    #[test]
    fn membership_row_drops_when_first_source_is_garbage() {
        // The first present source wins even when a later one would parse.
        let raw = RawMembership {
            membership_number: Some(Numberish::Text("n/a".to_string())),
            id: Some(7),
            ..Default::default()
        };
        assert_eq!(membership_row(&raw), None);
    }

    #[test]
    fn excluded_registrant_statuses() {
        assert!(is_excluded_registrant_status(Some("Cancelled")));
        assert!(is_excluded_registrant_status(Some(" canceled ")));
        assert!(is_excluded_registrant_status(Some("ABANDONED")));
        assert!(!is_excluded_registrant_status(Some("completed")));
        assert!(!is_excluded_registrant_status(None));
    }

    #[test]
    fn registrant_row_prefers_order_email_and_echoed_form_id() {
        let raw = RawRegistrant {
            id: Some(501),
            form_id: Some(Numberish::Int(77)),
            order_email: Some("rider@example.com".to_string()),
            status: Some("completed".to_string()),
            ..Default::default()
        };
        let row = registrant_row(&raw, "999").expect("id present");
        assert_eq!(row.ext_id, 501);
        assert_eq!(row.form_id, "77");
        assert_eq!(row.email.as_deref(), Some("rider@example.com"));

        let no_echo = RawRegistrant {
            id: Some(502),
            ..Default::default()
        };
        assert_eq!(
            registrant_row(&no_echo, "999").expect("id present").form_id,
            "999"
        );
    }

    #[test]
    fn loose_timestamps_parse_common_shapes() {
        assert!(parse_loose_timestamp("2025-06-01T10:30:00Z").is_some());
        assert!(parse_loose_timestamp("2025-06-01T10:30:00.250+02:00").is_some());
        assert!(parse_loose_timestamp("2025-06-01 10:30:00").is_some());
        assert!(parse_loose_timestamp("2025-06-01").is_some());
        assert!(parse_loose_timestamp("next tuesday").is_none());
        assert!(parse_loose_timestamp("").is_none());
    }

    #[test]
    fn drop_reasons_render_as_wire_codes() {
        assert_eq!(DropReason::NoDateNonPrereg.as_str(), "no-date-non-prereg");
        assert_eq!(DropReason::Both404.to_string(), "both-404");
        let json = serde_json::to_string(&DropReason::Both404).expect("serializes");
        assert_eq!(json, "\"both-404\"");
    }
}
