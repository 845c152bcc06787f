#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Data types shared by the Gun Violence Archive client.
//!
//! The query selectors ([`MatchMode`], [`ResultsType`], [`DateComparator`],
//! [`ValueComparator`]) carry the exact literal strings the remote search
//! form expects. The record types ([`IncidentRecord`],
//! [`IncidentCoordinate`], [`FusedIncident`]) describe what comes back out
//! of a query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Opaque identifier minted once per query and threaded through every
/// request that references it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

impl QueryId {
    /// Mints a fresh random query identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as it appears in URLs and form fields.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for QueryId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether every criterion must match or any one of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchMode {
    /// All criteria must match (`And`).
    #[default]
    All,
    /// Any criterion may match (`Or`).
    Any,
}

impl MatchMode {
    /// Builds the match mode from an "all must match" flag.
    #[must_use]
    pub const fn from_all(all: bool) -> Self {
        if all { Self::All } else { Self::Any }
    }

    /// The literal value of the `base_group_select` form field.
    #[must_use]
    pub const fn wire_value(self) -> &'static str {
        match self {
            Self::All => "And",
            Self::Any => "Or",
        }
    }
}

/// The kind of rows a query returns.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResultsType {
    /// One row per incident.
    #[default]
    Incidents,
    /// One row per participant.
    Participants,
}

/// Comparator for an incident date criterion.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum DateComparator {
    /// Date falls between `from` and `to`.
    #[strum(serialize = "is in")]
    IsIn,
    /// Date falls outside `from` and `to`.
    #[strum(serialize = "is not in")]
    IsNotIn,
    /// Date falls within the trailing number of days.
    #[strum(serialize = "is in the last")]
    IsInTheLast,
    /// Date falls outside the trailing number of days.
    #[strum(serialize = "is not in the last")]
    IsNotInTheLast,
    /// Date falls in the current calendar year.
    #[strum(serialize = "is current year")]
    IsCurrentYear,
    /// Date falls in the given year.
    #[strum(serialize = "is year")]
    IsYear,
    /// Date falls outside the given year.
    #[strum(serialize = "is not year")]
    IsNotYear,
}

/// Comparator for a numeric participant attribute.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum ValueComparator {
    /// `=`
    #[strum(serialize = "=")]
    EqualTo,
    /// `>`
    #[strum(serialize = ">")]
    GreaterThan,
    /// `<`
    #[strum(serialize = "<")]
    LessThan,
    /// `!=` (also accepts `≠` when parsing)
    #[strum(to_string = "!=", serialize = "≠")]
    NotEqualTo,
}

impl ValueComparator {
    /// Every comparator, in the order they are listed to users.
    pub const ALL: &[Self] = &[
        Self::EqualTo,
        Self::GreaterThan,
        Self::LessThan,
        Self::NotEqualTo,
    ];
}

/// Which coordinate comes first in a map-widget record.
///
/// Historical scrapers disagree on the order, so it is configurable until
/// verified against a live response.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CoordinateOrder {
    /// `latitude|longitude|id`
    #[default]
    LatLon,
    /// `longitude|latitude|id`
    LonLat,
}

/// One row of the tabular incident export.
///
/// Field names match the export's header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentRecord {
    /// Archive identifier of the incident.
    #[serde(rename = "Incident ID")]
    pub incident_id: String,
    /// Date exactly as exported (e.g. `"January 1, 2020"`).
    #[serde(rename = "Incident Date")]
    pub incident_date: String,
    /// State name.
    #[serde(rename = "State")]
    pub state: String,
    /// City or county name.
    #[serde(rename = "City Or County")]
    pub city_or_county: String,
    /// Street address.
    #[serde(rename = "Address")]
    pub address: String,
    /// Number of people killed.
    #[serde(rename = "# Killed")]
    pub killed: u32,
    /// Number of people injured.
    #[serde(rename = "# Injured")]
    pub injured: u32,
    /// Operations column (links to the incident and its source).
    #[serde(rename = "Operations", default)]
    pub operations: String,
}

/// Map-widget location of one incident.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentCoordinate {
    /// Archive identifier of the incident.
    pub incident_id: String,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Latitude (WGS84).
    pub latitude: f64,
}

/// An [`IncidentRecord`] joined with its coordinates and a normalized
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusedIncident {
    /// Archive identifier of the incident.
    pub incident_id: String,
    /// When the incident occurred. `None` when the exported date could not
    /// be interpreted.
    pub occurred_at: Option<DateTime<Utc>>,
    /// Date exactly as exported.
    pub raw_date: String,
    /// State name.
    pub state: String,
    /// City or county name.
    pub city_or_county: String,
    /// Street address.
    pub address: String,
    /// Number of people killed.
    pub killed: u32,
    /// Number of people injured.
    pub injured: u32,
    /// Operations column.
    pub operations: String,
    /// Longitude (WGS84). `None` when the map had no entry for the incident.
    pub longitude: Option<f64>,
    /// Latitude (WGS84). `None` when the map had no entry for the incident.
    pub latitude: Option<f64>,
}

/// One batch-export progress report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgressStatus {
    /// Whether the batch job reports itself healthy.
    pub status: bool,
    /// Completion percentage, 0 through 100.
    #[serde(deserialize_with = "deserialize_percentage")]
    pub percentage: u8,
    /// Human-readable status message.
    #[serde(default)]
    pub message: String,
}

impl ProgressStatus {
    /// Whether the batch job has finished.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.percentage >= 100
    }
}

/// The batch endpoint reports the percentage as a string (`"42"`); plain
/// numbers are accepted too.
fn deserialize_percentage<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n,
        Raw::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid percentage '{s}': {e}")))?,
    };

    if value > 100 {
        return Err(serde::de::Error::custom(format!(
            "percentage {value} out of range"
        )));
    }

    u8::try_from(value).map_err(serde::de::Error::custom)
}
