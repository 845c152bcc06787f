//! Coordinate extraction from a query's map page.
//!
//! The map page embeds its widget data as a JSON settings literal of the
//! form `"interactive-map-<query id>":"<table>"`. The table is a flat
//! string: records separated by `||`, fields separated by `|`, three
//! fields per record (two coordinates, then the incident ID).

use gva_archive_models::{CoordinateOrder, IncidentCoordinate, QueryId};
use regex::Regex;

use crate::ArchiveError;

/// Separates records in the coordinate table.
const RECORD_DELIMITER: &str = "||";

/// Separates fields within a record.
const FIELD_DELIMITER: char = '|';

/// Extracts every incident coordinate embedded in `markup` for `query_id`.
///
/// # Errors
///
/// * [`ArchiveError::CoordinatesNotFound`] if the markup has no coordinate
///   table for this query. A table that is present but empty yields no
///   coordinates instead.
/// * [`ArchiveError::Parse`] if a record does not have three fields or a
///   coordinate is not a decimal number. The message names the incident.
pub fn scrape_coordinates(
    markup: &str,
    query_id: &QueryId,
    order: CoordinateOrder,
) -> Result<Vec<IncidentCoordinate>, ArchiveError> {
    let pattern = format!(
        r#""interactive-map-{}":"([^"]*)""#,
        regex::escape(query_id.as_str())
    );
    let re = Regex::new(&pattern)
        .map_err(|e| ArchiveError::parse(format!("invalid coordinate pattern: {e}")))?;

    let table = re
        .captures(markup)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| ArchiveError::CoordinatesNotFound {
            query_id: query_id.clone(),
        })?
        .as_str();

    let coordinates = table
        .split(RECORD_DELIMITER)
        .filter(|record| !record.is_empty())
        .map(|record| parse_record(record, order))
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!(
        "Scraped {} coordinate(s) for query {query_id}",
        coordinates.len()
    );

    Ok(coordinates)
}

fn parse_record(record: &str, order: CoordinateOrder) -> Result<IncidentCoordinate, ArchiveError> {
    let fields: Vec<&str> = record.split(FIELD_DELIMITER).collect();
    let [first, second, incident_id] = fields.as_slice() else {
        return Err(ArchiveError::parse(format!(
            "coordinate record '{record}' has {} field(s), expected 3",
            fields.len()
        )));
    };

    let (lat_str, lon_str) = match order {
        CoordinateOrder::LatLon => (*first, *second),
        CoordinateOrder::LonLat => (*second, *first),
    };

    let longitude = parse_decimal(lon_str).ok_or_else(|| {
        ArchiveError::parse(format!(
            "failed to parse longitude '{lon_str}' for incident {incident_id}"
        ))
    })?;
    let latitude = parse_decimal(lat_str).ok_or_else(|| {
        ArchiveError::parse(format!(
            "failed to parse latitude '{lat_str}' for incident {incident_id}"
        ))
    })?;

    Ok(IncidentCoordinate {
        incident_id: (*incident_id).to_owned(),
        longitude,
        latitude,
    })
}

/// Plain signed decimal only: no exponents, `inf`, or `NaN`.
fn parse_decimal(s: &str) -> Option<f64> {
    if s.is_empty()
        || !s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
    {
        return None;
    }
    s.parse::<f64>().ok()
}
