//! Joins exported records with scraped coordinates.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use gva_archive_models::{FusedIncident, IncidentCoordinate, IncidentRecord};

use crate::dates::interpret_date;

/// Attaches coordinates to every record by incident ID.
///
/// Output order and length follow `records`: nothing is dropped,
/// duplicated, or reordered. Records without a coordinate keep `None`
/// for longitude and latitude. If the map lists an incident more than
/// once, the first entry wins.
///
/// `occurred_at` is interpreted relative to `now`. A date that cannot be
/// interpreted leaves `occurred_at` as `None` and is logged; the raw value
/// is always kept in `raw_date`.
#[must_use]
pub fn fuse_incidents(
    records: Vec<IncidentRecord>,
    coordinates: &[IncidentCoordinate],
    now: DateTime<Utc>,
) -> Vec<FusedIncident> {
    let mut by_id: HashMap<&str, &IncidentCoordinate> = HashMap::with_capacity(coordinates.len());
    for coordinate in coordinates {
        by_id
            .entry(coordinate.incident_id.as_str())
            .or_insert(coordinate);
    }

    let mut unmatched = 0_usize;
    let fused: Vec<FusedIncident> = records
        .into_iter()
        .map(|record| {
            let coordinate = by_id.get(record.incident_id.as_str()).copied();
            if coordinate.is_none() {
                unmatched += 1;
            }

            let occurred_at = match interpret_date(&record.incident_date, now) {
                Ok(at) => Some(at),
                Err(e) => {
                    log::warn!(
                        "Incident {}: could not interpret date '{}': {e}",
                        record.incident_id,
                        record.incident_date
                    );
                    None
                }
            };

            FusedIncident {
                incident_id: record.incident_id,
                occurred_at,
                raw_date: record.incident_date,
                state: record.state,
                city_or_county: record.city_or_county,
                address: record.address,
                killed: record.killed,
                injured: record.injured,
                operations: record.operations,
                longitude: coordinate.map(|c| c.longitude),
                latitude: coordinate.map(|c| c.latitude),
            }
        })
        .collect();

    if unmatched > 0 {
        log::info!(
            "{unmatched} of {} incident(s) have no map coordinates",
            fused.len()
        );
    }

    fused
}
