//! Decoding of the exported incident CSV.

use std::io::Read;

use gva_archive_models::IncidentRecord;

use crate::ArchiveError;

/// Decodes every row of an incident export.
///
/// Columns are matched by header name, so column order and extra columns
/// do not matter. Dates are kept as exported; see [`crate::fusion`].
///
/// # Errors
///
/// Returns [`ArchiveError::Csv`] if the data is not valid CSV, a required
/// column is missing, or a count column is not a non-negative integer.
pub fn parse_incident_records<R: Read>(reader: R) -> Result<Vec<IncidentRecord>, ArchiveError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let records = reader
        .deserialize::<IncidentRecord>()
        .collect::<Result<Vec<_>, _>>()?;

    log::info!("Parsed {} incident record(s) from CSV", records.len());

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "Incident ID,Incident Date,State,City Or County,Address,# Killed,# Injured,Operations";

    #[test]
    fn parses_one_row() {
        let csv = format!("{HEADER}\nA,01/02/2020,CA,County,123 Main,1,2,ops\n");
        let records = parse_incident_records(csv.as_bytes()).unwrap();

        assert_eq!(
            records,
            vec![IncidentRecord {
                incident_id: "A".to_owned(),
                incident_date: "01/02/2020".to_owned(),
                state: "CA".to_owned(),
                city_or_county: "County".to_owned(),
                address: "123 Main".to_owned(),
                killed: 1,
                injured: 2,
                operations: "ops".to_owned(),
            }]
        );
    }

    #[test]
    fn quoted_dates_with_commas_survive() {
        let csv = format!(
            "{HEADER}\n1555555,\"January 5, 2020\",Illinois,Chicago,\"100 block of W Madison St\",0,1,\n"
        );
        let records = parse_incident_records(csv.as_bytes()).unwrap();

        assert_eq!(records[0].incident_date, "January 5, 2020");
        assert_eq!(records[0].operations, "");
    }

    #[test]
    fn columns_are_matched_by_name() {
        let csv = "# Injured,# Killed,Incident ID,Incident Date,State,City Or County,Address,Operations,Extra\n\
                   3,0,B,2020-02-03,TX,Austin,1 Main,,x\n";
        let records = parse_incident_records(csv.as_bytes()).unwrap();

        assert_eq!(records[0].incident_id, "B");
        assert_eq!(records[0].injured, 3);
        assert_eq!(records[0].killed, 0);
    }

    #[test]
    fn non_numeric_count_fails_the_whole_decode() {
        let csv = format!(
            "{HEADER}\nA,01/02/2020,CA,County,123 Main,1,2,ops\nB,01/03/2020,CA,County,9 Elm,many,0,ops\n"
        );
        let err = parse_incident_records(csv.as_bytes()).unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn negative_count_is_rejected() {
        let csv = format!("{HEADER}\nA,01/02/2020,CA,County,123 Main,-1,2,ops\n");
        assert!(parse_incident_records(csv.as_bytes()).is_err());
    }

    #[test]
    fn header_only_yields_nothing() {
        let records = parse_incident_records(HEADER.as_bytes()).unwrap();
        assert!(records.is_empty());
    }
}
