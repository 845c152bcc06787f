//! Search form payload assembly.
//!
//! [`QuerySpec`] is the caller-facing description of a search: a match
//! mode plus an ordered list of [`Criterion`]s. [`QuerySpec::to_options`]
//! turns it into the [`QueryOptions`] form that gets posted, adding the
//! fixed fields every search carries.

use gva_archive_models::{MatchMode, QueryId, ResultsType};

use crate::criteria::Criterion;

/// Value of the `form_id` field.
pub const FORM_ID: &str = "gva_entry_query";

/// Value of the `op` field on the search form.
pub const SUBMIT_OP: &str = "Search";

/// Ordered multi-valued form payload.
///
/// Fields are only ever appended; nothing is overwritten or removed, so
/// several criteria can contribute fields without clobbering each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    fields: Vec<(String, String)>,
}

impl QueryOptions {
    /// Appends one key/value pair.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// First value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value stored under `key`, in insertion order.
    #[must_use]
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Iterates over all pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no pairs have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The pairs in the shape `reqwest::RequestBuilder::form` expects.
    #[must_use]
    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.fields
    }
}

/// A search to run: how criteria combine, and the criteria themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySpec {
    match_mode: MatchMode,
    criteria: Vec<Criterion>,
}

impl QuerySpec {
    /// Creates an empty search that requires all criteria to match.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether all or any criteria must match.
    #[must_use]
    pub const fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    /// Sets whether all criteria must match (`true`) or any (`false`).
    #[must_use]
    pub const fn with_all_criteria_matching(self, all: bool) -> Self {
        self.with_match_mode(MatchMode::from_all(all))
    }

    /// Adds a criterion after the ones already present.
    #[must_use]
    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// How criteria combine.
    #[must_use]
    pub const fn match_mode(&self) -> MatchMode {
        self.match_mode
    }

    /// The criteria, in the order they were added.
    #[must_use]
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// Builds the form payload for one run of this search.
    #[must_use]
    pub fn to_options(&self, query_id: &QueryId, results_type: ResultsType) -> QueryOptions {
        let mut options = QueryOptions::default();
        options.append(
            "query[base_group][base_group_select]",
            self.match_mode.wire_value(),
        );
        options.append("query[query_id]", query_id.as_str());
        options.append("query[results_type][select]", results_type.to_string());
        options.append("form_id", FORM_ID);
        options.append("op", SUBMIT_OP);

        for criterion in &self.criteria {
            criterion.encode(&mut options);
        }

        options
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::NaiveDate;
    use gva_archive_models::{DateComparator, ValueComparator};

    use super::*;
    use crate::criteria::DateRange;

    fn sample_spec() -> QuerySpec {
        QuerySpec::new()
            .with_criterion(Criterion::location(Some("Texas"), Some("Austin"), None).unwrap())
            .with_criterion(
                Criterion::incident_date(
                    DateComparator::IsIn,
                    DateRange::Between {
                        from: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                        to: NaiveDate::from_ymd_opt(2020, 6, 30).unwrap(),
                    },
                )
                .unwrap(),
            )
            .with_criterion(Criterion::participant_age(ValueComparator::LessThan, 18))
    }

    /// Extracts the correlation ID from a `query[filters][<id>]...` key.
    fn correlation_of(key: &str) -> Option<&str> {
        let rest = key.strip_prefix("query[filters][")?;
        rest.split(']').next()
    }

    #[test]
    fn base_fields_are_always_present() {
        let query_id = QueryId::from("q-1");
        let options = QuerySpec::new().to_options(&query_id, ResultsType::Incidents);

        assert_eq!(options.get("query[query_id]"), Some("q-1"));
        assert_eq!(options.get("form_id"), Some("gva_entry_query"));
        assert_eq!(options.get("op"), Some("Search"));
        assert_eq!(options.get("query[results_type][select]"), Some("incidents"));
        assert_eq!(
            options.get("query[base_group][base_group_select]"),
            Some("And")
        );
    }

    #[test]
    fn match_mode_any_yields_or() {
        let options = QuerySpec::new()
            .with_all_criteria_matching(false)
            .to_options(&QueryId::new(), ResultsType::Participants);
        assert_eq!(
            options.get("query[base_group][base_group_select]"),
            Some("Or")
        );
        assert_eq!(
            options.get("query[results_type][select]"),
            Some("participants")
        );
    }

    #[test]
    fn each_criterion_has_one_unique_correlation_id() {
        let spec = sample_spec();
        let options = spec.to_options(&QueryId::new(), ResultsType::Incidents);

        let ids: Vec<String> = spec
            .criteria()
            .iter()
            .map(|c| c.correlation_id().to_string())
            .collect();
        let unique: BTreeSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        // Every filter key belongs to exactly one of the criteria, and each
        // criterion's type/weight/comparator keys share its ID.
        for (key, _) in options.iter().filter(|(k, _)| k.starts_with("query[filters]")) {
            let id = correlation_of(key).unwrap();
            assert!(ids.iter().any(|known| known == id), "stray id in {key}");
        }
        for id in &ids {
            for suffix in ["[type]", "[outer_filter][weight]", "[outer_filter][comparator]"] {
                let key = format!("query[filters][{id}]{suffix}");
                assert_eq!(options.get_all(&key).len(), 1, "missing {key}");
            }
        }
    }

    #[test]
    fn criteria_are_additive() {
        let spec = sample_spec();
        let options = spec.to_options(&QueryId::new(), ResultsType::Incidents);

        // 5 base fields + location (3 + 2 parts) + date (3 + 2) + age (3 + 2)
        assert_eq!(options.len(), 5 + 5 + 5 + 5);
        assert_eq!(options.get_all("form_id").len(), 1);
    }

    #[test]
    fn repeated_kinds_keep_both_criteria() {
        let options = QuerySpec::new()
            .with_criterion(Criterion::location(Some("Ohio"), None, None).unwrap())
            .with_criterion(Criterion::location(Some("Iowa"), None, None).unwrap())
            .to_options(&QueryId::new(), ResultsType::Incidents);

        let states: Vec<&str> = options
            .iter()
            .filter(|(k, _)| k.ends_with("[state][select]"))
            .map(|(_, v)| v)
            .collect();
        assert_eq!(states, vec!["Ohio", "Iowa"]);
    }
}
