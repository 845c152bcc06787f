//! Individual search criteria in the archive's form-field naming scheme.
//!
//! Every criterion owns a random correlation ID. All of a criterion's form
//! keys are nested under `query[filters][<correlation id>]`, which is how
//! the remote form groups the type, weight, comparator, and field values
//! that belong together.

use std::str::FromStr as _;

use chrono::NaiveDate;
use gva_archive_models::{DateComparator, ValueComparator};
use uuid::Uuid;

use crate::ArchiveError;
use crate::options::QueryOptions;

/// Weight the search form assigns to every filter.
pub const CRITERION_WEIGHT: &str = "0.001";

/// Date format of the `date-from` / `date-to` fields.
pub const FORM_DATE_FORMAT: &str = "%m/%d/%Y";

/// Outer comparator used by criteria whose comparison lives in the fields.
const OUTER_IS_IN: &str = "is in";

/// Location filter. At least one of the parts is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationFilter {
    /// State name as listed in the form's select box (e.g. `"California"`).
    pub state: Option<String>,
    /// City name.
    pub city: Option<String>,
    /// County name.
    pub county: Option<String>,
}

/// The value side of an incident date criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRange {
    /// Inclusive calendar range, for `is in` / `is not in`.
    Between {
        /// First day of the range.
        from: NaiveDate,
        /// Last day of the range.
        to: NaiveDate,
    },
    /// Trailing number of days, for `is in the last` / `is not in the last`.
    LastDays(u32),
    /// Calendar year, for `is year` / `is not year`.
    Year(i32),
    /// No value, for `is current year`.
    CurrentYear,
}

/// Incident date filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateFilter {
    /// How the incident date relates to the range.
    pub comparator: DateComparator,
    /// The range compared against.
    pub range: DateRange,
}

/// Participant age filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantAgeFilter {
    /// How the participant's age relates to `age`.
    pub comparator: ValueComparator,
    /// Age in years.
    pub age: u32,
}

/// What a criterion filters on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriterionKind {
    /// Where the incident happened.
    Location(LocationFilter),
    /// When the incident happened.
    IncidentDate(DateFilter),
    /// How old a participant was.
    ParticipantAge(ParticipantAgeFilter),
}

impl CriterionKind {
    /// The form's `type` tag for this kind of filter.
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        match self {
            Self::Location(_) => "IncidentLocation",
            Self::IncidentDate(_) => "IncidentDate",
            Self::ParticipantAge(_) => "ParticipantsAge",
        }
    }
}

/// One filter condition with its own correlation ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criterion {
    correlation_id: Uuid,
    kind: CriterionKind,
}

impl Criterion {
    fn new(kind: CriterionKind) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            kind,
        }
    }

    /// Filters incidents by state, city, and/or county. Empty strings count
    /// as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Config`] if all three parts are unset.
    pub fn location(
        state: Option<&str>,
        city: Option<&str>,
        county: Option<&str>,
    ) -> Result<Self, ArchiveError> {
        let non_empty = |s: Option<&str>| {
            s.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };
        let filter = LocationFilter {
            state: non_empty(state),
            city: non_empty(city),
            county: non_empty(county),
        };

        if filter.state.is_none() && filter.city.is_none() && filter.county.is_none() {
            return Err(ArchiveError::config(
                "location criterion needs a state, city, or county",
            ));
        }

        Ok(Self::new(CriterionKind::Location(filter)))
    }

    /// Filters incidents by date.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Config`] if the range does not fit the
    /// comparator or a calendar range ends before it starts.
    pub fn incident_date(comparator: DateComparator, range: DateRange) -> Result<Self, ArchiveError> {
        let fits = match range {
            DateRange::Between { from, to } => {
                if from > to {
                    return Err(ArchiveError::config(format!(
                        "date range ends ({to}) before it starts ({from})"
                    )));
                }
                matches!(comparator, DateComparator::IsIn | DateComparator::IsNotIn)
            }
            DateRange::LastDays(_) => matches!(
                comparator,
                DateComparator::IsInTheLast | DateComparator::IsNotInTheLast
            ),
            DateRange::Year(_) => {
                matches!(comparator, DateComparator::IsYear | DateComparator::IsNotYear)
            }
            DateRange::CurrentYear => comparator == DateComparator::IsCurrentYear,
        };

        if !fits {
            return Err(ArchiveError::config(format!(
                "date comparator '{comparator}' does not accept {range:?}"
            )));
        }

        Ok(Self::new(CriterionKind::IncidentDate(DateFilter {
            comparator,
            range,
        })))
    }

    /// Filters by participant age.
    #[must_use]
    pub fn participant_age(comparator: ValueComparator, age: u32) -> Self {
        Self::new(CriterionKind::ParticipantAge(ParticipantAgeFilter {
            comparator,
            age,
        }))
    }

    /// The ID binding this criterion's form fields together.
    #[must_use]
    pub const fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// What this criterion filters on.
    #[must_use]
    pub const fn kind(&self) -> &CriterionKind {
        &self.kind
    }

    /// Appends this criterion's form fields to `options`.
    pub fn encode(&self, options: &mut QueryOptions) {
        let prefix = format!("query[filters][{}]", self.correlation_id);
        let field = |name: &str| format!("{prefix}[outer_filter][filter][field]{name}");

        options.append(format!("{prefix}[type]"), self.kind.type_tag());
        options.append(format!("{prefix}[outer_filter][weight]"), CRITERION_WEIGHT);

        match &self.kind {
            CriterionKind::Location(location) => {
                options.append(format!("{prefix}[outer_filter][comparator]"), OUTER_IS_IN);
                if let Some(state) = &location.state {
                    options.append(field("[state][select]"), state.as_str());
                }
                if let Some(city) = &location.city {
                    options.append(field("[city_county][city][textfield]"), city.as_str());
                }
                if let Some(county) = &location.county {
                    options.append(field("[city_county][county][textfield]"), county.as_str());
                }
            }
            CriterionKind::IncidentDate(date) => {
                options.append(
                    format!("{prefix}[outer_filter][comparator]"),
                    date.comparator.to_string(),
                );
                match date.range {
                    DateRange::Between { from, to } => {
                        options.append(
                            field("[date-from]"),
                            from.format(FORM_DATE_FORMAT).to_string(),
                        );
                        options.append(field("[date-to]"), to.format(FORM_DATE_FORMAT).to_string());
                    }
                    DateRange::LastDays(days) => {
                        options.append(field("[date-last]"), days.to_string());
                    }
                    DateRange::Year(year) => {
                        options.append(field("[date-year]"), year.to_string());
                    }
                    DateRange::CurrentYear => {}
                }
            }
            CriterionKind::ParticipantAge(age) => {
                options.append(format!("{prefix}[outer_filter][comparator]"), OUTER_IS_IN);
                options.append(field("[comparator]"), age.comparator.to_string());
                options.append(field("[age]"), age.age.to_string());
            }
        }
    }
}

/// Parses a participant-attribute comparator (`=`, `>`, `<`, `!=`).
///
/// # Errors
///
/// Returns [`ArchiveError::Config`] listing the accepted values if `s` is
/// not one of them.
pub fn parse_value_comparator(s: &str) -> Result<ValueComparator, ArchiveError> {
    ValueComparator::from_str(s.trim()).map_err(|_| {
        let allowed = ValueComparator::ALL
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        ArchiveError::config(format!(
            "comparator '{s}' must be one of: {allowed}"
        ))
    })
}

/// Parses an incident date comparator (`is in`, `is not in`, ...).
///
/// # Errors
///
/// Returns [`ArchiveError::Config`] if `s` is not a known comparator.
pub fn parse_date_comparator(s: &str) -> Result<DateComparator, ArchiveError> {
    DateComparator::from_str(s.trim())
        .map_err(|_| ArchiveError::config(format!("unknown date comparator '{s}'")))
}
