//! The `query` subcommand.

use std::io::Write;
use std::str::FromStr as _;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use gva_archive::client::DEFAULT_ROOT_URL;
use gva_archive::criteria::{Criterion, DateRange, parse_date_comparator, parse_value_comparator};
use gva_archive::dates::interpret_date;
use gva_archive::options::QuerySpec;
use gva_archive::poll::PollConfig;
use gva_archive::{ArchiveClient, ArchiveError, ClientConfig};
use gva_archive_models::{CoordinateOrder, DateComparator, FusedIncident};
use gva_cli_utils::{IndicatifProgress, MultiProgress};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Specify a URL to use as the root for accessing the archive
    #[arg(short, long, default_value = DEFAULT_ROOT_URL)]
    pub url: String,

    /// Specify a state to filter results by
    #[arg(long)]
    pub in_state: Option<String>,

    /// Specify a city to filter results by
    #[arg(long)]
    pub in_city: Option<String>,

    /// Specify a county to filter results by
    #[arg(long)]
    pub in_county: Option<String>,

    /// Start date to filter results by, inclusive (e.g. "2020-01-01", "1 year ago")
    #[arg(long)]
    pub from: Option<String>,

    /// End date to filter results by, inclusive (e.g. "today")
    #[arg(long)]
    pub to: Option<String>,

    /// How incident dates are compared ("is in", "is not in", "is in the last",
    /// "is not in the last", "is current year", "is year", "is not year")
    #[arg(long)]
    pub date_comparator: Option<String>,

    /// Number of trailing days, for "is in the last" / "is not in the last"
    #[arg(long, conflicts_with_all = ["from", "to", "date_year"])]
    pub last_days: Option<u32>,

    /// Calendar year, for "is year" / "is not year"
    #[arg(long, conflicts_with_all = ["from", "to"])]
    pub date_year: Option<i32>,

    /// Filter by participant age
    #[arg(long)]
    pub participant_age: Option<u32>,

    /// How participant ages are compared (=, >, <, !=)
    #[arg(long, default_value = "=")]
    pub age_comparator: String,

    /// Match incidents satisfying any criterion instead of all of them
    #[arg(long)]
    pub any: bool,

    /// Pause between export progress requests, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Give up after this many progress requests (0 = never)
    #[arg(long, default_value_t = 1200)]
    pub max_poll_attempts: u32,

    /// Give up waiting for the export after this many seconds (0 = never)
    #[arg(long, default_value_t = 600)]
    pub timeout_secs: u64,

    /// Field order of the map page's coordinate records (lat-lon, lon-lat)
    #[arg(long, default_value = "lat-lon")]
    pub coordinate_order: String,
}

/// Builds the search from the filter flags. Relative dates resolve
/// against `now`.
pub fn build_spec(args: &QueryArgs, now: DateTime<Utc>) -> Result<QuerySpec, ArchiveError> {
    let mut spec = QuerySpec::new().with_all_criteria_matching(!args.any);

    if args.in_state.is_some() || args.in_city.is_some() || args.in_county.is_some() {
        spec = spec.with_criterion(Criterion::location(
            args.in_state.as_deref(),
            args.in_city.as_deref(),
            args.in_county.as_deref(),
        )?);
    }

    if let Some(criterion) = date_criterion(args, now)? {
        spec = spec.with_criterion(criterion);
    }

    if let Some(age) = args.participant_age {
        let comparator = parse_value_comparator(&args.age_comparator)?;
        spec = spec.with_criterion(Criterion::participant_age(comparator, age));
    }

    Ok(spec)
}

fn date_criterion(args: &QueryArgs, now: DateTime<Utc>) -> Result<Option<Criterion>, ArchiveError> {
    let comparator = args
        .date_comparator
        .as_deref()
        .map(parse_date_comparator)
        .transpose()?;

    let range = if let Some(days) = args.last_days {
        DateRange::LastDays(days)
    } else if let Some(year) = args.date_year {
        DateRange::Year(year)
    } else {
        match (args.from.as_deref(), args.to.as_deref()) {
            (Some(from), Some(to)) => DateRange::Between {
                from: flag_date("from", from, now)?,
                to: flag_date("to", to, now)?,
            },
            (None, None) => match comparator {
                None => return Ok(None),
                Some(DateComparator::IsCurrentYear) => DateRange::CurrentYear,
                Some(other) => {
                    return Err(config_error(format!(
                        "date comparator '{other}' needs --from/--to, --last-days, or --date-year"
                    )));
                }
            },
            _ => return Err(config_error("--from and --to must be given together")),
        }
    };

    let comparator = comparator.unwrap_or(match range {
        DateRange::Between { .. } => DateComparator::IsIn,
        DateRange::LastDays(_) => DateComparator::IsInTheLast,
        DateRange::Year(_) => DateComparator::IsYear,
        DateRange::CurrentYear => DateComparator::IsCurrentYear,
    });

    Criterion::incident_date(comparator, range).map(Some)
}

fn flag_date(flag: &str, value: &str, now: DateTime<Utc>) -> Result<NaiveDate, ArchiveError> {
    interpret_date(value, now)
        .map(|at| at.date_naive())
        .map_err(|e| config_error(format!("invalid --{flag} date: {e}")))
}

/// Builds the client settings from the connection and polling flags.
pub fn build_config(args: &QueryArgs) -> Result<ClientConfig, ArchiveError> {
    let coordinate_order = CoordinateOrder::from_str(args.coordinate_order.trim()).map_err(|_| {
        config_error(format!(
            "coordinate order '{}' must be one of: lat-lon, lon-lat",
            args.coordinate_order
        ))
    })?;

    let poll = PollConfig::default()
        .with_interval(Duration::from_millis(args.poll_interval_ms))
        .with_max_attempts(Some(args.max_poll_attempts).filter(|&n| n > 0))
        .with_deadline(Some(Duration::from_secs(args.timeout_secs)).filter(|d| !d.is_zero()));

    Ok(ClientConfig::default()
        .with_root_url(args.url.clone())
        .with_poll(poll)
        .with_coordinate_order(coordinate_order))
}

/// Column names of [`FusedIncident`] as serialized.
const CSV_HEADER: [&str; 11] = [
    "incidentId",
    "occurredAt",
    "rawDate",
    "state",
    "cityOrCounty",
    "address",
    "killed",
    "injured",
    "operations",
    "longitude",
    "latitude",
];

/// Writes the incidents as CSV. The header row is written even when there
/// are no incidents.
pub fn write_csv<W: Write>(out: W, incidents: &[FusedIncident]) -> Result<(), ArchiveError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);
    writer.write_record(CSV_HEADER)?;
    for incident in incidents {
        writer.serialize(incident)?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Runs the query and prints the result. Nothing is printed unless the
/// whole query succeeds.
pub async fn run(args: &QueryArgs, multi: &MultiProgress) -> Result<(), ArchiveError> {
    let spec = build_spec(args, Utc::now())?;
    let config = build_config(args)?;

    let progress = IndicatifProgress::export_bar(multi, "Registering query");
    let client = ArchiveClient::new(config, progress)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling query");
            on_interrupt.cancel();
        }
    });

    let incidents = client.query_incidents(&spec, &cancel).await?;
    log::info!("Writing {} incident(s)", incidents.len());

    write_csv(std::io::stdout().lock(), &incidents)
}

fn config_error(message: impl Into<String>) -> ArchiveError {
    ArchiveError::Config {
        message: message.into(),
    }
}
