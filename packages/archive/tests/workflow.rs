//! Replays the archive's redirect/batch protocol against a local mock
//! server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone as _, Utc};
use gva_archive::criteria::Criterion;
use gva_archive::options::QuerySpec;
use gva_archive::poll::PollConfig;
use gva_archive::progress::{ProgressCallback, null_progress};
use gva_archive::session::Session;
use gva_archive::workflow::{Endpoints, ExportWorkflow, WorkflowState};
use gva_archive::{ArchiveClient, ArchiveError, ClientConfig, Phase};
use gva_archive_models::{FusedIncident, QueryId, ResultsType};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const SESSION_COOKIE: &str = "SESSgva=s3ss10n";

const EXPORT_CSV: &str = "\
Incident ID,Incident Date,State,City Or County,Address,# Killed,# Injured,Operations
A,\"January 2, 2020\",California,Oakland,123 Main,1,2,
B,01/03/2020,California,Oakland,9 Elm,0,1,
";

fn redirect(location: &str) -> ResponseTemplate {
    ResponseTemplate::new(302).insert_header("Location", location)
}

fn progress(percentage: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(format!(
        r#"{{"status":true,"percentage":"{percentage}","message":"Processed {percentage}%"}}"#
    ))
}

fn query_id_from_path(request: &Request) -> String {
    request
        .url
        .path_segments()
        .and_then(|mut segments| segments.nth(1))
        .unwrap_or_default()
        .to_owned()
}

async fn mount_submit(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(body_string_contains("form_id=gva_entry_query"))
        .respond_with(redirect("/query/submitted").insert_header(
            "Set-Cookie",
            format!("{SESSION_COOKIE}; Path=/").as_str(),
        ))
        .expect(1)
        .mount(server)
        .await;
}

/// Mounts every step after submit. Each entry of `percentages` answers
/// exactly one progress request, in order.
async fn mount_export(server: &MockServer, percentages: &[&str]) {
    let batch = format!("{}/batch?id=42&op=start", server.uri());

    Mock::given(method("GET"))
        .and(path_regex(r"^/query/[^/]+/export-csv$"))
        .and(header("cookie", SESSION_COOKIE))
        .respond_with(redirect(&batch))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/batch"))
        .and(query_param("op", "start"))
        .and(header("cookie", SESSION_COOKIE))
        .respond_with(redirect("/batch?id=42&op=do"))
        .expect(1)
        .mount(server)
        .await;

    for percentage in percentages {
        Mock::given(method("POST"))
            .and(path("/batch"))
            .and(query_param("id", "42"))
            .and(query_param("op", "do"))
            .and(header("x-requested-with", "XMLHttpRequest"))
            .respond_with(progress(percentage))
            .up_to_n_times(1)
            .expect(1)
            .mount(server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/batch"))
        .and(query_param("op", "finished"))
        .respond_with(redirect(
            "/export-finished?uuid=7e5e&filename=public%3A//export-7e5e.csv",
        ))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/export-finished/download"))
        .and(query_param("uuid", "7e5e"))
        .and(query_param("filename", "public://export-7e5e.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EXPORT_CSV))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_map(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/query/[^/]+/map$"))
        .respond_with(|request: &Request| {
            let id = query_id_from_path(request);
            ResponseTemplate::new(200).set_body_string(format!(
                r#"<script>jQuery.extend(Drupal.settings, {{"gva":{{"interactive-map-{id}":"37.8|-122.27|A"}}}});</script>"#
            ))
        })
        .expect(1)
        .mount(server)
        .await;
}

fn client(server: &MockServer) -> ArchiveClient {
    let config = ClientConfig::default()
        .with_root_url(server.uri())
        .with_poll(PollConfig::unbounded().with_max_attempts(Some(10)));
    ArchiveClient::new(config, null_progress()).unwrap()
}

fn workflow(server: &MockServer, poll: PollConfig) -> ExportWorkflow {
    ExportWorkflow::new(
        Session::new(None, None).unwrap(),
        Endpoints::new(&server.uri()).unwrap(),
        poll,
        null_progress(),
        CancellationToken::new(),
    )
}

fn options(query_id: &QueryId) -> gva_archive::options::QueryOptions {
    QuerySpec::new()
        .with_criterion(Criterion::location(Some("California"), None, None).unwrap())
        .to_options(query_id, ResultsType::Incidents)
}

#[tokio::test]
async fn full_query_fuses_export_with_map() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    mount_export(&server, &["10", "50", "100"]).await;
    mount_map(&server).await;

    let spec = QuerySpec::new()
        .with_criterion(Criterion::location(Some("California"), Some("Oakland"), None).unwrap());
    let incidents = client(&server)
        .query_incidents(&spec, &CancellationToken::new())
        .await
        .unwrap();

    let expected = vec![
        FusedIncident {
            incident_id: "A".to_owned(),
            occurred_at: Some(Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap()),
            raw_date: "January 2, 2020".to_owned(),
            state: "California".to_owned(),
            city_or_county: "Oakland".to_owned(),
            address: "123 Main".to_owned(),
            killed: 1,
            injured: 2,
            operations: String::new(),
            longitude: Some(-122.27),
            latitude: Some(37.8),
        },
        FusedIncident {
            incident_id: "B".to_owned(),
            occurred_at: Some(Utc.with_ymd_and_hms(2020, 1, 3, 0, 0, 0).unwrap()),
            raw_date: "01/03/2020".to_owned(),
            state: "California".to_owned(),
            city_or_county: "Oakland".to_owned(),
            address: "9 Elm".to_owned(),
            killed: 0,
            injured: 1,
            operations: String::new(),
            longitude: None,
            latitude: None,
        },
    ];
    assert_eq!(incidents, expected);
}

#[tokio::test]
async fn poll_stops_once_complete() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    mount_export(&server, &["10", "50", "100"]).await;

    let query_id = QueryId::new();
    let mut workflow = workflow(&server, PollConfig::unbounded());
    workflow.submit(&query_id, &options(&query_id)).await.unwrap();
    let batch = workflow.request_export(&query_id).await.unwrap();
    assert_eq!(batch.query(), Some("id=42&op=start"));
    workflow.start_batch(&batch).await.unwrap();

    let attempts = workflow.poll(&batch).await.unwrap();
    assert_eq!(attempts, 3);
    assert_eq!(workflow.state(), WorkflowState::Polling);

    let finished = workflow.finish(&batch).await.unwrap();
    let body = workflow.download(&finished).await.unwrap().read_to_end().await.unwrap();
    assert_eq!(body, EXPORT_CSV.as_bytes());
    assert_eq!(workflow.state(), WorkflowState::Downloaded);
}

#[derive(Default)]
struct RecordedProgress(Mutex<Vec<String>>);

impl RecordedProgress {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }
}

impl ProgressCallback for RecordedProgress {
    fn phase(&self, name: &str) {
        self.push(name.to_owned());
    }

    fn batch_started(&self) {
        self.push("batch".to_owned());
    }

    fn batch_percent(&self, percent: u8, _status: &str) {
        self.push(format!("{percent}%"));
    }

    fn completed(&self) {
        self.push("completed".to_owned());
    }

    fn abandoned(&self) {
        self.push("abandoned".to_owned());
    }
}

#[tokio::test]
async fn progress_follows_phases_and_batch_percentages() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    mount_export(&server, &["10", "50", "100"]).await;

    let recorded = Arc::new(RecordedProgress::default());
    let query_id = QueryId::new();
    let mut workflow = ExportWorkflow::new(
        Session::new(None, None).unwrap(),
        Endpoints::new(&server.uri()).unwrap(),
        PollConfig::unbounded(),
        Arc::clone(&recorded) as Arc<dyn ProgressCallback>,
        CancellationToken::new(),
    );
    let _download = workflow.run(&query_id, &options(&query_id)).await.unwrap();

    assert_eq!(
        *recorded.0.lock().unwrap(),
        [
            "Registering query",
            "Kicking off CSV export",
            "Starting batch process",
            "Waiting for export batch",
            "batch",
            "10%",
            "50%",
            "100%",
            "Finishing batch process",
            "Downloading CSV result",
            "completed",
        ]
    );
}

#[tokio::test]
async fn submit_without_redirect_fails_before_export() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<form>try again</form>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"/export-csv$"))
        .respond_with(redirect("/batch"))
        .expect(0)
        .mount(&server)
        .await;

    let err = client(&server)
        .query_incidents(&QuerySpec::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_protocol(), "{err}");
    assert_eq!(err.phase(), Some(Phase::Submit));
}

#[tokio::test]
async fn export_redirect_without_location_is_a_protocol_error() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path_regex(r"/export-csv$"))
        .respond_with(ResponseTemplate::new(302))
        .expect(1)
        .mount(&server)
        .await;

    let query_id = QueryId::new();
    let mut workflow = workflow(&server, PollConfig::unbounded());
    workflow.submit(&query_id, &options(&query_id)).await.unwrap();
    let err = workflow.request_export(&query_id).await.unwrap_err();

    assert!(err.is_protocol(), "{err}");
    assert_eq!(err.phase(), Some(Phase::RequestExport));
    assert_eq!(workflow.state(), WorkflowState::Failed);
}

#[tokio::test]
async fn malformed_progress_body_is_not_retried() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path_regex(r"/export-csv$"))
        .respond_with(redirect("/batch?id=9&op=start"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/batch"))
        .and(query_param("op", "start"))
        .respond_with(redirect("/batch?id=9&op=do"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Fatal error</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .query_incidents(&QuerySpec::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::Json { phase: Phase::Poll, .. }), "{err}");
    assert!(err.is_parse());
}

#[tokio::test]
async fn poll_gives_up_after_attempt_cap() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path_regex(r"/export-csv$"))
        .respond_with(redirect("/batch?id=5&op=start"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/batch"))
        .and(query_param("op", "start"))
        .respond_with(redirect("/batch?id=5&op=do"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/batch"))
        .respond_with(progress("10"))
        .expect(2)
        .mount(&server)
        .await;

    let query_id = QueryId::new();
    let mut workflow = workflow(&server, PollConfig::unbounded().with_max_attempts(Some(2)));
    workflow.submit(&query_id, &options(&query_id)).await.unwrap();
    let batch = workflow.request_export(&query_id).await.unwrap();
    workflow.start_batch(&batch).await.unwrap();
    let err = workflow.poll(&batch).await.unwrap_err();

    assert!(matches!(err, ArchiveError::PollExhausted { attempts: 2 }), "{err}");
    assert_eq!(workflow.state(), WorkflowState::Failed);
}

#[tokio::test]
async fn poll_gives_up_at_deadline() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path_regex(r"/export-csv$"))
        .respond_with(redirect("/batch?id=6&op=start"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/batch"))
        .and(query_param("op", "start"))
        .respond_with(redirect("/batch?id=6&op=do"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/batch"))
        .respond_with(progress("10"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/batch"))
        .and(query_param("op", "finished"))
        .respond_with(redirect("/export-finished"))
        .expect(0)
        .mount(&server)
        .await;

    let poll = PollConfig::unbounded()
        .with_interval(Duration::from_millis(10))
        .with_deadline(Some(Duration::from_millis(80)));
    let query_id = QueryId::new();
    let mut workflow = workflow(&server, poll);
    workflow.submit(&query_id, &options(&query_id)).await.unwrap();
    let batch = workflow.request_export(&query_id).await.unwrap();
    workflow.start_batch(&batch).await.unwrap();
    let err = workflow.poll(&batch).await.unwrap_err();

    assert!(matches!(err, ArchiveError::PollTimedOut { .. }), "{err}");
    assert_eq!(err.phase(), Some(Phase::Poll));
    assert_eq!(workflow.state(), WorkflowState::Failed);
}

#[tokio::test]
async fn cancellation_interrupts_polling() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path_regex(r"/export-csv$"))
        .respond_with(redirect("/batch?id=8&op=start"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/batch"))
        .and(query_param("op", "start"))
        .respond_with(redirect("/batch?id=8&op=do"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/batch"))
        .respond_with(progress("10"))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let config = ClientConfig::default()
        .with_root_url(server.uri())
        .with_poll(PollConfig::unbounded().with_interval(Duration::from_millis(20)));
    let client = ArchiveClient::new(config, null_progress()).unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = client
        .query_incidents(&QuerySpec::new(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Cancelled { phase: Phase::Poll }), "{err}");
}

#[tokio::test]
async fn missing_coordinate_table_fails_the_query() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    mount_export(&server, &["100"]).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/query/[^/]+/map$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>No results</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .query_incidents(&QuerySpec::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::CoordinatesNotFound { .. }), "{err}");
}
