use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use paycert::{
    CertError, FileSink, FixtureDirectory, FixtureSource, GatewayConfig,
    HttpRequestExecutor, NameFilter, RunState, SequentialRunner,
    StaticValueSource,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const MERCHANT_ID: &str = "1166386";
/// `cert-user:cert-pass`
const BASIC_AUTH: &str = "Basic Y2VydC11c2VyOmNlcnQtcGFzcw==";
const SUITE_HEADER: &str = "x-cert-suite";

#[derive(Default)]
struct GatewayState {
    counter: AtomicUsize,
    received: Mutex<Vec<(String, Value)>>,
}

impl GatewayState {
    fn record(&self, endpoint: &str, body: &Value) -> usize {
        self.received
            .lock()
            .unwrap()
            .push((endpoint.to_string(), body.clone()));
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

type Reply = (StatusCode, Json<Value>);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Rejects requests lacking the certification credentials.
fn check_credentials(headers: &HeaderMap) -> Result<(), Reply> {
    let reason = if header(headers, "authorization") != Some(BASIC_AUTH) {
        "authorization"
    } else if header(headers, "x-merchant-id") != Some(MERCHANT_ID) {
        "merchant"
    } else if header(headers, SUITE_HEADER) != Some("paycert") {
        "suite header"
    } else {
        return Ok(());
    };
    Err((
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "invalid credentials", "reason": reason})),
    ))
}

async fn authorize(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Reply> {
    check_credentials(&headers)?;
    let n = state.record("authorization", &body);
    let amount = body
        .pointer("/Transaction/Amount")
        .and_then(|v| v.as_str())
        .unwrap_or("0");
    // Amounts ending in 10 are declined for insufficient funds.
    let (code, message) = if amount.ends_with("10") {
        ("110", "Insufficient Funds")
    } else {
        ("000", "Approved")
    };
    Ok(Json(json!({
        "RequestID": format!("req-{n}"),
        "Transaction": {
            "TransactionID": format!("txn-{n}"),
            "ResponseCode": code,
            "Message": message
        }
    })))
}

async fn capture(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Reply> {
    check_credentials(&headers)?;
    let n = state.record("capture", &body);
    Ok(Json(json!({
        "RequestID": format!("req-{n}"),
        "Transaction": {"TransactionID": format!("txn-{n}"), "ResponseCode": "000"}
    })))
}

async fn void(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    if let Err(rejected) = check_credentials(&headers) {
        return rejected;
    }
    state.record("void", &body);
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "merchant not authorized for void"})),
    )
}

/// Certification gateway double listening on an ephemeral port.
struct StubGateway {
    base_url: String,
    state: Arc<GatewayState>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl StubGateway {
    async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(GatewayState::default());

        let app = Router::new()
            .route("/v1/authorization", post(authorize))
            .route("/v1/capture", post(capture))
            .route("/v1/void", post(void))
            .with_state(state.clone());

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
                .expect("stub gateway failed");
        });

        Self {
            base_url,
            state,
            stop_tx: Some(stop_tx),
            task,
        }
    }

    fn received(&self) -> Vec<(String, Value)> {
        self.state.received.lock().unwrap().clone()
    }

    /// Configuration carrying the credentials the stub accepts.
    fn config(&self) -> GatewayConfig {
        let mut config = GatewayConfig::new(self.base_url.clone())
            .with_endpoint("AUTHORIZATION", "/v1/authorization")
            .with_endpoint("CAPTURE", "/v1/capture")
            .with_endpoint("VOID", "/v1/void");
        config.user = Some("cert-user".into());
        config.password = Some("cert-pass".into());
        config.merchant_id = Some(MERCHANT_ID.into());
        config
            .headers
            .insert(SUITE_HEADER.to_string(), "paycert".to_string());
        config.timeout = 5;
        config
    }

    async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for StubGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn write_fixtures(dir: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        fs::write(dir.join(name), content).unwrap();
    }
}

fn runner_for(
    server: &StubGateway,
    output: &Path,
    values: &[(&str, &str)],
) -> SequentialRunner {
    runner_with_config(server.config(), output, values)
}

fn runner_with_config(
    config: GatewayConfig,
    output: &Path,
    values: &[(&str, &str)],
) -> SequentialRunner {
    let mut source = StaticValueSource::default();
    for (k, v) in values {
        source.insert(*k, *v);
    }
    SequentialRunner::new(
        Box::new(HttpRequestExecutor::new(config)),
        Box::new(source),
        Box::new(FileSink::create(output).unwrap()),
    )
}

#[tokio::test]
async fn certification_run_chains_results_and_tokens() {
    let server = StubGateway::start().await;
    let dir = tempfile::tempdir().unwrap();
    let fixtures = dir.path().join("cert_fixtures");
    fs::create_dir(&fixtures).unwrap();
    write_fixtures(
        &fixtures,
        &[
            (
                "L_AC_1.json",
                r#"{
                    "endpoint": "AUTHORIZATION",
                    "body": {
                        "Transaction": {"Amount": "10100", "OrderSource": "ecommerce"},
                        "PaymentAccount": {"PaypageRegistrationID": "${eProtect.visa_valid}"}
                    }
                }"#,
            ),
            (
                "L_AC_2.json",
                r##"{
                    "endpoint": "CAPTURE",
                    "body": {
                        "Transaction": {
                            "TransactionID": "#{L_AC_1.Transaction.TransactionID}",
                            "Amount": "10100"
                        }
                    }
                }"##,
            ),
        ],
    );
    let output = dir.path().join("certs.txt");

    let scenarios = FixtureDirectory::new(&fixtures).load().unwrap();
    let mut runner = runner_for(&server, &output, &[("visa_valid", "REG-VISA-1")]);
    let summary = runner.run(&scenarios).await.expect("run should complete");

    assert_eq!(runner.state(), RunState::Completed);
    assert_eq!(summary.completed.len(), 2);
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "L_AC_1,req-1\nL_AC_2,req-2\n"
    );

    let received = server.received();
    assert_eq!(
        received[0].1["PaymentAccount"]["PaypageRegistrationID"],
        json!("REG-VISA-1")
    );
    assert_eq!(received[1].0, "capture");
    assert_eq!(received[1].1["Transaction"]["TransactionID"], json!("txn-1"));

    server.stop().await;
}

#[tokio::test]
async fn business_decline_is_recorded_like_any_result() {
    let server = StubGateway::start().await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("certs.txt");
    let scenarios = vec![
        paycert::ScenarioDefinition::new(
            "L_AC_5",
            "AUTHORIZATION",
            json!({"Transaction": {"Amount": "20110"}}),
        ),
        paycert::ScenarioDefinition::new(
            "L_AC_6",
            "CAPTURE",
            json!({"Transaction": {"TransactionID": "#{L_AC_5.Transaction.TransactionID}"}}),
        ),
    ];

    let mut runner = runner_for(&server, &output, &[]);
    let summary = runner.run(&scenarios).await.expect("declines are not fatal");

    assert_eq!(summary.completed.len(), 2);
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "L_AC_5,req-1\nL_AC_6,req-2\n"
    );

    server.stop().await;
}

#[tokio::test]
async fn gateway_rejection_aborts_and_keeps_written_lines() {
    let server = StubGateway::start().await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("certs.txt");
    let scenarios = vec![
        paycert::ScenarioDefinition::new(
            "L_V_1",
            "AUTHORIZATION",
            json!({"Transaction": {"Amount": "500"}}),
        ),
        paycert::ScenarioDefinition::new(
            "L_V_2",
            "VOID",
            json!({"Transaction": {"TransactionID": "#{L_V_1.Transaction.TransactionID}"}}),
        ),
        paycert::ScenarioDefinition::new(
            "L_V_3",
            "CAPTURE",
            json!({"Transaction": {"TransactionID": "#{L_V_1.Transaction.TransactionID}"}}),
        ),
    ];

    let mut runner = runner_for(&server, &output, &[]);
    let err = runner.run(&scenarios).await.unwrap_err();

    match err {
        CertError::ApiLevelFailure { scenario, payload } => {
            assert_eq!(scenario, "L_V_2");
            assert!(payload.contains("not authorized"), "payload: {payload}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(runner.state(), RunState::Aborted);
    assert_eq!(fs::read_to_string(&output).unwrap(), "L_V_1,req-1\n");
    assert_eq!(server.received().len(), 2);

    server.stop().await;
}

#[tokio::test]
async fn group_filter_runs_only_matching_scenarios() {
    let server = StubGateway::start().await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("certs.txt");
    let scenarios = vec![
        paycert::ScenarioDefinition::new(
            "L_S_1",
            "AUTHORIZATION",
            json!({"Transaction": {"Amount": "100"}}),
        ),
        paycert::ScenarioDefinition::new(
            "L_AC_1",
            "AUTHORIZATION",
            json!({"Transaction": {"Amount": "200"}}),
        ),
    ];

    let mut runner = runner_for(&server, &output, &[])
        .with_filter(NameFilter::cert_group("AC"));
    let summary = runner.run(&scenarios).await.unwrap();

    assert_eq!(summary.skipped, vec!["L_S_1".to_string()]);
    assert_eq!(fs::read_to_string(&output).unwrap(), "L_AC_1,req-1\n");
    assert_eq!(server.received().len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn unknown_endpoint_aborts_before_sending() {
    let server = StubGateway::start().await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("certs.txt");
    let scenarios = vec![paycert::ScenarioDefinition::new(
        "L_R_1",
        "RETURN",
        json!({"Transaction": {"Amount": "100"}}),
    )];

    let mut runner = runner_for(&server, &output, &[]);
    let err = runner.run(&scenarios).await.unwrap_err();

    assert!(matches!(err, CertError::UnknownEndpoint(ref id) if id == "RETURN"));
    assert!(server.received().is_empty());
    assert_eq!(fs::read_to_string(&output).unwrap(), "");

    server.stop().await;
}

#[tokio::test]
async fn wrong_credentials_are_an_api_level_failure() {
    let server = StubGateway::start().await;
    let dir = tempfile::tempdir().unwrap();
    let scenarios = vec![paycert::ScenarioDefinition::new(
        "L_AC_1",
        "AUTHORIZATION",
        json!({"Transaction": {"Amount": "100"}}),
    )];

    for (reason, tamper) in [
        ("authorization", "password"),
        ("authorization", "user"),
        ("merchant", "merchant_id"),
        ("suite header", "headers"),
    ] {
        let output = dir.path().join(format!("certs-{tamper}.txt"));
        let mut config = server.config();
        match tamper {
            "password" => config.password = Some("wrong".into()),
            "user" => config.user = None,
            "merchant_id" => config.merchant_id = Some("999".into()),
            _ => config.headers.clear(),
        }

        let mut runner = runner_with_config(config, &output, &[]);
        let err = runner.run(&scenarios).await.unwrap_err();

        match err {
            CertError::ApiLevelFailure { scenario, payload } => {
                assert_eq!(scenario, "L_AC_1");
                assert!(payload.contains(reason), "payload: {payload}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fs::read_to_string(&output).unwrap(), "");
    }
    assert!(server.received().is_empty());

    server.stop().await;
}
