//! Log export end to end: count variable, trigger call, row stream, CSV file.

mod common;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

use common::{Reply, SseServer};
use nodewatch::api::{ApiError, Device, DeviceApi, FunctionReply, VariableReply};
use nodewatch::export::{run_export, ExportOptions, Finish};
use nodewatch::stream::{AuthMode, Backoff, EventStream, Framing, StreamTarget};

struct FakeCloud {
    vars: HashMap<String, Value>,
    fail_function: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeCloud {
    fn with_count(count: Option<u64>) -> Self {
        let mut vars = HashMap::new();
        if let Some(n) = count {
            vars.insert("logCount".to_string(), json!(n));
        }
        Self {
            vars,
            fail_function: false,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DeviceApi for FakeCloud {
    async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(vec![])
    }

    async fn get_variable(&self, _device_id: &str, name: &str) -> Result<VariableReply> {
        match self.vars.get(name) {
            Some(v) => Ok(VariableReply { result: v.clone(), name: None }),
            None => Err(ApiError::Status { status: 404, body: String::new() }.into()),
        }
    }

    async fn call_function(&self, _device_id: &str, name: &str, _arg: &str) -> Result<FunctionReply> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.fail_function {
            return Err(ApiError::Status { status: 400, body: String::new() }.into());
        }
        Ok(FunctionReply { return_value: Some(0), connected: Some(true) })
    }
}

fn export_stream(server: &SseServer) -> EventStream {
    let base = Url::parse(&server.base).unwrap();
    let target = StreamTarget::device_events(&base, "dev1", "logRow", "tok", AuthMode::Header).unwrap();
    EventStream::new(target, Framing::BlankLine, Backoff::from_millis(20, 80)).unwrap()
}

fn opts(quiet_ms: u64) -> ExportOptions {
    ExportOptions {
        header: Some("idx,ts,battPct".to_string()),
        quiet: Duration::from_millis(quiet_ms),
        ..ExportOptions::default()
    }
}

#[tokio::test]
async fn collects_until_expected_count() {
    let body = concat!(
        "data: {\"data\":\"2,1700000060,79.5\",\"ttl\":60,\"published_at\":\"t\",\"coreid\":\"dev1\"}\n\n",
        "data: status ok\n\n",
        "data: 1,1700000000,80.0\n\n",
        "data: 2,1700000060,79.5\n\n",
        "data: 3,1700000120,79.1\n\n",
    );
    let server = SseServer::start(vec![Reply::EventsThenHold(body.to_string())]).await;
    let cloud = FakeCloud::with_count(Some(3));
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("log.csv");

    let summary = run_export(&cloud, "dev1", export_stream(&server), &opts(2_000), &out)
        .await
        .unwrap();

    assert_eq!(summary.finish, Finish::Complete);
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.expected, Some(3));
    assert_eq!(*cloud.calls.lock().unwrap(), vec!["exportLog".to_string()]);
    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(
        text,
        "idx,ts,battPct\n1,1700000000,80.0\n2,1700000060,79.5\n3,1700000120,79.1\n"
    );
}

#[tokio::test]
async fn quiet_period_saves_partial_rows() {
    let body = "data: 1,10,50\n\ndata: 2,20,49\n\n";
    let server = SseServer::start(vec![Reply::EventsThenHold(body.to_string())]).await;
    let cloud = FakeCloud::with_count(Some(10));
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("partial.csv");

    let summary = run_export(&cloud, "dev1", export_stream(&server), &opts(300), &out)
        .await
        .unwrap();

    assert_eq!(summary.finish, Finish::Quiet);
    assert_eq!(summary.rows, 2);
    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text, "idx,ts,battPct\n1,10,50\n2,20,49\n");
}

#[tokio::test]
async fn unknown_count_waits_for_quiet() {
    let server = SseServer::start(vec![Reply::EventsThenHold("data: 5,1,2\n\n".to_string())]).await;
    let cloud = FakeCloud::with_count(None);
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("unknown.csv");

    let summary = run_export(&cloud, "dev1", export_stream(&server), &opts(300), &out)
        .await
        .unwrap();

    assert_eq!(summary.expected, None);
    assert_eq!(summary.finish, Finish::Quiet);
    assert_eq!(summary.rows, 1);
}

#[tokio::test]
async fn zero_count_finishes_without_trigger() {
    let server = SseServer::start(vec![Reply::Status(500)]).await;
    let cloud = FakeCloud::with_count(Some(0));
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("empty.csv");

    let summary = run_export(&cloud, "dev1", export_stream(&server), &opts(300), &out)
        .await
        .unwrap();

    assert_eq!(summary.finish, Finish::Complete);
    assert_eq!(summary.rows, 0);
    assert!(cloud.calls.lock().unwrap().is_empty());
    assert!(server.requests().is_empty());
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "idx,ts,battPct\n");
}

#[tokio::test]
async fn failed_trigger_still_writes_file() {
    let server = SseServer::start(vec![Reply::EventsThenHold(String::new())]).await;
    let mut cloud = FakeCloud::with_count(Some(4));
    cloud.fail_function = true;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("failed.csv");

    let summary = run_export(&cloud, "dev1", export_stream(&server), &opts(2_000), &out)
        .await
        .unwrap();

    assert_eq!(summary.finish, Finish::Error("Export call failed: HTTP 400".to_string()));
    assert_eq!(summary.rows, 0);
    assert!(out.exists());
}

#[tokio::test]
async fn stream_that_never_opens_reports_error() {
    let server = SseServer::start(vec![Reply::Status(401)]).await;
    let cloud = FakeCloud::with_count(Some(5));
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("unopened.csv");

    let summary = run_export(&cloud, "dev1", export_stream(&server), &opts(400), &out)
        .await
        .unwrap();

    assert_eq!(
        summary.finish,
        Finish::Error("Event stream open failed: HTTP 401".to_string())
    );
    assert!(cloud.calls.lock().unwrap().is_empty());
    assert!(!server.requests().is_empty());
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "idx,ts,battPct\n");
}
