//! Remote log export: trigger the device to publish its log as rows on an
//! event stream, collect them, and save a CSV file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::time::{sleep_until, Instant};

use crate::api::DeviceApi;
use crate::device::{as_number, unwrap_envelope};
use crate::logging::{log, log_export_progress, obj, v_str, Domain, Level};
use crate::stream::{EventStream, StreamMessage};

pub mod csv;

/// Numeric prefix of a log row (`^\d+,`), if the line is one.
pub fn row_index(line: &str) -> Option<u64> {
    let (head, _) = line.trim_start().split_once(',')?;
    if head.is_empty() || !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    head.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Added,
    Duplicate,
    NotARow,
}

/// Rows gathered so far, keyed and ordered by their numeric prefix.
#[derive(Debug)]
pub struct ExportCollector {
    rows: BTreeMap<u64, String>,
    expected: Option<u64>,
    quiet: Duration,
    last_activity: Instant,
}

impl ExportCollector {
    pub fn new(expected: Option<u64>, quiet: Duration) -> Self {
        Self {
            rows: BTreeMap::new(),
            expected,
            quiet,
            last_activity: Instant::now(),
        }
    }

    pub fn accept(&mut self, line: &str) -> Accept {
        let line = line.trim();
        let Some(idx) = row_index(line) else {
            return Accept::NotARow;
        };
        if self.rows.contains_key(&idx) {
            return Accept::Duplicate;
        }
        self.rows.insert(idx, line.to_string());
        self.touch();
        Accept::Added
    }

    /// Restart the quiet-period timer.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn deadline(&self) -> Instant {
        self.last_activity + self.quiet
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.expected, Some(n) if self.rows.len() as u64 >= n)
    }

    pub fn expected(&self) -> Option<u64> {
        self.expected
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &str> {
        self.rows.values().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finish {
    /// Expected row count reached.
    Complete,
    /// No new row within the quiet period.
    Quiet,
    /// Something failed; whatever arrived was still saved.
    Error(String),
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub count_variable: String,
    pub function: String,
    pub header: Option<String>,
    pub quiet: Duration,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            count_variable: "logCount".to_string(),
            function: "exportLog".to_string(),
            header: Some("idx,ts,battPct,battV,sigPct".to_string()),
            quiet: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub expected: Option<u64>,
    pub finish: Finish,
}

/// Read the expected count, open the row stream, trigger the export once the
/// stream is up, and collect until complete or quiet. The file is written in
/// every case.
pub async fn run_export(
    api: &dyn DeviceApi,
    device_id: &str,
    stream: EventStream,
    opts: &ExportOptions,
    out: &Path,
) -> Result<ExportSummary> {
    let expected = match api.get_variable(device_id, &opts.count_variable).await {
        Ok(reply) => as_number(&reply.result).map(|n| n.max(0.0) as u64),
        Err(e) => {
            log(
                Level::Warn,
                Domain::Export,
                "count_unavailable",
                obj(&[("error", v_str(&e.to_string()))]),
            );
            None
        }
    };

    let mut collector = ExportCollector::new(expected, opts.quiet);
    let finish = if expected == Some(0) {
        Finish::Complete
    } else {
        collect(api, device_id, stream, opts, &mut collector).await
    };

    let rows = csv::write_rows(out, opts.header.as_deref(), collector.rows())?;
    log(
        Level::Info,
        Domain::Export,
        "saved",
        obj(&[
            ("device_id", v_str(device_id)),
            ("path", v_str(&out.display().to_string())),
            ("rows", json!(rows)),
            ("expected", json!(expected)),
            ("finish", v_str(&format!("{:?}", finish))),
        ]),
    );
    Ok(ExportSummary {
        path: out.to_path_buf(),
        rows,
        expected,
        finish,
    })
}

async fn collect(
    api: &dyn DeviceApi,
    device_id: &str,
    stream: EventStream,
    opts: &ExportOptions,
    collector: &mut ExportCollector,
) -> Finish {
    let mut handle = stream.spawn(256);
    let mut triggered = false;
    let mut last_closed: Option<String> = None;
    collector.touch();

    let finish = loop {
        tokio::select! {
            msg = handle.messages.recv() => match msg {
                Some(StreamMessage::Opened) => {
                    collector.touch();
                    if triggered {
                        continue;
                    }
                    triggered = true;
                    if let Err(e) = api.call_function(device_id, &opts.function, "").await {
                        break Finish::Error(format!("Export call failed: {}", e));
                    }
                    log(
                        Level::Info,
                        Domain::Export,
                        "triggered",
                        obj(&[("device_id", v_str(device_id)), ("expected", json!(collector.expected()))]),
                    );
                }
                Some(StreamMessage::Frame(frame)) => {
                    let payload = unwrap_envelope(&frame.data);
                    let mut added = false;
                    for line in payload.lines() {
                        added |= collector.accept(line) == Accept::Added;
                    }
                    if added {
                        log_export_progress(collector.len(), collector.expected());
                    }
                    if collector.is_complete() {
                        break Finish::Complete;
                    }
                }
                Some(StreamMessage::Closed { reason }) => last_closed = Some(reason),
                Some(_) => {}
                None => break Finish::Error("event stream task ended".to_string()),
            },
            _ = sleep_until(collector.deadline()) => {
                if triggered {
                    break Finish::Quiet;
                }
                // the row stream never opened, so the export was never requested
                let reason = last_closed
                    .take()
                    .unwrap_or_else(|| "Event stream did not open.".to_string());
                break Finish::Error(reason);
            }
        }
    };

    if let Err(e) = handle.stop().await {
        log(
            Level::Warn,
            Domain::Export,
            "stream_stop_failed",
            obj(&[("error", v_str(&e.to_string()))]),
        );
    }
    finish
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_index() {
        assert_eq!(row_index("12,1700000000,80.5"), Some(12));
        assert_eq!(row_index("  7,x"), Some(7));
        assert_eq!(row_index("x12,1"), None);
        assert_eq!(row_index(",1"), None);
        assert_eq!(row_index("12"), None);
        assert_eq!(row_index("{\"battPct\":1}"), None);
    }

    #[tokio::test]
    async fn test_collector_dedups_and_sorts() {
        let mut c = ExportCollector::new(Some(3), Duration::from_secs(8));
        assert_eq!(c.accept("2,b"), Accept::Added);
        assert_eq!(c.accept("hello"), Accept::NotARow);
        assert_eq!(c.accept("1,a"), Accept::Added);
        assert_eq!(c.accept("2,b"), Accept::Duplicate);
        assert!(!c.is_complete());
        assert_eq!(c.accept("3,c"), Accept::Added);
        assert!(c.is_complete());
        assert_eq!(c.rows().collect::<Vec<_>>(), vec!["1,a", "2,b", "3,c"]);
    }

    #[tokio::test]
    async fn test_unknown_count_never_completes() {
        let mut c = ExportCollector::new(None, Duration::from_secs(8));
        c.accept("1,a");
        assert!(!c.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_moves_with_rows() {
        let mut c = ExportCollector::new(None, Duration::from_secs(8));
        let first = c.deadline();
        tokio::time::advance(Duration::from_secs(5)).await;
        c.accept("1,a");
        assert_eq!(c.deadline() - first, Duration::from_secs(5));
    }
}
