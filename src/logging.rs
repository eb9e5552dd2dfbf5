//! Structured logging for the device client.
//!
//! Every record is one JSON object per line on stderr (stdout belongs to the
//! dashboard). Records carry a run id, a sequence number and an RFC3339
//! timestamp so a session can be replayed or grepped afterwards. Setting
//! `LOG_FILE` additionally appends every record to that file.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok(s) => Self::parse(s).unwrap_or(Level::Info),
            Err(_) => Level::Info,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "fatal" => Some(Level::Fatal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Api,     // Cloud REST calls
    Stream,  // Event stream lifecycle
    Poll,    // Fallback variable reads
    Export,  // Log export sessions
    Device,  // Field updates, device selection
    System,  // Startup, shutdown, token handling
    Profile, // Call timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Api => "api",
            Domain::Stream => "stream",
            Domain::Poll => "poll",
            Domain::Export => "export",
            Domain::Device => "device",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS is a comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static MIN_LEVEL: OnceLock<Mutex<Level>> = OnceLock::new();
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    file: Option<Mutex<BufWriter<File>>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let file = std::env::var("LOG_FILE").ok().and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(f) => Some(Mutex::new(BufWriter::new(f))),
                Err(err) => {
                    eprintln!("[log] failed to open {}: {}", path, err);
                    None
                }
            }
        });
        RunContext { run_id, file }
    })
}

fn min_level() -> Level {
    MIN_LEVEL
        .get_or_init(|| Mutex::new(Level::from_env()))
        .lock()
        .map(|l| *l)
        .unwrap_or(Level::Info)
}

/// Override the level taken from `LOG_LEVEL` (used by the `--log-level` flag).
pub fn set_min_level(level: Level) {
    let cell = MIN_LEVEL.get_or_init(|| Mutex::new(level));
    if let Ok(mut l) = cell.lock() {
        *l = level;
    }
}

const SECRET_KEYS: [&str; 5] = [
    "authorization",
    "Authorization",
    "access_token",
    "token",
    "bearer",
];

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in SECRET_KEYS {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    for key in ["url", "reason", "error"] {
        if let Some(Value::String(text)) = fields.get(key) {
            let clean = redact_url(text);
            fields.insert(key.to_string(), Value::String(clean));
        }
    }
    fields
}

/// Mask the value of an `access_token` query parameter.
pub fn redact_url(url: &str) -> String {
    let Some(start) = url.find("access_token=") else {
        return url.to_string();
    };
    let value_start = start + "access_token=".len();
    let value_end = url[value_start..]
        .find('&')
        .map(|i| value_start + i)
        .unwrap_or(url.len());
    format!("{}[REDACTED]{}", &url[..value_start], &url[value_end..])
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["device_id", "event_name", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < min_level() || !domain.is_enabled() {
        return;
    }
    let line = render_record(level, domain.as_str(), event, fields);
    let ctx = ensure_run_context();
    if let Some(file) = &ctx.file {
        if let Ok(mut w) = file.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
    eprintln!("{}", line);
}

fn render_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) -> String {
    let ctx = ensure_run_context();
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));
    Value::Object(entry).to_string()
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_api_call(method: &str, path: &str, status: Option<u16>, elapsed_ms: f64) {
    log(
        Level::Debug,
        Domain::Api,
        "call",
        obj(&[
            ("method", v_str(method)),
            ("path", v_str(path)),
            ("status", status.map(|s| json!(s)).unwrap_or(Value::Null)),
            ("elapsed_ms", v_num(elapsed_ms)),
        ]),
    );
}

pub fn log_stream_open(event_name: &str, url: &str) {
    log(
        Level::Info,
        Domain::Stream,
        "open",
        obj(&[("event_name", v_str(event_name)), ("url", v_str(url))]),
    );
}

pub fn log_stream_closed(event_name: &str, reason: &str) {
    log(
        Level::Warn,
        Domain::Stream,
        "closed",
        obj(&[("event_name", v_str(event_name)), ("reason", v_str(reason))]),
    );
}

pub fn log_reconnect(event_name: &str, delay_ms: u64, attempt: u32) {
    log(
        Level::Info,
        Domain::Stream,
        "reconnect_scheduled",
        obj(&[
            ("event_name", v_str(event_name)),
            ("delay_ms", json!(delay_ms)),
            ("attempt", json!(attempt)),
        ]),
    );
}

pub fn log_field(key: &str, value: &str, source: &str) {
    log(
        Level::Trace,
        Domain::Device,
        "field",
        obj(&[
            ("key", v_str(key)),
            ("value", v_str(value)),
            ("source", v_str(source)),
        ]),
    );
}

pub fn log_export_progress(collected: usize, expected: Option<u64>) {
    log(
        Level::Debug,
        Domain::Export,
        "progress",
        obj(&[
            ("collected", json!(collected)),
            ("expected", expected.map(|e| json!(e)).unwrap_or(Value::Null)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            context: None,
            started: Instant::now(),
        }
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self {
            label,
            context: Some(obj(fields)),
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed_ms = self.elapsed_ms();
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================
