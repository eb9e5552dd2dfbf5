//! Telemetry fields shown for the monitored node and the rules for turning
//! raw variable replies and pushed status events into display text.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

pub mod carrier;
pub mod runtime;

/// Variables read on every refresh.
pub const STATUS_VARIABLES: [&str; 7] = [
    "battPct", "battV", "battState", "carrier", "sigPct", "runtime", "logCount",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    DeviceId,
    Online,
    BattPct,
    BattV,
    BattState,
    SigPct,
    Carrier,
    Runtime,
    RuntimeEstimate,
    LogCount,
    Led,
    AuthMsg,
    VarMsg,
    FuncMsg,
    EvtMsg,
}

impl Field {
    pub const ALL: [Field; 15] = [
        Field::DeviceId,
        Field::Online,
        Field::BattPct,
        Field::BattV,
        Field::BattState,
        Field::SigPct,
        Field::Carrier,
        Field::Runtime,
        Field::RuntimeEstimate,
        Field::LogCount,
        Field::Led,
        Field::AuthMsg,
        Field::VarMsg,
        Field::FuncMsg,
        Field::EvtMsg,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Field::DeviceId => "deviceId",
            Field::Online => "online",
            Field::BattPct => "battPct",
            Field::BattV => "battV",
            Field::BattState => "battState",
            Field::SigPct => "sigPct",
            Field::Carrier => "carrier",
            Field::Runtime => "runtime",
            Field::RuntimeEstimate => "runtimeEstimate",
            Field::LogCount => "logCount",
            Field::Led => "led",
            Field::AuthMsg => "authMsg",
            Field::VarMsg => "varMsg",
            Field::FuncMsg => "funcMsg",
            Field::EvtMsg => "evtMsg",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.key() == key)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Field::DeviceId => "Device",
            Field::Online => "Status",
            Field::BattPct => "Battery",
            Field::BattV => "Voltage",
            Field::BattState => "Charge state",
            Field::SigPct => "Signal",
            Field::Carrier => "Carrier",
            Field::Runtime => "On battery",
            Field::RuntimeEstimate => "Est. runtime",
            Field::LogCount => "Log rows",
            Field::Led => "LED",
            Field::AuthMsg => "auth",
            Field::VarMsg => "vars",
            Field::FuncMsg => "func",
            Field::EvtMsg => "events",
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(
            self,
            Field::AuthMsg | Field::VarMsg | Field::FuncMsg | Field::EvtMsg
        )
    }
}

// =============================================================================
// Field table
// =============================================================================

/// Current display text per field.
#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    values: BTreeMap<Field, String>,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field; returns whether the visible text changed.
    pub fn set(&mut self, field: Field, text: impl Into<String>) -> bool {
        let text = text.into();
        if text.is_empty() {
            return self.values.remove(&field).is_some();
        }
        match self.values.get(&field) {
            Some(old) if *old == text => false,
            _ => {
                self.values.insert(field, text);
                true
            }
        }
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn clear(&mut self, field: Field) -> bool {
        self.values.remove(&field).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.values.iter().map(|(f, v)| (*f, v.as_str()))
    }
}

impl fmt::Display for FieldTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (field, value) in self.iter().filter(|(k, _)| !k.is_message()) {
            writeln!(f, "{:>13}: {}", field.label(), value)?;
        }
        for (field, value) in self.iter().filter(|(k, _)| k.is_message()) {
            writeln!(f, "{:>13}: {}", format!("[{}]", field.label()), value)?;
        }
        Ok(())
    }
}

// =============================================================================
// Formatting
// =============================================================================

/// Numeric view of a variable reply: numbers, and strings that parse as one.
pub fn as_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Text of a reply shown as-is.
pub fn verbatim(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Integers print without a fractional part, everything else as-is.
pub fn plain_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

pub fn format_batt_pct(v: &Value) -> String {
    match as_number(v) {
        Some(n) => format!("{:.1} %", n),
        None => verbatim(v),
    }
}

pub fn format_batt_v(v: &Value) -> String {
    match as_number(v) {
        Some(n) => format!("{:.3} V", n),
        None => verbatim(v),
    }
}

pub fn format_signal(v: &Value) -> String {
    match as_number(v) {
        Some(n) => format!("{}%", plain_number(n)),
        None => verbatim(v),
    }
}

pub fn format_runtime(v: &Value) -> String {
    match as_number(v) {
        Some(secs) => runtime::format_hours_minutes(secs),
        None => verbatim(v),
    }
}

pub fn format_count(v: &Value) -> String {
    match as_number(v) {
        Some(n) => plain_number(n),
        None => verbatim(v),
    }
}

pub fn format_led(state: &str) -> String {
    format!("LED: {}", state.to_uppercase())
}

pub fn format_online(online: bool) -> String {
    let text = if online { "online" } else { "offline" };
    text.to_string()
}

/// Charge state as reported by the fuel gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattState {
    Unknown,
    NotCharging,
    Charging,
    Charged,
    Discharging,
    Fault,
    Disconnected,
}

impl BattState {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => BattState::NotCharging,
            2 => BattState::Charging,
            3 => BattState::Charged,
            4 => BattState::Discharging,
            5 => BattState::Fault,
            6 => BattState::Disconnected,
            _ => BattState::Unknown,
        }
    }

    pub fn from_value(v: &Value) -> Self {
        match as_number(v) {
            Some(n) if n.fract() == 0.0 => Self::from_code(n as i64),
            _ => BattState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BattState::Unknown => "Unknown",
            BattState::NotCharging => "Not Charging",
            BattState::Charging => "Charging",
            BattState::Charged => "Charged",
            BattState::Discharging => "Discharging",
            BattState::Fault => "Fault",
            BattState::Disconnected => "Disconnected",
        }
    }
}

/// `not_charging` -> `Not Charging`. Only word starts are touched.
pub fn prettify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.replace('_', " ").chars() {
        let is_word = c.is_ascii_alphanumeric();
        if is_word && !in_word {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        in_word = is_word;
    }
    out
}

/// Display text for one polled variable.
pub fn format_variable(name: &str, v: &Value) -> Option<(Field, String)> {
    let out = match name {
        "battPct" => (Field::BattPct, format_batt_pct(v)),
        "battV" => (Field::BattV, format_batt_v(v)),
        "battState" => (Field::BattState, BattState::from_value(v).as_str().to_string()),
        "carrier" => (Field::Carrier, carrier::resolve(&verbatim(v))),
        "sigPct" => (Field::SigPct, format_signal(v)),
        "runtime" => (Field::Runtime, format_runtime(v)),
        "logCount" => (Field::LogCount, format_count(v)),
        _ => return None,
    };
    Some(out)
}

// =============================================================================
// Pushed status events
// =============================================================================

/// What a pushed frame means for the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// A JSON status object; the field updates it carries (possibly none).
    Fields {
        updates: Vec<(Field, String)>,
        batt_pct: Option<f64>,
    },
    /// Anything that is not a JSON object, kept verbatim for the log.
    Raw(String),
}

/// Particle wraps published data as `{"data":"...","ttl":..,"published_at":..,"coreid":..}`.
/// Return the inner payload when `data` looks like that envelope.
pub fn unwrap_envelope(data: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(data) {
        let is_envelope = map.contains_key("published_at") || map.contains_key("coreid");
        if let (true, Some(Value::String(inner))) = (is_envelope, map.get("data")) {
            return inner.clone();
        }
    }
    data.to_string()
}

impl StatusEvent {
    pub fn parse(data: &str) -> Self {
        let payload = unwrap_envelope(data);
        let map = match serde_json::from_str::<Value>(&payload) {
            Ok(Value::Object(map)) => map,
            _ => return StatusEvent::Raw(payload),
        };

        let mut updates = Vec::new();
        let batt_pct = map.get("battPct").and_then(Value::as_f64);
        if let Some(pct) = batt_pct {
            updates.push((Field::BattPct, format!("{:.1} %", pct)));
        }
        if let Some(v) = map.get("battV").and_then(Value::as_f64) {
            updates.push((Field::BattV, format!("{:.3} V", v)));
        }
        match map.get("battStateStr") {
            Some(Value::String(s)) if !s.is_empty() => {
                updates.push((Field::BattState, prettify(s)));
            }
            _ => {
                if let Some(code) = map.get("battState").and_then(Value::as_i64) {
                    updates.push((Field::BattState, BattState::from_code(code).as_str().to_string()));
                }
            }
        }
        if let Some(sig) = map.get("sigPct").and_then(Value::as_f64) {
            updates.push((Field::SigPct, format!("{}%", plain_number(sig))));
        }
        if let Some(c) = map.get("carrier").filter(|v| is_truthy(v)) {
            updates.push((Field::Carrier, carrier::resolve(&verbatim(c))));
        }
        if let Some(led) = map.get("led").filter(|v| is_truthy(v)) {
            updates.push((Field::Led, format_led(&verbatim(led))));
        }
        if let Some(secs) = map.get("runtime").and_then(Value::as_f64) {
            updates.push((Field::Runtime, runtime::format_hours_minutes(secs)));
        }
        if let Some(n) = map.get("logCount").and_then(Value::as_f64) {
            updates.push((Field::LogCount, plain_number(n)));
        }

        StatusEvent::Fields { updates, batt_pct }
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}
