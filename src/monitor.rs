//! State of one monitoring session: the selected device, its field table,
//! and the event log panel.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Local;
use futures_util::future::join_all;
use serde_json::json;

use crate::api::{select_device, Device, DeviceApi, NO_DEVICES};
use crate::device::runtime::{format_hours_minutes, RuntimeEstimator};
use crate::device::{
    as_number, format_led, format_online, format_variable, Field, FieldTable, StatusEvent,
    STATUS_VARIABLES,
};
use crate::logging::{log, log_field, obj, ts_epoch_ms, v_str, Domain, Level};
use crate::stream::StreamMessage;

/// Variables a read cannot do without; the rest are skipped quietly when
/// older firmware does not expose them.
const REQUIRED_VARIABLES: [&str; 5] = ["battPct", "battV", "battState", "carrier", "sigPct"];
const LOG_PANEL_LINES: usize = 200;

pub struct Monitor {
    api: Arc<dyn DeviceApi>,
    preferred_name: String,
    device: Option<Device>,
    fields: FieldTable,
    estimator: RuntimeEstimator,
    log_panel: VecDeque<String>,
}

impl Monitor {
    pub fn new(api: Arc<dyn DeviceApi>, preferred_name: &str, estimator: RuntimeEstimator) -> Self {
        Self {
            api,
            preferred_name: preferred_name.to_string(),
            device: None,
            fields: FieldTable::new(),
            estimator,
            log_panel: VecDeque::new(),
        }
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    pub fn log_panel(&self) -> impl Iterator<Item = &str> {
        self.log_panel.iter().map(String::as_str)
    }

    fn set(&mut self, field: Field, text: impl Into<String>, source: &str) -> bool {
        let text = text.into();
        log_field(field.key(), &text, source);
        self.fields.set(field, text)
    }

    fn append_log(&mut self, line: String) {
        if self.log_panel.len() == LOG_PANEL_LINES {
            self.log_panel.pop_front();
        }
        self.log_panel.push_back(line);
    }

    /// List devices and select the preferred one (or the first).
    pub async fn refresh_devices(&mut self) -> Result<Option<Device>> {
        let list = match self.api.list_devices().await {
            Ok(list) => list,
            Err(e) => {
                self.set(Field::AuthMsg, format!("Device list failed: {}", e), "api");
                return Err(e);
            }
        };
        let Some(chosen) = select_device(&list, &self.preferred_name).cloned() else {
            self.set(Field::AuthMsg, NO_DEVICES, "api");
            return Ok(None);
        };
        log(
            Level::Info,
            Domain::Device,
            "selected",
            obj(&[
                ("device_id", v_str(&chosen.id)),
                ("name", v_str(chosen.display_name())),
                ("online", json!(chosen.online)),
                ("candidates", json!(list.len())),
            ]),
        );
        self.set_device(chosen.clone());
        self.set(Field::AuthMsg, "", "api");
        Ok(Some(chosen))
    }

    pub fn set_device(&mut self, device: Device) {
        self.set(Field::DeviceId, device.id.clone(), "select");
        self.set(Field::Online, format_online(device.online), "select");
        self.device = Some(device);
    }

    fn require_device(&self) -> Result<String> {
        match &self.device {
            Some(d) => Ok(d.id.clone()),
            None => bail!("no device selected"),
        }
    }

    /// Read every status variable concurrently and update the table.
    /// Returns whether any visible text changed.
    pub async fn read_all(&mut self) -> bool {
        let Ok(device_id) = self.require_device() else {
            return false;
        };
        let api = self.api.clone();
        let replies = join_all(
            STATUS_VARIABLES
                .iter()
                .map(|name| api.get_variable(&device_id, name)),
        )
        .await;

        for (name, reply) in STATUS_VARIABLES.iter().zip(replies.iter()) {
            if let (true, Err(e)) = (REQUIRED_VARIABLES.contains(name), reply) {
                log(
                    Level::Warn,
                    Domain::Poll,
                    "read_failed",
                    obj(&[("variable", v_str(name)), ("error", v_str(&e.to_string()))]),
                );
                return self.set(Field::VarMsg, format!("Read failed: {}", e), "poll");
            }
        }

        let mut changed = false;
        for (name, reply) in STATUS_VARIABLES.iter().zip(replies) {
            let Ok(reply) = reply else { continue };
            if *name == "battPct" {
                if let Some(pct) = as_number(&reply.result) {
                    changed |= self.record_battery(ts_epoch_ms(), pct);
                }
            }
            if let Some((field, text)) = format_variable(name, &reply.result) {
                changed |= self.set(field, text, "poll");
            }
        }
        changed |= self.set(Field::VarMsg, "", "poll");
        changed
    }

    fn record_battery(&mut self, ts_ms: u64, pct: f64) -> bool {
        self.estimator.record(ts_ms, pct);
        let text = self
            .estimator
            .time_to_empty()
            .map(|d| format!("~{}", format_hours_minutes(d.as_secs_f64())))
            .unwrap_or_default();
        self.set(Field::RuntimeEstimate, text, "estimator")
    }

    /// Apply one pushed frame payload. Returns whether anything visible changed.
    pub fn apply_event(&mut self, data: &str) -> bool {
        self.apply_event_at(data, ts_epoch_ms())
    }

    pub fn apply_event_at(&mut self, data: &str, now_ms: u64) -> bool {
        match StatusEvent::parse(data) {
            StatusEvent::Fields { updates, batt_pct } => {
                let mut changed = false;
                if let Some(pct) = batt_pct {
                    changed |= self.record_battery(now_ms, pct);
                }
                for (field, text) in updates {
                    changed |= self.set(field, text, "event");
                }
                changed
            }
            StatusEvent::Raw(text) => {
                let stamp = Local::now().format("%H:%M:%S");
                self.append_log(format!("[{}] {}", stamp, text));
                true
            }
        }
    }

    /// Fold a stream lifecycle message into the status fields.
    pub fn on_stream_message(&mut self, msg: &StreamMessage) -> bool {
        match msg {
            StreamMessage::Opened => {
                let id = self.device.as_ref().map(|d| d.id.clone()).unwrap_or_default();
                self.append_log(format!("(listening to status events for {})", id));
                self.set(Field::EvtMsg, "", "stream");
                true
            }
            StreamMessage::Frame(frame) => self.apply_event(&frame.data),
            StreamMessage::Closed { reason } => self.set(Field::EvtMsg, reason.clone(), "stream"),
            StreamMessage::ReconnectScheduled { delay, .. } => {
                let base = self
                    .fields
                    .get(Field::EvtMsg)
                    .map(|m| m.split(" (retry in").next().unwrap_or(m).to_string())
                    .unwrap_or_default();
                let text = format!("{} (retry in {:.1}s)", base, delay.as_secs_f64());
                self.set(Field::EvtMsg, text.trim_start().to_string(), "stream")
            }
            StreamMessage::Paused => self.set(Field::EvtMsg, "Event stream paused.", "stream"),
        }
    }

    /// Switch the LED. `arg` is passed to the device function as-is.
    pub async fn set_led(&mut self, arg: &str) -> Result<i64> {
        let arg = arg.trim().to_lowercase();
        if arg.is_empty() {
            self.set(Field::FuncMsg, "LED call missing info.", "func");
            bail!("LED call missing info.");
        }
        let rv = self.call("led", &arg).await?;
        self.set(Field::Led, format_led(&arg), "func");
        Ok(rv)
    }

    pub async fn clear_log(&mut self) -> Result<i64> {
        let rv = self.call("clearLog", "").await?;
        self.set(Field::LogCount, "0", "func");
        Ok(rv)
    }

    async fn call(&mut self, function: &str, arg: &str) -> Result<i64> {
        let device_id = match self.require_device() {
            Ok(id) => id,
            Err(e) => {
                self.set(Field::FuncMsg, format!("Call failed: {}", e), "func");
                return Err(e);
            }
        };
        match self.api.call_function(&device_id, function, arg).await {
            Ok(reply) => {
                let rv = reply.return_value.unwrap_or_default();
                log(
                    Level::Info,
                    Domain::Device,
                    "function",
                    obj(&[
                        ("device_id", v_str(&device_id)),
                        ("function", v_str(function)),
                        ("arg", v_str(arg)),
                        ("return_value", json!(rv)),
                    ]),
                );
                self.set(Field::FuncMsg, format!("Return: {}", rv), "func");
                Ok(rv)
            }
            Err(e) => {
                self.set(Field::FuncMsg, format!("Call failed: {}", e), "func");
                Err(e)
            }
        }
    }
}
