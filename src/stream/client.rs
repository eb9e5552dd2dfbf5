use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::logging::{log_reconnect, log_stream_closed, log_stream_open, redact_url, ts_epoch_ms};
use super::{AuthMode, Backoff, FrameDecoder, Framing, LastEvent, StreamControl, StreamMessage, StreamTarget};

/// Why one connection attempt finished.
enum Outcome {
    /// Stream ended or failed; reconnect after backoff.
    Ended(String),
    /// Control moved away from `Run`.
    Interrupted,
    /// Nobody is listening any more.
    ReceiverGone,
}

/// Reconnecting event-stream subscription.
pub struct EventStream {
    client: Client,
    target: StreamTarget,
    framing: Framing,
    backoff: Backoff,
    last_event: LastEvent,
}

impl EventStream {
    pub fn new(target: StreamTarget, framing: Framing, backoff: Backoff) -> Result<Self> {
        // No overall timeout: the body is meant to stay open.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building stream client")?;
        Ok(Self {
            client,
            target,
            framing,
            backoff,
            last_event: LastEvent::new(),
        })
    }

    /// Share an existing last-event clock (e.g. with the polling fallback).
    pub fn with_last_event(mut self, last_event: LastEvent) -> Self {
        self.last_event = last_event;
        self
    }

    pub fn last_event(&self) -> LastEvent {
        self.last_event.clone()
    }

    /// Run on a background task, returning the channels that drive it.
    pub fn spawn(self, buffer: usize) -> StreamHandle {
        let (tx, rx) = mpsc::channel(buffer);
        let (control_tx, control_rx) = watch::channel(StreamControl::Run);
        let last_event = self.last_event.clone();
        let task = tokio::spawn(self.run(tx, control_rx));
        StreamHandle {
            messages: rx,
            control: control_tx,
            last_event,
            task,
        }
    }

    /// Connect, read, and reconnect until stopped or the receiver is dropped.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<StreamMessage>,
        mut control: watch::Receiver<StreamControl>,
    ) -> Result<()> {
        let name = self.target.name.clone();
        loop {
            let state = *control.borrow();
            match state {
                StreamControl::Stop => return Ok(()),
                StreamControl::Pause => {
                    if control.changed().await.is_err() {
                        return Ok(());
                    }
                    continue;
                }
                StreamControl::Run => {}
            }

            match self.connect_once(&tx, &mut control).await {
                Outcome::ReceiverGone => return Ok(()),
                Outcome::Interrupted => {
                    log_stream_closed(&name, "paused");
                    if tx.send(StreamMessage::Paused).await.is_err() {
                        return Ok(());
                    }
                }
                Outcome::Ended(reason) => {
                    log_stream_closed(&name, &reason);
                    if tx.send(StreamMessage::Closed { reason }).await.is_err() {
                        return Ok(());
                    }
                    let delay = self.backoff.next_delay();
                    let attempt = self.backoff.attempts();
                    log_reconnect(&name, delay.as_millis() as u64, attempt);
                    if tx
                        .send(StreamMessage::ReconnectScheduled { delay, attempt })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                    tokio::select! {
                        _ = sleep(delay) => {}
                        changed = control.changed() => {
                            if changed.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    async fn connect_once(
        &mut self,
        tx: &mpsc::Sender<StreamMessage>,
        control: &mut watch::Receiver<StreamControl>,
    ) -> Outcome {
        let url = self.target.request_url();
        let mut req = self.client.get(url.clone()).header(ACCEPT, "text/event-stream");
        if self.target.auth() == AuthMode::Header {
            req = req.bearer_auth(self.target.token());
        }

        let resp = tokio::select! {
            r = req.send() => r,
            _ = wait_until_not_running(control) => return Outcome::Interrupted,
        };
        let resp = match resp {
            Ok(r) => r,
            Err(e) => return Outcome::Ended(stream_error(e)),
        };
        let status = resp.status();
        if !status.is_success() {
            return Outcome::Ended(format!("Event stream open failed: HTTP {}", status.as_u16()));
        }

        self.backoff.reset();
        log_stream_open(&self.target.name, url.as_str());
        if tx.send(StreamMessage::Opened).await.is_err() {
            return Outcome::ReceiverGone;
        }

        let mut decoder = FrameDecoder::new(self.framing);
        let mut body = Box::pin(resp.bytes_stream());
        loop {
            tokio::select! {
                chunk = body.next() => match chunk {
                    None => {
                        return Outcome::Ended(
                            "Event stream ended (device offline or network change).".to_string(),
                        )
                    }
                    Some(Err(e)) => return Outcome::Ended(stream_error(e)),
                    Some(Ok(bytes)) => {
                        for frame in decoder.push(&bytes) {
                            self.last_event.touch(ts_epoch_ms());
                            if tx.send(StreamMessage::Frame(frame)).await.is_err() {
                                return Outcome::ReceiverGone;
                            }
                        }
                    }
                },
                _ = wait_until_not_running(control) => return Outcome::Interrupted,
            }
        }
    }
}

/// Close reason for a transport error. The request URL may carry the token in
/// query auth mode, so it never reaches the message.
fn stream_error(e: reqwest::Error) -> String {
    redact_url(&format!("Event stream error: {}", e.without_url()))
}

/// Resolves once the control value is anything but `Run` (or the sender is gone).
async fn wait_until_not_running(control: &mut watch::Receiver<StreamControl>) {
    loop {
        if *control.borrow() != StreamControl::Run {
            return;
        }
        if control.changed().await.is_err() {
            return;
        }
    }
}

/// Channels to a spawned [`EventStream`].
pub struct StreamHandle {
    pub messages: mpsc::Receiver<StreamMessage>,
    control: watch::Sender<StreamControl>,
    last_event: LastEvent,
    task: JoinHandle<Result<()>>,
}

impl StreamHandle {
    pub fn pause(&self) {
        let _ = self.control.send(StreamControl::Pause);
    }

    pub fn resume(&self) {
        let _ = self.control.send(StreamControl::Run);
    }

    pub fn state(&self) -> StreamControl {
        *self.control.borrow()
    }

    pub fn last_event(&self) -> &LastEvent {
        &self.last_event
    }

    /// Stop the task and wait for it to finish.
    pub async fn stop(self) -> Result<()> {
        let _ = self.control.send(StreamControl::Stop);
        drop(self.messages);
        self.task.await.context("stream task panicked")?
    }
}
