//! The long-running dashboard: push updates from the event stream, a
//! polling fallback for when the stream goes quiet, and interactive commands.

use anyhow::Result;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::monitor::Monitor;
use crate::poll::{start_poll_fallback, PollTick};
use crate::stream::{Backoff, EventStream, LastEvent, StreamControl, StreamTarget};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Tear down the stream (the page went to the background).
    Pause,
    /// Reopen the stream.
    Resume,
    Refresh,
    Led(String),
    ClearLog,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let cmd = words.next()?.to_ascii_lowercase();
        let cmd = match cmd.as_str() {
            "p" | "pause" | "hide" => Command::Pause,
            "r" | "resume" | "show" => Command::Resume,
            "refresh" | "read" => Command::Refresh,
            "on" | "off" => Command::Led(cmd),
            "led" => Command::Led(words.next()?.to_ascii_lowercase()),
            "clear" | "clear-log" => Command::ClearLog,
            "q" | "quit" | "exit" => Command::Quit,
            _ => return None,
        };
        Some(cmd)
    }
}

/// Run until `Quit`, the command channel closes, or Ctrl-C.
///
/// `render` is called whenever the dashboard changed.
pub async fn run_watch<R>(
    monitor: &mut Monitor,
    cfg: &Config,
    token: &str,
    use_stream: bool,
    mut commands: mpsc::Receiver<Command>,
    mut render: R,
) -> Result<()>
where
    R: FnMut(&Monitor),
{
    let Some(device) = monitor.device().cloned() else {
        anyhow::bail!("no device selected");
    };
    let last_event = LastEvent::new();

    let mut stream = if use_stream {
        let base = crate::api::particle::parse_base(&cfg.api_base)?;
        let target = StreamTarget::device_events(&base, &device.id, &cfg.event_name, token, cfg.stream_auth)?;
        let backoff = Backoff::from_millis(cfg.backoff_initial_ms, cfg.backoff_max_ms);
        Some(
            EventStream::new(target, cfg.framing, backoff)?
                .with_last_event(last_event.clone())
                .spawn(64),
        )
    } else {
        None
    };

    let (poll_tx, mut poll_rx) = mpsc::channel::<PollTick>(1);
    let poll_task = tokio::spawn(start_poll_fallback(
        cfg.poll_interval(),
        cfg.stale_window(),
        last_event.clone(),
        poll_tx,
    ));

    log(
        Level::Info,
        Domain::System,
        "watch_started",
        obj(&[
            ("device_id", v_str(&device.id)),
            ("event_name", v_str(&cfg.event_name)),
            ("stream", v_str(if use_stream { "on" } else { "off" })),
        ]),
    );

    // initial read
    monitor.read_all().await;
    render(monitor);

    let mut commands_open = true;
    loop {
        let changed = tokio::select! {
            msg = next_stream_message(&mut stream) => match msg {
                Some(msg) => monitor.on_stream_message(&msg),
                None => {
                    stream = None;
                    false
                }
            },
            Some(_) = poll_rx.recv() => monitor.read_all().await,
            cmd = commands.recv(), if commands_open => match cmd {
                None => {
                    commands_open = false;
                    false
                }
                Some(Command::Quit) => break,
                Some(cmd) => apply_command(monitor, stream.as_ref(), cmd).await,
            },
            _ = tokio::signal::ctrl_c() => break,
        };
        if changed {
            render(monitor);
        }
    }

    poll_task.abort();
    if let Some(handle) = stream {
        handle.stop().await?;
    }
    log(
        Level::Info,
        Domain::System,
        "watch_stopped",
        obj(&[("device_id", v_str(&device.id))]),
    );
    Ok(())
}

async fn next_stream_message(
    stream: &mut Option<crate::stream::StreamHandle>,
) -> Option<crate::stream::StreamMessage> {
    match stream {
        Some(handle) => handle.messages.recv().await,
        None => std::future::pending().await,
    }
}

async fn apply_command(
    monitor: &mut Monitor,
    stream: Option<&crate::stream::StreamHandle>,
    cmd: Command,
) -> bool {
    match cmd {
        Command::Pause => {
            if let Some(h) = stream {
                h.pause();
            }
            false
        }
        Command::Resume => {
            if let Some(h) = stream.filter(|h| h.state() != StreamControl::Run) {
                h.resume();
            }
            false
        }
        Command::Refresh => {
            monitor.read_all().await;
            true
        }
        // failures are shown in the func field
        Command::Led(arg) => {
            let _ = monitor.set_led(&arg).await;
            true
        }
        Command::ClearLog => {
            let _ = monitor.clear_log().await;
            true
        }
        Command::Quit => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("p"), Some(Command::Pause));
        assert_eq!(Command::parse(" resume "), Some(Command::Resume));
        assert_eq!(Command::parse("ON"), Some(Command::Led("on".into())));
        assert_eq!(Command::parse("led Off"), Some(Command::Led("off".into())));
        assert_eq!(Command::parse("led"), None);
        assert_eq!(Command::parse("clear-log"), Some(Command::ClearLog));
        assert_eq!(Command::parse("q"), Some(Command::Quit));
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("dance"), None);
    }
}
