use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use nodewatch::api::{device_listing, DeviceApi, ParticleClient, NO_DEVICES};
use nodewatch::config::Config;
use nodewatch::device::runtime::RuntimeEstimator;
use nodewatch::export::{self, ExportOptions, Finish};
use nodewatch::logging::{self, log, obj, v_str, Domain, Level};
use nodewatch::monitor::Monitor;
use nodewatch::stream::{AuthMode, Backoff, EventStream, Framing, StreamTarget};
use nodewatch::token::{mask, resolve_token, TokenStore};
use nodewatch::watch::{run_watch, Command};

#[derive(Parser, Debug)]
#[command(name = "nodewatch", version, about = "Monitor and control a solar cellular sensor node")]
struct Args {
    /// Bearer token (overrides the saved one).
    #[arg(long, global = true)]
    token: Option<String>,

    /// Dashboard link carrying `#token=...`; the token is saved.
    #[arg(long, global = true, value_name = "URL")]
    link: Option<String>,

    /// Cloud API base URL.
    #[arg(long, global = true, env = "PARTICLE_API")]
    api: Option<String>,

    /// Preferred device name.
    #[arg(long, global = true)]
    device: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List devices visible to the token.
    Devices,
    /// Read every status variable once.
    Read,
    /// Live dashboard with push updates.
    Watch {
        /// Poll only; do not open the event stream.
        #[arg(long)]
        no_stream: bool,
        /// Stream auth: header or query.
        #[arg(long)]
        auth: Option<String>,
        /// Stream framing: blank or line.
        #[arg(long)]
        framing: Option<String>,
    },
    /// Switch the LED on or off.
    Led { state: String },
    /// Clear the on-device log.
    ClearLog,
    /// Export the on-device log to CSV.
    Export {
        #[arg(long, short = 'o', value_name = "FILE")]
        out: Option<PathBuf>,
        /// Seconds without a new row before giving up (8-30).
        #[arg(long)]
        quiet_secs: Option<u64>,
    },
    /// Manage the saved token.
    Token {
        #[command(subcommand)]
        action: TokenCmd,
    },
}

#[derive(Subcommand, Debug)]
enum TokenCmd {
    Save { token: String },
    Clear,
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if let Some(level) = args.log_level.as_deref() {
        match logging::Level::parse(level) {
            Some(l) => logging::set_min_level(l),
            None => bail!("unknown log level {}", level),
        }
    }

    let mut cfg = Config::from_env();
    if let Some(api) = &args.api {
        cfg.api_base = api.clone();
    }
    if let Some(name) = &args.device {
        cfg.device_name = name.clone();
    }
    let store = TokenStore::new(cfg.token_file.clone());

    if let Cmd::Token { action } = &args.command {
        return token_command(&store, action);
    }

    let Some((token, source)) =
        resolve_token(args.token.as_deref(), args.link.as_deref(), cfg.token.clone(), &store)?
    else {
        bail!("No token. Pass --token, set PARTICLE_TOKEN, or run `nodewatch token save`.");
    };
    log(
        Level::Info,
        Domain::System,
        "token",
        obj(&[("source", v_str(source.as_str()))]),
    );

    let client = ParticleClient::new(&cfg.api_base, &token, cfg.http_timeout())?;
    let api: Arc<dyn DeviceApi> = Arc::new(client);

    if let Cmd::Devices = args.command {
        for line in device_listing(&api.list_devices().await?) {
            println!("{}", line);
        }
        return Ok(());
    }

    let mut monitor = Monitor::new(
        api.clone(),
        &cfg.device_name,
        RuntimeEstimator::new(cfg.runtime_window()),
    );
    let Some(device) = monitor.refresh_devices().await? else {
        bail!(NO_DEVICES);
    };

    match args.command {
        Cmd::Read => {
            monitor.read_all().await;
            print!("{}", monitor.fields());
        }
        Cmd::Led { state } => {
            let rv = monitor.set_led(&state).await?;
            println!("Return: {}", rv);
        }
        Cmd::ClearLog => {
            let rv = monitor.clear_log().await?;
            println!("Return: {}", rv);
        }
        Cmd::Watch { no_stream, auth, framing } => {
            if let Some(a) = auth {
                cfg.stream_auth = AuthMode::parse(&a).with_context(|| format!("unknown auth mode {}", a))?;
            }
            if let Some(f) = framing {
                cfg.framing = Framing::parse(&f).with_context(|| format!("unknown framing {}", f))?;
            }
            let commands = spawn_stdin_commands();
            eprintln!("commands: pause | resume | refresh | on | off | clear | quit");
            run_watch(&mut monitor, &cfg, &token, !no_stream, commands, render).await?;
        }
        Cmd::Export { out, quiet_secs } => {
            if let Some(q) = quiet_secs {
                cfg.export_quiet_secs = q;
                cfg = cfg.normalized();
            }
            let out = out.unwrap_or_else(|| export::csv::default_path(&PathBuf::from("."), device.display_name()));
            let base = nodewatch::api::particle::parse_base(&cfg.api_base)?;
            let target = StreamTarget::device_events(&base, &device.id, &cfg.export_event, &token, cfg.stream_auth)?;
            let stream = EventStream::new(
                target,
                cfg.framing,
                Backoff::from_millis(cfg.backoff_initial_ms, cfg.backoff_max_ms),
            )?;
            let opts = ExportOptions {
                header: Some(cfg.export_header.clone()).filter(|h| !h.is_empty()),
                quiet: cfg.export_quiet(),
                ..ExportOptions::default()
            };
            let summary = export::run_export(api.as_ref(), &device.id, stream, &opts, &out).await?;
            let expected = summary
                .expected
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!("saved {} of {} rows to {}", summary.rows, expected, summary.path.display());
            if let Finish::Error(e) = summary.finish {
                bail!("export incomplete: {}", e);
            }
        }
        Cmd::Devices | Cmd::Token { .. } => unreachable!("handled above"),
    }
    Ok(())
}

fn token_command(store: &TokenStore, action: &TokenCmd) -> Result<()> {
    match action {
        TokenCmd::Save { token } => {
            store.save(token)?;
            println!("Token saved.");
        }
        TokenCmd::Clear => {
            store.clear()?;
            println!("Token cleared.");
        }
        TokenCmd::Show => match store.load()? {
            Some(tok) => println!("{} ({})", mask(&tok), store.path().display()),
            None => println!("no token saved at {}", store.path().display()),
        },
    }
    Ok(())
}

fn render(monitor: &Monitor) {
    println!("----------------------------------------");
    print!("{}", monitor.fields());
    if let Some(line) = monitor.log_panel().last() {
        println!("{:>13}: {}", "last event", line);
    }
}

fn spawn_stdin_commands() -> mpsc::Receiver<Command> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match Command::parse(&line) {
                Some(cmd) => {
                    if tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("unknown command: {}", line.trim()),
            }
        }
    });
    rx
}
