// ABOUTME: Entry point: connect in place, open a session window, or run as the session window

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossterm::{
    event::{DisableBracketedPaste, EnableBracketedPaste, Event, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::Backend, prelude::*, Terminal};
use ssh_bridge_console::{
    app::{App, AppEvent, AppState, EventHandler, View},
    bridge::{BridgeError, Credentials, TerminalBridge, WebSocketConnector},
    components::LayoutComponent,
    config::AppConfig,
    handoff::{CommandLauncher, OpenerEndpoint, OpenerNotice, PopupEndpoint},
    terminal::resize::ResizeEvents,
};
use std::{io, net::SocketAddr, path::PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "ssh-bridge-console", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a terminal session in this window
    Connect(SessionArgs),
    /// Open the terminal session in a new window and hand it the credentials
    Open(SessionArgs),
    /// Session window side of `open`; not meant to be run by hand
    Attach {
        #[arg(long)]
        handoff: SocketAddr,
        #[arg(long)]
        origin: String,
        #[arg(long)]
        url: Option<String>,
    },
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Instance address as seen by the bridge
    #[arg(long)]
    host: String,
    #[arg(long, short = 'u', default_value = "ec2-user")]
    user: String,
    /// Path to the PEM private key
    #[arg(long, short = 'i')]
    key: PathBuf,
    /// Bridge endpoint, overriding config and environment
    #[arg(long)]
    url: Option<String>,
}

impl SessionArgs {
    fn credentials(&self) -> Result<Credentials> {
        let private_key = std::fs::read_to_string(&self.key)
            .with_context(|| format!("failed to read private key {}", self.key.display()))?;
        let credentials = Credentials::new(&self.host, &self.user, private_key);
        credentials.validate()?;
        Ok(credentials)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging()?;
    setup_panic_handler();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Connect(args) => {
            override_url(&mut config, args.url.as_deref())?;
            let credentials = args.credentials()?;
            let mut terminal = setup_terminal()?;
            let result = run_session(&mut terminal, credentials, &config.bridge_url).await;
            restore_terminal(&mut terminal)?;
            result
        }
        Command::Open(args) => {
            override_url(&mut config, args.url.as_deref())?;
            run_open(&config, args.credentials()?).await
        }
        Command::Attach {
            handoff,
            origin,
            url,
        } => {
            override_url(&mut config, url.as_deref())?;
            run_attach(&config, handoff, origin).await
        }
    }
}

fn override_url(config: &mut AppConfig, url: Option<&str>) -> Result<()> {
    if let Some(url) = url {
        config.bridge_url = url.to_string();
        config.validate()?;
    }
    Ok(())
}

async fn run_session<B: Backend>(
    terminal: &mut Terminal<B>,
    credentials: Credentials,
    url: &str,
) -> Result<()> {
    let resize_events = ResizeEvents::new();
    let area = LayoutComponent::terminal_area(terminal.size()?);
    let (bridge, transport) = TerminalBridge::initialize(
        credentials,
        url,
        WebSocketConnector::new(),
        &resize_events,
        area,
    )?;

    let mut app = App::new(bridge, transport, resize_events);
    app.run(terminal).await
}

async fn run_open(config: &AppConfig, credentials: Credentials) -> Result<()> {
    let label = format!("{}@{}", credentials.username, credentials.host);
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();

    let endpoint = OpenerEndpoint::bind(credentials, config.retry_policy(), config.reload_grace())
        .await?
        .with_notices(notice_tx);
    let launcher = CommandLauncher::new(config.handoff.launcher.clone())?;
    endpoint.launch(&launcher, &config.bridge_url)?;
    println!("Opened session window for {label} (Ctrl+C to stop)");

    let printer = tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            match notice {
                OpenerNotice::WindowAttached(addr) => println!("Session window attached from {addr}"),
                OpenerNotice::Delivered => println!("Credentials delivered"),
                OpenerNotice::Exhausted { attempts } => {
                    eprintln!("{}", BridgeError::CredentialHandoffTimeout { attempts });
                }
                OpenerNotice::WindowDetached => println!("Session window detached"),
            }
        }
    });

    let report = endpoint
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    let _ = printer.await;

    info!("Handoff finished: {:?}", report);
    println!(
        "Handoff finished: {} post(s), {} acknowledgment(s), {} re-request(s)",
        report.posts, report.acknowledgments, report.rerequests
    );
    Ok(())
}

async fn run_attach(config: &AppConfig, handoff: SocketAddr, origin: String) -> Result<()> {
    let popup = PopupEndpoint::connect(handoff, origin, config.wait_timeout())
        .await
        .context("failed to reach the opener window")?;

    let mut terminal = setup_terminal()?;
    let result = attach_session(&mut terminal, popup, &config.bridge_url).await;
    restore_terminal(&mut terminal)?;
    result
}

async fn attach_session<B: Backend>(
    terminal: &mut Terminal<B>,
    mut popup: PopupEndpoint,
    url: &str,
) -> Result<()> {
    let Some(credentials) = receive_credentials(terminal, &mut popup).await? else {
        return Ok(());
    };

    // Late duplicate posts still need an ack after the session starts
    tokio::spawn(async move {
        if let Err(e) = popup.serve().await {
            warn!("Handoff link ended with error: {}", e);
        }
    });

    run_session(terminal, credentials, url).await
}

/// Show the waiting screen until credentials arrive or the user quits.
/// A failed handoff can be retried with `r`, which re-requests like a reload.
async fn receive_credentials<B: Backend>(
    terminal: &mut Terminal<B>,
    popup: &mut PopupEndpoint,
) -> Result<Option<Credentials>> {
    let layout = LayoutComponent::new();
    let mut state = AppState::awaiting_credentials();
    let mut events = EventStream::new();

    loop {
        state.view = View::AwaitingCredentials;
        terminal.draw(|frame| layout.render(frame, &state, None))?;

        let outcome = tokio::select! {
            received = popup.receive() => Some(received),
            quit = wait_for_quit(&mut events, &mut state) => {
                quit?;
                None
            }
        };

        let Some(received) = outcome else {
            return Ok(None);
        };

        match received {
            Ok(credentials) => return Ok(Some(credentials)),
            Err(e) => {
                warn!("Credential handoff failed: {}", e);
                state.view = View::HandoffFailed(e.to_string());
            }
        }

        loop {
            terminal.draw(|frame| layout.render(frame, &state, None))?;
            let Some(event) = events.next().await else {
                return Ok(None);
            };
            if let Event::Key(key) = event? {
                match EventHandler::handle_key_event(key, &mut state) {
                    Some(AppEvent::Reload) => break,
                    Some(AppEvent::Quit) => return Ok(None),
                    _ => {}
                }
            }
        }
    }
}

async fn wait_for_quit(events: &mut EventStream, state: &mut AppState) -> Result<()> {
    while let Some(event) = events.next().await {
        if let Event::Key(key) = event? {
            if EventHandler::handle_key_event(key, state) == Some(AppEvent::Quit) {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)?;
    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableBracketedPaste
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn setup_logging() -> Result<()> {
    use std::fs::OpenOptions;
    use tracing_subscriber::prelude::*;

    let log_dir = AppConfig::log_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let log_file = log_dir.join(format!(
        "ssh-bridge-console-{}.log",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false), // No ANSI colors in log file
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ssh_bridge_console=info".into()),
        )
        .init();

    Ok(())
}

fn setup_panic_handler() {
    use tracing::error;

    std::panic::set_hook(Box::new(|panic_info| {
        // Ensure terminal is restored before logging the panic
        let _ = disable_raw_mode();
        let _ = execute!(std::io::stderr(), LeaveAlternateScreen, DisableBracketedPaste);

        error!("Application panicked: {}", panic_info);
        eprintln!("Application panicked: {}", panic_info);
        eprintln!("Please check the logs for more details.");
    }));
}
