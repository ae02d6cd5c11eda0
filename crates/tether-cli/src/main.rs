use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, Event as TermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute, queue,
    style::{Print, PrintStyledContent, Stylize},
    terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tether_common::{
    traits::{RenderSurface, TerminalWidget},
    types::{BufferMetrics, ConnectionState, Rect, Size, SurfaceStyle},
};
use tether_core::{
    CellMetrics, Event, HeadlessTerminal, ResizeSource, SessionBroker, SharedWidget, TetherConfig,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Rows below the remote screen reserved for the status line
const STATUS_ROWS: u16 = 1;

#[derive(Parser, Debug)]
#[command(author, version, about = "Resilient remote terminal client", long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session REST API base URL (overrides the config file)
    #[arg(long)]
    api_url: Option<String>,

    /// Duplex channel URL (overrides the config file)
    #[arg(long)]
    channel_url: Option<String>,

    /// Log file; the terminal itself is taken by the remote screen
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// The local terminal window minus the status row, measured in cells
struct CrosstermSurface;

impl RenderSurface for CrosstermSurface {
    fn is_attached(&self) -> bool {
        true
    }

    fn bounding_box(&self) -> Rect {
        let (cols, rows) = terminal::size().unwrap_or((0, 0));
        Rect::from_size(cols as f64, rows.saturating_sub(STATUS_ROWS) as f64)
    }

    fn computed_style(&self) -> SurfaceStyle {
        SurfaceStyle::default()
    }
}

#[derive(Debug)]
enum Input {
    Data(String),
    Resize(u16, u16),
    ScrollPage { up: bool },
    Follow,
    Quit,
}

/// What the bottom row shows
#[derive(Debug, Clone)]
struct Status {
    connection: ConnectionState,
    notice: Option<String>,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.connection.is_terminal() {
            write!(f, " [connection failed] Ctrl+Q quits")?;
        } else {
            write!(f, " [{}]", self.connection)?;
        }
        if let Some(notice) = &self.notice {
            write!(f, " {}", notice)?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_path = args
        .log_file
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("tether.log"));
    let log_file = File::create(&log_path)
        .with_context(|| format!("failed to create {}", log_path.display()))?;
    let filter = if args.debug { "tether=debug" } else { "tether=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(log_file))
                .with_ansi(false),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => TetherConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => TetherConfig::default(),
    };
    if let Some(url) = args.api_url {
        config.server.api_url = url;
    }
    if let Some(url) = args.channel_url {
        config.server.channel_url = url;
    }

    let (cols, rows) = terminal::size().unwrap_or((80, 24));
    let size = Size::new(cols.max(1), rows.saturating_sub(STATUS_ROWS).max(1));
    info!("Starting tether client at {:?}", size);

    let surface = Arc::new(CrosstermSurface);
    let screen = Arc::new(Mutex::new(
        HeadlessTerminal::new(size).attach(surface.clone(), CellMetrics::default()),
    ));
    let widget: SharedWidget = screen.clone();
    let mut broker = SessionBroker::connect(config, surface, widget);

    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, Clear(ClearType::All))?;

    let outcome = run(&mut broker, screen).await;

    broker.unmount().await;
    execute!(stdout, Show, LeaveAlternateScreen)?;
    terminal::disable_raw_mode()?;
    outcome
}

async fn run(broker: &mut SessionBroker, screen: Arc<Mutex<HeadlessTerminal>>) -> Result<()> {
    let mut events = broker.subscribe().into_stream();
    let session = broker.mount().await;
    info!("Session {} ready (simulated: {})", session.id, session.is_simulated);
    let notifier = broker
        .resize_notifier()
        .context("broker has no resize coordinator")?;
    let connection = broker
        .watch_connection()
        .context("broker has no connection state")?;

    let cancel = CancellationToken::new();
    let (status_tx, status_rx) = watch::channel(Status {
        connection: *connection.borrow(),
        notice: None,
    });
    let status_tx = Arc::new(status_tx);
    let tracker = track_connection(connection, status_tx.clone(), cancel.clone());
    let painter = tokio::spawn(paint(screen.clone(), status_rx, cancel.clone()));

    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    let reader = tokio::task::spawn_blocking(move || read_input(input_tx));

    loop {
        tokio::select! {
            input = input_rx.recv() => match input {
                Some(Input::Data(data)) => {
                    if let Err(e) = broker.send_input(&data) {
                        debug!("Input not sent: {}", e);
                    }
                }
                Some(Input::Resize(cols, rows)) => {
                    let size = Size::new(cols, rows.saturating_sub(STATUS_ROWS));
                    notifier.notify(ResizeSource::Container, size);
                    // the status row moved with the window edge
                    status_tx.send_modify(|_| {});
                }
                Some(Input::ScrollPage { up }) => {
                    let mut screen = screen.lock().await;
                    let page = screen.size().rows.max(1) as i64;
                    screen.scroll_lines(if up { -page } else { page });
                }
                Some(Input::Follow) => broker.follow().await,
                Some(Input::Quit) | None => break,
            },
            event = events.next() => match event {
                Some(Ok(Event::Notice(notice))) => {
                    warn!("{}", notice);
                    status_tx.send_modify(|status| status.notice = Some(notice.to_string()));
                }
                Some(Ok(Event::Closed)) | None => break,
                Some(Ok(other)) => debug!("{:?}", other),
                Some(Err(e)) => debug!("Event stream: {}", e),
            },
        }
    }

    cancel.cancel();
    drop(input_rx);
    for (name, task) in [("Connection tracker", tracker), ("Painter", painter)] {
        if let Err(e) = task.await {
            error!("{} task failed: {}", name, e);
        }
    }
    match reader.await {
        Ok(result) => result,
        Err(e) => Err(e.into()),
    }
}

/// Mirror the connection state into the status row until it can no longer change
fn track_connection(
    mut connection: watch::Receiver<ConnectionState>,
    status: Arc<watch::Sender<Status>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let state = *connection.borrow_and_update();
            info!("Connection {}", state);
            status.send_modify(|s| s.connection = state);
            if state.is_terminal() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = connection.changed() => if changed.is_err() { break },
            }
        }
    })
}

/// Map local key presses to what the remote shell expects
fn key_bytes(key: KeyEvent) -> Option<String> {
    let text = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            let c = c.to_ascii_lowercase();
            if !c.is_ascii_lowercase() {
                return None;
            }
            ((c as u8 - b'a' + 1) as char).to_string()
        }
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "\r".to_string(),
        KeyCode::Tab => "\t".to_string(),
        KeyCode::Backspace => "\x7f".to_string(),
        KeyCode::Esc => "\x1b".to_string(),
        KeyCode::Up => "\x1b[A".to_string(),
        KeyCode::Down => "\x1b[B".to_string(),
        KeyCode::Right => "\x1b[C".to_string(),
        KeyCode::Left => "\x1b[D".to_string(),
        _ => return None,
    };
    Some(text)
}

/// Blocking crossterm event loop; ends when the receiver is dropped
fn read_input(tx: mpsc::UnboundedSender<Input>) -> Result<()> {
    while !tx.is_closed() {
        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let input = match event::read()? {
            TermEvent::Key(key) if key.kind == KeyEventKind::Release => continue,
            TermEvent::Key(KeyEvent {
                code: KeyCode::Char('q'),
                modifiers: KeyModifiers::CONTROL,
                ..
            }) => Input::Quit,
            TermEvent::Key(KeyEvent {
                code: KeyCode::PageUp,
                ..
            }) => Input::ScrollPage { up: true },
            TermEvent::Key(KeyEvent {
                code: KeyCode::PageDown,
                ..
            }) => Input::ScrollPage { up: false },
            TermEvent::Key(KeyEvent {
                code: KeyCode::End,
                ..
            }) => Input::Follow,
            TermEvent::Key(key) => match key_bytes(key) {
                Some(data) => Input::Data(data),
                None => continue,
            },
            TermEvent::Resize(cols, rows) => Input::Resize(cols, rows),
            _ => continue,
        };
        if tx.send(input).is_err() {
            break;
        }
    }
    debug!("Input reader exiting");
    Ok(())
}

/// Repaint the viewport whenever the widget reports dirty rows, and the
/// status row whenever it changes
async fn paint(
    screen: Arc<Mutex<HeadlessTerminal>>,
    mut status: watch::Receiver<Status>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(33));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let status_line = match status.has_changed() {
            Ok(true) => Some(status.borrow_and_update().to_string()),
            _ => None,
        };
        let frame = {
            let mut screen = screen.lock().await;
            let dirty = screen.take_dirty().is_some();
            if !dirty && status_line.is_none() {
                continue;
            }
            (screen.visible_lines(), screen.metrics(), screen.size())
        };
        if let Err(e) = draw(&frame.0, status_line.as_deref(), frame.1, frame.2) {
            error!("Failed to draw: {}", e);
            break;
        }
    }
}

fn draw(
    lines: &[String],
    status: Option<&str>,
    metrics: Option<BufferMetrics>,
    size: Size,
) -> io::Result<()> {
    let mut stdout = io::stdout();
    queue!(stdout, Hide)?;
    for row in 0..size.rows {
        let line = lines.get(row as usize).map(String::as_str).unwrap_or("");
        let visible: String = line.chars().take(size.cols as usize).collect();
        queue!(
            stdout,
            MoveTo(0, row),
            Clear(ClearType::UntilNewLine),
            Print(visible)
        )?;
    }
    if let Some(status) = status {
        let visible: String = status.chars().take(size.cols as usize).collect();
        queue!(
            stdout,
            MoveTo(0, size.rows),
            Clear(ClearType::UntilNewLine),
            PrintStyledContent(visible.reverse())
        )?;
    }
    if let Some(metrics) = metrics.filter(|m| m.is_at_bottom()) {
        queue!(stdout, MoveTo(metrics.cursor_x, metrics.cursor_y), Show)?;
    }
    stdout.flush()
}
