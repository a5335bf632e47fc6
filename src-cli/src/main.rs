//! Playfetch - concurrent playlist and video downloader.
//!
//! Fetches a playlist (or single video), prints its items, and downloads the
//! selected ones in parallel through `yt-dlp`. Downloads can be paused,
//! resumed and cancelled from the terminal while they run.

mod cli;
mod console;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use playfetch_core::{AppConfig, Coordinator, DownloadEvent, EngineError, Tagger, YtDlpEngine};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use cli::Cli;
use console::{Command, Console, Tally, item_line};
use logging::LoggingConfig;

/// Errors that end the program.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] playfetch_core::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match logging::init(&LoggingConfig::for_verbosity(cli.verbose)) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: file logging disabled: {e}");
            None
        }
    };

    match run(cli).await {
        Ok(tally) if tally.all_ok() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(2),
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Tally, CliError> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    cli.apply_to(&mut config);

    let engine = YtDlpEngine::with_config(config.engine_config());
    let version = engine.version()?;
    info!("Using yt-dlp {}", version);

    let tagger = if config.inference.enabled && config.quality.is_audio_only() {
        let inference = config.inference.clone();
        let tagger = tokio::task::spawn_blocking(move || Tagger::from_config(&inference))
            .await
            .map_err(|e| playfetch_core::Error::Pool(format!("Tagger setup failed: {e}")))?;
        Some(tagger)
    } else {
        None
    };
    let coordinator = Arc::new(
        Coordinator::new(Arc::new(engine), config.coordinator_config()).with_tagger(tagger),
    );
    let mut events = coordinator.subscribe();
    let mut console = Console::default();

    let media = coordinator.fetch(&cli.url).await?;
    print_pending(&mut events, &mut console);
    println!("{}", media.summary());

    let selected = cli.apply_selection(&coordinator).await?;
    print_items(&coordinator).await;
    if cli.list {
        return Ok(Tally::default());
    }
    println!(
        "{selected} item(s) selected → {} ({})",
        config.download_folder.display(),
        config.quality
    );

    coordinator
        .start(config.download_folder.clone(), config.quality.clone())
        .await?;

    let (command_tx, mut commands) = mpsc::unbounded_channel();
    spawn_command_reader(command_tx.clone());
    spawn_interrupt_handler(command_tx);
    supervise(&coordinator, &mut events, &mut commands, &mut console).await;

    print_pending(&mut events, &mut console);
    let tally = console.tally();
    println!("Done: {tally}.");
    Ok(tally)
}

/// Drive the batch until it drains without a pause in effect, or until the
/// user quits. A paused batch with no input left to resume it stops.
async fn supervise(
    coordinator: &Coordinator,
    events: &mut mpsc::UnboundedReceiver<DownloadEvent>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    console: &mut Console,
) {
    let mut parked = false;
    let mut quitting = false;
    let mut input_closed = false;

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                if let Some(line) = console.render(&event) {
                    println!("{line}");
                }
            }
            Some(command) = commands.recv(), if !quitting => {
                match command {
                    Command::Pause => coordinator.pause(),
                    Command::Resume => {
                        console.reset_progress();
                        match coordinator.resume().await {
                            Ok(_) => parked = false,
                            Err(e) => println!("! {e}"),
                        }
                    }
                    Command::Cancel => {
                        coordinator.cancel();
                        parked = false;
                    }
                    Command::Summary => print_items(coordinator).await,
                    Command::Quit => {
                        coordinator.cancel();
                        parked = false;
                        quitting = true;
                    }
                    Command::InputClosed => {
                        input_closed = true;
                        if parked {
                            println!("Input closed; leaving the batch paused.");
                            break;
                        }
                    }
                }
            }
            () = coordinator.wait_idle(), if !parked => {
                let flags = coordinator.flags();
                if flags.is_paused() && !flags.is_cancelled() && !quitting && !input_closed {
                    println!("Paused. Type 'r' to resume or 'q' to quit.");
                    parked = true;
                } else {
                    break;
                }
            }
        }
    }
}

/// Forward stdin lines as commands. Unknown input prints a hint.
fn spawn_command_reader(tx: mpsc::UnboundedSender<Command>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match Command::parse(&line) {
                    Some(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    None => println!("Commands: p(ause) r(esume) c(ancel) s(tatus) q(uit)"),
                },
                Ok(None) => {
                    debug!("Standard input closed");
                    let _ = tx.send(Command::InputClosed);
                    break;
                }
                Err(e) => {
                    warn!("Reading commands failed: {}", e);
                    let _ = tx.send(Command::InputClosed);
                    break;
                }
            }
        }
    });
}

/// The first Ctrl-C quits (cancelling running downloads); the second exits
/// immediately.
fn spawn_interrupt_handler(tx: mpsc::UnboundedSender<Command>) {
    tokio::spawn(async move {
        let mut interrupted = false;
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                return;
            }
            println!();
            if interrupted || tx.send(Command::Quit).is_err() {
                eprintln!("Interrupted.");
                std::process::exit(130);
            }
            interrupted = true;
        }
    });
}

fn print_pending(events: &mut mpsc::UnboundedReceiver<DownloadEvent>, console: &mut Console) {
    while let Ok(event) = events.try_recv() {
        if let Some(line) = console.render(&event) {
            println!("{line}");
        }
    }
}

async fn print_items(coordinator: &Coordinator) {
    let items = coordinator.items().await;
    let width = items.len().to_string().len();
    for item in &items {
        println!("{}", item_line(item, width));
    }
}
