use shelfplay::config::Config;
use shelfplay::media_controls::setup_media_controls;
use shelfplay::models::progress_key;
use shelfplay::playback::{
    AudioElement, PlaybackHandle, PlaybackProgress, PlaybackService, PlayerState,
};
use shelfplay::progress_service::ProgressService;
use shelfplay::retry::{RetrySlot, RetryTracker};
use shelfplay::server::{HttpMediaServer, MediaServer, PushEvent};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info, warn};

/// One line of interactive input
#[derive(Debug, Clone, PartialEq)]
enum CliCommand {
    Load {
        item_id: String,
        episode_id: Option<String>,
    },
    Play,
    Pause,
    Toggle,
    Seek(f64),
    Skip(f64),
    NextChapter,
    PreviousChapter,
    Chapter(i64),
    Volume(f32),
    Progress(String),
    Stop,
    /// Stop playback and forget every cached progress entry
    Logout,
    Quit,
    Help,
    /// Raw push envelope from the server's realtime channel
    Push(String),
}

impl CliCommand {
    fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        if line.starts_with('{') {
            return Ok(CliCommand::Push(line.to_string()));
        }

        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();
        let arg = words.next();
        let number = |arg: Option<&str>| -> Result<f64, String> {
            arg.ok_or_else(|| format!("{} needs a number", command))?
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| format!("{} needs a number", command))
        };

        match command {
            "load" => {
                let item_id = arg.ok_or("load needs an item id")?.to_string();
                Ok(CliCommand::Load {
                    item_id,
                    episode_id: words.next().map(str::to_string),
                })
            }
            "play" => Ok(CliCommand::Play),
            "pause" => Ok(CliCommand::Pause),
            "toggle" | "p" => Ok(CliCommand::Toggle),
            "seek" => Ok(CliCommand::Seek(number(arg)?)),
            "skip" => Ok(CliCommand::Skip(number(arg)?)),
            "chapter" | "ch" => match arg {
                Some("next") | Some("n") => Ok(CliCommand::NextChapter),
                Some("prev") | Some("previous") => Ok(CliCommand::PreviousChapter),
                Some(id) => id
                    .parse()
                    .map(CliCommand::Chapter)
                    .map_err(|_| format!("Unknown chapter {}", id)),
                None => Err("chapter needs next, prev or an id".to_string()),
            },
            "volume" | "vol" => Ok(CliCommand::Volume(number(arg)? as f32)),
            "progress" => Ok(CliCommand::Progress(
                arg.ok_or("progress needs an item or episode id")?.to_string(),
            )),
            "stop" => Ok(CliCommand::Stop),
            "logout" => Ok(CliCommand::Logout),
            "quit" | "exit" | "q" => Ok(CliCommand::Quit),
            "help" | "?" | "" => Ok(CliCommand::Help),
            other => Err(format!("Unknown command: {}", other)),
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [--play] [--no-media-keys] [ITEM_ID [EPISODE_ID]]", program);
    eprintln!();
    eprintln!("Configuration comes from SHELFPLAY_* environment variables or a .env file.");
}

fn print_help() {
    println!("Commands:");
    println!("  load ITEM [EPISODE]   start a play session");
    println!("  play | pause | toggle");
    println!("  seek SECONDS          jump to an absolute position");
    println!("  skip [-]SECONDS       jump relative to the current position");
    println!("  chapter next|prev|ID");
    println!("  volume 0.0-1.0");
    println!("  progress ITEM|EPISODE show cached progress");
    println!("  stop | logout | quit");
    println!("  {{...}}                 apply a server push event (JSON)");
}

fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let args: Vec<String> = std::env::args().collect();
    let mut autoplay = false;
    let mut media_keys = true;
    let mut positional = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "--play" => autoplay = true,
            "--no-media-keys" => media_keys = false,
            "-h" | "--help" => {
                print_usage(&args[0]);
                return;
            }
            flag if flag.starts_with("--") => {
                error!("Unknown argument: {}", flag);
                print_usage(&args[0]);
                std::process::exit(1);
            }
            value => positional.push(value.to_string()),
        }
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let initial = positional
        .first()
        .cloned()
        .map(|item_id| (item_id, positional.get(1).cloned()));
    runtime.block_on(run(config, initial, autoplay, media_keys));
}

async fn run(
    config: Config,
    initial: Option<(String, Option<String>)>,
    autoplay: bool,
    media_keys: bool,
) {
    let runtime_handle = tokio::runtime::Handle::current();

    let server: Arc<dyn MediaServer> = match HttpMediaServer::new(&config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            return;
        }
    };

    let progress = match ProgressService::open(config.progress_cache_path()).await {
        Ok(progress) => progress,
        Err(e) => {
            warn!("Progress cache unreadable, starting empty: {}", e);
            ProgressService::new()
        }
    };

    let retry = Arc::new(RetryTracker::new(config.retry.clone()));
    if let Err(e) = retry
        .run("progress:refresh", || progress.refresh_from_server(server.as_ref()))
        .await
    {
        warn!("Could not refresh progress from server: {}", e);
    }

    let (push_tx, push_rx) = tokio::sync::mpsc::unbounded_channel();
    let listener =
        progress.spawn_listener(UnboundedReceiverStream::new(push_rx), runtime_handle.clone());

    let client = match reqwest::Client::builder()
        .connect_timeout(config.request_timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create media client: {}", e);
            return;
        }
    };
    let (element, media_rx) = AudioElement::spawn(client, runtime_handle.clone());
    let playback = PlaybackService::start(
        config.sync.clone(),
        server.clone(),
        Box::new(element),
        media_rx,
        Some(progress.clone()),
        runtime_handle.clone(),
    );

    let _controls = if media_keys {
        match setup_media_controls(playback.clone(), runtime_handle.clone()) {
            Ok(controls) => Some(controls),
            Err(e) => {
                warn!("Media keys unavailable: {:?}", e);
                None
            }
        }
    } else {
        None
    };

    let pending_retry = Arc::new(RetrySlot::new());
    runtime_handle.spawn(watch_playback(
        playback.clone(),
        retry.clone(),
        pending_retry.clone(),
    ));

    if let Some((item_id, episode_id)) = initial {
        if autoplay {
            playback.load_and_play(item_id, episode_id);
        } else {
            playback.load(item_id, episode_id);
        }
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match CliCommand::parse(&line) {
                    Ok(CliCommand::Quit) => break,
                    Ok(CliCommand::Push(json)) => match PushEvent::parse(&json) {
                        Ok(event) => {
                            let _ = push_tx.send(event);
                        }
                        Err(e) => warn!("Ignoring malformed push event: {}", e),
                    },
                    Ok(CliCommand::Progress(key)) => match progress.get(&key) {
                        Some(entry) => println!(
                            "{}: {:.1}s of {:.1}s ({:.0}%){}",
                            key,
                            entry.current_time,
                            entry.duration,
                            entry.progress * 100.0,
                            if entry.is_finished { ", finished" } else { "" }
                        ),
                        None => println!("{}: no progress", key),
                    },
                    Ok(CliCommand::Logout) => {
                        pending_retry.cancel();
                        playback.stop();
                        match progress.clear().await {
                            Ok(()) => println!("Progress cache cleared"),
                            Err(e) => error!("Failed to clear progress cache: {}", e),
                        }
                    }
                    Ok(CliCommand::Help) => print_help(),
                    Ok(command) => {
                        if matches!(command, CliCommand::Load { .. } | CliCommand::Stop) {
                            pending_retry.cancel();
                        }
                        apply(&playback, command)
                    }
                    Err(message) => println!("{}", message),
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    playback.shutdown().await;
    drop(push_tx);
    let _ = listener.await;
    if let Err(e) = progress.save().await {
        warn!("Failed to save progress cache: {}", e);
    }
    info!("Goodbye");
}

fn apply(playback: &PlaybackHandle, command: CliCommand) {
    match command {
        CliCommand::Load {
            item_id,
            episode_id,
        } => playback.load_and_play(item_id, episode_id),
        CliCommand::Play => playback.play(),
        CliCommand::Pause => playback.pause(),
        CliCommand::Toggle => playback.toggle_play_pause(),
        CliCommand::Seek(seconds) => playback.seek(seconds),
        CliCommand::Skip(delta) => playback.seek_relative(delta),
        CliCommand::NextChapter => playback.next_chapter(),
        CliCommand::PreviousChapter => playback.previous_chapter(),
        CliCommand::Chapter(id) => playback.jump_to_chapter(id),
        CliCommand::Volume(volume) => playback.set_volume(volume),
        CliCommand::Stop => playback.stop(),
        CliCommand::Quit
        | CliCommand::Help
        | CliCommand::Logout
        | CliCommand::Progress(_)
        | CliCommand::Push(_) => {}
    }
}

/// Log what the player does and retry loads that failed for transient reasons.
/// A pending retry is dropped as soon as a session starts or the player goes idle.
async fn watch_playback(
    playback: PlaybackHandle,
    retry: Arc<RetryTracker>,
    pending_retry: Arc<RetrySlot>,
) {
    let mut progress_rx = playback.subscribe_progress();
    let mut chapter = None;

    while let Some(progress) = progress_rx.recv().await {
        match progress {
            PlaybackProgress::SessionStarted {
                item_id,
                episode_id,
                display_title,
                duration,
                chapters,
                ..
            } => {
                pending_retry.cancel();
                retry.reset(&format!("load:{}", progress_key(&item_id, episode_id.as_deref())));
                info!(
                    "Now playing {} ({:.0}s, {} chapters)",
                    display_title.as_deref().unwrap_or(&item_id),
                    duration,
                    chapters.len()
                );
            }
            PlaybackProgress::StateChanged { state } => {
                if state == PlayerState::Idle {
                    pending_retry.cancel();
                }
                info!("Player {}", state.name());
            }
            PlaybackProgress::PositionUpdate { chapter_id, .. } if chapter_id != chapter => {
                chapter = chapter_id;
                if let Some(id) = chapter_id {
                    info!("Chapter {}", id);
                }
            }
            PlaybackProgress::Error {
                error,
                item_id: Some(item_id),
                episode_id,
            } => {
                if error.kind().requires_login() {
                    error!("Server rejected credentials, update SHELFPLAY_TOKEN: {}", error);
                    continue;
                }
                let context = format!("load:{}", progress_key(&item_id, episode_id.as_deref()));
                match retry.next_delay(error.kind(), &context) {
                    Some(delay) => {
                        warn!("{} failed ({}), retrying in {:?}", item_id, error, delay);
                        let playback = playback.clone();
                        pending_retry.schedule(delay, move || {
                            playback.load_and_play(item_id, episode_id)
                        });
                    }
                    None => error!("Playback of {} failed: {}", item_id, error),
                }
            }
            _ => {}
        }
    }
}
