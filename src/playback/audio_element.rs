//! Media element backed by reqwest for fetching, symphonia for decoding and cpal for output.
//!
//! The cpal stream is not `Send`, so it lives on a dedicated audio thread.
//! `AudioElement` only forwards commands to that thread and never blocks.

use crate::models::StreamKind;
use crate::playback::cpal_output::{AudioCommand, AudioOutput, StreamReporter};
use crate::playback::media::{
    MediaElement, MediaEvent, MediaEventKind, MediaEventReceiver, MediaEventSender,
    MediaFailure, MediaSource,
};
use crate::playback::symphonia_decoder::{probe_hint, TrackDecoder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info, warn};

enum ElementCommand {
    Load { load_id: u64, source: MediaSource },
    Fetched {
        load_id: u64,
        result: Result<Vec<u8>, MediaFailure>,
    },
    Seek(f64),
    Play,
    Pause,
    Stop,
    SetVolume(f32),
}

pub struct AudioElement {
    command_tx: mpsc::Sender<ElementCommand>,
    position: Arc<AtomicU64>,
    client: reqwest::Client,
    runtime_handle: tokio::runtime::Handle,
}

impl AudioElement {
    /// Start the audio thread. Events for every load arrive on the returned receiver.
    pub fn spawn(
        client: reqwest::Client,
        runtime_handle: tokio::runtime::Handle,
    ) -> (Self, MediaEventReceiver) {
        let (command_tx, command_rx) = mpsc::channel();
        let (events_tx, events_rx) = tokio_mpsc::unbounded_channel();
        let position = Arc::new(AtomicU64::new(0f64.to_bits()));

        let thread_position = position.clone();
        std::thread::spawn(move || {
            AudioThread::new(events_tx, thread_position).run(command_rx);
        });

        (
            Self {
                command_tx,
                position,
                client,
                runtime_handle,
            },
            events_rx,
        )
    }

    fn send(&self, command: ElementCommand) {
        if self.command_tx.send(command).is_err() {
            warn!("Audio thread is gone, dropping command");
        }
    }

    fn store_position(&self, seconds: f64) {
        self.position.store(seconds.to_bits(), Ordering::Relaxed);
    }
}

impl MediaElement for AudioElement {
    fn load(&mut self, source: MediaSource, load_id: u64) {
        self.store_position(0.0);
        let fetch = source.kind == StreamKind::File;
        let url = source.url.clone();
        self.send(ElementCommand::Load { load_id, source });

        if !fetch {
            return;
        }
        let client = self.client.clone();
        let command_tx = self.command_tx.clone();
        self.runtime_handle.spawn(async move {
            let result = fetch_segment(&client, &url).await;
            let _ = command_tx.send(ElementCommand::Fetched { load_id, result });
        });
    }

    fn seek(&mut self, seconds: f64) {
        self.store_position(seconds);
        self.send(ElementCommand::Seek(seconds));
    }

    fn play(&mut self) {
        self.send(ElementCommand::Play);
    }

    fn pause(&mut self) {
        self.send(ElementCommand::Pause);
    }

    fn stop(&mut self) {
        self.send(ElementCommand::Stop);
    }

    fn current_time(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }

    fn set_volume(&mut self, volume: f32) {
        self.send(ElementCommand::SetVolume(volume));
    }
}

async fn fetch_segment(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, MediaFailure> {
    debug!("Fetching segment {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| MediaFailure::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let message = format!("{} returned {}", url, status);
        return Err(match status.as_u16() {
            404 | 410 => MediaFailure::NotFound(message),
            _ => MediaFailure::Network(message),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| MediaFailure::Network(e.to_string()))?;
    info!("Fetched segment: {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

/// Segment currently held by the audio thread
struct LoadedSegment {
    load_id: u64,
    source: MediaSource,
    data: Arc<Vec<u8>>,
    stream: Option<cpal::Stream>,
}

struct AudioThread {
    events: MediaEventSender,
    position: Arc<AtomicU64>,
    output: Option<AudioOutput>,
    /// Load waiting for its bytes
    requested: Option<(u64, MediaSource)>,
    loaded: Option<LoadedSegment>,
    playing: bool,
}

impl AudioThread {
    fn new(events: MediaEventSender, position: Arc<AtomicU64>) -> Self {
        let output = match AudioOutput::new() {
            Ok(output) => Some(output),
            Err(e) => {
                error!("Failed to initialize audio output: {}", e);
                None
            }
        };
        Self {
            events,
            position,
            output,
            requested: None,
            loaded: None,
            playing: false,
        }
    }

    fn run(mut self, command_rx: mpsc::Receiver<ElementCommand>) {
        info!("Audio thread started");
        while let Ok(command) = command_rx.recv() {
            match command {
                ElementCommand::Load { load_id, source } => self.load(load_id, source),
                ElementCommand::Fetched { load_id, result } => self.on_fetched(load_id, result),
                ElementCommand::Seek(seconds) => self.seek(seconds),
                ElementCommand::Play => {
                    self.playing = true;
                    self.send_output(AudioCommand::Play);
                }
                ElementCommand::Pause => {
                    self.playing = false;
                    self.send_output(AudioCommand::Pause);
                }
                ElementCommand::Stop => {
                    self.playing = false;
                    self.requested = None;
                    self.loaded = None;
                }
                ElementCommand::SetVolume(volume) => {
                    if let Some(output) = self.output.as_mut() {
                        output.set_volume(volume);
                    }
                }
            }
        }
        info!("Audio thread exiting");
    }

    fn emit(&self, load_id: u64, kind: MediaEventKind) {
        let _ = self.events.send(MediaEvent { load_id, kind });
    }

    fn send_output(&self, command: AudioCommand) {
        if let Some(output) = &self.output {
            output.send_command(command);
        }
    }

    fn load(&mut self, load_id: u64, source: MediaSource) {
        self.loaded = None;
        self.playing = false;

        if source.kind == StreamKind::Manifest {
            self.requested = None;
            self.emit(
                load_id,
                MediaEventKind::Error(MediaFailure::Manifest(format!(
                    "Adaptive stream {} cannot be played by the local output",
                    source.url
                ))),
            );
            return;
        }
        self.requested = Some((load_id, source));
    }

    fn on_fetched(&mut self, load_id: u64, result: Result<Vec<u8>, MediaFailure>) {
        let source = match self.requested.take() {
            Some((requested_id, source)) if requested_id == load_id => source,
            other => {
                debug!("Dropping fetched data for superseded load {}", load_id);
                self.requested = other;
                return;
            }
        };

        let data = match result {
            Ok(data) => Arc::new(data),
            Err(failure) => {
                self.emit(load_id, MediaEventKind::Error(failure));
                return;
            }
        };

        let mut segment = LoadedSegment {
            load_id,
            source,
            data,
            stream: None,
        };
        match self.open_stream(&mut segment, 0.0) {
            Ok(duration) => {
                self.loaded = Some(segment);
                self.emit(load_id, MediaEventKind::MetadataLoaded { duration });
            }
            Err(failure) => self.emit(load_id, MediaEventKind::Error(failure)),
        }
    }

    /// (Re)build the output stream for `segment` starting at `start`
    fn open_stream(
        &mut self,
        segment: &mut LoadedSegment,
        start: f64,
    ) -> Result<Option<f64>, MediaFailure> {
        segment.stream = None;

        let hint = probe_hint(segment.source.mime_type.as_deref(), &segment.source.url);
        let mut decoder = TrackDecoder::new((*segment.data).clone(), &hint)
            .map_err(|e| MediaFailure::Decode(e.to_string()))?;
        if start > 0.0 {
            decoder
                .seek(start)
                .map_err(|e| MediaFailure::Decode(e.to_string()))?;
        }
        let duration = decoder.duration();

        let output = self
            .output
            .as_mut()
            .ok_or_else(|| MediaFailure::Output("No audio output device".to_string()))?;
        let reporter = StreamReporter {
            load_id: segment.load_id,
            events: self.events.clone(),
            position: self.position.clone(),
        };
        let stream = output
            .create_stream(decoder, reporter, self.playing)
            .map_err(|e| MediaFailure::Output(e.to_string()))?;
        segment.stream = Some(stream);
        Ok(duration)
    }

    fn seek(&mut self, seconds: f64) {
        let Some(mut segment) = self.loaded.take() else {
            debug!("Seek with nothing loaded, ignoring");
            return;
        };
        let load_id = segment.load_id;
        match self.open_stream(&mut segment, seconds) {
            Ok(_) => self.loaded = Some(segment),
            Err(failure) => self.emit(load_id, MediaEventKind::Error(failure)),
        }
    }
}
