use crate::playback::media::{MediaEvent, MediaEventKind, MediaEventSender, MediaFailure};
use crate::playback::symphonia_decoder::TrackDecoder;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use symphonia::core::audio::SampleBuffer;
use thiserror::Error;
use tracing::{error, info};

const POSITION_UPDATE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub enum AudioCommand {
    Play,
    Pause,
    SetVolume(f32),
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("No audio output device")]
    DeviceNotFound,
    #[error("Stream config error: {0}")]
    StreamConfig(String),
    #[error("Stream build error: {0}")]
    StreamBuild(String),
    #[error("Stream start error: {0}")]
    StreamStart(String),
}

/// Where a running stream reports its position, end and failures
pub struct StreamReporter {
    pub load_id: u64,
    pub events: MediaEventSender,
    /// Segment-relative seconds, stored as f64 bits
    pub position: Arc<AtomicU64>,
}

impl StreamReporter {
    fn send(&self, kind: MediaEventKind) {
        let _ = self.events.send(MediaEvent {
            load_id: self.load_id,
            kind,
        });
    }

    fn store_position(&self, seconds: f64) {
        self.position.store(seconds.to_bits(), Ordering::Relaxed);
    }
}

/// Audio output manager using CPAL
pub struct AudioOutput {
    device: Device,
    stream_config: StreamConfig,
    command_tx: mpsc::Sender<AudioCommand>,
    volume: f32,
}

impl AudioOutput {
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::DeviceNotFound)?;

        let default_config = device
            .default_output_config()
            .map_err(|e| AudioError::StreamConfig(e.to_string()))?;
        let sample_format = default_config.sample_format();
        let stream_config = StreamConfig::from(default_config);

        info!(
            "Audio device: {} channels, {} Hz, {:?}",
            stream_config.channels, stream_config.sample_rate.0, sample_format
        );

        let (command_tx, _command_rx) = mpsc::channel();
        Ok(Self {
            device,
            stream_config,
            command_tx,
            volume: 1.0,
        })
    }

    /// Build and start a stream that pulls from `decoder`.
    /// Output stays silent until `AudioCommand::Play` unless `start_playing` is set.
    pub fn create_stream(
        &mut self,
        mut decoder: TrackDecoder,
        reporter: StreamReporter,
        start_playing: bool,
    ) -> Result<Stream, AudioError> {
        let output_rate = self.stream_config.sample_rate.0;
        let output_channels = self.stream_config.channels as usize;
        let rate_ratio = decoder.sample_rate() as f64 / output_rate as f64;

        // Each stream gets its own command channel
        let (command_tx, command_rx) = mpsc::channel();
        self.command_tx = command_tx;

        let mut playing = start_playing;
        let mut finished = false;
        let mut volume = self.volume;
        let mut pending: Vec<f32> = Vec::new();
        let mut pending_pos = 0usize;
        let mut last_report = Instant::now();

        let stream = self
            .device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    while let Ok(command) = command_rx.try_recv() {
                        match command {
                            AudioCommand::Play => playing = true,
                            AudioCommand::Pause => playing = false,
                            AudioCommand::SetVolume(v) => volume = v.clamp(0.0, 1.0),
                        }
                    }

                    if !playing || finished {
                        data.fill(0.0);
                        return;
                    }

                    let mut written = 0;
                    while written < data.len() {
                        if pending_pos >= pending.len() {
                            match next_chunk(&mut decoder, rate_ratio, output_channels) {
                                Ok(Some(chunk)) => {
                                    pending = chunk;
                                    pending_pos = 0;
                                    continue;
                                }
                                Ok(None) => {
                                    finished = true;
                                    data[written..].fill(0.0);
                                    reporter.store_position(decoder.position());
                                    reporter.send(MediaEventKind::Ended);
                                    return;
                                }
                                Err(message) => {
                                    error!("Decoder error: {}", message);
                                    finished = true;
                                    data[written..].fill(0.0);
                                    reporter.send(MediaEventKind::Error(MediaFailure::Decode(
                                        message,
                                    )));
                                    return;
                                }
                            }
                        }

                        let take = (data.len() - written).min(pending.len() - pending_pos);
                        for (out, sample) in data[written..written + take]
                            .iter_mut()
                            .zip(&pending[pending_pos..pending_pos + take])
                        {
                            *out = sample * volume;
                        }
                        written += take;
                        pending_pos += take;
                    }

                    let position = decoder.position();
                    reporter.store_position(position);
                    if last_report.elapsed() >= POSITION_UPDATE_INTERVAL {
                        reporter.send(MediaEventKind::TimeUpdate(position));
                        last_report = Instant::now();
                    }
                },
                |err| {
                    error!("Audio stream error: {:?}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamStart(e.to_string()))?;
        Ok(stream)
    }

    pub fn send_command(&self, command: AudioCommand) {
        let _ = self.command_tx.send(command);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.send_command(AudioCommand::SetVolume(self.volume));
    }
}

/// Decode one packet and convert it to the output's rate and channel layout
fn next_chunk(
    decoder: &mut TrackDecoder,
    rate_ratio: f64,
    output_channels: usize,
) -> Result<Option<Vec<f32>>, String> {
    let audio_buf = match decoder.decode_next() {
        Ok(Some(buf)) => buf,
        Ok(None) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };

    let spec = *audio_buf.spec();
    let channels = spec.channels.count();
    let mut samples = SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec);
    samples.copy_interleaved_ref(audio_buf);

    let resampled = resample(samples.samples(), channels, rate_ratio);
    Ok(Some(remix(resampled, channels, output_channels)))
}

/// Nearest-frame resampling; `ratio` is input rate over output rate
fn resample(samples: &[f32], channels: usize, ratio: f64) -> Vec<f32> {
    if ratio == 1.0 || channels == 0 {
        return samples.to_vec();
    }
    let input_frames = samples.len() / channels;
    let output_frames = (input_frames as f64 / ratio) as usize;
    let mut out = Vec::with_capacity(output_frames * channels);
    for frame in 0..output_frames {
        let src = ((frame as f64 * ratio) as usize).min(input_frames.saturating_sub(1));
        out.extend_from_slice(&samples[src * channels..(src + 1) * channels]);
    }
    out
}

/// Map interleaved frames from `from` channels to `to` channels
fn remix(samples: Vec<f32>, from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 {
        return samples;
    }
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        for ch in 0..to {
            // Extra output channels repeat the last input channel
            out.push(frame[ch.min(from - 1)]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remix_mono_to_stereo_and_back() {
        assert_eq!(remix(vec![0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
        assert_eq!(remix(vec![0.1, 0.9, 0.2, 0.8], 2, 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_resample_halves_frames_when_downsampling() {
        let stereo: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let out = resample(&stereo, 2, 2.0);
        assert_eq!(out, vec![0.0, 1.0, 4.0, 5.0]);
        assert_eq!(resample(&stereo, 2, 1.0), stereo);
    }
}
