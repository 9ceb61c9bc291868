use std::io::Cursor;
use symphonia::core::{
    audio::AudioBufferRef,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
    units::Time,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("Symphonia error: {0}")]
    Symphonia(#[from] SymphoniaError),
    #[error("No audio tracks found")]
    NoAudioTracks,
}

/// Probe hint derived from a segment's MIME type and URL
pub fn probe_hint(mime_type: Option<&str>, url: &str) -> Hint {
    let mut hint = Hint::new();
    if let Some(mime_type) = mime_type {
        hint.mime_type(mime_type);
    }
    let path = url.split('?').next().unwrap_or_default();
    if let Some((_, extension)) = path.rsplit_once('.') {
        if !extension.contains('/') {
            hint.with_extension(extension);
        }
    }
    hint
}

/// Decoder over one in-memory segment, counting frames for position reporting
pub struct TrackDecoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    decoded_frames: u64,
    duration: Option<f64>,
}

impl TrackDecoder {
    pub fn new(data: Vec<u8>, hint: &Hint) -> Result<Self, DecoderError> {
        let media_source = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

        let probed = symphonia::default::get_probe().format(
            hint,
            media_source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecoderError::NoAudioTracks)?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let duration = track
            .codec_params
            .n_frames
            .map(|frames| frames as f64 / sample_rate as f64);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())?;

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            decoded_frames: 0,
            duration,
        })
    }

    /// Decode the next packet of our track; `None` at end of stream
    pub fn decode_next(&mut self) -> Result<Option<AudioBufferRef<'_>>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let audio_buf = self.decoder.decode(&packet)?;
            self.decoded_frames += audio_buf.frames() as u64;
            return Ok(Some(audio_buf));
        }
    }

    /// Seconds decoded so far
    pub fn position(&self) -> f64 {
        self.decoded_frames as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Seek to `seconds` into the segment.
    /// Formats without a seek index are decoded forward from the start instead.
    pub fn seek(&mut self, seconds: f64) -> Result<(), DecoderError> {
        let seconds = seconds.max(0.0);
        let target_frame = (seconds * self.sample_rate as f64) as u64;

        let seeked = self.format_reader.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: Time::new(seconds.floor() as u64, seconds.fract()),
                track_id: Some(self.track_id),
            },
        );
        match seeked {
            Ok(_) => {
                self.decoder.reset();
                self.decoded_frames = target_frame;
                return Ok(());
            }
            Err(e) => warn!("Seek to {:.2}s failed: {}, decoding forward instead", seconds, e),
        }

        self.format_reader.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: Time::new(0, 0.0),
                track_id: Some(self.track_id),
            },
        )?;
        self.decoder.reset();
        self.decoded_frames = 0;

        while self.decoded_frames < target_frame {
            if self.decode_next()?.is_none() {
                break;
            }
        }
        debug!(
            "Decoded forward to {:.2}s (wanted {:.2}s)",
            self.position(),
            seconds
        );
        Ok(())
    }
}
