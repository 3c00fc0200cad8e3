//! Microphone source using CPAL for capture and hound for chunk encoding
//!
//! CPAL streams are not `Send` on every platform, so the stream lives on a
//! dedicated audio thread for the lifetime of a recording. The callback
//! converts samples to PCM16 into a shared buffer; each capture tick drains
//! the buffer and wraps it in a small WAV container.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use hound::{WavSpec, WavWriter};

use super::{AudioSource, CaptureError};

type SampleBuffer = Arc<Mutex<Vec<i16>>>;

/// Audio source reading from the default input device.
///
/// Chunks are WAV-encoded, so pair it with an `AudioFormat` whose `format`
/// is "wav" and whose rate/channels match the device.
pub struct CpalAudioSource {
    samples: SampleBuffer,
    is_recording: Arc<AtomicBool>,
    spec: Option<WavSpec>,
    stop_tx: Option<mpsc::Sender<()>>,
    audio_thread: Option<JoinHandle<()>>,
    permission: Option<bool>,
}

impl Default for CpalAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalAudioSource {
    pub fn new() -> Self {
        Self {
            samples: Arc::new(Mutex::new(Vec::new())),
            is_recording: Arc::new(AtomicBool::new(false)),
            spec: None,
            stop_tx: None,
            audio_thread: None,
            permission: None,
        }
    }

    /// Sample rate and channel count of the running recording
    pub fn stream_shape(&self) -> Option<(u32, u16)> {
        self.spec.map(|s| (s.sample_rate, s.channels))
    }

    fn encode_wav(&self, samples: &[i16]) -> Result<Vec<u8>, CaptureError> {
        let spec = self.spec.ok_or(CaptureError::AlreadyStopped)?;
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec)
                .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?;
            for &sample in samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?;
            }
            writer
                .finalize()
                .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?;
        }
        Ok(cursor.into_inner())
    }
}

impl AudioSource for CpalAudioSource {
    fn has_permission(&self) -> bool {
        self.permission == Some(true)
    }

    /// Desktop platforms gate capture on device access
    fn request_permission(&mut self) -> Result<bool, CaptureError> {
        let granted = cpal::default_host().default_input_device().is_some();
        self.permission = Some(granted);
        Ok(granted)
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if self.audio_thread.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<WavSpec, CaptureError>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let samples = self.samples.clone();
        let is_recording = self.is_recording.clone();
        is_recording.store(true, Ordering::SeqCst);

        let audio_thread = std::thread::Builder::new()
            .name("voice2eye-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(samples, is_recording.clone()) {
                    Ok((stream, spec)) => {
                        let _ = ready_tx.send(Ok(spec));
                        stream
                    }
                    Err(e) => {
                        is_recording.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Keep the stream alive until stop() or the source is dropped
                let _ = stop_rx.recv();
                is_recording.store(false, Ordering::SeqCst);
                drop(stream);
                log::debug!("Capture thread exiting");
            })
            .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(spec)) => {
                log::info!(
                    "Recording started: {} Hz, {} channel(s)",
                    spec.sample_rate,
                    spec.channels
                );
                self.spec = Some(spec);
                self.stop_tx = Some(stop_tx);
                self.audio_thread = Some(audio_thread);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = audio_thread.join();
                Err(e)
            }
            Err(_) => {
                self.is_recording.store(false, Ordering::SeqCst);
                let _ = audio_thread.join();
                Err(CaptureError::StreamCreationFailed(
                    "capture thread exited before reporting".to_string(),
                ))
            }
        }
    }

    fn is_active(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    fn take_buffered(&mut self) -> Option<Vec<u8>> {
        let samples = {
            let mut guard = self.samples.lock().ok()?;
            if guard.is_empty() {
                return None;
            }
            std::mem::take(&mut *guard)
        };

        match self.encode_wav(&samples) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!("Dropping {} samples: {}", samples.len(), e);
                None
            }
        }
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.is_recording.store(false, Ordering::SeqCst);

        let stop_tx = self.stop_tx.take().ok_or(CaptureError::AlreadyStopped)?;
        let _ = stop_tx.send(());

        if let Some(handle) = self.audio_thread.take() {
            if handle.join().is_err() {
                log::error!("Capture thread panicked");
            }
        }

        if let Ok(mut samples) = self.samples.lock() {
            samples.clear();
        }
        self.spec = None;
        log::info!("Recording stopped");
        Ok(())
    }
}

impl Drop for CpalAudioSource {
    fn drop(&mut self) {
        if self.stop_tx.is_some() {
            let _ = self.stop();
        }
    }
}

/// Open and start the default input device on the current thread
fn open_input_stream(
    samples: SampleBuffer,
    is_recording: Arc<AtomicBool>,
) -> Result<(Stream, WavSpec), CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported_config = device
        .default_input_config()
        .map_err(|_| CaptureError::NoSupportedConfig)?;
    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();

    let spec = WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate.0,
        bits_per_sample: 16, // Always emit 16-bit
        sample_format: hound::SampleFormat::Int,
    };

    let stream = match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, samples, is_recording),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, samples, is_recording),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, samples, is_recording),
        _ => Err(CaptureError::NoSupportedConfig),
    }?;

    stream
        .play()
        .map_err(|e| CaptureError::StreamCreationFailed(format!("Failed to start stream: {}", e)))?;

    Ok((stream, spec))
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    samples: SampleBuffer,
    is_recording: Arc<AtomicBool>,
) -> Result<Stream, CaptureError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !is_recording.load(Ordering::SeqCst) {
                    return;
                }
                if let Ok(mut buffer) = samples.lock() {
                    buffer.extend(data.iter().map(|&s| sample_to_i16(s)));
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))
}

/// Convert any sample type to PCM16
fn sample_to_i16<T>(sample: T) -> i16
where
    T: cpal::Sample,
    f32: cpal::FromSample<T>,
{
    let f32_sample: f32 = sample.to_sample::<f32>();
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}
