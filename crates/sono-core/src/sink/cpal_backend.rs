//! CPAL reference sink
//!
//! Opens an output stream on the requested device and feeds the device
//! callback through an SPSC ring. cpal streams are not `Send`, so the
//! stream lives on a dedicated holder thread; the engine side only keeps
//! the ring producer, which is. `add_packets` blocks (in bounded sleeps)
//! while the ring is full; that backpressure paces the whole engine.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{Sink, SinkError, SinkResult};
use crate::types::{AudioFormat, SampleFormat};

/// Ring sized for a quarter second of audio
const RING_SECONDS: f64 = 0.25;

pub struct CpalSink {
    producer: Option<rtrb::Producer<f32>>,
    shutdown: Option<mpsc::Sender<()>>,
    format: Option<AudioFormat>,
    ring_capacity: usize,
}

impl CpalSink {
    pub fn new() -> Self {
        Self {
            producer: None,
            shutdown: None,
            format: None,
            ring_capacity: 0,
        }
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for CpalSink {
    fn initialize(&mut self, format: &AudioFormat, device: &str) -> SinkResult<()> {
        if format.sample_format != SampleFormat::F32 {
            return Err(SinkError::OpenFailed(format!(
                "cpal sink is f32-native, got {}",
                format.sample_format.name()
            )));
        }

        let channels = format.layout.count();
        let capacity = ((format.sample_rate as f64 * RING_SECONDS) as usize).max(1024) * channels;
        let (producer, mut consumer) = rtrb::RingBuffer::<f32>::new(capacity);

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let device_name = device.to_string();
        let sample_rate = format.sample_rate;
        let channel_count = channels as u16;

        // The cpal stream is not Send, so it lives on its own thread for the
        // sink's whole lifetime.
        thread::Builder::new()
            .name("sono-sink".to_string())
            .spawn(move || {
                let host = cpal::default_host();
                let device = if device_name.is_empty() || device_name == "default" {
                    host.default_output_device()
                } else {
                    host.output_devices().ok().and_then(|mut devices| {
                        devices.find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
                    })
                };
                let device = match device {
                    Some(d) => d,
                    None => {
                        let _ = ready_tx.send(Err(format!("device '{}' not found", device_name)));
                        return;
                    }
                };

                let config = cpal::StreamConfig {
                    channels: channel_count,
                    sample_rate: cpal::SampleRate(sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let stream = device.build_output_stream(
                    &config,
                    move |out: &mut [f32], _| {
                        for sample in out.iter_mut() {
                            // Underruns play silence
                            *sample = consumer.pop().unwrap_or(0.0);
                        }
                    },
                    |err| log::error!("sink: stream error: {}", err),
                    None,
                );
                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }

                log::info!(
                    "sink: opened {} Hz, {} channels",
                    sample_rate,
                    channel_count
                );
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until the sink shuts down
                let _ = shutdown_rx.recv();
                drop(stream);
                log::debug!("sink: holder thread exiting");
            })
            .map_err(|e| SinkError::OpenFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SinkError::OpenFailed(e)),
            Err(_) => return Err(SinkError::OpenFailed("sink thread died".into())),
        }

        self.producer = Some(producer);
        self.shutdown = Some(shutdown_tx);
        self.format = Some(format.clone());
        self.ring_capacity = capacity;
        Ok(())
    }

    fn add_packets(&mut self, data: &[u8]) -> SinkResult<usize> {
        let format = self.format.as_ref().ok_or(SinkError::NotInitialized)?;
        let producer = self.producer.as_mut().ok_or(SinkError::NotInitialized)?;

        let frames = data.len() / format.frame_size;
        let bytes = frames * format.frame_size;

        for chunk in data[..bytes].chunks_exact(4) {
            let sample = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            // Blocking point: wait for the device callback to make space
            loop {
                match producer.push(sample) {
                    Ok(()) => break,
                    Err(rtrb::PushError::Full(_)) => thread::sleep(Duration::from_millis(1)),
                }
            }
        }
        Ok(frames)
    }

    fn get_delay(&self) -> f64 {
        let (Some(producer), Some(format)) = (self.producer.as_ref(), self.format.as_ref()) else {
            return 0.0;
        };
        let queued = self.ring_capacity - producer.slots();
        queued as f64 / format.layout.count() as f64 / format.sample_rate as f64
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.producer = None;
        self.format = None;
    }
}
