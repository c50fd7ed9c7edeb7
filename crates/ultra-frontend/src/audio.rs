//! `cpal` output behind the bridge's [`AudioDevice`] seam.
//!
//! `cpal::Stream` cannot leave the thread that built it, so each sink owns a
//! small thread that holds the stream and takes play/close commands over a
//! channel. Samples travel through a lock-free ring buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{debug, error, info, warn};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use ultra_core::audio::{AudioDevice, AudioFormat, SampleSink};
use ultra_core::error::SinkError;

/// Default output device of the default `cpal` host.
#[derive(Debug, Default)]
pub struct CpalAudioDevice;

impl AudioDevice for CpalAudioDevice {
    fn min_buffer_bytes(&self, format: &AudioFormat) -> Option<usize> {
        let device = cpal::default_host().default_output_device()?;
        let supported = find_config(&device, format).ok()?;
        match supported.buffer_size() {
            cpal::SupportedBufferSize::Range { min, .. } => {
                Some(*min as usize * format.frame_size_bytes())
            }
            cpal::SupportedBufferSize::Unknown => None,
        }
    }

    fn open(&self, format: &AudioFormat, frames: usize) -> Result<Box<dyn SampleSink>, SinkError> {
        // Two device buffers of headroom.
        let capacity = frames.max(1) * usize::from(format.channels.max(1)) * 2;
        let (producer, consumer) = HeapRb::<i16>::new(capacity).split();
        let (control, commands) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let failed = Arc::new(AtomicBool::new(false));

        let format = *format;
        let stream_failed = Arc::clone(&failed);
        let thread = thread::Builder::new()
            .name("ultra-cpal".into())
            .spawn(move || stream_thread(format, consumer, commands, ready_tx, stream_failed))
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(SinkError::Unavailable("audio stream thread exited".into()));
            }
        }

        info!(
            "audio: {} Hz, {} channel(s), {} sample ring",
            format.sample_rate, format.channels, capacity
        );
        Ok(Box::new(CpalSink {
            producer,
            control,
            thread: Some(thread),
            failed,
            scratch: Vec::new(),
        }))
    }
}

fn format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 3,
        cpal::SampleFormat::F32 => 2,
        cpal::SampleFormat::U16 => 1,
        _ => 0,
    }
}

fn find_config(
    device: &cpal::Device,
    format: &AudioFormat,
) -> Result<cpal::SupportedStreamConfig, SinkError> {
    let rate = cpal::SampleRate(format.sample_rate);
    let configs = device
        .supported_output_configs()
        .map_err(|e| SinkError::Unavailable(e.to_string()))?;

    configs
        .filter(|c| c.channels() == format.channels && format_rank(c.sample_format()) > 0)
        .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
        .max_by_key(|c| format_rank(c.sample_format()))
        .map(|c| c.with_sample_rate(rate))
        .ok_or_else(|| {
            SinkError::UnsupportedFormat(format!(
                "{} Hz, {} channel(s)",
                format.sample_rate, format.channels
            ))
        })
}

enum StreamCommand {
    Play(Sender<Result<(), SinkError>>),
    Close,
}

fn stream_thread(
    format: AudioFormat,
    consumer: HeapCons<i16>,
    commands: Receiver<StreamCommand>,
    ready: Sender<Result<(), SinkError>>,
    failed: Arc<AtomicBool>,
) {
    let stream = match build_stream(&format, consumer, failed) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    for command in commands.iter() {
        match command {
            StreamCommand::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| SinkError::Unavailable(e.to_string()));
                let _ = reply.send(result);
            }
            StreamCommand::Close => break,
        }
    }

    if let Err(e) = stream.pause() {
        debug!("audio: pause on close failed: {e}");
    }
    debug!("audio: stream closed");
}

fn build_stream(
    format: &AudioFormat,
    mut consumer: HeapCons<i16>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, SinkError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| SinkError::Unavailable("no output device".into()))?;
    let supported = find_config(&device, format)?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let err_fn = move |err: cpal::StreamError| {
        error!("cpal stream error: {err}");
        failed.store(true, Ordering::Release);
    };

    let stream = match sample_format {
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let popped = consumer.pop_slice(data);
                data[popped..].fill(0);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::F32 => {
            let mut temp = vec![0i16; 4096];
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill_converted(&mut consumer, &mut temp, data, 0.0, |s| {
                        f32::from(s) / 32768.0
                    });
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let mut temp = vec![0i16; 4096];
            device.build_output_stream(
                &config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    fill_converted(&mut consumer, &mut temp, data, 32768, |s| {
                        (i32::from(s) + 32768) as u16
                    });
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(SinkError::UnsupportedFormat(format!("{other:?}")));
        }
    };

    stream.map_err(|e| SinkError::Unavailable(e.to_string()))
}

fn fill_converted<T: Copy>(
    consumer: &mut HeapCons<i16>,
    temp: &mut Vec<i16>,
    data: &mut [T],
    silence: T,
    convert: impl Fn(i16) -> T,
) {
    if temp.len() < data.len() {
        temp.resize(data.len(), 0);
    }
    let popped = consumer.pop_slice(&mut temp[..data.len()]);
    for (out, &sample) in data.iter_mut().zip(&temp[..popped]) {
        *out = convert(sample);
    }
    data[popped..].fill(silence);
}

/// Unsigned 8-bit PCM to signed 16-bit.
pub fn u8_to_i16(sample: u8) -> i16 {
    (i16::from(sample) - 128) << 8
}

struct CpalSink {
    producer: HeapProd<i16>,
    control: Sender<StreamCommand>,
    thread: Option<JoinHandle<()>>,
    failed: Arc<AtomicBool>,
    scratch: Vec<i16>,
}

impl CpalSink {
    fn check(&self) -> Result<(), SinkError> {
        if self.thread.is_none() {
            return Err(SinkError::Closed);
        }
        if self.failed.load(Ordering::Acquire) {
            return Err(SinkError::Write("output stream failed".into()));
        }
        Ok(())
    }
}

impl SampleSink for CpalSink {
    fn play(&mut self) -> Result<(), SinkError> {
        let (reply, result) = bounded(1);
        self.control
            .send(StreamCommand::Play(reply))
            .map_err(|_| SinkError::Closed)?;
        result.recv().map_err(|_| SinkError::Closed)?
    }

    fn stop(&mut self) {
        let _ = self.control.send(StreamCommand::Close);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.join().is_err() {
            warn!("audio: stream thread panicked");
        }
    }

    fn write_i16(&mut self, buf: &[i16]) -> Result<usize, SinkError> {
        self.check()?;
        Ok(self.producer.push_slice(buf))
    }

    fn write_u8(&mut self, buf: &[u8]) -> Result<usize, SinkError> {
        self.check()?;
        let n = buf.len().min(self.producer.vacant_len());
        self.scratch.clear();
        self.scratch.extend(buf[..n].iter().copied().map(u8_to_i16));
        Ok(self.producer.push_slice(&self.scratch))
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_bytes_center_on_zero() {
        assert_eq!(u8_to_i16(128), 0);
        assert_eq!(u8_to_i16(0), i16::MIN);
        assert_eq!(u8_to_i16(255), 127 << 8);
    }

    #[test]
    fn short_reads_are_padded_with_silence() {
        let (mut producer, mut consumer) = HeapRb::<i16>::new(8).split();
        producer.push_slice(&[i16::MIN, 0, 16384]);

        let mut temp = Vec::new();
        let mut out = [1.0f32; 5];
        fill_converted(&mut consumer, &mut temp, &mut out, 0.0, |s| {
            f32::from(s) / 32768.0
        });
        assert_eq!(out, [-1.0, 0.0, 0.5, 0.0, 0.0]);
    }
}
