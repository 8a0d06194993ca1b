//! Microphone capture for the voice listener.
//!
//! The cpal callback is the producer: it downmixes to mono, converts to
//! 16-bit PCM, and pushes into a bounded [`BlockQueue`] without ever
//! blocking. The listener's consumer loop drains the queue. When the
//! consumer stalls, the oldest blocks are dropped so memory stays bounded
//! and recognition resumes near real time once the consumer catches up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, StreamConfig};
use tracing::{debug, error, info, warn};

use crate::error::VoiceError;

/// Bounded audio block queue with a drop-oldest overflow policy.
pub struct BlockQueue {
    blocks: Mutex<VecDeque<Vec<i16>>>,
    notify: tokio::sync::Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl BlockQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: Mutex::new(VecDeque::new()),
            notify: tokio::sync::Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Producer side; called from the audio callback, never blocks beyond
    /// the short queue lock.
    pub fn push(&self, block: Vec<i16>) {
        let mut blocks = self
            .blocks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        blocks.push_back(block);
        while blocks.len() > self.capacity {
            blocks.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        drop(blocks);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Vec<i16>> {
        self.blocks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    /// Consumer side: next block, waiting up to `wait` for one to arrive.
    /// Returns `None` on timeout so the caller can re-check its stop flag.
    pub async fn recv(&self, wait: Duration) -> Option<Vec<i16>> {
        if let Some(block) = self.pop() {
            return Some(block);
        }
        let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        self.pop()
    }

    /// Total blocks discarded to the overflow policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Audio sample source the listener drains. The microphone implementation
/// below is the production source; tests substitute scripted ones.
pub trait AudioSource: Send {
    /// Begin pushing blocks into `queue`. Returns the sample rate the
    /// stream actually achieved.
    fn start(&mut self, queue: Arc<BlockQueue>) -> Result<u32, VoiceError>;

    fn stop(&mut self);
}

/// Microphone configuration as of listener start.
#[derive(Debug, Clone)]
pub struct MicrophoneConfig {
    /// Input device index; `None` selects the host default.
    pub device: Option<usize>,
    pub sample_rate: u32,
    /// Requested callback block size in frames.
    pub block_size: u32,
}

/// cpal-backed microphone source.
///
/// cpal streams are not `Send`, so the stream lives on a dedicated thread
/// that opens it, parks until told to stop, and drops it on the way out.
pub struct Microphone {
    config: MicrophoneConfig,
    worker: Option<MicWorker>,
}

struct MicWorker {
    stop_tx: std::sync::mpsc::Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

impl Microphone {
    pub fn new(config: MicrophoneConfig) -> Self {
        Self {
            config,
            worker: None,
        }
    }
}

impl AudioSource for Microphone {
    fn start(&mut self, queue: Arc<BlockQueue>) -> Result<u32, VoiceError> {
        if self.worker.is_some() {
            return Err(VoiceError::DeviceUnavailable(
                "microphone already started".to_string(),
            ));
        }

        let config = self.config.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("mic-input".to_string())
            .spawn(move || {
                let stream = match open_input_stream(&config, queue) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Park until stop() or the listener is dropped; either way
                // the stream is closed before the thread exits.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| VoiceError::DeviceUnavailable(format!("input thread spawn: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(rate)) => {
                self.worker = Some(MicWorker { stop_tx, handle });
                Ok(rate)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::DeviceUnavailable(
                "input thread exited before opening a stream".to_string(),
            )),
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                warn!("Microphone thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pick an input device. A configured index whose device has no input
/// channels falls back to scanning every device for the first usable one.
fn select_device(host: &cpal::Host, index: Option<usize>) -> Result<Device, VoiceError> {
    let devices: Vec<Device> = host
        .input_devices()
        .map_err(|e| VoiceError::DeviceUnavailable(format!("device enumeration: {e}")))?
        .collect();

    if let Some(index) = index {
        match devices.get(index) {
            Some(device) if has_input_channels(device) => return Ok(device.clone()),
            Some(_) => warn!(index, "Configured device has no input channels, scanning"),
            None => warn!(index, "Configured device index out of range, scanning"),
        }
        if let Some(device) = devices.iter().find(|d| has_input_channels(d)) {
            info!(name = %device_name(device), "Fell back to first device with input channels");
            return Ok(device.clone());
        }
    }

    host.default_input_device()
        .or_else(|| devices.into_iter().find(|d| has_input_channels(d)))
        .ok_or_else(|| VoiceError::DeviceUnavailable("no input device found".to_string()))
}

fn has_input_channels(device: &Device) -> bool {
    device
        .supported_input_configs()
        .map(|mut configs| configs.any(|c| c.channels() >= 1))
        .unwrap_or(false)
}

fn device_name(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "<unknown>".to_string())
}

/// Open the input stream, walking the fallback chain: configured rate in
/// mono, then the device's default rate in mono, then the default rate
/// with the device's own channel count (downmixed to mono in the
/// callback). Exhausting every attempt reports `DeviceUnavailable`.
fn open_input_stream(
    config: &MicrophoneConfig,
    queue: Arc<BlockQueue>,
) -> Result<(cpal::Stream, u32), VoiceError> {
    let host = cpal::default_host();
    let device = select_device(&host, config.device)?;

    let default = device
        .default_input_config()
        .map_err(|e| VoiceError::DeviceUnavailable(format!("no default input config: {e}")))?;
    let default_rate = default.sample_rate().0;
    let default_channels = default.channels();

    let attempts: Vec<StreamConfig> = vec![
        StreamConfig {
            channels: 1,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: BufferSize::Fixed(config.block_size),
        },
        StreamConfig {
            channels: 1,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: BufferSize::Default,
        },
        StreamConfig {
            channels: 1,
            sample_rate: SampleRate(default_rate),
            buffer_size: BufferSize::Default,
        },
        StreamConfig {
            channels: default_channels,
            sample_rate: SampleRate(default_rate),
            buffer_size: BufferSize::Default,
        },
    ];

    let mut last_error = None;
    for stream_config in attempts {
        match build_stream(&device, &stream_config, Arc::clone(&queue)) {
            Ok(stream) => {
                info!(
                    device = %device_name(&device),
                    sample_rate = stream_config.sample_rate.0,
                    channels = stream_config.channels,
                    "Audio input stream opened"
                );
                return Ok((stream, stream_config.sample_rate.0));
            }
            Err(e) => {
                debug!(
                    sample_rate = stream_config.sample_rate.0,
                    channels = stream_config.channels,
                    "Stream config rejected: {e}"
                );
                last_error = Some(e);
            }
        }
    }

    Err(VoiceError::DeviceUnavailable(format!(
        "all stream configurations rejected by '{}': {}",
        device_name(&device),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn build_stream(
    device: &Device,
    stream_config: &StreamConfig,
    queue: Arc<BlockQueue>,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let channels = stream_config.channels;
    let stream = device.build_input_stream(
        stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            queue.push(to_mono_i16(data, channels));
        },
        |err| error!("Audio stream error: {err}"),
        None,
    )?;
    stream
        .play()
        .map_err(|_| cpal::BuildStreamError::DeviceNotAvailable)?;
    Ok(stream)
}

/// Downmix interleaved samples to mono by channel averaging and convert
/// to 16-bit PCM.
fn to_mono_i16(data: &[f32], channels: u16) -> Vec<i16> {
    let to_i16 = |s: f32| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
    if channels <= 1 {
        return data.iter().copied().map(to_i16).collect();
    }
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| to_i16(frame.iter().sum::<f32>() / ch as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let queue = BlockQueue::new(2);
        queue.push(vec![1]);
        queue.push(vec![2]);
        queue.push(vec![3]);

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop(), Some(vec![2]));
        assert_eq!(queue.pop(), Some(vec![3]));
        assert_eq!(queue.pop(), None);
    }

    #[tokio::test]
    async fn test_recv_times_out_when_empty() {
        let queue = BlockQueue::new(4);
        assert_eq!(queue.recv(Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let queue = Arc::new(BlockQueue::new(4));
        let pusher = Arc::clone(&queue);
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pusher.push(vec![7, 8]);
        });

        let block = queue.recv(Duration::from_secs(1)).await;
        assert_eq!(block, Some(vec![7, 8]));
        task.await.unwrap();
    }

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = [0.5, -0.5, 1.0, 0.0];
        let mono = to_mono_i16(&stereo, 2);
        assert_eq!(mono.len(), 2);
        assert_eq!(mono[0], 0);
        assert_eq!(mono[1], i16::MAX / 2);
    }

    #[test]
    fn test_mono_passthrough_converts_to_pcm() {
        let mono = to_mono_i16(&[1.0, -1.0, 0.0], 1);
        assert_eq!(mono, vec![i16::MAX, -i16::MAX, 0]);
    }
}
