//! Per-camera stream state.
//!
//! A `CameraStream` owns the network client, the decoder, and the
//! bounded SPSC packet queue between them, and runs as a state machine:
//!
//! ```text
//! Stopped → Connecting → Running → (Error | Reconnecting) → Running | Stopped
//! ```
//!
//! The network receive loop is the queue's only producer, the decode
//! loop its only consumer; both live on the worker pools and consult
//! this state to know when to exit.

use std::time::{Duration, Instant};

use crossbeam_utils::atomic::AtomicCell;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use cg_common::{
    CameraConfig, DecodedFrame, DecoderConfig, MemoryStats, NalUnit, NetError, NetworkStats,
    StreamError, StreamPacket, StreamQuality,
};
use cg_decoder::{create_decoder, DecodeStatus, Decoder};
use cg_net::{ConnectionState, RtspClient, RtspConfig};
use cg_runtime::BoundedQueue;

/// Lifecycle state of one camera.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamState {
    Stopped,
    Connecting,
    Running,
    Error,
    Reconnecting,
}

impl StreamState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Connecting => "CONNECTING",
            Self::Running => "RUNNING",
            Self::Error => "ERROR",
            Self::Reconnecting => "RECONNECTING",
        }
    }
}

/// Per-camera statistics.
#[derive(Clone, Debug, Default)]
pub struct CameraStats {
    /// Decoded frames per second over the last measurement window.
    pub current_fps: u32,
    /// Packets dropped by the queue's overflow policy.
    pub dropped_packets: u64,
    pub decoded_frames: u64,
    pub packets_in_queue: usize,
    /// PTS of the most recent decoded frame, microseconds.
    pub last_frame_pts: i64,
}

#[derive(Default)]
struct StatsInner {
    dropped_packets: u64,
    decoded_frames: u64,
    last_frame_pts: i64,
    current_fps: u32,
    frames_in_window: u32,
    window_started: Option<Instant>,
}

/// One camera: RTSP client + decoder + packet queue.
pub struct CameraStream {
    config: CameraConfig,
    state: AtomicCell<StreamState>,
    quality: AtomicCell<StreamQuality>,
    client: Mutex<Option<RtspClient>>,
    decoder: Mutex<Option<Box<dyn Decoder>>>,
    queue: BoundedQueue<StreamPacket>,
    stats: Mutex<StatsInner>,
}

impl CameraStream {
    pub fn new(config: CameraConfig) -> Self {
        let queue = BoundedQueue::new(config.packet_queue_size);
        Self {
            quality: AtomicCell::new(config.quality),
            state: AtomicCell::new(StreamState::Stopped),
            client: Mutex::new(None),
            decoder: Mutex::new(None),
            queue,
            stats: Mutex::new(StatsInner::default()),
            config,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Connect the RTSP client and build the decoder. On success the
    /// camera is `Running`; any subcomponent failure lands in `Error`.
    pub fn start(&self) -> Result<(), StreamError> {
        if self.state.load() == StreamState::Running {
            return Ok(());
        }

        self.set_state(StreamState::Connecting);

        let client = RtspClient::new(RtspConfig {
            url: self.config.rtsp_url.clone(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            auto_reconnect: self.config.auto_reconnect,
            ..RtspConfig::default()
        });

        if let Err(e) = client.connect() {
            warn!(camera = %self.config.id, error = %e, "RTSP connect failed");
            self.set_state(StreamState::Error);
            return Err(e.into());
        }

        // Derive the decoder config from what the stream declares.
        let quality = self.quality.load();
        let decoder_config = match client.stream_info() {
            Some(info) => DecoderConfig {
                codec: info.codec,
                quality,
                max_width: if info.width > 0 { info.width } else { 1920 },
                max_height: if info.height > 0 { info.height } else { 1080 },
                prefer_hardware: true,
                is_sub_stream: matches!(
                    quality,
                    StreamQuality::Thumbnail | StreamQuality::Grid
                ),
            },
            None => DecoderConfig {
                quality,
                ..DecoderConfig::default()
            },
        };

        let decoder = match create_decoder(&decoder_config) {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!(camera = %self.config.id, error = %e, "decoder creation failed");
                client.disconnect();
                self.set_state(StreamState::Error);
                return Err(e.into());
            }
        };

        // Parameter sets from the SDP side channel go first so the
        // decoder can configure itself before the first slice arrives.
        for nal in client.extradata_nal_units() {
            self.queue.push_or_drop_oldest(StreamPacket {
                data: nal.data,
                pts: nal.pts,
                is_keyframe: nal.is_keyframe,
            });
        }

        *self.client.lock() = Some(client);
        *self.decoder.lock() = Some(decoder);

        self.set_state(StreamState::Running);
        Ok(())
    }

    /// Disconnect, destroy the decoder, drain the queue, reset stats.
    pub fn stop(&self) {
        if self.state.load() == StreamState::Stopped {
            return;
        }

        self.set_state(StreamState::Stopped);

        if let Some(client) = self.client.lock().take() {
            client.disconnect();
        }
        drop(self.decoder.lock().take());

        while self.queue.pop().is_some() {}
        *self.stats.lock() = StatsInner::default();
    }

    /// Full restart: stop, brief pause, start. Refused while a
    /// reconnection is already in progress.
    pub fn reconnect(&self) -> bool {
        if self.state.load() == StreamState::Reconnecting {
            return false;
        }

        self.set_state(StreamState::Reconnecting);
        self.stop();
        std::thread::sleep(std::time::Duration::from_millis(500));
        self.start().is_ok()
    }

    // ── Quality ──────────────────────────────────────────────────

    /// Store the new level and let the decoder react; the pipeline stays
    /// up.
    pub fn set_quality(&self, quality: StreamQuality) {
        if self.quality.swap(quality) == quality {
            return;
        }
        if let Some(decoder) = self.decoder.lock().as_mut() {
            decoder.set_quality(quality);
        }
        info!(camera = %self.config.id, quality = quality.label(), "quality changed");
    }

    pub fn quality(&self) -> StreamQuality {
        self.quality.load()
    }

    // ── State ────────────────────────────────────────────────────

    pub fn state(&self) -> StreamState {
        self.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.state.load() == StreamState::Running
    }

    /// Whether the receive/decode loops should keep serving this
    /// camera (`Running`, mid-connect, or reconnecting).
    pub fn is_active(&self) -> bool {
        matches!(
            self.state.load(),
            StreamState::Running | StreamState::Connecting | StreamState::Reconnecting
        )
    }

    fn set_state(&self, new_state: StreamState) {
        let old_state = self.state.swap(new_state);
        if old_state != new_state {
            info!(
                camera = %self.config.id,
                from = old_state.label(),
                to = new_state.label(),
                "camera state"
            );
        }
    }

    // ── Receive side (network loop) ──────────────────────────────

    /// Read the next batch of NAL units from the RTSP client, mirroring
    /// the client's connection state onto the camera. While the client's
    /// background reconnect runs, this yields empty batches (with a
    /// short pause so the loop does not spin).
    pub fn receive_nal_units(&self) -> Result<Vec<NalUnit>, NetError> {
        let (result, client_state) = {
            let guard = self.client.lock();
            let Some(client) = guard.as_ref() else {
                return Err(NetError::NotConnected);
            };
            (client.receive_nal_units(), client.state())
        };

        match client_state {
            ConnectionState::Connected => {
                if self.state.load() == StreamState::Reconnecting {
                    self.set_state(StreamState::Running);
                }
            }
            ConnectionState::Reconnecting => {
                if self.state.load() == StreamState::Running {
                    self.set_state(StreamState::Reconnecting);
                }
                // Nothing to read until the background attempt resolves.
                std::thread::sleep(Duration::from_millis(10));
            }
            ConnectionState::Error => self.set_state(StreamState::Error),
            _ => {}
        }

        result
    }

    /// Producer-side enqueue with drop-oldest overflow.
    pub fn push_packet(&self, packet: StreamPacket) {
        if self.queue.push_or_drop_oldest(packet) {
            self.stats.lock().dropped_packets += 1;
        }
    }

    /// React to a terminal receive error. With auto-reconnect, the
    /// client has already handed recovery to its background reconnect
    /// thread — the camera mirrors `Reconnecting` and the receive loop
    /// keeps serving; without it the camera parks in `Error`. Returns
    /// whether the receive loop should continue.
    pub fn handle_receive_error(&self, error: &NetError) -> bool {
        warn!(camera = %self.config.id, error = %error, "terminal receive error");

        if !self.config.auto_reconnect {
            self.set_state(StreamState::Error);
            return false;
        }

        let client_state = self.client.lock().as_ref().map(|client| client.state());
        match client_state {
            Some(ConnectionState::Reconnecting) => {
                self.set_state(StreamState::Reconnecting);
                true
            }
            _ => {
                self.set_state(StreamState::Error);
                false
            }
        }
    }

    // ── Decode side (decode loop) ────────────────────────────────

    /// Consumer-side dequeue.
    pub fn pop_packet(&self) -> Option<StreamPacket> {
        self.queue.pop()
    }

    /// Feed one packet to the decoder; returns the decoded frame when
    /// one became available.
    pub fn decode_packet(&self, packet: &StreamPacket) -> Option<DecodedFrame> {
        let mut decoder_guard = self.decoder.lock();
        let decoder = decoder_guard.as_mut()?;

        let status = decoder.decode(&packet.data, packet.pts);
        match status {
            DecodeStatus::Success => {}
            DecodeStatus::NeedMoreData => return None,
            ref failure => {
                // Per-packet failures are logged and the stream
                // continues with the next packet.
                debug!(camera = %self.config.id, status = ?failure, "decode failed for packet");
                return None;
            }
        }

        let frame = decoder.get_frame()?;
        drop(decoder_guard);

        let mut stats = self.stats.lock();
        stats.decoded_frames += 1;
        stats.last_frame_pts = frame.pts;
        stats.frames_in_window += 1;
        let window_started = *stats.window_started.get_or_insert_with(Instant::now);
        let elapsed = window_started.elapsed();
        if elapsed.as_millis() >= 1000 {
            stats.current_fps =
                (f64::from(stats.frames_in_window) / elapsed.as_secs_f64()).round() as u32;
            stats.frames_in_window = 0;
            stats.window_started = Some(Instant::now());
        }

        Some(frame)
    }

    /// Decoder memory snapshot (zeros when no decoder is alive).
    pub fn decoder_memory(&self) -> MemoryStats {
        self.decoder
            .lock()
            .as_ref()
            .map(|decoder| decoder.memory_usage())
            .unwrap_or_default()
    }

    // ── Introspection ────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn stats(&self) -> CameraStats {
        let stats = self.stats.lock();
        CameraStats {
            current_fps: stats.current_fps,
            dropped_packets: stats.dropped_packets,
            decoded_frames: stats.decoded_frames,
            packets_in_queue: self.queue.len(),
            last_frame_pts: stats.last_frame_pts,
        }
    }

    pub fn network_stats(&self) -> NetworkStats {
        self.client
            .lock()
            .as_ref()
            .map(|client| client.stats())
            .unwrap_or_default()
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CameraStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraStream")
            .field("id", &self.config.id)
            .field("state", &self.state.load())
            .field("quality", &self.quality.load())
            .field("queued_packets", &self.queue.len())
            .finish()
    }
}
