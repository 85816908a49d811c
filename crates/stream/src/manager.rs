//! Multi-camera coordinator.
//!
//! The manager owns the camera registry and binds each camera's two
//! long-running loops onto the worker pools:
//!
//! - the **network receive loop** reads NAL units and pushes them onto
//!   the camera's packet queue (dropping the oldest under back-pressure);
//! - the **decode loop** pops packets, feeds the decoder, and hands
//!   decoded frames to the installed frame callback.
//!
//! Loops exit on their own when the camera leaves its active states or
//! the manager shuts down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use cg_common::{
    CameraConfig, DecodedFrame, PipelineError, StreamError, StreamPacket, StreamQuality,
    StreamResult,
};
use cg_gpu::{VramAccountant, VramStats};
use cg_runtime::{DecodePool, NetworkPool};

use crate::camera::CameraStream;

/// Callback receiving `(camera_id, frame)` from the decode loops.
pub type FrameCallback = Arc<dyn Fn(&str, &DecodedFrame) + Send + Sync>;

/// Aggregate statistics across all cameras.
#[derive(Clone, Debug, Default)]
pub struct GlobalStats {
    pub total_cameras: usize,
    pub active_cameras: usize,
    pub error_cameras: usize,
    pub reconnecting_cameras: usize,
    /// Average decode fps across active cameras.
    pub avg_fps: f64,
    pub total_decoded_frames: u64,
    pub total_dropped_packets: u64,
    pub memory: VramStats,
}

/// Registry of cameras plus the loops that serve them.
pub struct StreamManager {
    cameras: RwLock<HashMap<String, Arc<CameraStream>>>,
    network_pool: Arc<NetworkPool>,
    decode_pool: Arc<DecodePool>,
    vram: Arc<VramAccountant>,
    frame_callback: Mutex<Option<FrameCallback>>,
    running: AtomicBool,
}

impl StreamManager {
    pub fn new(
        network_pool: Arc<NetworkPool>,
        decode_pool: Arc<DecodePool>,
        vram: Arc<VramAccountant>,
    ) -> Self {
        Self {
            cameras: RwLock::new(HashMap::new()),
            network_pool,
            decode_pool,
            vram,
            frame_callback: Mutex::new(None),
            running: AtomicBool::new(true),
        }
    }

    /// Install the frame callback invoked from within the decode loops.
    pub fn set_frame_callback(&self, callback: FrameCallback) {
        *self.frame_callback.lock() = Some(callback);
    }

    // ── Camera management ────────────────────────────────────────

    /// Construct and start a camera, register it, and bind its receive
    /// and decode loops onto the pools.
    pub fn add_camera(self: &Arc<Self>, config: CameraConfig) -> StreamResult<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(PipelineError::NotInitialized.into());
        }

        let id = config.id.clone();
        if self.cameras.read().contains_key(&id) {
            return Err(PipelineError::DuplicateCamera(id).into());
        }

        let camera = Arc::new(CameraStream::new(config));
        camera.start()?;

        self.network_pool.assign(&id);
        self.cameras.write().insert(id.clone(), camera.clone());

        self.spawn_receive_loop(camera.clone())?;
        self.spawn_decode_loop(camera)?;

        info!(camera = %id, "camera added");
        Ok(())
    }

    /// Stop and remove a camera; its loops exit on the next state check.
    pub fn remove_camera(&self, id: &str) -> StreamResult<()> {
        let camera = self
            .cameras
            .write()
            .remove(id)
            .ok_or_else(|| PipelineError::UnknownCamera(id.to_string()))?;

        camera.stop();
        self.network_pool.unassign(id);
        self.vram.unregister(id);

        info!(camera = %id, "camera removed");
        Ok(())
    }

    pub fn get_camera(&self, id: &str) -> Option<Arc<CameraStream>> {
        self.cameras.read().get(id).cloned()
    }

    pub fn camera_ids(&self) -> Vec<String> {
        self.cameras.read().keys().cloned().collect()
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.read().len()
    }

    // ── Batch operations ─────────────────────────────────────────

    /// Start every stopped camera and re-bind its loops.
    pub fn start_all(self: &Arc<Self>) {
        let cameras: Vec<_> = self.cameras.read().values().cloned().collect();
        for camera in cameras {
            if camera.state() == crate::camera::StreamState::Stopped && camera.start().is_ok() {
                let _ = self.spawn_receive_loop(camera.clone());
                let _ = self.spawn_decode_loop(camera);
            }
        }
    }

    pub fn stop_all(&self) {
        for camera in self.cameras.read().values() {
            camera.stop();
        }
    }

    pub fn set_all_quality(&self, quality: StreamQuality) {
        for camera in self.cameras.read().values() {
            camera.set_quality(quality);
        }
    }

    /// Reconnect every camera parked in `Error`.
    pub fn reconnect_all(&self) {
        for camera in self.cameras.read().values() {
            if camera.state() == crate::camera::StreamState::Error {
                camera.reconnect();
            }
        }
    }

    /// Change one camera's quality level.
    pub fn set_quality(&self, id: &str, quality: StreamQuality) -> StreamResult<()> {
        let camera = self
            .get_camera(id)
            .ok_or_else(|| PipelineError::UnknownCamera(id.to_string()))?;
        camera.set_quality(quality);
        Ok(())
    }

    // ── Statistics ───────────────────────────────────────────────

    pub fn global_stats(&self) -> GlobalStats {
        let cameras = self.cameras.read();

        let mut stats = GlobalStats {
            total_cameras: cameras.len(),
            memory: self.vram.stats(),
            ..GlobalStats::default()
        };

        let mut fps_sum = 0.0;
        for camera in cameras.values() {
            let camera_stats = camera.stats();
            match camera.state() {
                crate::camera::StreamState::Running => {
                    stats.active_cameras += 1;
                    fps_sum += f64::from(camera_stats.current_fps);
                }
                crate::camera::StreamState::Error => stats.error_cameras += 1,
                crate::camera::StreamState::Reconnecting => stats.reconnecting_cameras += 1,
                _ => {}
            }
            stats.total_decoded_frames += camera_stats.decoded_frames;
            stats.total_dropped_packets += camera_stats.dropped_packets;
        }

        if stats.active_cameras > 0 {
            stats.avg_fps = fps_sum / stats.active_cameras as f64;
        }
        stats
    }

    // ── Lifecycle ────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop all cameras and clear the registry. The pools are shut down
    /// by their owner (the pipeline).
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.stop_all();
        self.cameras.write().clear();
        info!("stream manager shut down");
    }

    // ── Loops ────────────────────────────────────────────────────

    fn spawn_receive_loop(self: &Arc<Self>, camera: Arc<CameraStream>) -> StreamResult<()> {
        let manager: Weak<StreamManager> = Arc::downgrade(self);

        self.network_pool
            .submit(move || {
                debug!(camera = %camera.id(), "receive loop started");

                loop {
                    let Some(manager) = manager.upgrade() else { break };
                    if !manager.running.load(Ordering::Acquire) || !camera.is_active() {
                        break;
                    }
                    drop(manager);

                    match camera.receive_nal_units() {
                        Ok(units) => {
                            for nal in units {
                                camera.push_packet(StreamPacket {
                                    data: nal.data,
                                    pts: nal.pts,
                                    is_keyframe: nal.is_keyframe,
                                });
                            }
                        }
                        Err(error) => {
                            // With auto-reconnect the client retries on
                            // a background thread and the loop keeps
                            // serving; otherwise the camera parks in
                            // Error and the loop ends.
                            if !camera.handle_receive_error(&error) {
                                break;
                            }
                        }
                    }
                }

                debug!(camera = %camera.id(), "receive loop exited");
            })
            .map_err(StreamError::from)?;
        Ok(())
    }

    fn spawn_decode_loop(self: &Arc<Self>, camera: Arc<CameraStream>) -> StreamResult<()> {
        let manager: Weak<StreamManager> = Arc::downgrade(self);
        let id = camera.id().to_string();

        self.decode_pool
            .submit_decode_task(&id, move |_context| {
                debug!(camera = %camera.id(), "decode loop started");
                let mut reported_gpu_bytes = usize::MAX;

                loop {
                    let Some(manager) = manager.upgrade() else { break };
                    if !manager.running.load(Ordering::Acquire) || !camera.is_active() {
                        break;
                    }

                    match camera.pop_packet() {
                        Some(packet) => {
                            if let Some(frame) = camera.decode_packet(&packet) {
                                manager.dispatch_frame(camera.id(), &frame);
                            }

                            // Keep the VRAM ledger in step with the
                            // decoder's actual pool.
                            let memory = camera.decoder_memory();
                            if memory.gpu_bytes != reported_gpu_bytes {
                                manager.vram.update(
                                    camera.id(),
                                    memory.gpu_bytes,
                                    memory.surface_pool_size,
                                );
                                reported_gpu_bytes = memory.gpu_bytes;
                            }
                        }
                        None => {
                            drop(manager);
                            // Lock-free queue has no wakeup; poll gently.
                            std::thread::sleep(Duration::from_millis(1));
                        }
                    }
                }

                debug!(camera = %camera.id(), "decode loop exited");
            })
            .map_err(StreamError::from)?;
        Ok(())
    }

    /// Invoke the frame callback under its own mutex.
    fn dispatch_frame(&self, camera_id: &str, frame: &DecodedFrame) {
        let callback = self.frame_callback.lock();
        if let Some(callback) = callback.as_ref() {
            callback(camera_id, frame);
        }
    }
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("cameras", &self.camera_count())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_gpu::VramConfig;
    use cg_runtime::DecodePoolConfig;

    fn manager() -> Arc<StreamManager> {
        Arc::new(StreamManager::new(
            Arc::new(NetworkPool::new(2).unwrap()),
            Arc::new(
                DecodePool::new(DecodePoolConfig {
                    num_threads: 1,
                    device_id: 0,
                })
                .unwrap(),
            ),
            Arc::new(VramAccountant::new(VramConfig::default())),
        ))
    }

    fn unreachable_camera(id: &str) -> CameraConfig {
        CameraConfig::new(id, "rtsp://127.0.0.1:1/none")
    }

    // ── Registry ─────────────────────────────────────────────────

    #[test]
    fn add_camera_with_unreachable_source_fails() {
        let manager = manager();
        let result = manager.add_camera(unreachable_camera("cam-a"));
        assert!(result.is_err());
        assert_eq!(manager.camera_count(), 0, "failed cameras are not kept");
    }

    #[test]
    fn remove_unknown_camera_errors() {
        let manager = manager();
        assert!(matches!(
            manager.remove_camera("ghost"),
            Err(StreamError::Pipeline(PipelineError::UnknownCamera(_)))
        ));
    }

    #[test]
    fn add_after_shutdown_is_rejected() {
        let manager = manager();
        manager.shutdown();
        assert!(matches!(
            manager.add_camera(unreachable_camera("cam-b")),
            Err(StreamError::Pipeline(PipelineError::NotInitialized))
        ));
    }

    // ── Stats ────────────────────────────────────────────────────

    #[test]
    fn empty_registry_stats() {
        let manager = manager();
        let stats = manager.global_stats();
        assert_eq!(stats.total_cameras, 0);
        assert_eq!(stats.active_cameras, 0);
        assert_eq!(stats.avg_fps, 0.0);
        assert_eq!(stats.memory.total_allocated_bytes, 0);
    }

    // ── Callback ─────────────────────────────────────────────────

    #[test]
    fn frame_callback_installs_and_dispatches() {
        use std::sync::atomic::AtomicUsize;

        let manager = manager();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = seen.clone();
            manager.set_frame_callback(Arc::new(move |camera_id, frame| {
                assert_eq!(camera_id, "cam-x");
                assert_eq!(frame.width, 16);
                seen.fetch_add(1, Ordering::Relaxed);
            }));
        }

        let frame = DecodedFrame {
            width: 16,
            height: 16,
            format: cg_common::PixelFormat::Nv12,
            pts: 0,
            dts: 0,
            is_keyframe: true,
            planes: [0; 3],
            pitch: [0; 3],
            surface: None,
        };
        manager.dispatch_frame("cam-x", &frame);
        manager.dispatch_frame("cam-x", &frame);
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }

    // ── Shutdown ─────────────────────────────────────────────────

    #[test]
    fn shutdown_clears_registry_and_is_idempotent() {
        let manager = manager();
        manager.shutdown();
        manager.shutdown();
        assert!(!manager.is_running());
        assert_eq!(manager.camera_count(), 0);
    }
}
