//! Pipeline top level.
//!
//! Builds the pieces in dependency order — VRAM accountant, network
//! pool, decode pool, stream manager — and tears them down in reverse,
//! draining pending work.

use std::sync::Arc;

use tracing::info;

use cg_common::{CameraConfig, PipelineConfig, StreamQuality, StreamResult};
use cg_gpu::{VramAccountant, VramConfig, VramStats};
use cg_runtime::{DecodePool, DecodePoolConfig, DecodePoolStats, NetworkPool, PoolStats};

use crate::manager::{FrameCallback, GlobalStats, StreamManager};

/// Statistics from every pipeline component.
#[derive(Clone, Debug, Default)]
pub struct PipelineStats {
    pub network_pool: PoolStats,
    pub decode_pool: DecodePoolStats,
    pub memory: VramStats,
    pub streams: GlobalStats,
}

/// The complete multi-camera ingest pipeline.
pub struct StreamPipeline {
    config: PipelineConfig,
    vram: Arc<VramAccountant>,
    network_pool: Arc<NetworkPool>,
    decode_pool: Arc<DecodePool>,
    manager: Arc<StreamManager>,
}

impl StreamPipeline {
    /// Construct and initialize every component in dependency order.
    /// Fails when a worker pool cannot bring up its threads.
    pub fn new(config: PipelineConfig) -> StreamResult<Self> {
        info!(
            network_threads = config.network_threads,
            decode_threads = config.decode_threads,
            gpu_device = config.gpu_device_id,
            queue_size = config.packet_queue_size,
            vram_limit_mb = config.max_gpu_memory_bytes / (1024 * 1024),
            "initializing stream pipeline"
        );

        let vram = Arc::new(VramAccountant::new(VramConfig {
            max_gpu_memory_bytes: config.max_gpu_memory_bytes,
            enable_warnings: config.enable_memory_warnings,
        }));

        let network_pool = Arc::new(NetworkPool::new(config.network_threads)?);

        let decode_pool = Arc::new(DecodePool::new(DecodePoolConfig {
            num_threads: config.decode_threads,
            device_id: config.gpu_device_id,
        })?);

        let manager = Arc::new(StreamManager::new(
            network_pool.clone(),
            decode_pool.clone(),
            vram.clone(),
        ));

        info!("stream pipeline initialized");
        Ok(Self {
            config,
            vram,
            network_pool,
            decode_pool,
            manager,
        })
    }

    /// Register a camera; fills in the pipeline's default queue size
    /// when the camera config leaves it at 0.
    pub fn add_camera(&self, mut config: CameraConfig) -> StreamResult<()> {
        if config.packet_queue_size == 0 {
            config.packet_queue_size = self.config.packet_queue_size;
        }
        self.manager.add_camera(config)
    }

    pub fn remove_camera(&self, id: &str) -> StreamResult<()> {
        self.manager.remove_camera(id)
    }

    pub fn set_quality(&self, id: &str, quality: StreamQuality) -> StreamResult<()> {
        self.manager.set_quality(id, quality)
    }

    pub fn set_frame_callback(&self, callback: FrameCallback) {
        self.manager.set_frame_callback(callback);
    }

    /// The stream manager (camera registry and batch operations).
    pub fn manager(&self) -> &Arc<StreamManager> {
        &self.manager
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            network_pool: self.network_pool.stats(),
            decode_pool: self.decode_pool.stats(),
            memory: self.vram.stats(),
            streams: self.manager.global_stats(),
        }
    }

    /// Tear down in reverse construction order, draining in-flight
    /// tasks (the camera loops exit promptly once the manager stops).
    pub fn shutdown(&self) {
        info!("shutting down stream pipeline");
        self.manager.shutdown();
        self.decode_pool.shutdown(true);
        self.network_pool.shutdown(true);
        info!("stream pipeline shut down");
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for StreamPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPipeline")
            .field("cameras", &self.manager.camera_count())
            .field("network_threads", &self.config.network_threads)
            .field("decode_threads", &self.config.decode_threads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pipeline() -> StreamPipeline {
        StreamPipeline::new(PipelineConfig {
            network_threads: 2,
            decode_threads: 1,
            ..PipelineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn construction_and_teardown() {
        let pipeline = small_pipeline();
        assert!(pipeline.manager().is_running());
        assert_eq!(pipeline.stats().streams.total_cameras, 0);

        pipeline.shutdown();
        assert!(!pipeline.manager().is_running());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pipeline = small_pipeline();
        pipeline.shutdown();
        pipeline.shutdown();
    }

    #[test]
    fn camera_default_queue_size_comes_from_pipeline() {
        let pipeline = small_pipeline();
        let mut config = CameraConfig::new("cam", "rtsp://127.0.0.1:1/none");
        config.packet_queue_size = 0;

        // The camera fails to start (unreachable source) but the config
        // plumbing must not reject it.
        let result = pipeline.add_camera(config);
        assert!(result.is_err());
    }

    #[test]
    fn stats_aggregate_all_components() {
        let pipeline = small_pipeline();
        let stats = pipeline.stats();
        assert_eq!(stats.network_pool.tasks_submitted, 0);
        assert_eq!(stats.decode_pool.total_decodes, 0);
        assert_eq!(stats.memory.total_allocated_bytes, 0);
    }
}
