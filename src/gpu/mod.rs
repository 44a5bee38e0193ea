//! WebGPU device path: compressed-node storage, kernel pipelines, and the
//! traverser facade.
//!
//! The CPU modules define the semantics; this module executes the same
//! arithmetic in WGSL compute kernels, one thread per node (compression) or
//! per query (traversal).

pub mod traverser;
pub mod wgsl;

pub use traverser::{CompressedHandles, LbvhTraverser};

use thiserror::Error;

/// Error type for the device path.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Failed to create GPU adapter
    #[error("failed to create GPU adapter")]
    NoAdapter,

    /// Failed to create GPU device
    #[error("failed to create GPU device: {0}")]
    DeviceCreation(String),

    /// Buffer mapping error
    #[error("buffer mapping error: {0}")]
    BufferMapping(String),
}

/// Shared device and queue handle.
///
/// Cheap to clone; all clones refer to the same device. A traverser creates
/// its own context by default, or several traversers can share one.
#[derive(Clone)]
pub struct GpuContext {
    device: std::sync::Arc<wgpu::Device>,
    queue: std::sync::Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Acquire a high-performance adapter and device.
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(GpuError::NoAdapter)?;
        log::debug!("using adapter: {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("ropewalk device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| GpuError::DeviceCreation(e.to_string()))?;

        Ok(GpuContext {
            device: std::sync::Arc::new(device),
            queue: std::sync::Arc::new(queue),
        })
    }

    /// The underlying device.
    pub fn device(&self) -> &std::sync::Arc<wgpu::Device> {
        &self.device
    }

    /// The submission queue.
    pub fn queue(&self) -> &std::sync::Arc<wgpu::Queue> {
        &self.queue
    }

    /// Block until all submitted work has completed.
    pub fn sync(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Largest usable compute workgroup size along x.
    pub fn max_workgroup_size(&self) -> u32 {
        let limits = self.device.limits();
        limits
            .max_compute_workgroup_size_x
            .min(limits.max_compute_invocations_per_workgroup)
    }

    /// Copy `size` bytes out of `buffer` and block until they are mapped.
    pub(crate) fn read_buffer(&self, buffer: &wgpu::Buffer, size: u64) -> Result<Vec<u8>, GpuError> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| GpuError::BufferMapping("map channel closed".to_string()))?
            .map_err(|e| GpuError::BufferMapping(format!("{:?}", e)))?;

        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext").finish_non_exhaustive()
    }
}
