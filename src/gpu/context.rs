use crate::error::{Result, SplatError};
use bytemuck::AnyBitPattern;
use wgpu::{
    Adapter, Buffer, BufferDescriptor, BufferUsages, Device, DeviceDescriptor, Features, Instance,
    MapMode, PollType, PowerPreference, Queue, RequestAdapterOptions, Surface,
};

/// Device and queue shared by every pipeline of one window or headless run.
pub struct GpuContext {
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
}

impl GpuContext {
    /// Acquire any adapter without a presentation surface.
    pub fn headless() -> Result<Self> {
        let instance = Instance::default();
        pollster::block_on(Self::new(&instance, None))
    }

    /// Acquire an adapter able to present to `surface`.
    pub fn for_surface(instance: &Instance, surface: &Surface<'_>) -> Result<Self> {
        pollster::block_on(Self::new(instance, Some(surface)))
    }

    async fn new(instance: &Instance, surface: Option<&Surface<'_>>) -> Result<Self> {
        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| SplatError::AdapterUnavailable(e.to_string()))?;

        let limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("splat device"),
                required_features: Features::empty(),
                required_limits: limits,
                experimental_features: Default::default(),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| SplatError::DeviceUnavailable(e.to_string()))?;

        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            "acquired GPU device"
        );
        Ok(Self {
            adapter,
            device,
            queue,
        })
    }

    pub fn max_workgroups_per_dimension(&self) -> u32 {
        self.device.limits().max_compute_workgroups_per_dimension
    }

    /// Copy `source` into a fresh mappable buffer and block until its contents are on the host.
    pub fn readback<T: AnyBitPattern>(&self, source: &Buffer) -> Result<Vec<T>> {
        let size = source.size();
        let staging = self.device.create_buffer(&BufferDescriptor {
            label: Some("readback buffer"),
            size,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&Default::default());
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit([encoder.finish()]);

        let bytes = self.map_read(&staging)?;
        Ok(bytes
            .chunks_exact(size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Map a `MAP_READ` buffer, copy it out and unmap it again.
    pub fn map_read(&self, buffer: &Buffer) -> Result<Vec<u8>> {
        let slice = buffer.slice(..);
        let (tx, rx) = flume::bounded(1);
        slice.map_async(MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        self.device
            .poll(PollType::wait_indefinitely())
            .map_err(|e| SplatError::Readback(e.to_string()))?;
        rx.recv()
            .map_err(|e| SplatError::Readback(e.to_string()))?
            .map_err(|e| SplatError::Readback(e.to_string()))?;

        let data = slice.get_mapped_range();
        let out = data.to_vec();
        drop(data);
        buffer.unmap();
        Ok(out)
    }
}

/// Number of workgroups along x, y, z covering `workgroups_needed` under the per-dimension limit.
pub fn split_dispatch_3d(workgroups_needed: u32, max_dim: u32) -> [u32; 3] {
    let x = workgroups_needed.min(max_dim).max(1);
    let y = workgroups_needed.div_ceil(x).min(max_dim).max(1);
    let xy = x as u64 * y as u64;
    let z = (workgroups_needed as u64).div_ceil(xy).max(1);
    [x, y, z.min(max_dim as u64) as u32]
}

/// Dispatch size for one lane per item with `wg_size` lanes per workgroup.
pub fn dispatch_for_items(items: u32, wg_size: u32, max_dim: u32) -> [u32; 3] {
    split_dispatch_3d(items.max(1).div_ceil(wg_size), max_dim)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Headless context, or `None` when the machine has no usable adapter.
    pub(crate) fn test_context() -> Option<GpuContext> {
        match GpuContext::headless() {
            Ok(ctx) => Some(ctx),
            Err(err) => {
                eprintln!("skipping GPU test: {err}");
                None
            }
        }
    }

    #[test]
    fn dispatch_fits_in_one_dimension_when_possible() {
        assert_eq!(split_dispatch_3d(10, 65535), [10, 1, 1]);
        assert_eq!(split_dispatch_3d(0, 65535), [1, 1, 1]);
    }

    #[test]
    fn dispatch_spills_into_second_dimension() {
        let [x, y, z] = split_dispatch_3d(100, 16);
        assert_eq!([x, y, z], [16, 7, 1]);
        assert!(x * y * z >= 100);
    }

    #[test]
    fn dispatch_for_items_rounds_up() {
        assert_eq!(dispatch_for_items(257, 256, 65535), [2, 1, 1]);
        assert_eq!(dispatch_for_items(256, 256, 65535), [1, 1, 1]);
    }
}
