use base::defs::{Error, ErrorKind::*, Result};

/// Headless GPU device shared by the projector and blender. All
/// submissions go through the single queue and block until completion,
/// so downstream stages always observe fully written resources.
#[derive(Debug)]
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    pub fn new() -> Result<GpuContext> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            },
        ))
        .ok_or_else(|| {
            Error::new(GpuError, "no compatible GPU adapter".to_string())
        })?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .map_err(|e| {
            Error::with_source(
                GpuError,
                "failed to create GPU device".to_string(),
                e,
            )
        })?;

        Ok(GpuContext { device, queue })
    }

    /// Block until all submitted work has completed.
    pub fn wait(&self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }

    /// Run GPU work inside validation/out-of-memory error scopes and
    /// surface any captured error as a per-frame failure instead of a
    /// process abort.
    pub fn scoped<T>(&self, work: impl FnOnce() -> T) -> Result<T> {
        self.device
            .push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = work();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(oom) {
            let desc = format!("GPU submission failed: {}", err);
            return Err(Error::new(GpuError, desc));
        }
        Ok(value)
    }
}
