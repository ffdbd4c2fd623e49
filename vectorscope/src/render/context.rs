use std::sync::Arc;

/// Device and queue shared by every monitor, producer and the window that
/// presents them. All GPU resources are created and dropped through this on
/// the render thread.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Windowless device for tests and offline tools.
    pub fn headless() -> Result<Self, String> {
        let instance =
            wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                force_fallback_adapter: false,
                compatible_surface: None,
            },
        ))
        .map_err(|err| format!("no headless adapter: {}", err))?;

        let (device, queue) =
            pollster::block_on(adapter.request_device(&device_descriptor()))
                .map_err(|err| format!("failed to create device: {}", err))?;

        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    pub fn device(&self) -> &wgpu::Device {
        self.device.as_ref()
    }

    pub fn queue(&self) -> &wgpu::Queue {
        self.queue.as_ref()
    }
}

pub fn device_descriptor() -> wgpu::DeviceDescriptor<'static> {
    wgpu::DeviceDescriptor {
        label: Some("vectorscope-device"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::Performance,
        trace: wgpu::Trace::default(),
    }
}
