use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::logging;
use crate::render::context::{GpuContext, device_descriptor};
use crate::render::display::{EffectSource, release_shared_effect};
use crate::render::frame::Frame;
use crate::runtime::frame_clock::FrameClock;
use crate::runtime::monitor::VectorscopeMonitor;
use crate::settings::{
    AppConfig, SettingsWatcher, SharedVideo, resolve_settings_path,
};
use crate::source::producer::ProducerRegistry;

const INTENSITY_STEP: u32 = 8;
const BACKGROUND: wgpu::Color = wgpu::Color::BLACK;

#[derive(Clone, Debug)]
pub struct MonitorOptions {
    pub settings_path: PathBuf,
    pub effect: EffectSource,
}

/// Registers every producer declared in `config`. Image paths are relative
/// to `base_dir`.
pub fn build_registry(
    gpu: &GpuContext,
    config: &AppConfig,
    base_dir: &Path,
) -> Result<ProducerRegistry, String> {
    let registry = ProducerRegistry::new();

    for producer in &config.producers {
        let built = producer.build(gpu, base_dir).map_err(|err| {
            format!("failed to create producer '{}': {}", producer.name, err)
        })?;
        registry.add(built)?;
    }

    Ok(registry)
}

pub fn run(options: MonitorOptions) -> Result<(), String> {
    logging::init_logger();

    let settings_path = resolve_settings_path(options.settings_path)?;
    let config = AppConfig::load(&settings_path)?;

    let event_loop = EventLoop::new().map_err(|err| err.to_string())?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut runner = Runner::new(settings_path, options.effect, config);
    let result = event_loop
        .run_app(&mut runner)
        .map_err(|err| err.to_string());

    if let Some(err) = runner.failure.take() {
        return Err(err);
    }

    result
}

struct Session {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    gpu: GpuContext,
    registry: ProducerRegistry,
    monitor: VectorscopeMonitor,
    _watcher: Option<SettingsWatcher>,
}

struct Runner {
    settings_path: PathBuf,
    effect: EffectSource,
    config: AppConfig,
    video: Arc<SharedVideo>,
    clock: FrameClock,
    session: Option<Session>,
    render_requested: bool,
    failure: Option<String>,
}

impl Runner {
    fn new(
        settings_path: PathBuf,
        effect: EffectSource,
        config: AppConfig,
    ) -> Self {
        let video = Arc::new(SharedVideo::new(config.video.clone()));
        let clock = FrameClock::new(config.video.fps, Instant::now());

        Self {
            settings_path,
            effect,
            config,
            video,
            clock,
            session: None,
            render_requested: false,
            failure: None,
        }
    }

    fn init_session(
        &mut self,
        event_loop: &ActiveEventLoop,
    ) -> Result<Session, String> {
        let attrs = WindowAttributes::default()
            .with_title(window_title(&self.config.monitor.target_name))
            .with_inner_size(PhysicalSize::new(256, 256));

        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .map_err(|err| err.to_string())?,
        );

        let instance =
            wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let surface = instance
            .create_surface(window.clone())
            .map_err(|err| err.to_string())?;

        let adapter = pollster::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: Some(&surface),
            },
        ))
        .map_err(|err| err.to_string())?;

        let (device, queue) =
            pollster::block_on(adapter.request_device(&device_descriptor()))
                .map_err(|err| err.to_string())?;

        let size = window.inner_size();
        let caps = surface.get_capabilities(&adapter);
        let format = choose_surface_format(&caps.formats)
            .ok_or_else(|| "surface has no supported formats".to_string())?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        surface.configure(&device, &surface_config);

        let gpu = GpuContext::new(Arc::new(device), Arc::new(queue));

        let base_dir = self
            .settings_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let registry = build_registry(&gpu, &self.config, &base_dir)?;
        info!(
            "registered producers: [{}]",
            registry.video_producer_names().join(", ")
        );

        let monitor = VectorscopeMonitor::new(
            &gpu,
            format,
            &self.effect,
            &self.config.monitor,
        );

        let controls = monitor.controls().clone();
        let video = self.video.clone();
        let watcher =
            SettingsWatcher::start(self.settings_path.clone(), move |config| {
                controls.update(&config.monitor);
                video.set(config.video);
            });

        let watcher = match watcher {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!("settings will not reload: {}", err);
                None
            }
        };

        Ok(Session {
            window,
            surface,
            surface_config,
            gpu,
            registry,
            monitor,
            _watcher: watcher,
        })
    }

    fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };

        session.surface_config.width = new_size.width;
        session.surface_config.height = new_size.height;
        session
            .surface
            .configure(session.gpu.device(), &session.surface_config);
    }

    fn render(&mut self, event_loop: &ActiveEventLoop) {
        self.render_requested = false;

        let Some(session) = self.session.as_mut() else {
            return;
        };

        let output = match session.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                session
                    .surface
                    .configure(session.gpu.device(), &session.surface_config);
                return;
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("surface timeout while acquiring frame");
                return;
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                error!("surface out of memory; exiting");
                event_loop.exit();
                return;
            }
            Err(wgpu::SurfaceError::Other) => {
                warn!("surface error while acquiring frame");
                return;
            }
        };

        let mut frame = Frame::new(session.gpu.device(), output);
        let size = frame.size;

        {
            let mut pass = frame.begin_pass(BACKGROUND);
            session
                .monitor
                .render(self.video.as_ref(), &mut pass, size);
        }

        frame.submit(session.gpu.queue());

        fit_window_to_footprint(&session.window, session.monitor.footprint());
    }

    fn handle_key(
        &mut self,
        event_loop: &ActiveEventLoop,
        key_event: &KeyEvent,
    ) {
        if key_event.state != ElementState::Pressed || key_event.repeat {
            return;
        }

        let PhysicalKey::Code(code) = key_event.physical_key else {
            return;
        };

        let Some(session) = self.session.as_ref() else {
            return;
        };
        let controls = session.monitor.controls();

        match code {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::KeyB => {
                let bypass = !controls.bypass();
                controls.set_bypass(bypass);
                info!("bypass {}", if bypass { "on" } else { "off" });
            }
            KeyCode::Equal | KeyCode::NumpadAdd => {
                controls.set_intensity(
                    controls.intensity().saturating_add(INTENSITY_STEP),
                );
                info!("intensity {}", controls.intensity());
            }
            KeyCode::Minus | KeyCode::NumpadSubtract => {
                controls.set_intensity(
                    controls.intensity().saturating_sub(INTENSITY_STEP),
                );
                info!("intensity {}", controls.intensity());
            }
            _ => {}
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        // Monitors go first so the shared effect is the last GPU object.
        self.session = None;
        release_shared_effect();
        event_loop.exit();
    }
}

impl ApplicationHandler for Runner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() {
            return;
        }

        match self.init_session(event_loop) {
            Ok(session) => {
                session.window.request_redraw();
                self.session = Some(session);
            }
            Err(err) => {
                error!("failed to initialize monitor: {}", err);
                self.failure = Some(err);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                self.shutdown(event_loop);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                self.handle_key(event_loop, &event);
            }
            WindowEvent::Resized(new_size) => self.resize(new_size),
            WindowEvent::RedrawRequested => self.render(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        self.clock.set_fps(self.video.get().fps);

        if !self.render_requested && self.clock.tick(now).is_due() {
            if let Some(session) = self.session.as_mut() {
                session.monitor.tick(&session.registry, now);
                session.window.set_title(&window_title(
                    &session.monitor.controls().resolver().name(),
                ));
                session.window.request_redraw();
                self.render_requested = true;
            }
        }

        event_loop.set_control_flow(ControlFlow::WaitUntil(
            self.clock.next_deadline(),
        ));
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.session = None;
        release_shared_effect();
    }
}

fn window_title(target: &str) -> String {
    if target.is_empty() {
        "vectorscope".to_string()
    } else {
        format!("vectorscope: {}", target)
    }
}

fn fit_window_to_footprint(window: &Window, footprint: [u32; 2]) {
    let [width, height] = footprint;
    if width == 0 || height == 0 {
        return;
    }

    let current = window.inner_size();
    if current.width != width || current.height != height {
        let _ = window.request_inner_size(PhysicalSize::new(width, height));
    }
}

fn choose_surface_format(
    formats: &[wgpu::TextureFormat],
) -> Option<wgpu::TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|f| *f == wgpu::TextureFormat::Bgra8Unorm)
        .or_else(|| formats.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_names_target() {
        assert_eq!(window_title(""), "vectorscope");
        assert_eq!(window_title("Program"), "vectorscope: Program");
    }

    #[test]
    fn surface_format_prefers_plain_bgra() {
        let formats = [
            wgpu::TextureFormat::Rgba8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm,
        ];
        assert_eq!(
            choose_surface_format(&formats),
            Some(wgpu::TextureFormat::Bgra8Unorm)
        );
        assert_eq!(
            choose_surface_format(&[wgpu::TextureFormat::Rgba8Unorm]),
            Some(wgpu::TextureFormat::Rgba8Unorm)
        );
        assert_eq!(choose_surface_format(&[]), None);
    }
}
