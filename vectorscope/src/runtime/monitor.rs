use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use log::{debug, info};

use crate::colorspace::{Colorspace, ColorspaceResolver, VideoInfo};
use crate::histogram::{Histogram, SCOPE_SIZE};
use crate::render::capture::FrameCapture;
use crate::render::context::GpuContext;
use crate::render::display::{EffectSource, ScopeDisplay, shared_effect};
use crate::settings::{MAX_INTENSITY, MIN_INTENSITY, MonitorSettings};
use crate::source::producer::ProducerRegistry;
use crate::source::target::{ResolveOutcome, TargetResolver};

const BYPASS_BIT: u64 = 1 << 63;
const WIDTH_MASK: u64 = 0x7fff_ffff;

/// Display mode and last captured size, read and written as one word.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DisplayLayout {
    pub bypass: bool,
    pub captured: [u32; 2],
}

impl DisplayLayout {
    pub fn pack(self) -> u64 {
        let bypass = if self.bypass { BYPASS_BIT } else { 0 };
        let width = (u64::from(self.captured[0]) & WIDTH_MASK) << 32;
        bypass | width | u64::from(self.captured[1])
    }

    pub fn unpack(bits: u64) -> Self {
        Self {
            bypass: bits & BYPASS_BIT != 0,
            captured: [((bits >> 32) & WIDTH_MASK) as u32, bits as u32],
        }
    }

    pub fn footprint(self) -> [u32; 2] {
        if self.bypass {
            self.captured
        } else {
            [SCOPE_SIZE, SCOPE_SIZE]
        }
    }
}

/// The half of a monitor that configuration updates touch. Shared between
/// the control thread and the render thread through an `Arc`.
pub struct MonitorControls {
    resolver: TargetResolver,
    scale: AtomicU32,
    intensity: AtomicU32,
    colorspace: AtomicI64,
    layout: AtomicU64,
}

impl MonitorControls {
    pub fn new(settings: &MonitorSettings) -> Self {
        let controls = Self {
            resolver: TargetResolver::new(),
            scale: AtomicU32::new(1),
            intensity: AtomicU32::new(1),
            colorspace: AtomicI64::new(Colorspace::Auto.to_setting()),
            layout: AtomicU64::new(DisplayLayout::default().pack()),
        };
        controls.update(settings);
        controls
    }

    /// Applies new settings. Safe to call from any thread at any time.
    pub fn update(&self, settings: &MonitorSettings) {
        let settings = settings.normalized();

        if self.resolver.set_name(&settings.target_name) {
            info!("monitor target set to '{}'", settings.target_name);
        }

        self.scale
            .store(settings.target_scale as u32, Ordering::Release);
        self.intensity
            .store(settings.intensity as u32, Ordering::Release);
        self.colorspace
            .store(settings.colorspace().to_setting(), Ordering::Release);
        self.set_bypass(settings.bypass_vectorscope);
    }

    pub fn snapshot(&self) -> MonitorSettings {
        MonitorSettings {
            target_name: self.resolver.name(),
            target_scale: i64::from(self.scale()),
            intensity: i64::from(self.intensity()),
            colorspace: self.colorspace().to_setting(),
            bypass_vectorscope: self.bypass(),
        }
    }

    pub fn resolver(&self) -> &TargetResolver {
        &self.resolver
    }

    pub fn scale(&self) -> u32 {
        self.scale.load(Ordering::Acquire)
    }

    pub fn intensity(&self) -> u32 {
        self.intensity.load(Ordering::Acquire)
    }

    pub fn set_intensity(&self, intensity: u32) {
        let intensity =
            i64::from(intensity).clamp(MIN_INTENSITY, MAX_INTENSITY);
        self.intensity.store(intensity as u32, Ordering::Release);
    }

    pub fn colorspace(&self) -> Colorspace {
        Colorspace::from_setting(self.colorspace.load(Ordering::Acquire))
    }

    pub fn bypass(&self) -> bool {
        self.layout().bypass
    }

    pub fn set_bypass(&self, bypass: bool) {
        let _ = self.layout.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |bits| {
                let layout = DisplayLayout::unpack(bits);
                Some(DisplayLayout { bypass, ..layout }.pack())
            },
        );
    }

    pub fn layout(&self) -> DisplayLayout {
        DisplayLayout::unpack(self.layout.load(Ordering::Acquire))
    }

    /// 256x256 for the histogram, the last captured size in bypass.
    pub fn footprint(&self) -> [u32; 2] {
        self.layout().footprint()
    }

    fn record_capture(&self, captured: [u32; 2]) {
        let _ = self.layout.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |bits| {
                let layout = DisplayLayout::unpack(bits);
                Some(DisplayLayout { captured, ..layout }.pack())
            },
        );
    }
}

/// One vectorscope overlay. Owned by the render thread; configuration
/// arrives through [`VectorscopeMonitor::controls`].
pub struct VectorscopeMonitor {
    gpu: GpuContext,
    controls: Arc<MonitorControls>,
    colorspace: ColorspaceResolver,
    capture: FrameCapture,
    histogram: Histogram,
    display: ScopeDisplay,
    rendered: bool,
}

impl VectorscopeMonitor {
    pub fn new(
        gpu: &GpuContext,
        format: wgpu::TextureFormat,
        effect: &EffectSource,
        settings: &MonitorSettings,
    ) -> Self {
        let controls = Arc::new(MonitorControls::new(settings));
        let effect = shared_effect(gpu, format, effect);

        Self {
            gpu: gpu.clone(),
            colorspace: ColorspaceResolver::new(controls.colorspace()),
            controls,
            capture: FrameCapture::new(),
            histogram: Histogram::new(),
            display: ScopeDisplay::new(gpu, effect),
            rendered: false,
        }
    }

    pub fn controls(&self) -> &Arc<MonitorControls> {
        &self.controls
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn display(&self) -> &ScopeDisplay {
        &self.display
    }

    pub fn frame_capture(&self) -> &FrameCapture {
        &self.capture
    }

    pub fn footprint(&self) -> [u32; 2] {
        self.controls.footprint()
    }

    pub fn rendered_this_tick(&self) -> bool {
        self.rendered
    }

    /// Starts a new display frame.
    pub fn tick(
        &mut self,
        registry: &ProducerRegistry,
        now: Instant,
    ) -> ResolveOutcome {
        self.rendered = false;
        self.controls.resolver.resolve_if_due(registry, now)
    }

    /// Captures the target and rebuilds the display texture, at most once
    /// per tick. Returns true when a new texture was produced.
    pub fn prepare(&mut self, video: &dyn VideoInfo) -> bool {
        if self.rendered {
            return false;
        }
        self.rendered = true;

        self.colorspace.set_requested(self.controls.colorspace());
        let colorspace = self.colorspace.resolve(video);

        let Some(target) = self.controls.resolver.target() else {
            debug!("no target to capture");
            return false;
        };

        let bypass = self.controls.bypass();
        let scale = self.controls.scale();

        let gpu = &self.gpu;
        let histogram = &mut self.histogram;
        let display = &mut self.display;

        let captured =
            self.capture.capture(gpu, target.as_ref(), scale, |frame| {
                if bypass {
                    display.set_frame(gpu, frame);
                } else {
                    histogram.compute(frame, colorspace);
                    display.set_histogram(gpu, histogram);
                }
            });

        drop(target);

        let Some(size) = captured else {
            return false;
        };

        self.controls.record_capture(size);
        true
    }

    /// Draws whatever texture is current. `target_size` is the size of the
    /// pass's color attachment.
    pub fn draw(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        target_size: [u32; 2],
    ) {
        let layout = self.controls.layout();

        self.display.draw(
            &self.gpu,
            pass,
            target_size,
            layout.bypass,
            self.controls.intensity(),
            layout.captured,
        );
    }

    pub fn render(
        &mut self,
        video: &dyn VideoInfo,
        pass: &mut wgpu::RenderPass<'_>,
        target_size: [u32; 2],
    ) {
        self.prepare(video);
        self.draw(pass, target_size);
    }
}
