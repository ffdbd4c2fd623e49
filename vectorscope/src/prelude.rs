pub use crate::colorspace::{
    Colorspace, ColorspaceResolver, ResolvedColorspace, VideoColorspace,
    VideoInfo,
};
pub use crate::histogram::{Histogram, SCOPE_SIZE, chroma};
pub use crate::logging::init_logger;
pub use crate::logging::{debug, error, info, trace, warn};
pub use crate::render::capture::{
    CAPTURE_BLEND, CAPTURE_FORMAT, CaptureTarget, CapturedFrame, FrameCapture,
};
pub use crate::render::context::GpuContext;
pub use crate::render::display::{
    DisplayKind, EffectSource, ScopeDisplay, ScopeEffect,
    release_shared_effect, shared_effect,
};
pub use crate::runtime::frame_clock::{FrameClock, Tick};
pub use crate::runtime::monitor::{
    DisplayLayout, MonitorControls, VectorscopeMonitor,
};
pub use crate::settings::{
    AppConfig, MonitorSettings, ProducerConfig, ProducerContent,
    SettingsWatcher, SharedVideo, VideoSettings,
};
pub use crate::source::image::ImageProducer;
pub use crate::source::producer::{Producer, ProducerKind, ProducerRegistry};
pub use crate::source::target::{
    RESOLVE_INTERVAL, ResolveOutcome, TargetResolver,
};
pub use crate::warn_once;
