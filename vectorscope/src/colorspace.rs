use log::debug;
use serde::{Deserialize, Serialize};

/// Colorspace selection as it appears in the monitor settings.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Colorspace {
    #[default]
    Auto,
    Bt601,
    Bt709,
}

impl Colorspace {
    /// Values other than 1 and 2 fall back to `Auto`.
    pub fn from_setting(value: i64) -> Self {
        match value {
            1 => Self::Bt601,
            2 => Self::Bt709,
            _ => Self::Auto,
        }
    }

    pub fn to_setting(self) -> i64 {
        match self {
            Self::Auto => 0,
            Self::Bt601 => 1,
            Self::Bt709 => 2,
        }
    }
}

/// Concrete chroma transform used by the histogram engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResolvedColorspace {
    Bt601,
    Bt709,
}

/// System-wide output colorspace of the compositing host.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum VideoColorspace {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "601")]
    Cs601,
    #[serde(rename = "709")]
    Cs709,
    #[serde(rename = "srgb")]
    Srgb,
    #[serde(rename = "2100pq")]
    Cs2100Pq,
    #[serde(rename = "2100hlg")]
    Cs2100Hlg,
}

/// Source of the system-wide video configuration.
pub trait VideoInfo {
    /// `None` when no video output is configured yet.
    fn video_colorspace(&self) -> Option<VideoColorspace>;
}

pub fn colorspace_from_video(
    video: Option<VideoColorspace>,
) -> ResolvedColorspace {
    match video {
        Some(VideoColorspace::Cs601) => ResolvedColorspace::Bt601,
        _ => ResolvedColorspace::Bt709,
    }
}

#[derive(Debug, Default)]
pub struct ColorspaceResolver {
    requested: Colorspace,
    resolved: Option<ResolvedColorspace>,
    dirty: bool,
}

impl ColorspaceResolver {
    pub fn new(requested: Colorspace) -> Self {
        Self {
            requested,
            resolved: None,
            dirty: true,
        }
    }

    pub fn requested(&self) -> Colorspace {
        self.requested
    }

    pub fn resolved(&self) -> Option<ResolvedColorspace> {
        self.resolved
    }

    pub fn set_requested(&mut self, requested: Colorspace) {
        if requested != self.requested {
            self.requested = requested;
            self.dirty = true;
        }
    }

    /// Returns the cached value unless the request changed since the last
    /// call. `video` is only queried for `Auto`.
    pub fn resolve(&mut self, video: &dyn VideoInfo) -> ResolvedColorspace {
        if let (false, Some(resolved)) = (self.dirty, self.resolved) {
            return resolved;
        }

        let resolved = match self.requested {
            Colorspace::Bt601 => ResolvedColorspace::Bt601,
            Colorspace::Bt709 => ResolvedColorspace::Bt709,
            Colorspace::Auto => colorspace_from_video(video.video_colorspace()),
        };

        debug!(
            "colorspace resolved: requested={:?} resolved={:?}",
            self.requested, resolved
        );

        self.resolved = Some(resolved);
        self.dirty = false;
        resolved
    }
}
