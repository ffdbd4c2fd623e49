use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_yml::Value;
use yaml_merge_keys::merge_keys_serde_yml;

use crate::colorspace::{Colorspace, VideoColorspace, VideoInfo};
use crate::render::context::GpuContext;
use crate::source::image::ImageProducer;
use crate::source::producer::{Producer, ProducerKind};

pub const MIN_SCALE: i64 = 1;
pub const MAX_SCALE: i64 = 128;
pub const MIN_INTENSITY: i64 = 1;
pub const MAX_INTENSITY: i64 = 255;

/// User-facing monitor settings, as stored in the `monitor` section.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub target_name: String,
    pub target_scale: i64,
    pub intensity: i64,
    /// 0 = auto, 1 = BT.601, 2 = BT.709.
    pub colorspace: i64,
    pub bypass_vectorscope: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            target_name: String::new(),
            target_scale: MIN_SCALE,
            intensity: MIN_INTENSITY,
            colorspace: Colorspace::Auto.to_setting(),
            bypass_vectorscope: false,
        }
    }
}

impl MonitorSettings {
    pub fn normalized(&self) -> Self {
        Self {
            target_name: self.target_name.clone(),
            target_scale: self.target_scale.clamp(MIN_SCALE, MAX_SCALE),
            intensity: self.intensity.clamp(MIN_INTENSITY, MAX_INTENSITY),
            colorspace: self.colorspace,
            bypass_vectorscope: self.bypass_vectorscope,
        }
    }

    pub fn colorspace(&self) -> Colorspace {
        Colorspace::from_setting(self.colorspace)
    }
}

/// The host's global video configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct VideoSettings {
    /// Absent until an output is configured.
    pub colorspace: Option<VideoColorspace>,
    pub fps: f32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            colorspace: Some(VideoColorspace::Cs709),
            fps: 60.0,
        }
    }
}

impl VideoInfo for VideoSettings {
    fn video_colorspace(&self) -> Option<VideoColorspace> {
        self.colorspace
    }
}

/// Video settings that can be swapped from the watcher thread while the
/// render thread reads them.
#[derive(Default)]
pub struct SharedVideo {
    settings: RwLock<VideoSettings>,
}

impl SharedVideo {
    pub fn new(settings: VideoSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    pub fn get(&self) -> VideoSettings {
        self.settings.read().clone()
    }

    pub fn set(&self, settings: VideoSettings) {
        *self.settings.write() = settings;
    }
}

impl VideoInfo for SharedVideo {
    fn video_colorspace(&self) -> Option<VideoColorspace> {
        self.settings.read().colorspace
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProducerContent {
    Image {
        path: PathBuf,
    },
    Solid {
        color: [u8; 4],
        width: u32,
        height: u32,
    },
    Bars {
        width: u32,
        height: u32,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProducerConfig {
    pub name: String,
    #[serde(default = "default_producer_kind")]
    pub kind: ProducerKind,
    pub content: ProducerContent,
}

fn default_producer_kind() -> ProducerKind {
    ProducerKind::Source
}

impl ProducerConfig {
    /// Relative image paths are resolved against `base_dir`.
    pub fn build(
        &self,
        gpu: &GpuContext,
        base_dir: &Path,
    ) -> Result<Arc<dyn Producer>, String> {
        let producer = match &self.content {
            ProducerContent::Image { path } => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    base_dir.join(path)
                };
                ImageProducer::from_png(gpu, &self.name, &path)?
            }
            ProducerContent::Solid {
                color,
                width,
                height,
            } => {
                ImageProducer::solid(gpu, &self.name, *width, *height, *color)?
            }
            ProducerContent::Bars { width, height } => {
                ImageProducer::color_bars(gpu, &self.name, *width, *height)?
            }
        };

        Ok(Arc::new(producer.with_kind(self.kind)))
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub video: VideoSettings,
    pub producers: Vec<ProducerConfig>,
    pub monitor: MonitorSettings,
}

impl AppConfig {
    /// Reads `path` as JSON when it has a `.json` extension, YAML otherwise.
    pub fn load(path: &Path) -> Result<Self, String> {
        let source = fs::read_to_string(path).map_err(|err| {
            format!("failed to read settings '{}': {}", path.display(), err)
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&source)
        } else {
            Self::from_yaml_str(&source)
        };

        config.map_err(|err| {
            format!("failed to load settings '{}': {}", path.display(), err)
        })
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, String> {
        let raw: Value = serde_yml::from_str(source)
            .map_err(|err| format!("invalid YAML: {}", err))?;

        let merged = merge_keys_serde_yml(raw)
            .map_err(|err| format!("failed to process merge keys: {}", err))?;

        serde_yml::from_value(merged)
            .map_err(|err| format!("invalid settings: {}", err))
    }

    pub fn from_json_str(source: &str) -> Result<Self, String> {
        serde_json::from_str(source)
            .map_err(|err| format!("invalid JSON settings: {}", err))
    }
}

/// Reloads the settings file whenever it changes on disk and hands the new
/// config to `on_change` on the watcher thread.
pub struct SettingsWatcher {
    _watcher: RecommendedWatcher,
}

impl SettingsWatcher {
    pub fn start<F>(path: PathBuf, on_change: F) -> Result<Self, String>
    where
        F: Fn(AppConfig) + Send + 'static,
    {
        let watched_path = path.clone();

        let mut watcher = notify::recommended_watcher(
            move |result: notify::Result<Event>| {
                let Ok(event) = result else {
                    return;
                };

                if !settings_file_changed(&event, &watched_path) {
                    return;
                }

                match AppConfig::load(&watched_path) {
                    Ok(config) => {
                        info!("reloaded {}", watched_path.display());
                        on_change(config);
                    }
                    Err(err) => warn!("{}", err),
                }
            },
        )
        .map_err(|err| format!("failed to create settings watcher: {}", err))?;

        // The parent directory survives editors that replace the file.
        let watch_dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .map_err(|err| {
                format!("failed to watch '{}': {}", watch_dir.display(), err)
            })?;

        Ok(Self { _watcher: watcher })
    }
}

pub fn resolve_settings_path(
    path: impl Into<PathBuf>,
) -> Result<PathBuf, String> {
    let path = path.into();

    if path.is_absolute() {
        return Ok(path);
    }

    let cwd = std::env::current_dir()
        .map_err(|err| format!("failed to get current directory: {}", err))?;

    Ok(cwd.join(path))
}

fn settings_file_changed(event: &Event, watched_path: &Path) -> bool {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return false;
    }

    event
        .paths
        .iter()
        .any(|path| path_matches_target(path, watched_path))
}

fn path_matches_target(path: &Path, target: &Path) -> bool {
    if path == target {
        return true;
    }

    match (path.canonicalize(), target.canonicalize()) {
        (Ok(path), Ok(target)) => path == target,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};

    #[test]
    fn missing_fields_take_defaults() {
        let config = AppConfig::from_yaml_str("monitor:\n  target_name: cam\n")
            .expect("parse");

        assert_eq!(config.monitor.target_name, "cam");
        assert_eq!(config.monitor.target_scale, 1);
        assert_eq!(config.monitor.intensity, 1);
        assert_eq!(config.monitor.colorspace(), Colorspace::Auto);
        assert!(!config.monitor.bypass_vectorscope);
        assert_eq!(config.video, VideoSettings::default());
        assert!(config.producers.is_empty());
    }

    #[test]
    fn normalized_clamps_ranges() {
        let settings = MonitorSettings {
            target_scale: 0,
            intensity: 1000,
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.target_scale, 1);
        assert_eq!(settings.intensity, 255);

        let settings = MonitorSettings {
            target_scale: 500,
            intensity: -3,
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.target_scale, 128);
        assert_eq!(settings.intensity, 1);
    }

    #[test]
    fn unknown_colorspace_setting_is_auto() {
        let settings = MonitorSettings {
            colorspace: 7,
            ..Default::default()
        };
        assert_eq!(settings.colorspace(), Colorspace::Auto);
    }

    #[test]
    fn yaml_merge_keys_are_applied() {
        let source = r#"
defaults: &defaults
  width: 640
  height: 360

video:
  colorspace: "601"
  fps: 30

producers:
  - name: Program
    kind: scene
    content:
      type: bars
      <<: *defaults
  - name: gray
    content:
      <<: *defaults
      type: solid
      color: [128, 128, 128, 255]

monitor:
  target_name: Program
  target_scale: 2
  intensity: 40
  colorspace: 1
"#;

        let config = AppConfig::from_yaml_str(source).expect("parse");

        assert_eq!(config.video.colorspace, Some(VideoColorspace::Cs601));
        assert_eq!(config.video.fps, 30.0);
        assert_eq!(config.producers.len(), 2);
        assert_eq!(config.producers[0].kind, ProducerKind::Scene);
        assert_eq!(
            config.producers[0].content,
            ProducerContent::Bars {
                width: 640,
                height: 360
            }
        );
        assert_eq!(config.producers[1].kind, ProducerKind::Source);
        assert_eq!(config.monitor.colorspace(), Colorspace::Bt601);
        assert_eq!(config.monitor.intensity, 40);
    }

    #[test]
    fn json_settings_parse() {
        let config = AppConfig::from_json_str(
            r#"{"video": {"colorspace": null}, "monitor": {"bypass_vectorscope": true}}"#,
        )
        .expect("parse");

        assert_eq!(config.video.video_colorspace(), None);
        assert!(config.monitor.bypass_vectorscope);
    }

    #[test]
    fn load_reports_path_on_error() {
        let err = AppConfig::load(Path::new("/nonexistent/monitor.yaml"))
            .expect_err("missing file must fail");
        assert!(err.contains("/nonexistent/monitor.yaml"));
    }

    #[test]
    fn shared_video_swaps_settings() {
        let video = SharedVideo::default();
        assert_eq!(video.video_colorspace(), Some(VideoColorspace::Cs709));

        video.set(VideoSettings {
            colorspace: Some(VideoColorspace::Cs601),
            fps: 25.0,
        });
        assert_eq!(video.video_colorspace(), Some(VideoColorspace::Cs601));
        assert_eq!(video.get().fps, 25.0);
    }

    #[test]
    fn watcher_ignores_other_files() {
        let target = Path::new("/tmp/vectorscope/monitor.yaml");

        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(target.to_path_buf());
        assert!(settings_file_changed(&event, target));

        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/tmp/vectorscope/other.yaml"));
        assert!(!settings_file_changed(&event, target));

        let event = Event::new(EventKind::Access(
            notify::event::AccessKind::Any,
        ))
        .add_path(target.to_path_buf());
        assert!(!settings_file_changed(&event, target));
    }
}
