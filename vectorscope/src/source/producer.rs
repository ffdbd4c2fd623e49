use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::render::capture::CaptureTarget;
use crate::render::context::GpuContext;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerKind {
    Scene,
    Source,
}

/// Something in the compositor that renders a frame on request.
///
/// Producers draw into [`CaptureTarget::view`] using
/// [`CaptureTarget::projection`], which spans the producer's native size even
/// when the target texture is smaller. Pipelines should use
/// [`crate::render::capture::CAPTURE_BLEND`] so the captured alpha is the
/// producer's own.
pub trait Producer: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProducerKind {
        ProducerKind::Source
    }

    fn has_video(&self) -> bool {
        true
    }

    /// Native `[width, height]`.
    fn size(&self) -> [u32; 2];

    fn render(
        &self,
        gpu: &GpuContext,
        target: &CaptureTarget<'_>,
        encoder: &mut wgpu::CommandEncoder,
    );
}

/// Every producer the host knows about, by unique name.
///
/// The registry owns the only long-lived strong references; monitors hold
/// `Weak` handles, so [`ProducerRegistry::remove`] is how a producer goes
/// away underneath them.
#[derive(Default)]
pub struct ProducerRegistry {
    producers: RwLock<IndexMap<String, Arc<dyn Producer>>>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, producer: Arc<dyn Producer>) -> Result<(), String> {
        let name = producer.name().to_string();
        if name.is_empty() {
            return Err("producer name must not be empty".to_string());
        }

        let mut producers = self.producers.write();
        if producers.contains_key(&name) {
            return Err(format!("duplicate producer registration: {}", name));
        }

        producers.insert(name, producer);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn Producer>> {
        self.producers.write().shift_remove(name)
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Producer>> {
        self.producers.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.producers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.read().is_empty()
    }

    /// Names offered as monitor targets: scenes first, then sources, skipping
    /// producers without video output.
    pub fn video_producer_names(&self) -> Vec<String> {
        let producers = self.producers.read();

        [ProducerKind::Scene, ProducerKind::Source]
            .into_iter()
            .flat_map(|kind| {
                producers
                    .values()
                    .filter(move |p| p.kind() == kind && p.has_video())
                    .map(|p| p.name().to_string())
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct StubProducer {
        pub name: String,
        pub kind: ProducerKind,
        pub video: bool,
        pub size: [u32; 2],
    }

    impl StubProducer {
        pub(crate) fn source(name: &str) -> Arc<dyn Producer> {
            Arc::new(Self {
                name: name.to_string(),
                kind: ProducerKind::Source,
                video: true,
                size: [64, 64],
            })
        }
    }

    impl Producer for StubProducer {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ProducerKind {
            self.kind
        }

        fn has_video(&self) -> bool {
            self.video
        }

        fn size(&self) -> [u32; 2] {
            self.size
        }

        fn render(
            &self,
            _gpu: &GpuContext,
            _target: &CaptureTarget<'_>,
            _encoder: &mut wgpu::CommandEncoder,
        ) {
        }
    }

    #[test]
    fn registry_adds_and_finds_by_name() {
        let registry = ProducerRegistry::new();
        registry.add(StubProducer::source("cam")).expect("add cam");

        assert_eq!(registry.len(), 1);
        assert!(registry.get_by_name("cam").is_some());
        assert!(registry.get_by_name("Cam").is_none());
    }

    #[test]
    fn registry_rejects_duplicates() {
        let registry = ProducerRegistry::new();
        registry.add(StubProducer::source("cam")).expect("first add");

        let err = registry
            .add(StubProducer::source("cam"))
            .expect_err("duplicate producer must fail");

        assert!(err.contains("duplicate producer"));
    }

    #[test]
    fn video_names_list_scenes_before_sources() {
        let registry = ProducerRegistry::new();
        registry.add(StubProducer::source("cam")).expect("add cam");
        registry
            .add(Arc::new(StubProducer {
                name: "mic".to_string(),
                kind: ProducerKind::Source,
                video: false,
                size: [0, 0],
            }))
            .expect("add mic");
        registry
            .add(Arc::new(StubProducer {
                name: "Program".to_string(),
                kind: ProducerKind::Scene,
                video: true,
                size: [1920, 1080],
            }))
            .expect("add scene");

        assert_eq!(registry.video_producer_names(), vec!["Program", "cam"]);
    }

    #[test]
    fn remove_drops_registry_reference() {
        let registry = ProducerRegistry::new();
        registry.add(StubProducer::source("cam")).expect("add cam");

        let weak = Arc::downgrade(
            &registry.get_by_name("cam").expect("cam registered"),
        );
        assert!(weak.upgrade().is_some());

        drop(registry.remove("cam"));
        assert!(weak.upgrade().is_none());
        assert!(registry.is_empty());
    }
}
