use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use naga::front::wgsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::histogram::{Histogram, SCOPE_SIZE};
use crate::render::capture::CapturedFrame;
use crate::render::context::GpuContext;

const SCOPE_SHADER: &str = include_str!("shaders/vectorscope.wgsl");
const DEFAULT_SHADER: &str = include_str!("shaders/default.wgsl");

static SHARED_EFFECT: Mutex<Option<SharedEffect>> = Mutex::new(None);

struct SharedEffect {
    device: Arc<wgpu::Device>,
    effect: Arc<ScopeEffect>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum EffectSource {
    #[default]
    Embedded,
    File(PathBuf),
}

/// `gain.x` is the intensity. `gain.y` is 1 when the target encodes to
/// sRGB on write, in which case the scope shader linearizes its level so the
/// stored byte matches a `Bgra8Unorm` target.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct DisplayParams {
    gain: [f32; 4],
}

impl DisplayParams {
    fn new(intensity: u32, format: wgpu::TextureFormat) -> Self {
        let linearize = if format.is_srgb() { 1.0 } else { 0.0 };
        Self {
            gain: [intensity.max(1) as f32, linearize, 0.0, 0.0],
        }
    }
}

/// Pipelines used to put a display texture on screen.
///
/// `scope_pipeline` applies the intensity gain. When its shader fails to
/// load, histograms are drawn with `default_pipeline` at flat contrast.
pub struct ScopeEffect {
    format: wgpu::TextureFormat,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    scope_pipeline: Option<wgpu::RenderPipeline>,
    default_pipeline: wgpu::RenderPipeline,
}

impl ScopeEffect {
    pub fn load(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        source: &EffectSource,
    ) -> Self {
        let layout = create_display_bind_group_layout(device);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("vectorscope-display-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let default_pipeline = create_display_pipeline(
            device,
            format,
            &layout,
            DEFAULT_SHADER,
            "vectorscope-default-pipeline",
        );

        let scope_pipeline = match load_effect_source(source) {
            Ok(shader) => Some(create_display_pipeline(
                device,
                format,
                &layout,
                &shader,
                "vectorscope-scope-pipeline",
            )),
            Err(err) => {
                error!("Cannot load scope effect: {}", err);
                None
            }
        };

        Self {
            format,
            layout,
            sampler,
            scope_pipeline,
            default_pipeline,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn has_scope_pipeline(&self) -> bool {
        self.scope_pipeline.is_some()
    }
}

/// Effect shared by every monitor drawing to `format` on `gpu`'s device.
/// Created on first use; later calls reuse it and ignore `source`.
pub fn shared_effect(
    gpu: &GpuContext,
    format: wgpu::TextureFormat,
    source: &EffectSource,
) -> Arc<ScopeEffect> {
    let mut shared = SHARED_EFFECT.lock();

    if let Some(current) = shared.as_ref() {
        if Arc::ptr_eq(&current.device, &gpu.device)
            && current.effect.format() == format
        {
            return current.effect.clone();
        }
    }

    info!("loading scope effect for {:?}", format);
    let effect = Arc::new(ScopeEffect::load(gpu.device(), format, source));

    *shared = Some(SharedEffect {
        device: gpu.device.clone(),
        effect: effect.clone(),
    });

    effect
}

/// Drops the process-wide effect. Monitors still holding it keep their
/// copy alive until they are dropped.
pub fn release_shared_effect() {
    SHARED_EFFECT.lock().take();
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DisplayKind {
    Histogram,
    Frame,
}

struct DisplayTexture {
    kind: DisplayKind,
    bind_group: wgpu::BindGroup,
    _texture: wgpu::Texture,
}

/// The per-monitor display texture and the draw call that shows it.
pub struct ScopeDisplay {
    effect: Arc<ScopeEffect>,
    params: wgpu::Buffer,
    texture: Option<DisplayTexture>,
}

impl ScopeDisplay {
    pub fn new(gpu: &GpuContext, effect: Arc<ScopeEffect>) -> Self {
        let params = gpu.device().create_buffer_init(
            &wgpu::util::BufferInitDescriptor {
                label: Some("vectorscope-display-params"),
                contents: bytemuck::bytes_of(&DisplayParams::new(
                    1,
                    effect.format(),
                )),
                usage: wgpu::BufferUsages::UNIFORM
                    | wgpu::BufferUsages::COPY_DST,
            },
        );

        Self {
            effect,
            params,
            texture: None,
        }
    }

    pub fn effect(&self) -> &ScopeEffect {
        &self.effect
    }

    pub fn has_texture(&self) -> bool {
        self.texture.is_some()
    }

    pub fn texture_kind(&self) -> Option<DisplayKind> {
        self.texture.as_ref().map(|t| t.kind)
    }

    pub fn set_histogram(&mut self, gpu: &GpuContext, histogram: &Histogram) {
        self.replace_texture(
            gpu,
            DisplayKind::Histogram,
            wgpu::TextureFormat::R8Unorm,
            [SCOPE_SIZE, SCOPE_SIZE],
            histogram.cells(),
            SCOPE_SIZE,
        );
    }

    /// Captured bytes are uploaded as-is. On an sRGB target the texture is
    /// sRGB too, so decode on sample and encode on write cancel out.
    pub fn set_frame(&mut self, gpu: &GpuContext, frame: &CapturedFrame<'_>) {
        let format = if self.effect.format().is_srgb() {
            wgpu::TextureFormat::Bgra8UnormSrgb
        } else {
            wgpu::TextureFormat::Bgra8Unorm
        };

        self.replace_texture(
            gpu,
            DisplayKind::Frame,
            format,
            [frame.width, frame.height],
            frame.data,
            frame.stride as u32,
        );
    }

    /// Draws the current texture into the top-left of the pass target.
    /// Bypass draws at `frame_size` with the default effect; otherwise the
    /// texture is drawn at 256x256 with `intensity` as the gain.
    pub fn draw(
        &self,
        gpu: &GpuContext,
        pass: &mut wgpu::RenderPass<'_>,
        target_size: [u32; 2],
        bypass: bool,
        intensity: u32,
        frame_size: [u32; 2],
    ) {
        let Some(texture) = self.texture.as_ref() else {
            return;
        };

        let (pipeline, size) = if bypass {
            (&self.effect.default_pipeline, frame_size)
        } else {
            let pipeline = self
                .effect
                .scope_pipeline
                .as_ref()
                .unwrap_or(&self.effect.default_pipeline);
            (pipeline, [SCOPE_SIZE, SCOPE_SIZE])
        };

        let width = size[0].min(target_size[0]);
        let height = size[1].min(target_size[1]);
        if width == 0 || height == 0 {
            return;
        }

        gpu.queue().write_buffer(
            &self.params,
            0,
            bytemuck::bytes_of(&DisplayParams::new(
                intensity,
                self.effect.format(),
            )),
        );

        pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &texture.bind_group, &[]);
        pass.draw(0..4, 0..1);
    }

    fn replace_texture(
        &mut self,
        gpu: &GpuContext,
        kind: DisplayKind,
        format: wgpu::TextureFormat,
        size: [u32; 2],
        data: &[u8],
        bytes_per_row: u32,
    ) {
        // The previous texture is released first.
        self.texture = None;

        let extent = wgpu::Extent3d {
            width: size[0],
            height: size[1],
            depth_or_array_layers: 1,
        };

        let texture = gpu.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("vectorscope-display-texture"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        gpu.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(size[1]),
            },
            extent,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group =
            gpu.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("vectorscope-display-bind-group"),
                layout: &self.effect.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(
                            &self.effect.sampler,
                        ),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                ],
            });

        self.texture = Some(DisplayTexture {
            kind,
            bind_group,
            _texture: texture,
        });
    }
}

fn load_effect_source(source: &EffectSource) -> Result<String, String> {
    let shader = match source {
        EffectSource::Embedded => SCOPE_SHADER.to_string(),
        EffectSource::File(path) => {
            fs::read_to_string(path).map_err(|err| {
                format!("failed to read '{}': {}", path.display(), err)
            })?
        }
    };

    validate_shader(&shader)
        .map_err(|err| format!("shader validation failed: {}", err))?;

    Ok(shader)
}

pub fn validate_shader(source: &str) -> Result<(), String> {
    let module = wgsl::parse_str(source).map_err(|err| err.to_string())?;

    let mut validator =
        Validator::new(ValidationFlags::all(), Capabilities::all());

    validator
        .validate(&module)
        .map_err(|err| err.to_string())
        .map(|_| ())
}

fn create_display_bind_group_layout(
    device: &wgpu::Device,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("vectorscope-display-layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<DisplayParams>() as u64,
                    ),
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(
                    wgpu::SamplerBindingType::Filtering,
                ),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float {
                        filterable: true,
                    },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
        ],
    })
}

fn create_display_pipeline(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    layout: &wgpu::BindGroupLayout,
    source: &str,
    label: &str,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let pipeline_layout =
        device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("vectorscope-display-pipeline-layout"),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}
