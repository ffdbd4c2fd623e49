use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use wgpu::util::DeviceExt;

use crate::render::capture::{CAPTURE_BLEND, CAPTURE_FORMAT, CaptureTarget};
use crate::render::context::GpuContext;
use crate::source::producer::{Producer, ProducerKind};

const SHADER: &str = include_str!("../render/shaders/image_producer.wgsl");

/// 75% bars: white, yellow, cyan, green, magenta, red, blue.
const BARS: [[u8; 3]; 7] = [
    [191, 191, 191],
    [191, 191, 0],
    [0, 191, 191],
    [0, 191, 0],
    [191, 0, 191],
    [191, 0, 0],
    [0, 0, 191],
];

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ImageParams {
    projection: [[f32; 4]; 4],
    size: [f32; 4],
}

/// A producer that renders a fixed RGBA image at its native size.
pub struct ImageProducer {
    name: String,
    kind: ProducerKind,
    size: [u32; 2],
    pipeline: wgpu::RenderPipeline,
    params: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    _texture: wgpu::Texture,
}

impl ImageProducer {
    pub fn from_rgba(
        gpu: &GpuContext,
        name: impl Into<String>,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<Self, String> {
        let name = name.into();

        if width == 0 || height == 0 {
            return Err(format!("image producer '{}' has zero size", name));
        }

        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(format!(
                "image producer '{}' expected {} bytes for {}x{}, got {}",
                name,
                expected,
                width,
                height,
                rgba.len()
            ));
        }

        let device = gpu.device();

        let texture = device.create_texture_with_data(
            gpu.queue(),
            &wgpu::TextureDescriptor {
                label: Some(&name),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            rgba,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("vectorscope-image-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let params =
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("vectorscope-image-params"),
                contents: bytemuck::bytes_of(&ImageParams {
                    projection: [[0.0; 4]; 4],
                    size: [width as f32, height as f32, 0.0, 0.0],
                }),
                usage: wgpu::BufferUsages::UNIFORM
                    | wgpu::BufferUsages::COPY_DST,
            });

        let layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("vectorscope-image-layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
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
            });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("vectorscope-image-bind-group"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
            ],
        });

        let pipeline = create_image_pipeline(device, &layout);

        Ok(Self {
            name,
            kind: ProducerKind::Source,
            size: [width, height],
            pipeline,
            params,
            bind_group,
            _texture: texture,
        })
    }

    pub fn solid(
        gpu: &GpuContext,
        name: impl Into<String>,
        width: u32,
        height: u32,
        rgba: [u8; 4],
    ) -> Result<Self, String> {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect::<Vec<_>>();

        Self::from_rgba(gpu, name, width, height, &pixels)
    }

    pub fn color_bars(
        gpu: &GpuContext,
        name: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Result<Self, String> {
        Self::from_rgba(
            gpu,
            name,
            width,
            height,
            &color_bars_rgba(width, height),
        )
    }

    pub fn from_png(
        gpu: &GpuContext,
        name: impl Into<String>,
        path: &Path,
    ) -> Result<Self, String> {
        let (width, height, rgba) = decode_png(path)?;
        Self::from_rgba(gpu, name, width, height, &rgba)
    }

    pub fn with_kind(mut self, kind: ProducerKind) -> Self {
        self.kind = kind;
        self
    }
}

impl Producer for ImageProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProducerKind {
        self.kind
    }

    fn size(&self) -> [u32; 2] {
        self.size
    }

    fn render(
        &self,
        gpu: &GpuContext,
        target: &CaptureTarget<'_>,
        encoder: &mut wgpu::CommandEncoder,
    ) {
        gpu.queue().write_buffer(
            &self.params,
            0,
            bytemuck::bytes_of(&ImageParams {
                projection: target.projection,
                size: [self.size[0] as f32, self.size[1] as f32, 0.0, 0.0],
            }),
        );

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&self.name),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.view,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.draw(0..4, 0..1);
    }
}

fn create_image_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("vectorscope-image-shader"),
        source: wgpu::ShaderSource::Wgsl(SHADER.into()),
    });

    let pipeline_layout =
        device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("vectorscope-image-pipeline-layout"),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("vectorscope-image-pipeline"),
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
                format: CAPTURE_FORMAT,
                blend: Some(CAPTURE_BLEND),
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

pub fn color_bars_rgba(width: u32, height: u32) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);

    for _ in 0..height {
        for x in 0..width {
            let bar = (x as usize * BARS.len()) / width.max(1) as usize;
            let [r, g, b] = BARS[bar.min(BARS.len() - 1)];
            rgba.extend_from_slice(&[r, g, b, 255]);
        }
    }

    rgba
}

/// Decodes any 8/16-bit PNG into tightly packed RGBA8.
pub fn decode_png(path: &Path) -> Result<(u32, u32, Vec<u8>), String> {
    let file = File::open(path).map_err(|err| {
        format!("failed to open image '{}': {}", path.display(), err)
    })?;

    let mut decoder = png::Decoder::new(BufReader::new(file));
    decoder.set_transformations(png::Transformations::normalize_to_color8());

    let mut reader = decoder.read_info().map_err(|err| {
        format!("failed to read image '{}': {}", path.display(), err)
    })?;

    let (color_type, _) = reader.output_color_type();
    let (width, height) = (reader.info().width, reader.info().height);
    let samples = color_type.samples();

    let mut buf = vec![0u8; width as usize * height as usize * samples];
    reader.next_frame(&mut buf).map_err(|err| {
        format!("failed to decode image '{}': {}", path.display(), err)
    })?;

    let rgba = match color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => buf
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 255])
            .collect(),
        png::ColorType::Grayscale => {
            buf.iter().flat_map(|&l| [l, l, l, 255]).collect()
        }
        png::ColorType::GrayscaleAlpha => buf
            .chunks_exact(2)
            .flat_map(|px| [px[0], px[0], px[0], px[1]])
            .collect(),
        png::ColorType::Indexed => {
            return Err(format!(
                "image '{}' is still indexed after expansion",
                path.display()
            ));
        }
    };

    Ok((width, height, rgba))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_bars_cover_width_in_order() {
        let rgba = color_bars_rgba(14, 2);
        assert_eq!(rgba.len(), 14 * 2 * 4);

        let px = |x: usize| &rgba[x * 4..x * 4 + 4];
        assert_eq!(px(0), &[191, 191, 191, 255]);
        assert_eq!(px(2), &[191, 191, 0, 255]);
        assert_eq!(px(13), &[0, 0, 191, 255]);
        // Second row repeats the first.
        assert_eq!(&rgba[..14 * 4], &rgba[14 * 4..]);
    }

    #[test]
    fn color_bars_handle_narrow_images() {
        let rgba = color_bars_rgba(3, 1);
        assert_eq!(rgba.len(), 12);
        assert_eq!(&rgba[0..4], &[191, 191, 191, 255]);
    }

    #[test]
    fn missing_png_reports_path() {
        let err = decode_png(Path::new("/nonexistent/bars.png"))
            .expect_err("missing file must fail");
        assert!(err.contains("/nonexistent/bars.png"));
    }
}
