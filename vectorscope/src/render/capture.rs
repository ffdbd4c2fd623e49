use std::sync::mpsc;

use log::{debug, info};

use crate::render::context::GpuContext;
use crate::source::producer::Producer;
use crate::warn_once;

pub const CAPTURE_FORMAT: wgpu::TextureFormat =
    wgpu::TextureFormat::Bgra8Unorm;

/// Straight copy: the destination is overwritten, never composited.
pub const CAPTURE_BLEND: wgpu::BlendState = wgpu::BlendState::REPLACE;

const BYTES_PER_PIXEL: u32 = 4;

/// What a [`Producer`] renders into during a capture.
pub struct CaptureTarget<'a> {
    pub view: &'a wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    /// Size of `view`, i.e. the downscaled capture size.
    pub size: [u32; 2],
    pub native_size: [u32; 2],
    /// Column-major orthographic projection spanning `native_size`.
    pub projection: [[f32; 4]; 4],
}

/// Mapped BGRA pixels. `stride` is the byte distance between rows and is
/// usually larger than `width * 4`.
pub struct CapturedFrame<'a> {
    pub data: &'a [u8],
    pub stride: usize,
    pub width: u32,
    pub height: u32,
}

struct CaptureSurfaces {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
}

/// Offscreen render target plus CPU-mappable staging buffer, reallocated
/// only when the capture size changes.
#[derive(Default)]
pub struct FrameCapture {
    surfaces: Option<CaptureSurfaces>,
}

impl FrameCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn readback_size(&self) -> Option<[u32; 2]> {
        self.surfaces.as_ref().map(|s| [s.width, s.height])
    }

    pub fn readback_stride(&self) -> Option<u32> {
        self.surfaces.as_ref().map(|s| s.padded_bytes_per_row)
    }

    /// Renders `producer` at `native / scale`, reads it back and hands the
    /// mapped pixels to `consume`. Returns the captured size, or `None` when
    /// the frame was skipped.
    pub fn capture<F>(
        &mut self,
        gpu: &GpuContext,
        producer: &dyn Producer,
        scale: u32,
        consume: F,
    ) -> Option<[u32; 2]>
    where
        F: FnOnce(&CapturedFrame<'_>),
    {
        let native_size = producer.size();
        let Some([width, height]) = scaled_size(native_size, scale) else {
            debug!(
                "skipping capture of '{}': {}x{} / {} is empty",
                producer.name(),
                native_size[0],
                native_size[1],
                scale
            );
            return None;
        };

        let surfaces = self.ensure_surfaces(gpu, width, height);

        let mut encoder = gpu.device().create_command_encoder(
            &wgpu::CommandEncoderDescriptor {
                label: Some("vectorscope-capture-encoder"),
            },
        );

        clear_target(&mut encoder, &surfaces.view);

        let target = CaptureTarget {
            view: &surfaces.view,
            format: CAPTURE_FORMAT,
            size: [width, height],
            native_size,
            projection: orthographic(
                0.0,
                native_size[0] as f32,
                0.0,
                native_size[1] as f32,
                -100.0,
                100.0,
            ),
        };

        producer.render(gpu, &target, &mut encoder);

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &surfaces.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &surfaces.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(surfaces.padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        let submission_index = gpu.queue().submit(Some(encoder.finish()));

        let slice = surfaces.readback.slice(..);
        let (map_tx, map_rx) = mpsc::sync_channel(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = map_tx.send(result);
        });

        let polled = gpu
            .device()
            .poll(wgpu::PollType::WaitForSubmissionIndex(submission_index));

        if !await_mapping(polled, &map_rx) {
            // Cancels a map that is still pending.
            surfaces.readback.unmap();
            return None;
        }

        {
            let data = slice.get_mapped_range();
            consume(&CapturedFrame {
                data: &data,
                stride: surfaces.padded_bytes_per_row as usize,
                width,
                height,
            });
        }

        surfaces.readback.unmap();

        Some([width, height])
    }

    fn ensure_surfaces(
        &mut self,
        gpu: &GpuContext,
        width: u32,
        height: u32,
    ) -> &CaptureSurfaces {
        let needs_new = self
            .surfaces
            .as_ref()
            .is_none_or(|s| s.width != width || s.height != height);

        if needs_new {
            // Release the old pair before allocating the new one.
            self.surfaces = None;
            info!("allocating capture surfaces at {}x{}", width, height);
        }

        self.surfaces.get_or_insert_with(|| {
            CaptureSurfaces::new(gpu.device(), width, height)
        })
    }
}

impl CaptureSurfaces {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("vectorscope-capture-texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CAPTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let view =
            texture.create_view(&wgpu::TextureViewDescriptor::default());

        let unpadded_bytes_per_row = width * BYTES_PER_PIXEL;
        let padded_bytes_per_row = unpadded_bytes_per_row
            + compute_row_padding(unpadded_bytes_per_row);

        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vectorscope-capture-readback"),
            size: (padded_bytes_per_row as u64) * (height as u64),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            texture,
            view,
            readback,
            width,
            height,
            padded_bytes_per_row,
        }
    }
}

type MapResult = Result<(), wgpu::BufferAsyncError>;

/// Whether the readback buffer ended up mapped. The map callback only runs
/// inside a successful poll, so a failed poll must not wait on `map_rx`.
fn await_mapping(
    polled: Result<wgpu::PollStatus, wgpu::PollError>,
    map_rx: &mpsc::Receiver<MapResult>,
) -> bool {
    if let Err(err) = polled {
        warn_once!("capture readback poll failed: {:?}", err);
        return false;
    }

    match map_rx.recv() {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn_once!("capture readback mapping failed: {:?}", err);
            false
        }
        Err(_) => {
            warn_once!("capture readback map channel disconnected");
            false
        }
    }
}

fn clear_target(
    encoder: &mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
) {
    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("vectorscope-capture-clear"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            depth_slice: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

/// `native / scale` per axis, or `None` if either side rounds down to zero.
pub fn scaled_size(native: [u32; 2], scale: u32) -> Option<[u32; 2]> {
    let scale = scale.max(1);
    let width = native[0] / scale;
    let height = native[1] / scale;

    (width > 0 && height > 0).then_some([width, height])
}

/// Column-major orthographic projection with `top` mapped to clip y = 1 and
/// depth mapped to `[0, 1]`.
pub fn orthographic(
    left: f32,
    right: f32,
    top: f32,
    bottom: f32,
    near: f32,
    far: f32,
) -> [[f32; 4]; 4] {
    let width = right - left;
    let height = top - bottom;
    let depth = far - near;

    [
        [2.0 / width, 0.0, 0.0, 0.0],
        [0.0, 2.0 / height, 0.0, 0.0],
        [0.0, 0.0, 1.0 / depth, 0.0],
        [
            -(right + left) / width,
            -(top + bottom) / height,
            -near / depth,
            1.0,
        ],
    ]
}

fn compute_row_padding(unpadded_bytes_per_row: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let rem = unpadded_bytes_per_row % align;
    if rem == 0 { 0 } else { align - rem }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(m: &[[f32; 4]; 4], x: f32, y: f32) -> [f32; 3] {
        let out = |row: usize| {
            m[0][row] * x + m[1][row] * y + m[2][row] * 0.0 + m[3][row]
        };
        [out(0), out(1), out(2)]
    }

    #[test]
    fn scaled_size_divides_and_rejects_empty() {
        assert_eq!(scaled_size([1920, 1080], 1), Some([1920, 1080]));
        assert_eq!(scaled_size([1920, 1080], 4), Some([480, 270]));
        assert_eq!(scaled_size([255, 255], 2), Some([127, 127]));
        assert_eq!(scaled_size([100, 1], 2), None);
        assert_eq!(scaled_size([0, 0], 1), None);
        assert_eq!(scaled_size([64, 64], 0), Some([64, 64]));
    }

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(compute_row_padding(256), 0);
        assert_eq!(compute_row_padding(512), 0);
        assert_eq!(compute_row_padding(4 * 127), 4);
        assert_eq!(compute_row_padding(4 * 3), 244);
    }

    fn assert_close(actual: [f32; 3], expected: [f32; 3]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn failed_poll_skips_without_waiting_for_the_map() {
        // The sender stays alive, so a blocking recv would hang here.
        let (_map_tx, map_rx) = mpsc::sync_channel::<MapResult>(1);
        assert!(!await_mapping(Err(wgpu::PollError::Timeout), &map_rx));
    }

    #[test]
    fn mapping_result_decides_the_capture() {
        let (map_tx, map_rx) = mpsc::sync_channel::<MapResult>(1);
        map_tx.send(Ok(())).expect("send");
        assert!(await_mapping(Ok(wgpu::PollStatus::QueueEmpty), &map_rx));

        map_tx.send(Err(wgpu::BufferAsyncError)).expect("send");
        assert!(!await_mapping(Ok(wgpu::PollStatus::QueueEmpty), &map_rx));

        drop(map_tx);
        assert!(!await_mapping(Ok(wgpu::PollStatus::QueueEmpty), &map_rx));
    }

    #[test]
    fn orthographic_spans_native_size() {
        let m = orthographic(0.0, 1920.0, 0.0, 1080.0, -100.0, 100.0);

        assert_close(project(&m, 0.0, 0.0), [-1.0, 1.0, 0.5]);
        assert_close(project(&m, 1920.0, 1080.0), [1.0, -1.0, 0.5]);
        assert_close(project(&m, 960.0, 540.0), [0.0, 0.0, 0.5]);
    }
}
