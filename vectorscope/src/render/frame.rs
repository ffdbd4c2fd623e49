/// One presented window frame: the acquired surface texture plus the
/// encoder that draws into it.
pub struct Frame {
    pub view: wgpu::TextureView,
    pub size: [u32; 2],
    encoder: wgpu::CommandEncoder,
    output: wgpu::SurfaceTexture,
}

impl Frame {
    pub fn new(device: &wgpu::Device, output: wgpu::SurfaceTexture) -> Self {
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let size = [output.texture.width(), output.texture.height()];

        let encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("vectorscope-frame-encoder"),
            });

        Self {
            view,
            size,
            encoder,
            output,
        }
    }

    /// Pass over the whole frame, cleared to `background`.
    pub fn begin_pass(
        &mut self,
        background: wgpu::Color,
    ) -> wgpu::RenderPass<'_> {
        self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("vectorscope-frame-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.view,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(background),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }

    pub fn submit(self, queue: &wgpu::Queue) {
        queue.submit(Some(self.encoder.finish()));
        self.output.present();
    }
}
