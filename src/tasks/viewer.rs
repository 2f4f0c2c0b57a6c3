pub mod renderer;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use renderer::{LinkInstance, Renderer, SurfaceInstance};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wgpu::SurfaceError;
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalSize},
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

use crate::config::Configuration;
use crate::effect::{EffectContext, RenderTask};
use crate::events::ImageLoaded;
use crate::layout::{Layout, Viewport};

#[derive(Debug)]
enum ViewerEvent {
    Cancelled,
}

type LoadedReceiver = mpsc::Receiver<ImageLoaded>;

struct Gpu {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    device: wgpu::Device,
    queue: wgpu::Queue,
    renderer: Renderer,
}

struct ViewerApp {
    cfg: Arc<Configuration>,
    cancel: CancellationToken,
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    effect: EffectContext,
    render_task: RenderTask,
    from_loader: LoadedReceiver,
    loader_open: bool,
    // Images that arrived before the GPU was ready.
    pending_uploads: Vec<ImageLoaded>,
}

impl ViewerApp {
    fn new(
        cfg: Arc<Configuration>,
        layout: Box<dyn Layout>,
        cancel: CancellationToken,
        from_loader: LoadedReceiver,
    ) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let viewport = Viewport::new(cfg.window.width as f32, cfg.window.height as f32);
        let effect = EffectContext::new(&cfg, layout, viewport);
        let render_task = RenderTask::new(cfg.render.time_step, cancel.clone());
        Self {
            cfg,
            cancel,
            window: None,
            gpu: None,
            effect,
            render_task,
            from_loader,
            loader_open: true,
            pending_uploads: Vec::new(),
        }
    }

    fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Option<Arc<Window>> {
        if let Some(window) = self.window.as_ref() {
            return Some(window.clone());
        }

        let attrs = WindowAttributes::default()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(LogicalSize::new(self.cfg.window.width, self.cfg.window.height))
            .with_transparent(self.cfg.window.transparent);
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let window = Arc::new(window);
                self.window = Some(window.clone());
                Some(window)
            }
            Err(err) => {
                error!(error = %err, "failed to create viewer window");
                None
            }
        }
    }

    fn init_gpu(&mut self, window: Arc<Window>) -> Result<()> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to acquire GPU adapter")?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|fmt| fmt.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("surface reports no supported formats")?;
        let alpha_mode = if self.cfg.window.transparent {
            caps.alpha_modes
                .iter()
                .copied()
                .find(|mode| {
                    matches!(
                        mode,
                        wgpu::CompositeAlphaMode::PreMultiplied
                            | wgpu::CompositeAlphaMode::PostMultiplied
                    )
                })
                .unwrap_or(wgpu::CompositeAlphaMode::Auto)
        } else {
            caps.alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto)
        };

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("viewer-device"),
            required_limits: adapter.limits(),
            ..Default::default()
        }))
        .context("failed to acquire GPU device")?;

        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        info!(
            width = config.width,
            height = config.height,
            format = ?config.format,
            "viewer surface configured",
        );

        let mut renderer = Renderer::new(
            &device,
            &queue,
            format,
            self.effect.surfaces().len(),
            self.effect.link_count(),
            self.cfg.window.clear_color,
        );
        for image in self.pending_uploads.drain(..) {
            upload_image(&mut renderer, &device, &queue, &mut self.effect, &image);
        }

        self.gpu = Some(Gpu {
            surface,
            config,
            device,
            queue,
            renderer,
        });
        Ok(())
    }

    /// Viewport resize handler: runs the full recomputation on every event.
    fn handle_resize(&mut self, new_size: PhysicalSize<u32>) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.config.width = new_size.width.max(1);
            gpu.config.height = new_size.height.max(1);
            gpu.surface.configure(&gpu.device, &gpu.config);
        }
        let viewport = Viewport::from_physical(new_size, window.scale_factor());
        self.effect.resize(viewport);
        debug!(
            width = new_size.width,
            height = new_size.height,
            fov = self.effect.camera().fov_degrees(),
            "viewer surface resized",
        );
    }

    fn drain_loader(&mut self) {
        while self.loader_open {
            match self.from_loader.try_recv() {
                Ok(image) => match self.gpu.as_mut() {
                    Some(gpu) => upload_image(
                        &mut gpu.renderer,
                        &gpu.device,
                        &gpu.queue,
                        &mut self.effect,
                        &image,
                    ),
                    None => self.pending_uploads.push(image),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("loader channel closed");
                    self.loader_open = false;
                }
            }
        }
    }

    fn draw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(inputs) = self.render_task.tick(&mut self.effect, Instant::now()) else {
            info!("render task cancelled; exiting event loop");
            event_loop.exit();
            return;
        };
        let Some(window) = self.window.clone() else {
            return;
        };
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };

        let surfaces: Vec<SurfaceInstance> = self
            .effect
            .surfaces()
            .instances()
            .into_iter()
            .map(|rect| SurfaceInstance { rect })
            .collect();
        let links: Vec<LinkInstance> = self
            .effect
            .link_instances()
            .into_iter()
            .map(|(rect, color)| LinkInstance { rect, color })
            .collect();
        gpu.renderer.write_frame(&gpu.queue, &inputs);
        gpu.renderer.write_instances(&gpu.queue, &surfaces, &links);

        let frame = match gpu.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(SurfaceError::Outdated) | Err(SurfaceError::Lost) => {
                info!("viewer surface lost; reconfiguring");
                self.handle_resize(window.inner_size());
                window.request_redraw();
                return;
            }
            Err(SurfaceError::OutOfMemory) => {
                error!("viewer surface out of memory; exiting event loop");
                event_loop.exit();
                return;
            }
            Err(SurfaceError::Timeout) => {
                warn!("viewer surface acquisition timed out");
                window.request_redraw();
                return;
            }
            Err(SurfaceError::Other) => {
                warn!("viewer surface reported an unknown error; retrying");
                self.handle_resize(window.inner_size());
                window.request_redraw();
                return;
            }
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("viewer-encoder"),
            });
        gpu.renderer.draw(&mut encoder, &view);
        gpu.queue.submit(std::iter::once(encoder.finish()));
        window.pre_present_notify();
        frame.present();

        // Next tick.
        window.request_redraw();
    }

    fn release(&mut self) {
        if let Some(gpu) = self.gpu.take() {
            gpu.renderer.release();
        }
        self.effect.release();
        self.pending_uploads.clear();
    }
}

fn upload_image(
    renderer: &mut Renderer,
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    effect: &mut EffectContext,
    image: &ImageLoaded,
) {
    match renderer.upload(device, queue, image) {
        Ok(()) => effect.surfaces_mut().mark_loaded(image.slot),
        Err(err) => warn!(
            slot = image.slot,
            error = ?err,
            "texture upload failed; slot keeps placeholder"
        ),
    }
}

impl ApplicationHandler<ViewerEvent> for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.cancel.is_cancelled() {
            event_loop.exit();
            return;
        }

        let Some(window) = self.ensure_window(event_loop) else {
            event_loop.exit();
            return;
        };

        if self.gpu.is_none() {
            if let Err(err) = self.init_gpu(window.clone()) {
                error!(error = ?err, "failed to initialize GPU state");
                event_loop.exit();
                return;
            }
            let size = window.inner_size();
            self.handle_resize(size);
        }

        window.request_redraw();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("viewer window close requested");
                self.render_task.cancel();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Released
                    && matches!(
                        event.physical_key,
                        PhysicalKey::Code(KeyCode::Escape | KeyCode::KeyQ)
                    )
                {
                    info!("quit key pressed");
                    self.render_task.cancel();
                    event_loop.exit();
                }
            }
            WindowEvent::Resized(new_size) => {
                self.handle_resize(new_size);
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                let size = window.inner_size();
                self.handle_resize(size);
            }
            WindowEvent::CursorMoved { position, .. } => {
                let logical = position.to_logical::<f64>(window.scale_factor());
                #[allow(clippy::cast_possible_truncation)]
                let (x, y) = (logical.x as f32, logical.y as f32);
                if let Some(link) = self.effect.pointer_moved(x, y, Instant::now()) {
                    debug!(link, "hover transition scheduled");
                }
            }
            WindowEvent::CursorLeft { .. } => {
                self.effect.pointer_left();
            }
            WindowEvent::RedrawRequested => {
                self.draw(event_loop);
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        self.drain_loader();
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            ViewerEvent::Cancelled => {
                info!("viewer received cancellation event");
                event_loop.exit();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        info!(frames = self.render_task.frames(), "viewer exiting; releasing resources");
        self.release();
    }
}

/// Runs the windowed effect on the calling thread until the window closes or `cancel` fires.
pub fn run_windowed(
    cfg: Arc<Configuration>,
    layout: Box<dyn Layout>,
    from_loader: LoadedReceiver,
    cancel: CancellationToken,
) -> Result<()> {
    let event_loop = EventLoop::<ViewerEvent>::with_user_event()
        .build()
        .context("failed to build viewer event loop")?;
    let proxy = event_loop.create_proxy();

    let cancel_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = proxy.send_event(ViewerEvent::Cancelled);
        })
    };

    let mut app = ViewerApp::new(cfg, layout, cancel, from_loader);
    let run_result = event_loop.run_app(&mut app);
    cancel_task.abort();

    run_result.context("viewer event loop failed")
}
