use crate::camera::{Camera, CameraPreset};
use crate::config::RenderConfig;
use crate::error::{Result, SplatError};
use crate::gpu::{GpuContext, RenderTarget, ShaderCache, SplatRasterizer};
use crate::scene::PackedScene;
use glam::Vec3;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use wgpu::{
    CompositeAlphaMode, PresentMode, Surface, SurfaceConfiguration, SurfaceError, TextureUsages,
    TextureViewDescriptor,
};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop, EventLoopProxy};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

/// Shared flag asking the frame loop to tear its scene down at the next frame boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of the live per-scene state `R`.
pub struct FrameLoop<R> {
    live: Option<R>,
    cancel: CancelToken,
}

impl<R> Default for FrameLoop<R> {
    fn default() -> Self {
        Self {
            live: None,
            cancel: CancelToken::new(),
        }
    }
}

impl<R> FrameLoop<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.live.is_some()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn install(&mut self, next: R) -> Option<R> {
        self.cancel.reset();
        self.live.replace(next)
    }

    pub fn request_destroy(&self) -> Result<()> {
        if self.live.is_none() {
            return Err(SplatError::DestroyWithoutFrameLoop);
        }
        self.cancel.cancel();
        Ok(())
    }

    /// Drop the live scene if a destroy was requested. Returns whether one was dropped.
    pub fn observe_cancel(&mut self) -> bool {
        if !self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.reset();
        self.live.take().is_some()
    }

    pub fn current(&mut self) -> Option<&mut R> {
        self.live.as_mut()
    }
}

pub struct LoadOutcome {
    pub path: PathBuf,
    pub scene: Result<PackedScene>,
}

/// Decode `path` on a worker thread, deliver it on `tx` and then call `notify`.
pub fn spawn_loader(
    path: PathBuf,
    tx: flume::Sender<LoadOutcome>,
    notify: impl FnOnce() + Send + 'static,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let scene = PackedScene::load(&path);
        // The receiver only goes away when the viewer is shutting down.
        if tx.send(LoadOutcome { path, scene }).is_ok() {
            notify();
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerEvent {
    SceneReady,
}

pub struct ViewerOptions {
    pub scene: Option<PathBuf>,
    pub presets: Vec<CameraPreset>,
    pub config: RenderConfig,
}

struct Gpu {
    ctx: GpuContext,
    surface: Surface<'static>,
    surface_config: SurfaceConfiguration,
    cache: ShaderCache,
}

impl Gpu {
    fn new(window: Arc<Window>) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(|e| SplatError::SurfaceUnavailable(e.to_string()))?;
        let ctx = GpuContext::for_surface(&instance, &surface)?;

        let caps = surface.get_capabilities(&ctx.adapter);
        // Splat colors are already display-referred, so avoid an sRGB encode on write.
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| SplatError::SurfaceUnavailable("no surface formats".into()))?;
        let alpha_mode = if caps.alpha_modes.contains(&CompositeAlphaMode::PreMultiplied) {
            CompositeAlphaMode::PreMultiplied
        } else {
            caps.alpha_modes
                .first()
                .copied()
                .unwrap_or(CompositeAlphaMode::Auto)
        };

        let size = window.inner_size();
        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&ctx.device, &surface_config);
        tracing::info!(?format, ?alpha_mode, "configured surface");

        Ok(Self {
            ctx,
            surface,
            surface_config,
            cache: ShaderCache::new(),
        })
    }

    fn target(&self) -> RenderTarget {
        RenderTarget {
            width: self.surface_config.width,
            height: self.surface_config.height,
            format: self.surface_config.format,
        }
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        self.surface_config.width = size.width.max(1);
        self.surface_config.height = size.height.max(1);
        self.surface.configure(&self.ctx.device, &self.surface_config);
    }
}

pub struct Viewer {
    options: ViewerOptions,
    proxy: EventLoopProxy<ViewerEvent>,
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    frame_loop: FrameLoop<SplatRasterizer>,
    camera: Camera,
    preset_index: usize,
    move_speed: f32,
    load_tx: flume::Sender<LoadOutcome>,
    load_rx: flume::Receiver<LoadOutcome>,
    keys_pressed: HashSet<KeyCode>,
    last_frame: Instant,
    fatal: Option<SplatError>,
}

impl Viewer {
    pub fn new(options: ViewerOptions, proxy: EventLoopProxy<ViewerEvent>) -> Self {
        let camera = options
            .presets
            .first()
            .map(Camera::from_preset)
            .unwrap_or_else(|| Camera::framing(None));
        let (load_tx, load_rx) = flume::unbounded();
        Self {
            options,
            proxy,
            window: None,
            gpu: None,
            frame_loop: FrameLoop::new(),
            camera,
            preset_index: 0,
            move_speed: 1.0,
            load_tx,
            load_rx,
            keys_pressed: HashSet::new(),
            last_frame: Instant::now(),
            fatal: None,
        }
    }

    fn request_redraw(&self) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn load(&self, path: PathBuf) {
        tracing::info!(path = %path.display(), "loading scene");
        let proxy = self.proxy.clone();
        spawn_loader(path, self.load_tx.clone(), move || {
            let _ = proxy.send_event(ViewerEvent::SceneReady);
        });
    }

    fn select_preset(&mut self, step: isize) {
        let count = self.options.presets.len();
        if count == 0 {
            return;
        }
        self.preset_index = (self.preset_index as isize + step).rem_euclid(count as isize) as usize;
        let preset = &self.options.presets[self.preset_index];
        tracing::info!(id = preset.id, image = %preset.img_name, "camera preset");
        self.camera = Camera::from_preset(preset);
    }

    /// Swap in every scene that finished loading. Failed loads leave the live scene alone.
    fn poll_loads(&mut self) {
        let Some(gpu) = self.gpu.as_mut() else { return };
        for LoadOutcome { path, scene } in self.load_rx.try_iter() {
            let built = scene.and_then(|scene| {
                let rasterizer =
                    SplatRasterizer::new(&gpu.ctx, &scene, gpu.target(), &mut gpu.cache)?;
                Ok((scene.bounds, rasterizer))
            });
            match built {
                Ok((bounds, rasterizer)) => {
                    if self.options.presets.is_empty() {
                        self.camera = Camera::framing(bounds);
                    }
                    if let Some((lo, hi)) = bounds {
                        self.move_speed = ((hi - lo).length() * 0.1).max(0.01);
                    }
                    // The previous scene is released here, after its replacement exists.
                    drop(self.frame_loop.install(rasterizer));
                    tracing::info!(path = %path.display(), "scene live");
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), kind = ?err.kind(), "scene load failed: {err}");
                }
            }
        }
    }

    fn apply_movement(&mut self, dt: f32) {
        let pressed = |key| self.keys_pressed.contains(&key);
        let axis = |pos, neg| (pressed(pos) as i32 - pressed(neg) as i32) as f32;
        let movement = Vec3::new(
            axis(KeyCode::KeyD, KeyCode::KeyA),
            axis(KeyCode::ShiftLeft, KeyCode::Space),
            axis(KeyCode::KeyW, KeyCode::KeyS),
        );
        let yaw = axis(KeyCode::KeyE, KeyCode::KeyQ);
        let pitch = axis(KeyCode::KeyR, KeyCode::KeyF);
        self.camera.translate_local(movement * self.move_speed * dt);
        self.camera.rotate_local(yaw * dt, pitch * dt);
    }

    fn redraw(&mut self) -> Result<()> {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32().min(0.1);
        self.last_frame = now;

        // Frame boundary: teardown and scene swaps happen only here.
        if self.frame_loop.observe_cancel() {
            tracing::info!("scene destroyed");
        }
        self.poll_loads();
        self.apply_movement(dt);

        let (Some(gpu), Some(rasterizer)) = (self.gpu.as_mut(), self.frame_loop.current()) else {
            return Ok(());
        };
        let config = self
            .options
            .config
            .with_size(gpu.surface_config.width, gpu.surface_config.height);
        let uniform = self.camera.uniform(&config);
        if rasterizer.needs_redraw(&uniform) {
            match gpu.surface.get_current_texture() {
                Ok(frame) => {
                    let view = frame.texture.create_view(&TextureViewDescriptor::default());
                    rasterizer.render(&gpu.ctx, &uniform, &view)?;
                    frame.present();
                }
                Err(SurfaceError::Lost | SurfaceError::Outdated) => {
                    gpu.surface.configure(&gpu.ctx.device, &gpu.surface_config);
                    rasterizer.force_draw();
                }
                Err(SurfaceError::OutOfMemory) => {
                    return Err(SplatError::SurfaceUnavailable("surface out of memory".into()));
                }
                Err(SurfaceError::Timeout | SurfaceError::Other) => rasterizer.force_draw(),
            }
        }

        if !self.keys_pressed.is_empty() {
            self.request_redraw();
        }
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: SplatError) {
        tracing::error!(kind = ?err.kind(), "{err}");
        self.fatal = Some(err);
        event_loop.exit();
    }

    pub fn take_error(&mut self) -> Option<SplatError> {
        self.fatal.take()
    }
}

impl ApplicationHandler<ViewerEvent> for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title("splat viewer")
            .with_inner_size(PhysicalSize::new(
                self.options.config.width,
                self.options.config.height,
            ));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, SplatError::SurfaceUnavailable(e.to_string())),
        };
        match Gpu::new(Arc::clone(&window)) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(err) => return self.fail(event_loop, err),
        }
        self.window = Some(window);

        if let Some(path) = self.options.scene.take() {
            self.load(path);
        }
        self.request_redraw();
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            ViewerEvent::SceneReady => self.request_redraw(),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),

            WindowEvent::Resized(size) => {
                if let Some(gpu) = self.gpu.as_mut() {
                    gpu.resize(size);
                    let target = gpu.target();
                    if let Some(rasterizer) = self.frame_loop.current() {
                        rasterizer.resize(&gpu.ctx, target, &mut gpu.cache);
                    }
                }
                self.request_redraw();
            }

            WindowEvent::DroppedFile(path) => self.load(path),

            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };
                match event.state {
                    ElementState::Pressed => {
                        match key {
                            KeyCode::Escape => event_loop.exit(),
                            KeyCode::KeyN => self.select_preset(1),
                            KeyCode::KeyB => self.select_preset(-1),
                            KeyCode::Delete => {
                                if let Err(err) = self.frame_loop.request_destroy() {
                                    tracing::warn!("{err}");
                                }
                            }
                            _ => {
                                self.keys_pressed.insert(key);
                            }
                        }
                        self.request_redraw();
                    }
                    ElementState::Released => {
                        self.keys_pressed.remove(&key);
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw() {
                    self.fail(event_loop, err);
                }
            }

            _ => {}
        }
    }
}

pub fn run(scene: Option<&Path>, presets: Vec<CameraPreset>, config: RenderConfig) -> anyhow::Result<()> {
    let event_loop = EventLoop::<ViewerEvent>::with_user_event().build()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let options = ViewerOptions {
        scene: scene.map(Path::to_path_buf),
        presets,
        config,
    };
    let mut viewer = Viewer::new(options, event_loop.create_proxy());
    event_loop.run_app(&mut viewer)?;

    match viewer.take_error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::AtomicUsize;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn destroy_without_scene_is_rejected() {
        let frame_loop = FrameLoop::<Tracked>::new();
        let err = frame_loop.request_destroy().unwrap_err();
        assert!(matches!(err, SplatError::DestroyWithoutFrameLoop));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn destroy_takes_effect_at_next_frame_boundary() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut frame_loop = FrameLoop::new();
        frame_loop.install(Tracked(drops.clone()));

        frame_loop.request_destroy().unwrap();
        // Still live until the frame boundary is reached.
        assert!(frame_loop.current().is_some());
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        assert!(frame_loop.observe_cancel());
        assert!(!frame_loop.is_running());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(!frame_loop.observe_cancel());
    }

    #[test]
    fn cancel_token_is_shared() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut frame_loop = FrameLoop::new();
        frame_loop.install(Tracked(drops.clone()));
        let token = frame_loop.cancel_token();
        std::thread::spawn(move || token.cancel()).join().unwrap();
        assert!(frame_loop.observe_cancel());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn install_returns_previous_scene() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut frame_loop = FrameLoop::new();
        assert!(frame_loop.install(Tracked(drops.clone())).is_none());
        let old = frame_loop.install(Tracked(drops.clone()));
        assert!(old.is_some());
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(old);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(frame_loop.is_running());
    }

    #[test]
    fn failed_load_is_reported_through_channel() {
        let (tx, rx) = flume::unbounded();
        let notified = Arc::new(AtomicBool::new(false));
        let flag = notified.clone();
        let path = std::env::temp_dir().join("splat-viewer-missing-scene.ply");
        spawn_loader(path.clone(), tx, move || flag.store(true, Ordering::SeqCst))
            .join()
            .unwrap();

        let outcome = rx.recv().unwrap();
        assert_eq!(outcome.path, path);
        let err = outcome.scene.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::SceneData);
        assert!(notified.load(Ordering::SeqCst));
    }
}
