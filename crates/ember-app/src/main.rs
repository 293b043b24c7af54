// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use ember_core::init_tracing;
use ember_math::{Camera, CameraConfig};
use ember_platform::{grab_cursor, InputTracker};
use ember_render_vk::{Engine, EngineOptions, Model, RenderSize, ShaderSource, VkError};
use glam::{Mat4, Vec3};
use serde::Deserialize;
use tracing::{error, info, warn};

use ember_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{DeviceEvent, DeviceId, ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; a missing file means built-in defaults
    #[arg(long, default_value = "ember.toml")]
    config: PathBuf,
    /// Compiled mesh to draw (overrides [render].mesh)
    #[arg(long)]
    mesh: Option<PathBuf>,
    /// DXT1 texture for the mesh (overrides [render].texture)
    #[arg(long)]
    texture: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
struct AppCfg {
    #[serde(default)]
    window: WindowCfg,
    #[serde(default)]
    render: RenderCfg,
    #[serde(default)]
    camera: CameraCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
struct WindowCfg {
    width: u32,
    height: u32,
    title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: 1280,
            height: 720,
            title: "ember".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
struct RenderCfg {
    clear_color: [f32; 4],
    mesh: PathBuf,
    texture: PathBuf,
    vertex_shader: Option<PathBuf>,
    fragment_shader: Option<PathBuf>,
    scratch_mib: usize,
    max_models: u32,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.4, 0.5, 0.7, 1.0],
            mesh: PathBuf::from("out.cmdl"),
            texture: PathBuf::from("image.dds"),
            vertex_shader: None,
            fragment_shader: None,
            scratch_mib: 10,
            max_models: 64,
        }
    }
}

impl RenderCfg {
    fn engine_options(&self) -> EngineOptions {
        let mut opts = EngineOptions {
            default_texture: self.texture.clone(),
            scratch_arena_bytes: self.scratch_mib.max(1) << 20,
            max_models: self.max_models,
            ..EngineOptions::default()
        };
        if let Some(p) = &self.vertex_shader {
            opts.vertex_shader = ShaderSource::File(p.clone());
        }
        if let Some(p) = &self.fragment_shader {
            opts.fragment_shader = ShaderSource::File(p.clone());
        }
        opts
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
struct CameraCfg {
    fov_deg: f32,
    near: f32,
    speed: f32,
    sensitivity: f32,
}

impl Default for CameraCfg {
    fn default() -> Self {
        let c = CameraConfig::default();
        CameraCfg {
            fov_deg: c.fov_rad.to_degrees(),
            near: c.near,
            speed: c.speed,
            sensitivity: c.sensitivity,
        }
    }
}

impl CameraCfg {
    fn to_config(self) -> CameraConfig {
        CameraConfig {
            fov_rad: self.fov_deg.to_radians(),
            near: self.near,
            speed: self.speed,
            sensitivity: self.sensitivity,
            ..CameraConfig::default()
        }
    }
}

fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(_) => AppCfg::default(),
    }
}

/// Animation time advanced per rendered frame.
const TICK: f32 = 1.0 / 60.0;

struct Scene {
    engine: Engine,
    camera: Camera,
    model: Model,
    model2: Model,
    t: f32,
}

impl Scene {
    fn new(window: &Window, cfg: &AppCfg) -> Result<Self> {
        let size = window.inner_size();
        let render_size = RenderSize {
            width: size.width.max(1),
            height: size.height.max(1),
        };

        let mut engine = Engine::new(window, window, render_size, cfg.render.engine_options())
            .context("renderer init")?;
        let model = engine
            .load_model(&cfg.render.mesh)
            .with_context(|| format!("loading {}", cfg.render.mesh.display()))?;

        let area = engine.render_area().extent;
        let camera = Camera::new(cfg.camera.to_config(), area.width, area.height);

        Ok(Scene {
            engine,
            camera,
            model,
            model2: model,
            t: 0.0,
        })
    }

    /// Draws one frame. `Ok(false)` means the surface went out of date and the
    /// frame was dropped.
    fn frame(&mut self, tracker: &mut InputTracker, clear: [f32; 4]) -> Result<bool, VkError> {
        self.camera.update(&tracker.take_snapshot());

        self.model.transform = Mat4::from_rotation_y(self.t);
        self.model2.transform =
            Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0)) * Mat4::from_rotation_y(-self.t);
        self.t += TICK;

        let image = match self.engine.begin_frame() {
            Ok(image) => image,
            Err(VkError::SurfaceOutOfDate) => return Ok(false),
            Err(e) => return Err(e),
        };
        let view_proj = self.camera.view_proj();
        self.engine.begin_rendering(&image, clear)?;
        self.engine.draw_model(view_proj, &self.model)?;
        self.engine.draw_model(view_proj, &self.model2)?;
        self.engine.end_rendering()?;
        match self.engine.end_frame(image) {
            Ok(()) => Ok(true),
            Err(VkError::SurfaceOutOfDate) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

struct App {
    cfg: AppCfg,
    // Field order: the scene (and its surface) goes before the window.
    scene: Option<Scene>,
    window: Option<Window>,
    tracker: InputTracker,
    fatal: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: std::time::Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        App {
            cfg,
            scene: None,
            window: None,
            tracker: InputTracker::new(),
            fatal: None,
            frames: 0,
            last_fps_instant: std::time::Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(
                self.cfg.window.width.max(1),
                self.cfg.window.height.max(1),
            ))
            .with_resizable(false);
        let window = event_loop.create_window(attrs).context("create_window")?;
        grab_cursor(&window);

        let scene = Scene::new(&window, &self.cfg)?;
        info!(
            format = ?scene.engine.swapchain_format(),
            bc = scene.engine.supports_bc(),
            "scene ready"
        );
        self.scene = Some(scene);
        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop, err: Option<anyhow::Error>) {
        if let Some(e) = err {
            error!("{e:#}");
            self.fatal = Some(e);
        }
        self.scene = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && self.fatal.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.shutdown(event_loop, Some(e));
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match &self.window {
            Some(window) if window.id() == window_id => {}
            _ => return,
        }
        self.tracker.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                info!("exit requested");
                self.shutdown(event_loop, None);
            }

            WindowEvent::Resized(size) => {
                if let Some(scene) = &self.scene {
                    let extent = scene.engine.render_area().extent;
                    if extent.width != size.width || extent.height != size.height {
                        warn!(
                            "resize to {}x{} ignored; swapchain stays {}x{}",
                            size.width, size.height, extent.width, extent.height
                        );
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(scene) = self.scene.as_mut() else {
                    return;
                };
                match scene.frame(&mut self.tracker, self.cfg.render.clear_color) {
                    Ok(true) => self.frames = self.frames.saturating_add(1),
                    Ok(false) => warn!("surface out of date; frame skipped"),
                    Err(e) if !e.is_fatal() => warn!("frame skipped: {e}"),
                    Err(e) => {
                        let err = anyhow::Error::new(e).context("frame failed");
                        self.shutdown(event_loop, Some(err));
                    }
                }
            }

            _ => {}
        }
    }

    fn device_event(&mut self, _: &ActiveEventLoop, _: DeviceId, event: DeviceEvent) {
        self.tracker.handle_device_event(&event);
    }

    fn about_to_wait(&mut self, _: &ActiveEventLoop) {
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = std::time::Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    if let Some(mesh) = args.mesh {
        cfg.render.mesh = mesh;
    }
    if let Some(texture) = args.texture {
        cfg.render.texture = texture;
    }
    info!(
        mesh = %cfg.render.mesh.display(),
        texture = %cfg.render.texture.display(),
        "starting"
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.render.mesh, PathBuf::from("out.cmdl"));
        assert_eq!(cfg.render.texture, PathBuf::from("image.dds"));
        assert_eq!(cfg.render.clear_color, [0.4, 0.5, 0.7, 1.0]);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [window]
            width = 800

            [render]
            max_models = 4
            vertex_shader = "compiled/mesh.vert.spv"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.render.max_models, 4);
        assert_eq!(cfg.render.scratch_mib, 10);

        let opts = cfg.render.engine_options();
        assert_eq!(opts.max_models, 4);
        assert_eq!(opts.scratch_arena_bytes, 10 << 20);
        assert_eq!(
            opts.vertex_shader,
            ShaderSource::File(PathBuf::from("compiled/mesh.vert.spv"))
        );
        assert!(matches!(opts.fragment_shader, ShaderSource::Embedded(_)));
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(parse_cfg("[render]\nmax_models = \"many\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = load_cfg(Path::new("definitely/not/here/ember.toml"));
        assert_eq!(cfg, AppCfg::default());
    }

    #[test]
    fn camera_section_maps_degrees() {
        let cfg = parse_cfg("[camera]\nfov_deg = 90.0\nspeed = 1.0").unwrap();
        let cam = cfg.camera.to_config();
        assert!((cam.fov_rad - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
        assert_eq!(cam.speed, 1.0);
        assert_eq!(cam.eye_height, CameraConfig::default().eye_height);
    }
}
