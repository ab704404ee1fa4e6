// =============================================================================
// FRAME CORE DEMO - a textured cube driven by the frame-execution core
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit App (window, input, FPS title)                           │
// │    └── Renderer                                                 │
// │          ├── Engine (swapchain, frame ring, scheduler, memory)  │
// │          ├── MeshPipeline (shaders from shaders/*.spv)          │
// │          └── Scene (cube mesh, checkerboard texture)            │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (inside Engine::tick):
// 1. Wait for this slot's previous frame
// 2. Acquire swapchain image
// 3. Record the scene's draw list
// 4. Submit, present, rebuild the swapchain if it went stale
//
// =============================================================================

use anyhow::Result;
use ash::vk;
use frame_core::backend::context::create_surface;
use frame_core::backend::pipeline::MeshPipeline;
use frame_core::backend::{SurfaceSize, VulkanContext, VulkanDevice};
use frame_core::config::Config;
use frame_core::frame::ResizeFlag;
use frame_core::scene::{Material, ObjectId, Scene, Vertex};
use frame_core::Engine;
use glam::{Mat4, Vec3};
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting frame-core demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// RUST_LOG-driven logging, `info` by default; optionally piped to a file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        match std::fs::File::create(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

// =============================================================================
// SURFACE SIZE
// =============================================================================

/// Drawable size straight from the window
struct WindowSurface<'a>(&'a Window);

impl SurfaceSize for WindowSurface<'_> {
    fn drawable_size(&mut self) -> vk::Extent2D {
        let size = self.0.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn wait_events(&mut self) {
        std::thread::sleep(Duration::from_millis(16));
    }
}

// =============================================================================
// RENDERER
// =============================================================================

struct Renderer {
    engine: Engine<VulkanContext>,
    scene: Scene,
    resize: ResizeFlag,
    cube: ObjectId,
    started: Instant,
}

impl Renderer {
    fn new(config: &Config, window: &Window) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(&config.window.title, enable_validation)?;
        let surface = create_surface(&device, window)?;
        let gpu = Arc::new(VulkanContext::new(device.clone(), surface)?);

        let engine_config = config.engine_config()?;
        let mut engine = Engine::new(gpu, &engine_config, &mut WindowSurface(window))?;

        let pipeline = MeshPipeline::new(
            &device,
            engine.swapchain().render_pass(),
            &config.paths.shader_dir,
        )?;
        {
            let device = device.clone();
            engine.defer("mesh pipeline", move || pipeline.destroy(&device.device));
        }

        let mut scene = Scene::new();

        let (vertices, indices) = cube();
        let mesh = engine.upload_mesh("cube", &vertices, &indices)?;
        let mesh = scene.add_mesh(mesh);

        let extent = vk::Extent2D {
            width: 64,
            height: 64,
        };
        let texture = engine.upload_texture("checkerboard", &checkerboard(extent, 8), extent)?;
        let view = texture.image.view;
        let texture = scene.add_texture(texture);

        let descriptor_set = engine
            .descriptors_mut()
            .allocate(pipeline.descriptor_set_layout)?;
        engine
            .descriptors_mut()
            .write_texture(descriptor_set, 0, view, pipeline.sampler);

        let material = scene.add_material(Material {
            pipeline: pipeline.pipeline,
            layout: pipeline.layout,
            descriptor_set,
            texture: Some(texture),
        })?;
        let cube = scene.add_object(mesh, material, Mat4::IDENTITY)?;

        log::info!("Vulkan initialized successfully!");
        Ok(Self {
            resize: engine.resize_flag(),
            engine,
            scene,
            cube,
            started: Instant::now(),
        })
    }

    fn render(&mut self, window: &Window) -> Result<()> {
        let extent = self.engine.swapchain().extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;

        let mut projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
        // Vulkan clip space has Y pointing down
        projection.y_axis.y *= -1.0;
        let view = Mat4::look_at_rh(Vec3::new(0.0, 1.5, 4.0), Vec3::ZERO, Vec3::Y);

        let t = self.started.elapsed().as_secs_f32();
        if let Some(cube) = self.scene.object_mut(self.cube) {
            cube.transform = Mat4::from_rotation_y(t) * Mat4::from_rotation_x(t * 0.5);
        }

        let items = self.scene.draw_list(projection * view);
        self.engine.tick(&mut WindowSurface(window), &items)?;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        if let Err(e) = self.engine.wait_idle() {
            log::error!("Failed to idle device: {:#}", e);
        }
        self.scene.destroy(self.engine.allocator_mut());
        self.engine.shutdown();
        log::info!("Cleanup complete");
    }
}

/// Unit cube, 4 vertices per face so each face gets its own normal and UVs
fn cube() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, u axis, v axis) with u x v == normal so faces wind CCW outward
    let faces = [
        (Vec3::Z, Vec3::X, Vec3::Y, [1.0, 0.4, 0.4]),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y, [0.4, 1.0, 0.4]),
        (Vec3::X, Vec3::NEG_Z, Vec3::Y, [0.4, 0.4, 1.0]),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y, [1.0, 1.0, 0.4]),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z, [0.4, 1.0, 1.0]),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z, [1.0, 0.4, 1.0]),
    ];
    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u, v, color) in faces {
        let base = vertices.len() as u32;
        for (su, sv) in corners {
            vertices.push(Vertex {
                position: ((normal + u * su + v * sv) * 0.5).to_array(),
                normal: normal.to_array(),
                color,
                uv: [(su + 1.0) * 0.5, (1.0 - sv) * 0.5],
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    (vertices, indices)
}

/// RGBA8 checkerboard with `cell`-pixel squares
fn checkerboard(extent: vk::Extent2D, cell: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((extent.width * extent.height * 4) as usize);
    for y in 0..extent.height {
        for x in 0..extent.width {
            let value = if (x / cell + y / cell) % 2 == 0 { 255 } else { 96 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

fn parse_key(name: &str) -> Option<KeyCode> {
    Some(match name.to_ascii_uppercase().as_str() {
        "ESCAPE" | "ESC" => KeyCode::Escape,
        "F1" => KeyCode::F1,
        "F2" => KeyCode::F2,
        "F10" => KeyCode::F10,
        "F11" => KeyCode::F11,
        "F12" => KeyCode::F12,
        "Q" => KeyCode::KeyQ,
        "F" => KeyCode::KeyF,
        "ENTER" => KeyCode::Enter,
        _ => return None,
    })
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    // Dropped before the window
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,
    /// Window has zero size - skip rendering
    is_minimized: bool,
    fullscreen_key: KeyCode,
    quit_key: KeyCode,

    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let fullscreen_key = parse_key(&config.controls.fullscreen_key).unwrap_or_else(|| {
            log::warn!("Unknown key '{}', using F11", config.controls.fullscreen_key);
            KeyCode::F11
        });
        let quit_key = parse_key(&config.controls.quit_key).unwrap_or_else(|| {
            log::warn!("Unknown key '{}', using Escape", config.controls.quit_key);
            KeyCode::Escape
        });

        let now = Instant::now();
        Self {
            is_fullscreen: config.window.fullscreen,
            config,
            renderer: None,
            window: None,
            is_minimized: false,
            fullscreen_key,
            quit_key,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            if let Some(ref renderer) = self.renderer {
                renderer.resize.request();
            }
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&self.config, &window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:#}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.renderer = None;
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                self.is_minimized = size.width == 0 || size.height == 0;
                if !self.is_minimized {
                    if let Some(ref renderer) = self.renderer {
                        renderer.resize.request();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.is_minimized {
                    return;
                }
                let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref())
                else {
                    return;
                };

                match renderer.render(window) {
                    Ok(()) => self.update_fps(),
                    Err(e) => {
                        log::error!("Fatal render error: {:#}", e);
                        self.renderer = None;
                        event_loop.exit();
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        if key == self.quit_key {
                            log::info!("{:?} pressed, exiting...", key);
                            self.renderer = None;
                            event_loop.exit();
                        } else if key == self.fullscreen_key {
                            self.toggle_fullscreen();
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
