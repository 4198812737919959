// =============================================================================
// ROTATING PYRAMID - Vulkan renderer
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, window, input, FPS title)               │
// │    └── Renderer (frame loop, resize, shader reload)             │
// │          └── Vulkan Device + Swapchain                          │
// │                └── Per-frame command buffers, UBOs, sync        │
// │          └── Deletion queue (reverse-order teardown)            │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

mod backend;
mod config;
mod renderer;
mod scene;
mod texture;

use anyhow::{Context, Result};
use config::Config;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use renderer::Renderer;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::PhysicalKey,
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let mut config = Config::load();

    init_logging(&config);
    log::info!("Starting pyramid renderer");
    config.log_notes();
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// env_logger at Info unless RUST_LOG says otherwise; optionally into a file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Pyramid Renderer Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!(
                "Cannot open log file {}: {}, logging to stderr",
                config.debug.log_file, e
            ),
        }
    }

    builder.init();
}

// =============================================================================
// FPS TRACKING
// =============================================================================

/// Averages frame rate over roughly one-second windows
struct FpsCounter {
    frames: u32,
    window_start: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
            last_frame: now,
        }
    }

    /// Count a frame; once a second has passed returns (fps, last frame ms)
    fn tick(&mut self, now: Instant) -> Option<(f32, f32)> {
        let frame_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frames += 1;

        let elapsed = now.duration_since(self.window_start);
        if elapsed < Duration::from_secs(1) {
            return None;
        }

        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some((fps, frame_time * 1000.0))
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer (and its surface) must go
/// before the window it was created from.
struct App {
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    config: Config,
    is_fullscreen: bool,
    fps: FpsCounter,
    /// First fatal error; returned from main after the loop exits
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        Self {
            renderer: None,
            window: None,
            config,
            is_fullscreen,
            fps: FpsCounter::new(Instant::now()),
            error: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
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

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("Failed to create window")?,
        );

        let display_handle = window
            .display_handle()
            .context("Window has no display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Window has no window handle")?
            .as_raw();
        let size = window.inner_size();

        let renderer = Renderer::new(
            &self.config,
            display_handle,
            window_handle,
            size.width,
            size.height,
        )?;

        self.renderer = Some(renderer);
        self.window = Some(window);
        self.fps = FpsCounter::new(Instant::now());
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:?}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    fn toggle_fullscreen(&mut self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };

        self.is_fullscreen = !self.is_fullscreen;
        if self.is_fullscreen {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        } else {
            window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        }

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.request_resize();
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        if let Some((fps, frame_ms)) = self.fps.tick(Instant::now()) {
            if let Some(window) = self.window.as_ref() {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title, fps, frame_ms, mode
                ));
            }
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

        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e.context("Failed to initialize renderer"));
        }
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
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match renderer.render_frame() {
                    Ok(true) => self.update_fps(),
                    Ok(false) => {}
                    Err(e) => self.fail(event_loop, e.context("Render error")),
                }
            }

            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };
                if key == self.config.quit_key() {
                    log::info!("{:?} pressed, exiting...", key);
                    event_loop.exit();
                } else if key == self.config.fullscreen_key() {
                    self.toggle_fullscreen();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.as_ref() {
            if let Err(e) = renderer.wait_idle() {
                log::error!("Device wait failed on exit: {:#}", e);
            }
        }
        // Tear down while the window still exists
        self.renderer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_reports_once_per_second() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);

        for i in 1..10 {
            assert!(counter.tick(start + Duration::from_millis(i * 100)).is_none());
        }

        let (fps, frame_ms) = counter
            .tick(start + Duration::from_millis(1000))
            .expect("a second has passed");
        assert!((fps - 10.0).abs() < 0.01);
        assert!((frame_ms - 100.0).abs() < 0.01);
    }

    #[test]
    fn fps_window_restarts_after_report() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);

        assert!(counter.tick(start + Duration::from_secs(1)).is_some());
        assert!(counter
            .tick(start + Duration::from_millis(1500))
            .is_none());
        let (fps, _) = counter.tick(start + Duration::from_secs(2)).unwrap();
        assert!((fps - 2.0).abs() < 0.01);
    }
}
