//! inflight - frame pipelining demo
//!
//! Opens a window and runs the CPU/GPU frame pipeline: a bounded number of
//! frames in flight over a ring of presentable buffers.
//!
//! # Usage
//!
//! ```bash
//! inflight
//! inflight --config inflight.toml
//! inflight --vsync --frames-in-flight 2
//! ```
//!
//! # Keyboard Shortcuts
//!
//! - ESC: Quit
//! - V: Toggle vsync

use std::path::PathBuf;

use anyhow::{Context, Error, Result};
use clap::Parser;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use inflight_core::Config;
use inflight_platform::Window;
use inflight_renderer::Renderer;

#[derive(Parser)]
#[command(name = "inflight")]
#[command(author, version, about = "CPU/GPU frame pipelining over a Vulkan swapchain")]
struct Args {
    /// Configuration file (TOML); defaults are used when omitted
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Wait for vertical blank on present
    #[arg(long)]
    vsync: bool,

    /// Maximum frames the CPU may run ahead of the GPU
    #[arg(long)]
    frames_in_flight: Option<u32>,
}

impl Args {
    /// Loads the configuration file and applies command-line overrides.
    fn resolve_config(&self) -> Result<Config> {
        let mut config = Config::load_or_default(self.config.as_deref())
            .context("Failed to load configuration")?;

        if self.vsync {
            config.swapchain.vsync = true;
        }
        if let Some(frames) = self.frames_in_flight {
            config.frames.max_in_flight = frames;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

struct App {
    config: Config,
    window: Option<Window>,
    renderer: Option<Renderer>,
    /// First fatal error; reported as the process exit status
    failure: Option<Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            failure: None,
        }
    }

    /// Records a fatal error and tears everything down.
    fn fail(&mut self, err: Error) {
        error!("{:#}", err);
        self.failure.get_or_insert(err);
        self.shutdown();
    }

    /// Final teardown once the event loop has returned.
    fn finish(mut self) -> Result<()> {
        self.shutdown();
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drains the GPU and releases every Vulkan object before the window.
    fn shutdown(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            if let Err(e) = renderer.shutdown() {
                error!("Final GPU drain failed: {}", e);
            }
            drop(renderer);
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, &self.config.window) {
            Ok(window) => window,
            Err(e) => {
                self.fail(Error::new(e).context("Failed to create window"));
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => {
                info!("Initialization complete, entering main loop");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => {
                self.fail(Error::new(e).context("Failed to create renderer"));
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(ref mut window) = self.window {
                    window.resize(size.width, size.height);
                }
                if let Some(ref mut renderer) = self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(ref mut renderer) = self.renderer
                    && let Err(e) = renderer.render_frame()
                {
                    self.fail(Error::new(e).context("Frame loop stopped"));
                    event_loop.exit();
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() && !event.repeat => {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => {
                        self.shutdown();
                        event_loop.exit();
                    }
                    PhysicalKey::Code(KeyCode::KeyV) => {
                        if let Some(ref mut renderer) = self.renderer {
                            let vsync = !renderer.vsync();
                            renderer.set_vsync(vsync);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window
            && !window.is_minimized()
        {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    inflight_core::init_logging();
    info!("Starting inflight");

    let config = args.resolve_config()?;
    info!(
        "{} buffers, {} frame(s) in flight, vsync {}",
        config.swapchain.buffer_count,
        config.frames.max_in_flight,
        if config.swapchain.vsync { "on" } else { "off" }
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Covers exits that bypassed the window events.
    app.finish()
}
