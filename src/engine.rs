// Engine facade
//
// Owns the window, the event loop and every renderer object. The event loop
// is pumped from `frame`, so the application keeps its own loop:
//
//   engine.begin_frame();
//   engine.submit_mesh(&mesh, mvp)?;
//   engine.end_frame();
//   engine.frame()?;
//
// Field order is drop order: renderer objects go before the device, the
// device before the window, the window before the event loop.

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use std::time::Duration;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::backend::{FrameDriver, FrameStatus, VulkanDevice};
use crate::config::{Config, WindowConfig};
use crate::error::{RenderError, RenderResult};
use crate::events::{EngineControl, EngineEvent, EventHandlers, EventKind};
use crate::mesh::Mesh;
use crate::render_queue::RenderQueue;
use crate::transform::Mvp;

const STARTUP_POLL: Duration = Duration::from_millis(50);

/// Receives winit callbacks while the loop is pumped.
struct WindowHost {
    attributes: WindowAttributes,
    window: Option<Window>,
    events: Vec<EngineEvent>,
    error: Option<String>,
}

impl WindowHost {
    fn new(attributes: WindowAttributes) -> Self {
        Self {
            attributes,
            window: None,
            events: Vec::new(),
            error: None,
        }
    }
}

impl ApplicationHandler for WindowHost {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.error.is_some() {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                log::info!("Window created");
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                self.error = Some(e.to_string());
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(event) = EngineEvent::from_window_event(&event) {
            self.events.push(event);
        }
    }
}

pub struct Engine {
    frame_driver: FrameDriver,
    device: Arc<VulkanDevice>,
    queue: RenderQueue,
    handlers: EventHandlers,
    control: EngineControl,
    clear_colour: [f32; 4],
    window: Window,
    host: WindowHost,
    event_loop: EventLoop<()>,
}

impl Engine {
    /// Open a window and bring up the renderer with default settings.
    pub fn init(title: &str, width: u32, height: u32) -> RenderResult<Self> {
        let config = Config {
            window: WindowConfig {
                title: title.to_string(),
                width,
                height,
            },
            ..Config::default()
        };
        Self::with_config(&config)
    }

    pub fn with_config(config: &Config) -> RenderResult<Self> {
        log::info!(
            "Initialising engine: {} ({}x{})",
            config.window.title,
            config.window.width,
            config.window.height
        );

        let mut event_loop = EventLoop::new().map_err(|e| RenderError::Window(e.to_string()))?;

        let attributes = Window::default_attributes()
            .with_title(config.window.title.clone())
            .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
            .with_resizable(true);
        let mut host = WindowHost::new(attributes);

        let window = loop {
            if let PumpStatus::Exit(code) = event_loop.pump_app_events(Some(Duration::ZERO), &mut host) {
                return Err(RenderError::Window(format!("event loop exited during startup ({code})")));
            }
            if let Some(error) = host.error.take() {
                return Err(RenderError::Window(error));
            }
            if let Some(window) = host.window.take() {
                break window;
            }
        };

        // A window that starts minimised has no surface area to build on.
        while is_zero(window.inner_size()) {
            log::debug!("Window has no area yet, waiting");
            if let PumpStatus::Exit(code) = event_loop.pump_app_events(Some(STARTUP_POLL), &mut host) {
                return Err(RenderError::Window(format!("event loop exited during startup ({code})")));
            }
        }
        host.events.clear();

        let device = VulkanDevice::new(
            &config.window.title,
            config.validation_enabled(),
            window.raw_display_handle(),
            window.raw_window_handle(),
        )?;

        let frame_driver = FrameDriver::new(device.clone(), extent_of(window.inner_size()), config.shader_paths())?;

        log::info!("Engine initialised");
        Ok(Self {
            frame_driver,
            device,
            queue: RenderQueue::new(),
            handlers: EventHandlers::with_defaults(),
            control: EngineControl::default(),
            clear_colour: config.graphics.clear_colour,
            window,
            host,
            event_loop,
        })
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn running(&self) -> bool {
        self.control.running
    }

    pub fn window_extent(&self) -> vk::Extent2D {
        extent_of(self.window.inner_size())
    }

    pub fn add_event_handler(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&EngineEvent, &mut EngineControl) + 'static,
    ) -> RenderResult<()> {
        self.handlers.add(kind, Box::new(handler))
    }

    pub fn begin_frame(&mut self) {
        self.queue.begin();
    }

    pub fn submit_mesh(&mut self, mesh: &Mesh, transform: Mvp) -> RenderResult<()> {
        self.queue.submit(mesh, transform)
    }

    pub fn end_frame(&mut self) {
        self.queue.end();
    }

    pub fn set_clear_colour(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear_colour = [r, g, b, a];
    }

    /// Handle pending window events, then render and present the queued draws.
    pub fn frame(&mut self) -> RenderResult<FrameStatus> {
        self.pump_events();

        if !self.control.running {
            return Ok(FrameStatus::Skipped);
        }

        if self.control.resize_pending {
            self.control.resize_pending = false;
            self.frame_driver.notify_resized();
        }

        let extent = self.window_extent();
        self.frame_driver
            .advance(self.queue.snapshot(), self.clear_colour, extent)
    }

    fn pump_events(&mut self) {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.host);

        let mut events = std::mem::take(&mut self.host.events);
        if let PumpStatus::Exit(code) = status {
            log::info!("Event loop exited with code {}", code);
            events.push(EngineEvent::Quit);
        }

        for event in &events {
            self.handlers.dispatch(event, &mut self.control);
        }
    }

    /// Wait for the device, then release everything in dependency order.
    pub fn quit(self) {
        log::info!("Shutting down");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle: {}", e);
        }
        drop(self);
        log::info!("Shutdown complete");
    }
}

fn is_zero(size: PhysicalSize<u32>) -> bool {
    size.width == 0 || size.height == 0
}

fn extent_of(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}
