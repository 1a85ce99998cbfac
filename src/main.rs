// =============================================================================
// DEMO - two triangles at different depths over an animated clear colour
// =============================================================================
//
// ESC quits, any other key is logged. The nearer triangle must always cover
// the farther one where they overlap.

use anyhow::{Context, Result};
use ash::vk;
use asimotive::{Config, Engine, EngineEvent, EventKind, Mesh, Mvp};
use glam::{vec3, Mat4};
use std::time::Duration;
use winit::keyboard::KeyCode;

const FRAME_TIME: Duration = Duration::from_millis(16);

fn main() -> Result<()> {
    let config = Config::load();
    init_logging(&config);

    if let Err(e) = run(&config) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(config: &Config) {
    let env = env_logger::Env::default().default_filter_or(config.debug.log_filter.as_str());
    env_logger::Builder::from_env(env).init();
}

fn run(config: &Config) -> Result<()> {
    let mut engine = Engine::with_config(config).context("Engine initialisation failed")?;

    engine.add_event_handler(EventKind::KeyPressed, |event, control| {
        if let EngineEvent::KeyPressed(key) = event {
            if *key == KeyCode::Escape {
                log::info!("ESC pressed, exiting");
                control.running = false;
            } else {
                log::info!("Key pressed: {:?}", key);
            }
        }
    })?;

    let mut triangle = match Mesh::create_triangle(engine.device()) {
        Ok(mesh) => mesh,
        Err(e) => {
            engine.quit();
            return Err(e).context("Failed to create triangle mesh");
        }
    };

    let result = render_loop(&mut engine, &triangle);

    if let Err(e) = engine.device().wait_idle() {
        log::error!("Failed to wait for device idle: {}", e);
    }
    triangle.destroy(engine.device());
    engine.quit();

    result
}

/// Camera for the current window size. A zero height is clamped to one.
fn camera_for(extent: vk::Extent2D) -> Mvp {
    let aspect = extent.width as f32 / extent.height.max(1) as f32;
    Mvp {
        proj: Mvp::perspective(70f32.to_radians(), aspect, 0.1, 100.0),
        ..Mvp::default()
    }
}

fn render_loop(engine: &mut Engine, triangle: &Mesh) -> Result<()> {
    let mut t = 0.0f32;

    while engine.running() {
        t += 0.016;
        let r = 0.5 * t.sin() + 0.5;
        engine.set_clear_colour(r, 0.0, 0.4, 1.0);

        let x = t.sin() * 2.0;
        let model = Mat4::from_translation(vec3(x, x.powi(3), -5.0));

        engine.begin_frame();

        let camera = camera_for(engine.window_extent());
        // Nearer at z = -4.2, farther at z = -5.6
        let near = camera.with_model(model * Mat4::from_translation(vec3(0.0, 0.0, 0.8)));
        let far = camera.with_model(model * Mat4::from_translation(vec3(0.0, 0.0, -0.6)));
        for mvp in [near, far] {
            if let Err(e) = engine.submit_mesh(triangle, mvp) {
                log::warn!("Draw dropped: {}", e);
            }
        }

        engine.end_frame();

        engine.frame().context("Frame failed")?;
        std::thread::sleep(FRAME_TIME);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn projection_follows_window_size() {
        let wide = camera_for(extent(1600, 800)).proj;
        let square = camera_for(extent(800, 800)).proj;

        // x scale is y scale over aspect
        assert!((wide.y_axis.y.abs() / wide.x_axis.x - 2.0).abs() < 1e-5);
        assert!((square.y_axis.y.abs() / square.x_axis.x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_height_stays_finite() {
        let proj = camera_for(extent(800, 0)).proj;
        assert!(proj.is_finite());
    }
}
