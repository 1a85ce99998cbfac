// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a partial file only overrides what it names.
// A missing or broken file falls back to the defaults with a warning.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::ShaderPaths;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "asimotive".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_colour: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_colour: [0.0, 0.0, 0.4, 1.0],
            vertex_shader: PathBuf::from("shaders/triangle.vert.spv"),
            fragment_shader: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds.
    pub validation_layers: bool,
    pub log_filter: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validation layers are a debug-build feature.
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    pub fn shader_paths(&self) -> ShaderPaths {
        ShaderPaths {
            vertex: self.graphics.vertex_shader.clone(),
            fragment: self.graphics.fragment_shader.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.title, "asimotive");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert_eq!(config.graphics.clear_colour, [0.0, 0.0, 0.4, 1.0]);
        assert_eq!(config.graphics.vertex_shader, Path::new("shaders/triangle.vert.spv"));
        assert_eq!(config.graphics.fragment_shader, Path::new("shaders/triangle.frag.spv"));
        assert!(config.debug.validation_layers);
        assert_eq!(config.debug.log_filter, "info");
    }

    #[test]
    fn partial_file_overrides_named_fields_only() {
        let config = Config::parse(
            r#"
            [window]
            width = 1024

            [debug]
            validation_layers = false
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.window.title, "asimotive");
        assert!(!config.debug.validation_layers);
        assert!(!config.validation_enabled());
    }

    #[test]
    fn shader_paths_come_from_graphics_section() {
        let config = Config::parse(
            r#"
            [graphics]
            vertex_shader = "assets/a.spv"
            fragment_shader = "assets/b.spv"
            "#,
        )
        .unwrap();

        let paths = config.shader_paths();
        assert_eq!(paths.vertex, Path::new("assets/a.spv"));
        assert_eq!(paths.fragment, Path::new("assets/b.spv"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("does/not/exist.toml").unwrap();
        assert_eq!(config.window.width, 800);
    }
}
