// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Loads and parses config.toml, falling back to defaults if the file is
// missing or malformed. `engine_config()` turns the raw settings into the
// typed parameters the engine is built from.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::descriptor::PoolSizes;
use crate::engine::EngineConfig;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub pools: PoolsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
    pub paths: PathsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Frame Core".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings. Present mode is always FIFO and not configurable.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub max_frames_in_flight: usize,
    /// e.g. "B8G8R8A8_SRGB" or "R8G8B8A8_UNORM/SRGB_NONLINEAR", most preferred first
    pub preferred_formats: Vec<String>,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.1, 0.2, 0.8, 1.0],
            clear_depth: 1.0,
            max_frames_in_flight: 2,
            preferred_formats: vec!["B8G8R8A8_SRGB".to_string(), "R8G8B8A8_SRGB".to_string()],
        }
    }
}

/// Descriptor pool capacities, fixed at startup
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PoolsConfig {
    pub descriptor_sets: u32,
    pub combined_image_samplers: u32,
    pub uniform_buffers: u32,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        let sizes = PoolSizes::default();
        Self {
            descriptor_sets: sizes.max_sets,
            combined_image_samplers: sizes.combined_image_samplers,
            uniform_buffers: sizes.uniform_buffers,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "frame_core.log".to_string(),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
        }
    }
}

/// Filesystem locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub shader_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
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

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Typed engine parameters. Unknown format names are skipped with a warning.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        anyhow::ensure!(
            self.graphics.max_frames_in_flight > 0,
            "graphics.max_frames_in_flight must be at least 1"
        );

        let preferred_formats = self
            .graphics
            .preferred_formats
            .iter()
            .filter_map(|name| {
                let format = parse_surface_format(name);
                if format.is_none() {
                    log::warn!("Unknown surface format '{}', ignoring", name);
                }
                format
            })
            .collect();

        Ok(EngineConfig {
            frames_in_flight: self.graphics.max_frames_in_flight,
            preferred_formats,
            clear_color: self.graphics.clear_color,
            clear_depth: self.graphics.clear_depth,
            pools: PoolSizes {
                max_sets: self.pools.descriptor_sets,
                combined_image_samplers: self.pools.combined_image_samplers,
                uniform_buffers: self.pools.uniform_buffers,
            },
        })
    }
}

/// "FORMAT" or "FORMAT/COLORSPACE"; the color space defaults to SRGB_NONLINEAR
pub fn parse_surface_format(name: &str) -> Option<vk::SurfaceFormatKHR> {
    let (format, color_space) = match name.split_once('/') {
        Some((format, color_space)) => (format, color_space),
        None => (name, "SRGB_NONLINEAR"),
    };

    let format = match format.trim().to_uppercase().as_str() {
        "B8G8R8A8_SRGB" => vk::Format::B8G8R8A8_SRGB,
        "B8G8R8A8_UNORM" => vk::Format::B8G8R8A8_UNORM,
        "R8G8B8A8_SRGB" => vk::Format::R8G8B8A8_SRGB,
        "R8G8B8A8_UNORM" => vk::Format::R8G8B8A8_UNORM,
        "A2B10G10R10_UNORM_PACK32" => vk::Format::A2B10G10R10_UNORM_PACK32,
        "R16G16B16A16_SFLOAT" => vk::Format::R16G16B16A16_SFLOAT,
        _ => return None,
    };
    let color_space = match color_space.trim().to_uppercase().as_str() {
        "SRGB_NONLINEAR" => vk::ColorSpaceKHR::SRGB_NONLINEAR,
        "EXTENDED_SRGB_LINEAR" => vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        "HDR10_ST2084" => vk::ColorSpaceKHR::HDR10_ST2084_EXT,
        _ => return None,
    };

    Some(vk::SurfaceFormatKHR {
        format,
        color_space,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.paths.shader_dir, PathBuf::from("shaders"));
        assert_eq!(config.engine_config().unwrap().pools, PoolSizes::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
            [graphics]
            max_frames_in_flight = 3
            preferred_formats = ["R8G8B8A8_UNORM/SRGB_NONLINEAR", "NOT_A_FORMAT", "b8g8r8a8_srgb"]

            [pools]
            descriptor_sets = 8
            "#,
        )
        .unwrap();

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.frames_in_flight, 3);
        assert_eq!(engine.pools.max_sets, 8);
        assert_eq!(
            engine
                .preferred_formats
                .iter()
                .map(|f| f.format)
                .collect::<Vec<_>>(),
            vec![vk::Format::R8G8B8A8_UNORM, vk::Format::B8G8R8A8_SRGB]
        );
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let config = Config::parse("[graphics]\nmax_frames_in_flight = 0\n").unwrap();
        assert!(config.engine_config().is_err());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::parse("[graphics\nclear_color = 1").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("does/not/exist.toml").unwrap();
        assert_eq!(config.window.width, 1280);
    }

    #[test]
    fn color_space_suffix_is_parsed() {
        let format = parse_surface_format("R16G16B16A16_SFLOAT/EXTENDED_SRGB_LINEAR").unwrap();
        assert_eq!(format.color_space, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT);
        assert!(parse_surface_format("B8G8R8A8_SRGB/NOPE").is_none());
    }
}
