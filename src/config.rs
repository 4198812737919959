// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional. A missing file gives defaults, a broken file
// gives defaults plus a warning.
//
// The config is read before the logger exists (it decides where logs go),
// so loading records its messages in `Config::notes` and `log_notes`
// replays them once logging is up.

use anyhow::{Context, Result};
use log::Level;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use winit::keyboard::KeyCode;

pub const CONFIG_FILE: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,

    /// Messages produced while loading, logged later by `log_notes`
    #[serde(skip)]
    pub notes: Vec<(Level, String)>,
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
            title: "Rotating Pyramid".to_string(),
            width: 1920,
            height: 1080,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode; falls back to MAILBOX, then FIFO
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 3,
        }
    }
}

/// Files read at startup, relative to the working directory
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub texture: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("shaders/pyramid.vert.spv"),
            fragment_shader: PathBuf::from("shaders/pyramid.frag.spv"),
            texture: PathBuf::from("textures/checkerboard.png"),
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
    pub hot_reload_shaders: bool,
    pub dump_pipeline_executables: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "pyramid_debug.log".to_string(),
            show_fps: true,
            hot_reload_shaders: false,
            dump_pipeline_executables: false,
        }
    }
}

/// Key bindings, by key name ("Escape", "F11", "Q", "Space", ...)
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

/// Map a key name from the config to a physical key code
pub fn key_code(name: &str) -> Option<KeyCode> {
    const LETTERS: [KeyCode; 26] = [
        KeyCode::KeyA, KeyCode::KeyB, KeyCode::KeyC, KeyCode::KeyD, KeyCode::KeyE,
        KeyCode::KeyF, KeyCode::KeyG, KeyCode::KeyH, KeyCode::KeyI, KeyCode::KeyJ,
        KeyCode::KeyK, KeyCode::KeyL, KeyCode::KeyM, KeyCode::KeyN, KeyCode::KeyO,
        KeyCode::KeyP, KeyCode::KeyQ, KeyCode::KeyR, KeyCode::KeyS, KeyCode::KeyT,
        KeyCode::KeyU, KeyCode::KeyV, KeyCode::KeyW, KeyCode::KeyX, KeyCode::KeyY,
        KeyCode::KeyZ,
    ];
    const FUNCTION_KEYS: [KeyCode; 12] = [
        KeyCode::F1, KeyCode::F2, KeyCode::F3, KeyCode::F4, KeyCode::F5, KeyCode::F6,
        KeyCode::F7, KeyCode::F8, KeyCode::F9, KeyCode::F10, KeyCode::F11, KeyCode::F12,
    ];

    let upper = name.trim().to_ascii_uppercase();
    match upper.as_str() {
        "ESCAPE" | "ESC" => return Some(KeyCode::Escape),
        "SPACE" => return Some(KeyCode::Space),
        "ENTER" | "RETURN" => return Some(KeyCode::Enter),
        "TAB" => return Some(KeyCode::Tab),
        "BACKSPACE" => return Some(KeyCode::Backspace),
        _ => {}
    }

    let bytes = upper.as_bytes();
    if let [letter @ b'A'..=b'Z'] = bytes {
        return Some(LETTERS[(letter - b'A') as usize]);
    }

    let number: usize = upper.strip_prefix('F')?.parse().ok()?;
    FUNCTION_KEYS.get(number.checked_sub(1)?).copied()
}

impl Config {
    /// Load config.toml from the working directory
    pub fn load() -> Self {
        Self::load_or_default(CONFIG_FILE)
    }

    /// Load a config file; any error becomes a warning note on the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self::load_from_path(path).unwrap_or_else(|e| {
            let mut config = Config::default();
            config.note(
                Level::Warn,
                format!("Failed to load {:?}: {:#}. Using defaults.", path, e),
            );
            config
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let mut config = Config::default();
            config.note(
                Level::Info,
                format!("Config file not found at {:?}, using defaults", path),
            );
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.note(Level::Info, format!("Loaded configuration from {:?}", path));
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.sanitize();
        Ok(config)
    }

    fn note(&mut self, level: Level, message: String) {
        self.notes.push((level, message));
    }

    /// Emit the messages gathered while loading; call after logger init
    pub fn log_notes(&mut self) {
        for (level, message) in self.notes.drain(..) {
            log::log!(level, "{}", message);
        }
        log::debug!("Config: {:?}", self);
    }

    /// Clamp values the renderer cannot work with
    fn sanitize(&mut self) {
        if self.graphics.max_frames_in_flight == 0 {
            self.note(
                Level::Warn,
                "max_frames_in_flight must be at least 1, using 1".to_string(),
            );
            self.graphics.max_frames_in_flight = 1;
        }
        if self.window.width == 0 || self.window.height == 0 {
            let defaults = WindowConfig::default();
            self.note(
                Level::Warn,
                format!(
                    "Window size {}x{} is invalid, using {}x{}",
                    self.window.width, self.window.height, defaults.width, defaults.height
                ),
            );
            self.window.width = defaults.width;
            self.window.height = defaults.height;
        }

        let defaults = ControlsConfig::default();
        for (name, key, default) in [
            ("fullscreen_key", &mut self.controls.fullscreen_key, defaults.fullscreen_key),
            ("quit_key", &mut self.controls.quit_key, defaults.quit_key),
        ] {
            if key_code(key).is_none() {
                self.notes.push((
                    Level::Warn,
                    format!("Unknown key '{}' for {}, using {}", key, name, default),
                ));
                *key = default;
            }
        }
    }

    pub fn fullscreen_key(&self) -> KeyCode {
        key_code(&self.controls.fullscreen_key).unwrap_or(KeyCode::F11)
    }

    pub fn quit_key(&self) -> KeyCode {
        key_code(&self.controls.quit_key).unwrap_or(KeyCode::Escape)
    }

    /// Get preferred present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::MAILBOX
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn defaults_match_triple_buffered_setup() {
        let config = Config::default();
        assert_eq!(config.graphics.max_frames_in_flight, 3);
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, 1080);
        assert_eq!(
            config.assets.texture,
            PathBuf::from("textures/checkerboard.png")
        );
        assert!(!config.debug.hot_reload_shaders);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            title = "Test"

            [assets]
            texture = "other.png"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Test");
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.assets.texture, PathBuf::from("other.png"));
        assert_eq!(
            config.assets.vertex_shader,
            PathBuf::from("shaders/pyramid.vert.spv")
        );
        assert_eq!(config.graphics.present_mode, "mailbox");
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let config = Config::from_toml_str("[graphics]\nmax_frames_in_flight = 0\n").unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, 1);
    }

    #[test]
    fn zero_window_size_falls_back_to_default() {
        let config = Config::from_toml_str("[window]\nwidth = 0\n").unwrap();
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, 1080);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(Config::from_toml_str("[window\nwidth = ").is_err());
        assert!(Config::from_toml_str("[window]\nwidth = \"wide\"\n").is_err());
    }

    #[test]
    fn present_mode_parsing() {
        let mut config = Config::default();
        for (name, mode) in [
            ("IMMEDIATE", vk::PresentModeKHR::IMMEDIATE),
            ("fifo", vk::PresentModeKHR::FIFO),
            ("fifo_relaxed", vk::PresentModeKHR::FIFO_RELAXED),
            ("Mailbox", vk::PresentModeKHR::MAILBOX),
            ("bogus", vk::PresentModeKHR::MAILBOX),
        ] {
            config.graphics.present_mode = name.to_string();
            assert_eq!(config.get_present_mode(), mode, "{name}");
        }
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("definitely/not/here/config.toml").unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, 3);
    }

    #[test]
    fn key_names_resolve() {
        assert_eq!(key_code("Escape"), Some(KeyCode::Escape));
        assert_eq!(key_code("esc"), Some(KeyCode::Escape));
        assert_eq!(key_code("F11"), Some(KeyCode::F11));
        assert_eq!(key_code("f1"), Some(KeyCode::F1));
        assert_eq!(key_code("q"), Some(KeyCode::KeyQ));
        assert_eq!(key_code("Space"), Some(KeyCode::Space));
        assert_eq!(key_code("F0"), None);
        assert_eq!(key_code("F13"), None);
        assert_eq!(key_code("F"), Some(KeyCode::KeyF));
        assert_eq!(key_code("Hyper"), None);
    }

    #[test]
    fn controls_rebind_and_reject_unknown_keys() {
        let config = Config::from_toml_str("[controls]\nquit_key = \"Q\"\n").unwrap();
        assert_eq!(config.quit_key(), KeyCode::KeyQ);
        assert_eq!(config.fullscreen_key(), KeyCode::F11);

        let config = Config::from_toml_str("[controls]\nfullscreen_key = \"Hyper\"\n").unwrap();
        assert_eq!(config.controls.fullscreen_key, "F11");
        assert!(config
            .notes
            .iter()
            .any(|(level, msg)| *level == Level::Warn && msg.contains("Hyper")));
    }

    #[test]
    fn sanitize_warnings_are_kept_for_later_logging() {
        let config = Config::from_toml_str("[graphics]\nmax_frames_in_flight = 0\n").unwrap();
        assert_eq!(config.notes.len(), 1);
        assert_eq!(config.notes[0].0, Level::Warn);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults_with_a_warning() {
        let path = std::env::temp_dir().join(format!(
            "pyramid-renderer-bad-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[window\nwidth = ").unwrap();

        assert!(Config::load_from_path(&path).is_err());

        let config = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 1920);
        assert_eq!(config.notes.len(), 1);
        let (level, message) = &config.notes[0];
        assert_eq!(*level, Level::Warn);
        assert!(message.contains("Using defaults"), "{message}");
    }
}
