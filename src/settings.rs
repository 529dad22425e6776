use std::path::{Path, PathBuf};

use image::Rgba;

use crate::components::history::DEFAULT_MAX_HISTORY;
use crate::error::Result;
use crate::ops::canvas_ops::MAX_FEATHER_RADIUS;
use crate::ops::generate::{format_color, parse_color};

const APP_DIR: &str = "rasterstack";
const SETTINGS_FILE: &str = "rasterstack_settings.cfg";

/// Persistent editor preferences.
#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    pub max_history: usize,
    pub brush_size: f32,
    pub brush_color: Rgba<u8>,
    pub feather_radius: f32,
    pub jpeg_quality: u8,
    pub draft_dir: PathBuf,
    pub log_to_file: bool,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            brush_size: 10.0,
            brush_color: Rgba([0, 0, 0, 255]),
            feather_radius: 5.0,
            jpeg_quality: 90,
            draft_dir: default_draft_dir(),
            log_to_file: true,
        }
    }
}

/// Platform data directory (without the app sub-folder).
pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    // Linux / fallback
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

/// Directory holding the session log and drafts.
pub fn app_data_dir() -> PathBuf {
    data_dir().join(APP_DIR)
}

pub fn default_draft_dir() -> PathBuf {
    app_data_dir().join("drafts")
}

impl EditorSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/rasterstack/rasterstack_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\rasterstack\rasterstack_settings.cfg
    /// On macOS:   ~/Library/Application Support/rasterstack/rasterstack_settings.cfg
    pub fn settings_path() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join(APP_DIR)
                .join(SETTINGS_FILE)
        }
        #[cfg(not(target_os = "linux"))]
        {
            app_data_dir().join(SETTINGS_FILE)
        }
    }

    /// Load from the default location. A missing file gives the defaults.
    pub fn load() -> Self {
        Self::load_from(&Self::settings_path())
    }

    /// Load from `path`. Unreadable files give the defaults; unknown keys
    /// and bad values are skipped with a warning.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                if path.exists() {
                    log::warn!("could not read settings {}: {}", path.display(), e);
                }
                Self::default()
            }
        }
    }

    /// Parse a settings file, logging every skipped line as a warning.
    pub fn parse(content: &str) -> Self {
        let (settings, warnings) = Self::parse_with_warnings(content);
        for w in &warnings {
            log::warn!("{}", w);
        }
        settings
    }

    /// Parse a settings file. Lines that could not be applied come back as
    /// messages instead of failing the whole file.
    pub fn parse_with_warnings(content: &str) -> (Self, Vec<String>) {
        let mut s = Self::default();
        let mut warnings = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else {
                warnings.push(format!("settings line {}: expected key=value, got '{}'", lineno + 1, line));
                continue;
            };
            let key = key.trim();
            let val = val.trim();
            let ok = match key {
                "max_history" => val.parse::<usize>().ok().filter(|&n| n >= 1).map(|n| s.max_history = n),
                "brush_size" => val
                    .parse::<f32>()
                    .ok()
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .map(|v| s.brush_size = v),
                "brush_color" => parse_color(val).ok().map(|c| s.brush_color = c),
                "feather_radius" => val
                    .parse::<f32>()
                    .ok()
                    .filter(|v| (1.0..=MAX_FEATHER_RADIUS).contains(v))
                    .map(|v| s.feather_radius = v),
                "jpeg_quality" => val
                    .parse::<u8>()
                    .ok()
                    .filter(|q| (1..=100).contains(q))
                    .map(|q| s.jpeg_quality = q),
                "draft_dir" => (!val.is_empty()).then(|| s.draft_dir = PathBuf::from(val)),
                "log_to_file" => val.parse::<bool>().ok().map(|b| s.log_to_file = b),
                _ => {
                    warnings.push(format!("settings line {}: unknown key '{}'", lineno + 1, key));
                    continue;
                }
            };
            if ok.is_none() {
                warnings.push(format!("settings line {}: bad value '{}' for {}", lineno + 1, val, key));
            }
        }
        (s, warnings)
    }

    pub fn to_config(&self) -> String {
        format!(
            "max_history={}\n\
             brush_size={}\n\
             brush_color={}\n\
             feather_radius={}\n\
             jpeg_quality={}\n\
             draft_dir={}\n\
             log_to_file={}\n",
            self.max_history,
            self.brush_size,
            format_color(self.brush_color),
            self.feather_radius,
            self.jpeg_quality,
            self.draft_dir.display(),
            self.log_to_file,
        )
    }

    /// Save to the default location, creating its directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config())?;
        Ok(())
    }
}
