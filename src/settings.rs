// ============================================================================
// READBACK SETTINGS — persisted `key=value` configuration
// ============================================================================

use std::path::PathBuf;

use crate::gpu::ring::clamp_depth;

/// Settings read once when a reader is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadbackSettings {
    /// Requested transfer-buffer depth.  Clamped to `[1, MAX_TRANSFER_BUFFERS]`
    /// when the ring is created; stored as written.
    pub transfer_depth: u32,
    /// Default read mode: `true` = always return the newest frame.
    pub sync_reads: bool,
    /// Preferred GPU adapter ("Auto", "integrated", "discrete").
    pub preferred_gpu: String,
    /// Skip the hardware adapter and use the software rasterizer.
    pub force_software: bool,
}

impl Default for ReadbackSettings {
    fn default() -> Self {
        Self {
            transfer_depth: 2,
            sync_reads: false,
            preferred_gpu: "Auto".to_string(),
            force_software: false,
        }
    }
}

impl ReadbackSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/pixeltap/pixeltap_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\PixelTap\pixeltap_settings.cfg
    /// On macOS:   ~/Library/Application Support/PixelTap/pixeltap_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("pixeltap");
            return Some(config_dir.join("pixeltap_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("PixelTap").join("pixeltap_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("PixelTap")
                    .join("pixeltap_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("pixeltap_settings.cfg")))
        }
    }

    /// Transfer depth as the ring will use it.
    pub fn effective_depth(&self) -> usize {
        clamp_depth(self.transfer_depth)
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "transfer_depth={}\n\
             sync_reads={}\n\
             preferred_gpu={}\n\
             force_software={}\n",
            self.transfer_depth, self.sync_reads, self.preferred_gpu, self.force_software,
        )
    }

    /// Parse settings text.  Unknown keys are ignored and unparsable values
    /// keep their defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "transfer_depth" => {
                    s.transfer_depth = val.parse().unwrap_or(s.transfer_depth);
                }
                "sync_reads" => {
                    s.sync_reads = val == "true";
                }
                "preferred_gpu" => {
                    s.preferred_gpu = val.to_string();
                }
                "force_software" => {
                    s.force_software = val == "true";
                }
                _ => {}
            }
        }
        s
    }

    /// Save settings to disk.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::settings_path() else { return Ok(()) };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    /// Load settings from disk (returns default if file missing or corrupt).
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }
}
