use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::engine::PakType;
use crate::error::{ConfigError, ErrorSlot};
use crate::input::NUM_CONTROLLERS;
use crate::rom::{RomResolver, clear_scratch_dir};

/// Vertical placement of the video output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScreenPosition {
    Top,
    #[default]
    Middle,
    Bottom,
}

impl ScreenPosition {
    pub fn raw(self) -> i32 {
        match self {
            Self::Top => 0,
            Self::Middle => 1,
            Self::Bottom => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerPrefs {
    pub plugged: bool,
    pub pak: PakType,
}

impl Default for ControllerPrefs {
    fn default() -> Self {
        Self {
            plugged: false,
            pak: PakType::MemPak,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Preferences {
    pub selected_game: Option<PathBuf>,
    pub screen_stretch: bool,
    pub screen_position: ScreenPosition,
    pub auto_frameskip: bool,
    pub max_frameskip: i32,
    pub rgba8888: bool,
    /// Explicit hardware profile; negative means auto-detect.
    pub hardware_type: i32,
    pub frame_limiter: bool,
    /// Swaps per FPS estimate; 0 disables the counter.
    pub fps_refresh: u32,
    pub controllers: [ControllerPrefs; NUM_CONTROLLERS],
}

impl Default for Preferences {
    fn default() -> Self {
        let mut controllers = [ControllerPrefs::default(); NUM_CONTROLLERS];
        controllers[0].plugged = true;
        Self {
            selected_game: None,
            screen_stretch: false,
            screen_position: ScreenPosition::default(),
            auto_frameskip: true,
            max_frameskip: 2,
            rgba8888: false,
            hardware_type: -1,
            frame_limiter: true,
            fps_refresh: 15,
            controllers,
        }
    }
}

impl Preferences {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

pub fn default_preferences_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata)
                .join("ultra")
                .join("preferences.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("ultra").join("preferences.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("ultra")
            .join("preferences.toml");
    }

    PathBuf::from("preferences.toml")
}

/// Reads preferences, falling back to defaults when the file is missing or
/// malformed.
pub fn load_from_file(path: &Path) -> Preferences {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return Preferences::default(),
    };

    match Preferences::from_toml_str(&text) {
        Ok(prefs) => prefs,
        Err(e) => {
            warn!("{e} ({}); using defaults", path.display());
            Preferences::default()
        }
    }
}

pub fn save_to_file(path: &Path, prefs: &Preferences) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, prefs.to_toml_string()?)?;
    Ok(())
}

/// Facts about the installation rather than the user's choices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppData {
    pub data_dir: PathBuf,
    /// Auto-detected hardware profile.
    pub hardware_type: i32,
}

/// Where the selected game lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RomSource {
    Plain(PathBuf),
    Archive(PathBuf),
    Missing,
}

/// Outcome of ROM path resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RomPath {
    Ready(PathBuf),
    /// Extracted from an archive into the scratch directory.
    Extracted(PathBuf),
    /// No ROM at the configured path; the session has to end.
    FatalMissing,
    /// The archive held nothing playable; the scratch directory was cleared.
    ExtractionFailed,
}

impl RomPath {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Ready(p) | Self::Extracted(p) => Some(p),
            Self::FatalMissing | Self::ExtractionFailed => None,
        }
    }
}

/// Immutable configuration taken once at session start.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    prefs: Preferences,
    app: AppData,
    cheats: Option<String>,
}

impl ConfigSnapshot {
    pub fn new(prefs: Preferences, app: AppData, cheats: Option<String>) -> Self {
        Self { prefs, app, cheats }
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    pub fn screen_stretch(&self) -> bool {
        self.prefs.screen_stretch
    }

    pub fn screen_position(&self) -> ScreenPosition {
        self.prefs.screen_position
    }

    pub fn auto_frameskip(&self) -> bool {
        self.prefs.auto_frameskip
    }

    pub fn max_frameskip(&self) -> i32 {
        self.prefs.max_frameskip
    }

    pub fn use_rgba8888(&self) -> bool {
        self.prefs.rgba8888
    }

    pub fn hardware_type(&self) -> i32 {
        if self.prefs.hardware_type < 0 {
            self.app.hardware_type
        } else {
            self.prefs.hardware_type
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.app.data_dir
    }

    /// Scratch directory archives are extracted into.
    pub fn scratch_dir(&self) -> PathBuf {
        self.app.data_dir.join("tmp")
    }

    pub fn extra_args(&self) -> String {
        let mut args = String::new();
        if !self.prefs.frame_limiter {
            args.push_str("--nospeedlimit ");
        }
        if let Some(cheats) = &self.cheats {
            args.push_str(cheats);
        }
        args.trim().to_string()
    }

    pub fn classify_rom(&self) -> RomSource {
        let Some(path) = self.prefs.selected_game.as_ref().filter(|p| p.exists()) else {
            return RomSource::Missing;
        };

        let name = path.to_string_lossy();
        if name.len() >= 5 && name.to_lowercase().ends_with(".zip") {
            RomSource::Archive(path.clone())
        } else {
            RomSource::Plain(path.clone())
        }
    }

    /// Resolves the selected game to a playable file.
    ///
    /// Archives are extracted into a freshly cleared scratch directory.
    /// Failures are recorded in `errors` under `OPEN_ROM`.
    pub fn resolve_rom_path(&self, resolver: &dyn RomResolver, errors: &ErrorSlot) -> RomPath {
        match self.classify_rom() {
            RomSource::Missing => RomPath::FatalMissing,
            RomSource::Plain(path) => RomPath::Ready(path),
            RomSource::Archive(archive) => {
                let scratch = self.scratch_dir();
                let extracted = clear_scratch_dir(&scratch)
                    .and_then(|()| resolver.extract_first_rom(&archive, &scratch));
                match extracted {
                    Ok(path) => {
                        info!("rom: extracted {} from {}", path.display(), archive.display());
                        RomPath::Extracted(path)
                    }
                    Err(e) => {
                        warn!("rom: cannot play zipped ROM '{}': {e}", archive.display());
                        errors.set("OPEN_ROM", e.to_string());
                        RomPath::ExtractionFailed
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(prefs: Preferences, cheats: Option<&str>) -> ConfigSnapshot {
        ConfigSnapshot::new(
            prefs,
            AppData {
                data_dir: PathBuf::from("/data"),
                hardware_type: 3,
            },
            cheats.map(str::to_string),
        )
    }

    #[test]
    fn hardware_override_wins_when_non_negative() {
        let mut prefs = Preferences::default();
        assert_eq!(snapshot(prefs.clone(), None).hardware_type(), 3);
        prefs.hardware_type = 0;
        assert_eq!(snapshot(prefs, None).hardware_type(), 0);
    }

    #[test]
    fn extra_args_joins_limiter_flag_and_cheats() {
        let mut prefs = Preferences::default();
        assert_eq!(snapshot(prefs.clone(), None).extra_args(), "");
        assert_eq!(
            snapshot(prefs.clone(), Some("--cheats 1,2 ")).extra_args(),
            "--cheats 1,2"
        );
        prefs.frame_limiter = false;
        assert_eq!(snapshot(prefs.clone(), None).extra_args(), "--nospeedlimit");
        assert_eq!(
            snapshot(prefs, Some("--cheats 4")).extra_args(),
            "--nospeedlimit --cheats 4"
        );
    }

    #[test]
    fn preferences_parse_partial_toml() {
        let prefs = Preferences::from_toml_str(
            r#"
            screen_stretch = true
            screen_position = "bottom"
            hardware_type = 2
            "#,
        )
        .unwrap();
        assert!(prefs.screen_stretch);
        assert_eq!(prefs.screen_position, ScreenPosition::Bottom);
        assert_eq!(prefs.hardware_type, 2);
        assert!(prefs.frame_limiter);
        assert!(prefs.controllers[0].plugged);
    }

    #[test]
    fn missing_rom_is_classified_missing() {
        let mut prefs = Preferences::default();
        assert_eq!(snapshot(prefs.clone(), None).classify_rom(), RomSource::Missing);
        prefs.selected_game = Some(PathBuf::from("/definitely/not/here.z64"));
        assert_eq!(snapshot(prefs, None).classify_rom(), RomSource::Missing);
    }
}
