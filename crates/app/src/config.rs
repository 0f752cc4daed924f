//! Settings file handling and default locations.

use anyhow::{bail, Context, Result};
use shared::settings::{BackendConfig, ChatSettings};
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";
const SQLITE_FILE: &str = "sidechat.db";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com.local", "Sidechat", "Sidechat")
}

pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|p| p.config_dir().join(SETTINGS_FILE))
}

pub fn default_sqlite_path() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().join(SQLITE_FILE))
        .unwrap_or_else(|| PathBuf::from(SQLITE_FILE))
}

/// Where the effective settings came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsSource {
    Loaded,
    Missing,
    /// The file exists but could not be read or parsed; defaults are in use.
    Invalid,
}

/// Reads settings from `path`, falling back to the defaults when there is no
/// usable file.
pub fn load_settings_or_default(path: &Path) -> (ChatSettings, SettingsSource) {
    let source = match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<ChatSettings>(&contents) {
            Ok(settings) => return (settings, SettingsSource::Loaded),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "ignoring unreadable settings file"
                );
                SettingsSource::Invalid
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => SettingsSource::Missing,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read settings file");
            SettingsSource::Invalid
        }
    };
    (ChatSettings::default(), source)
}

pub fn save_settings(settings: &ChatSettings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Creates the settings file from `settings`. Refuses to touch a file that
/// already exists, even one that failed to parse.
pub fn write_defaults(settings: &ChatSettings, source: SettingsSource, path: &Path) -> Result<()> {
    match source {
        SettingsSource::Missing => save_settings(settings, path),
        SettingsSource::Loaded => bail!("{} already exists", path.display()),
        SettingsSource::Invalid => bail!(
            "{} exists but could not be parsed; fix or remove it first",
            path.display()
        ),
    }
}

/// Settings as JSON with inline API keys masked.
pub fn redacted_json(settings: &ChatSettings) -> Result<String> {
    let mut shown = settings.clone();
    mask_key(&mut shown.text);
    mask_key(&mut shown.multimodal);
    Ok(serde_json::to_string_pretty(&shown)?)
}

fn mask_key(backend: &mut BackendConfig) {
    if let Some(key) = backend.api_key.as_mut() {
        let tail: String = key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        *key = format!("****{}", tail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let (settings, source) = load_settings_or_default(&dir.path().join("settings.json"));
        assert_eq!(source, SettingsSource::Missing);
        assert_eq!(settings, ChatSettings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("settings.json");
        let mut settings = ChatSettings::default();
        settings.history_limit = 6;
        settings.store.persist_inline_data = true;
        save_settings(&settings, &path).unwrap();

        let (loaded, source) = load_settings_or_default(&path);
        assert_eq!(source, SettingsSource::Loaded);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        let (settings, source) = load_settings_or_default(&path);
        assert_eq!(source, SettingsSource::Invalid);
        assert_eq!(settings.history_limit, 20);
    }

    #[test]
    fn test_write_defaults_only_when_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let broken = r#"{"text": {"apiKey": "sk-mine", "#;
        std::fs::write(&path, broken).unwrap();

        let (settings, source) = load_settings_or_default(&path);
        let err = write_defaults(&settings, source, &path).unwrap_err();
        assert!(err.to_string().contains("could not be parsed"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), broken);

        let fresh = dir.path().join("fresh.json");
        let (settings, source) = load_settings_or_default(&fresh);
        write_defaults(&settings, source, &fresh).unwrap();
        assert_eq!(load_settings_or_default(&fresh).1, SettingsSource::Loaded);

        let (settings, source) = load_settings_or_default(&fresh);
        assert!(write_defaults(&settings, source, &fresh).is_err());
    }

    #[test]
    fn test_keys_are_masked() {
        let mut settings = ChatSettings::default();
        settings.text.api_key = Some("sk-abcdef123456".into());
        let json = redacted_json(&settings).unwrap();
        assert!(json.contains("****3456"));
        assert!(!json.contains("sk-abcdef"));
    }
}
