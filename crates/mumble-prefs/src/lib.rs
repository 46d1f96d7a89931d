use mumble_core::{ChannelId, TreeLayout};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SETTINGS_PREFIX: &str = "mumble_sidebar.";
pub const TREE_LAYOUT_KEY: &str = "tree_layout";

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("preferences io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("preferences parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("preferences serialize error: {0}")]
    Serialize(String),
}

/// String key-value persistence. Keys passed in are unprefixed; backends
/// store them under [`SETTINGS_PREFIX`].
pub trait PreferenceStore {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), PrefsError>;

    fn string_setting(&self, key: &str, default_value: &str) -> String {
        self.get(key).unwrap_or_else(|| default_value.to_string())
    }

    fn bool_setting(&self, key: &str, default_value: bool) -> bool {
        match self.get(key) {
            Some(value) => value == "true",
            None => default_value,
        }
    }

    /// Collapse state of one channel; channels start expanded.
    fn channel_collapsed(&self, channel_id: ChannelId) -> bool {
        self.bool_setting(&collapsed_key(channel_id), false)
    }

    fn set_channel_collapsed(
        &mut self,
        channel_id: ChannelId,
        collapsed: bool,
    ) -> Result<(), PrefsError> {
        let value = if collapsed { "true" } else { "false" };
        self.set(&collapsed_key(channel_id), value)
    }

    /// Selected layout; missing or unreadable values fall back to FULL.
    fn tree_layout(&self) -> TreeLayout {
        self.get(TREE_LAYOUT_KEY)
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }

    fn set_tree_layout(&mut self, layout: TreeLayout) -> Result<(), PrefsError> {
        self.set(TREE_LAYOUT_KEY, layout.as_str())
    }
}

pub fn collapsed_key(channel_id: ChannelId) -> String {
    format!("channel_collapsed.{channel_id}")
}

fn prefixed(key: &str) -> String {
    format!("{SETTINGS_PREFIX}{key}")
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    values: BTreeMap<String, String>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(&prefixed(key)).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PrefsError> {
        self.values.insert(prefixed(key), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PrefsFile {
    #[serde(default)]
    settings: BTreeMap<String, String>,
}

/// Preferences persisted as a TOML table, rewritten on every change.
#[derive(Debug, Clone)]
pub struct TomlPreferences {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl TomlPreferences {
    /// A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                values: BTreeMap::new(),
            });
        }
        let contents = fs::read_to_string(&path).map_err(|source| PrefsError::Io {
            path: path.clone(),
            source,
        })?;
        let file: PrefsFile = toml::from_str(&contents).map_err(|err| PrefsError::Parse {
            path: path.clone(),
            message: err.to_string(),
        })?;
        Ok(Self {
            path,
            values: file.settings,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), PrefsError> {
        let file = PrefsFile {
            settings: self.values.clone(),
        };
        let contents =
            toml::to_string_pretty(&file).map_err(|err| PrefsError::Serialize(err.to_string()))?;
        write_atomic(&self.path, &contents)
    }
}

impl PreferenceStore for TomlPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(&prefixed(key)).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PrefsError> {
        let previous = self.values.insert(prefixed(key), value.to_string());
        if previous.as_deref() == Some(value) {
            return Ok(());
        }
        self.save()
    }
}

impl<T: PreferenceStore + ?Sized> PreferenceStore for Box<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PrefsError> {
        (**self).set(key, value)
    }
}

fn write_atomic(path: &Path, payload: &str) -> Result<(), PrefsError> {
    let io_error = |path: &Path, source: std::io::Error| PrefsError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
        }
    }

    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };

    fs::write(&temp_path, payload).map_err(|err| io_error(&temp_path, err))?;
    fs::rename(&temp_path, path).map_err(|err| io_error(path, err))?;
    Ok(())
}
