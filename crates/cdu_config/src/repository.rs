use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;

use crate::component::{ComponentEntry, ComponentParam, ComponentType};
use crate::error::ConfigError;
use crate::settings::Settings;
use crate::task::TaskDescriptor;

fn cache() -> &'static Mutex<HashMap<PathBuf, Arc<ConfigRepository>>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, Arc<ConfigRepository>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Owns everything read out of the four JSON config files for one
/// configuration directory. `load` is idempotent per canonical absolute
/// path: the first caller parses the files, every later caller for the
/// same path gets the same `Arc`.
#[derive(Debug)]
pub struct ConfigRepository {
    pub settings: Settings,
    pub component_params: Vec<ComponentParam>,
    pub tasks: Vec<TaskDescriptor>,
    pub low_frequency_tasks: Vec<TaskDescriptor>,
}

impl ConfigRepository {
    /// Loads (or returns the cached) repository rooted at `config_dir`,
    /// which must contain `settings.json`, `cdu_120kw_component.json`,
    /// `communication_task.json`, and `low_frequency_task.json`.
    pub fn load(config_dir: &Path) -> Result<Arc<Self>, ConfigError> {
        Self::load_with_settings_override(config_dir, None)
    }

    /// Same as [`Self::load`], but reads the settings document from
    /// `settings_override` instead of `<config_dir>/settings.json` when
    /// given (the CLI's `--settings <file>` flag). Bypasses the
    /// path-keyed cache since this is an uncommon, startup-only override.
    pub fn load_with_settings_override(
        config_dir: &Path,
        settings_override: Option<&Path>,
    ) -> Result<Arc<Self>, ConfigError> {
        let canonical = std::fs::canonicalize(config_dir).map_err(|source| ConfigError::Io {
            path: config_dir.to_path_buf(),
            source,
        })?;

        if settings_override.is_none() {
            if let Some(existing) = cache().lock().unwrap().get(&canonical) {
                return Ok(existing.clone());
            }
        }

        let settings_path = match settings_override {
            Some(path) => path.to_path_buf(),
            None => canonical.join("settings.json"),
        };
        let settings = Settings::load(&settings_path)?;
        let component_params = load_components(&canonical.join("cdu_120kw_component.json"))?;
        let tasks = load_tasks(&canonical.join("communication_task.json"))?;
        let low_frequency_tasks = load_tasks(&canonical.join("low_frequency_task.json"))?;

        let repo = Arc::new(Self {
            settings,
            component_params,
            tasks,
            low_frequency_tasks,
        });

        if settings_override.is_none() {
            cache().lock().unwrap().insert(canonical, repo.clone());
        }
        Ok(repo)
    }

    pub fn component(&self, name: &str) -> Option<&ComponentParam> {
        self.component_params.iter().find(|c| c.name == name)
    }

    pub fn components_of(&self, comp_type: ComponentType) -> impl Iterator<Item = &ComponentParam> {
        self.component_params
            .iter()
            .filter(move |c| c.comp_type == comp_type)
    }
}

fn load_components(path: &Path) -> Result<Vec<ComponentParam>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc: Value = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let obj = doc.as_object().ok_or_else(|| ConfigError::MissingField {
        field: format!("{}: top-level JSON object", path.display()),
    })?;

    let mut params = Vec::new();
    for (key, value) in obj {
        let Some(comp_type) = ComponentType::from_array_key(key) else {
            continue;
        };
        let entries: Vec<ComponentEntry> =
            serde_json::from_value(value.clone()).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        for entry in entries {
            params.push(ComponentParam::from_config(entry.name, comp_type, entry.config));
        }
    }
    Ok(params)
}

fn load_tasks(path: &Path) -> Result<Vec<TaskDescriptor>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}
