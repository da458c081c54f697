//! Layered configuration loading.
//!
//! Sources are merged key by key, later layers winning:
//! built-in defaults, the user file, `palisade.toml`, `palisade.local.toml`,
//! then `PALISADE_*` variables. Arrays such as `catalog.resources` are
//! replaced wholesale by the layer that sets them, never concatenated.
//! The merged result is validated before it is returned.

use crate::{PalisadeConfig, Paths};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Keys whose environment value is a comma-separated list.
const LIST_KEYS: [&str; 1] = ["network.trusted_networks"];

pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    env_vars: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Loader rooted at the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "PALISADE".to_string(),
            env_vars: None,
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "PALISADE")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Read overrides from `vars` instead of the process environment.
    /// Names still carry the prefix, e.g. `PALISADE_CACHE__CAPACITY`.
    pub fn with_env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env_vars = Some(vars);
        self
    }

    /// Files consulted, lowest precedence first. Missing files are skipped.
    fn layer_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::with_capacity(3);
        if let Ok(user_file) = Paths::new().user_config_file() {
            files.push(user_file);
        }
        files.push(Paths::project_config_file(&self.project_dir));
        files.push(Paths::local_config_file(&self.project_dir));
        files.retain(|file| file.exists());
        files
    }

    pub fn load(self) -> Result<PalisadeConfig> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&PalisadeConfig::default())?);

        for file in self.layer_files() {
            builder = builder.add_source(
                config::File::from(file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        let mut environment = config::Environment::with_prefix(&self.env_prefix)
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .try_parsing(true)
            .source(self.env_vars.clone());
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }
        builder = builder.add_source(environment);

        let mut config: PalisadeConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config
            .validate()
            .context("Configuration failed validation")?;
        config.resolve_paths(&self.project_dir);

        Ok(config)
    }

    /// Defaults when loading or validation fails.
    pub fn load_or_default(self) -> PalisadeConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
