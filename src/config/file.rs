use std::collections::HashMap;
use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use thiserror::Error;

const DEFAULT_CONFIG: &str = include_str!("../../default.toml");

#[derive(Error, Debug)]
pub enum Error {
    #[error("read {path}: {err}")]
    ReadFile {
        err: std::io::Error,
        path: String,
    },

    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),
}

/// An eks-argo.toml file.
#[derive(Deserialize, Debug, Clone)]
pub struct File {
    pub description: Option<String>,
    pub region: String,
    /// Path to the contracts registry.
    pub contracts: String,
    pub manifests: Manifests,
    pub argocd: Argocd,
    /// Cluster environments, keyed by the name found in the revision reference.
    #[serde(default = "HashMap::new")]
    pub enver: HashMap<String, EnverConfig>,
}

impl Default for File {
    fn default() -> Self {
        // The default config is compiled into the program, so
        // make sure to test default() to catch panics compile-time.
        toml::from_str(DEFAULT_CONFIG).unwrap()
    }
}

impl File {
    /// Built-in defaults overlaid with the user's configuration file.
    pub fn default_with_user_config_file(path: &str) -> Result<Self, Error> {
        let user_config = std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
            err,
            path: path.to_string(),
        })?;
        Self::default_with_user_config(&user_config)
    }

    pub fn default_with_user_config(user_config: &str) -> Result<Self, Error> {
        let mut merged: toml::Table = toml::from_str(DEFAULT_CONFIG)?;
        let user: toml::Table = toml::from_str(user_config)?;
        merge(&mut merged, user);
        Ok(toml::Value::Table(merged).try_into()?)
    }
}

/// Recursively overlay `overlay` onto `base`; tables merge, everything else replaces.
fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge(base_table, overlay_table)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Manifests {
    pub repository_name: String,
    pub branch: String,
    pub staging_dir: String,
    pub app_of_apps: String,
}

/// Helm chart ArgoCD itself is installed from.
#[derive(Deserialize, Debug, Clone)]
pub struct Argocd {
    pub repository: String,
    pub chart: String,
    pub version: String,
    pub values: Option<serde_json::Value>,
}

#[serde_inline_default]
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EnverConfig {
    /// Cluster environment id envers name as their destination.
    pub cluster: String,
    #[serde_inline_default("argocd".to_string())]
    pub argocd_namespace: String,
    #[serde_inline_default("argocd".to_string())]
    pub argocd_release: String,
    /// Service account the ArgoCD repo server runs as, bound to a role that can read the manifest repository.
    #[serde_inline_default("argocd-repo-server".to_string())]
    pub argocd_repo_sa: String,
}
