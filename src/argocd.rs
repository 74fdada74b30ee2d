//! ArgoCD custom resources, as rendered into the app-of-apps manifest.

use serde::{Deserialize, Serialize};

pub const API_VERSION: &str = "argoproj.io/v1alpha1";

/// In-cluster API server, as seen from ArgoCD running inside the cluster.
pub const IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppProject {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: AppProjectSpec,
}

impl AppProject {
    pub fn new(name: impl Into<String>, spec: AppProjectSpec) -> Self {
        Self {
            api_version: API_VERSION.into(),
            kind: "AppProject".into(),
            metadata: ObjectMeta::named(name),
            spec,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppProjectSpec {
    pub source_repos: Vec<String>,
    pub destinations: Vec<ApplicationDestination>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ApplicationSpec,
}

impl Application {
    pub fn new(name: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            api_version: API_VERSION.into(),
            kind: "Application".into(),
            metadata: ObjectMeta::named(name),
            spec: ApplicationSpec {
                project: project.into(),
                source: None,
                destination: None,
                sync_policy: None,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ApplicationSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ApplicationDestination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<SyncPolicy>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub target_revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmSource>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HelmSource {
    pub release_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_object: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApplicationDestination {
    pub server: String,
    pub namespace: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automated: Option<AutomatedSync>,
}

impl SyncPolicy {
    /// Policy for applications generated from envers: namespaces are created on demand,
    /// and the controller prunes, allows empty state and self-heals.
    pub fn gitops_default() -> Self {
        Self {
            sync_options: vec!["CreateNamespace=true".into(), "Replace=true".into()],
            automated: Some(AutomatedSync {
                prune: true,
                allow_empty: true,
                self_heal: true,
            }),
        }
    }

    /// Manual sync into a namespace that must already exist.
    pub fn seed() -> Self {
        Self {
            sync_options: vec!["CreateNamespace=false".into(), "Replace=true".into()],
            automated: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AutomatedSync {
    pub prune: bool,
    pub allow_empty: bool,
    pub self_heal: bool,
}

/// Strip every character outside `[a-z0-9-]`. Nothing is replaced, so distinct
/// inputs may collapse onto the same name.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}
