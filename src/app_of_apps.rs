//! The root app-of-apps chart that installs ArgoCD and points it at every resolved enver.

use crate::argocd::{
    Application, ApplicationDestination, ApplicationSource, HelmSource, SyncPolicy,
    IN_CLUSTER_SERVER,
};
use crate::chart::{Chart, Object};
use crate::resolver::Resolution;

/// Name of the application that deploys ArgoCD itself.
pub const ARGOCD_DEF: &str = "argocd-def";

/// HTTPS clone URL of a CodeCommit repository.
pub fn codecommit_repo_url(region: &str, repository_name: &str) -> String {
    format!("https://git-codecommit.{region}.amazonaws.com/v1/repos/{repository_name}")
}

/// Helm release that installs ArgoCD into the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct HelmRelease {
    pub repository: String,
    pub chart: String,
    pub version: String,
    pub release_name: String,
    pub values: Option<serde_json::Value>,
    /// Existing service account the repo server should run as instead of creating one.
    pub repo_server_service_account: Option<String>,
}

impl HelmRelease {
    /// Chart values, with the repo server pinned to its service account when one is set.
    pub fn values_object(&self) -> Option<serde_json::Value> {
        let Some(name) = &self.repo_server_service_account else {
            return self.values.clone();
        };
        let mut values = match &self.values {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        let repo_server = values
            .entry("repoServer")
            .or_insert_with(|| serde_json::json!({}));
        if !repo_server.is_object() {
            *repo_server = serde_json::json!({});
        }
        repo_server["serviceAccount"] = serde_json::json!({"create": false, "name": name});
        Some(serde_json::Value::Object(values))
    }
}

/// Everything the root chart needs besides the resolved envers.
#[derive(Debug, Clone)]
pub struct AppOfApps {
    /// Chart name, which is also the repository path the seed application syncs from.
    pub name: String,
    /// Namespace ArgoCD runs in.
    pub namespace: String,
    pub repo_url: String,
    pub repo_revision: String,
    pub argocd: HelmRelease,
}

impl AppOfApps {
    /// Assemble the root chart: ArgoCD's own release, the self-referencing
    /// app-of-apps application, then every resolved project and application.
    pub fn chart(&self, resolution: &Resolution) -> Chart {
        let mut chart = Chart::new(self.name.clone(), Some(self.namespace.clone()));
        chart.add(Object::Application(self.argocd_def()));
        chart.add(Object::Application(self.seed()));
        for project in &resolution.projects {
            chart.add(Object::Project(project.as_ref().clone()));
        }
        for application in &resolution.applications {
            chart.add(Object::Application(application.clone()));
        }
        chart
    }

    /// Repository path of the rendered root chart.
    pub fn manifest_path(&self) -> String {
        format!("{}/{}", self.name, crate::chart::MANIFEST_FILE_NAME)
    }

    fn argocd_def(&self) -> Application {
        let mut app = Application::new(ARGOCD_DEF, "default");
        app.spec.source = Some(ApplicationSource {
            repo_url: self.argocd.repository.clone(),
            target_revision: self.argocd.version.clone(),
            chart: Some(self.argocd.chart.clone()),
            helm: Some(HelmSource {
                release_name: self.argocd.release_name.clone(),
                values_object: self.argocd.values_object(),
            }),
            ..Default::default()
        });
        app.spec.destination = Some(self.in_cluster());
        app.spec.sync_policy = Some(SyncPolicy::seed());
        app
    }

    fn seed(&self) -> Application {
        let mut app = Application::new(self.name.clone(), "default");
        app.spec.source = Some(ApplicationSource {
            repo_url: self.repo_url.clone(),
            target_revision: self.repo_revision.clone(),
            path: Some(self.name.clone()),
            ..Default::default()
        });
        app.spec.destination = Some(self.in_cluster());
        app.spec.sync_policy = Some(SyncPolicy::seed());
        app
    }

    fn in_cluster(&self) -> ApplicationDestination {
        ApplicationDestination {
            server: IN_CLUSTER_SERVER.into(),
            namespace: self.namespace.clone(),
        }
    }
}
