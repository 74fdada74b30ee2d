use std::path::PathBuf;
use thiserror::Error;
use crate::app_of_apps::{codecommit_repo_url, AppOfApps, HelmRelease};
use crate::argocd::IN_CLUSTER_SERVER;
use crate::config::file::File;
use crate::contracts::{self, ClusterEnvId, TargetRevision};
use crate::resolver::GitOpsSource;

#[derive(Error, Debug)]
pub enum Error {
    #[error("revision reference: {0}")]
    RevisionReference(#[from] contracts::Error),

    #[error("no [enver.{0}] section in configuration")]
    UnknownEnver(String),
}

/// Fully resolved configuration for the cluster environment being provisioned.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the cluster environment, taken from the revision reference.
    pub enver_name: String,
    pub cluster: ClusterEnvId,
    pub region: String,
    pub contracts: String,
    pub repository_name: String,
    pub branch: String,
    pub staging_dir: PathBuf,
    pub app_of_apps: AppOfApps,
}

impl Config {
    /// `rev_ref` names the cluster environment, e.g. `b..odmdSbxUsw1Gyang@1a2b3c`.
    pub fn new(file: &File, rev_ref: &str, region_override: Option<String>) -> Result<Self, Error> {
        let enver_name = enver_name(rev_ref)?;
        let enver = file
            .enver
            .get(&enver_name)
            .ok_or_else(|| Error::UnknownEnver(enver_name.clone()))?;

        let region = region_override.unwrap_or_else(|| file.region.clone());
        let repo_url = codecommit_repo_url(&region, &file.manifests.repository_name);

        Ok(Self {
            cluster: ClusterEnvId(enver.cluster.clone()),
            contracts: file.contracts.clone(),
            repository_name: file.manifests.repository_name.clone(),
            branch: file.manifests.branch.clone(),
            staging_dir: PathBuf::from(&file.manifests.staging_dir),
            app_of_apps: AppOfApps {
                name: file.manifests.app_of_apps.clone(),
                namespace: enver.argocd_namespace.clone(),
                repo_url,
                repo_revision: file.manifests.branch.clone(),
                argocd: HelmRelease {
                    repository: file.argocd.repository.clone(),
                    chart: file.argocd.chart.clone(),
                    version: file.argocd.version.clone(),
                    release_name: enver.argocd_release.clone(),
                    values: file.argocd.values.clone(),
                    repo_server_service_account: Some(enver.argocd_repo_sa.clone()),
                },
            },
            region,
            enver_name,
        })
    }

    /// Where applications derived from envers pull their manifests from.
    pub fn gitops_source(&self) -> GitOpsSource {
        GitOpsSource {
            repo_url: self.app_of_apps.repo_url.clone(),
            repo_revision: self.branch.clone(),
            server: IN_CLUSTER_SERVER.into(),
        }
    }

    /// Staged manifest of the root chart.
    pub fn app_of_apps_manifest(&self) -> PathBuf {
        self.staging_dir
            .join(&self.app_of_apps.name)
            .join(crate::chart::MANIFEST_FILE_NAME)
    }
}

/// Name of the cluster environment in a revision reference: anything after `@` is
/// ignored and the rest must be a revision such as `b..odmdSbxUsw1Gyang`.
pub fn enver_name(rev_ref: &str) -> Result<String, contracts::Error> {
    let revision = rev_ref.split('@').next().unwrap_or(rev_ref);
    Ok(revision.parse::<TargetRevision>()?.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enver_name_from_revision_reference() {
        assert_eq!(enver_name("b..odmdSbxUsw1Gyang").unwrap(), "odmdSbxUsw1Gyang");
        assert_eq!(enver_name("b..odmdSbxUsw1Gyang@4f2a9c").unwrap(), "odmdSbxUsw1Gyang");
        assert_eq!(enver_name("t..v1").unwrap(), "v1");
        assert!(enver_name("odmdSbxUsw1Gyang").is_err());
    }

    #[test]
    fn runtime_config_from_default_file() {
        let cfg = Config::new(&File::default(), "b..odmdSbxUsw1Gyang", None).unwrap();
        assert_eq!(cfg.enver_name, "odmdSbxUsw1Gyang");
        assert_eq!(cfg.cluster, ClusterEnvId("odmdSbxUsw1Gyang".into()));
        assert_eq!(cfg.app_of_apps.namespace, "argocd");
        assert_eq!(cfg.app_of_apps.argocd.release_name, "gyang");
        assert_eq!(
            cfg.app_of_apps.argocd.repo_server_service_account.as_deref(),
            Some("argocd-repo-server")
        );
        assert_eq!(
            cfg.app_of_apps.repo_url,
            "https://git-codecommit.us-west-1.amazonaws.com/v1/repos/argocd-manifests"
        );
        assert_eq!(cfg.app_of_apps_manifest(), PathBuf::from("dist/app-of-apps/manifest.yaml"));
        assert_eq!(cfg.gitops_source().server, IN_CLUSTER_SERVER);
    }

    #[test]
    fn region_override_changes_repo_url() {
        let cfg = Config::new(&File::default(), "b..odmdSbxUsw1Gyang", Some("eu-west-1".into())).unwrap();
        assert_eq!(cfg.region, "eu-west-1");
        assert!(cfg.app_of_apps.repo_url.starts_with("https://git-codecommit.eu-west-1."));
    }

    #[test]
    fn unknown_enver() {
        let result = Config::new(&File::default(), "b..nowhere", None);
        assert!(matches!(result, Err(Error::UnknownEnver(name)) if name == "nowhere"));
    }
}
