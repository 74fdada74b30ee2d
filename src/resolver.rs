//! Derives ArgoCD projects and applications for one cluster from the contracts registry.
//!
//! Derived resources are memoized per enver inside the [`Resolver`], so resolving the
//! same registry twice returns the same projects and keeps fields that were already set
//! on an application, while `source` and `destination` are recomputed every time.

use std::collections::HashMap;
use std::rc::Rc;
use log::debug;
use thiserror::Error;
use crate::argocd::{
    sanitize_name, AppProject, AppProjectSpec, Application, ApplicationDestination,
    ApplicationSource, SyncPolicy,
};
use crate::contracts::{ClusterEnvId, EnverId, OwnedEnver, Registry};

#[derive(Error, Debug)]
pub enum Error {
    #[error("envers {first} and {second} both resolve to application name '{name}'")]
    NameCollision {
        name: String,
        first: EnverId,
        second: EnverId,
    },
}

/// Where generated applications read their manifests from and deploy to.
#[derive(Debug, Clone, PartialEq)]
pub struct GitOpsSource {
    /// Repository holding the rendered manifests of every build.
    pub repo_url: String,
    /// Revision of that repository ArgoCD tracks.
    pub repo_revision: String,
    /// API server of the destination cluster.
    pub server: String,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    /// One project per build, in order of first appearance.
    pub projects: Vec<Rc<AppProject>>,
    /// One application per in-scope enver, in registry order.
    pub applications: Vec<Application>,
}

#[derive(Debug, Default)]
pub struct Resolver {
    build_projects: HashMap<String, Rc<AppProject>>,
    enver_projects: HashMap<EnverId, Rc<AppProject>>,
    applications: HashMap<EnverId, Application>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(
        &mut self,
        registry: &Registry,
        cluster: &ClusterEnvId,
        source: &GitOpsSource,
    ) -> Result<Resolution, Error> {
        let mut projects: Vec<Rc<AppProject>> = Vec::new();
        let mut applications = Vec::new();
        let mut names: HashMap<String, EnverId> = HashMap::new();

        for enver in registry.gitops_envers(cluster) {
            let id = enver.id();
            debug!("Resolving enver {id} for cluster {cluster}");

            let name = match self.applications.get(&id) {
                Some(application) => application.metadata.name.clone(),
                None => application_name(&enver),
            };
            if let Some(first) = names.insert(name.clone(), id.clone()) {
                return Err(Error::NameCollision { name, first, second: id });
            }

            let project = match self.enver_projects.get(&id) {
                Some(project) => project.clone(),
                None => {
                    let project = self.project_for(&enver, source);
                    self.enver_projects.insert(id.clone(), project.clone());
                    project
                }
            };

            let application = self
                .applications
                .entry(id.clone())
                .or_insert_with(|| Application::new(name, project.metadata.name.clone()));

            application.spec.source = Some(ApplicationSource {
                repo_url: source.repo_url.clone(),
                target_revision: source.repo_revision.clone(),
                path: Some(format!("{}/{}", enver.owner.id, enver.enver.target_revision)),
                ..Default::default()
            });
            application.spec.destination = Some(ApplicationDestination {
                namespace: enver.enver.target_revision.to_string(),
                server: source.server.clone(),
            });
            if application.spec.sync_policy.is_none() {
                application.spec.sync_policy = Some(SyncPolicy::gitops_default());
            }

            if !projects.iter().any(|p| Rc::ptr_eq(p, &project)) {
                projects.push(project);
            }
            applications.push(application.clone());
        }

        debug!("Resolved {} projects and {} applications", projects.len(), applications.len());
        Ok(Resolution { projects, applications })
    }

    /// Application previously derived for an enver, if any.
    pub fn application(&self, id: &EnverId) -> Option<&Application> {
        self.applications.get(id)
    }

    /// Mutable access to a derived application, to customise it ahead of the next resolve.
    pub fn application_mut(&mut self, id: &EnverId) -> Option<&mut Application> {
        self.applications.get_mut(id)
    }

    fn project_for(&mut self, enver: &OwnedEnver<'_>, source: &GitOpsSource) -> Rc<AppProject> {
        let revision = &enver.enver.target_revision;
        self.build_projects
            .entry(enver.owner.id.clone())
            .or_insert_with(|| {
                Rc::new(AppProject::new(
                    enver.owner.id.clone(),
                    AppProjectSpec {
                        source_repos: vec![source.repo_url.clone()],
                        destinations: vec![ApplicationDestination {
                            server: source.server.clone(),
                            namespace: format!("{}_{}", revision.kind.as_str(), revision.value),
                        }],
                    },
                ))
            })
            .clone()
    }
}

fn application_name(enver: &OwnedEnver<'_>) -> String {
    sanitize_name(&format!("{}-{}", enver.owner.id, enver.enver.target_revision))
}
