//! Bootstrap of the ArgoCD app-of-apps for an EKS cluster environment.
//!
//! 1. load the contracts registry of builds and their envers
//! 2. resolve the ArgoCD projects and applications targeting this cluster
//! 3. render them, together with ArgoCD's own release, into the staging directory
//! 4. commit the root manifest into the manifest repository, idempotently

pub mod app_of_apps;
pub mod argocd;
pub mod chart;
pub mod config;
pub mod contracts;
pub mod publisher;
pub mod repository;
pub mod resolver;
