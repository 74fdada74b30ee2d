//! Rendering of charts into the staging directory.
//!
//! Every chart is first written as `<staging>/<chart>.k8s.yaml`, then moved into its own
//! folder as `<staging>/<chart>/manifest.yaml`, which is the layout the manifest
//! repository expects.

use std::io::Write;
use std::path::{Path, PathBuf};
use log::debug;
use serde::Serialize;
use thiserror::Error;
use crate::argocd::{AppProject, Application, ObjectMeta};

pub const OUTPUT_FILE_EXTENSION: &str = ".k8s.yaml";
pub const MANIFEST_FILE_NAME: &str = "manifest.yaml";

#[derive(Error, Debug)]
pub enum Error {
    #[error("filesystem error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("persist {path}: {err}")]
    Persist {
        err: tempfile::PersistError,
        path: String,
    },

    #[error("serialize: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// A Kubernetes object a chart can hold.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Object {
    Project(AppProject),
    Application(Application),
}

impl Object {
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Object::Project(p) => &mut p.metadata,
            Object::Application(a) => &mut a.metadata,
        }
    }
}

/// A named group of objects rendered into a single manifest file.
#[derive(Debug, Clone)]
pub struct Chart {
    pub name: String,
    /// Applied to every object that has no namespace of its own.
    pub namespace: Option<String>,
    objects: Vec<Object>,
}

impl Chart {
    pub fn new(name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            name: name.into(),
            namespace,
            objects: vec![],
        }
    }

    pub fn add(&mut self, object: Object) {
        self.objects.push(object);
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    /// Multi-document YAML of all objects, in insertion order.
    pub fn to_yaml(&self) -> Result<String, Error> {
        let mut documents = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            let mut object = object.clone();
            let metadata = object.metadata_mut();
            if metadata.namespace.is_none() {
                metadata.namespace = self.namespace.clone();
            }
            documents.push(serde_yaml::to_string(&object)?);
        }
        Ok(documents.join("---\n"))
    }
}

/// Render `charts` into a freshly emptied `staging_dir` and return the path of
/// every chart's manifest.
pub fn synth(charts: &[Chart], staging_dir: &Path) -> Result<Vec<PathBuf>, Error> {
    if staging_dir.exists() {
        debug!("Removing previous staging directory {}", staging_dir.display());
        std::fs::remove_dir_all(staging_dir)?;
    }
    std::fs::create_dir_all(staging_dir)?;

    for chart in charts {
        let path = staging_dir.join(format!("{}{}", chart.name, OUTPUT_FILE_EXTENSION));
        let mut file = tempfile::NamedTempFile::new_in(staging_dir)?;
        file.write_all(chart.to_yaml()?.as_bytes())?;
        file.persist(&path).map_err(|err| Error::Persist {
            err,
            path: path.display().to_string(),
        })?;
        debug!("Wrote chart {} to {}", chart.name, path.display());
    }

    restructure(staging_dir)
}

/// Move every `<name>.k8s.yaml` in `staging_dir` to `<name>/manifest.yaml`.
pub fn restructure(staging_dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut manifests = vec![];
    for entry in std::fs::read_dir(staging_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(chart_name) = file_name.strip_suffix(OUTPUT_FILE_EXTENSION) else {
            continue;
        };
        let folder = staging_dir.join(chart_name);
        std::fs::create_dir(&folder)?;
        let manifest = folder.join(MANIFEST_FILE_NAME);
        std::fs::rename(entry.path(), &manifest)?;
        manifests.push(manifest);
    }
    manifests.sort();
    Ok(manifests)
}
