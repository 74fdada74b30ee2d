use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use serde::Deserialize;
use thiserror::Error;
use Error::*;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed target revision '{0}', expected '<b|t>..<name>'")]
    MalformedRevision(String),

    #[error("build '{0}' is declared more than once")]
    DuplicateBuild(String),

    #[error("enver {0} is declared more than once for the same cluster")]
    DuplicateEnver(EnverId),

    #[error("enver {0} deploys through ArgoCD but names no cluster")]
    MissingCluster(EnverId),

    #[error("read {path}: {err}")]
    ReadFile {
        err: std::io::Error,
        path: String,
    },

    #[error("parse registry: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Whether a revision refers to a branch or a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevisionType {
    Branch,
    Tag,
}

impl RevisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionType::Branch => "b",
            RevisionType::Tag => "t",
        }
    }
}

/// Source revision an enver is built from, written as `b..main` or `t..v1.2.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct TargetRevision {
    pub kind: RevisionType,
    pub value: String,
}

impl TargetRevision {
    pub fn branch(value: impl Into<String>) -> Self {
        Self { kind: RevisionType::Branch, value: value.into() }
    }

    pub fn tag(value: impl Into<String>) -> Self {
        Self { kind: RevisionType::Tag, value: value.into() }
    }
}

impl FromStr for TargetRevision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s.split_once("..").ok_or_else(|| MalformedRevision(s.to_string()))?;
        let kind = match kind {
            "b" => RevisionType::Branch,
            "t" => RevisionType::Tag,
            _ => return Err(MalformedRevision(s.to_string())),
        };
        if value.is_empty() {
            return Err(MalformedRevision(s.to_string()));
        }
        Ok(Self { kind, value: value.to_string() })
    }
}

impl TryFrom<String> for TargetRevision {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for TargetRevision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.kind.as_str(), self.value)
    }
}

/// Opaque identifier of one cluster environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct ClusterEnvId(pub String);

impl Display for ClusterEnvId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of an enver: `<build>/<revision>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnverId(String);

impl EnverId {
    pub fn new(build_id: &str, revision: &TargetRevision) -> Self {
        Self(format!("{build_id}/{revision}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EnverId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnverKind {
    /// Image built from ECR and deployed onto an EKS cluster by ArgoCD.
    EksArgo,
    /// Any enver that is not deployed through this cluster's ArgoCD.
    #[serde(other)]
    Other,
}

/// One deployment target of a build.
#[derive(Debug, Clone, Deserialize)]
pub struct Enver {
    pub kind: EnverKind,
    pub target_revision: TargetRevision,
    #[serde(default)]
    pub cluster: Option<ClusterEnvId>,
}

impl Enver {
    pub fn deploys_to(&self, cluster: &ClusterEnvId) -> bool {
        self.kind == EnverKind::EksArgo && self.cluster.as_ref() == Some(cluster)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Build {
    pub id: String,
    #[serde(default, rename = "enver")]
    pub envers: Vec<Enver>,
}

/// An enver together with the build that owns it.
#[derive(Debug, Clone, Copy)]
pub struct OwnedEnver<'a> {
    pub owner: &'a Build,
    pub enver: &'a Enver,
}

impl<'a> OwnedEnver<'a> {
    pub fn id(&self) -> EnverId {
        EnverId::new(&self.owner.id, &self.enver.target_revision)
    }
}

/// All builds known to this provisioning run.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    builds: Vec<Build>,
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default, rename = "build")]
    builds: Vec<Build>,
}

impl Registry {
    pub fn new(builds: Vec<Build>) -> Result<Self, Error> {
        let mut seen = HashSet::new();
        for build in &builds {
            if !seen.insert(build.id.as_str()) {
                return Err(DuplicateBuild(build.id.clone()));
            }
            let mut envers = HashSet::new();
            for enver in &build.envers {
                let id = EnverId::new(&build.id, &enver.target_revision);
                if enver.kind != EnverKind::EksArgo {
                    continue;
                }
                if enver.cluster.is_none() {
                    return Err(MissingCluster(id));
                }
                if !envers.insert((&enver.target_revision, enver.cluster.as_ref())) {
                    return Err(DuplicateEnver(id));
                }
            }
        }
        Ok(Self { builds })
    }

    pub fn parse(toml_string: &str) -> Result<Self, Error> {
        let file: RegistryFile = toml::from_str(toml_string)?;
        Self::new(file.builds)
    }

    pub fn parse_file(path: &str) -> Result<Self, Error> {
        Self::parse(
            &std::fs::read_to_string(path).map_err(|err| ReadFile {
                err,
                path: path.to_string(),
            })?
        )
    }

    pub fn builds(&self) -> &[Build] {
        &self.builds
    }

    /// Envers deployed by ArgoCD onto `cluster`, in build order and then enver order.
    pub fn gitops_envers<'a>(&'a self, cluster: &'a ClusterEnvId) -> impl Iterator<Item = OwnedEnver<'a>> + 'a {
        self.builds.iter().flat_map(move |owner| {
            owner.envers
                .iter()
                .filter(move |enver| enver.deploys_to(cluster))
                .map(move |enver| OwnedEnver { owner, enver })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"
[[build]]
id = "orders"

[[build.enver]]
kind = "eks-argo"
target_revision = "b..main"
cluster = "sandbox"

[[build.enver]]
kind = "lambda"
target_revision = "b..dev"

[[build]]
id = "billing"

[[build.enver]]
kind = "eks-argo"
target_revision = "t..v1.2.0"
cluster = "production"

[[build.enver]]
kind = "eks-argo"
target_revision = "b..dev"
cluster = "sandbox"
"#;

    #[test]
    fn parse_target_revision() {
        assert_eq!("b..main".parse::<TargetRevision>().unwrap(), TargetRevision::branch("main"));
        assert_eq!("t..v1.0".parse::<TargetRevision>().unwrap(), TargetRevision::tag("v1.0"));
        assert_eq!(TargetRevision::branch("feature..x").to_string(), "b..feature..x");
        assert!(matches!("main".parse::<TargetRevision>(), Err(MalformedRevision(_))));
        assert!(matches!("x..main".parse::<TargetRevision>(), Err(MalformedRevision(_))));
        assert!(matches!("b..".parse::<TargetRevision>(), Err(MalformedRevision(_))));
    }

    #[test]
    fn filters_envers_by_cluster_in_registry_order() {
        let registry = Registry::parse(REGISTRY).unwrap();
        let sandbox = ClusterEnvId("sandbox".into());
        let ids: Vec<_> = registry.gitops_envers(&sandbox).map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["orders/b..main", "billing/b..dev"]);
    }

    #[test]
    fn unknown_kinds_are_never_in_scope() {
        let registry = Registry::parse(REGISTRY).unwrap();
        let orders = &registry.builds()[0];
        assert_eq!(orders.envers[1].kind, EnverKind::Other);
        assert!(!orders.envers[1].deploys_to(&ClusterEnvId("sandbox".into())));
    }

    #[test]
    fn rejects_duplicate_builds() {
        let result = Registry::parse("[[build]]\nid = \"a\"\n[[build]]\nid = \"a\"\n");
        assert!(matches!(result, Err(DuplicateBuild(id)) if id == "a"));
    }

    #[test]
    fn rejects_duplicate_envers_of_one_build() {
        let enver = Enver {
            kind: EnverKind::EksArgo,
            target_revision: TargetRevision::branch("main"),
            cluster: Some(ClusterEnvId("sandbox".into())),
        };
        let result = Registry::new(vec![Build {
            id: "orders".into(),
            envers: vec![enver.clone(), enver],
        }]);
        assert!(matches!(result, Err(DuplicateEnver(id)) if id.as_str() == "orders/b..main"));
    }

    #[test]
    fn same_revision_on_two_clusters_is_allowed() {
        let toml = "[[build]]\nid = \"a\"\n\
            [[build.enver]]\nkind = \"eks-argo\"\ntarget_revision = \"b..main\"\ncluster = \"c1\"\n\
            [[build.enver]]\nkind = \"eks-argo\"\ntarget_revision = \"b..main\"\ncluster = \"c2\"\n";
        assert_eq!(Registry::parse(toml).unwrap().builds()[0].envers.len(), 2);
    }

    #[test]
    fn rejects_argo_enver_without_cluster() {
        let toml = "[[build]]\nid = \"a\"\n[[build.enver]]\nkind = \"eks-argo\"\ntarget_revision = \"b..main\"\n";
        assert!(matches!(Registry::parse(toml), Err(MissingCluster(_))));
    }

    #[test]
    fn rejects_malformed_revision_on_load() {
        let toml = "[[build]]\nid = \"a\"\n[[build.enver]]\nkind = \"eks-argo\"\ntarget_revision = \"main\"\ncluster = \"c\"\n";
        assert!(matches!(Registry::parse(toml), Err(Parse(_))));
    }
}
