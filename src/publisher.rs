//! Custom resource handler that commits a generated manifest into a repository.
//!
//! Publishing is idempotent: a missing branch means the file is written without a parent
//! commit, and a write that would not change the file counts as success. Deleting the
//! resource leaves the file in place.

use std::time::Duration;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::repository::{PutFile, Repository, RepositoryError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid resource properties: {0}")]
    Properties(serde_json::Error),

    #[error("read {path} on {branch}: {err}")]
    Read {
        err: RepositoryError,
        branch: String,
        path: String,
    },

    #[error("write {path} on {branch}: {err}")]
    Write {
        err: RepositoryError,
        branch: String,
        path: String,
    },

    #[error("serialize response: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("send response: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("response rejected with status code {0}")]
    ResponseStatus(u16),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

/// Lifecycle event sent by the provisioning system.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleRequest {
    pub request_type: RequestType,
    /// Pre-signed URL the response is PUT to, when not running behind a provider framework.
    #[serde(rename = "ResponseURL", default, skip_serializing_if = "Option::is_none")]
    pub response_url: Option<String>,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: serde_json::Value,
}

impl LifecycleRequest {
    /// Physical id of the published file: stable for a given stack and logical resource.
    pub fn derived_physical_id(&self) -> String {
        format!("{}{}", self.stack_id, self.logical_resource_id)
    }
}

/// What to write where.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestProperties {
    pub repository_name: String,
    pub file_path: String,
    pub branch: String,
    pub file_content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Success,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
}

impl LifecycleResponse {
    pub fn success(request: &LifecycleRequest, physical_resource_id: String) -> Self {
        Self {
            status: Status::Success,
            reason: None,
            physical_resource_id,
            stack_id: request.stack_id.clone(),
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
        }
    }

    pub fn failed(request: &LifecycleRequest, reason: impl Into<String>) -> Self {
        let physical_resource_id = request
            .physical_resource_id
            .clone()
            .unwrap_or_else(|| request.derived_physical_id());
        Self {
            status: Status::Failed,
            reason: Some(reason.into()),
            ..Self::success(request, physical_resource_id)
        }
    }
}

/// Result of publishing a file.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A new commit was made.
    Committed(String),
    /// The repository already held identical content.
    Unchanged,
}

pub struct Publisher<R> {
    repository: R,
}

impl<R: Repository> Publisher<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub async fn handle(&self, request: &LifecycleRequest) -> Result<LifecycleResponse, Error> {
        match request.request_type {
            RequestType::Delete => {
                info!("Delete of {} leaves the published file in place", request.logical_resource_id);
                let physical_resource_id = request
                    .physical_resource_id
                    .clone()
                    .unwrap_or_else(|| request.logical_resource_id.clone());
                Ok(LifecycleResponse::success(request, physical_resource_id))
            }
            RequestType::Create | RequestType::Update => {
                let properties: ManifestProperties =
                    serde_json::from_value(request.resource_properties.clone()).map_err(Error::Properties)?;
                self.publish(&properties).await?;
                Ok(LifecycleResponse::success(request, request.derived_physical_id()))
            }
        }
    }

    pub async fn publish(&self, properties: &ManifestProperties) -> Result<Outcome, Error> {
        let ManifestProperties { repository_name, file_path, branch, file_content } = properties;
        info!(
            "Publishing {file_path} to {repository_name}:{branch} (sha256 {})",
            sha256::digest(file_content.as_str())
        );

        let parent_commit_id = self.parent_commit(properties).await?;
        debug!("Parent commit: {parent_commit_id:?}");

        let result = self
            .repository
            .put_file(PutFile {
                repository: repository_name,
                branch,
                path: file_path,
                content: file_content.as_bytes(),
                parent_commit_id: parent_commit_id.as_deref(),
                commit_message: format!("Update {file_path} at {}", chrono::Utc::now().to_rfc3339()),
            })
            .await;

        match result {
            Ok(commit_id) => {
                info!("Committed {file_path} as {commit_id}");
                Ok(Outcome::Committed(commit_id))
            }
            Err(RepositoryError::SameFileContent(_)) => {
                warn!("{file_path} on {branch} already has this content, nothing to commit");
                Ok(Outcome::Unchanged)
            }
            Err(err) => Err(Error::Write {
                err,
                branch: branch.clone(),
                path: file_path.clone(),
            }),
        }
    }

    /// Commit the write has to build on, `None` when the branch does not exist yet.
    async fn parent_commit(&self, properties: &ManifestProperties) -> Result<Option<String>, Error> {
        let read_error = |err: RepositoryError| Error::Read {
            err,
            branch: properties.branch.clone(),
            path: properties.file_path.clone(),
        };

        match self
            .repository
            .get_file(&properties.repository_name, &properties.branch, &properties.file_path)
            .await
        {
            Ok(file) => Ok(Some(file.commit_id)),
            Err(RepositoryError::BranchDoesNotExist(_)) | Err(RepositoryError::CommitDoesNotExist(_)) => Ok(None),
            Err(RepositoryError::FileDoesNotExist(_)) => self
                .repository
                .branch_head(&properties.repository_name, &properties.branch)
                .await
                .map_err(read_error),
            Err(err) => Err(read_error(err)),
        }
    }
}

/// PUT `response` to the pre-signed URL of the request.
pub async fn respond(response_url: &str, response: &LifecycleResponse) -> Result<(), Error> {
    debug!("Sending {:?} response for {}", response.status, response.logical_resource_id);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let resp = client
        .put(response_url)
        // The URL is signed for an empty content type.
        .header(reqwest::header::CONTENT_TYPE, "")
        .body(serde_json::to_vec(response)?)
        .send()
        .await?;

    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::ResponseStatus(status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::repository::{FileVersion, MemoryRepository, RepositoryResult};

    const STACK: &str = "arn:aws:cloudformation:us-west-1:123456789012:stack/eks/1";

    fn request(request_type: RequestType, content: &str) -> LifecycleRequest {
        LifecycleRequest {
            request_type,
            response_url: None,
            stack_id: STACK.into(),
            request_id: "req-1".into(),
            logical_resource_id: "pushManifests".into(),
            physical_resource_id: None,
            resource_properties: serde_json::json!({
                "ServiceToken": "arn:aws:lambda:us-west-1:123456789012:function:provider",
                "repositoryName": "manifests",
                "filePath": "app-of-apps/manifest.yaml",
                "branch": "main",
                "fileContent": content,
            }),
        }
    }

    /// Fails every call, to prove a code path never touches the repository.
    struct Untouchable;

    #[async_trait]
    impl Repository for Untouchable {
        async fn get_file(&self, _: &str, _: &str, _: &str) -> RepositoryResult<FileVersion> {
            panic!("get_file must not be called")
        }

        async fn branch_head(&self, _: &str, _: &str) -> RepositoryResult<Option<String>> {
            panic!("branch_head must not be called")
        }

        async fn put_file(&self, _: PutFile<'_>) -> RepositoryResult<String> {
            panic!("put_file must not be called")
        }
    }

    /// Returns fixed errors for reads and writes.
    struct Failing {
        read: Option<RepositoryError>,
        write: RepositoryError,
    }

    #[async_trait]
    impl Repository for Failing {
        async fn get_file(&self, _: &str, _: &str, _: &str) -> RepositoryResult<FileVersion> {
            match &self.read {
                Some(err) => Err(err.clone()),
                None => Ok(FileVersion { commit_id: "c1".into(), content: vec![] }),
            }
        }

        async fn branch_head(&self, _: &str, _: &str) -> RepositoryResult<Option<String>> {
            Ok(Some("c1".into()))
        }

        async fn put_file(&self, _: PutFile<'_>) -> RepositoryResult<String> {
            Err(self.write.clone())
        }
    }

    /// Reports the file as missing and the branch tip as `head`, recording the parent of every write.
    struct NewFile {
        head: RepositoryResult<Option<String>>,
        parents: std::sync::Mutex<Vec<Option<String>>>,
    }

    impl NewFile {
        fn new(head: RepositoryResult<Option<String>>) -> Self {
            Self { head, parents: Default::default() }
        }
    }

    #[async_trait]
    impl Repository for NewFile {
        async fn get_file(&self, _: &str, _: &str, path: &str) -> RepositoryResult<FileVersion> {
            Err(RepositoryError::FileDoesNotExist(path.into()))
        }

        async fn branch_head(&self, _: &str, _: &str) -> RepositoryResult<Option<String>> {
            self.head.clone()
        }

        async fn put_file(&self, put: PutFile<'_>) -> RepositoryResult<String> {
            self.parents.lock().unwrap().push(put.parent_commit_id.map(str::to_string));
            Ok("c2".into())
        }
    }

    #[tokio::test]
    async fn delete_never_touches_the_repository() {
        let publisher = Publisher::new(Untouchable);
        let mut delete = request(RequestType::Delete, "ignored");
        delete.resource_properties = serde_json::Value::Null;

        let response = publisher.handle(&delete).await.unwrap();
        assert_eq!(response.status, Status::Success);
        assert_eq!(response.physical_resource_id, "pushManifests");

        delete.physical_resource_id = Some("existing-id".into());
        let response = publisher.handle(&delete).await.unwrap();
        assert_eq!(response.physical_resource_id, "existing-id");
    }

    #[tokio::test]
    async fn create_on_missing_branch_has_no_parent() {
        let publisher = Publisher::new(MemoryRepository::new());
        let response = publisher.handle(&request(RequestType::Create, "kind: Application\n")).await.unwrap();

        assert_eq!(response.status, Status::Success);
        assert_eq!(response.physical_resource_id, format!("{STACK}pushManifests"));
        assert_eq!(response.request_id, "req-1");

        let commits = publisher.repository().commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].parent, None);
        assert_eq!(
            publisher.repository().file("manifests", "main", "app-of-apps/manifest.yaml"),
            Some(b"kind: Application\n".to_vec())
        );
    }

    #[tokio::test]
    async fn identical_content_commits_once() {
        let publisher = Publisher::new(MemoryRepository::new());
        let create = request(RequestType::Create, "same");

        let first = publisher.handle(&create).await.unwrap();
        let second = publisher.handle(&request(RequestType::Update, "same")).await.unwrap();

        assert_eq!(first.status, Status::Success);
        assert_eq!(second.status, Status::Success);
        assert_eq!(first.physical_resource_id, second.physical_resource_id);
        assert_eq!(publisher.repository().commits().len(), 1);

        let properties: ManifestProperties = serde_json::from_value(create.resource_properties).unwrap();
        assert_eq!(publisher.publish(&properties).await.unwrap(), Outcome::Unchanged);
    }

    #[tokio::test]
    async fn update_builds_on_the_current_commit() {
        let publisher = Publisher::new(MemoryRepository::new());
        publisher.handle(&request(RequestType::Create, "v1")).await.unwrap();
        publisher.handle(&request(RequestType::Update, "v2")).await.unwrap();

        let commits = publisher.repository().commits();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[1].parent.as_deref(), Some(commits[0].id.as_str()));
    }

    #[tokio::test]
    async fn new_file_on_existing_branch_builds_on_the_tip() {
        let repository = MemoryRepository::new();
        let tip = repository
            .put_file(PutFile {
                repository: "manifests",
                branch: "main",
                path: "orders/b..main/manifest.yaml",
                content: b"other",
                parent_commit_id: None,
                commit_message: "seed".into(),
            })
            .await
            .unwrap();

        let publisher = Publisher::new(repository);
        publisher.handle(&request(RequestType::Create, "root")).await.unwrap();

        let commits = publisher.repository().commits();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[1].parent, Some(tip));
    }

    #[tokio::test]
    async fn other_read_errors_propagate() {
        let publisher = Publisher::new(Failing {
            read: Some(RepositoryError::Aws("AccessDenied".into())),
            write: RepositoryError::Aws("unreachable".into()),
        });
        let result = publisher.handle(&request(RequestType::Create, "x")).await;
        assert!(matches!(result, Err(Error::Read { err: RepositoryError::Aws(_), .. })));
    }

    #[tokio::test]
    async fn concurrent_modification_propagates() {
        let publisher = Publisher::new(Failing {
            read: None,
            write: RepositoryError::ParentCommitIdOutdated("c1".into()),
        });
        let result = publisher.handle(&request(RequestType::Update, "x")).await;
        assert!(matches!(result, Err(Error::Write { err: RepositoryError::ParentCommitIdOutdated(_), .. })));
    }

    #[tokio::test]
    async fn branch_gone_after_missing_file_writes_without_parent() {
        let publisher = Publisher::new(NewFile::new(Ok(None)));
        let response = publisher.handle(&request(RequestType::Create, "x")).await.unwrap();
        assert_eq!(response.status, Status::Success);
        assert_eq!(*publisher.repository().parents.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn branch_head_errors_are_read_errors() {
        let publisher = Publisher::new(NewFile::new(Err(RepositoryError::Aws("Throttling".into()))));
        let result = publisher.handle(&request(RequestType::Create, "x")).await;
        match result {
            Err(Error::Read { err, branch, path }) => {
                assert_eq!(err, RepositoryError::Aws("Throttling".into()));
                assert_eq!(branch, "main");
                assert_eq!(path, "app-of-apps/manifest.yaml");
            }
            other => panic!("expected read error, got {other:?}"),
        }
        assert!(publisher.repository().parents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_commit_is_a_first_write() {
        let publisher = Publisher::new(Failing {
            read: Some(RepositoryError::CommitDoesNotExist("main".into())),
            write: RepositoryError::SameFileContent("app-of-apps/manifest.yaml".into()),
        });
        let response = publisher.handle(&request(RequestType::Create, "x")).await.unwrap();
        assert_eq!(response.status, Status::Success);
    }

    #[tokio::test]
    async fn missing_properties_are_rejected() {
        let publisher = Publisher::new(Untouchable);
        let mut create = request(RequestType::Create, "x");
        create.resource_properties = serde_json::json!({"repositoryName": "manifests"});
        assert!(matches!(publisher.handle(&create).await, Err(Error::Properties(_))));
    }

    #[test]
    fn parses_lifecycle_event() {
        let event = r#"{
            "RequestType": "Update",
            "ResponseURL": "https://cloudformation-custom-resource-response.s3.amazonaws.com/x",
            "StackId": "stack",
            "RequestId": "req",
            "LogicalResourceId": "pushManifests",
            "PhysicalResourceId": "stackpushManifests",
            "ResourceType": "AWS::CloudFormation::CustomResource",
            "ResourceProperties": {"repositoryName": "r", "filePath": "f", "branch": "main", "fileContent": "c"}
        }"#;
        let request: LifecycleRequest = serde_json::from_str(event).unwrap();
        assert_eq!(request.request_type, RequestType::Update);
        assert_eq!(request.physical_resource_id.as_deref(), Some("stackpushManifests"));
        assert!(request.response_url.is_some());
    }

    #[test]
    fn response_uses_provisioning_field_names() {
        let request = request(RequestType::Create, "x");
        let value = serde_json::to_value(LifecycleResponse::success(&request, request.derived_physical_id())).unwrap();
        assert_eq!(value["Status"], "SUCCESS");
        assert_eq!(value["PhysicalResourceId"], format!("{STACK}pushManifests"));
        assert_eq!(value["LogicalResourceId"], "pushManifests");
        assert!(value.get("Reason").is_none());

        let failed = serde_json::to_value(LifecycleResponse::failed(&request, "boom")).unwrap();
        assert_eq!(failed["Status"], "FAILED");
        assert_eq!(failed["Reason"], "boom");
    }
}
