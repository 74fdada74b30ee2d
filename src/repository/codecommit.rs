//! AWS CodeCommit backend

use async_trait::async_trait;
use aws_sdk_codecommit::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_codecommit::primitives::Blob;
use aws_sdk_codecommit::Client;
use log::debug;

use super::{FileVersion, PutFile, Repository, RepositoryError, RepositoryResult};

/// Repository backed by CodeCommit
pub struct CodeCommitRepository {
    client: Client,
}

impl CodeCommitRepository {
    /// Create a client for `region` from the default AWS credential chain
    pub async fn from_region(region: &str) -> Self {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_codecommit::config::Region::new(region.to_string()))
            .load()
            .await;

        Self {
            client: Client::new(&aws_config),
        }
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Repository for CodeCommitRepository {
    async fn get_file(&self, repository: &str, commit_specifier: &str, path: &str) -> RepositoryResult<FileVersion> {
        debug!("GetFile {repository}:{commit_specifier}:{path}");
        let output = self
            .client
            .get_file()
            .repository_name(repository)
            .commit_specifier(commit_specifier)
            .file_path(path)
            .send()
            .await
            .map_err(|err| classify(err, commit_specifier, path))?;

        Ok(FileVersion {
            commit_id: output.commit_id().to_string(),
            content: output.file_content().as_ref().to_vec(),
        })
    }

    async fn branch_head(&self, repository: &str, branch: &str) -> RepositoryResult<Option<String>> {
        debug!("GetBranch {repository}:{branch}");
        let result = self
            .client
            .get_branch()
            .repository_name(repository)
            .branch_name(branch)
            .send()
            .await;

        match result {
            Ok(output) => Ok(output
                .branch()
                .and_then(|b| b.commit_id())
                .map(str::to_string)),
            Err(err) => match classify(err, branch, "") {
                RepositoryError::BranchDoesNotExist(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn put_file(&self, request: PutFile<'_>) -> RepositoryResult<String> {
        debug!(
            "PutFile {}:{}:{} parent={:?}",
            request.repository, request.branch, request.path, request.parent_commit_id
        );
        let output = self
            .client
            .put_file()
            .repository_name(request.repository)
            .branch_name(request.branch)
            .file_path(request.path)
            .file_content(Blob::new(request.content.to_vec()))
            .set_parent_commit_id(request.parent_commit_id.map(str::to_string))
            .commit_message(request.commit_message)
            .send()
            .await
            .map_err(|err| classify(err, request.branch, request.path))?;

        Ok(output.commit_id().to_string())
    }
}

/// Map CodeCommit's modeled exceptions onto [`RepositoryError`] by error code,
/// since not every operation models every exception as its own variant.
fn classify<E, R>(err: SdkError<E, R>, reference: &str, path: &str) -> RepositoryError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.code() {
        Some("BranchDoesNotExistException") => RepositoryError::BranchDoesNotExist(reference.to_string()),
        Some("CommitDoesNotExistException") => RepositoryError::CommitDoesNotExist(reference.to_string()),
        Some("FileDoesNotExistException") => RepositoryError::FileDoesNotExist(path.to_string()),
        Some("SameFileContentException") => RepositoryError::SameFileContent(path.to_string()),
        Some("ParentCommitIdOutdatedException") => RepositoryError::ParentCommitIdOutdated(reference.to_string()),
        Some("ParentCommitIdRequiredException") => RepositoryError::ParentCommitIdRequired(reference.to_string()),
        _ => RepositoryError::Aws(aws_sdk_codecommit::error::DisplayErrorContext(&err).to_string()),
    }
}
