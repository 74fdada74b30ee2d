//! Version-controlled file storage the publisher commits manifests into.

mod codecommit;
mod memory;

pub use codecommit::CodeCommitRepository;
pub use memory::MemoryRepository;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("branch does not exist: {0}")]
    BranchDoesNotExist(String),

    #[error("commit does not exist: {0}")]
    CommitDoesNotExist(String),

    #[error("file does not exist: {0}")]
    FileDoesNotExist(String),

    /// The write would not change the file.
    #[error("file content is unchanged: {0}")]
    SameFileContent(String),

    /// Somebody else committed to the branch since the parent commit was read.
    #[error("parent commit is outdated: {0}")]
    ParentCommitIdOutdated(String),

    #[error("branch {0} exists, a parent commit id is required")]
    ParentCommitIdRequired(String),

    #[error("AWS error: {0}")]
    Aws(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// A file as of some commit.
#[derive(Debug, Clone, PartialEq)]
pub struct FileVersion {
    pub commit_id: String,
    pub content: Vec<u8>,
}

/// Parameters for committing a single file.
#[derive(Debug, Clone)]
pub struct PutFile<'a> {
    pub repository: &'a str,
    pub branch: &'a str,
    pub path: &'a str,
    pub content: &'a [u8],
    /// Expected tip of `branch`. Must be `None` only when the branch does not exist yet.
    pub parent_commit_id: Option<&'a str>,
    pub commit_message: String,
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Read `path` as of `commit_specifier`, which may be a branch name or a commit id.
    async fn get_file(&self, repository: &str, commit_specifier: &str, path: &str) -> RepositoryResult<FileVersion>;

    /// Tip commit of `branch`, or `None` if the branch does not exist.
    async fn branch_head(&self, repository: &str, branch: &str) -> RepositoryResult<Option<String>>;

    /// Commit a single file and return the new commit id.
    async fn put_file(&self, request: PutFile<'_>) -> RepositoryResult<String>;
}

#[async_trait]
impl<R: Repository + ?Sized> Repository for Box<R> {
    async fn get_file(&self, repository: &str, commit_specifier: &str, path: &str) -> RepositoryResult<FileVersion> {
        (**self).get_file(repository, commit_specifier, path).await
    }

    async fn branch_head(&self, repository: &str, branch: &str) -> RepositoryResult<Option<String>> {
        (**self).branch_head(repository, branch).await
    }

    async fn put_file(&self, request: PutFile<'_>) -> RepositoryResult<String> {
        (**self).put_file(request).await
    }
}
