//! In-process repository following CodeCommit's commit rules.
//!
//! Used by tests and by `--dry-run`. A branch comes into existence with its first
//! commit, which must not name a parent; every later commit must name the tip.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use async_trait::async_trait;
use log::debug;

use super::{FileVersion, PutFile, Repository, RepositoryError, RepositoryResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub id: String,
    pub repository: String,
    pub branch: String,
    pub path: String,
    pub parent: Option<String>,
}

#[derive(Debug, Default)]
struct Branch {
    head: String,
    files: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    branches: HashMap<(String, String), Branch>,
    commits: Vec<Commit>,
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every commit made so far, oldest first.
    pub fn commits(&self) -> Vec<Commit> {
        self.lock().commits.clone()
    }

    /// Current content of `path` on `branch`.
    pub fn file(&self, repository: &str, branch: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .branches
            .get(&(repository.to_string(), branch.to_string()))
            .and_then(|b| b.files.get(path).cloned())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_file(&self, repository: &str, commit_specifier: &str, path: &str) -> RepositoryResult<FileVersion> {
        let state = self.lock();
        let branch = state
            .branches
            .get(&(repository.to_string(), commit_specifier.to_string()))
            .ok_or_else(|| RepositoryError::BranchDoesNotExist(commit_specifier.to_string()))?;
        let content = branch
            .files
            .get(path)
            .ok_or_else(|| RepositoryError::FileDoesNotExist(path.to_string()))?;
        Ok(FileVersion {
            commit_id: branch.head.clone(),
            content: content.clone(),
        })
    }

    async fn branch_head(&self, repository: &str, branch: &str) -> RepositoryResult<Option<String>> {
        Ok(self
            .lock()
            .branches
            .get(&(repository.to_string(), branch.to_string()))
            .map(|b| b.head.clone()))
    }

    async fn put_file(&self, request: PutFile<'_>) -> RepositoryResult<String> {
        let mut state = self.lock();
        let key = (request.repository.to_string(), request.branch.to_string());

        match (state.branches.get(&key), request.parent_commit_id) {
            (Some(_), None) => return Err(RepositoryError::ParentCommitIdRequired(request.branch.to_string())),
            (Some(branch), Some(parent)) if branch.head != parent => {
                return Err(RepositoryError::ParentCommitIdOutdated(parent.to_string()));
            }
            (Some(branch), Some(_)) if branch.files.get(request.path).map(Vec::as_slice) == Some(request.content) => {
                return Err(RepositoryError::SameFileContent(request.path.to_string()));
            }
            (None, Some(parent)) => return Err(RepositoryError::CommitDoesNotExist(parent.to_string())),
            _ => {}
        }

        let mut seed = format!("{}:{}:{}:{:?}:", state.commits.len(), request.branch, request.path, request.parent_commit_id).into_bytes();
        seed.extend_from_slice(request.content);
        let id = sha256::digest(seed);

        let branch = state.branches.entry(key).or_default();
        branch.head = id.clone();
        branch.files.insert(request.path.to_string(), request.content.to_vec());

        state.commits.push(Commit {
            id: id.clone(),
            repository: request.repository.to_string(),
            branch: request.branch.to_string(),
            path: request.path.to_string(),
            parent: request.parent_commit_id.map(str::to_string),
        });
        debug!("Committed {} to {}/{} as {}", request.path, request.repository, request.branch, id);
        Ok(id)
    }
}
