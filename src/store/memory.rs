use crate::globals;
use crate::store::{CvrCommit, StoreError, VoteStore, DETERMINISTIC_COMMIT_DATE};
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone)]
struct MemCommit {
    parents: Vec<String>,
    file: String,
    contents: String,
    message: String,
}

/// In-memory object store satisfying the same verbs as `GitStore`.
/// Commit digests are SHA-1 over content plus parent linkage plus the
/// fixed commit date, so identical content committed onto identical
/// store state yields identical digests.
pub struct MemoryStore {
    commits: HashMap<String, MemCommit>,
    branches: BTreeMap<String, String>,
    pushed: BTreeSet<String>,
    mainline: String,
    staged_merge: Option<String>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        let genesis = MemCommit {
            parents: Vec::new(),
            file: String::new(),
            contents: String::new(),
            message: "genesis".to_string(),
        };
        let digest = commit_digest(&genesis);
        let mut commits = HashMap::new();
        commits.insert(digest.clone(), genesis);
        MemoryStore {
            commits,
            branches: BTreeMap::new(),
            pushed: BTreeSet::new(),
            mainline: digest,
            staged_merge: None,
        }
    }

    pub fn mainline_tip(&self) -> &str {
        &self.mainline
    }

    /// Merge commit digests along the mainline first-parent chain, most
    /// recent first.
    pub fn mainline_merges(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = self.mainline.clone();
        while let Some(commit) = self.commits.get(&cursor) {
            if commit.parents.len() > 1 {
                out.push(cursor.clone());
            }
            match commit.parents.first() {
                Some(parent) => cursor = parent.clone(),
                None => break,
            }
        }
        out
    }

    /// The second parent of each mainline merge commit, most recent
    /// first: the order branches were merged in, as observable from the
    /// mainline.
    pub fn merged_branch_tips(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = self.mainline.clone();
        while let Some(commit) = self.commits.get(&cursor) {
            if commit.parents.len() > 1 {
                out.push(commit.parents[1].clone());
            }
            match commit.parents.first() {
                Some(parent) => cursor = parent.clone(),
                None => break,
            }
        }
        out
    }

    pub fn is_pushed(&self, branch: &str) -> bool {
        self.pushed.contains(branch)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

fn commit_digest(commit: &MemCommit) -> String {
    let mut hasher = Sha1::new();
    for parent in &commit.parents {
        hasher.update(b"parent ");
        hasher.update(parent.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"date ");
    hasher.update(DETERMINISTIC_COMMIT_DATE.as_bytes());
    hasher.update(b"\nfile ");
    hasher.update(commit.file.as_bytes());
    hasher.update(b"\n");
    hasher.update(commit.contents.as_bytes());
    hasher.update(b"\n");
    hasher.update(commit.message.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl VoteStore for MemoryStore {
    fn pull(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn create_branch(&mut self, branch: &str) -> Result<(), StoreError> {
        if self.branches.contains_key(branch) {
            return Err(StoreError::Command {
                command: format!("create-branch {}", branch),
                detail: "branch already exists".to_string(),
            });
        }
        self.branches
            .insert(branch.to_string(), self.mainline.clone());
        Ok(())
    }

    fn stage_and_commit(
        &mut self,
        branch: &str,
        file: &str,
        contents: &str,
        message: &str,
    ) -> Result<String, StoreError> {
        let parent = self
            .branches
            .get(branch)
            .ok_or_else(|| StoreError::UnknownBranch(branch.to_string()))?
            .clone();
        let commit = MemCommit {
            parents: vec![parent],
            file: file.to_string(),
            contents: contents.to_string(),
            message: message.to_string(),
        };
        let digest = commit_digest(&commit);
        self.commits.insert(digest.clone(), commit);
        self.branches.insert(branch.to_string(), digest.clone());
        Ok(digest)
    }

    fn push_branch(&mut self, branch: &str) -> Result<(), StoreError> {
        if !self.branches.contains_key(branch) {
            return Err(StoreError::UnknownBranch(branch.to_string()));
        }
        self.pushed.insert(branch.to_string());
        Ok(())
    }

    fn branch_tip(&self, branch: &str) -> Result<String, StoreError> {
        self.branches
            .get(branch)
            .cloned()
            .ok_or_else(|| StoreError::UnknownBranch(branch.to_string()))
    }

    fn list_branches(&mut self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .branches
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn branch_file(&self, branch: &str) -> Result<String, StoreError> {
        let tip = self.branch_tip(branch)?;
        Ok(self.commits[&tip].file.clone())
    }

    fn merge_no_ff(&mut self, branch: &str) -> Result<(), StoreError> {
        if self.staged_merge.is_some() {
            return Err(StoreError::Command {
                command: format!("merge {}", branch),
                detail: "a merge is already in progress".to_string(),
            });
        }
        let tip = self.branch_tip(branch)?;
        self.staged_merge = Some(tip);
        Ok(())
    }

    fn commit_merge(
        &mut self,
        file: &str,
        contents: &str,
        message: &str,
    ) -> Result<String, StoreError> {
        let merged = self.staged_merge.take().ok_or_else(|| StoreError::Command {
            command: "commit".to_string(),
            detail: "no merge in progress".to_string(),
        })?;
        let commit = MemCommit {
            parents: vec![self.mainline.clone(), merged],
            file: file.to_string(),
            contents: contents.to_string(),
            message: message.to_string(),
        };
        let digest = commit_digest(&commit);
        self.commits.insert(digest.clone(), commit);
        self.mainline = digest.clone();
        Ok(digest)
    }

    fn abort_merge(&mut self) -> Result<(), StoreError> {
        self.staged_merge = None;
        Ok(())
    }

    fn push_mainline(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn delete_branch(&mut self, branch: &str) -> Result<(), StoreError> {
        if self.branches.remove(branch).is_none() {
            return Err(StoreError::UnknownBranch(branch.to_string()));
        }
        self.pushed.remove(branch);
        Ok(())
    }

    fn cat_file_type(&self, digest: &str) -> Result<String, StoreError> {
        if self.commits.contains_key(digest) {
            Ok("commit".to_string())
        } else {
            Err(StoreError::UnknownDigest(digest.to_string()))
        }
    }

    fn show(&self, digest: &str) -> Result<String, StoreError> {
        self.commits
            .get(digest)
            .map(|commit| commit.contents.clone())
            .ok_or_else(|| StoreError::UnknownDigest(digest.to_string()))
    }

    fn cvr_commits(&self) -> Result<Vec<CvrCommit>, StoreError> {
        let mut visited = HashSet::new();
        let mut stack = vec![self.mainline.clone()];
        let mut out = Vec::new();
        while let Some(digest) = stack.pop() {
            if !visited.insert(digest.clone()) {
                continue;
            }
            let commit = self
                .commits
                .get(&digest)
                .ok_or_else(|| StoreError::UnknownDigest(digest.clone()))?;
            if commit.parents.len() < 2 && commit.file.starts_with(globals::CONTEST_FILE_SUBDIR) {
                out.push(CvrCommit {
                    digest: digest.clone(),
                    path: commit.file.clone(),
                    payload: commit.contents.clone(),
                });
            }
            stack.extend(commit.parents.iter().cloned());
        }
        Ok(out)
    }

    fn gc(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_lifecycle() {
        let mut store = MemoryStore::new();
        store.create_branch("CVRs/0000/nonce").unwrap();
        let digest = store
            .stage_and_commit("CVRs/0000/nonce", "CVRs/0000/cvr.json", "{}", "contest 0000")
            .unwrap();
        store.push_branch("CVRs/0000/nonce").unwrap();
        assert!(store.is_pushed("CVRs/0000/nonce"));
        assert_eq!(store.branch_tip("CVRs/0000/nonce").unwrap(), digest);
        assert_eq!(
            store.branch_file("CVRs/0000/nonce").unwrap(),
            "CVRs/0000/cvr.json"
        );
        assert_eq!(store.cat_file_type(&digest).unwrap(), "commit");
        assert_eq!(store.show(&digest).unwrap(), "{}");
        store.delete_branch("CVRs/0000/nonce").unwrap();
        assert!(store.branch_tip("CVRs/0000/nonce").is_err());
        // The commit object outlives the branch.
        assert_eq!(store.cat_file_type(&digest).unwrap(), "commit");
    }

    #[test]
    fn test_identical_content_and_state_yields_identical_digest() {
        let mut a = MemoryStore::new();
        let mut b = MemoryStore::new();
        a.create_branch("CVRs/0000/x").unwrap();
        b.create_branch("CVRs/0000/y").unwrap();
        let da = a
            .stage_and_commit("CVRs/0000/x", "CVRs/0000/cvr.json", "{\"v\": 1}", "m")
            .unwrap();
        let db = b
            .stage_and_commit("CVRs/0000/y", "CVRs/0000/cvr.json", "{\"v\": 1}", "m")
            .unwrap();
        assert_eq!(da, db);
    }

    #[test]
    fn test_merge_flow_and_cvr_walk() {
        let mut store = MemoryStore::new();
        store.create_branch("CVRs/0000/a").unwrap();
        let cast = store
            .stage_and_commit("CVRs/0000/a", "CVRs/0000/cvr.json", "{\"v\": 1}", "m")
            .unwrap();
        store.merge_no_ff("CVRs/0000/a").unwrap();
        let merge = store
            .commit_merge("CVRs/0000/cvr.json", "opaque", "merged")
            .unwrap();
        store.delete_branch("CVRs/0000/a").unwrap();

        assert_eq!(store.mainline_tip(), merge);
        assert_eq!(store.mainline_merges(), vec![merge]);
        let cvrs = store.cvr_commits().unwrap();
        assert_eq!(cvrs.len(), 1);
        assert_eq!(cvrs[0].digest, cast);
        assert_eq!(cvrs[0].payload, "{\"v\": 1}");
    }
}
