mod git;
mod memory;

pub use git::GitStore;
pub use memory::MemoryStore;

use thiserror::Error;

/// The mainline branch per-contest CVR branches are merged into.
pub const MAIN_BRANCH: &str = "main";

/// Fixed author/committer timestamp stamped on every commit so that a
/// commit digest is a function of content plus parent linkage, not wall
/// time. Branch creation order is not observable from commit metadata.
pub const DETERMINISTIC_COMMIT_DATE: &str = "2022-01-01T12:00:00";

/// Store failure. Wrapped into `AcceptError`/`MergeError`/`TallyError`
/// by the components that hit it.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store command failed ({command}): {detail}")]
    Command { command: String, detail: String },
    #[error("store operation timed out ({command})")]
    Timeout { command: String },
    #[error("unknown branch ({0})")]
    UnknownBranch(String),
    #[error("missing digest ({0})")]
    UnknownDigest(String),
    #[error("digest ({digest}) is a {kind}, not a commit")]
    NotACommit { digest: String, kind: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One commit on the store holding a CVR file: the commit digest, the
/// path of the file it touched, and the file contents at that commit.
#[derive(Debug, Clone)]
pub struct CvrCommit {
    pub digest: String,
    pub path: String,
    pub payload: String,
}

/// The narrow object-store contract the core needs: one method per store
/// verb. The production implementation shells out to git; tests inject
/// the in-memory `MemoryStore` satisfying the same verbs.
pub trait VoteStore {
    /// Sync with the shared remote store.
    fn pull(&mut self) -> Result<(), StoreError>;

    /// Create a new branch off the mainline tip.
    fn create_branch(&mut self, branch: &str) -> Result<(), StoreError>;

    /// Write one file on a branch and commit it with deterministic
    /// author/committer metadata. Returns the commit digest.
    fn stage_and_commit(
        &mut self,
        branch: &str,
        file: &str,
        contents: &str,
        message: &str,
    ) -> Result<String, StoreError>;

    /// Push a branch to the shared store.
    fn push_branch(&mut self, branch: &str) -> Result<(), StoreError>;

    /// The commit digest at the tip of a branch.
    fn branch_tip(&self, branch: &str) -> Result<String, StoreError>;

    /// All branch names starting with `prefix`, sorted alphabetically.
    fn list_branches(&mut self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// The path of the file the branch tip commit touched.
    fn branch_file(&self, branch: &str) -> Result<String, StoreError>;

    /// Begin a no-fast-forward, no-commit merge of a branch into the
    /// mainline.
    fn merge_no_ff(&mut self, branch: &str) -> Result<(), StoreError>;

    /// Overwrite `file`, stage it, and commit the in-progress merge on
    /// the mainline. Returns the merge commit digest.
    fn commit_merge(
        &mut self,
        file: &str,
        contents: &str,
        message: &str,
    ) -> Result<String, StoreError>;

    /// Abandon an in-progress merge, leaving the mainline as it was.
    fn abort_merge(&mut self) -> Result<(), StoreError>;

    /// Push the mainline to the shared store.
    fn push_mainline(&mut self) -> Result<(), StoreError>;

    /// Delete a branch locally and on the remote store.
    fn delete_branch(&mut self, branch: &str) -> Result<(), StoreError>;

    /// The object type of a digest (`commit`, `blob`, ...). Unknown
    /// digests are an error.
    fn cat_file_type(&self, digest: &str) -> Result<String, StoreError>;

    /// The CVR file contents recorded by a commit digest.
    fn show(&self, digest: &str) -> Result<String, StoreError>;

    /// Every non-merge commit reachable from the mainline that touched a
    /// CVR file, with its payload. Merge commits carry opaque payloads
    /// and are not CVRs.
    fn cvr_commits(&self) -> Result<Vec<CvrCommit>, StoreError>;

    /// Housekeeping.
    fn gc(&mut self) -> Result<(), StoreError>;
}
