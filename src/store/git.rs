use crate::globals;
use crate::store::{CvrCommit, StoreError, VoteStore, DETERMINISTIC_COMMIT_DATE, MAIN_BRANCH};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Object store backed by a git working directory. Every command runs
/// with pinned author/committer dates and a suppressed editor so commit
/// digests are deterministic. The working directory is a per-process
/// resource; concurrent processes in the same directory are undefined.
pub struct GitStore {
    workdir: PathBuf,
    timeout: Option<Duration>,
}

impl GitStore {
    pub fn new(workdir: PathBuf, timeout: Option<Duration>) -> GitStore {
        GitStore { workdir, timeout }
    }

    fn run(&self, args: &[&str]) -> Result<String, StoreError> {
        crate::log_debug!("git {}", args.join(" "));
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.workdir)
            .env("GIT_AUTHOR_DATE", DETERMINISTIC_COMMIT_DATE)
            .env("GIT_COMMITTER_DATE", DETERMINISTIC_COMMIT_DATE)
            .env("GIT_EDITOR", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match self.timeout {
            None => command.output()?,
            Some(limit) => {
                let mut child = command.spawn()?;
                let start = Instant::now();
                loop {
                    if child.try_wait()?.is_some() {
                        break child.wait_with_output()?;
                    }
                    if start.elapsed() > limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(StoreError::Timeout {
                            command: format!("git {}", args.join(" ")),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
        };

        if !output.status.success() {
            return Err(StoreError::Command {
                command: format!("git {}", args.join(" ")),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn write_file(&self, file: &str, contents: &str) -> Result<(), StoreError> {
        let path = self.workdir.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }
}

impl VoteStore for GitStore {
    fn pull(&mut self) -> Result<(), StoreError> {
        self.run(&["pull"]).map(|_| ())
    }

    fn create_branch(&mut self, branch: &str) -> Result<(), StoreError> {
        self.run(&["checkout", "-b", branch, MAIN_BRANCH]).map(|_| ())
    }

    fn stage_and_commit(
        &mut self,
        branch: &str,
        file: &str,
        contents: &str,
        message: &str,
    ) -> Result<String, StoreError> {
        self.run(&["checkout", branch])?;
        self.write_file(file, contents)?;
        self.run(&["add", file])?;
        self.run(&["commit", "-m", message])?;
        Ok(self.run(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn push_branch(&mut self, branch: &str) -> Result<(), StoreError> {
        self.run(&["push", "origin", branch]).map(|_| ())
    }

    fn branch_tip(&self, branch: &str) -> Result<String, StoreError> {
        Ok(self.run(&["rev-parse", branch])?.trim().to_string())
    }

    fn list_branches(&mut self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let output = self.run(&["branch", "--format=%(refname:short)"])?;
        let mut branches: Vec<String> = output
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| line.starts_with(prefix))
            .collect();
        branches.sort();
        Ok(branches)
    }

    fn branch_file(&self, branch: &str) -> Result<String, StoreError> {
        let output = self.run(&["diff-tree", "--no-commit-id", "-r", "--name-only", branch])?;
        output
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .ok_or_else(|| StoreError::UnknownBranch(branch.to_string()))
    }

    fn merge_no_ff(&mut self, branch: &str) -> Result<(), StoreError> {
        self.run(&["checkout", MAIN_BRANCH])?;
        self.run(&["merge", "--no-ff", "--no-commit", branch])
            .map(|_| ())
    }

    fn commit_merge(
        &mut self,
        file: &str,
        contents: &str,
        message: &str,
    ) -> Result<String, StoreError> {
        self.write_file(file, contents)?;
        self.run(&["add", file])?;
        self.run(&["commit", "-m", message])?;
        Ok(self.run(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn abort_merge(&mut self) -> Result<(), StoreError> {
        self.run(&["merge", "--abort"]).map(|_| ())
    }

    fn push_mainline(&mut self) -> Result<(), StoreError> {
        self.run(&["push", "origin", MAIN_BRANCH]).map(|_| ())
    }

    fn delete_branch(&mut self, branch: &str) -> Result<(), StoreError> {
        self.run(&["branch", "-D", branch])?;
        self.run(&["push", "origin", &format!(":{}", branch)])
            .map(|_| ())
    }

    fn cat_file_type(&self, digest: &str) -> Result<String, StoreError> {
        match self.run(&["cat-file", "-t", digest]) {
            Ok(kind) => Ok(kind.trim().to_string()),
            Err(StoreError::Command { .. }) => Err(StoreError::UnknownDigest(digest.to_string())),
            Err(err) => Err(err),
        }
    }

    fn show(&self, digest: &str) -> Result<String, StoreError> {
        let output =
            self.run(&["diff-tree", "--no-commit-id", "-r", "--name-only", digest])?;
        let file = output
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .ok_or_else(|| StoreError::UnknownDigest(digest.to_string()))?;
        self.run(&["show", &format!("{}:{}", digest, file)])
    }

    fn cvr_commits(&self) -> Result<Vec<CvrCommit>, StoreError> {
        let output = self.run(&[
            "log",
            MAIN_BRANCH,
            "--no-merges",
            "--topo-order",
            "--name-only",
            "--format=%H",
            "--",
            globals::CONTEST_FILE_SUBDIR,
        ])?;
        let mut commits = Vec::new();
        let mut digest: Option<String> = None;
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.len() == 40 && line.chars().all(|c| c.is_ascii_hexdigit()) {
                digest = Some(line.to_string());
            } else if let Some(ref commit_digest) = digest {
                if line.starts_with(globals::CONTEST_FILE_SUBDIR) {
                    let payload = self.run(&["show", &format!("{}:{}", commit_digest, line)])?;
                    commits.push(CvrCommit {
                        digest: commit_digest.clone(),
                        path: line.to_string(),
                        payload,
                    });
                }
            }
        }
        Ok(commits)
    }

    fn gc(&mut self) -> Result<(), StoreError> {
        self.run(&["gc"]).map(|_| ())
    }
}
