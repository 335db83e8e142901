// Git operations using git2-rs

use chrono::{DateTime, TimeZone, Utc};
use git2::{
    BranchType, ErrorCode, Repository, ResetType, Signature, WorktreeAddOptions,
    WorktreePruneOptions,
};
use std::path::Path;

/// Result of merging one branch into the checked-out trunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchMergeResult {
    /// Integrated; carries the resulting commit id.
    Merged(String),
    /// The branch added nothing new on top of trunk.
    AlreadyMerged,
    /// Path collisions; the repository was restored to its pre-merge state.
    Conflict(Vec<String>),
}

pub struct GitManager {
    repo: Repository,
}

impl GitManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, git2::Error> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    /// Create a branch at the current HEAD commit.
    pub fn create_branch(&self, name: &str) -> Result<(), git2::Error> {
        let head = self.repo.head()?.peel_to_commit()?;
        self.repo.branch(name, &head, false)?;
        Ok(())
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    pub fn delete_branch(&self, name: &str) -> Result<(), git2::Error> {
        let mut branch = self.repo.find_branch(name, BranchType::Local)?;
        branch.delete()
    }

    /// Create a linked worktree at `path` checked out on `branch`.
    pub fn create_worktree(&self, name: &str, path: &Path, branch: &str) -> Result<(), git2::Error> {
        let reference = self
            .repo
            .find_branch(branch, BranchType::Local)?
            .into_reference();

        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&reference));

        self.repo.worktree(name, path, Some(&opts))?;
        Ok(())
    }

    /// Remove a linked worktree: delete its directory, then prune the
    /// repository's bookkeeping for it. Missing worktrees are not an error
    /// so the call stays idempotent.
    pub fn remove_worktree(&self, name: &str, path: &Path) -> Result<(), git2::Error> {
        if path.exists() {
            if let Err(e) = std::fs::remove_dir_all(path) {
                log::warn!("[GitManager] Failed to delete worktree dir {}: {}", path.display(), e);
            }
        }

        match self.repo.find_worktree(name) {
            Ok(worktree) => {
                let mut opts = WorktreePruneOptions::new();
                opts.valid(true).working_tree(true).locked(true);
                worktree.prune(Some(&mut opts))?;
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn current_branch(&self) -> Result<String, git2::Error> {
        let head = self.repo.head()?;
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    }

    /// Timestamp of the most recent commit on a branch. Used as the
    /// liveness proxy for workers that commit as they progress.
    pub fn last_commit_time(&self, branch: &str) -> Result<DateTime<Utc>, git2::Error> {
        let commit = self
            .repo
            .find_branch(branch, BranchType::Local)?
            .into_reference()
            .peel_to_commit()?;

        let seconds = commit.time().seconds();
        Ok(Utc
            .timestamp_opt(seconds, 0)
            .single()
            .unwrap_or_else(Utc::now))
    }

    /// Commit id at the tip of a branch.
    pub fn branch_tip(&self, branch: &str) -> Result<String, git2::Error> {
        let commit = self
            .repo
            .find_branch(branch, BranchType::Local)?
            .into_reference()
            .peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    /// Stage everything and commit. Returns the new commit id.
    pub fn commit_all(&self, message: &str) -> Result<String, git2::Error> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;

        let parents = match self.repo.head() {
            Ok(head) => vec![head.peel_to_commit()?],
            Err(_) => Vec::new(),
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        let id = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)?;
        Ok(id.to_string())
    }

    /// Merge `branch` into the currently checked-out trunk.
    ///
    /// On conflict the index and working tree are restored to the pre-merge
    /// HEAD and the colliding paths are reported; the repository is never
    /// left in a conflicted state.
    pub fn merge_branch(&self, branch: &str, message: &str) -> Result<BranchMergeResult, git2::Error> {
        let reference = self
            .repo
            .find_branch(branch, BranchType::Local)?
            .into_reference();
        let annotated = self.repo.reference_to_annotated_commit(&reference)?;

        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(BranchMergeResult::AlreadyMerged);
        }

        if analysis.is_fast_forward() {
            let target = annotated.id();
            let mut head = self.repo.head()?;
            head.set_target(target, &format!("fast-forward merge of {}", branch))?;
            self.repo
                .checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
            return Ok(BranchMergeResult::Merged(target.to_string()));
        }

        self.repo.merge(&[&annotated], None, None)?;

        let mut index = self.repo.index()?;
        if index.has_conflicts() {
            let mut paths = Vec::new();
            for conflict in index.conflicts()?.flatten() {
                let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
                if let Some(entry) = entry {
                    paths.push(String::from_utf8_lossy(&entry.path).to_string());
                }
            }
            paths.sort();
            paths.dedup();

            // Restore trunk before reporting
            self.repo.cleanup_state()?;
            let head = self.repo.head()?.peel_to_commit()?;
            self.repo.reset(head.as_object(), ResetType::Hard, None)?;

            return Ok(BranchMergeResult::Conflict(paths));
        }

        let tree_id = index.write_tree_to(&self.repo)?;
        let tree = self.repo.find_tree(tree_id)?;
        let head_commit = self.repo.head()?.peel_to_commit()?;
        let branch_commit = reference.peel_to_commit()?;
        let sig = self.signature()?;

        let commit_id = self.repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            message,
            &tree,
            &[&head_commit, &branch_commit],
        )?;

        self.repo.cleanup_state()?;
        self.repo
            .checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;

        Ok(BranchMergeResult::Merged(commit_id.to_string()))
    }

    fn signature(&self) -> Result<Signature<'static>, git2::Error> {
        self.repo
            .signature()
            .or_else(|_| Signature::now("stagehand", "stagehand@localhost"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, GitManager) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "test").unwrap();
            config.set_str("user.email", "test@test").unwrap();
        }
        drop(repo);

        fs::write(dir.path().join("README.md"), "# test\n").unwrap();
        let git = GitManager::new(dir.path()).unwrap();
        git.commit_all("initial commit").unwrap();
        (dir, git)
    }

    #[test]
    fn test_create_and_find_branch() {
        let (_dir, git) = init_repo();
        assert!(!git.branch_exists("feature/x"));
        git.create_branch("feature/x").unwrap();
        assert!(git.branch_exists("feature/x"));
    }

    #[test]
    fn test_delete_branch() {
        let (_dir, git) = init_repo();
        git.create_branch("doomed").unwrap();
        git.delete_branch("doomed").unwrap();
        assert!(!git.branch_exists("doomed"));
    }

    #[test]
    fn test_current_branch() {
        let (_dir, git) = init_repo();
        let branch = git.current_branch().unwrap();
        // Depending on git config the default is main or master
        assert!(branch == "main" || branch == "master");
    }

    #[test]
    fn test_worktree_create_and_remove() {
        let (dir, git) = init_repo();
        git.create_branch("wt-branch").unwrap();

        let wt_path = dir.path().join("worktrees").join("wt1");
        fs::create_dir_all(wt_path.parent().unwrap()).unwrap();
        git.create_worktree("wt1", &wt_path, "wt-branch").unwrap();
        assert!(wt_path.join("README.md").exists());

        git.remove_worktree("wt1", &wt_path).unwrap();
        assert!(!wt_path.exists());

        // Idempotent: removing again is a no-op
        git.remove_worktree("wt1", &wt_path).unwrap();
    }

    #[test]
    fn test_last_commit_time() {
        let (_dir, git) = init_repo();
        let branch = git.current_branch().unwrap();
        let time = git.last_commit_time(&branch).unwrap();
        let age = Utc::now() - time;
        assert!(age.num_seconds() < 60);
    }

    #[test]
    fn test_merge_branch_fast_forward() {
        let (dir, git) = init_repo();
        let trunk = git.current_branch().unwrap();
        git.create_branch("feature").unwrap();

        let wt_path = dir.path().join("wt-feature");
        git.create_worktree("wt-feature", &wt_path, "feature").unwrap();

        fs::write(wt_path.join("feature.txt"), "new file\n").unwrap();
        let wt_git = GitManager::new(&wt_path).unwrap();
        wt_git.commit_all("add feature file").unwrap();

        let result = git.merge_branch("feature", "merge feature").unwrap();
        assert!(matches!(result, BranchMergeResult::Merged(_)));
        assert!(dir.path().join("feature.txt").exists());
        assert_eq!(git.current_branch().unwrap(), trunk);
    }

    #[test]
    fn test_merge_branch_already_merged() {
        let (_dir, git) = init_repo();
        git.create_branch("noop").unwrap();
        let result = git.merge_branch("noop", "merge noop").unwrap();
        assert_eq!(result, BranchMergeResult::AlreadyMerged);
    }

    #[test]
    fn test_merge_branch_conflict_reports_paths_and_restores_trunk() {
        let (dir, git) = init_repo();
        git.create_branch("conflicting").unwrap();

        let wt_path = dir.path().join("wt-conflict");
        git.create_worktree("wt-conflict", &wt_path, "conflicting").unwrap();

        // Diverge the same file on both sides
        fs::write(wt_path.join("README.md"), "# branch version\n").unwrap();
        GitManager::new(&wt_path).unwrap().commit_all("branch edit").unwrap();
        git.remove_worktree("wt-conflict", &wt_path).unwrap();

        fs::write(dir.path().join("README.md"), "# trunk version\n").unwrap();
        git.commit_all("trunk edit").unwrap();

        let result = git.merge_branch("conflicting", "merge conflicting").unwrap();
        match result {
            BranchMergeResult::Conflict(paths) => {
                assert_eq!(paths, vec!["README.md"]);
            }
            other => panic!("Expected conflict, got {:?}", other),
        }

        // Trunk restored to its own version, no merge residue
        let content = fs::read_to_string(dir.path().join("README.md")).unwrap();
        assert_eq!(content, "# trunk version\n");
    }
}
