//! Policy file discovery.
//!
//! Project configuration (`sapperai.config.yaml` at the repository root)
//! takes precedence over the global `~/.sapperai/policy.yaml`. Discovered
//! candidates that are symlinks must resolve inside their trust root; a
//! symlink escaping it is rejected rather than silently followed.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const PROJECT_CONFIG_NAMES: [&str; 2] = ["sapperai.config.yaml", "sapperai.config.yml"];
const GLOBAL_CONFIG_DIR: &str = ".sapperai";
const GLOBAL_CONFIG_NAME: &str = "policy.yaml";

/// Where a resolved policy file came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyScope {
    Project,
    Global,
}

/// A discovered policy file together with its scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPolicyPath {
    pub path: PathBuf,
    pub scope: PolicyScope,
}

/// Resolve the policy file for a repository, preferring project config over
/// the global one. `home_dir` is injectable for tests; `None` skips the
/// global fallback.
pub fn resolve_policy_path(
    repo_root: &Path,
    home_dir: Option<&Path>,
) -> Result<Option<ResolvedPolicyPath>> {
    for name in PROJECT_CONFIG_NAMES {
        let candidate = repo_root.join(name);
        if candidate.exists() {
            assert_stays_within_root(&candidate, repo_root)?;
            return Ok(Some(ResolvedPolicyPath {
                path: candidate,
                scope: PolicyScope::Project,
            }));
        }
    }

    if let Some(home) = home_dir {
        let global_dir = home.join(GLOBAL_CONFIG_DIR);
        let candidate = global_dir.join(GLOBAL_CONFIG_NAME);
        if candidate.exists() {
            assert_stays_within_root(&candidate, &global_dir)?;
            return Ok(Some(ResolvedPolicyPath {
                path: candidate,
                scope: PolicyScope::Global,
            }));
        }
    }

    Ok(None)
}

/// True when `path` is `root` or lives underneath it.
pub fn is_subpath(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

fn assert_stays_within_root(candidate: &Path, root: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(candidate)?;
    if !metadata.file_type().is_symlink() {
        return Ok(());
    }

    let real_root = std::fs::canonicalize(root)?;
    let real_target = std::fs::canonicalize(candidate)?;
    if is_subpath(&real_target, &real_root) {
        return Ok(());
    }

    Err(Error::PolicySymlinkEscape {
        path: candidate.to_path_buf(),
        root: root.to_path_buf(),
    })
}
