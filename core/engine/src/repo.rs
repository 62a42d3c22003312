//! Git repository and branch resolution for session working directories.
//!
//! Transcript metadata carries `gitBranch` at best; the remote URL and the
//! `owner/name` identifier come from walking up from the session `cwd` to
//! its `.git`, following `gitdir:` worktree pointers. Resolution touches the
//! filesystem on every call, so lookups go through [`RepoCache`] with a
//! short TTL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs_err as fs;
use serde::Serialize;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// What we know about the repository a session is working in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoInfo {
    /// Remote URL of `origin`, verbatim from `.git/config`.
    pub repo_url: Option<String>,
    /// `owner/name` extracted from the origin URL.
    pub repo_id: Option<String>,
    /// Current branch from a symbolic `HEAD`; `None` on detached HEAD.
    pub branch: Option<String>,
}

/// Resolves repository facts for `cwd`. Never fails; a directory outside
/// any git repository yields an all-`None` [`RepoInfo`].
pub fn resolve_repo(cwd: &Path) -> RepoInfo {
    let Some(layout) = find_git_layout(cwd) else {
        return RepoInfo::default();
    };

    let branch = read_branch(&layout.git_dir);
    let repo_url = read_origin_url(&layout.common_dir);
    let repo_id = repo_url.as_deref().and_then(parse_repo_id);

    RepoInfo {
        repo_url,
        repo_id,
        branch,
    }
}

struct GitLayout {
    /// Where `HEAD` lives. Per-worktree for linked worktrees.
    git_dir: PathBuf,
    /// Where `config` lives. Shared across worktrees.
    common_dir: PathBuf,
}

fn find_git_layout(start: &Path) -> Option<GitLayout> {
    let mut current = Some(start.to_path_buf());
    while let Some(dir) = current {
        let git_entry = dir.join(".git");
        if git_entry.is_dir() {
            return Some(GitLayout {
                git_dir: git_entry.clone(),
                common_dir: git_entry,
            });
        }
        if git_entry.is_file() {
            // Linked worktree: `.git` is a file pointing at the real gitdir.
            let git_dir = parse_gitdir(&git_entry, &dir)?;
            let common_dir = parse_commondir(&git_dir).unwrap_or_else(|| git_dir.clone());
            return Some(GitLayout {
                git_dir,
                common_dir,
            });
        }

        let parent = dir.parent().map(|p| p.to_path_buf());
        if parent.as_ref() == Some(&dir) {
            break;
        }
        current = parent;
    }
    None
}

fn parse_gitdir(git_file: &Path, worktree_root: &Path) -> Option<PathBuf> {
    let contents = fs::read_to_string(git_file).ok()?;
    let line = contents
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("gitdir:"))?;
    let raw = line.get("gitdir:".len()..)?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(resolve_relative(worktree_root, raw))
}

fn parse_commondir(git_dir: &Path) -> Option<PathBuf> {
    let contents = fs::read_to_string(git_dir.join("commondir")).ok()?;
    let raw = contents.trim();
    if raw.is_empty() {
        return None;
    }
    Some(resolve_relative(git_dir, raw))
}

fn resolve_relative(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn read_branch(git_dir: &Path) -> Option<String> {
    let head = fs::read_to_string(git_dir.join("HEAD")).ok()?;
    let head = head.trim();
    let reference = head.strip_prefix("ref:")?.trim();
    // Branch names may themselves contain slashes.
    reference
        .strip_prefix("refs/heads/")
        .map(|branch| branch.to_string())
}

/// Pulls the `url` out of the `[remote "origin"]` section of `.git/config`.
fn read_origin_url(common_dir: &Path) -> Option<String> {
    let config = fs::read_to_string(common_dir.join("config")).ok()?;
    let mut in_origin = false;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_origin = line == r#"[remote "origin"]"#;
            continue;
        }
        if in_origin {
            if let Some(value) = line.strip_prefix("url") {
                let value = value.trim_start();
                if let Some(url) = value.strip_prefix('=') {
                    return Some(url.trim().to_string());
                }
            }
        }
    }
    None
}

/// Extracts `owner/name` from the common remote URL shapes:
/// `git@host:owner/name.git` and `https://host/owner/name(.git)`.
fn parse_repo_id(url: &str) -> Option<String> {
    let tail = if let Some((_, rest)) = url.split_once(':') {
        if rest.starts_with("//") {
            // scheme://host/owner/name
            let without_scheme = rest.trim_start_matches('/');
            let (_, path) = without_scheme.split_once('/')?;
            path
        } else {
            // scp-like git@host:owner/name
            rest
        }
    } else {
        return None;
    };

    let tail = tail.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = tail.rsplitn(2, '/');
    let name = parts.next()?;
    let owner = parts.next()?;
    if owner.is_empty() || name.is_empty() {
        return None;
    }
    let owner = owner.rsplit('/').next()?;
    Some(format!("{owner}/{name}"))
}

#[derive(Debug)]
struct CacheEntry {
    info: RepoInfo,
    fetched_at: Instant,
}

/// TTL cache in front of [`resolve_repo`], keyed by working directory.
#[derive(Debug)]
pub struct RepoCache {
    entries: HashMap<PathBuf, CacheEntry>,
    ttl: Duration,
}

impl Default for RepoCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RepoCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Cached repository facts for `cwd`, re-resolving when the entry is
    /// missing or older than the TTL.
    pub fn lookup(&mut self, cwd: &Path) -> RepoInfo {
        if let Some(entry) = self.entries.get(cwd) {
            if entry.fetched_at.elapsed() < self.ttl {
                return entry.info.clone();
            }
        }
        let info = resolve_repo(cwd);
        self.entries.insert(
            cwd.to_path_buf(),
            CacheEntry {
                info: info.clone(),
                fetched_at: Instant::now(),
            },
        );
        info
    }

    /// Drops the cached entry so the next lookup hits the filesystem.
    pub fn invalidate(&mut self, cwd: &Path) {
        self.entries.remove(cwd);
    }
}
