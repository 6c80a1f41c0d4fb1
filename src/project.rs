//! Project definitions and repository matching

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Per-project sliding-window webhook limit
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max: usize,
    pub window_secs: u64,
}

/// A configured deployment target, loaded from a `[[project]]` table.
#[derive(Deserialize, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    /// Repository URLs or `owner/name` paths this project deploys
    pub repositories: Vec<String>,
    /// Branch filter; empty means any ref
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
    /// Shell command run on every authorized push
    pub deploy: String,
    /// Working directory for the deploy command
    pub path: PathBuf,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("repositories", &self.repositories)
            .field("branches", &self.branches)
            .field("secret", &self.secret.as_ref().map(|_| "<REDACTED>"))
            .field("deploy", &self.deploy)
            .field("path", &self.path)
            .field("timeout_secs", &self.timeout_secs)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

impl Project {
    /// Returns the configured secret, if any
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    /// Returns true if deploying this project requires a valid credential.
    pub fn is_protected(&self) -> bool {
        self.secret.is_some()
    }

    /// Returns true if any of the project's patterns matches any of the
    /// given repository identities.
    pub fn matches_repository<S: AsRef<str>>(&self, identities: &[S]) -> bool {
        self.repositories.iter().any(|pattern| {
            let pattern = normalize_repository(pattern);
            identities
                .iter()
                .any(|id| repository_matches(&pattern, &normalize_repository(id.as_ref())))
        })
    }

    /// Branch filter check. An entry matches the short branch name
    /// (`main`) or the full ref (`refs/heads/main`). A project without a
    /// filter accepts any ref, including none.
    pub fn matches_ref(&self, git_ref: Option<&str>) -> bool {
        if self.branches.is_empty() {
            return true;
        }
        let Some(git_ref) = git_ref else {
            return false;
        };
        let short = git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref);
        self.branches.iter().any(|b| b == short || b == git_ref)
    }

    /// Deploy timeout, falling back to the dispatcher default
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }
}

/// Reduces a repository URL or path to a comparable form:
/// lowercase, no scheme, no user-info, no port, `/` instead of the
/// scp-style `:`, and no trailing `/` or `.git`.
///
/// `git@GitHub.com:Example/Repo.git`, `https://github.com/example/repo`
/// and `ssh://git@github.com:22/example/repo.git` all become
/// `github.com/example/repo`.
pub fn normalize_repository(raw: &str) -> String {
    let mut s = raw.trim().to_ascii_lowercase();

    let had_scheme = match s.find("://") {
        Some(idx) => {
            s = s[idx + 3..].to_string();
            true
        }
        None => false,
    };

    // user-info only lives in the host part
    let host_end = s.find('/').unwrap_or(s.len());
    if let Some(at) = s[..host_end].rfind('@') {
        s = s[at + 1..].to_string();
    }

    let host_end = s.find('/').unwrap_or(s.len());
    if let Some(colon) = s[..host_end].find(':') {
        let after = &s[colon + 1..];
        let port_len = after.find('/').unwrap_or(after.len());
        let is_port = port_len > 0 && after[..port_len].bytes().all(|b| b.is_ascii_digit());
        if is_port {
            s = format!("{}{}", &s[..colon], &after[port_len..]);
        } else if !had_scheme {
            s = format!("{}/{}", &s[..colon], after);
        }
    }

    let mut s = s.trim_end_matches('/');
    if let Some(stripped) = s.strip_suffix(".git") {
        s = stripped.trim_end_matches('/');
    }
    s.to_string()
}

/// Equal, or one is a path-segment suffix of the other
/// (`example/repo` vs `github.com/example/repo`). Both sides must be
/// normalized.
pub fn repository_matches(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (long, short) = if a.len() > b.len() { (a, b) } else { (b, a) };
    long.ends_with(short) && long.as_bytes()[long.len() - short.len() - 1] == b'/'
}

/// Read-only set of projects, shared across request handlers.
#[derive(Debug, Default)]
pub struct ProjectRegistry {
    projects: Vec<Arc<Project>>,
}

impl ProjectRegistry {
    pub fn new(projects: Vec<Project>) -> Self {
        Self {
            projects: projects.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn projects(&self) -> &[Arc<Project>] {
        &self.projects
    }

    pub fn get(&self, name: &str) -> Option<Arc<Project>> {
        self.projects.iter().find(|p| p.name == name).cloned()
    }

    /// Every project whose repository pattern matches one of the
    /// identities, regardless of branch filters.
    pub fn matching<S: AsRef<str>>(&self, identities: &[S]) -> Vec<Arc<Project>> {
        self.projects
            .iter()
            .filter(|p| p.matches_repository(identities))
            .cloned()
            .collect()
    }

    /// True if any project matching the identities carries a secret.
    pub fn any_protected<S: AsRef<str>>(&self, identities: &[S]) -> bool {
        self.projects
            .iter()
            .any(|p| p.is_protected() && p.matches_repository(identities))
    }
}

#[cfg(test)]
pub(crate) fn test_project(name: &str, repo: &str) -> Project {
    Project {
        name: name.to_string(),
        repositories: vec![repo.to_string()],
        branches: Vec::new(),
        secret: None,
        deploy: "true".to_string(),
        path: PathBuf::from("."),
        timeout_secs: None,
        rate_limit: None,
    }
}
