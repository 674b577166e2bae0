use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use clm_domain::{ChannelVersions, ConfigVersion};
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ChannelError;
use crate::vcs::{SystemGit, VcsRunner};

/// Capability for resolving symbolic channels to revisions and materializing
/// per-caller working copies. The git variant ([`GitChannelSource`]) is one
/// realization; alternative realizations (local directory, archive) should
/// plug in without changes to the queue that consumes this trait.
#[async_trait]
pub trait ChannelSource: Send + Sync {
    /// Refresh the local mirror and enumerate branches.
    async fn update(&self) -> Result<ChannelVersions, ChannelError>;

    /// Materialize a private working copy at `version`. Ownership of the
    /// returned [`Config`] passes to the caller until it calls `delete`.
    async fn get(&self, version: &ConfigVersion) -> Result<Config, ChannelError>;

    /// Remove a working copy previously returned by `get`.
    async fn delete(&self, config: Config) -> Result<(), ChannelError>;
}

/// Opaque filesystem path to a materialized working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitChannelConfig {
    pub repository_url: String,
    pub workdir: PathBuf,
    #[serde(default)]
    pub ssh_private_key_file: Option<PathBuf>,
}

/// Git-backed [`ChannelSource`]: maps channels (branches) to revisions
/// (commit hashes) by mirroring a remote repository and cloning per-request
/// working copies from that mirror.
pub struct GitChannelSource<R: VcsRunner = SystemGit> {
    workdir: PathBuf,
    repository_url: String,
    repo_name: String,
    repo_dir: PathBuf,
    ssh_private_key_file: Option<PathBuf>,
    /// Serializes all repository-mutating operations (mirror creation,
    /// `remote update`). `get` runs outside this mutex once the mirror
    /// exists, because each call writes to a unique directory.
    mutex: Mutex<()>,
    runner: Arc<R>,
    suffix_counter: AtomicU64,
}

impl GitChannelSource<SystemGit> {
    pub fn new(config: GitChannelConfig) -> Result<Self, ChannelError> {
        Self::with_runner(config, SystemGit::default())
    }
}

impl<R: VcsRunner> GitChannelSource<R> {
    pub fn with_runner(config: GitChannelConfig, runner: R) -> Result<Self, ChannelError> {
        let workdir = std::fs::canonicalize(&config.workdir).or_else(|_| {
            // canonicalize requires the path to exist; fall back to an
            // absolute join against the current dir for workdirs that
            // haven't been created yet.
            std::env::current_dir().map(|cwd| cwd.join(&config.workdir))
        })?;

        let repo_name = parse_repo_name(&config.repository_url)?;
        let repo_dir = workdir.join(&repo_name);

        Ok(GitChannelSource {
            workdir,
            repository_url: config.repository_url,
            repo_name,
            repo_dir,
            ssh_private_key_file: config.ssh_private_key_file,
            mutex: Mutex::new(()),
            runner: Arc::new(runner),
            suffix_counter: AtomicU64::new(0),
        })
    }

    /// Environment for subprocesses that touch the remote over SSH. Empty
    /// when no key is configured.
    fn ssh_env(&self) -> Vec<(String, String)> {
        match &self.ssh_private_key_file {
            Some(key) => vec![(
                "GIT_SSH_COMMAND".to_string(),
                format!("ssh -i {} -o 'StrictHostKeyChecking no'", key.display()),
            )],
            None => vec![],
        }
    }

    fn next_suffix(&self) -> u64 {
        // Time-plus-counter: nanos since epoch XORed with a per-source
        // monotonic counter, so two calls landing in the same clock tick
        // (entirely possible under concurrent `Get`) still diverge.
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let seq = self.suffix_counter.fetch_add(1, Ordering::Relaxed);
        nanos ^ seq
    }

    async fn available_channels(&self) -> Result<ChannelVersions, ChannelError> {
        let git_dir = self.repo_dir.to_string_lossy().into_owned();
        let out = self
            .runner
            .run(&["--git-dir", &git_dir, "show-ref", "--heads"], None, &[])
            .await?;

        let mut result = std::collections::HashMap::new();
        for line in out.lines() {
            if line.is_empty() {
                continue;
            }
            let chunks: Vec<&str> = line.splitn(2, ' ').collect();
            if chunks.len() != 2 {
                return Err(ChannelError::Malformed(format!(
                    "invalid line in show-ref output: {}",
                    line
                )));
            }
            let hash = chunks[0];
            let channel = chunks[1].replacen("refs/heads/", "", 1);
            result.insert(channel, ConfigVersion::new(hash));
        }
        Ok(ChannelVersions::new(result))
    }
}

#[async_trait]
impl<R: VcsRunner> ChannelSource for GitChannelSource<R> {
    async fn update(&self) -> Result<ChannelVersions, ChannelError> {
        let _guard = self.mutex.lock().await;

        if !self.repo_dir.exists() {
            info!(repo = %self.repo_name, "mirroring repository for the first time");
            self.runner
                .run(
                    &["clone", "--mirror", &self.repository_url, &self.repo_dir.to_string_lossy()],
                    None,
                    &self.ssh_env(),
                )
                .await?;
        }

        let git_dir = self.repo_dir.to_string_lossy().into_owned();
        self.runner
            .run(&["--git-dir", &git_dir, "remote", "update", "--prune"], None, &self.ssh_env())
            .await?;

        self.available_channels().await
    }

    async fn get(&self, version: &ConfigVersion) -> Result<Config, ChannelError> {
        let suffix = self.next_suffix();
        let dir_name = format!("{}_{}_{}", self.repo_name, version.as_str(), suffix);
        let target = self.workdir.join(dir_name);

        let src_url = format!("file://{}", self.repo_dir.display());
        self.runner
            .run(&["clone", &src_url, &target.to_string_lossy()], None, &[])
            .await?;

        self.runner
            .run(&["-C", &target.to_string_lossy(), "checkout", version.as_str()], None, &[])
            .await?;

        Ok(Config { path: target })
    }

    async fn delete(&self, config: Config) -> Result<(), ChannelError> {
        debug!(path = %config.path.display(), "removing working copy");
        tokio::fs::remove_dir_all(&config.path).await.map_err(ChannelError::Io)
    }
}

/// Extract the trailing `[\w-]+` path segment (optionally followed by
/// `.git`) from a repository URL. Works across ssh, https, and bare local
/// paths, with or without a trailing slash.
fn parse_repo_name(repo_url: &str) -> Result<String, ChannelError> {
    static_repo_name_re()
        .captures(repo_url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            ChannelError::Malformed(format!(
                "could not parse repository name from uri: {}",
                repo_url
            ))
        })
}

fn static_repo_name_re() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/?([\w-]+)(\.git)?$").expect("static regex"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::testing::FakeGit;

    #[test]
    fn parses_https_url() {
        assert_eq!(parse_repo_name("https://example.com/org/my-repo.git").unwrap(), "my-repo");
    }

    #[test]
    fn parses_ssh_url() {
        assert_eq!(parse_repo_name("git@example.com:org/my-repo.git").unwrap(), "my-repo");
    }

    #[test]
    fn parses_url_without_dot_git_suffix() {
        assert_eq!(parse_repo_name("https://example.com/org/my-repo").unwrap(), "my-repo");
    }

    #[test]
    fn parses_url_with_trailing_slash() {
        assert_eq!(parse_repo_name("https://example.com/org/my-repo/").unwrap(), "my-repo");
    }

    #[test]
    fn rejects_empty_url() {
        assert!(parse_repo_name("").is_err());
    }

    fn test_source(fake: FakeGit) -> GitChannelSource<FakeGit> {
        let dir = tempfile::tempdir().unwrap();
        let config = GitChannelConfig {
            repository_url: "https://example.com/org/demo.git".to_string(),
            workdir: dir.into_path(),
            ssh_private_key_file: None,
        };
        GitChannelSource::with_runner(config, fake).unwrap()
    }

    #[tokio::test]
    async fn update_clones_mirror_on_first_call_then_reuses_it() {
        let fake = FakeGit::new().with_show_ref(
            "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef refs/heads/dev\n\
             cafebabecafebabecafebabecafebabecafebabe refs/heads/main\n",
        );
        let source = test_source(fake);

        let versions = source.update().await.unwrap();
        assert_eq!(versions.version("dev").unwrap().as_str(), "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef");
        assert_eq!(versions.version("main").unwrap().as_str(), "cafebabecafebabecafebabecafebabecafebabe");

        let calls = source.runner.calls();
        assert!(calls.iter().any(|c| c.contains(&"--mirror".to_string())));

        // Second update must not re-clone the mirror.
        source.update().await.unwrap();
        let clone_calls = source.runner.calls().iter().filter(|c| c.contains(&"--mirror".to_string())).count();
        assert_eq!(clone_calls, 1);
    }

    #[tokio::test]
    async fn malformed_show_ref_line_fails() {
        let fake = FakeGit::new().with_show_ref("not-a-valid-line\n");
        let source = test_source(fake);
        assert!(matches!(source.update().await, Err(ChannelError::Malformed(_))));
    }

    #[tokio::test]
    async fn get_clones_into_a_fresh_directory_and_checks_out_the_version() {
        let fake = FakeGit::new();
        let source = test_source(fake);
        // Seed the mirror dir so `get` (which doesn't require `update` first
        // in this fake) has something to "clone" in spirit; the fake doesn't
        // touch the filesystem so this just exercises the naming scheme.
        let version = ConfigVersion::new("a".repeat(40));

        let cfg1 = source.get(&version).await.unwrap();
        let cfg2 = source.get(&version).await.unwrap();
        assert_ne!(cfg1.path, cfg2.path, "concurrent Get calls must get unique working copies");

        let calls = source.runner.calls();
        assert!(calls.iter().any(|c| c.first().map(String::as_str) == Some("checkout")
            && c.last().map(String::as_str) == Some(version.as_str())));
    }

    #[tokio::test]
    async fn ssh_key_sets_git_ssh_command_for_remote_touching_calls() {
        let fake = FakeGit::new();
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_rsa");
        std::fs::write(&key, "fake key").unwrap();
        let config = GitChannelConfig {
            repository_url: "git@example.com:org/demo.git".to_string(),
            workdir: dir.into_path(),
            ssh_private_key_file: Some(key.clone()),
        };
        let source = GitChannelSource::with_runner(config, fake).unwrap();
        source.update().await.unwrap();

        let env_calls = source.runner.envs();
        assert!(env_calls.iter().any(|env| env
            .iter()
            .any(|(k, v)| k == "GIT_SSH_COMMAND" && v.contains(&key.display().to_string()))));
    }
}
