pub mod docker;

pub use docker::DockerExecutor;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::Result;

/// Environment bindings handed to an executed script. Kept sorted so the
/// container sees the same environment on every run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Env(BTreeMap<String, String>);

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K, V>(&mut self, key: K, value: V) -> Option<String>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// `KEY=value` pairs in key order, the form container runtimes take.
    pub fn kv_vec(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// One bind mount between the host working tree and the container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: PathBuf,
}

/// Everything needed to run one shell snippet in an isolated environment.
#[derive(Clone, Debug, Default)]
pub struct ExecOpts {
    pub image: String,
    pub script: String,
    pub env: Env,
    pub working_dir: Option<PathBuf>,
    pub mounts: Vec<Mount>,
}

impl ExecOpts {
    pub fn new(image: impl Into<String>) -> Self {
        ExecOpts {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn script(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        self
    }

    pub fn env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    pub fn working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    pub fn mount(mut self, host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        self.mounts.push(Mount {
            host: host.into(),
            container: container.into(),
        });
        self
    }
}

/// Collected output of one executed script.
#[derive(Debug, Default)]
pub struct Output {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: u64,
}

impl Output {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Capability that runs a shell snippet inside a container image with the
/// work directories bind mounted. The backing technology is abstract; the
/// shipped implementation talks to a Docker daemon.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, opts: &ExecOpts) -> Result<Output>;
}
