//! Docker-backed executor. Every script run spawns a throwaway container
//! from the requested image with the work directories bind mounted, execs
//! the snippet through `bash -c`, streams its output, and removes the
//! container again. Cancellation kills the container mid-stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use docker_api::conn::TtyChunk;
use docker_api::opts::{ContainerCreateOpts, ContainerRemoveOpts, ExecCreateOpts};
use docker_api::{Docker, Exec};
use futures::StreamExt;
use tracing::{error, info, trace};
use uuid::Uuid;

use crate::runtime::{ExecOpts, Executor, Output};
use crate::{Error, Result};

#[cfg(unix)]
pub static DOCKER_SOCK: &str = "unix:///var/run/docker.sock";
#[cfg(not(unix))]
pub static DOCKER_SOCK: &str = "tcp://127.0.0.1:8080";

/// Length of significant characters of a container ID.
const CONTAINER_ID_LEN: usize = 12;

fn truncate(id: &str) -> &str {
    if id.len() > CONTAINER_ID_LEN {
        &id[..CONTAINER_ID_LEN]
    } else {
        id
    }
}

pub struct DockerExecutor {
    docker: Docker,
    is_running: Arc<AtomicBool>,
}

impl DockerExecutor {
    /// Connects to the daemon at `uri`. The `is_running` flag is shared with
    /// the pipeline; clearing it cancels any script currently executing.
    pub fn new(uri: &str, is_running: Arc<AtomicBool>) -> Result<Self> {
        let docker = Docker::new(uri)
            .map_err(|e| std::io::Error::other(format!("docker connection failed: {e}")))?;
        Ok(DockerExecutor { docker, is_running })
    }

    async fn remove_container(&self, container: &docker_api::Container) {
        let opts = ContainerRemoveOpts::builder().force(true).build();
        if let Err(e) = container.remove(&opts).await {
            error!(id = truncate(container.id().as_ref()), "failed to remove container: {e}");
        }
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    async fn run(&self, opts: &ExecOpts) -> Result<Output> {
        let name = format!("ipkger-{}", Uuid::new_v4().simple());

        let volumes: Vec<String> = opts
            .mounts
            .iter()
            .map(|m| format!("{}:{}", m.host.display(), m.container.display()))
            .collect();
        let create = ContainerCreateOpts::builder()
            .image(opts.image.as_str())
            .name(name.as_str())
            .command(vec!["/bin/sleep", "infinity"])
            .volumes(volumes)
            .build();

        let container = self
            .docker
            .containers()
            .create(&create)
            .await
            .map_err(map_docker_err)?;
        info!(id = truncate(container.id().as_ref()), image = %opts.image, "created container");

        if let Err(e) = container.start().await {
            self.remove_container(&container).await;
            return Err(map_docker_err(e));
        }

        let result = self.exec_script(&container, opts).await;
        self.remove_container(&container).await;
        result
    }
}

impl DockerExecutor {
    async fn exec_script(
        &self,
        container: &docker_api::Container,
        opts: &ExecOpts,
    ) -> Result<Output> {
        let mut builder = ExecCreateOpts::builder()
            .command(vec!["/bin/bash", "-c", opts.script.as_str()])
            .attach_stdout(true)
            .attach_stderr(true)
            .env(opts.env.kv_vec());
        if let Some(working_dir) = &opts.working_dir {
            builder = builder.working_dir(working_dir.to_string_lossy());
        }

        let exec = Exec::create(self.docker.clone(), container.id().as_ref(), &builder.build())
            .await
            .map_err(map_docker_err)?;
        let mut stream = exec.start();

        let mut output = Output::default();
        while let Some(chunk) = stream.next().await {
            if !self.is_running.load(Ordering::SeqCst) {
                trace!("cancellation requested, killing container");
                let _ = container.kill(None).await;
                return Err(Error::Canceled);
            }
            match chunk.map_err(|e| map_docker_err(e.into()))? {
                TtyChunk::StdOut(chunk) => {
                    let chunk = String::from_utf8_lossy(&chunk);
                    for line in chunk.lines() {
                        info!("{}", line.trim_end());
                        output.stdout.push(line.to_owned());
                    }
                }
                TtyChunk::StdErr(chunk) => {
                    let chunk = String::from_utf8_lossy(&chunk);
                    for line in chunk.lines() {
                        error!("{}", line.trim_end());
                        output.stderr.push(line.to_owned());
                    }
                }
                TtyChunk::StdIn(_) => unreachable!(),
            }
        }

        output.exit_code = exec
            .inspect()
            .await
            .map(|details| details.exit_code.unwrap_or_default() as u64)
            .map_err(map_docker_err)?;

        Ok(output)
    }
}

fn map_docker_err(e: docker_api::Error) -> Error {
    Error::Io(std::io::Error::other(format!("docker: {e}")))
}
