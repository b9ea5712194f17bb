use crate::common::artifacts::ArtifactSet;
use crate::config::settings::WorkerSettings;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("transcode script not found: {}", .0.display())]
    ScriptMissing(PathBuf),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("transcoder exited with code {0}")]
    Failed(i32),

    #[error("transcoder was terminated by a signal")]
    Terminated,

    #[error("transcoder produced no output")]
    NoOutput,

    #[error("transcoder output has no master playlist")]
    MissingManifest,

    #[error("working directory error: {0}")]
    Io(#[from] io::Error),
}

impl ExecutionError {
    /// Errors no retry can fix: the toolchain itself is absent.
    pub fn is_fatal(&self) -> bool {
        match self {
            ExecutionError::ScriptMissing(_) => true,
            ExecutionError::Spawn { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Turns a source file into HLS artifacts in the same directory.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, input: &Path) -> Result<ArtifactSet, ExecutionError>;
}

/// Runs `{shell} {script} {input file name}` with the input's directory as cwd.
pub struct ScriptExecutor {
    shell: String,
    script: PathBuf,
}

impl ScriptExecutor {
    pub fn new(shell: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            script: script.into(),
        }
    }

    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self::new(settings.shell.clone(), settings.script.clone())
    }
}

async fn forward_lines<R>(reader: Option<R>, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "transcoder::encoder", stream, "{}", line);
    }
}

#[async_trait]
impl Executor for ScriptExecutor {
    async fn run(&self, input: &Path) -> Result<ArtifactSet, ExecutionError> {
        // The child runs in the working directory, so a relative script path
        // must be resolved against ours first.
        let script = std::path::absolute(&self.script)?;
        if !tokio::fs::try_exists(&script).await? {
            return Err(ExecutionError::ScriptMissing(script));
        }

        let workdir = input.parent().unwrap_or_else(|| Path::new("."));
        let file_name = input.file_name().unwrap_or(input.as_os_str());

        debug!(script = %script.display(), workdir = %workdir.display(), "Spawning transcoder");
        let mut child = Command::new(&self.shell)
            .arg(&script)
            .arg(file_name)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: self.shell.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, _, _) = tokio::join!(
            child.wait(),
            forward_lines(stdout, "stdout"),
            forward_lines(stderr, "stderr"),
        );
        let status = status?;

        if !status.success() {
            return Err(match status.code() {
                Some(code) => ExecutionError::Failed(code),
                None => ExecutionError::Terminated,
            });
        }

        let artifacts = ArtifactSet::scan(workdir).await?;
        if artifacts.is_empty() {
            return Err(ExecutionError::NoOutput);
        }
        if !artifacts.has_master_playlist() {
            return Err(ExecutionError::MissingManifest);
        }
        Ok(artifacts)
    }
}
