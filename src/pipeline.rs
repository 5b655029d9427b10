use itertools::Itertools;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use thiserror::Error;

/// A single external process in a pipeline.
///
/// The argument vector is only turned into a `Command` when the pipeline starts.
#[derive(Debug, Clone)]
pub struct Stage {
    name: String,
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl Stage {
    pub fn new(name: impl Into<String>, program: impl AsRef<OsStr>) -> Self {
        Stage {
            name: name.into(),
            program: PathBuf::from(program.as_ref()),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.envs.extend(
            vars.into_iter()
                .map(|(k, v)| (k.as_ref().to_os_string(), v.as_ref().to_os_string())),
        );
        self
    }

    /// The command line as it would be typed into a shell, for logging
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|a| a.to_string_lossy())
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).envs(self.envs.iter().cloned());
        cmd
    }
}

/// Where the standard output of the last stage goes.
#[derive(Debug, Clone, Default)]
pub enum Sink {
    #[default]
    Inherit,
    Null,
    File(PathBuf),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline has no stages")]
    Empty,

    #[error("unable to start {stage} ({program:?})")]
    Spawn {
        stage: String,
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("unable to wait for {stage}")]
    Wait {
        stage: String,
        source: std::io::Error,
    },

    #[error("{stage} failed ({status})")]
    StageFailed {
        stage: String,
        status: ExitStatus,
        /// earlier stages which were still running and had to be killed
        terminated: Vec<String>,
    },

    #[error("unable to open {path:?} for stage output")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unable to share the log file with the pipeline stages")]
    Log(#[source] std::io::Error),
}

impl PipelineError {
    /// The stage at fault, if the error belongs to a single stage
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::Spawn { stage, .. }
            | PipelineError::Wait { stage, .. }
            | PipelineError::StageFailed { stage, .. } => Some(stage),
            PipelineError::Empty | PipelineError::Output { .. } | PipelineError::Log(_) => None,
        }
    }
}

struct Running {
    name: String,
    child: Child,
}

/// An ordered chain of stages, each reading the standard output of the one before it.
///
/// The first stage reads from `/dev/null`. Standard error of every stage goes to the log file
/// if one is given, otherwise to our own standard error.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
    sink: Sink,
    log: Option<File>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn sink(mut self, sink: Sink) -> Self {
        self.sink = sink;
        self
    }

    pub fn log_to(mut self, log: File) -> Self {
        self.log = Some(log);
        self
    }

    fn sink_stdio(&self) -> Result<Stdio, PipelineError> {
        Ok(match &self.sink {
            Sink::Inherit => Stdio::inherit(),
            Sink::Null => Stdio::null(),
            Sink::File(path) => {
                let file = File::create(path).map_err(|source| PipelineError::Output {
                    path: path.clone(),
                    source,
                })?;
                Stdio::from(file)
            }
        })
    }

    fn stderr_stdio(&self) -> Result<Stdio, PipelineError> {
        match &self.log {
            Some(log) => log_stdio(log),
            None => Ok(Stdio::inherit()),
        }
    }

    /// Starts every stage, then waits for them starting from the last one.
    ///
    /// The first stage found to have failed stops the wait: every stage that has not yet
    /// exited is killed and reaped, and the failure is returned. Nothing is retried and no
    /// wait has a timeout.
    ///
    /// # Errors
    ///
    /// * `StageFailed` if a stage exits unsuccessfully (including by signal)
    /// * `Spawn` if a stage cannot be started, in which case all stages started so far are killed
    /// * `Wait` if the exit status of a stage cannot be collected
    /// * `Output` if the final output file cannot be created
    /// * `Log` if the log file cannot be handed to a stage
    pub fn run(self) -> Result<(), PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineError::Empty);
        }

        let mut running: Vec<Running> = Vec::with_capacity(self.stages.len());
        let mut upstream = None;

        for (i, stage) in self.stages.iter().enumerate() {
            let is_last = i + 1 == self.stages.len();
            let mut cmd = stage.command();

            cmd.stdin(match upstream.take() {
                Some(stdout) => Stdio::from(stdout),
                None => Stdio::null(),
            });

            let stdout = if is_last {
                self.sink_stdio()
            } else {
                Ok(Stdio::piped())
            };
            let io = stdout.and_then(|stdout| Ok((stdout, self.stderr_stdio()?)));
            let (stdout, stderr) = match io {
                Ok(v) => v,
                Err(e) => {
                    terminate(&mut running);
                    return Err(e);
                }
            };
            cmd.stdout(stdout).stderr(stderr);

            debug!("Starting {}: {}", stage.name, stage.command_line());

            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(source) => {
                    terminate(&mut running);
                    return Err(PipelineError::Spawn {
                        stage: stage.name.clone(),
                        program: stage.program.clone(),
                        source,
                    });
                }
            };

            upstream = child.stdout.take();
            running.push(Running {
                name: stage.name.clone(),
                child,
            });
        }

        // wait for the most downstream stage first
        while let Some(mut proc) = running.pop() {
            let status = match proc.child.wait() {
                Ok(status) => status,
                Err(source) => {
                    terminate(&mut running);
                    return Err(PipelineError::Wait {
                        stage: proc.name,
                        source,
                    });
                }
            };

            if !status.success() {
                error!("Error during {} ({status})", proc.name);
                let terminated = terminate(&mut running);
                return Err(PipelineError::StageFailed {
                    stage: proc.name,
                    status,
                    terminated,
                });
            }
            debug!("{} finished", proc.name);
        }

        Ok(())
    }
}

fn log_stdio(log: &File) -> Result<Stdio, PipelineError> {
    log.try_clone().map(Stdio::from).map_err(PipelineError::Log)
}

/// Kills every stage which has not exited yet, and reaps all of them.
///
/// # Returns
///
/// The names of the stages which had to be killed.
fn terminate(running: &mut Vec<Running>) -> Vec<String> {
    let mut terminated = Vec::new();

    while let Some(mut proc) = running.pop() {
        if let Ok(Some(_)) = proc.child.try_wait() {
            continue;
        }

        if let Err(e) = proc.child.kill() {
            warn!("Unable to kill {}: {e}", proc.name);
        }
        if let Err(e) = proc.child.wait() {
            warn!("Unable to reap {}: {e}", proc.name);
        }
        debug!("Terminated {}", proc.name);
        terminated.push(proc.name);
    }

    terminated
}
