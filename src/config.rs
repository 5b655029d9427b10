use crate::pipeline::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

// intermediate files written into the caller's temp directory
pub const SPLIT_CHIMERAS_FILE: &str = "split_chimeras.bedpe.txt";
pub const GENE_OVERLAP_FILE: &str = "chimera_gene_overlap_bedpe.txt";
pub const FILTERED_OVERLAP_FILE: &str = "filtered_overlapping_genes_bedpe.txt";
pub const CANDIDATES_DIR: &str = "candidates";
pub const INTERLEAVED_TRIMMED_FASTQ_FILE: &str = "interleaved_trimmed.fq";

/// Name of the BEDTools binary used to intersect read pairs with genes
pub const PAIR_TO_BED_BIN: &str = "pairToBed";

/// The outcome of a job, as reported through the process exit code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Error,
}

impl JobStatus {
    pub fn code(self) -> u8 {
        match self {
            JobStatus::Success => 0,
            JobStatus::Error => 1,
        }
    }
}

impl From<JobStatus> for std::process::ExitCode {
    fn from(status: JobStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

/// Locations of every external tool the pipelines shell out to.
///
/// Scripts (`*.py`, `*.pl`) are resolved relative to `script_dir` and run through the
/// configured interpreter, so a test can point the interpreters at `sh` and the script
/// directory at a set of stubs.
///
/// Any field missing from a JSON config file keeps its default.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ToolConfig {
    pub bowtie2_bin: PathBuf,
    pub python_bin: PathBuf,
    pub perl_bin: PathBuf,
    pub script_dir: PathBuf,
    /// directory holding the BEDTools binaries; `None` searches `PATH`
    pub bedtools_dir: Option<PathBuf>,
    /// extra environment variables for every tool, e.g. `PERL5LIB`
    pub env: BTreeMap<String, String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            bowtie2_bin: PathBuf::from("bowtie2"),
            python_bin: PathBuf::from("python"),
            perl_bin: PathBuf::from("perl"),
            script_dir: PathBuf::from("scripts"),
            bedtools_dir: None,
            env: BTreeMap::new(),
        }
    }
}

impl ToolConfig {
    /// Reads a tool configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// This function will return an error if the file cannot be opened or is not valid JSON
    /// for a `ToolConfig`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Full path of a pipeline script
    pub fn script(&self, name: &str) -> PathBuf {
        self.script_dir.join(name)
    }

    /// A stage running `program` with the configured environment.
    pub fn stage(&self, name: &str, program: impl AsRef<OsStr>) -> Stage {
        Stage::new(name, program).envs(&self.env)
    }

    /// A stage running one of the pipeline scripts through `interpreter`.
    pub fn script_stage(&self, name: &str, interpreter: &Path, script: &str) -> Stage {
        self.stage(name, interpreter).arg(self.script(script))
    }

    /// The `pairToBed` binary, inside `bedtools_dir` when one is configured.
    pub fn pair_to_bed(&self) -> PathBuf {
        match &self.bedtools_dir {
            Some(dir) => dir.join(PAIR_TO_BED_BIN),
            None => PathBuf::from(PAIR_TO_BED_BIN),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to open tool config {path:?}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid tool config {path:?}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
