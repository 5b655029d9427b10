use crate::config::{
    ToolConfig, CANDIDATES_DIR, FILTERED_OVERLAP_FILE, GENE_OVERLAP_FILE, SPLIT_CHIMERAS_FILE,
};
use crate::pipeline::{Pipeline, PipelineError, Sink, Stage};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DISCORDANT_READS_SCRIPT: &str = "discordant_reads_to_chimeras.pl";
const FILTER_OVERLAPS_SCRIPT: &str = "filter_overlapping_chimeras.pl";
const EXTRACT_CANDIDATES_SCRIPT: &str = "extract_chimera_candidates.pl";

/// The steps of chimera nomination, in the order they run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NominateStep {
    DiscordantPairs,
    GeneOverlap,
    FilterOverlaps,
    ExtractCandidates,
}

impl fmt::Display for NominateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NominateStep::DiscordantPairs => "nominating chimeras",
            NominateStep::GeneOverlap => "finding overlapping genes",
            NominateStep::FilterOverlaps => "filtering overlapping genes",
            NominateStep::ExtractCandidates => "extracting chimeras",
        })
    }
}

#[derive(Error, Debug)]
pub enum NominateError {
    #[error("{job}: unable to create directory {path:?}")]
    CreateDir {
        job: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{job}: error {step}")]
    Step {
        job: String,
        step: NominateStep,
        source: PipelineError,
    },
}

/// Inputs for a chimera nomination run.
#[derive(Clone, Debug)]
pub struct NominateJob {
    /// only used to label log messages
    pub job_name: String,
    pub bam_file: PathBuf,
    pub tmp_dir: PathBuf,
    pub output_file: PathBuf,
    pub gene_file: PathBuf,
}

impl NominateJob {
    fn create_dir(&self, path: &Path) -> Result<(), NominateError> {
        if path.exists() {
            return Ok(());
        }
        info!("{}: Creating dir {:?}", self.job_name, path);
        std::fs::create_dir_all(path).map_err(|source| NominateError::CreateDir {
            job: self.job_name.clone(),
            path: path.to_path_buf(),
            source,
        })
    }

    fn run_step(&self, step: NominateStep, stage: Stage, sink: Sink) -> Result<(), NominateError> {
        Pipeline::new()
            .stage(stage)
            .sink(sink)
            .run()
            .map_err(|source| {
                error!("{}: Error {}", self.job_name, step);
                NominateError::Step {
                    job: self.job_name.clone(),
                    step,
                    source,
                }
            })
    }
}

fn perl_stage(tools: &ToolConfig, script: &str) -> Stage {
    tools.script_stage(script, &tools.perl_bin, script)
}

/// Nominates chimera candidates from the discordant read pairs of a BAM file.
///
/// Each step runs to completion and leaves its result in `tmp_dir`:
/// 1. discordant pairs are extracted as BEDPE into `split_chimeras.bedpe.txt`
/// 2. the pairs are intersected with `gene_file` by `pairToBed` into
///    `chimera_gene_overlap_bedpe.txt`
/// 3. redundant pairs are removed into `filtered_overlapping_genes_bedpe.txt`; anything the
///    script prints is discarded
/// 4. candidates are extracted into `candidates/`, with the summary written to `output_file`
///
/// # Errors
///
/// The first failing step stops the run and is returned; later steps are never started and
/// intermediate files are left in place.
pub fn nominate_chimeras(job: &NominateJob, tools: &ToolConfig) -> Result<(), NominateError> {
    job.create_dir(&job.tmp_dir)?;

    info!("{}: Nominate chimeras from BAM file", job.job_name);
    job.run_step(
        NominateStep::DiscordantPairs,
        perl_stage(tools, DISCORDANT_READS_SCRIPT)
            .arg("-b")
            .arg(&job.bam_file)
            .arg("-o")
            .arg(&job.tmp_dir),
        Sink::Inherit,
    )?;
    let split_chimeras = job.tmp_dir.join(SPLIT_CHIMERAS_FILE);

    info!("{}: Finding overlapping genes", job.job_name);
    let gene_overlap = job.tmp_dir.join(GENE_OVERLAP_FILE);
    job.run_step(
        NominateStep::GeneOverlap,
        tools
            .stage("pairToBed", tools.pair_to_bed())
            .args(["-type", "both", "-a"])
            .arg(&split_chimeras)
            .arg("-b")
            .arg(&job.gene_file),
        Sink::File(gene_overlap.clone()),
    )?;

    info!("{}: Removing unnecessary discordant pairs", job.job_name);
    let filtered = job.tmp_dir.join(FILTERED_OVERLAP_FILE);
    job.run_step(
        NominateStep::FilterOverlaps,
        perl_stage(tools, FILTER_OVERLAPS_SCRIPT)
            .arg("-i")
            .arg(&gene_overlap)
            .arg("-o")
            .arg(&filtered),
        Sink::Null,
    )?;

    info!("{}: Extracting chimeras", job.job_name);
    let candidates_dir = job.tmp_dir.join(CANDIDATES_DIR);
    job.create_dir(&candidates_dir)?;
    job.run_step(
        NominateStep::ExtractCandidates,
        perl_stage(tools, EXTRACT_CANDIDATES_SCRIPT)
            .arg("-i")
            .arg(&filtered)
            .arg("-o")
            .arg(&candidates_dir)
            .arg("-u")
            .arg(&job.gene_file),
        Sink::File(job.output_file.clone()),
    )?;

    Ok(())
}
