extern crate env_logger;
#[macro_use]
extern crate log;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

mod align;
mod cli;
mod config;
mod io;
mod merge;
mod nominate;
mod pipeline;

use align::{AlignerOptions, PairedEndJob, SegmentedJob, SingleReadJob, TranscriptomeJob};
use cli::{Cli, Commands, PairedAlignArgs};
use config::{JobStatus, ToolConfig};
use nominate::NominateJob;

/// Loads the tool configuration from `--config`, or the defaults if none is given.
fn load_tools(config: &Option<String>) -> Result<ToolConfig> {
    match config {
        Some(path) => {
            info!("Using tool config {path}");
            Ok(ToolConfig::from_path(path)?)
        }
        None => Ok(ToolConfig::default()),
    }
}

impl From<&PairedAlignArgs> for AlignerOptions {
    fn from(args: &PairedAlignArgs) -> Self {
        AlignerOptions {
            threads: args.threads,
            min_fragment_length: args.min_fragment_length,
            max_fragment_length: args.max_fragment_length,
            max_hits: args.max_hits,
        }
    }
}

fn try_main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let cli = Cli::parse();

    info!("chimerapipe v{}", cli::VERSION);

    let mut tools = load_tools(&cli.config)?;
    if let Commands::Nominate {
        bedtools_path: Some(path),
        ..
    } = &cli.command
    {
        tools.bedtools_dir = Some(PathBuf::from(path));
    }
    debug!("Tool config in effect: {}", serde_json::to_string(&tools)?);

    match &cli.command {
        Commands::Nominate {
            job_name,
            bam_file,
            tmp_dir,
            output_file,
            gene_file,
            ..
        } => {
            let job = NominateJob {
                job_name: job_name.clone(),
                bam_file: bam_file.into(),
                tmp_dir: tmp_dir.into(),
                output_file: output_file.into(),
                gene_file: gene_file.into(),
            };
            nominate::nominate_chimeras(&job, &tools)?;
            info!("{job_name}: Completed chimera nomination to {output_file}");
        }
        Commands::TrimMerge {
            fastq,
            segment_length,
            output,
        } => {
            let summary = merge::trim_and_merge(fastq, output, *segment_length)?;
            info!(
                "Merged {} templates, {} reads truncated",
                summary.templates, summary.truncated
            );
        }
        Commands::AlignPe { index, align } => {
            let job = PairedEndJob {
                index: index.into(),
                fastq_files: [(&align.read1).into(), (&align.read2).into()],
                unaligned_path: (&align.unaligned).into(),
                bam_file: (&align.output).into(),
                log_file: (&align.log).into(),
                library_type: align.library_type.clone(),
                options: align.into(),
            };
            align::align_pe(&job, &tools).context("Paired-end alignment failed")?;
            info!("Completed alignment to {}", align.output);
        }
        Commands::AlignTranscriptome {
            transcriptome_index,
            genome_index,
            transcripts,
            align,
        } => {
            let job = TranscriptomeJob {
                transcriptome_index: transcriptome_index.into(),
                genome_index: genome_index.into(),
                transcript_file: transcripts.into(),
                fastq_files: [(&align.read1).into(), (&align.read2).into()],
                unaligned_path: (&align.unaligned).into(),
                bam_file: (&align.output).into(),
                log_file: (&align.log).into(),
                library_type: align.library_type.clone(),
                options: align.into(),
            };
            align::align_transcriptome_pe(&job, &tools)
                .context("Transcriptome alignment failed")?;
            info!("Completed alignment to {}", align.output);
        }
        Commands::AlignSr {
            index,
            threads,
            max_hits,
            log,
            output,
            fastq,
        } => {
            let job = SingleReadJob {
                index: index.into(),
                fastq_file: fastq.into(),
                bam_file: output.into(),
                log_file: log.into(),
                max_hits: *max_hits,
                threads: *threads,
            };
            align::align_sr(&job, &tools).context("Single-read alignment failed")?;
            info!("Completed alignment to {output}");
        }
        Commands::AlignPeSr {
            index,
            transcripts,
            tmp_dir,
            segment_length,
            max_hits,
            max_multihits,
            threads,
            log,
            output,
            read1,
            read2,
        } => {
            let job = SegmentedJob {
                index: index.into(),
                transcript_file: transcripts.into(),
                fastq_files: [read1.into(), read2.into()],
                bam_file: output.into(),
                log_file: log.into(),
                tmp_dir: tmp_dir.into(),
                segment_length: *segment_length,
                max_hits: *max_hits,
                max_multihits: *max_multihits,
                threads: *threads,
            };
            align::align_pe_sr(&job, &tools).context("Segmented alignment failed")?;
            info!("Completed alignment to {output}");
        }
    };
    Ok(())
}

fn main() -> ExitCode {
    match try_main() {
        Ok(()) => JobStatus::Success.into(),
        Err(err) => {
            error!("{}", err);

            // report any errors that are produced
            err.chain()
                .skip(1)
                .for_each(|cause| error!("  because: {}", cause));

            JobStatus::Error.into()
        }
    }
}
