use crate::align::LibraryType;
use clap::builder::styling::AnsiColor;
use clap::builder::Styles;
use clap::{Args, Parser, Subcommand};

const fn extra_build_info() -> &'static str {
    match option_env!("CARGO_BUILD_DESC") {
        Some(e) => e,
        None => env!("CARGO_PKG_VERSION"),
    }
}
pub const VERSION: &str = extra_build_info();
const INFO_STRING: &str = "
chimerapipe version ";
const AFTER_STRING: &str = "
   ──────────────────────────────────
   alignment and chimera nomination pipelines for paired-end RNA-seq";

// colouring of the help
const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().bold())
    .usage(AnsiColor::BrightMagenta.on_default().bold())
    .literal(AnsiColor::BrightMagenta.on_default())
    .placeholder(AnsiColor::White.on_default());

#[derive(Parser)]
#[command(
    version = VERSION,
    about = format!("{}{}{}", INFO_STRING, VERSION, AFTER_STRING),
    arg_required_else_help = true,
    flatten_help = true,
    styles = STYLES
)]
pub struct Cli {
    /// JSON file with the locations of bowtie2, the interpreters and the pipeline scripts
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// bowtie2 settings shared by the paired-end alignments
#[derive(Args, Debug)]
pub struct PairedAlignArgs {
    /// the number of alignment threads
    #[arg(short = 'p', long, default_value_t = 1)]
    pub threads: usize,

    /// minimum fragment length
    #[arg(short = 'I', long, default_value_t = 0)]
    pub min_fragment_length: u32,

    /// maximum fragment length
    #[arg(short = 'X', long, default_value_t = 1000)]
    pub max_fragment_length: u32,

    /// the maximum number of alignments searched per read (bowtie2 -M)
    #[arg(short = 'M', long, default_value_t = 1)]
    pub max_hits: u32,

    /// library type, where the first two characters give the mate orientation
    /// (`fr`, `rf` or `ff`), e.g. `fr-unstranded`
    #[arg(
        long,
        value_parser = |x: &str| LibraryType::try_from(x),
        verbatim_doc_comment
    )]
    pub library_type: LibraryType,

    /// where pairs which do not align concordantly are written
    #[arg(long)]
    pub unaligned: String,

    /// the log file which receives the standard error of every stage
    #[arg(long)]
    pub log: String,

    /// the output .bam
    #[arg(short)]
    pub output: String,

    /// the .fastq for the first mate
    pub read1: String,

    /// the .fastq for the second mate
    pub read2: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Nominate chimera candidates from the discordant read pairs of a .bam
    #[command(arg_required_else_help = true)]
    Nominate {
        /// name of the job, used in log messages
        job_name: String,

        /// the input .bam
        bam_file: String,

        /// directory for intermediate files; created if it does not exist
        tmp_dir: String,

        /// the output candidates file
        output_file: String,

        /// gene annotation .bed
        #[arg(long)]
        gene_file: String,

        /// directory containing the BEDTools binaries, if they are not on PATH
        #[arg(long)]
        bedtools_path: Option<String>,
    },

    /// Interleave paired .fastq files, trimming reads longer than the segment length
    #[command(arg_required_else_help = true)]
    TrimMerge {
        /// the input .fastq files, one per mate
        #[arg(required = true, num_args = 1..)]
        fastq: Vec<String>,

        /// reads longer than this are truncated and tagged with their mate number
        #[arg(long)]
        segment_length: usize,

        /// the output .fastq, or `-` for standard output
        #[arg(short, default_value = "-")]
        output: String,
    },

    /// Align paired-end reads and write a .bam
    #[command(arg_required_else_help = true)]
    AlignPe {
        /// the bowtie2 index
        #[arg(long)]
        index: String,

        #[command(flatten)]
        align: PairedAlignArgs,
    },

    /// Align paired-end reads to a transcriptome and write a .bam in genome coordinates
    #[command(arg_required_else_help = true)]
    AlignTranscriptome {
        /// the bowtie2 transcriptome index
        #[arg(long)]
        transcriptome_index: String,

        /// the genome index, used to translate coordinates
        #[arg(long)]
        genome_index: String,

        /// the transcript annotation file
        #[arg(long)]
        transcripts: String,

        #[command(flatten)]
        align: PairedAlignArgs,
    },

    /// Align single reads and write a .bam. A failed run removes the output
    #[command(arg_required_else_help = true)]
    AlignSr {
        /// the bowtie2 index
        #[arg(long)]
        index: String,

        /// the number of alignment threads
        #[arg(short = 'p', long, default_value_t = 1)]
        threads: usize,

        /// the maximum number of alignments searched per read (bowtie2 -M)
        #[arg(short = 'M', long, default_value_t = 1)]
        max_hits: u32,

        /// the log file which receives the standard error of every stage
        #[arg(long)]
        log: String,

        /// the output .bam
        #[arg(short)]
        output: String,

        /// the input .fastq
        fastq: String,
    },

    /// Trim both mates to a segment length, align the segments and filter multi-hits into a .bam
    #[command(arg_required_else_help = true)]
    AlignPeSr {
        /// the bowtie2 index
        #[arg(long)]
        index: String,

        /// the transcript annotation file used by the multi-hit filter
        #[arg(long)]
        transcripts: String,

        /// directory for the interleaved segment .fastq
        #[arg(long)]
        tmp_dir: String,

        /// reads longer than this are truncated before alignment
        #[arg(long)]
        segment_length: usize,

        /// the number of alignments reported per segment (bowtie2 -k)
        #[arg(short = 'k', long, default_value_t = 1)]
        max_hits: u32,

        /// alignments with more hits than this are filtered
        #[arg(long, default_value_t = 1)]
        max_multihits: u32,

        /// the number of alignment threads
        #[arg(short = 'p', long, default_value_t = 1)]
        threads: usize,

        /// the log file which receives the standard error of every stage
        #[arg(long)]
        log: String,

        /// the output .bam
        #[arg(short)]
        output: String,

        /// the .fastq for the first mate
        read1: String,

        /// the .fastq for the second mate
        read2: String,
    },
}
