use crate::config::{ToolConfig, INTERLEAVED_TRIMMED_FASTQ_FILE};
use crate::merge::{trim_and_merge, MergeError};
use crate::pipeline::{Pipeline, PipelineError, Sink, Stage};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

// flags shared by every bowtie2 invocation
const BOWTIE2_ARGS: [&str; 4] = ["--phred33", "--end-to-end", "--very-sensitive", "--reorder"];
// flags added when aligning mate pairs
const BOWTIE2_PE_ARGS: [&str; 2] = ["--no-mixed", "--no-discordant"];

const SAM_TO_BAM_SCRIPT: &str = "sam_to_bam.py";
const SAM_TO_BAM_PESR_SCRIPT: &str = "sam_to_bam_pesr.py";
const TRANSCRIPTOME_TO_GENOME_SCRIPT: &str = "transcriptome_to_genome.py";
const MULTIHIT_FILTER_SCRIPT: &str = "filter_transcriptome_multihits.py";

/// Expected relative orientation of the two mates, which bowtie2 takes as `--fr`, `--rf` or `--ff`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LibraryOrientation {
    Fr,
    Rf,
    Ff,
}

impl LibraryOrientation {
    pub fn bowtie2_flag(self) -> &'static str {
        match self {
            LibraryOrientation::Fr => "--fr",
            LibraryOrientation::Rf => "--rf",
            LibraryOrientation::Ff => "--ff",
        }
    }
}

/// A library type such as `fr-unstranded`. The first two characters give the mate orientation;
/// the full string is handed on to the coordinate converter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryType {
    name: String,
    orientation: LibraryOrientation,
}

impl LibraryType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn orientation(&self) -> LibraryOrientation {
        self.orientation
    }
}

/// Error type for parsing a library type string.
#[derive(Debug)]
pub struct ParseLibraryTypeErr(String);

impl std::fmt::Display for ParseLibraryTypeErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseLibraryTypeErr {}

impl<'a> TryFrom<&'a str> for LibraryType {
    type Error = ParseLibraryTypeErr;

    fn try_from(arg: &'a str) -> Result<LibraryType, Self::Error> {
        let orientation = match arg.get(..2).map(|s| s.to_lowercase()).as_deref() {
            Some("fr") => LibraryOrientation::Fr,
            Some("rf") => LibraryOrientation::Rf,
            Some("ff") => LibraryOrientation::Ff,
            _ => {
                return Err(ParseLibraryTypeErr(indoc::formatdoc! {"
                Invalid library type '{arg}'. The first two characters give the mate \
                orientation, one of `fr`, `rf` or `ff`, as in:
                  --library-type fr-unstranded
                  --library-type rf-firststrand
                "}))
            }
        };

        Ok(LibraryType {
            name: arg.to_string(),
            orientation,
        })
    }
}

/// How bowtie2 caps multi-mapping reads.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HitLimit {
    /// `-M`: search for up to this many extra alignments, report the best
    Search(u32),
    /// `-k`: report up to this many alignments per read
    Report(u32),
}

/// The reads handed to bowtie2.
#[derive(Clone, Debug)]
pub enum ReadInput<'a> {
    Paired {
        mates: [&'a Path; 2],
        orientation: LibraryOrientation,
        min_fragment_length: u32,
        max_fragment_length: u32,
        /// where bowtie2 writes pairs that fail to align concordantly
        unaligned: &'a Path,
    },
    Unpaired(&'a Path),
}

/// A typed bowtie2 command line.
#[derive(Clone, Debug)]
pub struct Bowtie2<'a> {
    pub threads: usize,
    pub hits: HitLimit,
    pub index: &'a Path,
    pub reads: ReadInput<'a>,
}

impl Bowtie2<'_> {
    pub fn to_stage(&self, tools: &ToolConfig) -> Stage {
        let mut stage = tools.stage("alignment", &tools.bowtie2_bin).args(BOWTIE2_ARGS);
        if let ReadInput::Paired { .. } = self.reads {
            stage = stage.args(BOWTIE2_PE_ARGS);
        }

        stage = stage.arg("-p").arg(self.threads.to_string());
        stage = match self.hits {
            HitLimit::Search(n) => stage.arg("-M").arg(n.to_string()),
            HitLimit::Report(n) => stage.arg("-k").arg(n.to_string()),
        };

        match &self.reads {
            ReadInput::Paired {
                mates,
                orientation,
                min_fragment_length,
                max_fragment_length,
                unaligned,
            } => stage
                .arg("-I")
                .arg(min_fragment_length.to_string())
                .arg("-X")
                .arg(max_fragment_length.to_string())
                .arg(orientation.bowtie2_flag())
                .arg("-x")
                .arg(self.index)
                .arg("-1")
                .arg(mates[0])
                .arg("-2")
                .arg(mates[1])
                .arg("--un-conc")
                .arg(unaligned),
            ReadInput::Unpaired(fastq) => stage.arg("-x").arg(self.index).arg("-U").arg(fastq),
        }
    }
}

/// Numeric alignment settings shared by the paired-end variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlignerOptions {
    pub threads: usize,
    pub min_fragment_length: u32,
    pub max_fragment_length: u32,
    pub max_hits: u32,
}

impl Default for AlignerOptions {
    fn default() -> Self {
        AlignerOptions {
            threads: 1,
            min_fragment_length: 0,
            max_fragment_length: 1000,
            max_hits: 1,
        }
    }
}

/// Paired-end alignment against a single index.
#[derive(Clone, Debug)]
pub struct PairedEndJob {
    pub index: PathBuf,
    pub fastq_files: [PathBuf; 2],
    pub unaligned_path: PathBuf,
    pub bam_file: PathBuf,
    pub log_file: PathBuf,
    pub library_type: LibraryType,
    pub options: AlignerOptions,
}

/// Paired-end alignment against a transcriptome, with results translated to genome coordinates.
/// `options.max_hits` caps the number of transcriptome hits.
#[derive(Clone, Debug)]
pub struct TranscriptomeJob {
    pub transcriptome_index: PathBuf,
    pub genome_index: PathBuf,
    pub transcript_file: PathBuf,
    pub fastq_files: [PathBuf; 2],
    pub unaligned_path: PathBuf,
    pub bam_file: PathBuf,
    pub log_file: PathBuf,
    pub library_type: LibraryType,
    pub options: AlignerOptions,
}

/// Single-read alignment.
#[derive(Clone, Debug)]
pub struct SingleReadJob {
    pub index: PathBuf,
    pub fastq_file: PathBuf,
    pub bam_file: PathBuf,
    pub log_file: PathBuf,
    pub max_hits: u32,
    pub threads: usize,
}

/// Both mates trimmed to a short segment, interleaved and aligned as single reads; the converter
/// restores full-length CIGAR strings and multi-hits are filtered against the transcripts.
#[derive(Clone, Debug)]
pub struct SegmentedJob {
    pub index: PathBuf,
    pub transcript_file: PathBuf,
    pub fastq_files: [PathBuf; 2],
    pub bam_file: PathBuf,
    pub log_file: PathBuf,
    pub tmp_dir: PathBuf,
    pub segment_length: usize,
    pub max_hits: u32,
    pub max_multihits: u32,
    pub threads: usize,
}

/// What happens to a partially written BAM file when the pipeline fails.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OnFailure {
    KeepOutput,
    RemoveOutput,
}

#[derive(Error, Debug)]
pub enum AlignError {
    #[error("unable to create log file {path:?}")]
    Log {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("unable to trim and merge reads")]
    Merge(#[from] MergeError),
}

fn script_stage(name: &str, tools: &ToolConfig, script: &str) -> Stage {
    tools.script_stage(name, &tools.python_bin, script)
}

/// Creates (or truncates) the log file that all stages write their standard error to.
fn open_log(path: &Path, description: &str) -> Result<File, AlignError> {
    let log_err = |source| AlignError::Log {
        path: path.to_path_buf(),
        source,
    };

    let mut log = File::create(path).map_err(log_err)?;
    writeln!(
        log,
        "# chimerapipe v{} {} started {}",
        crate::cli::VERSION,
        description,
        chrono::offset::Local::now().to_rfc3339()
    )
    .map_err(log_err)?;

    Ok(log)
}

fn run_alignment(
    pipeline: Pipeline,
    bam_file: &Path,
    on_failure: OnFailure,
) -> Result<(), AlignError> {
    let result = pipeline.run();

    if let Err(e) = &result {
        error!(
            "Alignment pipeline failed at {}: {e}",
            e.stage().unwrap_or("startup")
        );
        if on_failure == OnFailure::RemoveOutput && bam_file.exists() {
            debug!("Removing partial output {bam_file:?}");
            if let Err(e) = std::fs::remove_file(bam_file) {
                warn!("Unable to remove partial output {bam_file:?}: {e}");
            }
        }
    }

    result.map_err(AlignError::from)
}

/// Aligns paired-end reads and writes a BAM file.
///
/// bowtie2 SAM output is piped straight into the SAM to BAM converter. On failure the output
/// BAM is left as it is and must be treated as unusable.
pub fn align_pe(job: &PairedEndJob, tools: &ToolConfig) -> Result<(), AlignError> {
    info!("Aligning paired-end reads to {:?}", job.index);
    let log = open_log(&job.log_file, "paired-end alignment")?;

    let aligner = Bowtie2 {
        threads: job.options.threads,
        hits: HitLimit::Search(job.options.max_hits),
        index: &job.index,
        reads: ReadInput::Paired {
            mates: [&job.fastq_files[0], &job.fastq_files[1]],
            orientation: job.library_type.orientation(),
            min_fragment_length: job.options.min_fragment_length,
            max_fragment_length: job.options.max_fragment_length,
            unaligned: &job.unaligned_path,
        },
    };

    let pipeline = Pipeline::new()
        .stage(aligner.to_stage(tools))
        .stage(
            script_stage("SAM to BAM conversion", tools, SAM_TO_BAM_SCRIPT)
                .arg("-")
                .arg(&job.bam_file),
        )
        .sink(Sink::Null)
        .log_to(log);

    run_alignment(pipeline, &job.bam_file, OnFailure::KeepOutput)
}

/// Aligns paired-end reads to a transcriptome index and writes a BAM file in genome
/// coordinates.
pub fn align_transcriptome_pe(job: &TranscriptomeJob, tools: &ToolConfig) -> Result<(), AlignError> {
    info!("Aligning paired-end reads to transcriptome {:?}", job.transcriptome_index);
    let log = open_log(&job.log_file, "transcriptome alignment")?;

    let aligner = Bowtie2 {
        threads: job.options.threads,
        hits: HitLimit::Search(job.options.max_hits),
        index: &job.transcriptome_index,
        reads: ReadInput::Paired {
            mates: [&job.fastq_files[0], &job.fastq_files[1]],
            orientation: job.library_type.orientation(),
            min_fragment_length: job.options.min_fragment_length,
            max_fragment_length: job.options.max_fragment_length,
            unaligned: &job.unaligned_path,
        },
    };

    let converter = script_stage(
        "transcriptome to genome conversion",
        tools,
        TRANSCRIPTOME_TO_GENOME_SCRIPT,
    )
    .arg("--library-type")
    .arg(job.library_type.name())
    .arg("--sam")
    .arg(&job.genome_index)
    .arg(&job.transcript_file)
    .arg("-")
    .arg(&job.bam_file);

    let pipeline = Pipeline::new()
        .stage(aligner.to_stage(tools))
        .stage(converter)
        .sink(Sink::Null)
        .log_to(log);

    run_alignment(pipeline, &job.bam_file, OnFailure::KeepOutput)
}

/// Aligns single reads and writes a BAM file.
///
/// Unlike the paired-end variants, a failed run deletes whatever BAM file was written.
pub fn align_sr(job: &SingleReadJob, tools: &ToolConfig) -> Result<(), AlignError> {
    info!("Aligning reads from {:?}", job.fastq_file);
    let log = open_log(&job.log_file, "single-read alignment")?;

    let aligner = Bowtie2 {
        threads: job.threads,
        hits: HitLimit::Search(job.max_hits),
        index: &job.index,
        reads: ReadInput::Unpaired(&job.fastq_file),
    };

    let pipeline = Pipeline::new()
        .stage(aligner.to_stage(tools))
        .stage(
            script_stage("SAM to BAM conversion", tools, SAM_TO_BAM_SCRIPT)
                .arg("-")
                .arg(&job.bam_file),
        )
        .sink(Sink::Null)
        .log_to(log);

    run_alignment(pipeline, &job.bam_file, OnFailure::RemoveOutput)
}

/// Trims both mates to `segment_length`, aligns the interleaved segments, restores full-length
/// alignments and filters multi-hits into the output BAM file.
///
/// The interleaved file is written to `tmp_dir` and is deleted if trimming fails. It is kept
/// after alignment.
pub fn align_pe_sr(job: &SegmentedJob, tools: &ToolConfig) -> Result<(), AlignError> {
    let interleaved = job.tmp_dir.join(INTERLEAVED_TRIMMED_FASTQ_FILE);
    info!(
        "Trimming reads to {} bases into {:?}",
        job.segment_length, interleaved
    );

    let merged = trim_and_merge(&job.fastq_files, &interleaved, job.segment_length);
    if let Err(e) = merged {
        if interleaved.exists() {
            if let Err(e) = std::fs::remove_file(&interleaved) {
                warn!("Unable to remove {interleaved:?}: {e}");
            }
        }
        return Err(e.into());
    }

    info!("Aligning trimmed segments to {:?}", job.index);
    let log = open_log(&job.log_file, "segmented paired-end alignment")?;

    let aligner = Bowtie2 {
        threads: job.threads,
        hits: HitLimit::Report(job.max_hits),
        index: &job.index,
        reads: ReadInput::Unpaired(&interleaved),
    };

    let converter = script_stage("SAM to BAM conversion", tools, SAM_TO_BAM_PESR_SCRIPT)
        .arg("-")
        .arg(&interleaved)
        .arg("-");

    let filter = script_stage("multihit filtering", tools, MULTIHIT_FILTER_SCRIPT)
        .arg("--max-multihits")
        .arg(job.max_multihits.to_string())
        .arg(&job.transcript_file)
        .arg("-")
        .arg(&job.bam_file);

    let pipeline = Pipeline::new()
        .stage(aligner.to_stage(tools))
        .stage(converter)
        .stage(filter)
        .sink(Sink::Null)
        .log_to(log);

    run_alignment(pipeline, &job.bam_file, OnFailure::KeepOutput)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    // converter stub: copies stdin to the last argument, or to stdout when that is `-`
    const PASS_THROUGH: &str =
        "for a in \"$@\"; do last=\"$a\"; done\nif [ \"$last\" = \"-\" ]; then cat; else cat > \"$last\"; fi\n";
    // converter stub: leaves a partial output behind and fails
    const FAIL_PARTWAY: &str =
        "for a in \"$@\"; do last=\"$a\"; done\n[ \"$last\" = \"-\" ] || echo partial > \"$last\"\nexit 1\n";

    struct Stubs {
        dir: tempfile::TempDir,
        tools: ToolConfig,
    }

    impl Stubs {
        /// `aligner_body` runs as the bowtie2 stub after it records its arguments.
        fn new(aligner_body: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let scripts = dir.path().join("scripts");
            fs::create_dir(&scripts).unwrap();

            let bowtie2 = dir.path().join("bowtie2");
            let args_file = dir.path().join("bowtie2.args");
            fs::write(
                &bowtie2,
                format!(
                    "#!/bin/sh\necho \"$@\" > '{}'\n{aligner_body}\n",
                    args_file.display()
                ),
            )
            .unwrap();
            fs::set_permissions(&bowtie2, fs::Permissions::from_mode(0o755)).unwrap();

            for script in [
                SAM_TO_BAM_SCRIPT,
                SAM_TO_BAM_PESR_SCRIPT,
                TRANSCRIPTOME_TO_GENOME_SCRIPT,
                MULTIHIT_FILTER_SCRIPT,
            ] {
                fs::write(scripts.join(script), PASS_THROUGH).unwrap();
            }

            let tools = ToolConfig {
                bowtie2_bin: bowtie2,
                python_bin: PathBuf::from("sh"),
                script_dir: scripts,
                ..ToolConfig::default()
            };
            Stubs { dir, tools }
        }

        fn failing(self, script: &str) -> Self {
            fs::write(self.tools.script(script), FAIL_PARTWAY).unwrap();
            self
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn aligner_args(&self) -> String {
            fs::read_to_string(self.path("bowtie2.args")).unwrap()
        }

        fn paired_job(&self) -> PairedEndJob {
            PairedEndJob {
                index: self.path("index"),
                fastq_files: [self.path("r1.fq"), self.path("r2.fq")],
                unaligned_path: self.path("unaligned.fq"),
                bam_file: self.path("out.bam"),
                log_file: self.path("align.log"),
                library_type: LibraryType::try_from("fr-unstranded").unwrap(),
                options: AlignerOptions::default(),
            }
        }

        fn single_job(&self) -> SingleReadJob {
            SingleReadJob {
                index: self.path("index"),
                fastq_file: self.path("reads.fq"),
                bam_file: self.path("out.bam"),
                log_file: self.path("align.log"),
                max_hits: 5,
                threads: 2,
            }
        }
    }

    const FAKE_SAM: &str = "printf '@HD\\tVN:1.0\\n'";

    #[test]
    fn library_type_uses_first_two_characters() {
        let lib = LibraryType::try_from("rf-firststrand").unwrap();
        assert_eq!(lib.orientation(), LibraryOrientation::Rf);
        assert_eq!(lib.name(), "rf-firststrand");
        assert_eq!(LibraryType::try_from("ff").unwrap().orientation(), LibraryOrientation::Ff);
    }

    #[test]
    fn unknown_library_type_is_rejected() {
        let err = LibraryType::try_from("xy-unstranded").unwrap_err();
        assert!(err.to_string().starts_with("Invalid library type 'xy-unstranded'."));
        assert!(LibraryType::try_from("f").is_err());
    }

    #[test]
    fn paired_bowtie2_arguments() {
        let tools = ToolConfig::default();
        let aligner = Bowtie2 {
            threads: 8,
            hits: HitLimit::Search(3),
            index: Path::new("idx"),
            reads: ReadInput::Paired {
                mates: [Path::new("a.fq"), Path::new("b.fq")],
                orientation: LibraryOrientation::Rf,
                min_fragment_length: 50,
                max_fragment_length: 600,
                unaligned: Path::new("un.fq"),
            },
        };

        assert_eq!(
            aligner.to_stage(&tools).command_line(),
            "bowtie2 --phred33 --end-to-end --very-sensitive --reorder --no-mixed --no-discordant \
             -p 8 -M 3 -I 50 -X 600 --rf -x idx -1 a.fq -2 b.fq --un-conc un.fq"
        );
    }

    #[test]
    fn unpaired_bowtie2_arguments() {
        let tools = ToolConfig::default();
        let aligner = Bowtie2 {
            threads: 1,
            hits: HitLimit::Report(20),
            index: Path::new("idx"),
            reads: ReadInput::Unpaired(Path::new("reads.fq")),
        };

        assert_eq!(
            aligner.to_stage(&tools).command_line(),
            "bowtie2 --phred33 --end-to-end --very-sensitive --reorder -p 1 -k 20 -x idx -U reads.fq"
        );
    }

    #[test]
    fn paired_end_alignment_writes_bam() {
        let stubs = Stubs::new(FAKE_SAM);
        let job = stubs.paired_job();

        align_pe(&job, &stubs.tools).unwrap();

        assert_eq!(fs::read_to_string(&job.bam_file).unwrap(), "@HD\tVN:1.0\n");
        assert!(stubs.aligner_args().contains("--fr"));
        assert!(fs::read_to_string(&job.log_file).unwrap().starts_with("# chimerapipe"));
    }

    #[test]
    fn paired_end_failure_keeps_partial_bam() {
        let stubs = Stubs::new(FAKE_SAM).failing(SAM_TO_BAM_SCRIPT);
        let job = stubs.paired_job();

        let err = align_pe(&job, &stubs.tools).unwrap_err();

        assert!(matches!(err, AlignError::Pipeline(PipelineError::StageFailed { .. })));
        assert!(job.bam_file.exists());
    }

    #[test]
    fn single_read_failure_removes_partial_bam() {
        let stubs = Stubs::new(FAKE_SAM).failing(SAM_TO_BAM_SCRIPT);
        let job = stubs.single_job();

        assert!(align_sr(&job, &stubs.tools).is_err());
        assert!(!job.bam_file.exists());
    }

    #[test]
    fn single_read_aligner_failure_removes_bam() {
        let stubs = Stubs::new(&format!("{FAKE_SAM}\nexit 1"));
        let job = stubs.single_job();

        let err = align_sr(&job, &stubs.tools).unwrap_err();

        match err {
            AlignError::Pipeline(e) => assert_eq!(e.stage(), Some("alignment")),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!job.bam_file.exists());
    }

    #[test]
    fn single_read_alignment_arguments() {
        let stubs = Stubs::new(FAKE_SAM);
        let job = stubs.single_job();

        align_sr(&job, &stubs.tools).unwrap();

        let args = stubs.aligner_args();
        assert!(args.contains("-p 2"));
        assert!(args.contains("-M 5"));
        assert!(args.contains(&format!("-U {}", job.fastq_file.display())));
        assert!(job.bam_file.exists());
    }

    #[test]
    fn converter_failure_kills_hung_aligner() {
        let stubs = Stubs::new("exec sleep 30").failing(SAM_TO_BAM_SCRIPT);
        let job = stubs.paired_job();

        match align_pe(&job, &stubs.tools).unwrap_err() {
            AlignError::Pipeline(PipelineError::StageFailed {
                stage, terminated, ..
            }) => {
                assert_eq!(stage, "SAM to BAM conversion");
                assert_eq!(terminated, vec!["alignment".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn transcriptome_alignment_passes_library_type_to_converter() {
        let stubs = Stubs::new(FAKE_SAM);
        let paired = stubs.paired_job();
        let job = TranscriptomeJob {
            transcriptome_index: stubs.path("transcriptome"),
            genome_index: stubs.path("genome"),
            transcript_file: stubs.path("transcripts.txt"),
            fastq_files: paired.fastq_files,
            unaligned_path: paired.unaligned_path,
            bam_file: paired.bam_file,
            log_file: paired.log_file,
            library_type: LibraryType::try_from("ff-secondstrand").unwrap(),
            options: AlignerOptions {
                max_hits: 40,
                ..AlignerOptions::default()
            },
        };

        // the converter stub records its arguments in the BAM file instead
        fs::write(
            stubs.tools.script(TRANSCRIPTOME_TO_GENOME_SCRIPT),
            "for a in \"$@\"; do last=\"$a\"; done\ncat > /dev/null\necho \"$@\" > \"$last\"\n",
        )
        .unwrap();

        align_transcriptome_pe(&job, &stubs.tools).unwrap();

        let args = stubs.aligner_args();
        assert!(args.contains("-M 40"));
        assert!(args.contains("--ff"));
        assert!(args.contains(&format!("-x {}", job.transcriptome_index.display())));

        let converter_args = fs::read_to_string(&job.bam_file).unwrap();
        assert!(converter_args.starts_with("--library-type ff-secondstrand --sam"));
    }

    #[test]
    fn transcriptome_converter_failure_keeps_bam_and_kills_aligner() {
        let stubs = Stubs::new("exec sleep 30").failing(TRANSCRIPTOME_TO_GENOME_SCRIPT);
        let paired = stubs.paired_job();
        let job = TranscriptomeJob {
            transcriptome_index: stubs.path("transcriptome"),
            genome_index: stubs.path("genome"),
            transcript_file: stubs.path("transcripts.txt"),
            fastq_files: paired.fastq_files,
            unaligned_path: paired.unaligned_path,
            bam_file: paired.bam_file,
            log_file: paired.log_file,
            library_type: paired.library_type,
            options: AlignerOptions::default(),
        };

        match align_transcriptome_pe(&job, &stubs.tools).unwrap_err() {
            AlignError::Pipeline(PipelineError::StageFailed {
                stage, terminated, ..
            }) => {
                assert_eq!(stage, "transcriptome to genome conversion");
                assert_eq!(terminated, vec!["alignment".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(fs::read_to_string(&job.bam_file).unwrap(), "partial\n");
    }

    fn segmented_job(stubs: &Stubs) -> SegmentedJob {
        let r1 = stubs.path("r1.fq");
        let r2 = stubs.path("r2.fq");
        fs::write(&r1, "@t1/1\nACGTACGTAC\n+\nIIIIIIIIII\n").unwrap();
        fs::write(&r2, "@t1/2\nTTGG\n+\nIIII\n").unwrap();

        SegmentedJob {
            index: stubs.path("index"),
            transcript_file: stubs.path("transcripts.txt"),
            fastq_files: [r1, r2],
            bam_file: stubs.path("out.bam"),
            log_file: stubs.path("align.log"),
            tmp_dir: stubs.dir.path().to_path_buf(),
            segment_length: 4,
            max_hits: 10,
            max_multihits: 2,
            threads: 1,
        }
    }

    #[test]
    fn segmented_alignment_runs_three_stages() {
        let stubs = Stubs::new(FAKE_SAM);
        let job = segmented_job(&stubs);

        align_pe_sr(&job, &stubs.tools).unwrap();

        let interleaved = job.tmp_dir.join(INTERLEAVED_TRIMMED_FASTQ_FILE);
        assert_eq!(
            fs::read_to_string(&interleaved).unwrap(),
            "@0t1/1\nACGT\n+\nIIII\n@t1/2\nTTGG\n+\nIIII\n"
        );
        assert!(stubs.aligner_args().contains("-k 10"));
        assert_eq!(fs::read_to_string(&job.bam_file).unwrap(), "@HD\tVN:1.0\n");
    }

    #[test]
    fn segmented_alignment_in_non_utf8_tmp_dir() {
        use std::os::unix::ffi::OsStrExt;

        let stubs = Stubs::new(FAKE_SAM);
        let mut job = segmented_job(&stubs);
        job.tmp_dir = stubs.dir.path().join(std::ffi::OsStr::from_bytes(b"tmp\xff"));
        fs::create_dir(&job.tmp_dir).unwrap();

        align_pe_sr(&job, &stubs.tools).unwrap();

        // the aligner reads the same file the merge wrote
        let interleaved = job.tmp_dir.join(INTERLEAVED_TRIMMED_FASTQ_FILE);
        assert!(interleaved.is_file());
        let expected = [&b"-U "[..], interleaved.as_os_str().as_bytes(), &b"\n"[..]].concat();
        assert!(fs::read(stubs.path("bowtie2.args")).unwrap().ends_with(&expected));
    }

    #[test]
    fn segmented_filter_failure_kills_earlier_stages() {
        let stubs = Stubs::new("exec sleep 30").failing(MULTIHIT_FILTER_SCRIPT);
        let job = segmented_job(&stubs);

        match align_pe_sr(&job, &stubs.tools).unwrap_err() {
            AlignError::Pipeline(PipelineError::StageFailed {
                stage, terminated, ..
            }) => {
                assert_eq!(stage, "multihit filtering");
                assert!(terminated.contains(&"alignment".to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }
        // no cleanup for this variant
        assert!(job.bam_file.exists());
    }

    #[test]
    fn segmented_trim_failure_removes_interleaved_file() {
        let stubs = Stubs::new(FAKE_SAM);
        let job = segmented_job(&stubs);
        // quality shorter than the sequence
        fs::write(&job.fastq_files[1], "@t1/2\nTTGG\n+\nII\n").unwrap();

        let err = align_pe_sr(&job, &stubs.tools).unwrap_err();

        assert!(matches!(err, AlignError::Merge(_)));
        assert!(!job.tmp_dir.join(INTERLEAVED_TRIMMED_FASTQ_FILE).exists());
        assert!(!stubs.path("bowtie2.args").exists());
    }
}
