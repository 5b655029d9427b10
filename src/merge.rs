use crate::io::{get_writer, until_err, write_record, FastqRecord};
use needletail::errors::ParseError;
use needletail::parser::FastqReader;
use needletail::FastxReader;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which input ran out of records while the others still had some.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarlyExhaustion {
    pub input: PathBuf,
    /// number of complete templates merged before the input ran out
    pub after: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeSummary {
    pub templates: usize,
    pub truncated: usize,
    pub exhausted_early: Option<EarlyExhaustion>,
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("no input .fastq files given")]
    NoInputs,

    #[error("unable to open {path:?}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed record in {path:?}")]
    Parse { path: PathBuf, source: ParseError },

    #[error("unable to write merged reads to {output:?}")]
    Write {
        output: PathBuf,
        source: std::io::Error,
    },
}

struct MateInput {
    path: PathBuf,
    reader: FastqReader<File>,
}

/// Reads several FASTQ files in lockstep, yielding one record from each per template.
///
/// Iteration ends as soon as any input is exhausted. Whether that happened while other inputs
/// still had records is reported by `finish`.
pub struct LockstepReads {
    inputs: Vec<MateInput>,
    templates: usize,
    exhausted: Option<usize>,
}

impl LockstepReads {
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self, MergeError> {
        if paths.is_empty() {
            return Err(MergeError::NoInputs);
        }

        let inputs = paths
            .iter()
            .map(|p| {
                let path = p.as_ref().to_path_buf();
                let file = File::open(&path).map_err(|source| MergeError::Open {
                    path: path.clone(),
                    source,
                })?;
                Ok(MateInput {
                    path,
                    reader: FastqReader::new(file),
                })
            })
            .collect::<Result<Vec<_>, MergeError>>()?;

        Ok(LockstepReads {
            inputs,
            templates: 0,
            exhausted: None,
        })
    }

    /// Consumes the reader and reports whether the inputs had unequal record counts.
    pub fn finish(mut self) -> Option<EarlyExhaustion> {
        let first_empty = self.exhausted?;

        // the first input to run out is only the short one if another still has records
        let others_remaining = first_empty > 0
            || self.inputs[1..]
                .iter_mut()
                .any(|input| input.reader.next().is_some());

        others_remaining.then(|| EarlyExhaustion {
            input: self.inputs[first_empty].path.clone(),
            after: self.templates,
        })
    }
}

impl Iterator for LockstepReads {
    type Item = Result<Vec<FastqRecord>, MergeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted.is_some() {
            return None;
        }

        let mut template = Vec::with_capacity(self.inputs.len());
        for (mate, input) in self.inputs.iter_mut().enumerate() {
            match input.reader.next() {
                Some(Ok(rec)) => template.push(FastqRecord::from(&rec)),
                Some(Err(source)) => {
                    return Some(Err(MergeError::Parse {
                        path: input.path.clone(),
                        source,
                    }))
                }
                None => {
                    self.exhausted = Some(mate);
                    return None;
                }
            }
        }

        self.templates += 1;
        Some(Ok(template))
    }
}

/// Interleaves paired FASTQ files into a single stream, trimming long reads.
///
/// Any read longer than `segment_length` is cut down to `segment_length` bases and has its
/// mate index (`0`, `1`, ...) written in front of its read name.
///
/// # Arguments
///
/// * `inputs` - the .fastq files, one per mate, with records in the same order
/// * `output` - the output path, or `-` for standard output
/// * `segment_length` - the maximum read length to emit
///
/// # Returns
///
/// A `MergeSummary`. Inputs with unequal record counts are not an error: merging stops at the
/// shortest input and `exhausted_early` records which input that was.
///
/// # Errors
///
/// This function will return an error if an input cannot be opened or parsed, or the output
/// cannot be written.
pub fn trim_and_merge<P: AsRef<Path>>(
    inputs: &[P],
    output: impl AsRef<Path>,
    segment_length: usize,
) -> Result<MergeSummary, MergeError> {
    let output = output.as_ref();
    let write_err = |source| MergeError::Write {
        output: output.to_path_buf(),
        source,
    };

    let mut reads = LockstepReads::open(inputs)?;
    let mut writer = get_writer(output).map_err(write_err)?;
    let mut summary = MergeSummary::default();

    // Start with a placeholder error object. This will be mutated if there are errors during
    // iteration through the reads.
    let mut err = Ok(());

    reads
        .by_ref()
        .scan(&mut err, until_err)
        .try_for_each(|template| -> std::io::Result<()> {
            for (mate, mut rec) in template.into_iter().enumerate() {
                if rec.len() > segment_length {
                    rec.tag_and_truncate(mate, segment_length);
                    summary.truncated += 1;
                }
                write_record(&mut writer, &rec)?;
            }
            summary.templates += 1;
            Ok(())
        })
        .map_err(write_err)?;

    err?;
    writer.flush().map_err(write_err)?;

    summary.exhausted_early = reads.finish();
    if let Some(early) = &summary.exhausted_early {
        warn!(
            "{:?} ran out of records after {} templates; remaining reads in the other inputs were not merged",
            early.input, early.after
        );
    }

    debug!(
        "Merged {} templates ({} reads truncated to {} bases)",
        summary.templates, summary.truncated, segment_length
    );

    Ok(summary)
}
