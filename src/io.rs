use needletail::parser::SequenceRecord;
use std::fs::File;
use std::io::{stdout, BufWriter, Write};
use std::path::Path;

/// Output path which stands for standard output
pub const STDOUT_SENTINEL: &str = "-";

/// An owned FASTQ record, kept line for line so that it can be written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqRecord {
    /// The full header line, including the leading `@`
    pub header: Vec<u8>,
    pub seq: Vec<u8>,
    /// The third line, including the leading `+`
    pub placeholder: Vec<u8>,
    pub qual: Vec<u8>,
}

impl FastqRecord {
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    /// Truncates the sequence and quality to `length` bases, and encodes `mate` as the first
    /// characters of the read name so that the mate can be recovered after alignment.
    pub fn tag_and_truncate(&mut self, mate: usize, length: usize) {
        let mut header = format!("@{mate}").into_bytes();
        header.extend_from_slice(self.header.get(1..).unwrap_or_default());
        self.header = header;

        self.seq.truncate(length);
        self.qual.truncate(length);
    }
}

impl From<&SequenceRecord<'_>> for FastqRecord {
    fn from(rec: &SequenceRecord<'_>) -> Self {
        let mut header = Vec::with_capacity(rec.id().len() + 1);
        header.push(b'@');
        header.extend_from_slice(rec.id());

        // needletail only exposes the third line through the raw record
        let placeholder = rec
            .all()
            .split(|&b| b == b'\n')
            .nth(2)
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .unwrap_or(&b"+"[..]);

        FastqRecord {
            header,
            seq: rec.raw_seq().to_vec(),
            placeholder: placeholder.to_vec(),
            qual: rec.qual().unwrap_or(&[]).to_vec(),
        }
    }
}

/// Writes a record as four FASTQ lines.
pub fn write_record(writer: &mut impl Write, record: &FastqRecord) -> std::io::Result<()> {
    writer.write_all(&record.header)?;
    writer.write_all(b"\n")?;
    writer.write_all(&record.seq)?;
    writer.write_all(b"\n")?;
    writer.write_all(&record.placeholder)?;
    writer.write_all(b"\n")?;
    writer.write_all(&record.qual)?;
    writer.write_all(b"\n")
}

/// Creates a `BufWriter` for the given output path, where `-` means standard output.
///
/// # Errors
///
/// This function will return an error if the output file cannot be created.
pub fn get_writer(output: &Path) -> std::io::Result<BufWriter<Box<dyn Write + Send>>> {
    let inner = if output == Path::new(STDOUT_SENTINEL) {
        Box::new(stdout()) as Box<dyn Write + Send>
    } else {
        Box::new(File::create(output)?) as Box<dyn Write + Send>
    };
    Ok(BufWriter::new(inner))
}

/// Utility function to extract the error from an iterator and stop iteration immediately. Useful
/// for iterators which yield a `Result<T, E>`.
///
/// # Returns
///
/// This function returns an `Option<T>`. If the item is `Ok`, it returns `Some(T)`.
/// If the item is `Err`, it updates `err` with the error and returns `None`.
///
/// # Example
/// ```
/// let mut err = Ok(());
/// let items = vec![Ok(1), Ok(2), Err("error"), Ok(3)];
/// let results: Vec<_> = items
///   .into_iter()
///   .scan(&mut err, until_err)
///   .collect();
/// assert_eq!(results, vec![1, 2]);
/// assert!(err.is_err());
/// ```
pub fn until_err<T, E>(err: &mut &mut Result<(), E>, item: Result<T, E>) -> Option<T> {
    match item {
        Ok(item) => Some(item),
        Err(e) => {
            **err = Err(e);
            None
        }
    }
}
