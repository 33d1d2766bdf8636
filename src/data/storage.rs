//! Sample sinks and the CSV loader.
//!
//! Every capture is written with the same three-column header, [`CSV_HEADER`]. Lines that
//! start with `#` are comments (the analysis cache block lives there) and are skipped on read.
use crate::core::{Sample, SampleSink};
use crate::error::AppResult;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Column names of the canonical capture file, in column order.
pub const CSV_HEADER: [&str; 3] = [
    "Current (uA)",
    "rx timestamp (us)",
    "board timestamp (ms)",
];

/// Streams samples into a CSV file.
pub struct CsvSampleWriter {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
}

impl CsvSampleWriter {
    /// Create (or truncate) `path` and write the header row. Missing parent directories are
    /// created.
    pub fn create(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)?;
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;

        info!("Writing samples to '{}'", path.display());
        Ok(Self {
            path,
            writer: Some(writer),
        })
    }

    /// Create a timestamped `capture_<YYYYmmdd_HHMMSS>.csv` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> AppResult<Self> {
        let file_name = format!(
            "capture_{}.csv",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );
        Self::create(dir.as_ref().join(file_name))
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleSink for CsvSampleWriter {
    fn write_sample(&mut self, sample: &Sample) -> AppResult<()> {
        match self.writer.as_mut() {
            Some(writer) => Ok(writer.serialize(sample)?),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("'{}' is already closed", self.path.display()),
            )
            .into()),
        }
    }

    fn close(&mut self) -> AppResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!("Closed '{}'", self.path.display());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    samples: Vec<Sample>,
    closed: bool,
}

/// In-memory sink, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

/// Read access to a [`MemorySink`] after it has been handed to a driver.
#[derive(Debug, Clone)]
pub struct MemorySinkHandle {
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a handle that shares this sink's storage.
    pub fn handle(&self) -> MemorySinkHandle {
        MemorySinkHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MemorySinkHandle {
    /// Snapshot of everything written so far.
    pub fn samples(&self) -> Vec<Sample> {
        lock(&self.state).samples.clone()
    }

    /// Whether the sink has been closed.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

impl SampleSink for MemorySink {
    fn write_sample(&mut self, sample: &Sample) -> AppResult<()> {
        lock(&self.state).samples.push(*sample);
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        lock(&self.state).closed = true;
        Ok(())
    }
}

/// Load every sample of a capture file, skipping `#` comment lines.
pub fn read_samples(path: impl AsRef<Path>) -> AppResult<Vec<Sample>> {
    let path = path.as_ref();
    let samples = read_samples_from_reader(File::open(path)?)?;
    debug!("Loaded {} samples from '{}'", samples.len(), path.display());
    Ok(samples)
}

/// Load samples from any CSV source using the capture file conventions.
pub fn read_samples_from_reader<R: Read>(reader: R) -> AppResult<Vec<Sample>> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut samples = Vec::new();
    for record in reader.deserialize::<Sample>() {
        samples.push(record?);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_writer_emits_header_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.csv");

        let mut writer = CsvSampleWriter::create(&path).unwrap();
        writer.write_sample(&Sample::new(0, 0, 120)).unwrap();
        writer.write_sample(&Sample::new(200, 1_000, -3)).unwrap();
        writer.close().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Current (uA),rx timestamp (us),board timestamp (ms)",
                "120,0,0",
                "-3,200,1000",
            ]
        );
    }

    #[test]
    fn test_empty_capture_still_has_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        CsvSampleWriter::create(&path).unwrap().close().unwrap();

        assert!(read_samples(&path).unwrap().is_empty());
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .starts_with("Current (uA)"));
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = tempdir().unwrap();
        let mut writer = CsvSampleWriter::create(dir.path().join("c.csv")).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.write_sample(&Sample::new(0, 0, 1)).is_err());
    }

    #[test]
    fn test_in_dir_creates_missing_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("runs").join("today");
        let writer = CsvSampleWriter::in_dir(&nested).unwrap();

        let name = writer.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("capture_"));
        assert!(name.ends_with(".csv"));
        assert!(writer.path().exists());
    }

    #[test]
    fn test_reader_skips_comments_and_spaces() {
        let data = "\
# cached summary
#
Current (uA), rx timestamp (us), board timestamp (ms)
100, 0, 0
250, 1000, 1
";
        let samples = read_samples_from_reader(data.as_bytes()).unwrap();
        assert_eq!(
            samples,
            vec![Sample::new(0, 0, 100), Sample::new(1_000, 1, 250)]
        );
    }

    #[test]
    fn test_reader_rejects_bad_rows() {
        let data = "Current (uA),rx timestamp (us),board timestamp (ms)\nabc,0,0\n";
        assert!(read_samples_from_reader(data.as_bytes()).is_err());
    }

    #[test]
    fn test_memory_sink_shares_samples() {
        let mut sink = MemorySink::new();
        let handle = sink.handle();
        sink.write_sample(&Sample::new(5, 0, 9)).unwrap();
        sink.close().unwrap();

        assert_eq!(handle.samples(), vec![Sample::new(5, 0, 9)]);
        assert!(handle.is_closed());
    }
}
