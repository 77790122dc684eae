//! Append-only CSV persistence of detection records.
//!
//! The table is the only handoff between the analysis pass and the rendering
//! pass. Its schema is fixed:
//!
//! ```text
//! Timestamp,Emotion,Confidence
//! 00-00-01.500,happy,"{""angry"":0.5,""disgust"":0.0,...,""neutral"":12.0}"
//! ```
//!
//! Every record is flushed as soon as it is appended so that a crash during
//! analysis leaves every completed frame on disk.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::common::{EmotionTrackError, Result};
use crate::emotion::{Emotion, EmotionScores};
use crate::timestamp::Timestamp;

/// Column names of the record table, in order
pub const HEADER: [&str; 3] = ["Timestamp", "Emotion", "Confidence"];

/// One detected person in one sampled frame
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    timestamp: Timestamp,
    dominant: Emotion,
    confidence: EmotionScores,
}

impl DetectionRecord {
    /// Create a record whose dominant emotion is the maximum of `confidence`
    pub fn new(timestamp: Timestamp, confidence: EmotionScores) -> Self {
        Self {
            timestamp,
            dominant: confidence.dominant(),
            confidence,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn dominant(&self) -> Emotion {
        self.dominant
    }

    pub fn confidence(&self) -> &EmotionScores {
        &self.confidence
    }

    fn to_row(&self) -> Result<[String; 3]> {
        Ok([
            self.timestamp.to_string(),
            self.dominant.to_string(),
            serde_json::to_string(&self.confidence)?,
        ])
    }

    fn from_row(line: u64, row: &csv::StringRecord) -> Result<Self> {
        if row.len() != HEADER.len() {
            return Err(EmotionTrackError::record_error(
                line,
                format!("expected {} columns, got {}", HEADER.len(), row.len()),
            ));
        }

        let timestamp: Timestamp = row[0]
            .parse()
            .map_err(|e: EmotionTrackError| EmotionTrackError::record_error(line, e.to_string()))?;
        let dominant: Emotion = row[1]
            .parse()
            .map_err(|e| EmotionTrackError::record_error(line, format!("{}", e)))?;
        let confidence: EmotionScores = serde_json::from_str(&row[2])
            .map_err(|e| EmotionTrackError::record_error(line, format!("malformed confidence mapping: {}", e)))?;

        if confidence.get(dominant) < confidence.max() {
            return Err(EmotionTrackError::record_error(
                line,
                format!("dominant emotion '{}' is not the highest confidence", dominant),
            ));
        }

        Ok(Self { timestamp, dominant, confidence })
    }
}

/// Rows of a record table, in file order
///
/// Rows are not guaranteed to be sorted by time and several rows may share a
/// timestamp (one per detected person).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
    records: Vec<DetectionRecord>,
}

impl RecordTable {
    pub fn new(records: Vec<DetectionRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[DetectionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DetectionRecord> {
        self.records.iter()
    }
}

impl From<Vec<DetectionRecord>> for RecordTable {
    fn from(records: Vec<DetectionRecord>) -> Self {
        Self::new(records)
    }
}

/// Streaming writer for a record table
pub struct RecordWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
    written: usize,
}

impl RecordWriter {
    /// Create (or truncate) the table at `path` and write the header
    #[instrument]
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record(HEADER).map_err(write_error)?;
        writer.flush()?;

        info!("Record table created at {}", path.display());
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            written: 0,
        })
    }

    /// Append one record and flush it to disk
    pub fn append(&mut self, record: &DetectionRecord) -> Result<()> {
        self.writer.write_record(record.to_row()?).map_err(write_error)?;
        self.writer.flush()?;
        self.written += 1;

        debug!(
            "Recorded {} at {} ({:.2}%)",
            record.dominant(), record.timestamp(), record.confidence().get(record.dominant())
        );
        Ok(())
    }

    /// Number of records appended through this writer
    pub fn records_written(&self) -> usize {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the table, returning the number of records appended
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush()?;
        info!("Record table {} closed with {} new records", self.path.display(), self.written);
        Ok(self.written)
    }
}

/// Load every row of the table at `path`
///
/// # Errors
/// * `Io` - if the file cannot be read
/// * `CorruptRecord` - on a wrong header, a wrong column count or any malformed field
#[instrument]
pub fn load_all(path: &Path) -> Result<RecordTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| read_error(1, e))?;

    check_header(reader.headers().map_err(|e| read_error(1, e))?)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| {
            let line = e.position().map_or(0, |p| p.line());
            read_error(line, e)
        })?;
        let line = row.position().map_or(0, |p| p.line());
        records.push(DetectionRecord::from_row(line, &row)?);
    }

    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(RecordTable::new(records))
}

fn check_header(header: &csv::StringRecord) -> Result<()> {
    if header.iter().ne(HEADER.iter().copied()) {
        return Err(EmotionTrackError::record_error(
            1,
            format!("unexpected header {:?}, expected {:?}", header.iter().collect::<Vec<_>>(), HEADER),
        ));
    }
    Ok(())
}

fn read_error(line: u64, error: csv::Error) -> EmotionTrackError {
    match error.into_kind() {
        csv::ErrorKind::Io(io) => EmotionTrackError::Io(io),
        kind => EmotionTrackError::record_error(line, format!("{:?}", kind)),
    }
}

fn write_error(error: csv::Error) -> EmotionTrackError {
    match error.into_kind() {
        csv::ErrorKind::Io(io) => EmotionTrackError::Io(io),
        kind => EmotionTrackError::record_error(0, format!("write failed: {:?}", kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(millis: u64, values: [f64; 7]) -> DetectionRecord {
        DetectionRecord::new(Timestamp::from_millis(millis), EmotionScores::new(values).unwrap())
    }

    fn sample_records() -> Vec<DetectionRecord> {
        vec![
            record(0, [1.0, 0.0, 2.0, 90.0, 3.0, 1.0, 3.0]),
            record(500, [60.5, 0.25, 10.0, 0.0, 9.25, 0.0, 20.0]),
            record(500, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 100.0]),
        ]
    }

    fn write_table(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_record_dominant_invariant() {
        for r in sample_records() {
            assert_eq!(r.confidence().get(r.dominant()), r.confidence().max());
        }
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output").join("clip.csv");

        let mut writer = RecordWriter::create(&path).unwrap();
        for r in &sample_records() {
            writer.append(r).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 3);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("Timestamp,Emotion,Confidence\n"));
        assert!(content.contains("00-00-00.500,angry,"));

        let table = load_all(&path).unwrap();
        assert_eq!(table.records(), sample_records().as_slice());
    }

    #[test]
    fn test_rows_visible_before_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.csv");

        let mut writer = RecordWriter::create(&path).unwrap();
        writer.append(&sample_records()[0]).unwrap();

        // Simulates a crash: the writer is never finished
        let table = load_all(&path).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(writer.records_written(), 1);
    }

    #[test]
    fn test_header_only_table_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        RecordWriter::create(&path).unwrap().finish().unwrap();

        let table = load_all(&path).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_all(&dir.path().join("missing.csv"));
        assert!(matches!(result, Err(EmotionTrackError::Io(_))));
    }

    #[test]
    fn test_load_rejects_corrupt_rows() {
        let dir = tempfile::tempdir().unwrap();
        let good = "{\"angry\":0,\"disgust\":0,\"fear\":0,\"happy\":90,\"sad\":0,\"surprise\":0,\"neutral\":10}";
        let cases = [
            // wrong column count
            format!("Timestamp,Emotion,Confidence\n00-00-00.000,happy\n"),
            // confidence is not a mapping
            format!("Timestamp,Emotion,Confidence\n00-00-00.000,happy,not-a-map\n"),
            // incomplete mapping
            format!("Timestamp,Emotion,Confidence\n00-00-00.000,happy,\"{{\"\"happy\"\":100}}\"\n"),
            // malformed timestamp
            format!("Timestamp,Emotion,Confidence\n00:00:00,happy,\"{}\"\n", good.replace('"', "\"\"")),
            // timestamp overflows when converted to seconds
            format!("Timestamp,Emotion,Confidence\n1e306-00-00.000,happy,\"{}\"\n", good.replace('"', "\"\"")),
            // unknown emotion
            format!("Timestamp,Emotion,Confidence\n00-00-00.000,bored,\"{}\"\n", good.replace('"', "\"\"")),
            // dominant is not the maximum
            format!("Timestamp,Emotion,Confidence\n00-00-00.000,neutral,\"{}\"\n", good.replace('"', "\"\"")),
        ];

        for (i, content) in cases.iter().enumerate() {
            let path = dir.path().join(format!("corrupt_{}.csv", i));
            write_table(&path, content);
            let result = load_all(&path);
            assert!(
                matches!(result, Err(EmotionTrackError::CorruptRecord { line: 2, .. })),
                "case {} should be corrupt at line 2, got {:?}",
                i,
                result
            );
        }
    }

    #[test]
    fn test_load_rejects_wrong_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header.csv");
        write_table(&path, "Time,Emotion,Confidence\n");

        assert!(matches!(load_all(&path), Err(EmotionTrackError::CorruptRecord { line: 1, .. })));
    }
}
