//! Lazy decoder for gzip-compressed CSV exports
//!
//! [`GzCsvDecoder`] decompresses and parses one row per call, so memory use does not depend
//! on the export size. The first row is the header; every data row is zipped against it by
//! position into a [`Record`].
//!
//! Rows whose field count differs from the header are a decode error rather than a
//! misaligned record.

use crate::error::DecodeError;
use crate::types::Record;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Row-at-a-time reader over a `.csv.gz` stream
pub struct GzCsvDecoder<R: Read = BufReader<File>> {
    source: PathBuf,
    reader: Option<csv::Reader<GzDecoder<R>>>,
    header: Arc<[String]>,
    buffer: csv::StringRecord,
    rows: u64,
    finished: bool,
}

impl GzCsvDecoder {
    /// Open `path`, decompress the stream header and read the CSV header row
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| DecodeError::OpenFailed {
            path: path.to_path_buf(),
            reason: format!("error while opening data file: {e}"),
        })?;
        Self::from_reader(BufReader::new(file), path)
    }
}

impl<R: Read> GzCsvDecoder<R> {
    /// Decode from an arbitrary reader; `source` only labels errors
    pub fn from_reader(reader: R, source: impl Into<PathBuf>) -> Result<Self, DecodeError> {
        let source = source.into();
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(GzDecoder::new(reader));

        let header: Arc<[String]> = match csv_reader.headers() {
            Ok(header) if !header.is_empty() => header.iter().map(str::to_string).collect(),
            Ok(_) => {
                return Err(DecodeError::OpenFailed {
                    path: source,
                    reason: "missing header row".to_string(),
                });
            }
            Err(e) => {
                return Err(DecodeError::OpenFailed {
                    path: source,
                    reason: format!("error while reading header row: {e}"),
                });
            }
        };

        tracing::debug!(source = %source.display(), header = ?header, "export header read");

        Ok(Self {
            source,
            reader: Some(csv_reader),
            header,
            buffer: csv::StringRecord::new(),
            rows: 0,
            finished: false,
        })
    }

    /// Column names in file order
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Data rows decoded so far
    pub fn rows_read(&self) -> u64 {
        self.rows
    }

    /// Decode the next row
    ///
    /// Returns `Ok(None)` at end of input, and keeps returning it afterwards. After an
    /// error the decoder is finished as well: the stream position is not trustworthy.
    pub fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        if self.finished {
            return Ok(None);
        }
        let Some(reader) = self.reader.as_mut() else {
            self.finished = true;
            return Ok(None);
        };

        match reader.read_record(&mut self.buffer) {
            Ok(true) => {
                self.rows += 1;
                let values = self.buffer.iter().map(str::to_string).collect();
                Ok(Some(Record::new(Arc::clone(&self.header), values)))
            }
            Ok(false) => {
                self.finished = true;
                tracing::debug!(source = %self.source.display(), rows = self.rows, "end of export");
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(DecodeError::DecodeFailed {
                    row: self.rows + 1,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Release the decompressor and the underlying reader
    ///
    /// Safe to call more than once; later reads return end of input.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::debug!(source = %self.source.display(), "export decoder closed");
        }
        self.finished = true;
    }
}

impl<R: Read> Iterator for GzCsvDecoder<R> {
    type Item = Result<Record, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

impl<R: Read> std::fmt::Debug for GzCsvDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzCsvDecoder")
            .field("source", &self.source)
            .field("header", &self.header)
            .field("rows", &self.rows)
            .field("finished", &self.finished)
            .finish()
    }
}
