//! Durable append-only log of every decoded record.
//!
//! The log is a CSV file whose header is [`COLUMNS`]. Appends take the cheap
//! path (open for append, write one row, sync) as long as the file still looks
//! like one we wrote: exact header line and a complete final row. Anything else
//! sends the append down the recovery path, which salvages every readable row,
//! adds the new one and replaces the file through a temp file and a rename, so
//! a concurrent reader sees either the old log or the new one.
//!
//! Salvage lines cells up by column name when the damaged file still carries a
//! header naming `Time`, and by position otherwise.

use crate::error::{AppendFault, SinkError};
use crate::record::{SensorRecord, COLUMNS};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How an append reached the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The log did not exist; it was created with the header and this row.
    Created,
    /// The row was appended to the existing log.
    Appended,
    /// The existing log was rejected and rewritten with this row added.
    Recovered {
        /// Rows carried over from the damaged file
        salvaged_rows: usize,
        /// Salvaged rows that do not parse as a record, kept as they were read
        unparsed_rows: usize,
    },
}

/// CSV-backed durable log.
#[derive(Debug, Clone)]
pub struct CsvLogSink {
    path: PathBuf,
}

impl CsvLogSink {
    /// Sink writing to `path`. Nothing touches the disk until the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the log file has been created yet.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Persist one record.
    ///
    /// This is blocking file I/O whose cost grows with the file on the
    /// recovery path; async callers should run it on the blocking pool.
    pub fn append(&self, record: &SensorRecord) -> Result<AppendOutcome, SinkError> {
        let row = record.to_row();

        if !self.path.exists() {
            self.create(&row).map_err(|source| SinkError::Create {
                path: self.path.clone(),
                source,
            })?;
            info!(path = %self.path.display(), "Created durable log");
            return Ok(AppendOutcome::Created);
        }

        let fault = match self.append_incremental(&row) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Appended row");
                return Ok(AppendOutcome::Appended);
            }
            Err(fault) => fault,
        };

        warn!(
            path = %self.path.display(),
            %fault,
            "Incremental append failed, rewriting log"
        );
        match self.rewrite_with(&row) {
            Ok(salvage) => {
                let salvaged_rows = salvage.rows.len() - 1;
                if salvage.unparsed > 0 {
                    warn!(
                        path = %self.path.display(),
                        unparsed_rows = salvage.unparsed,
                        "Kept salvaged rows that do not parse as records"
                    );
                }
                info!(path = %self.path.display(), salvaged_rows, "Log recovered");
                Ok(AppendOutcome::Recovered {
                    salvaged_rows,
                    unparsed_rows: salvage.unparsed,
                })
            }
            Err(e) => Err(SinkError::RecoveryFailed {
                path: self.path.clone(),
                fault,
                reason: e.to_string(),
            }),
        }
    }

    /// Every data row currently in the log (header excluded), best effort.
    ///
    /// Rows come back in [`COLUMNS`] order. If the first row is a header, cells
    /// are placed by column name: unknown columns are dropped and missing ones
    /// stay empty. Without a header, ragged rows are padded or cut to the column
    /// count. Invalid UTF-8 is replaced. Recovery reads the file the same way.
    pub fn read_rows(&self) -> io::Result<Vec<Vec<String>>> {
        Ok(self.salvage()?.rows)
    }

    fn salvage(&self) -> io::Result<Salvage> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .map_err(io::Error::from)?;

        let mut layout: Option<Vec<Option<usize>>> = None;
        let mut salvage = Salvage::default();
        for (index, result) in reader.byte_records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Skipping unreadable row");
                    continue;
                }
            };
            let cells: Vec<String> = record
                .iter()
                .map(|cell| String::from_utf8_lossy(cell).into_owned())
                .collect();
            if index == 0 {
                if let Some(found) = header_layout(&cells) {
                    layout = Some(found);
                    continue;
                }
            }

            let row = match &layout {
                Some(layout) => arrange(layout, cells),
                None => {
                    let mut cells = cells;
                    cells.resize(COLUMNS.len(), String::new());
                    cells
                }
            };
            if SensorRecord::from_row(row.as_slice()).is_none() {
                debug!(path = %self.path.display(), ?row, "Salvaged row does not parse");
                salvage.unparsed += 1;
            }
            salvage.rows.push(row);
        }
        Ok(salvage)
    }

    /// Copy the log to `dest` for bulk export, returning the bytes copied.
    pub fn export_to(&self, dest: &Path) -> io::Result<u64> {
        fs::copy(&self.path, dest)
    }

    fn create(&self, row: &[String]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.path)?;
        write_log(file, std::iter::once(row))
    }

    fn append_incremental(&self, row: &[String]) -> Result<(), AppendFault> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)?;

        let mut first = Vec::new();
        BufReader::new(&file).read_until(b'\n', &mut first)?;
        let found = String::from_utf8_lossy(&first);
        let found = found.trim_end_matches(['\r', '\n']);
        if found != header_line() {
            return Err(AppendFault::HeaderMismatch {
                found: found.to_string(),
            });
        }

        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            return Err(AppendFault::TruncatedTail);
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&file);
        writer.write_record(row)?;
        writer.flush()?;
        drop(writer);
        file.sync_data()?;
        Ok(())
    }

    fn rewrite_with(&self, row: &[String]) -> io::Result<Salvage> {
        let mut salvage = self.salvage()?;
        salvage.rows.push(row.to_vec());

        let tmp = self.rewrite_path();
        let written = File::create(&tmp).and_then(|file| write_log(file, salvage.rows.iter()));
        if let Err(e) = written.and_then(|()| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(salvage)
    }

    fn rewrite_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "log".to_string());
        self.path.with_file_name(format!(".{name}.rewrite"))
    }
}

/// The exact first line of a well-formed log.
pub fn header_line() -> String {
    COLUMNS.join(",")
}

/// Rows read back from a log, in [`COLUMNS`] order.
#[derive(Debug, Default)]
struct Salvage {
    rows: Vec<Vec<String>>,
    unparsed: usize,
}

/// Target column for each cell of a header row, or `None` if `cells` is not a
/// header. A name seen twice only claims its column once.
fn header_layout(cells: &[String]) -> Option<Vec<Option<usize>>> {
    let names: Vec<&str> = cells
        .iter()
        .map(|c| c.trim_start_matches('\u{feff}').trim())
        .collect();
    if !names.contains(&COLUMNS[0]) {
        return None;
    }

    let mut claimed = [false; COLUMNS.len()];
    Some(
        names
            .iter()
            .map(|name| {
                let column = COLUMNS.iter().position(|c| c == name)?;
                (!std::mem::replace(&mut claimed[column], true)).then_some(column)
            })
            .collect(),
    )
}

fn arrange(layout: &[Option<usize>], cells: Vec<String>) -> Vec<String> {
    let mut row = vec![String::new(); COLUMNS.len()];
    for (cell, target) in cells.into_iter().zip(layout) {
        if let Some(column) = target {
            row[*column] = cell;
        }
    }
    row
}

fn write_log<'a, I, R>(file: File, rows: I) -> io::Result<()>
where
    I: IntoIterator<Item = &'a R>,
    R: AsRef<[String]> + 'a + ?Sized,
{
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(COLUMNS).map_err(io::Error::from)?;
    for row in rows {
        writer.write_record(row.as_ref()).map_err(io::Error::from)?;
    }
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}
