//! Streaming reader for tab-delimited RF2 files.

use std::fs::File;
use std::io::{BufReader, Read};
use std::marker::PhantomData;
use std::path::Path;

use csv::{Reader, ReaderBuilder, StringRecord};
use snomed_types::SctId;

use crate::types::{Rf2Config, Rf2Error, Rf2Result};

/// A row type that can be read from an RF2 file.
pub trait Rf2Record: Sized {
    /// Leading header columns the file must have.
    const EXPECTED_COLUMNS: &'static [&'static str];

    /// Builds the row from a CSV record.
    fn from_record(record: &StringRecord) -> Rf2Result<Self>;

    /// Whether the row is kept under the given configuration.
    fn passes_filter(&self, config: &Rf2Config) -> bool;
}

/// Reads rows of one type from an RF2 file without loading it whole.
pub struct Rf2Parser<R: Read, T: Rf2Record> {
    reader: Reader<R>,
    config: Rf2Config,
    skipped: usize,
    _marker: PhantomData<T>,
}

impl<T: Rf2Record> Rf2Parser<BufReader<File>, T> {
    /// Opens a file and checks its header.
    pub fn from_path<P: AsRef<Path>>(path: P, config: Rf2Config) -> Rf2Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Rf2Error::FileNotFound {
                path: path.display().to_string(),
            });
        }
        Self::from_reader(BufReader::new(File::open(path)?), config)
    }
}

impl<R: Read, T: Rf2Record> Rf2Parser<R, T> {
    /// Wraps a reader and checks its header.
    pub fn from_reader(reader: R, config: Rf2Config) -> Rf2Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(false)
            .quoting(false)
            .from_reader(reader);
        check_header(reader.headers()?, T::EXPECTED_COLUMNS)?;
        Ok(Self {
            reader,
            config,
            skipped: 0,
            _marker: PhantomData,
        })
    }

    /// Rows dropped by the filter so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Reads the remaining rows into memory.
    pub fn parse_all(self) -> Rf2Result<Vec<T>> {
        self.collect()
    }

    /// Hands rows to `callback` in batches of the configured size.
    ///
    /// Stops at the first malformed row or callback error.
    pub fn parse_batched<F>(mut self, mut callback: F) -> Rf2Result<usize>
    where
        F: FnMut(Vec<T>) -> Rf2Result<()>,
    {
        let batch_size = self.config.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);
        let mut total = 0;
        for row in self.by_ref() {
            batch.push(row?);
            if batch.len() == batch_size {
                total += batch.len();
                callback(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)))?;
            }
        }
        if !batch.is_empty() {
            total += batch.len();
            callback(batch)?;
        }
        Ok(total)
    }
}

impl<R: Read, T: Rf2Record> Iterator for Rf2Parser<R, T> {
    type Item = Rf2Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut record = StringRecord::new();
        loop {
            match self.reader.read_record(&mut record) {
                Ok(false) => return None,
                Err(e) => return Some(Err(e.into())),
                Ok(true) if record.iter().all(|f| f.trim().is_empty()) => continue,
                Ok(true) => match T::from_record(&record) {
                    Ok(row) if row.passes_filter(&self.config) => return Some(Ok(row)),
                    Ok(_) => self.skipped += 1,
                    Err(e) => return Some(Err(e)),
                },
            }
        }
    }
}

fn check_header(headers: &StringRecord, expected: &[&str]) -> Rf2Result<()> {
    if headers.len() < expected.len() {
        return Err(Rf2Error::InvalidHeader {
            expected: expected.len(),
            found: headers.len(),
        });
    }
    for (position, (found, expected)) in headers.iter().zip(expected).enumerate() {
        let found = found.trim_start_matches('\u{feff}');
        if found != *expected {
            return Err(Rf2Error::UnexpectedColumn {
                position,
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
    }
    Ok(())
}

/// Field parsers for RF2 columns.
pub mod parse {
    use super::{Rf2Error, Rf2Result, SctId};

    /// Column `index` of a record, empty when missing.
    pub fn field(record: &csv::StringRecord, index: usize) -> &str {
        record.get(index).unwrap_or("")
    }

    /// Parses an SCTID.
    pub fn sctid(value: &str) -> Rf2Result<SctId> {
        value.parse().map_err(|_| Rf2Error::InvalidSctId {
            value: value.to_string(),
        })
    }

    /// Parses `0` or `1`.
    pub fn boolean(value: &str) -> Rf2Result<bool> {
        match value {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(Rf2Error::InvalidBoolean {
                value: value.to_string(),
            }),
        }
    }

    /// Parses a YYYYMMDD effective time.
    pub fn effective_time(value: &str) -> Rf2Result<u32> {
        if value.len() != 8 {
            return Err(Rf2Error::InvalidDate {
                value: value.to_string(),
            });
        }
        value.parse().map_err(|_| Rf2Error::InvalidDate {
            value: value.to_string(),
        })
    }

    /// Parses an integer column.
    pub fn integer<T: std::str::FromStr>(value: &str) -> Rf2Result<T> {
        value.parse().map_err(|_| Rf2Error::InvalidInteger {
            value: value.to_string(),
        })
    }
}
