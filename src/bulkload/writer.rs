//! Row buffering into bounded local files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::TempPath;

use crate::error::LoadError;
use crate::sql::FileFormat;

const QUOTE: char = '"';
const ESCAPE: char = '\\';

/// A closed local file ready for staging. The file is removed when this is dropped.
#[derive(Debug)]
pub struct LocalBatch {
    pub path: TempPath,
    pub rows: u64,
    pub bytes: u64,
    /// Some quoted value spans lines; COPY has to read the file with `multiLine`.
    pub line_breaks: bool,
}

#[derive(Debug)]
struct OpenFile {
    out: BufWriter<File>,
    path: TempPath,
    rows: u64,
    bytes: u64,
    line_breaks: bool,
}

/// Accumulates delimited rows into a local file until `batch_rows` is reached.
#[derive(Debug)]
pub struct BatchFileWriter {
    dir: PathBuf,
    format: FileFormat,
    columns: usize,
    batch_rows: u64,
    current: Option<OpenFile>,
}

impl BatchFileWriter {
    pub fn new(
        dir: &Path,
        format: FileFormat,
        columns: usize,
        batch_rows: u64,
    ) -> Result<Self, LoadError> {
        if matches!(format.delimiter, QUOTE | ESCAPE | '\r' | '\n') {
            return Err(LoadError::Config(format!(
                "{:?} cannot be used as a delimiter",
                format.delimiter
            )));
        }
        if batch_rows == 0 {
            return Err(LoadError::Config("batch_rows must be positive".to_string()));
        }

        let mut writer = Self {
            dir: dir.to_path_buf(),
            format,
            columns,
            batch_rows,
            current: None,
        };
        writer.current = Some(writer.open_file()?);
        Ok(writer)
    }

    fn open_file(&self) -> Result<OpenFile, LoadError> {
        let (file, path) = tempfile::Builder::new()
            .prefix("stageload-")
            .suffix(".csv")
            .tempfile_in(&self.dir)?
            .into_parts();
        Ok(OpenFile {
            out: BufWriter::new(file),
            path,
            rows: 0,
            bytes: 0,
            line_breaks: false,
        })
    }

    /// Append one row; `None` values are written as the null marker.
    pub fn add_row<S: AsRef<str>>(&mut self, values: &[Option<S>]) -> Result<(), LoadError> {
        if values.len() != self.columns {
            return Err(LoadError::Config(format!(
                "row has {} values but the schema has {} columns",
                values.len(),
                self.columns
            )));
        }

        let mut line = String::new();
        let mut line_breaks = false;
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                line.push(self.format.delimiter);
            }
            match value {
                None => line.push_str(&self.format.null_string),
                Some(v) => {
                    let v = v.as_ref();
                    line_breaks |= v.contains(['\r', '\n']);
                    encode_field(&mut line, v, &self.format);
                }
            }
        }
        line.push('\n');

        let current = match self.current.as_mut() {
            Some(current) => current,
            None => {
                self.current = Some(self.open_file()?);
                self.current.as_mut().ok_or(LoadError::Closed)?
            }
        };
        current.out.write_all(line.as_bytes())?;
        current.rows += 1;
        current.bytes += line.len() as u64;
        current.line_breaks |= line_breaks;
        Ok(())
    }

    /// Rows in the file currently being written.
    pub fn batch_rows(&self) -> u64 {
        self.current.as_ref().map_or(0, |c| c.rows)
    }

    pub fn is_full(&self) -> bool {
        self.batch_rows() >= self.batch_rows
    }

    /// Close the current file and start a new one. Empty files are discarded.
    pub fn take_batch(&mut self) -> Result<Option<LocalBatch>, LoadError> {
        let next = self.open_file()?;
        let Some(finished) = self.current.replace(next) else {
            return Ok(None);
        };

        let OpenFile {
            mut out,
            path,
            rows,
            bytes,
            line_breaks,
        } = finished;
        out.flush()?;
        drop(out);

        if rows == 0 {
            // dropping the TempPath removes the file
            return Ok(None);
        }
        Ok(Some(LocalBatch {
            path,
            rows,
            bytes,
            line_breaks,
        }))
    }

    /// Discard whatever has not been handed off yet.
    pub fn close(&mut self) {
        self.current = None;
    }
}

/// Quote only when needed; inside quotes, `"` and `\` are backslash-escaped.
///
/// Line breaks stay raw inside the quotes. A value equal to the null marker is quoted
/// too, but the warehouse compares `nullValue` after unquoting, so it still loads as NULL.
fn encode_field(line: &mut String, value: &str, format: &FileFormat) {
    let needs_quotes = value.is_empty()
        || value == format.null_string
        || value
            .chars()
            .any(|c| c == format.delimiter || matches!(c, QUOTE | ESCAPE | '\r' | '\n'));

    if !needs_quotes {
        line.push_str(value);
        return;
    }

    line.push(QUOTE);
    for c in value.chars() {
        if matches!(c, QUOTE | ESCAPE) {
            line.push(ESCAPE);
        }
        line.push(c);
    }
    line.push(QUOTE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn writer(dir: &TempDir, columns: usize, batch_rows: u64) -> BatchFileWriter {
        BatchFileWriter::new(dir.path(), FileFormat::default(), columns, batch_rows).unwrap()
    }

    #[test]
    fn test_rows_are_encoded() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, 3, 10);
        w.add_row(&[Some("1"), None, Some("plain")]).unwrap();
        w.add_row(&[Some("a\tb"), Some(""), Some("say \"hi\" \\o/")])
            .unwrap();
        w.add_row(&[Some("\\N"), Some("line\nbreak"), Some("あ")])
            .unwrap();

        let batch = w.take_batch().unwrap().unwrap();
        assert_eq!(batch.rows, 3);
        let content = std::fs::read_to_string(&batch.path).unwrap();
        assert_eq!(
            content,
            "1\t\\N\tplain\n\
             \"a\tb\"\t\"\"\t\"say \\\"hi\\\" \\\\o/\"\n\
             \"\\\\N\"\t\"line\nbreak\"\tあ\n"
        );
        assert_eq!(batch.bytes, content.len() as u64);
        assert!(batch.line_breaks);
    }

    #[test]
    fn test_line_breaks_tracked_per_file() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, 2, 10);
        w.add_row(&[Some("a"), None]).unwrap();
        let plain = w.take_batch().unwrap().unwrap();
        assert!(!plain.line_breaks);

        w.add_row(&[Some("a"), Some("b")]).unwrap();
        w.add_row(&[Some("carriage\rreturn"), None]).unwrap();
        let broken = w.take_batch().unwrap().unwrap();
        assert!(broken.line_breaks);

        // the flag does not leak into the next file
        w.add_row(&[Some("c"), Some("d")]).unwrap();
        assert!(!w.take_batch().unwrap().unwrap().line_breaks);
    }

    #[test]
    fn test_random_values_read_back_with_backslash_escapes() {
        use rand::seq::SliceRandom;
        use rand::Rng;

        const ALPHABET: [&str; 9] = ["a", "Z", "7", " ", "\t", "\"", "\\", "\n", "é"];
        let mut rng = rand::thread_rng();
        let rows: Vec<Vec<String>> = (0..200)
            .map(|_| {
                (0..3)
                    .map(|_| {
                        let len = rng.gen_range(0..8);
                        (0..len)
                            .map(|_| *ALPHABET.choose(&mut rng).unwrap())
                            .collect::<String>()
                    })
                    .collect()
            })
            .collect();

        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, 3, 1_000);
        for row in &rows {
            let values: Vec<Option<&str>> = row.iter().map(|v| Some(v.as_str())).collect();
            w.add_row(&values).unwrap();
        }
        let batch = w.take_batch().unwrap().unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .double_quote(false)
            .escape(Some(b'\\'))
            .from_path(&batch.path)
            .unwrap();
        let parsed: Vec<Vec<String>> = reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();
        assert_eq!(parsed, rows);
    }

    #[test]
    fn test_take_batch_rotates_files() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, 1, 2);
        w.add_row(&[Some("a")]).unwrap();
        assert!(!w.is_full());
        w.add_row(&[Some("b")]).unwrap();
        assert!(w.is_full());

        let first = w.take_batch().unwrap().unwrap();
        assert_eq!(w.batch_rows(), 0);
        w.add_row(&[Some("c")]).unwrap();
        let second = w.take_batch().unwrap().unwrap();

        assert_ne!(first.path.to_path_buf(), second.path.to_path_buf());
        assert_eq!(std::fs::read_to_string(&second.path).unwrap(), "c\n");
    }

    #[test]
    fn test_empty_batch_is_discarded() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, 1, 2);
        assert!(w.take_batch().unwrap().is_none());
        // only the freshly opened file remains
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_local_file_removed_when_batch_dropped() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, 1, 2);
        w.add_row(&[Some("a")]).unwrap();
        let batch = w.take_batch().unwrap().unwrap();
        let path = batch.path.to_path_buf();
        assert!(path.exists());
        drop(batch);
        assert!(!path.exists());
    }

    #[test]
    fn test_close_discards_pending_file() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, 1, 2);
        w.add_row(&[Some("a")]).unwrap();
        w.close();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(w.batch_rows(), 0);
    }

    #[test]
    fn test_column_count_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, 2, 2);
        let err = w.add_row(&[Some("a")]).unwrap_err();
        assert!(matches!(err, LoadError::Config(_)));
    }

    #[test]
    fn test_rejects_bad_settings() {
        let dir = TempDir::new().unwrap();
        let format = FileFormat {
            delimiter: '"',
            ..Default::default()
        };
        assert!(BatchFileWriter::new(dir.path(), format, 1, 1).is_err());
        assert!(BatchFileWriter::new(dir.path(), FileFormat::default(), 1, 0).is_err());
    }
}
