//! Tab-separated table files (`*-iterations.log`, `*-convergence.log`).
//!
//! Columns are declared up front; the header goes out with the first
//! committed row. Values are set by column name in any order and flushed
//! row by row, so a crashed run keeps every completed row.

use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::CouplingError;

/// Writer for one tab-separated table file.
pub struct TableWriter {
    path: PathBuf,
    columns: Vec<String>,
    row: Vec<Option<String>>,
    header_written: bool,
    out: Option<BufWriter<File>>,
}

impl TableWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, CouplingError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| CouplingError::Transport(format!("cannot create {path:?}: {e}")))?;
        Ok(Self {
            path,
            columns: Vec::new(),
            row: Vec::new(),
            header_written: false,
            out: Some(BufWriter::new(file)),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declare a column. Must happen before the first `commit_row`.
    pub fn add_column(&mut self, name: impl Into<String>) {
        debug_assert!(!self.header_written, "column added after first row");
        self.columns.push(name.into());
        self.row.push(None);
    }

    /// Stage a value for the named column of the current row.
    pub fn set(&mut self, name: &str, value: impl Display) {
        if let Some(i) = self.columns.iter().position(|c| c == name) {
            self.row[i] = Some(value.to_string());
        } else {
            debug_assert!(false, "unknown table column {name}");
        }
    }

    /// Flush the current row; unset columns are written empty.
    pub fn commit_row(&mut self) -> Result<(), CouplingError> {
        let out = self.out.as_mut().expect("commit_row after close");
        let io_err =
            |e: std::io::Error| CouplingError::Transport(format!("table write failed: {e}"));
        if !self.header_written {
            writeln!(out, "{}", self.columns.join("\t")).map_err(io_err)?;
            self.header_written = true;
        }
        let line: Vec<&str> = self.row.iter().map(|v| v.as_deref().unwrap_or("")).collect();
        writeln!(out, "{}", line.join("\t")).map_err(io_err)?;
        out.flush().map_err(io_err)?;
        self.row.iter_mut().for_each(|v| *v = None);
        Ok(())
    }

    /// Flush and close; dropping the writer does the same best-effort.
    pub fn close(&mut self) -> Result<(), CouplingError> {
        if let Some(mut out) = self.out.take() {
            out.flush()
                .map_err(|e| CouplingError::Transport(format!("table flush failed: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for TableWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_then_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iterations.log");
        {
            let mut t = TableWriter::create(&path).unwrap();
            t.add_column("TimeWindow");
            t.add_column("Iterations");
            t.set("TimeWindow", 1);
            t.set("Iterations", 3);
            t.commit_row().unwrap();
            t.set("TimeWindow", 2);
            t.set("Iterations", 1);
            t.commit_row().unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "TimeWindow\tIterations");
        assert_eq!(lines[1], "1\t3");
        assert_eq!(lines[2], "2\t1");
    }

    #[test]
    fn unset_columns_stay_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        let mut t = TableWriter::create(&path).unwrap();
        t.add_column("A");
        t.add_column("B");
        t.set("A", 1.5);
        t.commit_row().unwrap();
        t.close().unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().nth(1).unwrap(), "1.5\t");
    }
}
