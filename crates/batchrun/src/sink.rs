use batchrun_core::{Error, Result, ResultSink};
use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Appends one line per successful response to a file.
///
/// Writes from concurrent workers are serialized, so lines never interleave.
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileSink {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResultSink`] if the file cannot be opened.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| sink_error(&path, &e))?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for FileSink {
    fn write(&self, line: &str) -> Result<()> {
        writeln!(self.writer.lock(), "{line}").map_err(|e| sink_error(&self.path, &e))
    }

    fn flush(&self) -> Result<()> {
        self.writer
            .lock()
            .flush()
            .map_err(|e| sink_error(&self.path, &e))
    }
}

fn sink_error(path: &Path, err: &std::io::Error) -> Error {
    Error::ResultSink {
        context: format!("{}: {err}", path.display()),
    }
}
