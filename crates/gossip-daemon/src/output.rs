//! Experiment output files.
//!
//! Each node writes `<hostname>.csv` (its history) and `<hostname>.log`
//! under `<root>/<aggregation>/<graph>/<run>/`.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use gossip_core::History;
use thiserror::Error;
use tracing::{debug, info};

const HISTORY_HEADER: [&str; 3] = ["epoch", "time", "state"];

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Output root {0:?} does not exist")]
    RootMissing(PathBuf),

    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write history: {0}")]
    Csv(#[from] csv::Error),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> OutputError + '_ {
    move |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Locations of one node's output files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub dir: PathBuf,
    pub history: PathBuf,
    pub log: PathBuf,
}

impl OutputPaths {
    /// Create the run directory and start both files empty.
    ///
    /// `root` must already exist; everything below it is created. The
    /// history file starts with just its header.
    pub fn prepare(root: &Path, relative: &Path, node_name: &str) -> Result<Self, OutputError> {
        if !root.is_dir() {
            return Err(OutputError::RootMissing(root.to_path_buf()));
        }

        let dir = root.join(relative);
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        let paths = Self {
            history: dir.join(format!("{}.csv", node_name)),
            log: dir.join(format!("{}.log", node_name)),
            dir,
        };

        File::create(&paths.log).map_err(io_error(&paths.log))?;
        write_history(&paths.history, &History::new())?;

        debug!("Prepared output directory {:?}", paths.dir);
        Ok(paths)
    }

    /// Open the log file for appending.
    pub fn open_log(&self) -> Result<File, OutputError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log)
            .map_err(io_error(&self.log))
    }
}

/// Write `history` as CSV, replacing the file's contents.
pub fn write_history(path: &Path, history: &History) -> Result<(), OutputError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    writer.write_record(HISTORY_HEADER)?;
    for entry in history {
        writer.serialize(entry)?;
    }
    writer.flush().map_err(io_error(path))?;

    info!("Wrote {} history entries to {:?}", history.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gossip_core::Aggregate;
    use tempfile::TempDir;

    fn relative() -> PathBuf {
        Path::new("average").join("ring").join("3")
    }

    #[test]
    fn test_prepare_creates_nested_dirs_and_files() {
        let root = TempDir::new().unwrap();
        let paths = OutputPaths::prepare(root.path(), &relative(), "node-a").unwrap();

        assert_eq!(paths.dir, root.path().join("average/ring/3"));
        assert_eq!(paths.history, paths.dir.join("node-a.csv"));
        assert_eq!(paths.log, paths.dir.join("node-a.log"));
        assert_eq!(
            fs::read_to_string(&paths.history).unwrap(),
            "epoch,time,state\n"
        );
        assert_eq!(fs::read_to_string(&paths.log).unwrap(), "");
    }

    #[test]
    fn test_prepare_truncates_previous_run() {
        let root = TempDir::new().unwrap();
        let paths = OutputPaths::prepare(root.path(), &relative(), "node-a").unwrap();
        fs::write(&paths.log, "old log line\n").unwrap();
        fs::write(&paths.history, "stale\n").unwrap();

        let paths = OutputPaths::prepare(root.path(), &relative(), "node-a").unwrap();
        assert_eq!(fs::read_to_string(&paths.log).unwrap(), "");
        assert_eq!(
            fs::read_to_string(&paths.history).unwrap(),
            "epoch,time,state\n"
        );
    }

    #[test]
    fn test_prepare_requires_existing_root() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("nope");

        let err = OutputPaths::prepare(&missing, &relative(), "node-a").unwrap_err();
        assert!(matches!(err, OutputError::RootMissing(p) if p == missing));
        assert!(!missing.exists());
    }

    #[test]
    fn test_history_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.csv");

        let mut aggregate = Aggregate::new(100.0);
        aggregate.merge(0.0, 1, 1700000000.5);
        aggregate.merge(50.0, 2, 1700000010.25);
        write_history(&path, aggregate.history()).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "epoch,time,state",
                "1,1700000000.5,50.0",
                "2,1700000010.25,50.0"
            ]
        );
    }

    #[test]
    fn test_open_log_appends() {
        use std::io::Write;

        let root = TempDir::new().unwrap();
        let paths = OutputPaths::prepare(root.path(), &relative(), "n").unwrap();
        writeln!(paths.open_log().unwrap(), "first").unwrap();
        writeln!(paths.open_log().unwrap(), "second").unwrap();

        assert_eq!(fs::read_to_string(&paths.log).unwrap(), "first\nsecond\n");
    }
}
