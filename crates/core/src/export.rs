//! CSV export of ingested frames.

use std::path::{Path, PathBuf};

use crate::Error;
use crate::frame::Frame;

/// Write `frame` to `<dir>/<prefix><stamp>.csv` with a header row; returns the path.
pub fn export_csv(frame: &Frame, dir: &Path, prefix: &str, stamp: &str) -> Result<PathBuf, Error> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{prefix}{stamp}.csv"));

    let mut writer = csv::Writer::from_path(&path).map_err(|e| Error::Export(e.to_string()))?;
    writer.write_record(frame.columns()).map_err(|e| Error::Export(e.to_string()))?;
    for row in frame.rows() {
        writer
            .write_record(row.iter().map(|cell| cell.key_text()))
            .map_err(|e| Error::Export(e.to_string()))?;
    }
    writer.flush()?;

    tracing::info!(path = %path.display(), rows = frame.len(), "exported csv");
    Ok(path)
}
