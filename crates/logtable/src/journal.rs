use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Name of the size journal file inside a table directory.
pub const SIZES_FILE_NAME: &str = "sizes.json";

/// On-disk shape of the journal: bare file name → committed byte size.
///
/// File names are stored without a directory so the journal stays valid when
/// the table directory is renamed.
#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalData {
    files: BTreeMap<String, u64>,
}

/// The size journal records the byte size of every table file as of the last
/// successful writer commit.
///
/// It is only rewritten at commit, so after a crashed writer the journal
/// still holds the previous committed sizes and an integrity check correctly
/// reports the mismatch.
#[derive(Debug)]
pub struct SizeJournal {
    path: PathBuf,
}

impl SizeJournal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Rebinds the journal to a new location after a table rename.
    pub fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    fn load(&self) -> Result<JournalData> {
        if !self.path.exists() {
            return Ok(JournalData::default());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let data = serde_json::from_reader(reader)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(data)
    }

    /// Re-measures the named files under `dir` and persists their current
    /// sizes, preserving entries for files not in this update.
    ///
    /// The write is atomic: a temp file is written, synced, then renamed over
    /// the journal so a crash never leaves a half-written journal behind.
    pub fn update(&self, dir: &Path, file_names: &[String]) -> Result<()> {
        let mut data = self.load()?;
        for name in file_names {
            let size = fs::metadata(dir.join(name))?.len();
            data.files.insert(name.clone(), size);
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            serde_json::to_writer_pretty(&mut file, &data)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Verifies that every recorded file currently has its recorded size.
    /// A missing file or a size mismatch yields `false`.
    pub fn check(&self, dir: &Path) -> Result<bool> {
        let data = self.load()?;
        for (name, &expected) in &data.files {
            match fs::metadata(dir.join(name)) {
                Ok(meta) if meta.len() == expected => {}
                Ok(meta) => {
                    log::warn!(
                        "size mismatch for {}: journal has {} bytes, file has {}",
                        name,
                        expected,
                        meta.len()
                    );
                    return Ok(false);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::warn!("file {} recorded in size journal is missing", name);
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }
}
