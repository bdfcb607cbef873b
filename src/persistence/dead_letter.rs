use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::codec::RecordKind;
use crate::models::ParsedTick;

const FILE_PREFIX: &str = "dead_letter_";
const FILE_SUFFIX: &str = ".log";

/// Largest entry body accepted on append and on replay
pub const MAX_ENTRY_BYTES: usize = 64 * 1024 * 1024;

/// A batch that could not be persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeadLetter {
    Ticks {
        failed_at: DateTime<Utc>,
        attempts: u32,
        reason: String,
        ticks: Vec<ParsedTick>,
    },
    Records {
        failed_at: DateTime<Utc>,
        kind: RecordKind,
        reason: String,
        rows: Vec<Vec<String>>,
    },
}

impl DeadLetter {
    /// Number of rows carried
    pub fn len(&self) -> usize {
        match self {
            DeadLetter::Ticks { ticks, .. } => ticks.len(),
            DeadLetter::Records { rows, .. } => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Append-only spool of undeliverable batches
///
/// Each entry is a 4-byte little-endian length followed by a bincode body.
/// Files rotate at `max_file_size` and are named `dead_letter_NNNNNNNN.log`.
/// A failed write abandons the current file so a half-written entry is
/// always the last one in its file.
pub struct DeadLetterSpool {
    file: BufWriter<File>,
    dir: PathBuf,
    file_index: u64,
    max_file_size: u64,
    current_size: u64,
    written: u64,
    needs_new_file: bool,
}

impl DeadLetterSpool {
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_with_limit(dir, 64 * 1024 * 1024)
    }

    pub fn open_with_limit(dir: impl AsRef<Path>, max_file_size: u64) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let file_index = Self::latest_index(&dir)?;
        let path = Self::file_path(&dir, file_index);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        tracing::info!(path = %path.display(), "📮 Dead-letter spool opened");

        Ok(Self {
            file: BufWriter::new(file),
            dir,
            file_index,
            max_file_size: max_file_size.max(1),
            current_size,
            written: 0,
            needs_new_file: false,
        })
    }

    /// Append one batch and flush it to disk
    pub fn append(&mut self, letter: &DeadLetter) -> io::Result<()> {
        let encoded =
            bincode::serialize(letter).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if encoded.len() > MAX_ENTRY_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("dead letter of {} bytes exceeds {}", encoded.len(), MAX_ENTRY_BYTES),
            ));
        }

        if self.needs_new_file {
            self.start_new_file()?;
        }

        let mut entry = Vec::with_capacity(4 + encoded.len());
        entry.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        entry.extend_from_slice(&encoded);

        if let Err(e) = self.write_entry(&entry) {
            tracing::error!(error = %e, file_index = self.file_index, "❌ Dead-letter write failed, abandoning file");
            self.needs_new_file = true;
            if let Err(reopen) = self.start_new_file() {
                tracing::warn!(error = %reopen, "Could not open next dead-letter file yet");
            }
            return Err(e);
        }

        self.current_size += entry.len() as u64;
        self.written += 1;

        if self.current_size >= self.max_file_size {
            self.rotate()?;
        }
        Ok(())
    }

    /// Entries written through this handle
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_entry(&mut self, entry: &[u8]) -> io::Result<()> {
        self.file.write_all(entry)?;
        // Entries are rare and must survive a crash
        self.file.flush()?;
        self.file.get_ref().sync_data()
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.start_new_file()
    }

    fn start_new_file(&mut self) -> io::Result<()> {
        let index = self.file_index + 1;
        let path = Self::file_path(&self.dir, index);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        self.file = BufWriter::new(file);
        self.file_index = index;
        self.current_size = 0;
        self.needs_new_file = false;
        tracing::debug!(path = %path.display(), "Dead-letter spool moved to new file");
        Ok(())
    }

    fn file_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("{}{:08}{}", FILE_PREFIX, index, FILE_SUFFIX))
    }

    fn parse_index(path: &Path) -> Option<u64> {
        let name = path.file_name()?.to_str()?;
        name.strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?
            .parse()
            .ok()
    }

    fn latest_index(dir: &Path) -> io::Result<u64> {
        Ok(spool_files(dir)?
            .iter()
            .filter_map(|path| Self::parse_index(path))
            .max()
            .unwrap_or(0))
    }
}

fn spool_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|path| DeadLetterSpool::parse_index(path).is_some())
        .collect();
    files.sort();
    Ok(files)
}

/// Read every entry in a spool directory, oldest file first
///
/// A torn trailing entry (crash mid-write) or an implausible length prefix
/// ends that file without error; later files are still read.
pub fn replay<F>(dir: impl AsRef<Path>, mut handler: F) -> io::Result<u64>
where
    F: FnMut(DeadLetter) -> io::Result<()>,
{
    let mut count = 0;

    for path in spool_files(dir.as_ref())? {
        let mut reader = BufReader::new(File::open(&path)?);

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_ENTRY_BYTES {
                tracing::error!(path = %path.display(), len, "❌ Corrupt dead-letter length, rest of file skipped");
                break;
            }
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::warn!(path = %path.display(), "Torn dead-letter entry skipped");
                    break;
                }
                Err(e) => return Err(e),
            }

            let letter: DeadLetter = bincode::deserialize(&data)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            handler(letter)?;
            count += 1;
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fixtures::populated_snapshot;
    use crate::models::WireFormat;
    use tempfile::TempDir;

    fn tick_letter(n: usize) -> DeadLetter {
        DeadLetter::Ticks {
            failed_at: Utc::now(),
            attempts: 3,
            reason: "connection refused".to_string(),
            ticks: (0..n)
                .map(|_| ParsedTick::new(populated_snapshot(), Some(Utc::now()), WireFormat::Binary))
                .collect(),
        }
    }

    #[test]
    fn test_append_and_replay() {
        let temp_dir = TempDir::new().unwrap();
        let mut spool = DeadLetterSpool::open(temp_dir.path()).unwrap();

        let first = tick_letter(2);
        let second = DeadLetter::Records {
            failed_at: Utc::now(),
            kind: RecordKind::TradingAccount,
            reason: "pool exhausted".to_string(),
            rows: vec![vec!["acct".to_string(); 46]],
        };
        spool.append(&first).unwrap();
        spool.append(&second).unwrap();
        assert_eq!(spool.written(), 2);

        let mut seen = Vec::new();
        let count = replay(temp_dir.path(), |letter| {
            seen.push(letter);
            Ok(())
        })
        .unwrap();

        assert_eq!(count, 2);
        assert_eq!(seen, vec![first, second]);
    }

    #[test]
    fn test_rotation_keeps_order() {
        let temp_dir = TempDir::new().unwrap();
        let mut spool = DeadLetterSpool::open_with_limit(temp_dir.path(), 1).unwrap();

        for n in 1..=3 {
            spool.append(&tick_letter(n)).unwrap();
        }
        assert_eq!(spool_files(temp_dir.path()).unwrap().len(), 4);

        let mut sizes = Vec::new();
        replay(temp_dir.path(), |letter| {
            sizes.push(letter.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(sizes, vec![1, 2, 3]);
    }

    #[test]
    fn test_reopen_appends_to_latest_file() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut spool = DeadLetterSpool::open(temp_dir.path()).unwrap();
            spool.append(&tick_letter(1)).unwrap();
        }
        let mut spool = DeadLetterSpool::open(temp_dir.path()).unwrap();
        spool.append(&tick_letter(1)).unwrap();

        assert_eq!(spool_files(temp_dir.path()).unwrap().len(), 1);
        assert_eq!(replay(temp_dir.path(), |_| Ok(())).unwrap(), 2);
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let mut spool = DeadLetterSpool::open(temp_dir.path()).unwrap();
        spool.append(&tick_letter(1)).unwrap();
        drop(spool);

        let path = DeadLetterSpool::file_path(temp_dir.path(), 0);
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();

        assert_eq!(replay(temp_dir.path(), |_| Ok(())).unwrap(), 1);
    }

    #[test]
    fn test_garbled_length_skips_file_without_allocating() {
        let temp_dir = TempDir::new().unwrap();
        let mut spool = DeadLetterSpool::open_with_limit(temp_dir.path(), 1).unwrap();
        spool.append(&tick_letter(1)).unwrap();
        spool.append(&tick_letter(2)).unwrap();
        drop(spool);

        // Corrupt the length prefix of the first file's only entry
        let path = DeadLetterSpool::file_path(temp_dir.path(), 0);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let mut sizes = Vec::new();
        let count = replay(temp_dir.path(), |letter| {
            sizes.push(letter.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 1);
        assert_eq!(sizes, vec![2]);
    }

    #[test]
    fn test_entries_after_failed_write_land_in_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut spool = DeadLetterSpool::open(temp_dir.path()).unwrap();
        spool.append(&tick_letter(1)).unwrap();

        // Leave a length prefix with no body, as an interrupted write would
        spool.file.write_all(&500u32.to_le_bytes()).unwrap();
        spool.file.flush().unwrap();
        spool.needs_new_file = true;

        spool.append(&tick_letter(2)).unwrap();
        spool.append(&tick_letter(3)).unwrap();
        assert_eq!(spool_files(temp_dir.path()).unwrap().len(), 2);

        let mut sizes = Vec::new();
        replay(temp_dir.path(), |letter| {
            sizes.push(letter.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(sizes, vec![1, 2, 3]);
    }
}
