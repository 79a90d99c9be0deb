use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Commit;

/// Bytes of framing around each payload: length prefix and CRC trailer.
const FRAME_OVERHEAD: u64 = 8;

/// Encode a single commit as one frame.
fn write_frame(writer: &mut impl Write, commit: &Commit) -> io::Result<()> {
    let payload = bincode::serialize(commit).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

enum Frame {
    Commit(Commit, u64),
    /// Clean end of file.
    End,
    /// Short read, CRC mismatch or undecodable payload.
    Torn,
}

/// `read_exact` that reports a short read as `Ok(false)`.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    let mut first = [0u8; 1];
    if reader.read(&mut first)? == 0 {
        return Ok(Frame::End);
    }
    len_buf[0] = first[0];
    if !fill(reader, &mut len_buf[1..])? {
        return Ok(Frame::Torn);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    if !fill(reader, &mut payload)? || !fill(reader, &mut crc_buf)? {
        return Ok(Frame::Torn);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Torn);
    }
    Ok(match bincode::deserialize::<Commit>(&payload) {
        Ok(commit) => Frame::Commit(commit, len as u64 + FRAME_OVERHEAD),
        Err(_) => Frame::Torn,
    })
}

/// Every intact commit in the file, plus the byte length they span.
struct Scan {
    commits: Vec<Commit>,
    valid_len: u64,
    torn: bool,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let mut scan = Scan {
        commits: Vec::new(),
        valid_len: 0,
        torn: false,
    };
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(scan),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    loop {
        match read_frame(&mut reader)? {
            Frame::Commit(commit, size) => {
                scan.commits.push(commit);
                scan.valid_len += size;
            }
            Frame::End => break,
            Frame::Torn => {
                scan.torn = true;
                break;
            }
        }
    }
    Ok(scan)
}

/// Append-only log of committed transactions.
///
/// Frame layout: `[u32 le: len][bincode Commit][u32 le: crc32 of payload]`.
/// A transaction is one frame, so it replays whole or not at all.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length as of the last successful `flush_sync`.
    synced_len: u64,
    /// Frames buffered since then.
    pending: u64,
}

impl Wal {
    /// Read back the log at `path` and open it for appending.
    ///
    /// A torn tail left by a crash mid-write is cut off before the file is
    /// reopened, so later appends stay reachable on the next recovery.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Commit>)> {
        let scan = scan(path)?;
        if scan.torn {
            let file = OpenOptions::new().write(true).open(path)?;
            let before = file.metadata()?.len();
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = before - scan.valid_len,
                "truncated torn WAL tail"
            );
        }
        Ok((Self::open(path)?, scan.commits))
    }

    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            synced_len,
            pending: 0,
        })
    }

    /// Intact commits in the log, stopping at the first bad frame.
    pub fn replay(path: &Path) -> io::Result<Vec<Commit>> {
        Ok(scan(path)?.commits)
    }

    #[cfg(test)]
    pub fn append(&mut self, commit: &Commit) -> io::Result<()> {
        self.append_buffered(commit)?;
        self.flush_sync()
    }

    /// Buffer a commit. Durable only after the next `flush_sync`.
    pub fn append_buffered(&mut self, commit: &Commit) -> io::Result<()> {
        write_frame(&mut self.writer, commit)?;
        self.pending += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.sync_all()?;
        self.synced_len = file.metadata()?.len();
        self.pending = 0;
        Ok(())
    }

    /// Drop every frame appended since the last successful `flush_sync`,
    /// including bytes the buffer already spilled to the file.
    pub fn discard_pending(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let old = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (spilled, _unwritten) = old.into_parts();
        spilled.set_len(self.synced_len)?;
        spilled.sync_all()?;
        self.appends_since_compact -= self.pending;
        self.pending = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the whole log with `commits`: write a sibling temp file,
    /// fsync it, rename it over the log and reopen for appending.
    pub fn rewrite(&mut self, commits: &[Commit]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for commit in commits {
                write_frame(&mut writer, commit)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        *self = Self::open(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Change, DayKey, InventoryKey, InventoryRecord, Resource, ResourceStatus};
    use chrono::NaiveDate;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotguard_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn resource_commit(id: i64) -> Commit {
        Commit {
            changes: vec![Change::ResourceSaved(Resource {
                id,
                category: "football".into(),
                facility_id: 1,
                status: ResourceStatus::Available,
            })],
        }
    }

    fn churn_commit(i: i64) -> Commit {
        Commit {
            changes: vec![
                Change::InventoryAdjusted {
                    key: InventoryKey::new(9, 1),
                    delta: -1,
                    at: i,
                },
                Change::ScheduleRemoved {
                    booking_id: i,
                    key: DayKey::new(1, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()),
                },
            ],
        }
    }

    #[test]
    fn recover_returns_appended_commits() {
        let path = tmp_path("recover.wal");
        let commits = vec![resource_commit(1), churn_commit(1)];
        {
            let (mut wal, existing) = Wal::recover(&path).unwrap();
            assert!(existing.is_empty());
            for c in &commits {
                wal.append(c).unwrap();
            }
        }

        let (_, replayed) = Wal::recover(&path).unwrap();
        assert_eq!(replayed, commits);
    }

    #[test]
    fn torn_tail_is_truncated_and_later_appends_survive() {
        let path = tmp_path("torn_tail.wal");
        {
            let (mut wal, _) = Wal::recover(&path).unwrap();
            wal.append(&resource_commit(1)).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }

        {
            let (mut wal, replayed) = Wal::recover(&path).unwrap();
            assert_eq!(replayed, vec![resource_commit(1)]);
            assert_eq!(fs::metadata(&path).unwrap().len(), intact);
            wal.append(&resource_commit(2)).unwrap();
        }

        assert_eq!(
            Wal::replay(&path).unwrap(),
            vec![resource_commit(1), resource_commit(2)]
        );
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("corrupt_crc.wal");
        {
            let payload = bincode::serialize(&resource_commit(3)).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_empty_log() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn rewrite_then_append() {
        let path = tmp_path("rewrite.wal");
        let snapshot = Commit {
            changes: vec![Change::InventoryStocked(InventoryRecord {
                item_id: 9,
                facility_id: 1,
                quantity: 3,
                updated_at: 10,
            })],
        };

        {
            let (mut wal, _) = Wal::recover(&path).unwrap();
            for i in 0..20 {
                wal.append(&churn_commit(i)).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            wal.rewrite(std::slice::from_ref(&snapshot)).unwrap();
            assert!(fs::metadata(&path).unwrap().len() < before);
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&resource_commit(2)).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![snapshot, resource_commit(2)]);
    }

    #[test]
    fn buffered_appends_count_before_flush() {
        let path = tmp_path("buffered.wal");
        let commits: Vec<Commit> = (0..5).map(resource_commit).collect();
        {
            let (mut wal, _) = Wal::recover(&path).unwrap();
            for c in &commits {
                wal.append_buffered(c).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), commits);
    }

    #[test]
    fn discarded_frames_never_replay() {
        let path = tmp_path("discard.wal");
        let (mut wal, _) = Wal::recover(&path).unwrap();
        wal.append(&resource_commit(1)).unwrap();
        let synced = fs::metadata(&path).unwrap().len();

        // Enough frames to overflow the write buffer, so some bytes are
        // already in the file when the batch is abandoned.
        for i in 0..2_000 {
            wal.append_buffered(&churn_commit(i)).unwrap();
        }
        assert!(fs::metadata(&path).unwrap().len() > synced);
        wal.discard_pending().unwrap();
        assert_eq!(wal.appends_since_compact(), 1);

        wal.append(&resource_commit(2)).unwrap();
        drop(wal);
        assert_eq!(
            Wal::replay(&path).unwrap(),
            vec![resource_commit(1), resource_commit(2)]
        );
    }
}
