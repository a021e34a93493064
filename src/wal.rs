use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Commit;

/// Bytes of framing around each payload: length prefix plus CRC.
const FRAME_OVERHEAD: u64 = 8;

/// Encode one commit as `[len][bincode][crc32]`.
fn encode_commit(writer: &mut impl Write, commit: &Commit) -> io::Result<()> {
    let payload =
        bincode::serialize(commit).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// The file a WAL appends to. Writes go to the end of the file.
pub trait LogFile: Write {
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append-only write-ahead log of catalog commits.
///
/// Format per entry: `[u32: len][bincode: Commit][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated or corrupt tail (crash mid-write) is discarded on replay,
///   taking the whole commit with it, and cut off when the log is reopened.
///
/// Commits are staged in memory and reach the file only through
/// [`flush_sync`](Self::flush_sync). The file never holds a partial batch:
/// a failed write is truncated back to the last synced length, and if that
/// truncation fails too the log refuses every later write.
pub struct Wal<F: LogFile = File> {
    file: F,
    path: PathBuf,
    pending: Vec<u8>,
    pending_appends: u64,
    /// File length covered by fully synced frames.
    synced_len: u64,
    appends_since_compact: u64,
    failed: bool,
}

impl Wal<File> {
    /// Open (or create) the WAL file at `path`, dropping any torn tail.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(wal, _)| wal)
    }

    /// Open the WAL for appending and return every intact commit in it.
    /// Bytes past the last intact frame are cut off so new commits follow
    /// readable ones.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Commit>)> {
        let (commits, valid_len) = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            warn!(
                "WAL {}: dropping {} unreadable tail bytes after {} commits",
                path.display(),
                on_disk - valid_len,
                commits.len()
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok((Self::with_file(file, path, valid_len), commits))
    }

    /// Write compacted commits to a temp file and fsync.
    pub fn write_compact_file(path: &Path, commits: &[Commit]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for commit in commits {
            encode_commit(&mut writer, commit)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the WAL and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.file = file;
        self.discard_pending();
        self.appends_since_compact = 0;
        self.failed = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, commits: &[Commit]) -> io::Result<()> {
        Self::write_compact_file(&self.path, commits)?;
        self.swap_compact_file()
    }

    /// Replay the WAL from disk, returning every intact commit in order.
    pub fn replay(path: &Path) -> io::Result<Vec<Commit>> {
        scan(path).map(|(commits, _)| commits)
    }
}

impl<F: LogFile> Wal<F> {
    /// Wrap an already-positioned log file whose first `synced_len` bytes
    /// are intact frames.
    fn with_file(file: F, path: &Path, synced_len: u64) -> Self {
        Self {
            file,
            path: path.to_path_buf(),
            pending: Vec::new(),
            pending_appends: 0,
            synced_len,
            appends_since_compact: 0,
            failed: false,
        }
    }

    fn ensure_writable(&self) -> io::Result<()> {
        if self.failed {
            return Err(io::Error::other(format!(
                "WAL {} has unremovable partial data; refusing writes until compaction",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Append and fsync a single commit. Tests only; the catalog goes
    /// through `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, commit: &Commit) -> io::Result<()> {
        self.append_buffered(commit)?;
        self.flush_sync()
    }

    /// Stage a commit without writing it. Call `flush_sync()` after the batch.
    /// A failed encode stages nothing.
    pub fn append_buffered(&mut self, commit: &Commit) -> io::Result<()> {
        self.ensure_writable()?;
        let mark = self.pending.len();
        if let Err(e) = encode_commit(&mut self.pending, commit) {
            self.pending.truncate(mark);
            return Err(e);
        }
        self.pending_appends += 1;
        Ok(())
    }

    /// Forget every staged commit.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_appends = 0;
    }

    /// Write every staged commit and fsync. All or nothing: on error the
    /// file is cut back to its last synced length and the batch is dropped.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.ensure_writable()?;
        let written = self
            .file
            .write_all(&self.pending)
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync());
        if let Err(e) = written {
            self.discard_pending();
            if let Err(t) = self.file.truncate(self.synced_len).and_then(|()| self.file.sync()) {
                warn!("WAL {}: cannot drop failed batch: {t}", self.path.display());
                self.failed = true;
            }
            return Err(e);
        }
        self.synced_len += self.pending.len() as u64;
        self.appends_since_compact += self.pending_appends;
        self.discard_pending();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

/// Read intact commits from the start of the log. Also returns the byte
/// length they cover.
fn scan(path: &Path) -> io::Result<(Vec<Commit>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut commits = Vec::new();
    let mut valid_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
            Err(e) => return Err(e),
        }

        let mut crc_buf = [0u8; 4];
        match reader.read_exact(&mut crc_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
            Err(e) => return Err(e),
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            warn!("WAL {}: crc mismatch after {} commits, ignoring tail", path.display(), commits.len());
            break;
        }

        match bincode::deserialize::<Commit>(&payload) {
            Ok(commit) => commits.push(commit),
            Err(_) => break,
        }
        valid_len += len as u64 + FRAME_OVERHEAD;
    }

    Ok((commits, valid_len))
}
