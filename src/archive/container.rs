// In: src/archive/container.rs

//! A single physical archive file: header, named entry payloads, trailing
//! directory. See `format.rs` for the layout.
//!
//! `ArchiveFile` keeps the parsed directory in memory. An append writes the
//! payload over the old directory, then the new directory and its length, and
//! flushes. The in-memory directory only changes once all of that succeeded;
//! a failed append puts the previous directory back on disk.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::archive::format::{
    ArchiveDirectory, EntryCodec, EntryManifest, ARCHIVE_FORMAT_VERSION, ARCHIVE_MAGIC,
    HEADER_LEN, MAX_DIRECTORY_LEN, TRAILER_LEN,
};
use crate::error::{Result, TrackStateError};

//==================================================================================
// I. Storage Backend
//==================================================================================

/// The byte storage an `ArchiveFile` lives on.
pub trait ArchiveBackend: Read + Write + Seek {
    fn byte_len(&self) -> io::Result<u64>;
    fn set_byte_len(&mut self, len: u64) -> io::Result<()>;
}

impl ArchiveBackend for File {
    fn byte_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_byte_len(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

//==================================================================================
// II. ArchiveFile
//==================================================================================

#[derive(Debug)]
pub struct ArchiveFile<B: ArchiveBackend = File> {
    backend: B,
    path: PathBuf,
    directory: ArchiveDirectory,
    /// Offset of the first byte after the last payload (start of the directory).
    data_end: u64,
    writable: bool,
}

impl ArchiveFile<File> {
    /// Opens an existing archive for reading only.
    pub fn open_read(path: &Path) -> Result<Self> {
        Self::from_backend(File::open(path)?, path, false)
    }

    /// Opens an archive for reading and appending, creating it (and its
    /// parent directories) when it does not exist yet.
    pub fn open_append(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_backend(file, path, true)
    }
}

impl<B: ArchiveBackend> ArchiveFile<B> {
    /// Wraps already-open storage. An empty, writable backend is initialised
    /// with a header and an empty directory; anything else must hold a valid
    /// archive.
    pub fn from_backend(mut backend: B, path: impl Into<PathBuf>, writable: bool) -> Result<Self> {
        let path = path.into();
        let (directory, data_end) = if writable && backend.byte_len()? == 0 {
            log::debug!("Initialising empty archive at {}", path.display());
            let directory = ArchiveDirectory::default();
            backend.write_all(ARCHIVE_MAGIC)?;
            backend.write_all(&ARCHIVE_FORMAT_VERSION.to_le_bytes())?;
            write_directory(&mut backend, &directory)?;
            backend.flush()?;
            (directory, HEADER_LEN)
        } else {
            read_directory(&mut backend)?
        };

        Ok(Self {
            backend,
            path,
            directory,
            data_end,
            writable,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry names in write order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.directory.entries.iter().map(|e| e.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.directory.find(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.directory.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directory.entries.is_empty()
    }

    /// Reads and decodes an entry. A missing entry is `Ok(None)`.
    pub fn read_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let manifest = match self.directory.find(name) {
            Some(manifest) => manifest.clone(),
            None => return Ok(None),
        };

        self.backend.seek(SeekFrom::Start(manifest.offset))?;
        let mut stored = vec![0u8; manifest.stored_size as usize];
        self.backend.read_exact(&mut stored)?;

        let raw = manifest.codec.decode(&stored)?;
        if raw.len() as u64 != manifest.raw_size {
            return Err(TrackStateError::ArchiveFormat(format!(
                "entry '{}' in {} decoded to {} bytes, directory says {}",
                name,
                self.path.display(),
                raw.len(),
                manifest.raw_size
            )));
        }
        Ok(Some(raw))
    }

    /// Appends a new entry. Entries are never overwritten: writing a name that
    /// already exists is an error, callers check `contains` first.
    ///
    /// On failure the archive is left as it was before the call, on disk and
    /// in memory.
    pub fn write_entry(&mut self, name: &str, raw: &[u8], codec: EntryCodec) -> Result<()> {
        if !self.writable {
            return Err(TrackStateError::Precondition(format!(
                "{} was opened read-only",
                self.path.display()
            )));
        }
        if self.contains(name) {
            return Err(TrackStateError::ArchiveFormat(format!(
                "entry '{}' already exists in {}",
                name,
                self.path.display()
            )));
        }

        let stored = codec.encode(raw)?;
        let mut directory = self.directory.clone();
        directory.entries.push(EntryManifest {
            name: name.to_string(),
            offset: self.data_end,
            stored_size: stored.len() as u64,
            raw_size: raw.len() as u64,
            codec,
        });
        let end = self.data_end + stored.len() as u64;

        if let Err(err) = self.append(&stored, &directory) {
            if let Err(restore_err) = self.restore_directory() {
                log::error!(
                    "Could not restore the directory of {} after a failed write: {}",
                    self.path.display(),
                    restore_err
                );
            }
            return Err(err);
        }
        self.directory = directory;
        self.data_end = end;

        log::debug!(
            "Wrote entry '{}' ({} -> {} bytes) to {}",
            name,
            raw.len(),
            stored.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Writes `stored` over the current directory, followed by `directory`.
    fn append(&mut self, stored: &[u8], directory: &ArchiveDirectory) -> Result<()> {
        self.backend.seek(SeekFrom::Start(self.data_end))?;
        self.backend.write_all(stored)?;
        let end = self.data_end + stored.len() as u64;
        let file_end = end + write_directory(&mut self.backend, directory)?;
        self.backend.set_byte_len(file_end)?;
        self.backend.flush()?;
        Ok(())
    }

    /// Rewrites the committed directory at `data_end` and truncates after it.
    fn restore_directory(&mut self) -> Result<()> {
        self.backend.seek(SeekFrom::Start(self.data_end))?;
        let file_end = self.data_end + write_directory(&mut self.backend, &self.directory)?;
        self.backend.set_byte_len(file_end)?;
        self.backend.flush()?;
        Ok(())
    }
}

/// Writes the directory and its length at the current position, returning
/// the number of bytes written.
fn write_directory<W: Write>(out: &mut W, directory: &ArchiveDirectory) -> Result<u64> {
    let directory_bytes = serde_json::to_vec(directory)?;
    out.write_all(&directory_bytes)?;
    out.write_all(&(directory_bytes.len() as u64).to_le_bytes())?;
    Ok(directory_bytes.len() as u64 + TRAILER_LEN)
}

/// Validates the header and parses the trailing directory. Returns the
/// directory and the offset where it starts.
fn read_directory<B: ArchiveBackend>(backend: &mut B) -> Result<(ArchiveDirectory, u64)> {
    let file_len = backend.byte_len()?;
    if file_len < HEADER_LEN + TRAILER_LEN {
        return Err(TrackStateError::ArchiveFormat(format!(
            "file is too short ({} bytes) to be an archive",
            file_len
        )));
    }

    let mut header = [0u8; HEADER_LEN as usize];
    backend.seek(SeekFrom::Start(0))?;
    backend.read_exact(&mut header)?;
    if &header[0..4] != ARCHIVE_MAGIC {
        return Err(TrackStateError::ArchiveFormat("invalid magic number".into()));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != ARCHIVE_FORMAT_VERSION {
        return Err(TrackStateError::ArchiveFormat(format!(
            "unsupported format version {}",
            version
        )));
    }

    let mut len_bytes = [0u8; TRAILER_LEN as usize];
    backend.seek(SeekFrom::End(-(TRAILER_LEN as i64)))?;
    backend.read_exact(&mut len_bytes)?;
    let directory_len = u64::from_le_bytes(len_bytes);
    if directory_len > MAX_DIRECTORY_LEN || directory_len > file_len - HEADER_LEN - TRAILER_LEN {
        return Err(TrackStateError::ArchiveFormat(format!(
            "directory length {} is invalid for a {} byte file",
            directory_len, file_len
        )));
    }

    let data_end = file_len - TRAILER_LEN - directory_len;
    let mut directory_bytes = vec![0u8; directory_len as usize];
    backend.seek(SeekFrom::Start(data_end))?;
    backend.read_exact(&mut directory_bytes)?;
    let directory: ArchiveDirectory = serde_json::from_slice(&directory_bytes)?;
    directory.validate(data_end)?;

    Ok((directory, data_end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// A file that refuses to grow past a shared size limit.
    struct CappedFile {
        file: File,
        limit: Rc<Cell<u64>>,
    }

    impl Read for CappedFile {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.file.read(buf)
        }
    }

    impl Seek for CappedFile {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.file.seek(pos)
        }
    }

    impl Write for CappedFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let position = self.file.stream_position()?;
            let room = self.limit.get().saturating_sub(position);
            if room == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "file too large"));
            }
            let n = buf.len().min(room as usize);
            self.file.write(&buf[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl ArchiveBackend for CappedFile {
        fn byte_len(&self) -> io::Result<u64> {
            self.file.byte_len()
        }

        fn set_byte_len(&mut self, len: u64) -> io::Result<()> {
            if len > self.limit.get() {
                return Err(io::Error::new(io::ErrorKind::Other, "file too large"));
            }
            self.file.set_len(len)
        }
    }

    #[test]
    fn test_failed_append_leaves_archive_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capped.tsa");
        let limit = Rc::new(Cell::new(u64::MAX));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        let backend = CappedFile {
            file,
            limit: limit.clone(),
        };
        let mut archive = ArchiveFile::from_backend(backend, &path, true).unwrap();
        archive.write_entry("a", b"first payload", EntryCodec::Stored).unwrap();
        let len_before = std::fs::metadata(&path).unwrap().len();

        // The payload fits under the limit, the new directory does not.
        limit.set(archive.data_end + 512 + 10);
        let failed = archive.write_entry("b", &[7u8; 512], EntryCodec::Stored);

        assert!(matches!(failed, Err(TrackStateError::Io(_))));
        assert!(!archive.contains("b"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len_before);

        let mut reopened = ArchiveFile::open_read(&path).unwrap();
        assert_eq!(reopened.names().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(reopened.read_entry("a").unwrap().unwrap(), b"first payload");

        // The same handle can write the entry once the file may grow again.
        limit.set(u64::MAX);
        archive.write_entry("b", &[7u8; 512], EntryCodec::Stored).unwrap();
        let mut reopened = ArchiveFile::open_read(&path).unwrap();
        assert_eq!(reopened.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(reopened.read_entry("b").unwrap().unwrap(), vec![7u8; 512]);
    }

    #[test]
    fn test_append_then_reopen_reads_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("states.tsa");

        {
            let mut archive = ArchiveFile::open_append(&path).unwrap();
            assert!(archive.is_empty());
            archive.write_entry("a", b"first payload", EntryCodec::Stored).unwrap();
            archive
                .write_entry("b", &vec![7u8; 4096], EntryCodec::Zstd { level: 3 })
                .unwrap();
        }

        let mut reopened = ArchiveFile::open_read(&path).unwrap();
        assert_eq!(reopened.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(reopened.read_entry("a").unwrap().unwrap(), b"first payload");
        assert_eq!(reopened.read_entry("b").unwrap().unwrap(), vec![7u8; 4096]);
        assert!(reopened.read_entry("c").unwrap().is_none());
    }

    #[test]
    fn test_append_to_existing_archive_keeps_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("states.tsa");

        ArchiveFile::open_append(&path)
            .unwrap()
            .write_entry("a", b"one", EntryCodec::Stored)
            .unwrap();
        ArchiveFile::open_append(&path)
            .unwrap()
            .write_entry("b", b"two", EntryCodec::Stored)
            .unwrap();

        let mut archive = ArchiveFile::open_append(&path).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.read_entry("a").unwrap().unwrap(), b"one");
        assert_eq!(archive.read_entry("b").unwrap().unwrap(), b"two");
    }

    #[test]
    fn test_entries_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = ArchiveFile::open_append(&dir.path().join("s.tsa")).unwrap();

        archive.write_entry("a", b"one", EntryCodec::Stored).unwrap();
        let second = archive.write_entry("a", b"two", EntryCodec::Stored);

        assert!(matches!(second, Err(TrackStateError::ArchiveFormat(_))));
        assert_eq!(archive.read_entry("a").unwrap().unwrap(), b"one");
    }

    #[test]
    fn test_read_only_archive_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.tsa");
        ArchiveFile::open_append(&path).unwrap();

        let mut archive = ArchiveFile::open_read(&path).unwrap();
        assert!(matches!(
            archive.write_entry("a", b"x", EntryCodec::Stored),
            Err(TrackStateError::Precondition(_))
        ));
    }

    #[test]
    fn test_malformed_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let short = dir.path().join("short.tsa");
        std::fs::write(&short, b"TKSA").unwrap();
        assert!(matches!(
            ArchiveFile::open_read(&short),
            Err(TrackStateError::ArchiveFormat(_))
        ));

        let bad_magic = dir.path().join("magic.tsa");
        std::fs::write(&bad_magic, b"PK\x03\x04_and_the_rest_is_long_enough").unwrap();
        assert!(matches!(
            ArchiveFile::open_read(&bad_magic),
            Err(TrackStateError::ArchiveFormat(_))
        ));

        let good = dir.path().join("good.tsa");
        ArchiveFile::open_append(&good).unwrap();
        let mut bytes = std::fs::read(&good).unwrap();
        let n = bytes.len();
        bytes[n - 8..].copy_from_slice(&u64::MAX.to_le_bytes());
        let truncated = dir.path().join("bad_len.tsa");
        std::fs::write(&truncated, &bytes).unwrap();
        assert!(matches!(
            ArchiveFile::open_read(&truncated),
            Err(TrackStateError::ArchiveFormat(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ArchiveFile::open_read(&dir.path().join("absent.tsa")),
            Err(TrackStateError::Io(_))
        ));
    }
}
