//! In-memory archive engine for exercising install logic in tests.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{
    Archive, ArchiveEngine, ArchiveError, ArchiveVersion, EntryFlags, EntryStream, OpenMode,
};

/// One entry inside a [`MockArchiveSpec`].
#[derive(Debug, Clone, Default)]
pub struct MockEntry {
    pub data: Vec<u8>,
    pub flags: u32,
}

/// Blueprint for an archive the engine will hand out on `open`.
#[derive(Debug, Clone, Default)]
pub struct MockArchiveSpec {
    list: Option<Vec<String>>,
    entries: BTreeMap<String, MockEntry>,
}

impl MockArchiveSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry and list it.
    pub fn entry(mut self, name: &str, data: &[u8], flags: u32) -> Self {
        self.list.get_or_insert_with(Vec::new).push(name.to_string());
        self.entries.insert(
            name.to_string(),
            MockEntry {
                data: data.to_vec(),
                flags,
            },
        );
        self
    }

    /// Drop the file list, as in an archive without a usable one.
    pub fn without_list(mut self) -> Self {
        self.list = None;
        self
    }
}

/// Everything the mock archives were asked to do, for assertions.
#[derive(Debug, Default)]
pub struct WriteLog {
    pub opened: Mutex<Vec<(PathBuf, OpenMode)>>,
    pub created: Mutex<Vec<PathBuf>>,
    pub extracted: Mutex<Vec<(String, PathBuf)>>,
    pub from_stream: Mutex<Vec<(String, u32)>>,
    pub from_disk: Mutex<Vec<(String, PathBuf, u32)>>,
    pub flushes: Mutex<usize>,
}

#[derive(Debug, Default)]
pub struct MockEngine {
    archives: Mutex<BTreeMap<PathBuf, MockArchiveSpec>>,
    pub log: Arc<WriteLog>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_archive(self, path: impl Into<PathBuf>, spec: MockArchiveSpec) -> Self {
        self.archives.lock().unwrap().insert(path.into(), spec);
        self
    }
}

impl ArchiveEngine for MockEngine {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn Archive + '_>, ArchiveError> {
        let spec = self
            .archives
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ArchiveError::Open {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "not registered"),
            })?;
        self.log
            .opened
            .lock()
            .unwrap()
            .push((path.to_path_buf(), mode));
        Ok(Box::new(MockArchive {
            spec,
            log: Arc::clone(&self.log),
        }))
    }

    fn create(
        &self,
        path: &Path,
        _version: ArchiveVersion,
    ) -> Result<Box<dyn Archive + '_>, ArchiveError> {
        // Materialize the file like the native engine does.
        std::fs::write(path, []).map_err(|source| ArchiveError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        self.log.created.lock().unwrap().push(path.to_path_buf());
        Ok(Box::new(MockArchive {
            spec: MockArchiveSpec::default(),
            log: Arc::clone(&self.log),
        }))
    }
}

#[derive(Debug)]
pub struct MockArchive {
    spec: MockArchiveSpec,
    log: Arc<WriteLog>,
}

impl Archive for MockArchive {
    fn file_list(&self) -> Result<Option<Vec<String>>, ArchiveError> {
        Ok(self.spec.list.clone())
    }

    fn extract(&self, name: &str, dest: &Path) -> Result<(), ArchiveError> {
        let entry = self
            .spec
            .entries
            .get(name)
            .ok_or_else(|| ArchiveError::EntryNotFound(name.to_string()))?;
        std::fs::write(dest, &entry.data)?;
        self.log
            .extracted
            .lock()
            .unwrap()
            .push((name.to_string(), dest.to_path_buf()));
        Ok(())
    }

    fn open_entry<'a>(&'a self, name: &str) -> Result<Box<dyn EntryStream + 'a>, ArchiveError> {
        let entry = self
            .spec
            .entries
            .get(name)
            .ok_or_else(|| ArchiveError::EntryNotFound(name.to_string()))?;
        Ok(Box::new(MockEntryStream {
            name: name.to_string(),
            flags: EntryFlags(entry.flags),
            len: entry.data.len() as u64,
            cursor: Cursor::new(entry.data.clone()),
        }))
    }

    fn add_from_disk(&self, src: &Path, name: &str, flags: EntryFlags) -> Result<(), ArchiveError> {
        self.log
            .from_disk
            .lock()
            .unwrap()
            .push((name.to_string(), src.to_path_buf(), flags.0));
        Ok(())
    }

    fn add_from_stream(&self, entry: &mut dyn EntryStream) -> Result<(), ArchiveError> {
        let mut sink = Vec::new();
        entry.read_to_end(&mut sink)?;
        self.log
            .from_stream
            .lock()
            .unwrap()
            .push((entry.name().to_string(), entry.flags().0));
        Ok(())
    }

    fn flush(&self) -> Result<(), ArchiveError> {
        *self.log.flushes.lock().unwrap() += 1;
        Ok(())
    }
}

pub struct MockEntryStream {
    name: String,
    flags: EntryFlags,
    len: u64,
    cursor: Cursor<Vec<u8>>,
}

impl Read for MockEntryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl EntryStream for MockEntryStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn flags(&self) -> EntryFlags {
        self.flags
    }

    fn len(&self) -> u64 {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_entry_round_trips_data() {
        let engine = MockEngine::new().with_archive(
            "/tmp/a.mpq",
            MockArchiveSpec::new().entry("readme.txt", b"hello", 0x200),
        );
        let archive = engine.open(Path::new("/tmp/a.mpq"), OpenMode::ReadOnly).unwrap();
        let mut entry = archive.open_entry("readme.txt").unwrap();
        assert_eq!(entry.len(), 5);
        assert!(entry.flags().is_compressed());
        let mut data = String::new();
        entry.read_to_string(&mut data).unwrap();
        assert_eq!(data, "hello");
    }

    #[test]
    fn test_unregistered_archive_fails_to_open() {
        let engine = MockEngine::new();
        let err = engine
            .open(Path::new("/tmp/missing.mpq"), OpenMode::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Open { .. }));
    }
}
