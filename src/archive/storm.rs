//! StormLib-backed archive engine.
//!
//! The container format used by the legacy client is MPQ. This module
//! binds a system StormLib shared library (char-based build) at runtime
//! and adapts it to [`ArchiveEngine`]. All unsafe FFI lives here; the
//! invariants are that every `CString` outlives the call it is passed to
//! and that raw handles are only used while the owning [`Library`] is
//! alive, which both [`StormArchive`] and [`StormLib`] guarantee by
//! construction.

#![allow(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{c_char, c_void, CString};
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use tracing::debug;

use super::{
    Archive, ArchiveEngine, ArchiveError, ArchiveVersion, EntryFlags, EntryStream, OpenMode,
    LISTFILE_NAME,
};

/// Environment variable overriding the library name handed to the loader.
pub const LIBRARY_ENV: &str = "MFIL_STORMLIB";

type Handle = *mut c_void;

// Values from StormLib.h.
const STREAM_PROVIDER_BLOCK4: u32 = 0x0030;
const MPQ_OPEN_READ_ONLY: u32 = 0x0000_0100;
const MPQ_CREATE_ARCHIVE_V3: u32 = 0x0200_0000;
const HASH_TABLE_SIZE_MAX: u32 = 0x0008_0000;
const MPQ_COMPRESSION_ZLIB: u32 = 0x0000_0002;
const SFILE_INVALID_SIZE: u32 = 0xFFFF_FFFF;
const SFILE_INFO_FLAGS: u32 = 53;

type OpenArchiveFn = unsafe extern "C" fn(*const c_char, u32, u32, *mut Handle) -> u8;
type CreateArchiveFn = unsafe extern "C" fn(*const c_char, u32, u32, *mut Handle) -> u8;
type FlushArchiveFn = unsafe extern "C" fn(Handle) -> u8;
type CloseArchiveFn = unsafe extern "C" fn(Handle) -> u8;
type OpenFileFn = unsafe extern "C" fn(Handle, *const c_char, u32, *mut Handle) -> u8;
type ReadFileFn = unsafe extern "C" fn(Handle, *mut c_void, u32, *mut u32, *mut c_void) -> u8;
type GetFileSizeFn = unsafe extern "C" fn(Handle, *mut u32) -> u32;
type GetFileInfoFn = unsafe extern "C" fn(Handle, u32, *mut c_void, u32, *mut u32) -> u8;
type CloseFileFn = unsafe extern "C" fn(Handle) -> u8;
type ExtractFileFn = unsafe extern "C" fn(Handle, *const c_char, *const c_char, u32) -> u8;
type AddFileFn = unsafe extern "C" fn(Handle, *const c_char, *const c_char, u32, u32, u32) -> u8;
type CreateFileFn = unsafe extern "C" fn(Handle, *const c_char, u64, u32, u32, u32, *mut Handle) -> u8;
type WriteFileFn = unsafe extern "C" fn(Handle, *const c_void, u32, u32) -> u8;
type FinishFileFn = unsafe extern "C" fn(Handle) -> u8;

/// Resolved StormLib entry points. The plain fn pointers are copied out of
/// their symbols; they stay valid exactly as long as `_lib`, which lives in
/// the same struct.
#[derive(Debug)]
struct StormLib {
    open_archive: OpenArchiveFn,
    create_archive: CreateArchiveFn,
    flush_archive: FlushArchiveFn,
    close_archive: CloseArchiveFn,
    open_file: OpenFileFn,
    read_file: ReadFileFn,
    get_file_size: GetFileSizeFn,
    get_file_info: GetFileInfoFn,
    close_file: CloseFileFn,
    extract_file: ExtractFileFn,
    add_file: AddFileFn,
    create_file: CreateFileFn,
    write_file: WriteFileFn,
    finish_file: FinishFileFn,
    _lib: Library,
}

impl StormLib {
    fn load(path: &Path) -> Result<Self, ArchiveError> {
        let unavailable = |err: libloading::Error| {
            ArchiveError::EngineUnavailable(format!("{}: {err}", path.display()))
        };
        // SAFETY: StormLib has no load-time side effects beyond CRT setup.
        let lib = unsafe { Library::new(path) }.map_err(unavailable)?;
        // SAFETY: every name resolves to a function with the matching C
        // signature in any StormLib 9.x build.
        unsafe {
            Ok(Self {
                open_archive: *lib.get(b"SFileOpenArchive\0").map_err(unavailable)?,
                create_archive: *lib.get(b"SFileCreateArchive\0").map_err(unavailable)?,
                flush_archive: *lib.get(b"SFileFlushArchive\0").map_err(unavailable)?,
                close_archive: *lib.get(b"SFileCloseArchive\0").map_err(unavailable)?,
                open_file: *lib.get(b"SFileOpenFileEx\0").map_err(unavailable)?,
                read_file: *lib.get(b"SFileReadFile\0").map_err(unavailable)?,
                get_file_size: *lib.get(b"SFileGetFileSize\0").map_err(unavailable)?,
                get_file_info: *lib.get(b"SFileGetFileInfo\0").map_err(unavailable)?,
                close_file: *lib.get(b"SFileCloseFile\0").map_err(unavailable)?,
                extract_file: *lib.get(b"SFileExtractFile\0").map_err(unavailable)?,
                add_file: *lib.get(b"SFileAddFileEx\0").map_err(unavailable)?,
                create_file: *lib.get(b"SFileCreateFile\0").map_err(unavailable)?,
                write_file: *lib.get(b"SFileWriteFile\0").map_err(unavailable)?,
                finish_file: *lib.get(b"SFileFinishFile\0").map_err(unavailable)?,
                _lib: lib,
            })
        }
    }
}

fn default_library_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "StormLib.dll"
    } else if cfg!(target_os = "macos") {
        "libstorm.dylib"
    } else {
        "libstorm.so"
    }
}

/// Archive engine backed by the system StormLib.
#[derive(Debug)]
pub struct StormEngine {
    lib: Arc<StormLib>,
}

impl StormEngine {
    /// Bind StormLib, honouring the `MFIL_STORMLIB` override.
    pub fn load() -> Result<Self, ArchiveError> {
        match std::env::var(LIBRARY_ENV) {
            Ok(path) => Self::load_from(Path::new(&path)),
            Err(_) => Self::load_from(Path::new(default_library_name())),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ArchiveError> {
        Ok(Self {
            lib: Arc::new(StormLib::load(path)?),
        })
    }
}

impl ArchiveEngine for StormEngine {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn Archive + '_>, ArchiveError> {
        let flags = match mode {
            OpenMode::ReadOnly => MPQ_OPEN_READ_ONLY,
            OpenMode::Fragmented => STREAM_PROVIDER_BLOCK4,
        };
        let c_path = c_path(path)?;
        let mut handle: Handle = std::ptr::null_mut();
        let ok = unsafe { (self.lib.open_archive)(c_path.as_ptr(), 0, flags, &mut handle) };
        if ok == 0 {
            return Err(ArchiveError::Open {
                path: path.to_path_buf(),
                source: io::Error::last_os_error(),
            });
        }
        debug!(path = %path.display(), ?mode, "archive opened");
        Ok(Box::new(StormArchive::new(Arc::clone(&self.lib), handle)))
    }

    fn create(
        &self,
        path: &Path,
        version: ArchiveVersion,
    ) -> Result<Box<dyn Archive + '_>, ArchiveError> {
        let flags = match version {
            ArchiveVersion::V3 => MPQ_CREATE_ARCHIVE_V3,
        };
        let c_path = c_path(path)?;
        let mut handle: Handle = std::ptr::null_mut();
        let ok = unsafe {
            (self.lib.create_archive)(c_path.as_ptr(), flags, HASH_TABLE_SIZE_MAX, &mut handle)
        };
        if ok == 0 {
            return Err(ArchiveError::Create {
                path: path.to_path_buf(),
                source: io::Error::last_os_error(),
            });
        }
        debug!(path = %path.display(), "archive created");
        Ok(Box::new(StormArchive::new(Arc::clone(&self.lib), handle)))
    }
}

/// One open archive. Open entry handles live in a registry keyed by opaque
/// ids; entry streams hold an id and borrow the archive, never a handle.
struct StormArchive {
    lib: Arc<StormLib>,
    handle: Handle,
    entries: RefCell<HashMap<u64, Handle>>,
    next_entry: Cell<u64>,
}

impl StormArchive {
    fn new(lib: Arc<StormLib>, handle: Handle) -> Self {
        Self {
            lib,
            handle,
            entries: RefCell::new(HashMap::new()),
            next_entry: Cell::new(0),
        }
    }

    fn open_entry_raw(&self, name: &str) -> Result<(u64, Handle), ArchiveError> {
        let c_name = c_string(name)?;
        let mut file: Handle = std::ptr::null_mut();
        let ok = unsafe { (self.lib.open_file)(self.handle, c_name.as_ptr(), 0, &mut file) };
        if ok == 0 {
            return Err(ArchiveError::EntryNotFound(name.to_string()));
        }
        let id = self.next_entry.get();
        self.next_entry.set(id + 1);
        self.entries.borrow_mut().insert(id, file);
        Ok((id, file))
    }

    fn entry_handle(&self, id: u64) -> Option<Handle> {
        self.entries.borrow().get(&id).copied()
    }

    fn release_entry(&self, id: u64) {
        if let Some(file) = self.entries.borrow_mut().remove(&id) {
            unsafe { (self.lib.close_file)(file) };
        }
    }
}

impl Archive for StormArchive {
    fn file_list(&self) -> Result<Option<Vec<String>>, ArchiveError> {
        let mut entry = match self.open_entry(LISTFILE_NAME) {
            Ok(entry) => entry,
            Err(_) => return Ok(None),
        };
        let mut raw = Vec::new();
        entry.read_to_end(&mut raw)?;
        let text = String::from_utf8_lossy(&raw);
        Ok(Some(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect(),
        ))
    }

    fn extract(&self, name: &str, dest: &Path) -> Result<(), ArchiveError> {
        let c_name = c_string(name)?;
        let c_dest = c_path(dest)?;
        let ok =
            unsafe { (self.lib.extract_file)(self.handle, c_name.as_ptr(), c_dest.as_ptr(), 0) };
        if ok == 0 {
            return Err(ArchiveError::Native {
                op: "extract",
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn open_entry<'a>(&'a self, name: &str) -> Result<Box<dyn EntryStream + 'a>, ArchiveError> {
        let (id, file) = self.open_entry_raw(name)?;

        let mut high: u32 = 0;
        let low = unsafe { (self.lib.get_file_size)(file, &mut high) };
        if low == SFILE_INVALID_SIZE {
            let source = io::Error::last_os_error();
            self.release_entry(id);
            return Err(ArchiveError::Native {
                op: "file size",
                source,
            });
        }
        let size = (u64::from(high) << 32) | u64::from(low);

        let mut flags: u32 = 0;
        let ok = unsafe {
            (self.lib.get_file_info)(
                file,
                SFILE_INFO_FLAGS,
                (&mut flags as *mut u32).cast(),
                4,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            // Treat unreadable flags as a plain stored entry.
            debug!(entry = name, "could not read entry flags");
            flags = 0;
        }

        Ok(Box::new(StormEntryStream {
            archive: self,
            id,
            name: name.to_string(),
            flags: EntryFlags(flags),
            size,
            pos: 0,
        }))
    }

    fn add_from_disk(&self, src: &Path, name: &str, flags: EntryFlags) -> Result<(), ArchiveError> {
        let compression = if flags.is_compressed() {
            MPQ_COMPRESSION_ZLIB
        } else {
            0
        };
        let c_src = c_path(src)?;
        let c_name = c_string(name)?;
        let ok = unsafe {
            (self.lib.add_file)(
                self.handle,
                c_src.as_ptr(),
                c_name.as_ptr(),
                flags.0,
                compression,
                compression,
            )
        };
        if ok == 0 {
            return Err(ArchiveError::Native {
                op: "add file",
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn add_from_stream(&self, entry: &mut dyn EntryStream) -> Result<(), ArchiveError> {
        let compression = if entry.flags().is_compressed() {
            MPQ_COMPRESSION_ZLIB
        } else {
            0
        };
        let c_name = c_string(entry.name())?;
        let mut file: Handle = std::ptr::null_mut();
        let ok = unsafe {
            (self.lib.create_file)(
                self.handle,
                c_name.as_ptr(),
                0,
                entry.len() as u32,
                0,
                entry.flags().0,
                &mut file,
            )
        };
        if ok == 0 {
            return Err(ArchiveError::Native {
                op: "create entry",
                source: io::Error::last_os_error(),
            });
        }

        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = entry.read(&mut buf)?;
            if n == 0 {
                break;
            }
            // SAFETY: buf holds the n bytes just read.
            let ok = unsafe {
                (self.lib.write_file)(file, buf.as_ptr().cast(), n as u32, compression)
            };
            if ok == 0 {
                let source = io::Error::last_os_error();
                unsafe { (self.lib.finish_file)(file) };
                return Err(ArchiveError::Native {
                    op: "write entry",
                    source,
                });
            }
        }

        let ok = unsafe { (self.lib.finish_file)(file) };
        if ok == 0 {
            return Err(ArchiveError::Native {
                op: "finish entry",
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), ArchiveError> {
        let ok = unsafe { (self.lib.flush_archive)(self.handle) };
        if ok == 0 {
            return Err(ArchiveError::Native {
                op: "flush",
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Drop for StormArchive {
    fn drop(&mut self) {
        // Close any entry handles the caller leaked, then the archive.
        for (_, file) in self.entries.borrow_mut().drain() {
            unsafe { (self.lib.close_file)(file) };
        }
        unsafe { (self.lib.close_archive)(self.handle) };
    }
}

impl std::fmt::Debug for StormArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StormArchive")
            .field("open_entries", &self.entries.borrow().len())
            .finish_non_exhaustive()
    }
}

struct StormEntryStream<'a> {
    archive: &'a StormArchive,
    id: u64,
    name: String,
    flags: EntryFlags,
    size: u64,
    pos: u64,
}

impl Read for StormEntryStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(file) = self.archive.entry_handle(self.id) else {
            return Err(io::Error::new(io::ErrorKind::NotFound, "entry closed"));
        };
        let want = buf.len().min(u32::MAX as usize) as u32;
        let mut read: u32 = 0;
        // SAFETY: buf holds at least `want` writable bytes.
        let ok = unsafe {
            (self.archive.lib.read_file)(
                file,
                buf.as_mut_ptr().cast(),
                want,
                &mut read,
                std::ptr::null_mut(),
            )
        };
        // A short read at the end of the entry reports failure with the
        // bytes that were still available; only a zero-byte short read
        // before the end is a real error.
        if ok == 0 && read == 0 {
            if self.pos < self.size {
                return Err(io::Error::last_os_error());
            }
            return Ok(0);
        }
        self.pos += u64::from(read);
        Ok(read as usize)
    }
}

impl EntryStream for StormEntryStream<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn flags(&self) -> EntryFlags {
        self.flags
    }

    fn len(&self) -> u64 {
        self.size
    }
}

impl Drop for StormEntryStream<'_> {
    fn drop(&mut self) {
        self.archive.release_entry(self.id);
    }
}

fn c_path(path: &Path) -> Result<CString, ArchiveError> {
    let text = path.to_str().ok_or_else(|| {
        ArchiveError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path is not valid UTF-8: {}", path.display()),
        ))
    })?;
    c_string(text)
}

fn c_string(text: &str) -> Result<CString, ArchiveError> {
    CString::new(text).map_err(|_| {
        ArchiveError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "embedded NUL in archive name",
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_reported_as_unavailable() {
        let err = StormEngine::load_from(Path::new("/nonexistent/libstorm-missing.so"))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::EngineUnavailable(_)));
    }

    #[test]
    fn test_default_library_name_is_platform_shaped() {
        let name = default_library_name();
        assert!(name.to_ascii_lowercase().contains("storm"));
    }

    #[test]
    fn test_names_with_embedded_nul_are_rejected() {
        assert!(c_string("bad\0name").is_err());
    }
}
