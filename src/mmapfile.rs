use crate::deps::{
    log::{
        debug,
        warn,
    },
    nix::sys::mman::{
        mmap,
        munmap,
        MapFlags,
        ProtFlags,
    },
};
use std::io;
use std::{
    borrow::Cow,
    fs::{
        File,
        OpenOptions,
    },
    os::unix::io::AsRawFd,
    path::{
        Path,
        PathBuf,
    },
    ptr::NonNull,
};

use crate::error::Error;


/// A memory mapping, either backed by a file or anonymous.
///
/// The planner maps the reverse-annotation file to rewrite its records into
/// forward order in place, and the engine obtains its page-aligned physical
/// frame memory from an anonymous mapping.
pub struct MmapFile {
    path: Option<PathBuf>,
    // Kept alive for the lifetime of the mapping; `None` for anonymous maps.
    _file: Option<File>,
    ptr:   NonNull<u8>,
    len:   usize,
}

impl MmapFile {
    pub const TAG: Cow<'static, str> = Cow::Borrowed("MmapFile");

    fn map_fd(
        fd: std::os::unix::io::RawFd,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
    ) -> Result<NonNull<u8>, Error> {
        debug_assert!(len != 0);
        let ptr = unsafe { mmap(std::ptr::null_mut(), len, prot, flags, fd, 0) }
            .map_err(|e| Error::from(io::Error::new(io::ErrorKind::Other, e)))?;

        Ok(NonNull::new(ptr as *mut u8).expect("mmap returned a null mapping"))
    }

    /// Creates (or truncates) the file at `path`, sizes it to `len` bytes,
    /// and maps it read-write.
    pub fn create<P: AsRef<Path>>(
        path: P,
        len: usize,
    ) -> Result<Self, Error> {
        let path = path.as_ref();
        debug!("[{}] creating {} byte file-backed mapping at {:?}", Self::TAG, len, path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;

        let ptr = Self::map_fd(
            file.as_raw_fd(),
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
        )?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            _file: Some(file),
            ptr,
            len,
        })
    }

    /// Maps an existing file read-only, covering its whole length.
    pub fn open_readonly<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        debug!("[{}] mapping {} byte file {:?} read-only", Self::TAG, len, path);

        let ptr = Self::map_fd(file.as_raw_fd(), len, ProtFlags::PROT_READ, MapFlags::MAP_PRIVATE)?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            _file: Some(file),
            ptr,
            len,
        })
    }

    /// An anonymous read-write mapping of `len` bytes. The returned memory
    /// is zeroed and page-aligned, which is what direct-I/O swap transfers
    /// require of the engine's frame memory.
    pub fn anonymous(len: usize) -> Result<Self, Error> {
        debug!("[{}] creating {} byte anonymous mapping", Self::TAG, len);

        let ptr = Self::map_fd(
            -1,
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS | MapFlags::MAP_NORESERVE,
        )?;

        Ok(Self {
            path: None,
            _file: None,
            ptr,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[inline(always)]
    pub fn as_nonnull(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl Drop for MmapFile {
    fn drop(&mut self) {
        debug!("[{}::drop] unmapping {:?}", Self::TAG, self.path);
        if let Err(err) = unsafe { munmap(self.ptr.as_ptr() as *mut _, self.len) } {
            warn!("[{}] munmap of {:?} failed: {}", Self::TAG, self.path, err);
        }
    }
}

impl std::fmt::Debug for MmapFile {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        f.debug_struct(Self::TAG.as_ref())
            .field("path", &self.path)
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

impl std::convert::AsRef<[u8]> for MmapFile {
    fn as_ref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl std::convert::AsMut<[u8]> for MmapFile {
    fn as_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}
