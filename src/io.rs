use std::{
    fs::{
        File,
        OpenOptions,
    },
    io::{
        BufReader,
        Seek,
        SeekFrom,
    },
    os::unix::fs::OpenOptionsExt,
    path::Path,
};

use crate::{
    deps::{
        libc,
        log::debug,
    },
    error::Error,
};


pub fn new_buffered_file_reader(path: &Path) -> Result<BufReader<File>, std::io::Error> {
    debug!("opening file: {:?}", path);
    Ok(BufReader::new(File::open(path)?))
}


/// Opens an existing swap file or block device for page transfers, with a
/// direct-I/O hint. If the kernel refuses `O_DIRECT` for this path (common
/// on tmpfs), falls back to a buffered descriptor. Returns the descriptor
/// and its usable length in bytes.
pub fn open_swap_device(path: &Path) -> Result<(File, u64), Error> {
    let mut file = match OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_DIRECT)
        .open(path)
    {
        Ok(file) => file,
        Err(err) => {
            debug!("direct i/o unavailable for {:?} ({}), opening buffered", path, err);
            OpenOptions::new().read(true).write(true).open(path)?
        }
    };

    // Block devices report a zero metadata length; seeking to the end works
    // for both files and devices.
    let length = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    debug!("opened swap device {:?}, {} bytes", path, length);
    Ok((file, length))
}

/// Creates (or re-sizes) a swap file of exactly `length` bytes, with the
/// same direct-I/O hint as `open_swap_device`.
pub fn create_swap_file(
    path: &Path,
    length: u64,
) -> Result<File, Error> {
    debug!("creating swap file {:?}, {} bytes", path, length);
    let file = match OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .custom_flags(libc::O_DIRECT)
        .open(path)
    {
        Ok(file) => file,
        Err(err) => {
            debug!("direct i/o unavailable for {:?} ({}), creating buffered", path, err);
            OpenOptions::new().read(true).write(true).create(true).open(path)?
        }
    };
    file.set_len(length)?;
    Ok(file)
}
