// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::Path,
};

use crate::{
    driver::types::MIB,
    flashsys::errors::{DriverError, DriverResult},
};

/// Copy the first size_mb MiB of src onto dest. The source must hold at
/// least that much data.
pub fn copy_volume(src: &Path, dest: &Path, size_mb: u64, block_size: u64) -> DriverResult<()> {
    if block_size == 0 {
        return Err(DriverError::InvalidInput(
            "Copy block size must be positive".to_string(),
        ));
    }
    let block = usize::try_from(block_size).map_err(|_| {
        DriverError::InvalidInput(format!("Copy block size {block_size} is too large"))
    })?;

    let context = |what: &str, path: &Path, err: std::io::Error| {
        DriverError::Chained(
            format!("Failed to {what} {}", path.display()),
            Box::new(DriverError::Io(err)),
        )
    };

    let mut reader = File::open(src).map_err(|e| context("open", src, e))?;
    let mut writer = OpenOptions::new()
        .write(true)
        .open(dest)
        .map_err(|e| context("open", dest, e))?;

    let total = size_mb.checked_mul(MIB).ok_or_else(|| {
        DriverError::InvalidInput(format!("Copy size of {size_mb} MiB overflows"))
    })?;
    debug!(
        "Copying {size_mb} MiB from {} to {} in blocks of {block_size} bytes",
        src.display(),
        dest.display()
    );

    let mut buf = vec![0u8; block];
    let mut copied = 0u64;
    while copied < total {
        let want = usize::try_from((total - copied).min(block_size)).unwrap_or(block);
        let read = reader
            .read(&mut buf[..want])
            .map_err(|e| context("read from", src, e))?;
        if read == 0 {
            return Err(DriverError::Msg(format!(
                "{} ended after {copied} bytes; {total} bytes were to be copied",
                src.display()
            )));
        }
        writer
            .write_all(&buf[..read])
            .map_err(|e| context("write to", dest, e))?;
        copied += read as u64;
    }

    writer.sync_all().map_err(|e| context("sync", dest, e))?;
    info!(
        "Copied {copied} bytes from {} to {}",
        src.display(),
        dest.display()
    );
    Ok(())
}
