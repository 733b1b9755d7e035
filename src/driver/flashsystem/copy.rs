// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Copying data between vdisks through the local host.
//
// Vdisks taking part in a copy are recorded in a per-driver set. A copy
// claims both of its vdisks at once, or waits until neither is claimed.
// Both vdisks are mapped to the local host unless they already were, their
// devices are scanned in, and the bytes are copied. Whatever happens, the
// devices are released and mappings made only for the copy are removed.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Condvar, Mutex},
    time::Duration,
};

use retry::{delay::Fixed, retry_with_index};

use crate::{
    driver::{
        flashsystem::{array::SizeUnit, driver::FlashSystemDriver},
        types::{ConnectionInfo, Connector, DriverAction, MIB},
    },
    flashsys::errors::{DriverError, DriverResult},
};

/// The set of vdisks taking part in a copy.
#[derive(Debug)]
pub struct CopyLock {
    busy: Mutex<HashSet<String>>,
    released: Condvar,
    log_interval: Duration,
}

impl CopyLock {
    pub fn new(log_interval: Duration) -> CopyLock {
        CopyLock {
            busy: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            log_interval,
        }
    }

    /// Claim all the named vdisks, blocking while any of them is claimed.
    /// There is no timeout; a message is logged every log interval while
    /// the caller waits.
    pub fn acquire(&self, names: &[&str]) -> DriverResult<CopyGuard<'_>> {
        let mut busy = self.busy.lock()?;
        loop {
            let blocked = names
                .iter()
                .filter(|n| busy.contains(**n))
                .copied()
                .collect::<Vec<_>>();
            if blocked.is_empty() {
                break;
            }
            debug!(
                "Copy of {} waits for the copy involving {} to finish",
                names.join(", "),
                blocked.join(", ")
            );
            let (guard, waited) = self.released.wait_timeout(busy, self.log_interval)?;
            busy = guard;
            if waited.timed_out() {
                info!(
                    "Still waiting for the copy involving {} to finish",
                    blocked.join(", ")
                );
            }
        }

        let mut claimed = Vec::with_capacity(names.len());
        for name in names {
            if busy.insert((*name).to_string()) {
                claimed.push((*name).to_string());
            }
        }
        trace!("Claimed {} for copy", claimed.join(", "));
        Ok(CopyGuard {
            lock: self,
            names: claimed,
        })
    }

    /// Block until the named vdisk is in no copy.
    pub fn wait_until_idle(&self, name: &str) -> DriverResult<()> {
        let mut busy = self.busy.lock()?;
        while busy.contains(name) {
            let (guard, waited) = self.released.wait_timeout(busy, self.log_interval)?;
            busy = guard;
            if waited.timed_out() {
                info!("Still waiting for the copy involving {name} to finish");
            }
        }
        Ok(())
    }

    /// The vdisks currently claimed, sorted.
    pub fn in_progress(&self) -> DriverResult<Vec<String>> {
        let busy = self.busy.lock()?;
        let mut names = busy.iter().cloned().collect::<Vec<_>>();
        names.sort_unstable();
        Ok(names)
    }

    fn release(&self, names: &[String]) {
        let mut busy = self.busy.lock().unwrap_or_else(|err| err.into_inner());
        for name in names {
            busy.remove(name);
        }
        trace!("Released {} from copy", names.join(", "));
        self.released.notify_all();
    }
}

/// Releases its vdisks from the copy set when dropped.
#[derive(Debug)]
pub struct CopyGuard<'a> {
    lock: &'a CopyLock,
    names: Vec<String>,
}

impl Drop for CopyGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(&self.names);
    }
}

/// A vdisk attached to the local host for the duration of a copy.
struct Attachment<'a> {
    driver: &'a FlashSystemDriver,
    vdisk: String,
    connector: Connector,
    /// Set when the vdisk was mapped for this attachment only.
    mapped_here: bool,
    info: Option<ConnectionInfo>,
    device: Option<PathBuf>,
}

impl Attachment<'_> {
    fn device(&self) -> DriverResult<&Path> {
        self.device.as_deref().ok_or_else(|| {
            DriverError::Msg(format!("Vdisk {} has no local device", self.vdisk))
        })
    }
}

impl Drop for Attachment<'_> {
    fn drop(&mut self) {
        if let (Some(info), Some(device)) = (&self.info, &self.device) {
            if let Err(err) = self.driver.connector.disconnect_volume(info, device) {
                warn!(
                    "Failed to disconnect {} of vdisk {}: {err}",
                    device.display(),
                    self.vdisk
                );
            }
        }
        if !self.mapped_here {
            return;
        }
        if let Err(err) = retry_with_index(Fixed::from_millis(100).take(2), |i| {
            trace!("Unmap attempt {i} of vdisk {}", self.vdisk);
            self.driver
                .unmap_vdisk_from_host(&self.vdisk, &self.connector)
        }) {
            warn!(
                "Failed to remove the temporary mapping of vdisk {}: {err}",
                self.vdisk
            );
        }
    }
}

impl FlashSystemDriver {
    fn attach(&self, vdisk: &str, connector: &Connector) -> DriverResult<Attachment<'_>> {
        let action = self.map_vdisk_to_host(vdisk, connector)?;
        let lun = *action.value();
        let mut attachment = Attachment {
            driver: self,
            vdisk: vdisk.to_string(),
            connector: connector.clone(),
            mapped_here: action.is_changed(),
            info: None,
            device: None,
        };

        let info = self.connection_properties(connector, lun, vdisk)?;
        let device = self.connector.connect_volume(&info)?;
        debug!("Vdisk {vdisk} is attached locally as {}", device.display());
        attachment.info = Some(info);
        attachment.device = Some(device);
        Ok(attachment)
    }

    /// Copy the contents of one vdisk onto another. Both vdisks must exist.
    pub fn copy_vdisk_data(&self, src: &str, dest: &str) -> DriverResult<()> {
        let _guard = self.copies.acquire(&[src, dest])?;
        self.copy_claimed(src, dest)
    }

    fn copy_claimed(&self, src: &str, dest: &str) -> DriverResult<()> {
        let source = self.array.vdisk_attributes(src)?.ok_or_else(|| {
            DriverError::BackendApi(format!("Source vdisk {src} of the copy does not exist"))
        })?;
        let size_mb = source.capacity.div_ceil(MIB);
        let block_size = self.config.block_size_bytes()?;

        let connector = self.connector.local_connector()?;
        self.hooks.check_connector(&connector)?;

        let source_attachment = self.attach(src, &connector)?;
        let dest_attachment = self.attach(dest, &connector)?;

        info!("Copying {size_mb} MiB from vdisk {src} to vdisk {dest}");
        self.connector
            .copy_volume(
                source_attachment.device()?,
                dest_attachment.device()?,
                size_mb,
                block_size,
            )
            .map_err(|err| {
                DriverError::Chained(
                    format!("Failed to copy vdisk {src} to vdisk {dest}"),
                    Box::new(err),
                )
            })
    }

    /// Create dest and fill it with the contents of src. The new vdisk has
    /// dest_size bytes, or the capacity of src if no size is given. If the
    /// copy fails the new vdisk is removed.
    pub fn create_and_copy_vdisk_data(
        &self,
        src: &str,
        dest: &str,
        dest_size: Option<u64>,
    ) -> DriverResult<()> {
        let source = self.array.vdisk_attributes(src)?.ok_or_else(|| {
            DriverError::BackendApi(format!("Source vdisk {src} of the copy does not exist"))
        })?;
        let size = dest_size.unwrap_or(source.capacity);

        let _guard = self.copies.acquire(&[src, dest])?;
        self.array.create_vdisk(dest, size, SizeUnit::B)?;

        if let Err(err) = self.copy_claimed(src, dest) {
            error!("Copy from {src} to {dest} failed; removing {dest}");
            if let Err(cleanup) = self.array.delete_vdisk(dest, true) {
                warn!("Failed to remove vdisk {dest} after failed copy: {cleanup}");
            }
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{mpsc, Arc},
        thread,
    };

    use super::*;

    #[test]
    fn overlapping_claims_wait() {
        let lock = Arc::new(CopyLock::new(Duration::from_millis(20)));
        let guard = lock.acquire(&["a", "b"]).unwrap();
        assert_eq!(lock.in_progress().unwrap(), vec!["a", "b"]);

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let _guard = lock.acquire(&["b", "c"]).unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(guard);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
        assert!(lock.in_progress().unwrap().is_empty());
    }

    #[test]
    fn disjoint_claims_proceed() {
        let lock = CopyLock::new(Duration::from_millis(20));
        let _first = lock.acquire(&["a", "b"]).unwrap();
        let _second = lock.acquire(&["c", "d"]).unwrap();
        assert_eq!(lock.in_progress().unwrap().len(), 4);
    }

    #[test]
    fn idle_wait_returns_after_release() {
        let lock = Arc::new(CopyLock::new(Duration::from_millis(10)));
        let guard = lock.acquire(&["a"]).unwrap();
        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.wait_until_idle("a").unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        drop(guard);
        waiter.join().unwrap();
        lock.wait_until_idle("never-claimed").unwrap();
    }
}
