// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Array objects and the CLI commands that manage them.

use std::sync::LazyLock;

use regex::Regex;

use crate::{
    driver::{
        flashsystem::{
            cmd::{args, CliExecutor, CliOutput},
            consts::{CLI_DELIM, CMMVC5753E, CMMVC5754E, SUCCESSFULLY_CREATED},
            parse::{Attributes, Table},
            records::{
                CliRecord, HostInfo, HostSummary, HostVdiskMap, NodeDetail, NodeSummary, PortIp,
                SystemInfo, VdiskHostMap, VdiskInfo,
            },
        },
        types::{CreateAction, DeleteAction, RenameAction},
    },
    flashsys::errors::{DriverError, DriverResult},
};

static CREATED_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"id \[(\d+)\]").expect("pattern is a valid constant regular expression")
});

/// Unit accepted by mkvdisk -unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::Display, strum_macros::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum SizeUnit {
    B,
    Mb,
    Gb,
}

/// Port flag for mkhost.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostPorts<'a> {
    Wwpns(&'a [String]),
    IscsiName(&'a str),
}

/// The array, reached through a CLI executor.
#[derive(Debug)]
pub struct Array {
    executor: Box<dyn CliExecutor>,
    pool: String,
}

impl Array {
    pub fn new(executor: Box<dyn CliExecutor>, pool: &str) -> Array {
        Array {
            executor,
            pool: pool.to_string(),
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    fn run(&self, args: &[String]) -> DriverResult<CliOutput> {
        self.executor.execute(args)
    }

    /// Run a svcinfo listing or detailed view, requesting "!" separators.
    fn svcinfo(&self, cmd: &str, flags: &[&str], object: Option<&str>) -> DriverResult<CliOutput> {
        let mut argv = args(&["svcinfo", cmd]);
        argv.extend(args(flags));
        argv.push("-delim".to_string());
        argv.push(CLI_DELIM.to_string());
        if let Some(object) = object {
            argv.push(object.to_string());
        }
        self.run(&argv)
    }

    fn listing<R: CliRecord>(&self, cmd: &str, object: Option<&str>) -> DriverResult<Vec<R>> {
        let out = self.svcinfo(cmd, &[], object).map_err(|err| {
            DriverError::Chained(format!("Failed to list {cmd}"), Box::new(err))
        })?;
        R::from_table(&Table::parse(&out.stdout)?)
    }

    fn detail<R: CliRecord>(&self, cmd: &str, flags: &[&str], object: &str) -> DriverResult<R> {
        let out = self.svcinfo(cmd, flags, Some(object)).map_err(|err| {
            DriverError::Chained(format!("Failed to query {cmd} {object}"), Box::new(err))
        })?;
        let attributes = Attributes::parse(&out.stdout);
        if attributes.is_empty() {
            return Err(DriverError::BackendApi(format!(
                "{cmd} {object} returned no attributes"
            )));
        }
        R::from_attributes(&attributes)
    }

    /// Attributes of the named vdisk, or None if the array does not know it.
    pub fn vdisk_attributes(&self, name: &str) -> DriverResult<Option<VdiskInfo>> {
        match self.svcinfo("lsvdisk", &["-bytes"], Some(name)) {
            Ok(out) => {
                let attributes = Attributes::parse(&out.stdout);
                if attributes.is_empty() {
                    Ok(None)
                } else {
                    VdiskInfo::from_attributes(&attributes).map(Some)
                }
            }
            Err(err) if err.has_cli_code(CMMVC5753E) || err.has_cli_code(CMMVC5754E) => Ok(None),
            Err(err) => Err(DriverError::Chained(
                format!("Failed to query attributes of vdisk {name}"),
                Box::new(err),
            )),
        }
    }

    pub fn is_vdisk_defined(&self, name: &str) -> DriverResult<bool> {
        self.vdisk_attributes(name).map(|a| a.is_some())
    }

    /// Create a vdisk in the configured pool and return its id.
    pub fn create_vdisk(&self, name: &str, size: u64, unit: SizeUnit) -> DriverResult<u32> {
        let size = size.to_string();
        let argv = args(&[
            "svctask",
            "mkvdisk",
            "-name",
            name,
            "-mdiskgrp",
            &self.pool,
            "-iogrp",
            "0",
            "-size",
            &size,
            "-unit",
            unit.as_ref(),
        ]);
        let out = self.run(&argv).map_err(|err| {
            DriverError::Chained(format!("Failed to create vdisk {name}"), Box::new(err))
        })?;
        let id = created_id(&out, &format!("mkvdisk {name}"))?;
        info!("Created vdisk {name} with id {id}, size {size} {unit}");
        Ok(id)
    }

    /// Remove a vdisk. Absent vdisks are left alone.
    pub fn delete_vdisk(&self, name: &str, force: bool) -> DriverResult<DeleteAction<String>> {
        if !self.is_vdisk_defined(name)? {
            warn!("Tried to delete vdisk {name} but it does not exist");
            return Ok(DeleteAction::Identity);
        }

        let mut argv = args(&["svctask", "rmvdisk"]);
        if force {
            argv.push("-force".to_string());
        }
        argv.push(name.to_string());
        let out = self.run(&argv).map_err(|err| {
            DriverError::Chained(format!("Failed to delete vdisk {name}"), Box::new(err))
        })?;
        expect_empty(&out, &format!("rmvdisk {name}"))?;
        info!("Deleted vdisk {name}");
        Ok(DeleteAction::Deleted(name.to_string()))
    }

    pub fn rename_vdisk(&self, old: &str, new: &str) -> DriverResult<RenameAction<String>> {
        if !self.is_vdisk_defined(old)? {
            warn!("Tried to rename vdisk {old} to {new} but it does not exist");
            return Ok(RenameAction::NoSource);
        }
        if old == new {
            return Ok(RenameAction::Identity);
        }

        let argv = args(&["svctask", "chvdisk", "-name", new, old]);
        self.run(&argv).map_err(|err| {
            DriverError::Chained(
                format!("Failed to rename vdisk {old} to {new}"),
                Box::new(err),
            )
        })?;
        info!("Renamed vdisk {old} to {new}");
        Ok(RenameAction::Renamed(new.to_string()))
    }

    /// Grow a vdisk by the given number of GiB.
    pub fn expand_vdisk(&self, name: &str, amount_gb: u64) -> DriverResult<()> {
        let amount = amount_gb.to_string();
        let argv = args(&[
            "svctask",
            "expandvdisksize",
            "-size",
            &amount,
            "-unit",
            "gb",
            name,
        ]);
        let out = self.run(&argv).map_err(|err| {
            DriverError::Chained(format!("Failed to expand vdisk {name}"), Box::new(err))
        })?;
        expect_empty(&out, &format!("expandvdisksize {name}"))?;
        info!("Expanded vdisk {name} by {amount_gb} GiB");
        Ok(())
    }

    pub fn list_hosts(&self) -> DriverResult<Vec<HostSummary>> {
        self.listing("lshost", None)
    }

    pub fn host_detail(&self, name: &str) -> DriverResult<HostInfo> {
        self.detail("lshost", &[], name)
    }

    /// Create a host with the given ports and return its id.
    pub fn create_host(&self, name: &str, ports: HostPorts<'_>) -> DriverResult<CreateAction<u32>> {
        let (flag, value) = match ports {
            HostPorts::Wwpns(wwpns) => ("-hbawwpn", wwpns.join(":")),
            HostPorts::IscsiName(iqn) => ("-iscsiname", iqn.to_string()),
        };
        let argv = args(&["svctask", "mkhost", "-force", flag, &value, "-name", name]);
        let out = self.run(&argv).map_err(|err| {
            DriverError::Chained(format!("Failed to create host {name}"), Box::new(err))
        })?;
        let id = created_id(&out, &format!("mkhost {name}"))?;
        info!("Created host {name} with ports {value}");
        Ok(CreateAction::Created(id))
    }

    pub fn delete_host(&self, name: &str) -> DriverResult<()> {
        let argv = args(&["svctask", "rmhost", name]);
        self.run(&argv).map_err(|err| {
            DriverError::Chained(format!("Failed to delete host {name}"), Box::new(err))
        })?;
        info!("Deleted host {name}");
        Ok(())
    }

    pub fn host_mappings(&self, host: &str) -> DriverResult<Vec<HostVdiskMap>> {
        self.listing("lshostvdiskmap", Some(host))
    }

    pub fn vdisk_mappings(&self, vdisk: &str) -> DriverResult<Vec<VdiskHostMap>> {
        self.listing("lsvdiskhostmap", Some(vdisk))
    }

    /// Map a vdisk to a host under the given SCSI id. The error of a failed
    /// attempt is returned unwrapped so that the caller can inspect its
    /// CMMVC code.
    pub fn create_mapping(&self, host: &str, vdisk: &str, lun: u32, force: bool) -> DriverResult<()> {
        let lun = lun.to_string();
        let mut argv = args(&["svctask", "mkvdiskhostmap"]);
        if force {
            argv.push("-force".to_string());
        }
        argv.extend(args(&["-host", host, "-scsi", &lun, vdisk]));
        let out = self.run(&argv)?;
        created_id(&out, &format!("mkvdiskhostmap {host} {vdisk}"))?;
        info!("Mapped vdisk {vdisk} to host {host} with LUN id {lun}");
        Ok(())
    }

    pub fn delete_mapping(&self, host: &str, vdisk: &str) -> DriverResult<()> {
        let argv = args(&["svctask", "rmvdiskhostmap", "-host", host, vdisk]);
        self.run(&argv).map_err(|err| {
            DriverError::Chained(
                format!("Failed to unmap vdisk {vdisk} from host {host}"),
                Box::new(err),
            )
        })?;
        info!("Unmapped vdisk {vdisk} from host {host}");
        Ok(())
    }

    pub fn system_info(&self) -> DriverResult<SystemInfo> {
        let out = self.svcinfo("lssystem", &[], None).map_err(|err| {
            DriverError::Chained("Failed to query system".to_string(), Box::new(err))
        })?;
        SystemInfo::from_attributes(&Attributes::parse(&out.stdout))
    }

    pub fn nodes(&self) -> DriverResult<Vec<NodeSummary>> {
        self.listing("lsnode", None)
    }

    pub fn node_detail(&self, id: &str) -> DriverResult<NodeDetail> {
        self.detail("lsnode", &[], id)
    }

    pub fn port_ips(&self) -> DriverResult<Vec<PortIp>> {
        self.listing("lsportip", None)
    }
}

/// Check that a create command reported success and extract the new id.
fn created_id(out: &CliOutput, what: &str) -> DriverResult<u32> {
    if !out.stdout.contains(SUCCESSFULLY_CREATED) {
        return Err(DriverError::BackendApi(format!(
            "{what} did not report success; stdout: {}; stderr: {}",
            out.stdout.trim(),
            out.stderr.trim()
        )));
    }
    CREATED_ID
        .captures(&out.stdout)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .ok_or_else(|| {
            DriverError::BackendApi(format!(
                "{what} reported success without an object id: {}",
                out.stdout.trim()
            ))
        })
}

fn expect_empty(out: &CliOutput, what: &str) -> DriverResult<()> {
    if out.stdout.trim().is_empty() {
        Ok(())
    } else {
        Err(DriverError::BackendApi(format!(
            "{what} returned unexpected output: {}",
            out.stdout.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;

    /// Replays canned responses and records the commands it was given.
    #[derive(Debug, Default)]
    struct Replay {
        responses: Mutex<Vec<DriverResult<CliOutput>>>,
        seen: Mutex<Vec<String>>,
    }

    impl Replay {
        fn new(responses: Vec<DriverResult<CliOutput>>) -> Replay {
            Replay {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl CliExecutor for Replay {
        fn execute(&self, args: &[String]) -> DriverResult<CliOutput> {
            self.seen.lock().unwrap().push(args.join(" "));
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(CliOutput::default()))
        }
    }

    fn stdout(s: &str) -> DriverResult<CliOutput> {
        Ok(CliOutput {
            stdout: s.to_string(),
            stderr: String::new(),
        })
    }

    fn failure(stderr: &str) -> DriverResult<CliOutput> {
        Err(DriverError::CommandFailure {
            cmd: "svc".to_string(),
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }

    #[test]
    fn create_vdisk_parses_id() {
        let array = Array::new(
            Box::new(Replay::new(vec![stdout(
                "Virtual Disk, id [12], successfully created\n",
            )])),
            "mdiskgrp0",
        );
        assert_eq!(array.create_vdisk("vol1", 10, SizeUnit::Gb).unwrap(), 12);
    }

    #[test]
    fn create_vdisk_without_success_marker() {
        let array = Array::new(
            Box::new(Replay::new(vec![stdout("something else\n")])),
            "mdiskgrp0",
        );
        assert_matches!(
            array.create_vdisk("vol1", 10, SizeUnit::Gb),
            Err(DriverError::BackendApi(_))
        );
    }

    #[test]
    fn missing_vdisk_is_none() {
        let array = Array::new(
            Box::new(Replay::new(vec![failure(
                "CMMVC5753E The specified object does not exist or is not a suitable candidate.",
            )])),
            "mdiskgrp0",
        );
        assert_eq!(array.vdisk_attributes("nope").unwrap(), None);
    }

    #[test]
    fn other_query_failures_propagate() {
        let array = Array::new(
            Box::new(Replay::new(vec![failure("CMMVC5786E The action failed because the cluster is not in a stable state.")])),
            "mdiskgrp0",
        );
        assert_matches!(array.vdisk_attributes("vol1"), Err(DriverError::Chained(_, _)));
    }

    #[test]
    fn command_shapes() {
        let replay = Replay::new(vec![
            stdout("Host, id [0], successfully created\n"),
            stdout("Virtual Disk to Host map, id [1], successfully created\n"),
        ]);
        let array = Array::new(Box::new(replay), "pool");
        let wwpns = vec!["AA".to_string(), "BB".to_string()];
        array.create_host("h1", HostPorts::Wwpns(&wwpns)).unwrap();
        array.create_mapping("h1", "vol1", 1, true).unwrap();
        let _ = array.host_mappings("h1");

        let seen = format!("{array:?}");
        assert!(seen.contains("svctask mkhost -force -hbawwpn AA:BB -name h1"));
        assert!(seen.contains("svctask mkvdiskhostmap -force -host h1 -scsi 1 vol1"));
        assert!(seen.contains("svcinfo lshostvdiskmap -delim ! h1"));
    }
}
