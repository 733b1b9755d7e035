// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// An in-memory array answering the svctask/svcinfo commands the driver
// issues, in the array's own output formats and with its error codes.
// Vdisks are backed by sparse files so that data copies can be checked.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::Write as _,
    fs::{self, File},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use itertools::Itertools;
use tempfile::TempDir;

use crate::{
    driver::{
        flashsystem::{CliExecutor, CliOutput},
        types::Connector,
    },
    flashsys::errors::{DriverError, DriverResult},
};

const NOT_EXIST_TASK: &str =
    "CMMVC5753E The specified object does not exist or is not a suitable candidate.";
const NOT_EXIST_INFO: &str =
    "CMMVC5754E The specified object does not exist, or the name supplied does not meet the naming rules.";
const ALREADY_EXISTS: &str = "CMMVC6035E The action failed as the object already exists.";
const NOT_ENOUGH_EXTENTS: &str =
    "CMMVC5860E The action failed because there were not enough extents in the managed disk group.";
const VDISK_MAPPED: &str = "CMMVC5840E The virtual disk (VDisk) was not deleted because it is mapped to a host or because it is part of a FlashCopy or Remote Copy mapping, or is involved in an image mode migrate.";
const HOST_HAS_MAPPINGS: &str =
    "CMMVC5871E The action failed because one or more of the configured port names is in a mapping.";
const ALREADY_MAPPED_TO_HOST: &str = "CMMVC5878E The virtual disk (VDisk)-to-host mapping was not created because this VDisk is already mapped to this host.";
const SCSI_ID_IN_USE: &str = "CMMVC5879E The virtual disk-to-host mapping was not created because a VDisk is already mapped to this host with this SCSI LUN.";
const MAPPED_TO_OTHER_HOST: &str = "CMMVC6071E The VDisk-to-host mapping was not created because the VDisk is already mapped to a host.";
const ENTITY_MISSING: &str =
    "CMMVC5842E The action failed because an entity that was specified in the command does not exist.";
const BAD_ARGUMENT: &str = "CMMVC5707E Required parameters are missing.";
const UNSUPPORTED: &str = "CMMVC7205E The command failed because it is not supported.";

/// Flags that take no value.
const SWITCHES: [&str; 2] = ["-force", "-bytes"];

const SYSTEM_NAME: &str = "flashsystem1";
const SYSTEM_ID: &str = "000002006AC03A42";
const DEFAULT_POOL_CAPACITY: u64 = 10 << 40;

type SimResult = Result<String, String>;

fn format_capacity(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2}{}", UNITS[unit])
}

fn unit_bytes(unit: &str) -> Option<u64> {
    match unit.to_ascii_lowercase().as_str() {
        "b" => Some(1),
        "kb" => Some(1 << 10),
        "mb" => Some(1 << 20),
        "gb" => Some(1 << 30),
        "tb" => Some(1 << 40),
        _ => None,
    }
}

/// One parsed command line.
#[derive(Debug, Default)]
struct Invocation {
    cmd: String,
    flags: HashMap<String, String>,
    switches: HashSet<String>,
    object: Option<String>,
}

impl Invocation {
    fn parse(argv: &[String]) -> Result<Invocation, String> {
        let mut iter = argv.iter();
        match iter.next().map(String::as_str) {
            Some("svctask" | "svcinfo") => (),
            _ => return Err(UNSUPPORTED.to_string()),
        }
        let mut inv = Invocation {
            cmd: iter.next().ok_or_else(|| BAD_ARGUMENT.to_string())?.clone(),
            ..Default::default()
        };
        while let Some(arg) = iter.next() {
            if SWITCHES.contains(&arg.as_str()) {
                inv.switches.insert(arg.trim_start_matches('-').to_string());
            } else if let Some(flag) = arg.strip_prefix('-') {
                let value = iter.next().ok_or_else(|| BAD_ARGUMENT.to_string())?;
                inv.flags.insert(flag.to_string(), value.clone());
            } else {
                inv.object = Some(arg.clone());
            }
        }
        Ok(inv)
    }

    fn flag(&self, name: &str) -> Result<&str, String> {
        self.flags
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| BAD_ARGUMENT.to_string())
    }

    fn switch(&self, name: &str) -> bool {
        self.switches.contains(name)
    }

    fn object(&self) -> Result<&str, String> {
        self.object.as_deref().ok_or_else(|| BAD_ARGUMENT.to_string())
    }

    fn delim(&self) -> &str {
        self.flags.get("delim").map(String::as_str).unwrap_or("!")
    }
}

fn detailed(delim: &str, pairs: &[(&str, String)]) -> String {
    pairs.iter().fold(String::new(), |mut out, (name, value)| {
        let _ = writeln!(out, "{name}{delim}{value}");
        out
    })
}

fn table(delim: &str, header: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let mut out = header.join(delim);
    out.push('\n');
    for row in rows {
        out.push_str(&row.join(delim));
        out.push('\n');
    }
    out
}

#[derive(Clone, Debug)]
struct SimVdisk {
    id: u32,
    pool: String,
    capacity: u64,
    backing: PathBuf,
}

impl SimVdisk {
    fn uid(&self) -> String {
        format!("60050768028{:021X}", self.id)
    }
}

#[derive(Clone, Debug, Default)]
struct SimHost {
    id: u32,
    wwpns: Vec<String>,
    iscsi_names: Vec<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct SimMapping {
    host: String,
    vdisk: String,
    scsi_id: u32,
}

#[derive(Clone, Debug)]
struct SimNode {
    id: String,
    name: String,
    status: String,
    iscsi_name: String,
    /// (WWPN, status) per FC port.
    ports: Vec<(String, String)>,
    /// (port id, address) per Ethernet port.
    ips: Vec<(u32, Option<String>)>,
}

#[derive(Debug)]
struct SimState {
    next_vdisk_id: u32,
    next_host_id: u32,
    /// Pool name to capacity in bytes.
    pools: BTreeMap<String, u64>,
    vdisks: BTreeMap<String, SimVdisk>,
    hosts: BTreeMap<String, SimHost>,
    mappings: Vec<SimMapping>,
    nodes: Vec<SimNode>,
    /// Command prefix and the stderr to fail it with, used once each.
    faults: Vec<(String, String)>,
    history: Vec<String>,
}

impl SimState {
    fn new(pool: &str) -> SimState {
        let node = |id: &str, wwpns: [&str; 2], ip: &str| SimNode {
            id: id.to_string(),
            name: format!("node{id}"),
            status: "online".to_string(),
            iscsi_name: format!("iqn.1986-03.com.ibm:2145.{SYSTEM_NAME}.node{id}"),
            ports: vec![
                (wwpns[0].to_string(), "active".to_string()),
                (wwpns[1].to_string(), "inactive".to_string()),
            ],
            ips: vec![(1, Some(ip.to_string())), (2, None)],
        };
        SimState {
            next_vdisk_id: 0,
            next_host_id: 0,
            pools: [(pool.to_string(), DEFAULT_POOL_CAPACITY)].into_iter().collect(),
            vdisks: BTreeMap::new(),
            hosts: BTreeMap::new(),
            mappings: Vec::new(),
            nodes: vec![
                node("1", ["500507680210DE01", "500507680210DE02"], "192.168.0.10"),
                node("2", ["500507680220DE01", "500507680220DE02"], "192.168.0.20"),
            ],
            faults: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Look a vdisk up by name or by id.
    fn vdisk_name(&self, object: &str) -> Option<String> {
        if self.vdisks.contains_key(object) {
            return Some(object.to_string());
        }
        self.vdisks
            .iter()
            .find(|(_, v)| v.id.to_string() == object)
            .map(|(name, _)| name.clone())
    }

    fn host_name(&self, object: &str) -> Option<String> {
        if self.hosts.contains_key(object) {
            return Some(object.to_string());
        }
        self.hosts
            .iter()
            .find(|(_, h)| h.id.to_string() == object)
            .map(|(name, _)| name.clone())
    }

    fn used_in_pool(&self, pool: &str) -> u64 {
        self.vdisks
            .values()
            .filter(|v| v.pool == pool)
            .map(|v| v.capacity)
            .sum()
    }

    fn mkvdisk(&mut self, inv: &Invocation, dir: &TempDir) -> SimResult {
        let name = inv.flag("name")?.to_string();
        let pool = inv.flag("mdiskgrp")?.to_string();
        let size = inv
            .flag("size")?
            .parse::<u64>()
            .map_err(|_| BAD_ARGUMENT.to_string())?;
        let unit = unit_bytes(inv.flags.get("unit").map(String::as_str).unwrap_or("mb"))
            .ok_or_else(|| BAD_ARGUMENT.to_string())?;
        let capacity = size.checked_mul(unit).ok_or_else(|| BAD_ARGUMENT.to_string())?;

        if self.vdisks.contains_key(&name) {
            return Err(ALREADY_EXISTS.to_string());
        }
        let pool_capacity = *self
            .pools
            .get(&pool)
            .ok_or_else(|| NOT_EXIST_TASK.to_string())?;
        if self.used_in_pool(&pool) + capacity > pool_capacity {
            return Err(NOT_ENOUGH_EXTENTS.to_string());
        }

        let id = self.next_vdisk_id;
        let backing = dir.path().join(format!("vdisk{id}"));
        File::create(&backing)
            .and_then(|f| f.set_len(capacity))
            .map_err(|err| format!("CMMVC5711E Backing file could not be created: {err}"))?;
        self.next_vdisk_id += 1;
        self.vdisks.insert(
            name,
            SimVdisk {
                id,
                pool,
                capacity,
                backing,
            },
        );
        Ok(format!("Virtual Disk, id [{id}], successfully created\n"))
    }

    fn rmvdisk(&mut self, inv: &Invocation) -> SimResult {
        let name = self
            .vdisk_name(inv.object()?)
            .ok_or_else(|| NOT_EXIST_TASK.to_string())?;
        let mapped = self.mappings.iter().any(|m| m.vdisk == name);
        if mapped && !inv.switch("force") {
            return Err(VDISK_MAPPED.to_string());
        }
        self.mappings.retain(|m| m.vdisk != name);
        if let Some(vdisk) = self.vdisks.remove(&name) {
            let _ = fs::remove_file(&vdisk.backing);
        }
        Ok(String::new())
    }

    fn chvdisk(&mut self, inv: &Invocation) -> SimResult {
        let new = inv.flag("name")?.to_string();
        let old = self
            .vdisk_name(inv.object()?)
            .ok_or_else(|| NOT_EXIST_TASK.to_string())?;
        if old == new {
            return Ok(String::new());
        }
        if self.vdisks.contains_key(&new) {
            return Err(ALREADY_EXISTS.to_string());
        }
        if let Some(vdisk) = self.vdisks.remove(&old) {
            self.vdisks.insert(new.clone(), vdisk);
        }
        for mapping in self.mappings.iter_mut().filter(|m| m.vdisk == old) {
            mapping.vdisk = new.clone();
        }
        Ok(String::new())
    }

    fn expandvdisksize(&mut self, inv: &Invocation) -> SimResult {
        let name = self
            .vdisk_name(inv.object()?)
            .ok_or_else(|| NOT_EXIST_TASK.to_string())?;
        let size = inv
            .flag("size")?
            .parse::<u64>()
            .map_err(|_| BAD_ARGUMENT.to_string())?;
        let unit = unit_bytes(inv.flags.get("unit").map(String::as_str).unwrap_or("mb"))
            .ok_or_else(|| BAD_ARGUMENT.to_string())?;
        let amount = size.checked_mul(unit).ok_or_else(|| BAD_ARGUMENT.to_string())?;

        let pool = self.vdisks[&name].pool.clone();
        let pool_capacity = self.pools.get(&pool).copied().unwrap_or_default();
        if self.used_in_pool(&pool) + amount > pool_capacity {
            return Err(NOT_ENOUGH_EXTENTS.to_string());
        }
        if let Some(vdisk) = self.vdisks.get_mut(&name) {
            vdisk.capacity += amount;
            File::options()
                .write(true)
                .open(&vdisk.backing)
                .and_then(|f| f.set_len(vdisk.capacity))
                .map_err(|err| format!("CMMVC5711E Backing file could not be grown: {err}"))?;
        }
        Ok(String::new())
    }

    fn lsvdisk(&self, inv: &Invocation) -> SimResult {
        let delim = inv.delim();
        let capacity = |bytes: u64| {
            if inv.switch("bytes") {
                bytes.to_string()
            } else {
                format_capacity(bytes)
            }
        };
        match inv.object {
            Some(ref object) => {
                let name = self
                    .vdisk_name(object)
                    .ok_or_else(|| NOT_EXIST_INFO.to_string())?;
                let vdisk = &self.vdisks[&name];
                Ok(detailed(
                    delim,
                    &[
                        ("id", vdisk.id.to_string()),
                        ("name", name.clone()),
                        ("IO_group_id", "0".to_string()),
                        ("IO_group_name", "io_grp0".to_string()),
                        ("status", "online".to_string()),
                        ("mdisk_grp_id", "0".to_string()),
                        ("mdisk_grp_name", vdisk.pool.clone()),
                        ("capacity", capacity(vdisk.capacity)),
                        ("type", "striped".to_string()),
                        ("vdisk_UID", vdisk.uid()),
                    ],
                ))
            }
            None => {
                let rows = self
                    .vdisks
                    .iter()
                    .map(|(name, v)| {
                        vec![
                            v.id.to_string(),
                            name.clone(),
                            "0".to_string(),
                            "online".to_string(),
                            v.pool.clone(),
                            capacity(v.capacity),
                            v.uid(),
                        ]
                    })
                    .collect::<Vec<_>>();
                Ok(table(
                    delim,
                    &[
                        "id",
                        "name",
                        "IO_group_id",
                        "status",
                        "mdisk_grp_name",
                        "capacity",
                        "vdisk_UID",
                    ],
                    &rows,
                ))
            }
        }
    }

    fn mkhost(&mut self, inv: &Invocation) -> SimResult {
        let name = inv.flag("name")?.to_string();
        if self.hosts.contains_key(&name) {
            return Err(ALREADY_EXISTS.to_string());
        }
        let mut host = SimHost {
            id: self.next_host_id,
            ..Default::default()
        };
        if let Some(wwpns) = inv.flags.get("hbawwpn") {
            host.wwpns = wwpns.split(':').map(|w| w.to_uppercase()).collect();
        } else if let Some(iqn) = inv.flags.get("iscsiname") {
            host.iscsi_names = vec![iqn.clone()];
        } else {
            return Err(BAD_ARGUMENT.to_string());
        }
        let id = host.id;
        self.next_host_id += 1;
        self.hosts.insert(name, host);
        Ok(format!("Host, id [{id}], successfully created\n"))
    }

    fn rmhost(&mut self, inv: &Invocation) -> SimResult {
        let name = self
            .host_name(inv.object()?)
            .ok_or_else(|| NOT_EXIST_TASK.to_string())?;
        if self.mappings.iter().any(|m| m.host == name) && !inv.switch("force") {
            return Err(HOST_HAS_MAPPINGS.to_string());
        }
        self.mappings.retain(|m| m.host != name);
        self.hosts.remove(&name);
        Ok(String::new())
    }

    fn lshost(&self, inv: &Invocation) -> SimResult {
        let delim = inv.delim();
        match inv.object {
            Some(ref object) => {
                let name = self
                    .host_name(object)
                    .ok_or_else(|| NOT_EXIST_INFO.to_string())?;
                let host = &self.hosts[&name];
                let mut pairs = vec![
                    ("id", host.id.to_string()),
                    ("name", name.clone()),
                    (
                        "port_count",
                        (host.wwpns.len() + host.iscsi_names.len()).to_string(),
                    ),
                    ("type", "generic".to_string()),
                    ("iogrp_count", "4".to_string()),
                    ("status", "online".to_string()),
                ];
                for wwpn in &host.wwpns {
                    pairs.push(("WWPN", wwpn.clone()));
                    pairs.push(("node_logged_in_count", "1".to_string()));
                    pairs.push(("state", "active".to_string()));
                }
                for iqn in &host.iscsi_names {
                    pairs.push(("iscsi_name", iqn.clone()));
                    pairs.push(("node_logged_in_count", "1".to_string()));
                    pairs.push(("state", "active".to_string()));
                }
                Ok(detailed(delim, &pairs))
            }
            None => {
                let rows = self
                    .hosts
                    .iter()
                    .map(|(name, h)| {
                        vec![
                            h.id.to_string(),
                            name.clone(),
                            (h.wwpns.len() + h.iscsi_names.len()).to_string(),
                            "4".to_string(),
                            "online".to_string(),
                        ]
                    })
                    .collect::<Vec<_>>();
                Ok(table(
                    delim,
                    &["id", "name", "port_count", "iogrp_count", "status"],
                    &rows,
                ))
            }
        }
    }

    fn mkvdiskhostmap(&mut self, inv: &Invocation) -> SimResult {
        let host = self
            .host_name(inv.flag("host")?)
            .ok_or_else(|| NOT_EXIST_TASK.to_string())?;
        let vdisk = self
            .vdisk_name(inv.object()?)
            .ok_or_else(|| NOT_EXIST_TASK.to_string())?;
        let scsi_id = inv
            .flag("scsi")?
            .parse::<u32>()
            .map_err(|_| BAD_ARGUMENT.to_string())?;

        if self
            .mappings
            .iter()
            .any(|m| m.host == host && m.vdisk == vdisk)
        {
            return Err(ALREADY_MAPPED_TO_HOST.to_string());
        }
        if self
            .mappings
            .iter()
            .any(|m| m.host == host && m.scsi_id == scsi_id)
        {
            return Err(SCSI_ID_IN_USE.to_string());
        }
        if self.mappings.iter().any(|m| m.vdisk == vdisk) && !inv.switch("force") {
            return Err(MAPPED_TO_OTHER_HOST.to_string());
        }

        self.mappings.push(SimMapping {
            host,
            vdisk,
            scsi_id,
        });
        Ok(format!(
            "Virtual Disk to Host map, id [{scsi_id}], successfully created\n"
        ))
    }

    fn rmvdiskhostmap(&mut self, inv: &Invocation) -> SimResult {
        let host = self
            .host_name(inv.flag("host")?)
            .ok_or_else(|| NOT_EXIST_TASK.to_string())?;
        let vdisk = self
            .vdisk_name(inv.object()?)
            .ok_or_else(|| NOT_EXIST_TASK.to_string())?;
        let before = self.mappings.len();
        self.mappings
            .retain(|m| !(m.host == host && m.vdisk == vdisk));
        if self.mappings.len() == before {
            return Err(ENTITY_MISSING.to_string());
        }
        Ok(String::new())
    }

    fn lshostvdiskmap(&self, inv: &Invocation) -> SimResult {
        let host_name = self
            .host_name(inv.object()?)
            .ok_or_else(|| NOT_EXIST_INFO.to_string())?;
        let host = &self.hosts[&host_name];
        let rows = self
            .mappings
            .iter()
            .filter(|m| m.host == host_name)
            .sorted_by_key(|m| m.scsi_id)
            .filter_map(|m| {
                self.vdisks.get(&m.vdisk).map(|v| {
                    vec![
                        host.id.to_string(),
                        host_name.clone(),
                        m.scsi_id.to_string(),
                        v.id.to_string(),
                        m.vdisk.clone(),
                        v.uid(),
                    ]
                })
            })
            .collect::<Vec<_>>();
        Ok(table(
            inv.delim(),
            &["id", "name", "SCSI_id", "vdisk_id", "vdisk_name", "vdisk_UID"],
            &rows,
        ))
    }

    fn lsvdiskhostmap(&self, inv: &Invocation) -> SimResult {
        let vdisk_name = self
            .vdisk_name(inv.object()?)
            .ok_or_else(|| NOT_EXIST_INFO.to_string())?;
        let vdisk = &self.vdisks[&vdisk_name];
        let rows = self
            .mappings
            .iter()
            .filter(|m| m.vdisk == vdisk_name)
            .filter_map(|m| {
                self.hosts.get(&m.host).map(|h| {
                    vec![
                        vdisk.id.to_string(),
                        vdisk_name.clone(),
                        m.scsi_id.to_string(),
                        h.id.to_string(),
                        m.host.clone(),
                        vdisk.uid(),
                    ]
                })
            })
            .collect::<Vec<_>>();
        Ok(table(
            inv.delim(),
            &["id", "name", "SCSI_id", "host_id", "host_name", "vdisk_UID"],
            &rows,
        ))
    }

    fn lssystem(&self, inv: &Invocation) -> SimResult {
        let total = self.pools.values().sum::<u64>();
        let used = self.vdisks.values().map(|v| v.capacity).sum::<u64>();
        Ok(detailed(
            inv.delim(),
            &[
                ("id", SYSTEM_ID.to_string()),
                ("name", SYSTEM_NAME.to_string()),
                ("location", "local".to_string()),
                ("total_mdisk_capacity", format_capacity(total)),
                ("total_used_capacity", format_capacity(used)),
                ("total_free_space", format_capacity(total - used)),
                ("code_level", "7.8.1.0 (build 135.9.1703301000)".to_string()),
            ],
        ))
    }

    fn lsnode(&self, inv: &Invocation) -> SimResult {
        let delim = inv.delim();
        match inv.object {
            Some(ref object) => {
                let node = self
                    .nodes
                    .iter()
                    .find(|n| n.id == *object || n.name == *object)
                    .ok_or_else(|| NOT_EXIST_INFO.to_string())?;
                let mut pairs = vec![
                    ("id", node.id.clone()),
                    ("name", node.name.clone()),
                    ("status", node.status.clone()),
                    ("IO_group_id", "0".to_string()),
                    ("iscsi_name", node.iscsi_name.clone()),
                ];
                for (wwpn, status) in &node.ports {
                    pairs.push(("port_id", wwpn.clone()));
                    pairs.push(("port_status", status.clone()));
                    pairs.push(("port_speed", "8Gb".to_string()));
                }
                Ok(detailed(delim, &pairs))
            }
            None => {
                let rows = self
                    .nodes
                    .iter()
                    .map(|n| {
                        vec![
                            n.id.clone(),
                            n.name.clone(),
                            n.status.clone(),
                            "0".to_string(),
                            "io_grp0".to_string(),
                            n.iscsi_name.clone(),
                        ]
                    })
                    .collect::<Vec<_>>();
                Ok(table(
                    delim,
                    &[
                        "id",
                        "name",
                        "status",
                        "IO_group_id",
                        "IO_group_name",
                        "iscsi_name",
                    ],
                    &rows,
                ))
            }
        }
    }

    fn lsportip(&self, inv: &Invocation) -> SimResult {
        let rows = self
            .nodes
            .iter()
            .flat_map(|n| {
                n.ips.iter().map(move |(port, ip)| {
                    vec![
                        port.to_string(),
                        n.id.clone(),
                        n.name.clone(),
                        ip.clone().unwrap_or_default(),
                        if ip.is_some() {
                            "255.255.255.0".to_string()
                        } else {
                            String::new()
                        },
                        "configured".to_string(),
                    ]
                })
            })
            .collect::<Vec<_>>();
        Ok(table(
            inv.delim(),
            &["id", "node_id", "node_name", "IP_address", "mask", "state"],
            &rows,
        ))
    }

    fn dispatch(&mut self, inv: &Invocation, dir: &TempDir) -> SimResult {
        match inv.cmd.as_str() {
            "mkvdisk" => self.mkvdisk(inv, dir),
            "rmvdisk" => self.rmvdisk(inv),
            "chvdisk" => self.chvdisk(inv),
            "expandvdisksize" => self.expandvdisksize(inv),
            "lsvdisk" => self.lsvdisk(inv),
            "mkhost" => self.mkhost(inv),
            "rmhost" => self.rmhost(inv),
            "lshost" => self.lshost(inv),
            "mkvdiskhostmap" => self.mkvdiskhostmap(inv),
            "rmvdiskhostmap" => self.rmvdiskhostmap(inv),
            "lshostvdiskmap" => self.lshostvdiskmap(inv),
            "lsvdiskhostmap" => self.lsvdiskhostmap(inv),
            "lssystem" => self.lssystem(inv),
            "lsnode" => self.lsnode(inv),
            "lsportip" => self.lsportip(inv),
            _ => Err(UNSUPPORTED.to_string()),
        }
    }

    /// The backing file of the vdisk mapped under the LUN to the host whose
    /// ports match the connector.
    fn lun_backing(&self, connector: &Connector, lun: u32) -> Option<PathBuf> {
        let host = self.hosts.iter().find_map(|(name, h)| {
            let fc = h
                .wwpns
                .iter()
                .any(|w| connector.wwpns.iter().any(|c| c.eq_ignore_ascii_case(w)));
            let iscsi = connector
                .initiator
                .as_ref()
                .is_some_and(|i| h.iscsi_names.contains(i));
            (fc || iscsi).then_some(name)
        })?;
        let mapping = self
            .mappings
            .iter()
            .find(|m| m.host == *host && m.scsi_id == lun)?;
        self.vdisks.get(&mapping.vdisk).map(|v| v.backing.clone())
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<SimState>,
    dir: TempDir,
}

/// A simulated array. Clones share the same array state.
#[derive(Clone, Debug)]
pub struct SimArray {
    inner: Arc<Inner>,
}

impl SimArray {
    /// An array with two online nodes and one pool of the given name.
    pub fn new(pool: &str) -> DriverResult<SimArray> {
        let dir = tempfile::Builder::new().prefix("flashsys-sim").tempdir()?;
        Ok(SimArray {
            inner: Arc::new(Inner {
                state: Mutex::new(SimState::new(pool)),
                dir,
            }),
        })
    }

    fn state(&self) -> DriverResult<std::sync::MutexGuard<'_, SimState>> {
        Ok(self.inner.state.lock()?)
    }

    /// Fail the next command starting with prefix, reporting stderr.
    pub fn fail_next(&self, prefix: &str, stderr: &str) -> DriverResult<()> {
        self.state()?
            .faults
            .push((prefix.to_string(), stderr.to_string()));
        Ok(())
    }

    /// Every command line executed so far.
    pub fn history(&self) -> DriverResult<Vec<String>> {
        Ok(self.state()?.history.clone())
    }

    pub fn vdisk_names(&self) -> DriverResult<Vec<String>> {
        Ok(self.state()?.vdisks.keys().cloned().collect())
    }

    pub fn host_names(&self) -> DriverResult<Vec<String>> {
        Ok(self.state()?.hosts.keys().cloned().collect())
    }

    /// (host, LUN) pairs under which the vdisk is mapped.
    pub fn mappings_of(&self, vdisk: &str) -> DriverResult<Vec<(String, u32)>> {
        Ok(self
            .state()?
            .mappings
            .iter()
            .filter(|m| m.vdisk == vdisk)
            .map(|m| (m.host.clone(), m.scsi_id))
            .collect())
    }

    pub fn backing_file(&self, vdisk: &str) -> DriverResult<Option<PathBuf>> {
        Ok(self.state()?.vdisks.get(vdisk).map(|v| v.backing.clone()))
    }

    /// Run a command as if a user had typed it at the array's shell.
    pub fn run(&self, line: &str) -> DriverResult<CliOutput> {
        let argv = line.split_whitespace().map(str::to_string).collect::<Vec<_>>();
        self.execute(&argv)
    }

    pub fn lun_backing(&self, connector: &Connector, lun: u32) -> DriverResult<Option<PathBuf>> {
        Ok(self.state()?.lun_backing(connector, lun))
    }
}

impl CliExecutor for SimArray {
    fn execute(&self, args: &[String]) -> DriverResult<CliOutput> {
        let cmd_line = args.join(" ");
        let mut state = self.state()?;
        state.history.push(cmd_line.clone());
        trace!("Simulated array received: {cmd_line}");

        let fault = state
            .faults
            .iter()
            .position(|(prefix, _)| cmd_line.starts_with(prefix.as_str()));
        let result = match fault {
            Some(index) => Err(state.faults.remove(index).1),
            None => Invocation::parse(args)
                .and_then(|inv| state.dispatch(&inv, &self.inner.dir)),
        };

        result
            .map(|stdout| CliOutput {
                stdout,
                stderr: String::new(),
            })
            .map_err(|stderr| DriverError::CommandFailure {
                cmd: cmd_line,
                code: Some(1),
                stdout: String::new(),
                stderr: format!("{stderr}\n"),
            })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn stdout(array: &SimArray, line: &str) -> String {
        array.run(line).unwrap().stdout
    }

    #[test]
    fn vdisk_lifecycle() {
        let array = SimArray::new("pool0").unwrap();
        assert_eq!(
            stdout(
                &array,
                "svctask mkvdisk -name v1 -mdiskgrp pool0 -iogrp 0 -size 10 -unit gb"
            ),
            "Virtual Disk, id [0], successfully created\n"
        );
        let detail = stdout(&array, "svcinfo lsvdisk -bytes -delim ! v1");
        assert!(detail.contains("capacity!10737418240\n"));
        assert_eq!(
            fs::metadata(array.backing_file("v1").unwrap().unwrap())
                .unwrap()
                .len(),
            10 << 30
        );

        stdout(&array, "svctask expandvdisksize -size 5 -unit gb v1");
        assert!(stdout(&array, "svcinfo lsvdisk -bytes -delim ! 0").contains("capacity!16106127360\n"));

        assert_eq!(stdout(&array, "svctask rmvdisk v1"), "");
        assert_matches!(
            array.run("svcinfo lsvdisk -bytes -delim ! v1"),
            Err(ref err) if err.has_cli_code("CMMVC5754E")
        );
    }

    #[test]
    fn second_host_mapping_needs_force() {
        let array = SimArray::new("pool0").unwrap();
        array
            .run("svctask mkvdisk -name v1 -mdiskgrp pool0 -iogrp 0 -size 1 -unit gb")
            .unwrap();
        array
            .run("svctask mkhost -force -hbawwpn AA -name h1")
            .unwrap();
        array
            .run("svctask mkhost -force -hbawwpn BB -name h2")
            .unwrap();
        array
            .run("svctask mkvdiskhostmap -host h1 -scsi 1 v1")
            .unwrap();
        assert_matches!(
            array.run("svctask mkvdiskhostmap -host h2 -scsi 1 v1"),
            Err(ref err) if err.has_cli_code("CMMVC6071E")
        );
        array
            .run("svctask mkvdiskhostmap -force -host h2 -scsi 1 v1")
            .unwrap();
        assert_eq!(array.mappings_of("v1").unwrap().len(), 2);
        assert_matches!(
            array.run("svctask rmhost h1"),
            Err(ref err) if err.has_cli_code("CMMVC5871E")
        );
    }

    #[test]
    fn injected_fault_is_used_once() {
        let array = SimArray::new("pool0").unwrap();
        array
            .fail_next("svcinfo lssystem", "CMMVC5786E The action failed because the cluster is not in a stable state.")
            .unwrap();
        assert!(array.run("svcinfo lssystem -delim !").is_err());
        assert!(array.run("svcinfo lssystem -delim !").is_ok());
    }

    #[test]
    fn capacity_strings() {
        assert_eq!(format_capacity(10 << 40), "10.00TB");
        assert_eq!(format_capacity(512 << 20), "512.00MB");
        assert_eq!(format_capacity(0), "0.00B");
    }
}
