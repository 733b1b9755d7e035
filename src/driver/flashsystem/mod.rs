// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod array;
mod cmd;
mod consts;
mod copy;
mod driver;
mod host;
mod mapping;
mod parse;
mod protocol;
mod records;
mod stats;

pub use self::{
    array::{Array, HostPorts, SizeUnit},
    cmd::{args, find_binary, CliExecutor, CliOutput, SshExecutor},
    consts::{DRIVER_VERSION, VENDOR_NAME},
    copy::{CopyGuard, CopyLock},
    driver::FlashSystemDriver,
    host::{connector_to_hostname_prefix, new_host_name},
    mapping::{next_free_lun, HostMapper, Unmapped},
    parse::{AttrValue, Attributes, Fields, Table},
    protocol::{hooks_for, FcHooks, IscsiHooks, IscsiTarget, ProtocolHooks, TargetPorts},
    records::{
        CliRecord, HostInfo, HostSummary, HostVdiskMap, NodeDetail, NodeSummary, PortIp,
        SystemInfo, VdiskHostMap, VdiskInfo,
    },
    stats::{build_stats, capacity_to_gib},
};
