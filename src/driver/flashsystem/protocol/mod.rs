// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Protocol specific pieces of the driver. The common driver delegates host
// creation, host lookup, target discovery and connection properties to an
// implementation of ProtocolHooks chosen from the configuration.

use std::fmt::Debug;

use crate::{
    driver::{
        flashsystem::{
            array::Array,
            mapping::Unmapped,
            records::{HostInfo, HostSummary, NodeSummary},
        },
        types::{ConnectionInfo, Connector, Protocol},
    },
    flashsys::{config::FlashSystemConfig, errors::DriverResult},
};

mod fc;
mod iscsi;

pub use self::{fc::FcHooks, iscsi::IscsiHooks};

/// An iSCSI target reachable on one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IscsiTarget {
    pub node_id: String,
    pub iqn: String,
    /// "address:port"
    pub portal: String,
}

/// The array side endpoints hosts connect to, collected during setup.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TargetPorts {
    pub wwpns: Vec<String>,
    pub iscsi: Vec<IscsiTarget>,
}

impl TargetPorts {
    pub fn is_empty(&self) -> bool {
        self.wwpns.is_empty() && self.iscsi.is_empty()
    }
}

pub trait ProtocolHooks: Debug + Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Validate the protocol specific configuration options.
    fn check_params(&self, config: &FlashSystemConfig) -> DriverResult<()>;

    /// Validate that the connector carries what this protocol needs.
    fn check_connector(&self, connector: &Connector) -> DriverResult<()>;

    /// Create a host object for the connector and return its name.
    fn create_host(&self, array: &Array, connector: &Connector) -> DriverResult<String>;

    /// Whether the host's ports identify it as the connector's host.
    fn host_matches(&self, host: &HostInfo, connector: &Connector) -> bool;

    /// Examine every host's ports until one matches the connector.
    fn find_host_exhaustive(
        &self,
        array: &Array,
        connector: &Connector,
        hosts: &[HostSummary],
    ) -> DriverResult<Option<String>> {
        for host in hosts {
            let detail = array.host_detail(&host.name)?;
            if self.host_matches(&detail, connector) {
                return Ok(Some(detail.name));
            }
        }
        Ok(None)
    }

    /// Collect the target ports of the online nodes.
    fn node_setup(&self, array: &Array, nodes: &[NodeSummary]) -> DriverResult<TargetPorts>;

    /// Properties a host needs to attach the LUN.
    fn map_properties(
        &self,
        targets: &TargetPorts,
        connector: &Connector,
        lun: u32,
        volume_id: &str,
    ) -> DriverResult<ConnectionInfo>;

    /// Properties to return once a mapping is removed, if the protocol
    /// has anything to report.
    fn unmap_properties(
        &self,
        targets: &TargetPorts,
        connector: &Connector,
        unmapped: &Unmapped,
    ) -> Option<ConnectionInfo>;
}

/// The hooks for the configured connection protocol.
pub fn hooks_for(config: &FlashSystemConfig) -> Box<dyn ProtocolHooks> {
    match config.flashsystem_connection_protocol {
        Protocol::Fc => Box::new(FcHooks),
        Protocol::Iscsi => Box::new(IscsiHooks::new(config)),
    }
}
