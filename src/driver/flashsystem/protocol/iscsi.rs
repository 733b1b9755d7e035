// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use serde_json::{json, Map};

use crate::{
    driver::{
        flashsystem::{
            array::{Array, HostPorts},
            host::new_host_name,
            mapping::Unmapped,
            protocol::{IscsiTarget, ProtocolHooks, TargetPorts},
            records::{HostInfo, NodeSummary},
        },
        types::{ConnectionInfo, Connector, Protocol},
    },
    flashsys::{
        config::FlashSystemConfig,
        errors::{DriverError, DriverResult},
    },
};

const DRIVER_VOLUME_TYPE: &str = "iscsi";

#[derive(Debug)]
pub struct IscsiHooks {
    port_id: u32,
    port: u16,
    ip_override: Option<String>,
}

impl IscsiHooks {
    pub fn new(config: &FlashSystemConfig) -> IscsiHooks {
        IscsiHooks {
            port_id: config.flashsystem_iscsi_portid,
            port: config.iscsi_port,
            ip_override: config
                .iscsi_ip_address
                .clone()
                .filter(|ip| !ip.trim().is_empty()),
        }
    }

    fn initiator(connector: &Connector) -> DriverResult<&str> {
        connector
            .initiator
            .as_deref()
            .filter(|i| !i.is_empty())
            .ok_or_else(|| {
                DriverError::InvalidInput(format!(
                    "Connector of {} has no iSCSI initiator name",
                    connector.host
                ))
            })
    }
}

impl ProtocolHooks for IscsiHooks {
    fn protocol(&self) -> Protocol {
        Protocol::Iscsi
    }

    fn check_params(&self, config: &FlashSystemConfig) -> DriverResult<()> {
        if config.flashsystem_connection_protocol != Protocol::Iscsi {
            return Err(DriverError::InvalidInput(format!(
                "iSCSI hooks used with protocol {}",
                config.flashsystem_connection_protocol
            )));
        }
        if config.iscsi_port == 0 {
            return Err(DriverError::InvalidInput(
                "iscsi_port must not be 0".to_string(),
            ));
        }
        Ok(())
    }

    fn check_connector(&self, connector: &Connector) -> DriverResult<()> {
        Self::initiator(connector).map(|_| ())
    }

    fn create_host(&self, array: &Array, connector: &Connector) -> DriverResult<String> {
        let initiator = Self::initiator(connector)?;
        let name = new_host_name(connector)?;
        array.create_host(&name, HostPorts::IscsiName(initiator))?;
        Ok(name)
    }

    fn host_matches(&self, host: &HostInfo, connector: &Connector) -> bool {
        match connector.initiator {
            Some(ref initiator) => host.iscsi_names.iter().any(|n| n == initiator),
            None => false,
        }
    }

    fn node_setup(&self, array: &Array, nodes: &[NodeSummary]) -> DriverResult<TargetPorts> {
        let port_ips = if self.ip_override.is_some() {
            Vec::new()
        } else {
            array.port_ips()?
        };

        let mut iscsi = Vec::new();
        for node in nodes.iter().filter(|n| n.is_online()) {
            let iqn = match node.iscsi_name {
                Some(ref iqn) => iqn.clone(),
                None => {
                    warn!("Node {} reports no iSCSI name; skipping it", node.name);
                    continue;
                }
            };

            let address = self.ip_override.clone().or_else(|| {
                port_ips
                    .iter()
                    .find(|p| p.node_id == node.id && p.port_id == self.port_id)
                    .and_then(|p| p.ip_address.clone())
            });
            match address {
                Some(address) => iscsi.push(IscsiTarget {
                    node_id: node.id.clone(),
                    iqn,
                    portal: format!("{address}:{}", self.port),
                }),
                None => warn!(
                    "Node {} has no IP address configured on iSCSI port {}",
                    node.name, self.port_id
                ),
            }
        }
        debug!(
            "iSCSI targets: {}",
            iscsi
                .iter()
                .map(|t| format!("{} at {}", t.iqn, t.portal))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(TargetPorts {
            wwpns: Vec::new(),
            iscsi,
        })
    }

    fn map_properties(
        &self,
        targets: &TargetPorts,
        connector: &Connector,
        lun: u32,
        volume_id: &str,
    ) -> DriverResult<ConnectionInfo> {
        let first = targets.iscsi.first().ok_or_else(|| {
            DriverError::BackendApi("No iSCSI targets are known for the array".to_string())
        })?;

        let mut data = Map::new();
        data.insert("target_discovered".to_string(), json!(false));
        data.insert("target_iqn".to_string(), json!(first.iqn));
        data.insert("target_portal".to_string(), json!(first.portal));
        data.insert("target_lun".to_string(), json!(lun));
        data.insert("volume_id".to_string(), json!(volume_id));
        if connector.multipath {
            data.insert(
                "target_iqns".to_string(),
                json!(targets.iscsi.iter().map(|t| &t.iqn).collect::<Vec<_>>()),
            );
            data.insert(
                "target_portals".to_string(),
                json!(targets.iscsi.iter().map(|t| &t.portal).collect::<Vec<_>>()),
            );
            data.insert(
                "target_luns".to_string(),
                json!(vec![lun; targets.iscsi.len()]),
            );
        }
        Ok(ConnectionInfo {
            driver_volume_type: DRIVER_VOLUME_TYPE,
            data,
        })
    }

    fn unmap_properties(
        &self,
        _targets: &TargetPorts,
        _connector: &Connector,
        _unmapped: &Unmapped,
    ) -> Option<ConnectionInfo> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hooks() -> IscsiHooks {
        let mut config = FlashSystemConfig::new("10.0.0.5", "superuser");
        config.flashsystem_connection_protocol = Protocol::Iscsi;
        IscsiHooks::new(&config)
    }

    fn targets() -> TargetPorts {
        TargetPorts {
            wwpns: Vec::new(),
            iscsi: vec![
                IscsiTarget {
                    node_id: "1".to_string(),
                    iqn: "iqn.1986-03.com.ibm:2145.cluster.node1".to_string(),
                    portal: "192.168.0.10:3260".to_string(),
                },
                IscsiTarget {
                    node_id: "2".to_string(),
                    iqn: "iqn.1986-03.com.ibm:2145.cluster.node2".to_string(),
                    portal: "192.168.0.20:3260".to_string(),
                },
            ],
        }
    }

    fn connector(multipath: bool) -> Connector {
        Connector {
            host: "compute-1".to_string(),
            initiator: Some("iqn.1994-05.com.redhat:compute1".to_string()),
            multipath,
            ..Default::default()
        }
    }

    #[test]
    fn single_path_properties() {
        let info = hooks()
            .map_properties(&targets(), &connector(false), 2, "vol")
            .unwrap();
        assert_eq!(info.driver_volume_type, "iscsi");
        assert_eq!(info.data["target_portal"], json!("192.168.0.10:3260"));
        assert_eq!(info.target_lun(), Some(2));
        assert!(!info.data.contains_key("target_portals"));
    }

    #[test]
    fn multipath_lists_every_target() {
        let info = hooks()
            .map_properties(&targets(), &connector(true), 2, "vol")
            .unwrap();
        assert_eq!(info.data["target_luns"], json!([2, 2]));
        assert_eq!(
            info.data["target_portals"],
            json!(["192.168.0.10:3260", "192.168.0.20:3260"])
        );
    }

    #[test]
    fn initiator_required() {
        let mut c = connector(false);
        c.initiator = None;
        assert!(hooks().check_connector(&c).is_err());
        let host = HostInfo {
            id: 0,
            name: "h".to_string(),
            wwpns: Vec::new(),
            iscsi_names: vec!["iqn.1994-05.com.redhat:compute1".to_string()],
        };
        assert!(!hooks().host_matches(&host, &c));
        assert!(hooks().host_matches(&host, &connector(false)));
    }
}
