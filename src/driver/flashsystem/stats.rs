// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::{
    driver::{
        flashsystem::{
            consts::{DRIVER_VERSION, VENDOR_NAME},
            records::SystemInfo,
        },
        types::{Protocol, VolumeStats, GIB},
    },
    flashsys::{
        config::FlashSystemConfig,
        errors::{DriverError, DriverResult},
    },
};

/// Convert a capacity as lssystem prints it, e.g. "9.53TB" or "512.00MB",
/// to GiB. Units are powers of 1024; a bare number is a byte count.
pub fn capacity_to_gib(value: &str) -> DriverResult<f64> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let shift = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "KB" => 10,
        "MB" => 20,
        "GB" => 30,
        "TB" => 40,
        "PB" => 50,
        other => {
            return Err(DriverError::BackendApi(format!(
                "Unknown capacity unit \"{other}\" in \"{value}\""
            )))
        }
    };
    let number = number.parse::<f64>().map_err(|_| {
        DriverError::BackendApi(format!("Capacity \"{value}\" is not a number"))
    })?;

    Ok(number * 2f64.powi(shift) / GIB as f64)
}

fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Backend statistics from the system view.
pub fn build_stats(
    config: &FlashSystemConfig,
    system: &SystemInfo,
    protocol: Protocol,
) -> DriverResult<VolumeStats> {
    let backend_name = config
        .volume_backend_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("{}_{}", system.name, config.flashsystem_volpool_name));

    Ok(VolumeStats {
        volume_backend_name: backend_name,
        vendor_name: VENDOR_NAME.to_string(),
        driver_version: DRIVER_VERSION.to_string(),
        storage_protocol: protocol,
        total_capacity_gb: round_hundredths(capacity_to_gib(&system.total_mdisk_capacity)?),
        free_capacity_gb: round_hundredths(capacity_to_gib(&system.total_free_space)?),
        reserved_percentage: config.reserved_percentage,
        qos_support: false,
        multiattach: config.flashsystem_multihostmap_enabled,
        pool_name: config.flashsystem_volpool_name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn capacities() {
        assert_eq!(capacity_to_gib("1.00TB").unwrap(), 1024.0);
        assert_eq!(capacity_to_gib("512.00MB").unwrap(), 0.5);
        assert_eq!(capacity_to_gib("2GB").unwrap(), 2.0);
        assert_eq!(capacity_to_gib(&GIB.to_string()).unwrap(), 1.0);
        assert_eq!(capacity_to_gib("0.00MB").unwrap(), 0.0);
        assert_matches!(capacity_to_gib("3XB"), Err(DriverError::BackendApi(_)));
        assert_matches!(capacity_to_gib("TB"), Err(DriverError::BackendApi(_)));
    }

    #[test]
    fn backend_name_defaults() {
        let config = FlashSystemConfig::new("10.0.0.5", "superuser");
        let system = SystemInfo {
            id: "000002006AC03A42".to_string(),
            name: "flashsystem1".to_string(),
            code_level: None,
            total_mdisk_capacity: "9.53TB".to_string(),
            total_free_space: "4.00TB".to_string(),
        };
        let stats = build_stats(&config, &system, Protocol::Fc).unwrap();
        assert_eq!(stats.volume_backend_name, "flashsystem1_mdiskgrp0");
        assert_eq!(stats.vendor_name, "IBM");
        assert_eq!(stats.total_capacity_gb, 9758.72);
        assert_eq!(stats.free_capacity_gb, 4096.0);
        assert!(stats.multiattach);
    }
}
