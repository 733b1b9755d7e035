// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![allow(dead_code)]

use std::{
    fs::OpenOptions,
    io::{Read, Write},
    path::Path,
    sync::Once,
};

use env_logger::Builder;
use uuid::Uuid;

use flashsys::{
    driver::{Connector, FlashSystemDriver, SimArray, SimConnector, Volume, VolumeDriver},
    flashsys::config::FlashSystemConfig,
};

static INIT: Once = Once::new();

/// Log through env_logger at debug level, once per test binary.
pub fn init_logger() {
    INIT.call_once(|| {
        Builder::new()
            .is_test(true)
            .filter_level(log::LevelFilter::Debug)
            .try_init()
            .ok();
    });
}

/// A driver over a fresh simulated array, set up and ready. The array and
/// connector handles share state with the driver's.
pub struct SimSetup {
    pub driver: FlashSystemDriver,
    pub array: SimArray,
    pub connector: SimConnector,
}

pub fn sim_config() -> FlashSystemConfig {
    let mut config = FlashSystemConfig::new("sim", "superuser");
    config.san_password = Some("sim".to_string());
    config
}

pub fn sim_setup_with(config: FlashSystemConfig) -> SimSetup {
    init_logger();
    let array = SimArray::new(&config.flashsystem_volpool_name).unwrap();
    let connector = SimConnector::new(array.clone());
    let driver =
        FlashSystemDriver::new(config, Box::new(array.clone()), Box::new(connector.clone()))
            .unwrap();
    driver.do_setup().unwrap();
    driver.check_for_setup_error().unwrap();
    SimSetup {
        driver,
        array,
        connector,
    }
}

pub fn sim_setup() -> SimSetup {
    sim_setup_with(sim_config())
}

/// A remote compute host with one FC port and an iSCSI initiator.
pub fn remote_connector(host: &str, port: u8) -> Connector {
    Connector {
        host: host.to_string(),
        initiator: Some(format!("iqn.1994-05.com.example:{host}")),
        wwpns: vec![format!("10000090fa0000{port:02x}")],
        ip: None,
        multipath: false,
    }
}

/// An available volume whose vdisk is created directly on the array with a
/// capacity of a few MiB, so that copies of it stay small.
pub fn small_volume(array: &SimArray, mib: u64) -> Volume {
    let volume = Volume::new(Uuid::new_v4(), 1).with_status("available");
    array
        .run(&format!(
            "svctask mkvdisk -name {} -mdiskgrp mdiskgrp0 -iogrp 0 -size {mib} -unit mb",
            volume.name
        ))
        .unwrap();
    volume
}

pub fn write_pattern(path: &Path, pattern: &[u8]) {
    let mut f = OpenOptions::new().write(true).open(path).unwrap();
    f.write_all(pattern).unwrap();
    f.sync_all().unwrap();
}

pub fn read_prefix(path: &Path, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let mut f = OpenOptions::new().read(true).open(path).unwrap();
    f.read_exact(&mut buf).unwrap();
    buf
}
