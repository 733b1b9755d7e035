// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Driver operations end to end against the simulated array.

mod util;

use std::collections::BTreeMap;

use assert_matches::assert_matches;
use uuid::Uuid;

use flashsys::{
    driver::{
        CreateAction, DeleteAction, DeviceConnector, DriverAction, ExistingRef, Protocol,
        RenameAction, Snapshot, Volume, VolumeDriver, GIB,
    },
    flashsys::errors::DriverError,
};

use util::{
    read_prefix, remote_connector, sim_config, sim_setup, sim_setup_with, small_volume,
    write_pattern,
};

fn available(size: u64) -> Volume {
    Volume::new(Uuid::new_v4(), size).with_status("available")
}

#[test]
fn test_create_delete_volume() {
    let sim = sim_setup();
    let vol = available(1);

    assert_matches!(sim.driver.create_volume(&vol), Ok(CreateAction::Created(_)));
    assert_eq!(sim.array.vdisk_names().unwrap(), vec![vol.name.clone()]);
    assert_eq!(
        sim.driver.create_volume(&vol).unwrap(),
        CreateAction::Identity
    );

    let bigger = Volume {
        size: 2,
        ..vol.clone()
    };
    assert_matches!(
        sim.driver.create_volume(&bigger),
        Err(DriverError::BackendApi(_))
    );

    assert!(sim.driver.delete_volume(&vol).unwrap().is_changed());
    assert_eq!(sim.driver.delete_volume(&vol).unwrap(), DeleteAction::Identity);
    assert!(sim.array.vdisk_names().unwrap().is_empty());
}

#[test]
fn test_extend_volume() {
    let sim = sim_setup();
    let vol = available(1);
    sim.driver.create_volume(&vol).unwrap();

    assert_matches!(
        sim.driver.extend_volume(&vol, 1),
        Err(DriverError::InvalidInput(_))
    );
    sim.driver.extend_volume(&vol, 2).unwrap();
    let capacity = sim
        .driver
        .array()
        .vdisk_attributes(&vol.name)
        .unwrap()
        .unwrap()
        .capacity;
    assert_eq!(capacity, 2 * GIB);

    assert_matches!(
        sim.driver.extend_volume(&available(1), 2),
        Err(DriverError::BackendApi(_))
    );
}

#[test]
fn test_extend_volume_to_200() {
    let sim = sim_setup();
    let vol = available(10);
    sim.driver.create_volume(&vol).unwrap();
    sim.driver.extend_volume(&vol, 200).unwrap();
    assert_eq!(
        sim.driver
            .array()
            .vdisk_attributes(&vol.name)
            .unwrap()
            .unwrap()
            .capacity,
        200 * GIB
    );
}

#[test]
fn test_luns_are_distinct_per_host() {
    let sim = sim_setup();
    let host = remote_connector("compute-a", 0x0a);
    let vols = (0..4).map(|_| available(1)).collect::<Vec<_>>();

    let mut luns = vols
        .iter()
        .map(|vol| {
            sim.driver.create_volume(vol).unwrap();
            sim.driver
                .initialize_connection(vol, &host)
                .unwrap()
                .target_lun()
                .unwrap()
        })
        .collect::<Vec<_>>();
    luns.sort_unstable();
    assert_eq!(luns, vec![1, 2, 3, 4]);
    assert_eq!(sim.array.host_names().unwrap().len(), 1);

    // Attaching again reports the existing LUN.
    let again = sim.driver.initialize_connection(&vols[2], &host).unwrap();
    assert_eq!(
        again.target_lun(),
        sim.array
            .mappings_of(&vols[2].name)
            .unwrap()
            .first()
            .map(|(_, lun)| *lun)
    );
    assert_eq!(sim.array.mappings_of(&vols[2].name).unwrap().len(), 1);

    for vol in &vols {
        sim.driver.terminate_connection(vol, &host, false).unwrap();
    }
    assert!(sim.array.host_names().unwrap().is_empty());
}

#[test]
fn test_fc_connection_properties() {
    let sim = sim_setup();
    let vol = available(1);
    let host = remote_connector("compute-a", 0x0a);
    sim.driver.create_volume(&vol).unwrap();

    let info = sim.driver.initialize_connection(&vol, &host).unwrap();
    assert_eq!(info.driver_volume_type, "fibre_channel");
    assert_eq!(info.data["target_discovered"], false);
    assert_eq!(info.data["volume_id"], vol.id.to_string());
    assert!(info.data["initiator_target_map"]
        .as_object()
        .unwrap()
        .contains_key(&host.wwpns[0]));

    // The host goes away with its last mapping, and the caller learns of it.
    let detached = sim.driver.terminate_connection(&vol, &host, false).unwrap();
    assert_matches!(detached, Some(ref info) if info.driver_volume_type == "fibre_channel");
    assert_eq!(
        sim.driver.terminate_connection(&vol, &host, false).unwrap(),
        None
    );
}

#[test]
fn test_host_prefix_shared() {
    // Two distinct hosts whose names sanitize to the same prefix.
    let sim = sim_setup();
    let vol = available(1);
    sim.driver.create_volume(&vol).unwrap();
    sim.driver
        .initialize_connection(&vol, &remote_connector("compute@1", 0x01))
        .unwrap();
    sim.driver
        .initialize_connection(&vol, &remote_connector("compute#1", 0x02))
        .unwrap();
    assert_eq!(sim.array.host_names().unwrap().len(), 2);
}

#[test]
fn test_multihost_mapping() {
    let sim = sim_setup();
    let vol = available(1);
    sim.driver.create_volume(&vol).unwrap();
    sim.driver
        .initialize_connection(&vol, &remote_connector("compute-a", 0x0a))
        .unwrap();
    sim.driver
        .initialize_connection(&vol, &remote_connector("compute-b", 0x0b))
        .unwrap();
    assert_eq!(sim.array.mappings_of(&vol.name).unwrap().len(), 2);
}

#[test]
fn test_multihost_mapping_disabled() {
    let mut config = sim_config();
    config.flashsystem_multihostmap_enabled = false;
    let sim = sim_setup_with(config);
    let vol = available(1);
    sim.driver.create_volume(&vol).unwrap();
    sim.driver
        .initialize_connection(&vol, &remote_connector("compute-a", 0x0a))
        .unwrap();
    assert_matches!(
        sim.driver
            .initialize_connection(&vol, &remote_connector("compute-b", 0x0b)),
        Err(DriverError::BackendApi(_))
    );
    assert_eq!(sim.array.mappings_of(&vol.name).unwrap().len(), 1);
    assert!(!sim.driver.get_volume_stats(true).unwrap().multiattach);
}

#[test]
fn test_clone_copies_data() {
    let sim = sim_setup();
    let src = small_volume(&sim.array, 4);
    let pattern = b"flashsys clone test pattern".repeat(100);
    write_pattern(
        &sim.array.backing_file(&src.name).unwrap().unwrap(),
        &pattern,
    );

    let dest = available(1);
    sim.driver.create_cloned_volume(&dest, &src).unwrap();

    let dest_file = sim.array.backing_file(&dest.name).unwrap().unwrap();
    assert_eq!(read_prefix(&dest_file, pattern.len()), pattern);
    assert_eq!(
        sim.driver
            .array()
            .vdisk_attributes(&dest.name)
            .unwrap()
            .unwrap()
            .capacity,
        GIB
    );
    assert!(sim.driver.copies_in_progress().unwrap().is_empty());
    assert!(sim.connector.attached().unwrap().is_empty());
    assert!(sim.array.host_names().unwrap().is_empty());
}

#[test]
fn test_copy_preserves_existing_mappings() {
    let sim = sim_setup();
    let src = small_volume(&sim.array, 2);
    let host = remote_connector("compute-a", 0x0a);
    let lun = sim
        .driver
        .initialize_connection(&src, &host)
        .unwrap()
        .target_lun()
        .unwrap();
    let before = sim.array.mappings_of(&src.name).unwrap();

    let dest = available(1);
    sim.driver.create_cloned_volume(&dest, &src).unwrap();

    assert_eq!(sim.array.mappings_of(&src.name).unwrap(), before);
    assert_eq!(before[0].1, lun);
    assert!(sim.array.mappings_of(&dest.name).unwrap().is_empty());
    assert_eq!(sim.array.host_names().unwrap().len(), 1);
}

#[test]
fn test_failed_copy_cleans_up() {
    let sim = sim_setup();
    let src = small_volume(&sim.array, 2);
    sim.connector.fail_next_copy().unwrap();

    let dest = available(1);
    assert_matches!(
        sim.driver.create_cloned_volume(&dest, &src),
        Err(DriverError::Chained(..))
    );

    assert_eq!(sim.array.vdisk_names().unwrap(), vec![src.name.clone()]);
    assert!(sim.array.mappings_of(&src.name).unwrap().is_empty());
    assert!(sim.array.host_names().unwrap().is_empty());
    assert!(sim.connector.attached().unwrap().is_empty());
    assert!(sim.driver.copies_in_progress().unwrap().is_empty());

    // The source is usable afterwards.
    sim.driver.create_cloned_volume(&dest, &src).unwrap();
}

#[test]
fn test_snapshot_lifecycle() {
    let sim = sim_setup();
    let src = small_volume(&sim.array, 2);
    let pattern = b"snapshot contents".repeat(64);
    write_pattern(
        &sim.array.backing_file(&src.name).unwrap().unwrap(),
        &pattern,
    );

    let snap = Snapshot::new(Uuid::new_v4(), &src);
    sim.driver.create_snapshot(&snap).unwrap();
    let snap_file = sim.array.backing_file(&snap.name).unwrap().unwrap();
    assert_eq!(read_prefix(&snap_file, pattern.len()), pattern);

    // The source changes; the snapshot does not.
    write_pattern(
        &sim.array.backing_file(&src.name).unwrap().unwrap(),
        &[0xffu8; 64],
    );

    let restored = available(1);
    sim.driver
        .create_volume_from_snapshot(&restored, &snap)
        .unwrap();
    let restored_file = sim.array.backing_file(&restored.name).unwrap().unwrap();
    assert_eq!(read_prefix(&restored_file, pattern.len()), pattern);

    assert!(sim.driver.delete_snapshot(&snap).unwrap().is_changed());
    assert_eq!(
        sim.driver.delete_snapshot(&snap).unwrap(),
        DeleteAction::Identity
    );
}

#[test]
fn test_snapshot_requires_usable_source() {
    let sim = sim_setup();
    let src = small_volume(&sim.array, 2).with_status("error");
    assert_matches!(
        sim.driver
            .create_snapshot(&Snapshot::new(Uuid::new_v4(), &src)),
        Err(DriverError::InvalidInput(_))
    );

    let in_use = src.with_status("in-use");
    sim.driver
        .create_snapshot(&Snapshot::new(Uuid::new_v4(), &in_use))
        .unwrap();
}

#[test]
fn test_copy_size_checks() {
    let sim = sim_setup();
    let src = Volume::new(Uuid::new_v4(), 2).with_status("available");
    sim.driver.create_volume(&src).unwrap();

    assert_matches!(
        sim.driver.create_cloned_volume(&available(1), &src),
        Err(DriverError::InvalidInput(_))
    );
    assert_matches!(
        sim.driver
            .create_volume_from_snapshot(&available(1), &Snapshot::new(Uuid::new_v4(), &src)),
        Err(DriverError::InvalidInput(_))
    );
    assert_eq!(sim.array.vdisk_names().unwrap(), vec![src.name]);
}

#[test]
fn test_manage_existing() {
    let sim = sim_setup();
    sim.array
        .run("svctask mkvdisk -name legacy -mdiskgrp mdiskgrp0 -iogrp 0 -size 1536 -unit mb")
        .unwrap();
    let vol = available(0);
    let by_name = ExistingRef::SourceName("legacy".to_string());

    assert_eq!(
        sim.driver.manage_existing_get_size(&vol, &by_name).unwrap(),
        2
    );
    assert_matches!(
        sim.driver.manage_existing(&vol, &by_name),
        Ok(RenameAction::Renamed(_))
    );
    assert_eq!(sim.array.vdisk_names().unwrap(), vec![vol.name.clone()]);

    assert_matches!(
        sim.driver.manage_existing(&vol, &by_name),
        Err(DriverError::ManageExistingInvalidReference { .. })
    );
    sim.driver.unmanage(&vol).unwrap();
    assert_eq!(sim.array.vdisk_names().unwrap(), vec![vol.name]);
}

#[test]
fn test_manage_existing_by_id() {
    let sim = sim_setup();
    sim.array
        .run("svctask mkvdisk -name legacy -mdiskgrp mdiskgrp0 -iogrp 0 -size 1 -unit gb")
        .unwrap();
    let id = sim
        .driver
        .array()
        .vdisk_attributes("legacy")
        .unwrap()
        .unwrap()
        .id;

    let mut reference = BTreeMap::new();
    reference.insert("source-id".to_string(), id.to_string());
    let existing_ref = ExistingRef::from_map(&reference).unwrap();
    let vol = available(0);
    assert_eq!(
        sim.driver
            .manage_existing_get_size(&vol, &existing_ref)
            .unwrap(),
        1
    );
    sim.driver.manage_existing(&vol, &existing_ref).unwrap();
    assert!(sim.driver.array().vdisk_attributes(&vol.name).unwrap().is_some());
}

#[test]
fn test_manage_existing_rejects_mapped() {
    let sim = sim_setup();
    let legacy = available(1);
    sim.driver.create_volume(&legacy).unwrap();
    sim.driver
        .initialize_connection(&legacy, &remote_connector("compute-a", 0x0a))
        .unwrap();

    let existing_ref = ExistingRef::SourceName(legacy.name);
    assert_matches!(
        sim.driver.manage_existing(&available(0), &existing_ref),
        Err(DriverError::ManageExistingInvalidReference { .. })
    );
    assert_matches!(
        sim.driver.manage_existing_get_size(
            &available(0),
            &ExistingRef::SourceName("nonexistent".to_string())
        ),
        Err(DriverError::ManageExistingInvalidReference { .. })
    );
}

#[test]
fn test_volume_stats() {
    let sim = sim_setup();
    let stats = sim.driver.get_volume_stats(true).unwrap();
    assert_eq!(stats.storage_protocol, Protocol::Fc);
    assert_eq!(stats.volume_backend_name, "flashsystem1_mdiskgrp0");
    assert!((stats.total_capacity_gb - 10240.0).abs() < f64::EPSILON);
    assert!(stats.multiattach);
    assert!(!stats.qos_support);

    sim.driver.create_volume(&available(10)).unwrap();
    // A cached report is handed out until a refresh is asked for.
    assert_eq!(sim.driver.get_volume_stats(false).unwrap(), stats);
    let refreshed = sim.driver.get_volume_stats(true).unwrap();
    assert!(refreshed.free_capacity_gb < stats.free_capacity_gb);
}

#[test]
fn test_iscsi_attach_and_clone() {
    let mut config = sim_config();
    config.flashsystem_connection_protocol = Protocol::Iscsi;
    config.flashsystem_iscsi_portid = 1;
    let sim = sim_setup_with(config);

    let vol = available(1);
    sim.driver.create_volume(&vol).unwrap();
    let mut host = remote_connector("compute-a", 0x0a);
    host.multipath = true;
    let info = sim.driver.initialize_connection(&vol, &host).unwrap();
    assert_eq!(info.driver_volume_type, "iscsi");
    assert_eq!(info.data["target_lun"], 1);
    assert!(info.data["target_portal"]
        .as_str()
        .unwrap()
        .ends_with(":3260"));
    assert_eq!(info.data["target_portals"].as_array().unwrap().len(), 2);
    assert_eq!(
        sim.driver.terminate_connection(&vol, &host, true).unwrap(),
        None
    );

    let src = small_volume(&sim.array, 2);
    write_pattern(
        &sim.array.backing_file(&src.name).unwrap().unwrap(),
        b"over iscsi",
    );
    let dest = available(1);
    sim.driver.create_cloned_volume(&dest, &src).unwrap();
    assert_eq!(
        read_prefix(
            &sim.array.backing_file(&dest.name).unwrap().unwrap(),
            10
        ),
        b"over iscsi"
    );
    assert_eq!(
        sim.driver.get_volume_stats(true).unwrap().storage_protocol,
        Protocol::Iscsi
    );
}

#[test]
fn test_setup_fails_on_unstable_array() {
    let sim = sim_setup();
    sim.array
        .fail_next(
            "svcinfo lssystem",
            "CMMVC5786E The action failed because the cluster is not in a stable state.",
        )
        .unwrap();
    assert_matches!(
        sim.driver.do_setup(),
        Err(DriverError::CommandFailure { .. }) | Err(DriverError::Chained(..))
    );
}

#[test]
fn test_copy_into_existing_vdisk() {
    let sim = sim_setup();
    let src = small_volume(&sim.array, 2);
    let dest = small_volume(&sim.array, 2);
    write_pattern(
        &sim.array.backing_file(&src.name).unwrap().unwrap(),
        b"copied in place",
    );

    sim.driver.copy_vdisk_data(&src.name, &dest.name).unwrap();
    assert_eq!(
        read_prefix(&sim.array.backing_file(&dest.name).unwrap().unwrap(), 15),
        b"copied in place"
    );
    assert!(sim.array.host_names().unwrap().is_empty());
    assert!(sim.driver.copies_in_progress().unwrap().is_empty());
}

#[test]
fn test_copy_keeps_local_mapping() {
    let sim = sim_setup();
    let src = small_volume(&sim.array, 2);
    let dest = small_volume(&sim.array, 2);
    let local = sim.connector.local_connector().unwrap();
    let lun = sim
        .driver
        .initialize_connection(&src, &local)
        .unwrap()
        .target_lun()
        .unwrap();
    let before = sim.array.mappings_of(&src.name).unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].1, lun);

    sim.driver.copy_vdisk_data(&src.name, &dest.name).unwrap();
    assert_eq!(sim.array.mappings_of(&src.name).unwrap(), before);
    assert!(sim.array.mappings_of(&dest.name).unwrap().is_empty());

    sim.connector.fail_next_copy().unwrap();
    assert_matches!(
        sim.driver.copy_vdisk_data(&src.name, &dest.name),
        Err(DriverError::Chained(..))
    );
    assert_eq!(sim.array.mappings_of(&src.name).unwrap(), before);
    assert!(sim.array.mappings_of(&dest.name).unwrap().is_empty());
    assert_eq!(sim.array.host_names().unwrap().len(), 1);
    assert!(sim.connector.attached().unwrap().is_empty());
    assert!(sim.driver.copies_in_progress().unwrap().is_empty());
}

#[test]
fn test_host_name_with_space() {
    let sim = sim_setup();
    let vol = available(1);
    sim.driver.create_volume(&vol).unwrap();
    sim.driver
        .initialize_connection(&vol, &remote_connector("my host_1", 0x0c))
        .unwrap();
    let hosts = sim.array.host_names().unwrap();
    assert_eq!(hosts.len(), 1);
    assert!(hosts[0].starts_with("my host_1-"));
}

#[test]
fn test_oversized_volume_rejected() {
    let sim = sim_setup();
    assert_matches!(
        sim.driver.create_volume(&available(u64::MAX)),
        Err(DriverError::InvalidInput(_))
    );

    let src = small_volume(&sim.array, 2);
    assert_matches!(
        sim.driver.create_cloned_volume(&available(u64::MAX), &src),
        Err(DriverError::InvalidInput(_))
    );
    let snap = Snapshot::new(Uuid::new_v4(), &src);
    assert_matches!(
        sim.driver
            .create_volume_from_snapshot(&available(u64::MAX), &snap),
        Err(DriverError::InvalidInput(_))
    );
    assert_eq!(sim.array.vdisk_names().unwrap(), vec![src.name]);
}
