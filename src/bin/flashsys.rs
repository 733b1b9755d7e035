// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{env, error::Error, path::PathBuf, str::FromStr};

use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use env_logger::Builder;
use log::LevelFilter;
use uuid::Uuid;

use flashsys::{
    driver::{Connector, ExistingRef},
    flashsys::{build_driver, run, Request, VERSION},
};

fn id_arg() -> Arg {
    Arg::new("id")
        .required(true)
        .value_parser(Uuid::parse_str)
        .help("Id of the volume or snapshot")
}

fn uuid_opt(name: &'static str, long: &'static str) -> Arg {
    Arg::new(name)
        .long(long)
        .required(true)
        .num_args(1)
        .value_parser(Uuid::parse_str)
}

fn size_opt(name: &'static str, long: &'static str) -> Arg {
    Arg::new(name)
        .long(long)
        .required(true)
        .num_args(1)
        .value_parser(clap::value_parser!(u64))
        .help("Size in GiB")
}

fn connector_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("host")
            .long("host")
            .num_args(1)
            .help("Host name of the initiator; the local host if omitted"),
    )
    .arg(
        Arg::new("wwpn")
            .long("wwpn")
            .action(ArgAction::Append)
            .requires("host"),
    )
    .arg(
        Arg::new("initiator")
            .long("initiator")
            .num_args(1)
            .requires("host"),
    )
    .arg(
        Arg::new("multipath")
            .long("multipath")
            .action(ArgAction::SetTrue)
            .requires("host"),
    )
}

fn existing_ref_args(cmd: Command) -> Command {
    cmd.arg(Arg::new("source_name").long("source-name").num_args(1))
        .arg(Arg::new("source_id").long("source-id").num_args(1))
        .group(
            ArgGroup::new("existing_ref")
                .arg("source_name")
                .arg("source_id")
                .required(true),
        )
}

fn parse_args() -> Command {
    Command::new("flashsys")
        .version(VERSION)
        .about("Manage volumes on a FlashSystem array")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .num_args(1)
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("JSON configuration file"),
        )
        .arg(
            Arg::new("sim")
                .long("sim")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Use a simulated array"),
        )
        .arg(
            Arg::new("log_level")
                .long("log-level")
                .num_args(1)
                .global(true)
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Sets level for generation of log messages."),
        )
        .subcommands(vec![
            Command::new("setup").about("Check that the array is reachable and usable"),
            Command::new("create-volume")
                .arg(id_arg())
                .arg(size_opt("size", "size")),
            Command::new("delete-volume").arg(id_arg()),
            Command::new("extend-volume")
                .arg(id_arg())
                .arg(size_opt("size", "size"))
                .arg(size_opt("new_size", "new-size")),
            Command::new("create-snapshot")
                .arg(id_arg())
                .arg(uuid_opt("volume", "volume"))
                .arg(size_opt("volume_size", "volume-size")),
            Command::new("delete-snapshot")
                .arg(id_arg())
                .arg(uuid_opt("volume", "volume")),
            Command::new("create-from-snapshot")
                .arg(id_arg())
                .arg(size_opt("size", "size"))
                .arg(uuid_opt("snapshot", "snapshot"))
                .arg(uuid_opt("volume", "volume"))
                .arg(size_opt("volume_size", "volume-size")),
            Command::new("clone")
                .arg(id_arg())
                .arg(size_opt("size", "size"))
                .arg(uuid_opt("source", "source"))
                .arg(size_opt("source_size", "source-size")),
            connector_args(Command::new("attach").arg(id_arg())),
            connector_args(
                Command::new("detach").arg(id_arg()).arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue),
                ),
            ),
            existing_ref_args(Command::new("manage").arg(id_arg())),
            existing_ref_args(Command::new("manage-get-size").arg(id_arg())),
            Command::new("unmanage").arg(id_arg()),
            Command::new("stats"),
        ])
}

fn uuid(args: &ArgMatches, name: &str) -> Uuid {
    *args.get_one::<Uuid>(name).expect("required")
}

fn size(args: &ArgMatches, name: &str) -> u64 {
    *args.get_one::<u64>(name).expect("required")
}

fn connector(args: &ArgMatches) -> Option<Connector> {
    args.get_one::<String>("host").map(|host| Connector {
        host: host.clone(),
        initiator: args.get_one::<String>("initiator").cloned(),
        wwpns: args
            .get_many::<String>("wwpn")
            .map(|w| w.cloned().collect())
            .unwrap_or_default(),
        ip: None,
        multipath: args.get_flag("multipath"),
    })
}

fn existing_ref(args: &ArgMatches) -> ExistingRef {
    match args.get_one::<String>("source_name") {
        Some(name) => ExistingRef::SourceName(name.clone()),
        None => ExistingRef::SourceId(
            args.get_one::<String>("source_id")
                .expect("group requires one of source-name or source-id")
                .clone(),
        ),
    }
}

fn request(args: &ArgMatches) -> Request {
    match args.subcommand() {
        Some(("create-volume", sub)) => Request::CreateVolume {
            id: uuid(sub, "id"),
            size: size(sub, "size"),
        },
        Some(("delete-volume", sub)) => Request::DeleteVolume { id: uuid(sub, "id") },
        Some(("extend-volume", sub)) => Request::ExtendVolume {
            id: uuid(sub, "id"),
            size: size(sub, "size"),
            new_size: size(sub, "new_size"),
        },
        Some(("create-snapshot", sub)) => Request::CreateSnapshot {
            id: uuid(sub, "id"),
            volume_id: uuid(sub, "volume"),
            volume_size: size(sub, "volume_size"),
        },
        Some(("delete-snapshot", sub)) => Request::DeleteSnapshot {
            id: uuid(sub, "id"),
            volume_id: uuid(sub, "volume"),
        },
        Some(("create-from-snapshot", sub)) => Request::CreateFromSnapshot {
            id: uuid(sub, "id"),
            size: size(sub, "size"),
            snapshot_id: uuid(sub, "snapshot"),
            volume_id: uuid(sub, "volume"),
            volume_size: size(sub, "volume_size"),
        },
        Some(("clone", sub)) => Request::Clone {
            id: uuid(sub, "id"),
            size: size(sub, "size"),
            src_id: uuid(sub, "source"),
            src_size: size(sub, "source_size"),
        },
        Some(("attach", sub)) => Request::Attach {
            id: uuid(sub, "id"),
            connector: connector(sub),
        },
        Some(("detach", sub)) => Request::Detach {
            id: uuid(sub, "id"),
            connector: connector(sub),
            force: sub.get_flag("force"),
        },
        Some(("manage", sub)) => Request::Manage {
            id: uuid(sub, "id"),
            existing_ref: existing_ref(sub),
        },
        Some(("manage-get-size", sub)) => Request::ManageGetSize {
            id: uuid(sub, "id"),
            existing_ref: existing_ref(sub),
        },
        Some(("unmanage", sub)) => Request::Unmanage { id: uuid(sub, "id") },
        Some(("stats", _)) => Request::Stats,
        _ => Request::Setup,
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args().get_matches();

    let mut builder = Builder::new();
    if let Some(log_level) = args.get_one::<String>("log_level") {
        builder.filter(
            Some("flashsys"),
            LevelFilter::from_str(log_level)
                .expect("argument parser only accepts valid log levels"),
        );
    } else if let Ok(s) = env::var("RUST_LOG") {
        builder.parse_filters(&s);
    }
    builder.init();

    let driver = build_driver(
        args.get_one::<PathBuf>("config").map(PathBuf::as_path),
        args.get_flag("sim"),
    )?;
    let result = run(&driver, request(&args))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_consistent() {
        parse_args().debug_assert();
    }

    #[test]
    fn attach_for_remote_host() {
        let args = parse_args()
            .try_get_matches_from([
                "flashsys",
                "attach",
                "2f7e9b4c-54d2-4a2f-9c68-1b0c2a4e8d11",
                "--host",
                "compute-1",
                "--wwpn",
                "10000090fa0a0b0c",
                "--wwpn",
                "10000090fa0a0b0d",
            ])
            .unwrap();
        match request(&args) {
            Request::Attach {
                connector: Some(c), ..
            } => {
                assert_eq!(c.host, "compute-1");
                assert_eq!(c.wwpns.len(), 2);
                assert!(!c.multipath);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn manage_requires_a_reference() {
        assert!(parse_args()
            .try_get_matches_from([
                "flashsys",
                "manage",
                "2f7e9b4c-54d2-4a2f-9c68-1b0c2a4e8d11"
            ])
            .is_err());
    }
}
