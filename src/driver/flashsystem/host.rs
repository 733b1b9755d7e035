// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::{
    driver::{flashsystem::consts::HOST_NAME_PREFIX_MAX, types::Connector},
    flashsys::errors::{DriverError, DriverResult},
};

/// Turn the connector's host name into something the array accepts as the
/// start of a host object name. ASCII characters other than letters,
/// digits, space, '.', '-' and '_' become '-'; anything outside ASCII is
/// kept. The array rejects names that do not start with a letter, so such
/// names get a leading '_'.
pub fn connector_to_hostname_prefix(connector: &Connector) -> DriverResult<String> {
    if connector.host.is_empty() {
        return Err(DriverError::InvalidInput(
            "Connector does not name a host".to_string(),
        ));
    }

    let sanitized = connector
        .host
        .chars()
        .map(|c| {
            if !c.is_ascii() || c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect::<String>();

    let prefixed = if sanitized.starts_with(char::is_alphabetic) {
        sanitized
    } else {
        format!("_{sanitized}")
    };

    Ok(prefixed.chars().take(HOST_NAME_PREFIX_MAX).collect())
}

/// A host object name unique enough to avoid collisions between hosts
/// that share a host name prefix.
pub fn new_host_name(connector: &Connector) -> DriverResult<String> {
    let prefix = connector_to_hostname_prefix(connector)?;
    let suffix = rand::random::<u32>() % 100_000_000;
    Ok(format!("{prefix}-{suffix:08}"))
}
