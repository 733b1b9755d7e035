// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub const DRIVER_VERSION: &str = "1.0.7";
pub const VENDOR_NAME: &str = "IBM";

/// Field separator requested from every svcinfo listing.
pub const CLI_DELIM: char = '!';

pub const SUCCESSFULLY_CREATED: &str = "successfully created";

/// The specified object does not exist.
pub const CMMVC5753E: &str = "CMMVC5753E";
/// The object does not exist or the name is not valid.
pub const CMMVC5754E: &str = "CMMVC5754E";
/// The vdisk is already mapped to another host.
pub const CMMVC6045E: &str = "CMMVC6045E";
/// The vdisk-to-host mapping was not created because the vdisk is already
/// mapped to a host.
pub const CMMVC6071E: &str = "CMMVC6071E";

/// Host names on the array are limited to this many characters, and the
/// driver appends "-" plus eight digits to the prefix.
pub const HOST_NAME_PREFIX_MAX: usize = 55;

/// Volume statuses from which a snapshot may be taken.
pub const SNAPSHOT_SOURCE_STATUSES: [&str; 2] = ["available", "in-use"];
