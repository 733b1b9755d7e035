// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub mod config;
pub mod errors;
mod run;

pub use self::run::{build_driver, run, Request};

pub static VERSION: &str = env!("CARGO_PKG_VERSION");
