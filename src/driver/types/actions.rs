// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Contains types which encode the results of actions requested on the
//! array. Each action type supports idempotency: it records what had to
//! change on the array for the request to be satisfied.

use std::fmt::{self, Display};

/// A trait for a generic kind of action. Defines the type of the thing to
/// be changed, and also a method to indicate what changed.
pub trait DriverAction {
    type Return;

    /// Returns whether or not the action changed state.
    fn is_changed(&self) -> bool;

    /// Returns the thing or things changed.
    fn changed(self) -> Option<Self::Return>;
}

#[derive(Debug, PartialEq, Eq)]
/// A single create action.
pub enum CreateAction<T> {
    /// The thing already existed.
    Identity,
    /// The thing did not already exist.
    Created(T),
}

impl<T> DriverAction for CreateAction<T> {
    type Return = T;

    fn is_changed(&self) -> bool {
        !matches!(*self, CreateAction::Identity)
    }

    fn changed(self) -> Option<T> {
        match self {
            CreateAction::Created(t) => Some(t),
            _ => None,
        }
    }
}

impl<T: Display> Display for CreateAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateAction::Created(t) => write!(f, "{t} was created successfully"),
            CreateAction::Identity => write!(
                f,
                "The object requested for creation is already present; no action taken"
            ),
        }
    }
}

/// Idempotent type representing the creation of a host-to-vdisk mapping.
/// Every variant carries the LUN id under which the vdisk is visible.
#[derive(Debug, PartialEq, Eq)]
pub enum MappingCreateAction<T> {
    /// No mapping existed and one was created.
    Created(T),
    /// The vdisk was mapped to another host and was additionally mapped to
    /// this one with the force flag.
    Forced(T),
    /// The mapping already existed.
    Identity(T),
}

impl<T> MappingCreateAction<T> {
    pub fn value(&self) -> &T {
        match self {
            MappingCreateAction::Created(t)
            | MappingCreateAction::Forced(t)
            | MappingCreateAction::Identity(t) => t,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            MappingCreateAction::Created(t)
            | MappingCreateAction::Forced(t)
            | MappingCreateAction::Identity(t) => t,
        }
    }
}

impl<T> DriverAction for MappingCreateAction<T> {
    type Return = T;

    fn is_changed(&self) -> bool {
        !matches!(*self, MappingCreateAction::Identity(_))
    }

    fn changed(self) -> Option<T> {
        match self {
            MappingCreateAction::Created(t) | MappingCreateAction::Forced(t) => Some(t),
            MappingCreateAction::Identity(_) => None,
        }
    }
}

impl<T: Display> Display for MappingCreateAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingCreateAction::Created(t) => write!(f, "Mapping created with LUN id {t}"),
            MappingCreateAction::Forced(t) => {
                write!(f, "Additional host mapping forced with LUN id {t}")
            }
            MappingCreateAction::Identity(t) => write!(
                f,
                "The mapping already exists with LUN id {t}; no action taken"
            ),
        }
    }
}

/// Idempotent type representing the removal of a host-to-vdisk mapping.
#[derive(Debug, PartialEq, Eq)]
pub enum MappingDeleteAction<T> {
    /// The mapping did not exist.
    Identity,
    /// The mapping existed and was removed.
    Deleted(T),
}

impl<T> DriverAction for MappingDeleteAction<T> {
    type Return = T;

    fn is_changed(&self) -> bool {
        matches!(*self, MappingDeleteAction::Deleted(_))
    }

    fn changed(self) -> Option<T> {
        match self {
            MappingDeleteAction::Deleted(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
/// An action which may rename a single thing.
pub enum RenameAction<T> {
    /// The thing already had the given name.
    Identity,
    /// The thing did not have the given name and was renamed.
    Renamed(T),
    /// The thing did not exist, so could not be renamed.
    NoSource,
}

impl<T> DriverAction for RenameAction<T> {
    type Return = T;

    fn is_changed(&self) -> bool {
        matches!(*self, RenameAction::Renamed(_))
    }

    fn changed(self) -> Option<T> {
        match self {
            RenameAction::Renamed(t) => Some(t),
            _ => None,
        }
    }
}

impl<T: Display> Display for RenameAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenameAction::Identity => {
                write!(f, "Object is already named the target name; no action taken")
            }
            RenameAction::Renamed(t) => write!(f, "Object was successfully renamed to {t}"),
            RenameAction::NoSource => {
                write!(f, "The object requested to be renamed does not exist")
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
/// An action which may delete a single thing.
pub enum DeleteAction<T> {
    /// The thing was already gone.
    Identity,
    /// The thing existed and was removed.
    Deleted(T),
}

impl<T> DriverAction for DeleteAction<T> {
    type Return = T;

    fn is_changed(&self) -> bool {
        matches!(*self, DeleteAction::Deleted(_))
    }

    fn changed(self) -> Option<T> {
        match self {
            DeleteAction::Deleted(t) => Some(t),
            _ => None,
        }
    }
}

impl<T: Display> Display for DeleteAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteAction::Deleted(t) => write!(f, "{t} was deleted successfully"),
            DeleteAction::Identity => write!(
                f,
                "The object requested for deletion is already absent; no action taken"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_create_changed() {
        assert_eq!(MappingCreateAction::Created(3).changed(), Some(3));
        assert_eq!(MappingCreateAction::Forced(2).changed(), Some(2));
        assert_eq!(MappingCreateAction::Identity(1).changed(), None);
        assert_eq!(*MappingCreateAction::Identity(1).value(), 1);
    }

    #[test]
    fn delete_is_changed() {
        assert!(DeleteAction::Deleted("vol").is_changed());
        assert!(!DeleteAction::<&str>::Identity.is_changed());
    }
}
