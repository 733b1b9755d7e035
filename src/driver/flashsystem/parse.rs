// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Parsing of delimiter separated CLI output.
//
// Detailed views ("svcinfo lsvdisk -delim ! vol1") print one attribute per
// line as name!value. Listings ("svcinfo lshost -delim !") print a header
// line followed by one line per object.

use indexmap::IndexMap;

use crate::{
    driver::flashsystem::consts::CLI_DELIM,
    flashsys::errors::{DriverError, DriverResult},
};

/// The value of an attribute, which becomes a list once its name recurs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttrValue {
    Single(String),
    Multi(Vec<String>),
}

impl AttrValue {
    /// The first value given for the attribute.
    pub fn first(&self) -> &str {
        match self {
            AttrValue::Single(v) => v,
            AttrValue::Multi(vs) => vs.first().map(|s| s.as_str()).unwrap_or(""),
        }
    }

    pub fn all(&self) -> Vec<&str> {
        match self {
            AttrValue::Single(v) => vec![v.as_str()],
            AttrValue::Multi(vs) => vs.iter().map(|s| s.as_str()).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            AttrValue::Single(v) => {
                let first = std::mem::take(v);
                *self = AttrValue::Multi(vec![first, value]);
            }
            AttrValue::Multi(vs) => vs.push(value),
        }
    }
}

/// Lookup of named fields, shared by detailed views and listing rows.
pub trait Fields {
    /// The first value of the named field, if present.
    fn field(&self, name: &str) -> Option<&str>;

    /// Every value of the named field, in output order.
    fn field_all(&self, name: &str) -> Vec<&str>;
}

/// Attributes of one object, in the order the CLI printed them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Attributes(IndexMap<String, AttrValue>);

impl Attributes {
    pub fn parse(text: &str) -> Attributes {
        let mut attributes: IndexMap<String, AttrValue> = IndexMap::new();
        for line in text.lines() {
            let Some((name, value)) = line.split_once(CLI_DELIM) else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim_end().to_string();
            match attributes.get_mut(name) {
                Some(existing) => existing.push(value),
                None => {
                    attributes.insert(name.to_string(), AttrValue::Single(value));
                }
            }
        }
        Attributes(attributes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }
}

impl Fields for Attributes {
    fn field(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(AttrValue::first)
    }

    fn field_all(&self, name: &str) -> Vec<&str> {
        self.0.get(name).map(AttrValue::all).unwrap_or_default()
    }
}

/// A listing: the header names and one vector of values per object.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Parse a listing. Empty output is an empty table; a row whose column
    /// count differs from the header's is an error.
    pub fn parse(text: &str) -> DriverResult<Table> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = match lines.next() {
            Some(h) => split_columns(h),
            None => return Ok(Table::default()),
        };

        let mut rows = Vec::new();
        for line in lines {
            let row = split_columns(line);
            if row.len() != header.len() {
                return Err(DriverError::BackendApi(format!(
                    "CLI listing row \"{line}\" has {} columns but the header has {}",
                    row.len(),
                    header.len()
                )));
            }
            rows.push(row);
        }
        Ok(Table { header, rows })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            header: &self.header,
            values,
        })
    }
}

fn split_columns(line: &str) -> Vec<String> {
    line.trim_end()
        .split(CLI_DELIM)
        .map(|c| c.to_string())
        .collect()
}

/// One object of a listing.
#[derive(Clone, Copy, Debug)]
pub struct Row<'a> {
    header: &'a [String],
    values: &'a [String],
}

impl Fields for Row<'_> {
    fn field(&self, name: &str) -> Option<&str> {
        self.header
            .iter()
            .position(|h| h == name)
            .map(|i| self.values[i].as_str())
    }

    fn field_all(&self, name: &str) -> Vec<&str> {
        self.header
            .iter()
            .zip(self.values.iter())
            .filter(|(h, _)| *h == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn repeated_attributes_become_lists() {
        let out = "id!1\nname!host-1\nport_count!2\nWWPN!10000090FA0A0B0C\nnode_logged_in_count!0\nWWPN!10000090FA0A0B0D\n";
        let attrs = Attributes::parse(out);
        assert_eq!(attrs.field("name"), Some("host-1"));
        assert_eq!(
            attrs.field_all("WWPN"),
            vec!["10000090FA0A0B0C", "10000090FA0A0B0D"]
        );
        assert_eq!(attrs.field_all("missing"), Vec::<&str>::new());
        assert_eq!(
            attrs.names().collect::<Vec<_>>(),
            vec!["id", "name", "port_count", "WWPN", "node_logged_in_count"]
        );
    }

    #[test]
    fn lines_without_delimiter_are_skipped() {
        let attrs = Attributes::parse("\nnoise\n!orphan\nname!vol1\nvalue!a!b\n");
        assert_eq!(attrs.field("name"), Some("vol1"));
        assert_eq!(attrs.field("value"), Some("a!b"));
        assert_eq!(attrs.names().count(), 2);
    }

    #[test]
    fn empty_values_are_kept() {
        let attrs = Attributes::parse("FC_id!\nname!vol1\n");
        assert_eq!(attrs.field("FC_id"), Some(""));
    }

    #[test]
    fn table_rows_follow_header() {
        let out = "id!name!SCSI_id!vdisk_id!vdisk_name!vdisk_UID\n\
                   0!host-1!1!4!volume-a!60050768\n\
                   0!host-1!2!5!volume-b!60050769\n";
        let table = Table::parse(out).unwrap();
        assert_eq!(table.len(), 2);
        let names = table
            .rows()
            .map(|r| r.field("vdisk_name").unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["volume-a", "volume-b"]);
        assert_eq!(table.rows().next().unwrap().field("nonexistent"), None);
    }

    #[test]
    fn empty_listing() {
        let table = Table::parse("").unwrap();
        assert!(table.is_empty());
        assert!(table.header().is_empty());
    }

    #[test]
    fn ragged_row_is_rejected() {
        assert_matches!(
            Table::parse("id!name\n0!a!extra\n"),
            Err(DriverError::BackendApi(_))
        );
    }
}
