//! Static protocol lookup tables
//!
//! Opcode, register, and type-code names are plain `&'static` data. A
//! [`ProtocolTable`] indexes one such slice once (decoders keep theirs in a
//! `lazy_static!`) and is shared by reference by every decoder instance.
//! Lookups never fail: unknown keys come back as [`Lookup::Unknown`] with the
//! literal value so the caller can render it.

use super::errors::TableError;
use std::collections::HashMap;
use std::fmt;

/// Immutable key -> record mapping
#[derive(Debug)]
pub struct ProtocolTable<R: 'static> {
    name: &'static str,
    entries: &'static [(u32, R)],
    index: HashMap<u32, usize>,
}

/// Result of a table lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'t, R> {
    Known(&'t R),
    Unknown(u32),
}

impl<'t, R> Lookup<'t, R> {
    pub fn known(self) -> Option<&'t R> {
        match self {
            Lookup::Known(record) => Some(record),
            Lookup::Unknown(_) => None,
        }
    }
}

impl<R: fmt::Display> fmt::Display for Lookup<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Lookup::Known(record) => write!(f, "{}", record),
            Lookup::Unknown(key) => write!(f, "Unknown (0x{:02X})", key),
        }
    }
}

impl<R: 'static> ProtocolTable<R> {
    /// Index `entries`. On duplicate keys the first entry wins; use
    /// [`ProtocolTable::validate`] to reject them.
    pub fn new(name: &'static str, entries: &'static [(u32, R)]) -> Self {
        let mut index = HashMap::with_capacity(entries.len());
        for (position, (key, _)) in entries.iter().enumerate() {
            index.entry(*key).or_insert(position);
        }
        Self {
            name,
            entries,
            index,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that every key appears once
    pub fn validate(&self) -> Result<(), TableError> {
        if self.index.len() == self.entries.len() {
            return Ok(());
        }
        let mut seen = HashMap::new();
        for (key, _) in self.entries {
            if seen.insert(*key, ()).is_some() {
                return Err(TableError::DuplicateKey {
                    table: self.name,
                    key: *key,
                });
            }
        }
        Ok(())
    }

    pub fn lookup(&self, key: u32) -> Lookup<'_, R> {
        match self.index.get(&key) {
            Some(&position) => Lookup::Known(&self.entries[position].1),
            None => Lookup::Unknown(key),
        }
    }

    pub fn get(&self, key: u32) -> Option<&R> {
        self.lookup(key).known()
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, &R)> {
        self.entries.iter().map(|(key, record)| (*key, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static OPCODES: &[(u32, &str)] = &[(0x01, "READ"), (0x02, "WRITE"), (0x9F, "JEDEC_ID")];
    static DUPLICATED: &[(u32, &str)] = &[(0x01, "A"), (0x02, "B"), (0x01, "C")];

    lazy_static::lazy_static! {
        static ref TABLE: ProtocolTable<&'static str> = ProtocolTable::new("opcodes", OPCODES);
    }

    #[test]
    fn test_known_and_unknown_lookups() {
        assert_eq!(TABLE.get(0x02), Some(&"WRITE"));
        assert_eq!(TABLE.lookup(0x9F).to_string(), "JEDEC_ID");
        let unknown = TABLE.lookup(0x42);
        assert_eq!(unknown, Lookup::Unknown(0x42));
        assert!(unknown.to_string().contains("0x42"));
    }

    #[test]
    fn test_validate_reports_duplicate_key() {
        assert!(TABLE.validate().is_ok());
        let table = ProtocolTable::new("dup", DUPLICATED);
        assert_eq!(
            table.validate(),
            Err(TableError::DuplicateKey {
                table: "dup",
                key: 0x01
            })
        );
        // First entry wins
        assert_eq!(table.get(0x01), Some(&"A"));
    }
}
