//! Composite storage IDs
//!
//! `DS-<random>-<ip>-<port>-<created millis>`. Fields vary in width and the
//! random part may be negative (an empty field), so the port is located
//! from the end of the parsed field list.

use std::fmt;

/// A storage ID split on hyphens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageId {
    fields: Vec<String>,
}

impl StorageId {
    /// Parse a storage ID that carries an address and port.
    ///
    /// IDs without an embedded endpoint (fresh `DS-<random>` ids, empty
    /// ids) return `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let fields: Vec<String> = s.split('-').map(str::to_string).collect();
        if fields.len() < 4 {
            return None;
        }
        let id = Self { fields };
        id.port()?;
        Some(id)
    }

    fn port_index(&self) -> usize {
        self.fields.len() - 2
    }

    /// Embedded data port
    pub fn port(&self) -> Option<u16> {
        self.fields[self.port_index()].parse().ok()
    }

    /// Embedded address
    pub fn address(&self) -> &str {
        &self.fields[self.port_index() - 1]
    }

    /// Same ID with the port field replaced
    pub fn with_port(&self, port: u16) -> Self {
        let mut fields = self.fields.clone();
        let idx = self.port_index();
        fields[idx] = port.to_string();
        Self { fields }
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fields.join("-"))
    }
}
