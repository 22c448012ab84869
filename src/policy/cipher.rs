use super::Mode;
use crate::error::ConfigError;
use crate::hex::HexValue;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Signalling value a client adds when it deliberately retries with a lower
/// protocol version. Governed by its own policy, never by the catalog.
pub const TLS_FALLBACK_SCSV: u16 = 0x5600;

pub const UNKNOWN_CIPHER_SUITE_NAME: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CipherSuite {
    pub hex: HexValue,
    pub name: String,
    pub mode: Mode,
}

impl CipherSuite {
    pub fn new(hex: HexValue, name: impl Into<String>, mode: Mode) -> Self {
        Self {
            hex,
            name: name.into(),
            mode,
        }
    }

    pub fn is_fallback_scsv(&self) -> bool {
        self.hex == HexValue::from_u16(TLS_FALLBACK_SCSV)
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.hex.to_human())
    }
}

#[derive(Debug, Default)]
struct CipherTable {
    order: Vec<HexValue>,
    by_hex: HashMap<HexValue, CipherSuite>,
}

impl CipherTable {
    fn push(&mut self, suite: CipherSuite) {
        self.order.push(suite.hex.clone());
        self.by_hex.insert(suite.hex.clone(), suite);
    }
}

/// Cipher suites keyed by their two-byte code, in declaration order.
///
/// Relay connection threads auto-register unknown suites while parsing, so
/// the table sits behind a lock and every method takes `&self`.
#[derive(Debug, Default)]
pub struct CipherSuiteRegistry {
    table: RwLock<CipherTable>,
}

impl CipherSuiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a suite; a second suite with the same code is a configuration error.
    pub fn insert(&self, suite: CipherSuite) -> Result<(), ConfigError> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.by_hex.contains_key(&suite.hex) {
            return Err(ConfigError::DuplicateCipherSuite(suite.to_string()));
        }
        table.push(suite);
        Ok(())
    }

    pub fn contains(&self, hex: &HexValue) -> bool {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_hex
            .contains_key(hex)
    }

    pub fn get(&self, hex: &HexValue) -> Option<CipherSuite> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_hex
            .get(hex)
            .cloned()
    }

    /// Looks a suite up, registering it as `MUST_NOT_BE` / "Unknown" when the
    /// policy author never declared it.
    pub fn get_or_create_default(&self, hex: &HexValue) -> CipherSuite {
        if let Some(found) = self.get(hex) {
            return found;
        }
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        // another thread may have registered it between the two locks
        if let Some(found) = table.by_hex.get(hex) {
            return found.clone();
        }
        let suite = CipherSuite::new(hex.clone(), UNKNOWN_CIPHER_SUITE_NAME, Mode::MustNotBe);
        tracing::debug!(suite = %suite, "registering undeclared cipher suite");
        table.push(suite.clone());
        suite
    }

    /// Sets the policy of a catalog entry by its name.
    pub fn set_mode_by_name(&self, name: &str, mode: Mode) -> Result<(), ConfigError> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let suite = table
            .by_hex
            .values_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownCipherSuite(name.to_string()))?;
        suite.mode = mode;
        Ok(())
    }

    /// Snapshot of every registered suite in declaration order.
    pub fn all(&self) -> Vec<CipherSuite> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table
            .order
            .iter()
            .filter_map(|hex| table.by_hex.get(hex).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
