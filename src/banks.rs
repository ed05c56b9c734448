//! Bank classification registry.
//!
//! Routing decisions (internal ledger vs interbank settlement) come from an
//! explicit registry of bank codes, never from matching free-text bank names.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Routing class of a destination bank code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankClass {
    /// Account lives in our own ledger
    Internal,
    /// Reachable over the settlement rail
    External,
    /// Not in the registry - reject at validation
    Unknown,
}

/// One registered external bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankEntry {
    pub code: String,
    pub display_name: String,
}

/// Registry of the home bank plus known settlement counterparties.
#[derive(Debug, Clone)]
pub struct BankRegistry {
    home_code: String,
    external: HashMap<String, BankEntry>,
}

impl BankRegistry {
    pub fn new(home_code: impl Into<String>, external: Vec<BankEntry>) -> Self {
        let external = external
            .into_iter()
            .map(|e| (e.code.clone(), e))
            .collect();
        Self {
            home_code: home_code.into(),
            external,
        }
    }

    /// Registry used when the config carries no bank section.
    pub fn with_defaults() -> Self {
        Self::new(
            "RSG",
            vec![
                BankEntry {
                    code: "VCB".to_string(),
                    display_name: "Vietcombank".to_string(),
                },
                BankEntry {
                    code: "TCB".to_string(),
                    display_name: "Techcombank".to_string(),
                },
                BankEntry {
                    code: "ACB".to_string(),
                    display_name: "Asia Commercial Bank".to_string(),
                },
            ],
        )
    }

    pub fn home_code(&self) -> &str {
        &self.home_code
    }

    /// Classify a destination bank code. `None` means the caller omitted the
    /// bank, which addresses our own ledger.
    pub fn classify(&self, bank_code: Option<&str>) -> BankClass {
        match bank_code {
            None => BankClass::Internal,
            Some(code) if code == self.home_code => BankClass::Internal,
            Some(code) if self.external.contains_key(code) => BankClass::External,
            Some(_) => BankClass::Unknown,
        }
    }

    pub fn display_name(&self, bank_code: &str) -> Option<&str> {
        self.external
            .get(bank_code)
            .map(|e| e.display_name.as_str())
    }

    pub fn external_banks(&self) -> Vec<&BankEntry> {
        let mut banks: Vec<&BankEntry> = self.external.values().collect();
        banks.sort_by(|a, b| a.code.cmp(&b.code));
        banks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BankRegistry {
        BankRegistry::new(
            "RSG",
            vec![BankEntry {
                code: "VCB".to_string(),
                display_name: "Vietcombank".to_string(),
            }],
        )
    }

    #[test]
    fn test_classify_home_and_missing() {
        let reg = registry();
        assert_eq!(reg.classify(None), BankClass::Internal);
        assert_eq!(reg.classify(Some("RSG")), BankClass::Internal);
    }

    #[test]
    fn test_classify_registered_external() {
        let reg = registry();
        assert_eq!(reg.classify(Some("VCB")), BankClass::External);
    }

    #[test]
    fn test_classify_unknown_code() {
        let reg = registry();
        assert_eq!(reg.classify(Some("XYZ")), BankClass::Unknown);
        // Case matters: codes are exact identifiers, not names
        assert_eq!(reg.classify(Some("vcb")), BankClass::Unknown);
    }

    #[test]
    fn test_display_name_lookup() {
        let reg = registry();
        assert_eq!(reg.display_name("VCB"), Some("Vietcombank"));
        assert_eq!(reg.display_name("XYZ"), None);
    }
}
