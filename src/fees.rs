//! Flat fee schedule per transfer type.

use rust_decimal::Decimal;

use crate::config::FeeConfig;
use crate::saga::TransferKind;

/// Config-backed fee lookup. Fees participate in balance validation
/// (amount + fee) and in refunds (amount + fee back to the sender).
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    internal_flat: Decimal,
    external_flat: Decimal,
}

impl FeeSchedule {
    pub fn new(config: &FeeConfig) -> Self {
        Self {
            internal_flat: config.internal_flat,
            external_flat: config.external_flat,
        }
    }

    pub fn fee_for(&self, kind: TransferKind) -> Decimal {
        match kind {
            TransferKind::Internal => self.internal_flat,
            TransferKind::External => self.external_flat,
        }
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::new(&FeeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_transfers_are_free_by_default() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.fee_for(TransferKind::Internal), Decimal::ZERO);
    }

    #[test]
    fn test_external_flat_fee() {
        let fees = FeeSchedule::new(&FeeConfig {
            internal_flat: Decimal::ZERO,
            external_flat: Decimal::new(750, 2),
        });
        assert_eq!(fees.fee_for(TransferKind::External), Decimal::new(750, 2));
    }
}
