//! Saga State Machine Definitions
//!
//! Step IDs are designed for PostgreSQL storage as SMALLINT.
//! Forward progress is positive, failure branches are negative.

use std::fmt;

/// Transfer saga steps.
///
/// Internal path: STARTED -> OTP_VERIFIED -> DEBIT_COMPLETED ->
/// CREDIT_COMPLETED -> COMPLETED.
///
/// External path: ... DEBIT_COMPLETED -> EXTERNAL_INITIATED ->
/// (EXTERNAL_COMPLETED -> COMPLETED | EXTERNAL_FAILED ->
/// ROLLBACK_COMPLETED | ROLLBACK_FAILED).
///
/// Any step before money moves may go directly to FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum SagaStep {
    /// Transaction row created, challenge outcome not yet applied
    Started = 0,

    /// Challenge passed (or none required) - ready to move money
    OtpVerified = 10,

    /// Sender debited - funds are IN-FLIGHT
    /// CRITICAL: must eventually reach COMPLETED or a rollback terminal
    DebitCompleted = 20,

    /// Receiver credited (internal path)
    CreditCompleted = 30,

    /// Settlement requested, awaiting callback or poll (external path)
    ExternalInitiated = 40,

    /// Settlement rail confirmed completion
    ExternalCompleted = 50,

    /// Terminal: transfer done
    Completed = 60,

    /// Terminal: rejected before any money moved
    Failed = -10,

    /// Settlement rail reported failure - refund in progress
    ExternalFailed = -20,

    /// Terminal: sender refunded (amount + fee)
    RollbackCompleted = -30,

    /// Terminal: refund itself errored - manual intervention required
    RollbackFailed = -40,
}

impl SagaStep {
    /// Every step the timeout sweep may pick up and re-drive.
    ///
    /// This is exactly the non-terminal set; both transaction stores build
    /// their stalled-row scan from this list so they cannot drift apart.
    /// EXTERNAL_COMPLETED needs the final completion CAS and EXTERNAL_FAILED
    /// still owes the sender a refund, so both stay resumable.
    pub const RESUMABLE: [SagaStep; 7] = [
        SagaStep::Started,
        SagaStep::OtpVerified,
        SagaStep::DebitCompleted,
        SagaStep::CreditCompleted,
        SagaStep::ExternalInitiated,
        SagaStep::ExternalCompleted,
        SagaStep::ExternalFailed,
    ];

    /// No more transitions possible.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStep::Completed
                | SagaStep::Failed
                | SagaStep::RollbackCompleted
                | SagaStep::RollbackFailed
        )
    }

    /// Sender debited but the transfer has not settled either way.
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SagaStep::DebitCompleted
                | SagaStep::CreditCompleted
                | SagaStep::ExternalInitiated
                | SagaStep::ExternalCompleted
                | SagaStep::ExternalFailed
        )
    }

    /// Money left the sender's account on this path.
    ///
    /// Steps at or past DEBIT_COMPLETED (except the pre-money FAILED
    /// terminal) require either completion or an explicit rollback record.
    #[inline]
    pub fn money_moved(&self) -> bool {
        self.is_in_flight() || matches!(self, SagaStep::Completed | SagaStep::RollbackCompleted | SagaStep::RollbackFailed)
    }

    /// Numeric step ID for PostgreSQL storage.
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL step ID.
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SagaStep::Started),
            10 => Some(SagaStep::OtpVerified),
            20 => Some(SagaStep::DebitCompleted),
            30 => Some(SagaStep::CreditCompleted),
            40 => Some(SagaStep::ExternalInitiated),
            50 => Some(SagaStep::ExternalCompleted),
            60 => Some(SagaStep::Completed),
            -10 => Some(SagaStep::Failed),
            -20 => Some(SagaStep::ExternalFailed),
            -30 => Some(SagaStep::RollbackCompleted),
            -40 => Some(SagaStep::RollbackFailed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::Started => "STARTED",
            SagaStep::OtpVerified => "OTP_VERIFIED",
            SagaStep::DebitCompleted => "DEBIT_COMPLETED",
            SagaStep::CreditCompleted => "CREDIT_COMPLETED",
            SagaStep::ExternalInitiated => "EXTERNAL_INITIATED",
            SagaStep::ExternalCompleted => "EXTERNAL_COMPLETED",
            SagaStep::Completed => "COMPLETED",
            SagaStep::Failed => "FAILED",
            SagaStep::ExternalFailed => "EXTERNAL_FAILED",
            SagaStep::RollbackCompleted => "ROLLBACK_COMPLETED",
            SagaStep::RollbackFailed => "ROLLBACK_FAILED",
        }
    }
}

impl fmt::Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for SagaStep {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        SagaStep::from_id(value).ok_or(())
    }
}

/// Coarse transaction status exposed to API consumers.
///
/// The saga step is the machine's truth; the status is the phone-app view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TxStatus {
    Pending = 0,
    Processing = 10,
    Completed = 20,
    Failed = -10,
}

impl TxStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TxStatus::Pending),
            10 => Some(TxStatus::Processing),
            20 => Some(TxStatus::Completed),
            -10 => Some(TxStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "PENDING",
            TxStatus::Processing => "PROCESSING",
            TxStatus::Completed => "COMPLETED",
            TxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_steps() {
        assert!(SagaStep::Completed.is_terminal());
        assert!(SagaStep::Failed.is_terminal());
        assert!(SagaStep::RollbackCompleted.is_terminal());
        assert!(SagaStep::RollbackFailed.is_terminal());

        assert!(!SagaStep::Started.is_terminal());
        assert!(!SagaStep::OtpVerified.is_terminal());
        assert!(!SagaStep::DebitCompleted.is_terminal());
        assert!(!SagaStep::ExternalInitiated.is_terminal());
        assert!(!SagaStep::ExternalFailed.is_terminal());
    }

    #[test]
    fn test_resumable_is_exactly_the_non_terminal_set() {
        let all = [
            SagaStep::Started,
            SagaStep::OtpVerified,
            SagaStep::DebitCompleted,
            SagaStep::CreditCompleted,
            SagaStep::ExternalInitiated,
            SagaStep::ExternalCompleted,
            SagaStep::Completed,
            SagaStep::Failed,
            SagaStep::ExternalFailed,
            SagaStep::RollbackCompleted,
            SagaStep::RollbackFailed,
        ];
        for step in all {
            assert_eq!(
                SagaStep::RESUMABLE.contains(&step),
                !step.is_terminal(),
                "{step} resumable/terminal mismatch"
            );
        }
        assert!(SagaStep::RESUMABLE.contains(&SagaStep::ExternalCompleted));
        assert!(SagaStep::RESUMABLE.contains(&SagaStep::ExternalFailed));
    }

    #[test]
    fn test_in_flight_steps() {
        assert!(SagaStep::DebitCompleted.is_in_flight());
        assert!(SagaStep::ExternalInitiated.is_in_flight());
        assert!(SagaStep::ExternalFailed.is_in_flight());

        assert!(!SagaStep::Started.is_in_flight());
        assert!(!SagaStep::OtpVerified.is_in_flight());
        assert!(!SagaStep::Completed.is_in_flight());
        assert!(!SagaStep::Failed.is_in_flight());
    }

    #[test]
    fn test_money_moved() {
        assert!(!SagaStep::Started.money_moved());
        assert!(!SagaStep::OtpVerified.money_moved());
        assert!(!SagaStep::Failed.money_moved());

        assert!(SagaStep::DebitCompleted.money_moved());
        assert!(SagaStep::Completed.money_moved());
        assert!(SagaStep::RollbackCompleted.money_moved());
        assert!(SagaStep::RollbackFailed.money_moved());
    }

    #[test]
    fn test_step_id_roundtrip() {
        let steps = [
            SagaStep::Started,
            SagaStep::OtpVerified,
            SagaStep::DebitCompleted,
            SagaStep::CreditCompleted,
            SagaStep::ExternalInitiated,
            SagaStep::ExternalCompleted,
            SagaStep::Completed,
            SagaStep::Failed,
            SagaStep::ExternalFailed,
            SagaStep::RollbackCompleted,
            SagaStep::RollbackFailed,
        ];

        for step in steps {
            let id = step.id();
            let recovered = SagaStep::from_id(id).unwrap();
            assert_eq!(step, recovered);
        }
    }

    #[test]
    fn test_invalid_step_id() {
        assert!(SagaStep::from_id(999).is_none());
        assert!(SagaStep::from_id(-999).is_none());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TxStatus::Pending,
            TxStatus::Processing,
            TxStatus::Completed,
            TxStatus::Failed,
        ] {
            assert_eq!(TxStatus::from_id(status.id()), Some(status));
        }
        assert!(TxStatus::from_id(99).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(SagaStep::Started.to_string(), "STARTED");
        assert_eq!(SagaStep::ExternalInitiated.to_string(), "EXTERNAL_INITIATED");
        assert_eq!(SagaStep::RollbackFailed.to_string(), "ROLLBACK_FAILED");
        assert_eq!(TxStatus::Completed.to_string(), "COMPLETED");
    }
}
