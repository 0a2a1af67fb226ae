use crate::CoreError;
use std::fmt;

/// How far a creation has progressed. Decides nothing by itself; the
/// rollback stack logs it when unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationPhase {
    Pending,
    /// Catalog record(s) inserted.
    Reserved,
    /// Storage volume(s) exist.
    Materialized,
    Configured,
    Committed,
}

impl fmt::Display for CreationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CreationPhase::Pending => "pending",
            CreationPhase::Reserved => "reserved",
            CreationPhase::Materialized => "materialized",
            CreationPhase::Configured => "configured",
            CreationPhase::Committed => "committed",
        };
        f.write_str(s)
    }
}

/// `Reserved -> Reserved` lets a copy reserve each snapshot after the target.
pub(crate) fn validate_transition(
    from: CreationPhase,
    to: CreationPhase,
) -> Result<(), CoreError> {
    use CreationPhase::{Committed, Configured, Materialized, Pending, Reserved};

    let valid = matches!(
        (from, to),
        (Pending, Reserved | Materialized)
            | (Reserved, Reserved | Materialized)
            | (Materialized, Configured | Committed)
            | (Configured, Configured | Committed)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
