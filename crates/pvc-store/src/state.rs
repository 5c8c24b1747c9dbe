//! Prompt version status table

use crate::error::StoreError;
use crate::model::VersionStatus;

/// Validates a prompt version status change.
///
/// Writing the current status again is a no-op and always allowed.
pub fn validate_transition(from: VersionStatus, to: VersionStatus) -> Result<(), StoreError> {
    if from == to || allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition { from, to })
    }
}

/// Statuses reachable from `from` in one step
pub fn allowed_transitions(from: VersionStatus) -> &'static [VersionStatus] {
    use VersionStatus::*;
    match from {
        Candidate => &[Approved, Retired],
        Approved => &[Production, Candidate, Retired],
        Production => &[Retired, Candidate],
        Retired => &[Production],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use VersionStatus::*;

    #[test]
    fn release_path_is_allowed() {
        assert!(validate_transition(Candidate, Approved).is_ok());
        assert!(validate_transition(Approved, Production).is_ok());
        assert!(validate_transition(Production, Retired).is_ok());
        // rollback
        assert!(validate_transition(Production, Candidate).is_ok());
        assert!(validate_transition(Retired, Production).is_ok());
    }

    #[test]
    fn shortcuts_are_rejected() {
        assert!(validate_transition(Candidate, Production).is_err());
        assert!(validate_transition(Retired, Approved).is_err());
        assert!(validate_transition(Retired, Candidate).is_err());
    }

    fn any_status() -> impl Strategy<Value = VersionStatus> {
        prop_oneof![Just(Candidate), Just(Approved), Just(Production), Just(Retired)]
    }

    proptest! {
        #[test]
        fn prop_validation_matches_table(from in any_status(), to in any_status()) {
            let res = validate_transition(from, to);
            let allowed = from == to || allowed_transitions(from).contains(&to);
            prop_assert_eq!(res.is_ok(), allowed);
        }
    }
}
