//! Document status state machine.
//!
//! ```text
//! uploaded   -> processing | failed
//! processing -> processed  | uploaded
//! processed  -> verified   | rejected | processing
//! rejected   -> processing
//! failed     -> processing
//! verified   (terminal)
//! ```

use crate::models::document::DocumentStatus;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move a document from `{from}` to `{to}`")]
pub struct TransitionError {
    pub from: DocumentStatus,
    pub to: DocumentStatus,
}

pub fn allowed_targets(from: DocumentStatus) -> &'static [DocumentStatus] {
    use DocumentStatus::*;
    match from {
        Uploaded => &[Processing, Failed],
        Processing => &[Processed, Uploaded],
        Processed => &[Verified, Rejected, Processing],
        Rejected => &[Processing],
        Failed => &[Processing],
        Verified => &[],
    }
}

pub fn check_transition(from: DocumentStatus, to: DocumentStatus) -> Result<(), TransitionError> {
    if allowed_targets(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// Statuses a document may be (re)processed from.
pub fn can_reprocess(from: DocumentStatus) -> bool {
    check_transition(from, DocumentStatus::Processing).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use DocumentStatus::*;

    #[test]
    fn legal_moves_match_the_table() {
        let legal = [
            (Uploaded, Processing),
            (Uploaded, Failed),
            (Processing, Processed),
            (Processing, Uploaded),
            (Processed, Verified),
            (Processed, Rejected),
            (Processed, Processing),
            (Rejected, Processing),
            (Failed, Processing),
        ];
        for from in DocumentStatus::ALL {
            for to in DocumentStatus::ALL {
                let expected = legal.contains(&(*from, *to));
                assert_eq!(
                    check_transition(*from, *to).is_ok(),
                    expected,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn verified_is_terminal() {
        assert!(allowed_targets(Verified).is_empty());
        assert!(!can_reprocess(Verified));
        assert!(!can_reprocess(Processing));
        assert!(can_reprocess(Failed));
    }

    #[test]
    fn self_transitions_are_rejected() {
        let err = check_transition(Processed, Processed).unwrap_err();
        assert_eq!(err.to_string(), "cannot move a document from `processed` to `processed`");
    }
}
