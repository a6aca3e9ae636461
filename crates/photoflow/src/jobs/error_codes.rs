// Failure codes persisted in jobs.error_code.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    SubmissionFailed,
    InsufficientCredits,
    GenerationFailed,
    PostprocessFailed,
    TimedOut,
    Unknown,
}

impl FailureCode {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "SUBMISSION_FAILED" => Self::SubmissionFailed,
            "INSUFFICIENT_CREDITS" => Self::InsufficientCredits,
            "GENERATION_FAILED" => Self::GenerationFailed,
            "POSTPROCESS_FAILED" => Self::PostprocessFailed,
            "TIMED_OUT" => Self::TimedOut,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmissionFailed => "SUBMISSION_FAILED",
            Self::InsufficientCredits => "INSUFFICIENT_CREDITS",
            Self::GenerationFailed => "GENERATION_FAILED",
            Self::PostprocessFailed => "POSTPROCESS_FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether the user was charged before this failure could happen.
    pub fn follows_debit(&self) -> bool {
        matches!(
            self,
            Self::GenerationFailed | Self::PostprocessFailed | Self::TimedOut
        )
    }

    /// Shown to the job owner instead of the stored error message.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::SubmissionFailed => {
                "The generation service did not accept this job. You were not charged."
            }
            Self::InsufficientCredits => {
                "Your balance no longer covered this job when it started. You were not charged."
            }
            Self::GenerationFailed => "The generation service could not produce a result.",
            Self::PostprocessFailed => "The result was produced but could not be saved.",
            Self::TimedOut => "The generation took too long and was abandoned.",
            Self::Unknown => "The job failed.",
        }
    }
}

/// Operator guidance for a failed job.
pub fn suggested_action(code: &str) -> &'static str {
    match FailureCode::from_str(code) {
        FailureCode::SubmissionFailed => {
            "No charge. Check engine credentials and health; the user can resubmit."
        }
        FailureCode::InsufficientCredits => {
            "No charge. Lost a concurrent debit race; engine work was wasted. User needs to top up."
        }
        FailureCode::GenerationFailed => {
            "User was charged. Inspect error_message; refund manually if refunds are disabled."
        }
        FailureCode::PostprocessFailed => {
            "User was charged and the engine output exists. Check asset storage, then refund or re-fetch."
        }
        FailureCode::TimedOut => {
            "User was charged. Check engine status for external_job_ref; refund if it never finished."
        }
        FailureCode::Unknown => "Inspect error_message and logs.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_and_unknown_falls_back() {
        for code in [
            FailureCode::SubmissionFailed,
            FailureCode::InsufficientCredits,
            FailureCode::GenerationFailed,
            FailureCode::PostprocessFailed,
            FailureCode::TimedOut,
        ] {
            assert_eq!(FailureCode::from_str(code.as_str()), code);
        }
        assert_eq!(FailureCode::from_str("nope"), FailureCode::Unknown);
    }

    #[test]
    fn pre_debit_failures_are_not_charged() {
        assert!(!FailureCode::SubmissionFailed.follows_debit());
        assert!(!FailureCode::InsufficientCredits.follows_debit());
        assert!(FailureCode::PostprocessFailed.follows_debit());
    }
}
