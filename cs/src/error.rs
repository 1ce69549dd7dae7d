//! ContextDoc error types

use thiserror::Error;

/// Errors from context document operations
#[derive(Debug, Error)]
pub enum DocError {
    #[error("Section {0} is out of range (max {max})", max = crate::MAX_SECTION)]
    SectionOutOfRange(u8),

    #[error("Section {0} has not been written")]
    MissingSection(u8),

    #[error("Claim has neither url nor source_ref: {content}")]
    UnsourcedClaim { content: String },

    #[error("Not a context document: missing '# Context Document' header")]
    NotAContextDocument,

    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsourced_claim_message() {
        let err = DocError::UnsourcedClaim {
            content: "the sky is green".to_string(),
        };
        assert!(err.to_string().contains("the sky is green"));
    }

    #[test]
    fn test_section_out_of_range_names_max() {
        let err = DocError::SectionOutOfRange(12);
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("8"));
    }
}
