//! Error types for transaction planning and assembly

use thiserror::Error;

use crate::schema::SchemaError;

#[derive(Error, Debug)]
pub enum TransactionBuilderError {
    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild {
        /// The program the instruction targets
        program: String,
        reason: String,
    },

    /// Instruction order violates a dependency between instructions
    ///
    /// Holding-account creation must precede every instruction that
    /// references the created account, and the request memo comes last.
    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    /// Wire serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A signature slot was filled by a key the message does not require
    #[error("Signer {signer} is not required by the message")]
    UnexpectedSigner { signer: String },

    /// Internal invariant violation or unexpected state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransactionBuilderError {
    /// Check if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InstructionBuild { .. } => false,
            Self::InvalidInstructionOrder(_) => false,
            Self::Serialization(_) => false,
            Self::UnexpectedSigner { .. } => false,
            Self::Internal(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::InstructionBuild { .. } => "instruction",
            Self::InvalidInstructionOrder(_) => "validation",
            Self::Serialization(_) => "serialization",
            Self::UnexpectedSigner { .. } => "signing",
            Self::Internal(_) => "internal",
        }
    }
}

// Convenience constructors for common error scenarios
impl TransactionBuilderError {
    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

impl From<SchemaError> for TransactionBuilderError {
    fn from(err: SchemaError) -> Self {
        Self::instruction_failed("schema", err.to_string())
    }
}
