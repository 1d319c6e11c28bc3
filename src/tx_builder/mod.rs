//! Transaction builder
//!
//! - **errors**: error taxonomy with retry classification
//! - **plan**: instruction planning and ordering validation
//! - **assembler**: blockhash fetch, message compilation, signature slots
//!
//! Holding-account creation always precedes the disbursement that pays into
//! it; assembly happens immediately before signing so the blockhash is as
//! fresh as possible.

pub mod assembler;
pub mod errors;
pub mod plan;

pub use assembler::{assemble_with_blockhash, AssembledTransaction, TransactionAssembler};
pub use errors::TransactionBuilderError;
pub use plan::{
    plan_disbursement, sanity_check_ix_order, DisbursementPlanInput, InstructionPlan,
    PlannedInstruction, PlannedKind,
};
