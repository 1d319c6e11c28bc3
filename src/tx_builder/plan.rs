//! Instruction planning and ordering validation
//!
//! A disbursement transaction is, in order:
//! 1. holding-account creation (only when the recipient has none)
//! 2. `bot_disburse_rewards`
//! 3. request memo (when enabled)

use std::collections::HashSet;

use solana_sdk::{instruction::Instruction, pubkey::Pubkey};

use crate::instructions;
use crate::pda::VaultAddresses;
use crate::schema::InstructionSchema;
use crate::tx_builder::errors::TransactionBuilderError;

/// Role of one planned instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedKind {
    /// Idempotent creation of `account`
    CreateAccount { account: Pubkey },
    /// Vault program call by schema name
    Program { name: String },
    Memo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedInstruction {
    pub kind: PlannedKind,
    pub instruction: Instruction,
}

/// Ordered instructions with their roles
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstructionPlan {
    steps: Vec<PlannedInstruction>,
}

impl InstructionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: PlannedKind, instruction: Instruction) -> &mut Self {
        self.steps.push(PlannedInstruction { kind, instruction });
        self
    }

    /// Plan containing a single program call
    pub fn single(name: impl Into<String>, instruction: Instruction) -> Self {
        let mut plan = Self::new();
        plan.push(PlannedKind::Program { name: name.into() }, instruction);
        plan
    }

    pub fn steps(&self) -> &[PlannedInstruction] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn instructions(&self) -> Vec<Instruction> {
        self.steps.iter().map(|s| s.instruction.clone()).collect()
    }

    /// Whether the plan creates a holding account
    pub fn creates_account(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.kind, PlannedKind::CreateAccount { .. }))
    }
}

/// Inputs for one disbursement transaction
#[derive(Debug, Clone)]
pub struct DisbursementPlanInput<'a> {
    pub bot: Pubkey,
    pub recipient_owner: Pubkey,
    pub recipient_account: Pubkey,
    pub create_recipient_account: bool,
    pub amount: u64,
    pub memo: Option<&'a str>,
}

/// Plan a disbursement with dependency-respecting order
pub fn plan_disbursement(
    schema: &InstructionSchema,
    addresses: &VaultAddresses,
    input: &DisbursementPlanInput<'_>,
) -> Result<InstructionPlan, TransactionBuilderError> {
    let mut plan = InstructionPlan::new();

    if input.create_recipient_account {
        plan.push(
            PlannedKind::CreateAccount {
                account: input.recipient_account,
            },
            instructions::create_holding_account(addresses, &input.bot, &input.recipient_owner),
        );
    }

    let disburse = instructions::disburse(
        schema,
        addresses,
        &input.bot,
        &input.recipient_account,
        input.amount,
    )?;
    plan.push(
        PlannedKind::Program {
            name: crate::schema::idl::DISBURSE.to_string(),
        },
        disburse,
    );

    if let Some(request_id) = input.memo {
        plan.push(PlannedKind::Memo, instructions::request_memo(request_id));
    }

    sanity_check_ix_order(&plan)?;
    Ok(plan)
}

/// Validate instruction ordering
///
/// # Errors
///
/// Returns `TransactionBuilderError::InvalidInstructionOrder` if:
/// - the plan is empty or has no program call
/// - an account is created after an instruction that references it
/// - an account is created twice
/// - a memo is not the final instruction, or appears more than once
pub fn sanity_check_ix_order(plan: &InstructionPlan) -> Result<(), TransactionBuilderError> {
    if plan.is_empty() {
        return Err(TransactionBuilderError::invalid_order(
            "Instruction list is empty",
        ));
    }

    let mut referenced: HashSet<Pubkey> = HashSet::new();
    let mut created: HashSet<Pubkey> = HashSet::new();
    let mut has_program_call = false;
    let last = plan.len() - 1;

    for (idx, step) in plan.steps().iter().enumerate() {
        match &step.kind {
            PlannedKind::CreateAccount { account } => {
                if referenced.contains(account) {
                    return Err(TransactionBuilderError::invalid_order(format!(
                        "Account {account} is created at position {idx} after being referenced"
                    )));
                }
                if !created.insert(*account) {
                    return Err(TransactionBuilderError::invalid_order(format!(
                        "Account {account} is created twice (second at position {idx})"
                    )));
                }
            }
            PlannedKind::Program { .. } => has_program_call = true,
            PlannedKind::Memo if idx != last => {
                return Err(TransactionBuilderError::invalid_order(format!(
                    "Memo must be the final instruction (found at position {idx})"
                )));
            }
            PlannedKind::Memo => {}
        }
        referenced.extend(step.instruction.accounts.iter().map(|meta| meta.pubkey));
    }

    if !has_program_call {
        return Err(TransactionBuilderError::invalid_order(
            "Plan has no program instruction",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (InstructionSchema, VaultAddresses, DisbursementPlanInput<'static>) {
        let addresses =
            VaultAddresses::derive(&Pubkey::new_unique(), &Pubkey::new_unique()).unwrap();
        let owner = Pubkey::new_unique();
        let input = DisbursementPlanInput {
            bot: Pubkey::new_unique(),
            recipient_owner: owner,
            recipient_account: addresses.holding_account(&owner).unwrap(),
            create_recipient_account: true,
            amount: 1_000_000_000,
            memo: Some("req-1"),
        };
        (InstructionSchema::builtin(), addresses, input)
    }

    #[test]
    fn test_create_precedes_disburse_precedes_memo() {
        let (schema, addresses, input) = fixture();
        let plan = plan_disbursement(&schema, &addresses, &input).unwrap();

        assert_eq!(plan.len(), 3);
        assert!(matches!(plan.steps()[0].kind, PlannedKind::CreateAccount { .. }));
        assert!(matches!(plan.steps()[1].kind, PlannedKind::Program { .. }));
        assert_eq!(plan.steps()[2].kind, PlannedKind::Memo);
        assert!(plan.creates_account());
    }

    #[test]
    fn test_existing_account_without_memo() {
        let (schema, addresses, mut input) = fixture();
        input.create_recipient_account = false;
        input.memo = None;
        let plan = plan_disbursement(&schema, &addresses, &input).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(!plan.creates_account());
    }

    #[test]
    fn test_create_after_use_rejected() {
        let (schema, addresses, input) = fixture();
        let good = plan_disbursement(&schema, &addresses, &input).unwrap();

        let mut bad = InstructionPlan::new();
        bad.push(good.steps()[1].kind.clone(), good.steps()[1].instruction.clone());
        bad.push(good.steps()[0].kind.clone(), good.steps()[0].instruction.clone());

        let err = sanity_check_ix_order(&bad).unwrap_err();
        assert!(matches!(err, TransactionBuilderError::InvalidInstructionOrder(_)));
    }

    #[test]
    fn test_memo_must_be_last() {
        let (schema, addresses, input) = fixture();
        let good = plan_disbursement(&schema, &addresses, &input).unwrap();

        let mut bad = InstructionPlan::new();
        bad.push(PlannedKind::Memo, instructions::request_memo("x"));
        bad.push(good.steps()[1].kind.clone(), good.steps()[1].instruction.clone());
        assert!(sanity_check_ix_order(&bad).is_err());
    }

    #[test]
    fn test_empty_and_memo_only_rejected() {
        assert!(sanity_check_ix_order(&InstructionPlan::new()).is_err());

        let mut memo_only = InstructionPlan::new();
        memo_only.push(PlannedKind::Memo, instructions::request_memo("x"));
        assert!(sanity_check_ix_order(&memo_only).is_err());
    }
}
