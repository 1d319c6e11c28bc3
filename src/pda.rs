//! Program-derived address derivation
//!
//! A program-derived address is `sha256(seeds || bump || program_id ||
//! "ProgramDerivedAddress")` for the highest bump whose digest is NOT a valid
//! ed25519 point, so no keypair can ever sign for it. The bump scan follows
//! the ledger runtime exactly (255 down to 1) so the result always matches
//! the remote program's own `find_program_address`.

use ed25519_dalek::VerifyingKey;
use serde::Serialize;
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Maximum number of seeds accepted by the runtime
pub const MAX_SEEDS: usize = 16;

/// Maximum length of a single seed in bytes
pub const MAX_SEED_LEN: usize = 32;

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Seed prefix of the vault configuration account
pub const CONFIG_SEED: &[u8] = b"config";

/// Seed prefix of the vault signing authority
pub const VAULT_SEED: &[u8] = b"vault";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
    #[error("derivation exhausted: no off-curve address for program {program_id}")]
    Exhausted { program_id: Pubkey },

    #[error("too many seeds: {0} (max {MAX_SEEDS})")]
    TooManySeeds(usize),

    #[error("seed {index} is {len} bytes (max {MAX_SEED_LEN})")]
    SeedTooLong { index: usize, len: usize },
}

/// Result of a derivation. Pure function of `seeds` and `program_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAddress {
    pub seeds: Vec<Vec<u8>>,
    pub program_id: Pubkey,
    pub address: Pubkey,
    pub bump: u8,
}

fn check_seeds(seeds: &[&[u8]]) -> Result<(), DerivationError> {
    // One slot is reserved for the bump
    if seeds.len() >= MAX_SEEDS {
        return Err(DerivationError::TooManySeeds(seeds.len()));
    }
    for (index, seed) in seeds.iter().enumerate() {
        if seed.len() > MAX_SEED_LEN {
            return Err(DerivationError::SeedTooLong {
                index,
                len: seed.len(),
            });
        }
    }
    Ok(())
}

/// Whether 32 bytes decompress to a point on the ed25519 curve
pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    VerifyingKey::from_bytes(bytes).is_ok()
}

/// Hash one candidate; `None` when the digest lands on the curve
pub fn create_program_address(seeds: &[&[u8]], bump: u8, program_id: &Pubkey) -> Option<Pubkey> {
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update([bump]);
    hasher.update(program_id.as_ref());
    hasher.update(PDA_MARKER);
    let digest: [u8; 32] = hasher.finalize().into();

    if is_on_curve(&digest) {
        None
    } else {
        Some(Pubkey::new_from_array(digest))
    }
}

/// Find the canonical (highest) bump and its address
pub fn derive(seeds: &[&[u8]], program_id: &Pubkey) -> Result<DerivedAddress, DerivationError> {
    check_seeds(seeds)?;

    for bump in (1..=u8::MAX).rev() {
        if let Some(address) = create_program_address(seeds, bump, program_id) {
            return Ok(DerivedAddress {
                seeds: seeds.iter().map(|s| s.to_vec()).collect(),
                program_id: *program_id,
                address,
                bump,
            });
        }
    }

    Err(DerivationError::Exhausted {
        program_id: *program_id,
    })
}

/// Holding account of `owner` for `mint` under the associated-token program
pub fn associated_token_address(
    owner: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> Result<DerivedAddress, DerivationError> {
    derive(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &spl_associated_token_account::id(),
    )
}

/// Every address the vault program needs, derived from program id and asset
#[derive(Debug, Clone, Serialize)]
pub struct VaultAddresses {
    #[serde(serialize_with = "ser_pubkey")]
    pub program_id: Pubkey,
    #[serde(serialize_with = "ser_pubkey")]
    pub asset: Pubkey,
    #[serde(serialize_with = "ser_pubkey")]
    pub config: Pubkey,
    pub config_bump: u8,
    #[serde(serialize_with = "ser_pubkey")]
    pub vault_authority: Pubkey,
    pub vault_authority_bump: u8,
    #[serde(serialize_with = "ser_pubkey")]
    pub vault_ata: Pubkey,
    #[serde(serialize_with = "ser_pubkey")]
    pub token_program: Pubkey,
}

fn ser_pubkey<S: serde::Serializer>(key: &Pubkey, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(key)
}

impl VaultAddresses {
    pub fn derive(program_id: &Pubkey, asset: &Pubkey) -> Result<Self, DerivationError> {
        let token_program = spl_token::id();
        let config = derive(&[CONFIG_SEED, asset.as_ref()], program_id)?;
        let vault_authority = derive(&[VAULT_SEED, asset.as_ref()], program_id)?;
        let vault_ata = associated_token_address(&vault_authority.address, asset, &token_program)?;

        Ok(Self {
            program_id: *program_id,
            asset: *asset,
            config: config.address,
            config_bump: config.bump,
            vault_authority: vault_authority.address,
            vault_authority_bump: vault_authority.bump,
            vault_ata: vault_ata.address,
            token_program,
        })
    }

    /// Holding account of `owner` for the vault's asset
    pub fn holding_account(&self, owner: &Pubkey) -> Result<Pubkey, DerivationError> {
        associated_token_address(owner, &self.asset, &self.token_program).map(|d| d.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn program() -> Pubkey {
        Pubkey::from_str("2zHmxdM1weXuEkL7q7R9romZsPNdTLPAHGEPjBFA4da5").unwrap()
    }

    fn asset() -> Pubkey {
        Pubkey::from_str("C2dp9NjivNUNpSkrFUejnSsNS6ydgMmDdo5oMmuSev9A").unwrap()
    }

    #[test]
    fn test_matches_runtime_derivation() {
        let asset = asset();
        let seeds: &[&[u8]] = &[CONFIG_SEED, asset.as_ref()];
        let ours = derive(seeds, &program()).unwrap();
        let (address, bump) = Pubkey::find_program_address(seeds, &program());
        assert_eq!(ours.address, address);
        assert_eq!(ours.bump, bump);
    }

    #[test]
    fn test_bump_is_canonical() {
        let asset = asset();
        let seeds: &[&[u8]] = &[VAULT_SEED, asset.as_ref()];
        let derived = derive(seeds, &program()).unwrap();

        // Every higher bump must land on the curve
        for bump in (derived.bump as u16 + 1)..=255 {
            assert!(create_program_address(seeds, bump as u8, &program()).is_none());
        }
        assert!(!is_on_curve(&derived.address.to_bytes()));
    }

    #[test]
    fn test_associated_token_address_matches_spl() {
        let owner = Pubkey::new_unique();
        let ours = associated_token_address(&owner, &asset(), &spl_token::id()).unwrap();
        let theirs =
            spl_associated_token_account::get_associated_token_address(&owner, &asset());
        assert_eq!(ours.address, theirs);
    }

    #[test]
    fn test_seed_limits() {
        let long = [7u8; 33];
        assert_eq!(
            derive(&[&long], &program()),
            Err(DerivationError::SeedTooLong { index: 0, len: 33 })
        );

        let seeds: Vec<&[u8]> = vec![b"s"; MAX_SEEDS];
        assert_eq!(
            derive(&seeds, &program()),
            Err(DerivationError::TooManySeeds(MAX_SEEDS))
        );
    }

    #[test]
    fn test_vault_addresses_are_stable() {
        let a = VaultAddresses::derive(&program(), &asset()).unwrap();
        let b = VaultAddresses::derive(&program(), &asset()).unwrap();
        assert_eq!(a.config, b.config);
        assert_eq!(a.vault_authority_bump, b.vault_authority_bump);
        assert_eq!(
            a.vault_ata,
            spl_associated_token_account::get_associated_token_address(
                &a.vault_authority,
                &asset()
            )
        );
    }

    proptest! {
        #[test]
        fn prop_derive_deterministic_and_canonical(
            seed in proptest::collection::vec(any::<u8>(), 0..32),
            program_bytes in any::<[u8; 32]>(),
        ) {
            let program_id = Pubkey::new_from_array(program_bytes);
            let first = derive(&[&seed], &program_id).unwrap();
            let second = derive(&[&seed], &program_id).unwrap();
            prop_assert_eq!(&first, &second);

            let (address, bump) = Pubkey::find_program_address(&[&seed], &program_id);
            prop_assert_eq!(first.address, address);
            prop_assert_eq!(first.bump, bump);
        }
    }
}
