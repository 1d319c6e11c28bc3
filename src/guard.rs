//! Client-side mirror of the vault's daily-limit state machine
//!
//! The remote program owns the counter: it resets `daily_disbursed` lazily
//! when it first processes a disbursement on a new UTC day, then checks
//! `daily_disbursed + amount <= daily_limit` atomically. The guard reproduces
//! that decision from a fresh snapshot so that requests the remote side is
//! guaranteed to reject never cost a round trip. It is advisory only: an
//! `Allow` never waives the remote check, and the guard never mutates state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::errors::{DisburseError, DisburseResult};
use crate::pda::VaultAddresses;
use crate::rpc::LedgerRpc;
use crate::schema::InstructionSchema;
use crate::types::VaultConfigAccount;

const SECONDS_PER_DAY: i64 = 86_400;

/// How many times a stale snapshot is re-fetched before giving up
pub const MAX_STALE_REFRESHES: u32 = 2;

/// UTC day number (days since the unix epoch) for a unix timestamp
pub fn epoch_day(unix_seconds: i64) -> i64 {
    unix_seconds.div_euclid(SECONDS_PER_DAY)
}

/// Source of the current UTC day
pub trait DayClock: Send + Sync {
    fn today(&self) -> i64;
}

/// Wall clock in UTC
#[derive(Debug, Default, Clone, Copy)]
pub struct UtcClock;

impl DayClock for UtcClock {
    fn today(&self) -> i64 {
        epoch_day(Utc::now().timestamp())
    }
}

/// One observation of the remote VaultConfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSnapshot {
    pub daily_limit: u64,
    pub daily_disbursed: u64,
    /// Remote day marker of the current accounting window
    pub window_start_day: i64,
    /// Local UTC day on which the snapshot was taken
    pub observed_day: i64,
    pub bot_authority: Pubkey,
    pub admin: Option<Pubkey>,
}

impl VaultSnapshot {
    pub fn from_account(account: &VaultConfigAccount, observed_day: i64) -> Self {
        Self {
            daily_limit: account.daily_limit,
            daily_disbursed: account.daily_disbursed,
            window_start_day: account.last_reset_day,
            observed_day,
            bot_authority: account.bot_authority,
            admin: account.admin,
        }
    }

    /// Cap the remote limit with a locally configured one
    pub fn with_local_cap(mut self, cap: Option<u64>) -> Self {
        if let Some(cap) = cap {
            self.daily_limit = self.daily_limit.min(cap);
        }
        self
    }

    /// Decide `amount` against this snapshot for `now_day`
    ///
    /// A window that started before `now_day` counts as already reset,
    /// exactly as the remote program will treat it. A window starting after
    /// `now_day` means the two sides disagree on the UTC day.
    pub fn check(&self, amount: u64, now_day: i64) -> DisburseResult<GuardDecision> {
        if self.observed_day < now_day {
            return Ok(GuardDecision::StaleWindow);
        }
        if self.window_start_day > now_day {
            return Err(DisburseError::DayBoundaryMismatch {
                remote_day: self.window_start_day,
                local_day: now_day,
            });
        }

        let disbursed = if self.window_start_day < now_day {
            0
        } else {
            self.daily_disbursed
        };
        let remaining = self.daily_limit.saturating_sub(disbursed);

        match disbursed.checked_add(amount) {
            Some(total) if total <= self.daily_limit => Ok(GuardDecision::Allow { remaining }),
            _ => Ok(GuardDecision::WouldExceed {
                remaining,
                limit: self.daily_limit,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Remaining allowance before this request
    Allow { remaining: u64 },
    WouldExceed { remaining: u64, limit: u64 },
    /// Snapshot predates the current UTC day; re-fetch before deciding
    StaleWindow,
}

/// Where snapshots come from
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, observed_day: i64) -> DisburseResult<VaultSnapshot>;
}

/// Reads the VaultConfig account through the ledger RPC
pub struct LedgerSnapshotSource {
    rpc: Arc<dyn LedgerRpc>,
    schema: Arc<InstructionSchema>,
    config_address: Pubkey,
}

impl LedgerSnapshotSource {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        schema: Arc<InstructionSchema>,
        addresses: &VaultAddresses,
    ) -> Self {
        Self {
            rpc,
            schema,
            config_address: addresses.config,
        }
    }
}

#[async_trait]
impl SnapshotSource for LedgerSnapshotSource {
    async fn fetch(&self, observed_day: i64) -> DisburseResult<VaultSnapshot> {
        let account = self
            .rpc
            .get_account_info(&self.config_address)
            .await?
            .ok_or_else(|| {
                DisburseError::configuration(format!(
                    "vault config account {} does not exist; run init-vault first",
                    self.config_address
                ))
            })?;

        let config = VaultConfigAccount::decode(&self.schema, &account.data)?;
        Ok(VaultSnapshot::from_account(&config, observed_day))
    }
}

/// Authorization guard
pub struct AuthorizationGuard {
    source: Arc<dyn SnapshotSource>,
    clock: Arc<dyn DayClock>,
    local_cap: Option<u64>,
}

impl AuthorizationGuard {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        clock: Arc<dyn DayClock>,
        local_cap: Option<u64>,
    ) -> Self {
        Self {
            source,
            clock,
            local_cap,
        }
    }

    /// Fetch a fresh snapshot and decide; re-fetches while the window is stale
    ///
    /// Returns the snapshot the decision was made on so callers can check
    /// the bot identity against it.
    pub async fn evaluate(&self, amount: u64) -> DisburseResult<(GuardDecision, VaultSnapshot)> {
        let mut refreshes = 0;
        loop {
            let observed_day = self.clock.today();
            let snapshot = self
                .source
                .fetch(observed_day)
                .await?
                .with_local_cap(self.local_cap);
            // The day may roll between fetch and decision
            let now_day = self.clock.today();

            match snapshot.check(amount, now_day)? {
                GuardDecision::StaleWindow if refreshes < MAX_STALE_REFRESHES => {
                    refreshes += 1;
                    debug!(
                        observed_day = snapshot.observed_day,
                        now_day, refreshes, "Vault snapshot predates current day, refreshing"
                    );
                }
                GuardDecision::StaleWindow => {
                    warn!(
                        observed_day = snapshot.observed_day,
                        now_day, "Vault window still stale"
                    );
                    return Err(DisburseError::GuardWindowStale {
                        observed_day: snapshot.observed_day,
                        now_day,
                    });
                }
                decision => return Ok((decision, snapshot)),
            }
        }
    }

    /// `evaluate`, mapping `WouldExceed` to [`DisburseError::RateLimitWouldExceed`]
    pub async fn authorize(&self, amount: u64) -> DisburseResult<VaultSnapshot> {
        match self.evaluate(amount).await? {
            (GuardDecision::Allow { remaining }, snapshot) => {
                debug!(amount, remaining, "Guard allowed disbursement");
                Ok(snapshot)
            }
            (GuardDecision::WouldExceed { remaining, limit }, _) => {
                Err(DisburseError::RateLimitWouldExceed {
                    requested: amount,
                    remaining,
                    limit,
                })
            }
            (GuardDecision::StaleWindow, snapshot) => Err(DisburseError::GuardWindowStale {
                observed_day: snapshot.observed_day,
                now_day: self.clock.today(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

    const DAY: i64 = 20_000;

    fn snapshot(limit: u64, disbursed: u64, window: i64, observed: i64) -> VaultSnapshot {
        VaultSnapshot {
            daily_limit: limit,
            daily_disbursed: disbursed,
            window_start_day: window,
            observed_day: observed,
            bot_authority: Pubkey::new_unique(),
            admin: None,
        }
    }

    struct StepClock(AtomicI64);

    impl DayClock for StepClock {
        fn today(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Returns a fixed snapshot, re-stamped with the caller's observation day
    /// unless `frozen_observed` pins it
    struct ScriptedSource {
        snapshot: VaultSnapshot,
        frozen_observed: Option<i64>,
        fetches: AtomicU32,
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn fetch(&self, observed_day: i64) -> DisburseResult<VaultSnapshot> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut snapshot = self.snapshot.clone();
            snapshot.observed_day = self.frozen_observed.unwrap_or(observed_day);
            Ok(snapshot)
        }
    }

    fn guard(source: Arc<ScriptedSource>, day: i64, cap: Option<u64>) -> AuthorizationGuard {
        AuthorizationGuard::new(source, Arc::new(StepClock(AtomicI64::new(day))), cap)
    }

    #[test]
    fn test_allow_iff_within_limit() {
        let s = snapshot(100, 60, DAY, DAY);
        assert_eq!(s.check(40, DAY).unwrap(), GuardDecision::Allow { remaining: 40 });
        assert_eq!(
            s.check(41, DAY).unwrap(),
            GuardDecision::WouldExceed {
                remaining: 40,
                limit: 100
            }
        );
    }

    #[test]
    fn test_overflowing_amount_would_exceed() {
        let s = snapshot(u64::MAX, 1, DAY, DAY);
        assert!(matches!(
            s.check(u64::MAX, DAY).unwrap(),
            GuardDecision::WouldExceed { .. }
        ));
    }

    #[test]
    fn test_rolled_window_counts_as_reset() {
        // Remote has not processed anything today yet
        let s = snapshot(100, 100, DAY - 1, DAY);
        assert_eq!(s.check(100, DAY).unwrap(), GuardDecision::Allow { remaining: 100 });
    }

    #[test]
    fn test_stale_observation() {
        let s = snapshot(100, 0, DAY - 1, DAY - 1);
        assert_eq!(s.check(1, DAY).unwrap(), GuardDecision::StaleWindow);
    }

    #[test]
    fn test_future_window_is_boundary_mismatch() {
        let s = snapshot(100, 0, DAY + 1, DAY);
        assert!(matches!(
            s.check(1, DAY),
            Err(DisburseError::DayBoundaryMismatch {
                remote_day,
                local_day
            }) if remote_day == DAY + 1 && local_day == DAY
        ));
    }

    #[test]
    fn test_local_cap_lowers_limit() {
        let s = snapshot(1_000, 0, DAY, DAY).with_local_cap(Some(10));
        assert_eq!(s.daily_limit, 10);
        let s = snapshot(5, 0, DAY, DAY).with_local_cap(Some(10));
        assert_eq!(s.daily_limit, 5);
    }

    #[test]
    fn test_epoch_day_is_utc_aligned() {
        assert_eq!(epoch_day(0), 0);
        assert_eq!(epoch_day(86_399), 0);
        assert_eq!(epoch_day(86_400), 1);
        assert_eq!(epoch_day(-1), -1);
    }

    #[tokio::test]
    async fn test_authorize_maps_would_exceed() {
        let source = Arc::new(ScriptedSource {
            snapshot: snapshot(10_000_000_000_000, 9_999_999_999_999, DAY, DAY),
            frozen_observed: None,
            fetches: AtomicU32::new(0),
        });
        let err = guard(source, DAY, None).authorize(2).await.unwrap_err();
        assert!(matches!(
            err,
            DisburseError::RateLimitWouldExceed {
                requested: 2,
                remaining: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stale_window_refetches_then_fails() {
        let source = Arc::new(ScriptedSource {
            snapshot: snapshot(100, 0, DAY - 1, DAY - 1),
            frozen_observed: Some(DAY - 1),
            fetches: AtomicU32::new(0),
        });
        let err = guard(source.clone(), DAY, None).evaluate(1).await.unwrap_err();
        assert!(matches!(err, DisburseError::GuardWindowStale { .. }));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1 + MAX_STALE_REFRESHES);
    }

    #[tokio::test]
    async fn test_fresh_fetch_after_rollover_allows() {
        let source = Arc::new(ScriptedSource {
            snapshot: snapshot(100, 100, DAY - 1, DAY),
            frozen_observed: None,
            fetches: AtomicU32::new(0),
        });
        let (decision, _) = guard(source.clone(), DAY, None).evaluate(50).await.unwrap();
        assert_eq!(decision, GuardDecision::Allow { remaining: 100 });
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }
}
