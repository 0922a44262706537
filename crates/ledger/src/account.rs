use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use creditgate_core::{AccountId, DomainError, DomainResult};

/// Balance reported to callers for accounts that are never debited.
pub const UNLIMITED_BALANCE: i64 = 999_999;

/// Role of an account inside the ledger.
///
/// Admins are never debited and may operate on other accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    User,
    Admin,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::User => "user",
            AccountRole::Admin => "admin",
        }
    }
}

impl core::str::FromStr for AccountRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(AccountRole::User),
            "admin" => Ok(AccountRole::Admin),
            other => Err(DomainError::validation(format!("unknown account role: {other}"))),
        }
    }
}

/// Consumable balance of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credits {
    /// Remaining credits (never negative).
    pub available: i64,
    /// Credits consumed over the account lifetime.
    pub used: i64,
}

/// Temporary (or indefinite) suspension of the dispatch path for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockState {
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    /// `None` means the block only ends when an operator lifts it.
    pub blocked_until: Option<DateTime<Utc>>,
}

impl BlockState {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        match self.blocked_until {
            Some(until) => now < until,
            None => true,
        }
    }
}

/// A credit account.
///
/// Mutated only through version-checked store writes; the methods here are the
/// pure state transitions those writes persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub role: AccountRole,
    pub credits: Credits,
    pub block: Option<BlockState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        id: AccountId,
        role: AccountRole,
        initial_credits: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if initial_credits < 0 {
            return Err(DomainError::validation("initial credits must not be negative"));
        }
        Ok(Self {
            id,
            role,
            credits: Credits {
                available: initial_credits,
                used: 0,
            },
            block: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == AccountRole::Admin
    }

    /// The block currently in force, ignoring expired ones.
    pub fn active_block(&self, now: DateTime<Utc>) -> Option<&BlockState> {
        self.block.as_ref().filter(|b| b.is_active_at(now))
    }

    /// Drop an expired block. Returns `true` if the account changed.
    pub fn clear_expired_block(&mut self, now: DateTime<Utc>) -> bool {
        match &self.block {
            Some(b) if !b.is_active_at(now) => {
                self.block = None;
                self.updated_at = now;
                true
            }
            _ => false,
        }
    }

    pub fn block_for(&mut self, reason: impl Into<String>, duration: Option<Duration>, now: DateTime<Utc>) {
        self.block = Some(BlockState {
            reason: reason.into(),
            blocked_at: now,
            blocked_until: duration.map(|d| now + d),
        });
        self.updated_at = now;
    }

    /// Lift any block. Returns `true` if there was one.
    pub fn unblock(&mut self, now: DateTime<Utc>) -> bool {
        if self.block.take().is_some() {
            self.updated_at = now;
            true
        } else {
            false
        }
    }

    /// Consume one credit.
    pub fn debit_one(&mut self, now: DateTime<Utc>) -> DomainResult<i64> {
        if self.credits.available <= 0 {
            return Err(DomainError::invariant("credits.available would go negative"));
        }
        self.credits.available -= 1;
        self.credits.used += 1;
        self.updated_at = now;
        Ok(self.credits.available)
    }

    /// Balance as reported to callers (admins are unlimited).
    pub fn reported_balance(&self) -> i64 {
        if self.is_admin() {
            UNLIMITED_BALANCE
        } else {
            self.credits.available
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(credits: i64) -> Account {
        Account::new(AccountId::new(), AccountRole::User, credits, Utc::now()).unwrap()
    }

    #[test]
    fn negative_initial_credits_are_rejected() {
        let err = Account::new(AccountId::new(), AccountRole::User, -1, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn debit_never_goes_below_zero() {
        let mut a = account(1);
        assert_eq!(a.debit_one(Utc::now()).unwrap(), 0);
        assert_eq!(a.credits.used, 1);
        assert!(matches!(a.debit_one(Utc::now()), Err(DomainError::Invariant(_))));
        assert_eq!(a.credits.available, 0);
    }

    #[test]
    fn expired_block_is_inactive_and_clearable() {
        let now = Utc::now();
        let mut a = account(3);
        a.block_for("burst", Some(Duration::minutes(10)), now - Duration::hours(1));

        assert!(a.active_block(now).is_none());
        assert!(a.clear_expired_block(now));
        assert!(a.block.is_none());
        assert!(!a.clear_expired_block(now));
    }

    #[test]
    fn indefinite_block_stays_active() {
        let now = Utc::now();
        let mut a = account(3);
        a.block_for("manual", None, now);

        assert!(a.active_block(now + Duration::days(365)).is_some());
        assert!(!a.clear_expired_block(now + Duration::days(365)));
        assert!(a.unblock(now));
    }

    #[test]
    fn admin_reports_unlimited_balance() {
        let a = Account::new(AccountId::new(), AccountRole::Admin, 0, Utc::now()).unwrap();
        assert_eq!(a.reported_balance(), UNLIMITED_BALANCE);
        assert_eq!("ADMIN".parse::<AccountRole>().unwrap(), AccountRole::Admin);
    }
}
