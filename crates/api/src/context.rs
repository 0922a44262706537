use creditgate_core::AccountId;

/// Authenticated caller for a request.
///
/// Derived from the bearer token only; privileges come from the stored
/// account role, never from the token.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    account_id: AccountId,
}

impl PrincipalContext {
    pub fn new(account_id: AccountId) -> Self {
        Self { account_id }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }
}
