//! The per-room chip ledger: one pot and a balance per player name.
//!
//! All counts are unsigned, so "never negative" holds by construction; the
//! checks here make sure an operation that would underflow is refused
//! before anything changes. Every successful operation moves chips between
//! the pot and one balance, so `pot + Σ balances` only changes through
//! [`Ledger::seat`] or when chips move for a name with no tracked balance.

use std::collections::BTreeMap;

use chiphub_protocol::Action;

use crate::LedgerError;

/// Player name → chip balance.
pub type Balances = BTreeMap<String, u64>;

/// The result of an applied pot operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerUpdate {
    /// The pot after the operation.
    pub pot: u64,
    /// The actor's balance after the operation, if tracked.
    pub balance: Option<u64>,
}

/// Which way a pot operation moves chips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PotOp {
    /// Balance to pot.
    Add,
    /// Pot to balance.
    Retrieve,
}

impl PotOp {
    pub fn action(self) -> Action {
        match self {
            Self::Add => Action::AddPot,
            Self::Retrieve => Action::RetrievePot,
        }
    }

    /// Past-tense verb used in pot update messages.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Add => "bet",
            Self::Retrieve => "retrieved",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    pot: u64,
    balances: Balances,
}

impl Ledger {
    pub fn new(pot: u64, balances: Balances) -> Self {
        Self { pot, balances }
    }

    pub fn pot(&self) -> u64 {
        self.pot
    }

    pub fn balances(&self) -> &Balances {
        &self.balances
    }

    pub fn balance(&self, name: &str) -> Option<u64> {
        self.balances.get(name).copied()
    }

    /// `pot + Σ balances`, widened so it cannot overflow.
    pub fn total(&self) -> u128 {
        self.balances
            .values()
            .fold(u128::from(self.pot), |acc, b| acc + u128::from(*b))
    }

    /// Starts tracking `name` with `chips`. Returns `false` and changes
    /// nothing if the name already has a balance.
    pub fn seat(&mut self, name: &str, chips: u64) -> bool {
        if self.balances.contains_key(name) {
            return false;
        }
        self.balances.insert(name.to_string(), chips);
        true
    }

    /// Applies `op` for `name`.
    pub fn apply(
        &mut self,
        op: PotOp,
        name: &str,
        amount: i64,
    ) -> Result<LedgerUpdate, LedgerError> {
        match op {
            PotOp::Add => self.add_pot(name, amount),
            PotOp::Retrieve => self.retrieve_pot(name, amount),
        }
    }

    /// Moves `amount` from `name`'s balance into the pot.
    ///
    /// Names without a tracked balance contribute without a funds check.
    pub fn add_pot(
        &mut self,
        name: &str,
        amount: i64,
    ) -> Result<LedgerUpdate, LedgerError> {
        let amount = positive(amount)?;
        let pot = self.pot.checked_add(amount).ok_or(LedgerError::Overflow)?;

        let balance = match self.balances.get_mut(name) {
            Some(balance) if *balance < amount => {
                return Err(LedgerError::InsufficientBalance {
                    name: name.to_string(),
                    balance: *balance,
                    requested: amount,
                });
            }
            Some(balance) => {
                *balance -= amount;
                Some(*balance)
            }
            None => None,
        };
        self.pot = pot;

        Ok(LedgerUpdate {
            pot: self.pot,
            balance,
        })
    }

    /// Moves `amount` from the pot to `name`'s balance (if tracked).
    pub fn retrieve_pot(
        &mut self,
        name: &str,
        amount: i64,
    ) -> Result<LedgerUpdate, LedgerError> {
        let amount = positive(amount)?;
        if self.pot < amount {
            return Err(LedgerError::InsufficientPot {
                pot: self.pot,
                requested: amount,
            });
        }

        let balance = match self.balances.get_mut(name) {
            Some(balance) => {
                *balance =
                    balance.checked_add(amount).ok_or(LedgerError::Overflow)?;
                Some(*balance)
            }
            None => None,
        };
        self.pot -= amount;

        Ok(LedgerUpdate {
            pot: self.pot,
            balance,
        })
    }
}

fn positive(amount: i64) -> Result<u64, LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::NonPositiveAmount(amount));
    }
    Ok(amount as u64)
}
