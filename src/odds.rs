//! Outcome tables for fault injection.
//!
//! Each table has exactly [`TABLE_SIZE`] slots. A configured percentage is the
//! number of slots holding that outcome, so a uniform draw over the slots
//! realizes the percentages exactly in the long run.

use rand::Rng;
use thiserror::Error;

/// Number of slots in every outcome table.
pub const TABLE_SIZE: usize = 100;

/// Errors raised while building outcome tables.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OddsError {
    /// The create-action percentages add up to more than the table holds.
    #[error(
        "total of create action percentages must not be more than {TABLE_SIZE} \
         (duplicate: {duplicate}, too_many: {too_many}, non_index: {non_index})"
    )]
    ActionTotal {
        duplicate: u32,
        too_many: u32,
        non_index: u32,
    },

    /// The too-large percentage exceeds the table size.
    #[error("too_large percentage must not be more than {TABLE_SIZE} (got {0})")]
    TooLarge(u32),
}

/// Outcome of a single `create` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionOutcome {
    /// 200
    Ok,
    /// 409, duplicate document
    Conflict,
    /// 429
    TooManyRequests,
    /// 406, document rejected
    NotAcceptable,
}

impl ActionOutcome {
    /// HTTP-style status reported for this outcome.
    pub fn status(self) -> u16 {
        match self {
            ActionOutcome::Ok => 200,
            ActionOutcome::Conflict => 409,
            ActionOutcome::TooManyRequests => 429,
            ActionOutcome::NotAcceptable => 406,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ActionOutcome::Ok
    }
}

/// Outcome of a whole bulk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodOutcome {
    /// Request is processed normally.
    Ok,
    /// Request is rejected with 413 before the body is read.
    TooLarge,
}

impl MethodOutcome {
    pub fn status(self) -> u16 {
        match self {
            MethodOutcome::Ok => 200,
            MethodOutcome::TooLarge => 413,
        }
    }
}

/// A fixed table of outcomes sampled by uniform index.
#[derive(Debug, Clone)]
pub struct OddsTable<T> {
    slots: [T; TABLE_SIZE],
}

impl<T: Copy> OddsTable<T> {
    /// Pack `blocks` in order, then fill the remaining slots with `rest`.
    ///
    /// Callers check that the block sizes fit before calling.
    fn packed(blocks: &[(T, u32)], rest: T) -> Self {
        let mut slots = [rest; TABLE_SIZE];
        let mut n = 0;
        for &(outcome, count) in blocks {
            for slot in slots.iter_mut().skip(n).take(count as usize) {
                *slot = outcome;
            }
            n += count as usize;
        }
        Self { slots }
    }

    /// Draw one outcome.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        self.slots[rng.gen_range(0..TABLE_SIZE)]
    }

    /// The table contents in slot order.
    pub fn slots(&self) -> &[T] {
        &self.slots
    }
}

impl<T: Copy + PartialEq> OddsTable<T> {
    /// Number of slots holding `outcome`.
    pub fn count(&self, outcome: T) -> usize {
        self.slots.iter().filter(|&&s| s == outcome).count()
    }
}

/// Outcome table for `create` actions.
#[derive(Debug, Clone)]
pub struct ActionOdds(OddsTable<ActionOutcome>);

impl ActionOdds {
    /// Build the table from duplicate, too-many and non-index percentages.
    /// Whatever is left over is ok.
    pub fn new(duplicate: u32, too_many: u32, non_index: u32) -> Result<Self, OddsError> {
        let total = u64::from(duplicate) + u64::from(too_many) + u64::from(non_index);
        if total > TABLE_SIZE as u64 {
            return Err(OddsError::ActionTotal {
                duplicate,
                too_many,
                non_index,
            });
        }

        Ok(Self(OddsTable::packed(
            &[
                (ActionOutcome::Conflict, duplicate),
                (ActionOutcome::TooManyRequests, too_many),
                (ActionOutcome::NotAcceptable, non_index),
            ],
            ActionOutcome::Ok,
        )))
    }

    /// A table that always answers ok.
    pub fn always_ok() -> Self {
        Self(OddsTable::packed(&[], ActionOutcome::Ok))
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ActionOutcome {
        self.0.sample(rng)
    }

    pub fn table(&self) -> &OddsTable<ActionOutcome> {
        &self.0
    }
}

/// Outcome table for the bulk request as a whole.
#[derive(Debug, Clone)]
pub struct MethodOdds(OddsTable<MethodOutcome>);

impl MethodOdds {
    pub fn new(too_large: u32) -> Result<Self, OddsError> {
        if too_large as usize > TABLE_SIZE {
            return Err(OddsError::TooLarge(too_large));
        }

        Ok(Self(OddsTable::packed(
            &[(MethodOutcome::TooLarge, too_large)],
            MethodOutcome::Ok,
        )))
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> MethodOutcome {
        self.0.sample(rng)
    }

    pub fn table(&self) -> &OddsTable<MethodOutcome> {
        &self.0
    }
}
