/// Sandwich correlation over the normalized transactions of one block.
///
/// Every ordered triple `(front, victim, back)` of swap transactions is tested against a
/// [`CorrelationPolicy`]: the victim stage looks at `(front, victim)`, the back-run stage at the full
/// triple. Block order stands in for execution order. The search is cubic in the number of swaps,
/// which the block gas limit bounds.
use ethers::types::{U256, U512};
use itertools::Itertools;
use serde::Serialize;

use crate::common::constants::{PolicyPreset, DEFAULT_AMOUNT_TOLERANCE_PCT};
use crate::sandwich::normalizer::NormalizedTransaction;

/// A detected front-run / victim / back-run candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandwichFinding {
    pub block_number: u64,
    pub front: NormalizedTransaction,
    pub victim: NormalizedTransaction,
    pub back: NormalizedTransaction,
}

/// How the clauses of a [`Predicate`] combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    Any,
    All,
}

/// Conditions on the `(front, victim)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictimClause {
    DistinctHash,
    DistinctPair,
    SamePair,
    /// Front-run paid more gas than the victim.
    FrontGasAbove,
    DistinctSender,
}

/// Conditions on the `(front, victim, back)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackrunClause {
    /// Front and back differ.
    DistinctHash,
    SameSender,
    SameRecipient,
    SamePair,
    /// Back-run input lies within the tolerance band around the front-run output.
    AmountWithinTolerance,
    /// Back-run paid less gas than the victim.
    BackGasBelowVictim,
}

/// A named set of clauses joined by [`Match::Any`] or [`Match::All`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate<C> {
    pub mode: Match,
    pub clauses: Vec<C>,
}

impl<C: Copy> Predicate<C> {
    pub fn any(clauses: &[C]) -> Self {
        Self {
            mode: Match::Any,
            clauses: clauses.to_vec(),
        }
    }

    pub fn all(clauses: &[C]) -> Self {
        Self {
            mode: Match::All,
            clauses: clauses.to_vec(),
        }
    }

    /// An empty `Any` set holds for nothing, an empty `All` set for everything.
    fn holds(&self, mut eval: impl FnMut(C) -> bool) -> bool {
        match self.mode {
            Match::Any => self.clauses.iter().any(|c| eval(*c)),
            Match::All => self.clauses.iter().all(|c| eval(*c)),
        }
    }
}

/// Detection sensitivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationPolicy {
    pub victim: Predicate<VictimClause>,
    pub backrun: Predicate<BackrunClause>,
    /// Half-width of the amount band, in percent of the front-run output.
    pub amount_tolerance_pct: u64,
    /// Exclude swaps whose pool could not be identified.
    pub require_token_pair: bool,
}

impl CorrelationPolicy {
    /// Inclusive-OR filters of the production heuristic.
    pub fn permissive() -> Self {
        Self {
            victim: Predicate::any(&[
                VictimClause::DistinctHash,
                VictimClause::DistinctPair,
                VictimClause::FrontGasAbove,
            ]),
            backrun: Predicate::any(&[
                BackrunClause::DistinctHash,
                BackrunClause::SameSender,
                BackrunClause::SameRecipient,
                BackrunClause::SamePair,
                BackrunClause::AmountWithinTolerance,
                BackrunClause::BackGasBelowVictim,
            ]),
            amount_tolerance_pct: DEFAULT_AMOUNT_TOLERANCE_PCT,
            require_token_pair: false,
        }
    }

    /// Conventional conjunctive sandwich shape: one pool, one attacker distinct from the victim,
    /// gas ordering front > victim > back and a closely matching back-run amount.
    pub fn strict() -> Self {
        Self {
            victim: Predicate::all(&[
                VictimClause::SamePair,
                VictimClause::DistinctSender,
                VictimClause::FrontGasAbove,
            ]),
            backrun: Predicate::all(&[
                BackrunClause::SamePair,
                BackrunClause::SameSender,
                BackrunClause::AmountWithinTolerance,
                BackrunClause::BackGasBelowVictim,
            ]),
            amount_tolerance_pct: DEFAULT_AMOUNT_TOLERANCE_PCT,
            require_token_pair: true,
        }
    }

    pub fn from_preset(preset: PolicyPreset) -> Self {
        match preset {
            PolicyPreset::Permissive => Self::permissive(),
            PolicyPreset::Strict => Self::strict(),
        }
    }

    pub fn with_amount_tolerance(mut self, pct: u64) -> Self {
        self.amount_tolerance_pct = pct;
        self
    }

    pub fn with_require_token_pair(mut self, require: bool) -> Self {
        self.require_token_pair = require;
        self
    }

    fn victim_holds(&self, front: &NormalizedTransaction, victim: &NormalizedTransaction) -> bool {
        self.victim.holds(|clause| match clause {
            VictimClause::DistinctHash => front.hash != victim.hash,
            VictimClause::DistinctPair => front.token_pair != victim.token_pair,
            VictimClause::SamePair => front.token_pair == victim.token_pair,
            VictimClause::FrontGasAbove => front.gas_cost > victim.gas_cost,
            VictimClause::DistinctSender => front.sender != victim.sender,
        })
    }

    fn backrun_holds(
        &self,
        front: &NormalizedTransaction,
        victim: &NormalizedTransaction,
        back: &NormalizedTransaction,
    ) -> bool {
        self.backrun.holds(|clause| match clause {
            BackrunClause::DistinctHash => front.hash != back.hash,
            BackrunClause::SameSender => front.sender == back.sender,
            BackrunClause::SameRecipient => front.recipient == back.recipient,
            BackrunClause::SamePair => front.token_pair == back.token_pair,
            BackrunClause::AmountWithinTolerance => match (front.value_out(), back.value_in()) {
                (Some(out), Some(back_in)) => {
                    within_tolerance(out, back_in, self.amount_tolerance_pct)
                }
                _ => false,
            },
            BackrunClause::BackGasBelowVictim => back.gas_cost < victim.gas_cost,
        })
    }

    fn eligible(&self, tx: &NormalizedTransaction) -> bool {
        tx.is_swap() && (!self.require_token_pair || tx.token_pair.is_some())
    }
}

impl Default for CorrelationPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

/// `reference * (100 - pct) / 100 <= candidate <= reference * (100 + pct) / 100`, in integers.
pub fn within_tolerance(reference: U256, candidate: U256, pct: u64) -> bool {
    let reference = U512::from(reference);
    let candidate = U512::from(candidate);
    let lower = reference * U512::from(100u64.saturating_sub(pct)) / U512::from(100u64);
    let upper = reference * U512::from(100u64.saturating_add(pct)) / U512::from(100u64);
    lower <= candidate && candidate <= upper
}

/// Finds all sandwich candidates in one block.
///
/// # Parameters
/// * `block_number`: u64 - Block the transactions belong to.
/// * `transactions`: &[NormalizedTransaction] - The block's transactions, in block order. Records
///   without a swap are ignored.
/// * `policy`: &CorrelationPolicy - Filters to apply.
///
/// # Returns
/// * `Vec<SandwichFinding>` - Findings ordered by (front, victim, back) position.
pub fn correlate(
    block_number: u64,
    transactions: &[NormalizedTransaction],
    policy: &CorrelationPolicy,
) -> Vec<SandwichFinding> {
    let swaps: Vec<&NormalizedTransaction> =
        transactions.iter().filter(|tx| policy.eligible(tx)).collect();

    let mut findings = Vec::new();
    if swaps.len() < 3 {
        return findings;
    }

    for (i, j) in (0..swaps.len()).tuple_combinations() {
        let (front, victim) = (swaps[i], swaps[j]);
        if !policy.victim_holds(front, victim) {
            continue;
        }
        for back in &swaps[j + 1..] {
            if policy.backrun_holds(front, victim, back) {
                findings.push(SandwichFinding {
                    block_number,
                    front: front.clone(),
                    victim: victim.clone(),
                    back: (*back).clone(),
                });
            }
        }
    }
    findings
}
