/// Fee model: the gas cost a mined transaction actually paid.
use ethers::types::{Transaction, U256};

use crate::common::errors::{DetectError, Result};
use crate::common::streams::BlockHeader;

/// Transaction types priced against the block base fee.
const DYNAMIC_FEE_TYPES: [u64; 3] = [2, 3, 4];

/// Fee fields of a transaction, split by fee-market format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeFields {
    /// Fixed gas price (legacy and access-list transactions).
    Legacy { gas_price: U256 },
    /// Fee cap plus tip cap, priced against the block base fee.
    Dynamic {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl FeeFields {
    /// Reads the fee fields of `tx`.
    ///
    /// Dynamic-fee (2), blob (3) and set-code (4) transactions carry a fee cap and a tip cap;
    /// every other type, including chain-specific system types, is priced by `gasPrice`.
    pub fn from_transaction(tx: &Transaction, block: u64) -> Result<Self> {
        let is_dynamic = tx
            .transaction_type
            .map_or(false, |ty| DYNAMIC_FEE_TYPES.contains(&ty.as_u64()));

        if is_dynamic {
            match (tx.max_fee_per_gas, tx.max_priority_fee_per_gas) {
                (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) => Ok(FeeFields::Dynamic {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                }),
                _ => Err(malformed(
                    block,
                    format!("dynamic-fee tx {:?} is missing its fee caps", tx.hash),
                )),
            }
        } else {
            tx.gas_price
                .map(|gas_price| FeeFields::Legacy { gas_price })
                .ok_or_else(|| malformed(block, format!("tx {:?} has no gas price", tx.hash)))
        }
    }
}

/// Computes the fee paid for `gas_used` units of gas.
///
/// # Parameters
/// * `gas_used`: U256 - Gas used, as reported by the receipt.
/// * `fees`: &FeeFields - Fee fields of the transaction.
/// * `header`: &BlockHeader - Header of the including block.
///
/// # Returns
/// * `Result<U256>` - Cost in wei. `MalformedBlock` if the fee cap is below the base fee, a
///   dynamic-fee transaction sits in a block without a base fee, or the product overflows.
pub fn transaction_cost(gas_used: U256, fees: &FeeFields, header: &BlockHeader) -> Result<U256> {
    let per_gas = match *fees {
        FeeFields::Legacy { gas_price } => gas_price,
        FeeFields::Dynamic {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            let base_fee = header.base_fee.ok_or_else(|| {
                malformed(header.number, "dynamic-fee tx in a block without base fee".into())
            })?;
            let headroom = max_fee_per_gas.checked_sub(base_fee).ok_or_else(|| {
                malformed(
                    header.number,
                    format!("fee cap {max_fee_per_gas} below base fee {base_fee}"),
                )
            })?;
            let tip = headroom.min(max_priority_fee_per_gas);
            base_fee
                .checked_add(tip)
                .ok_or_else(|| malformed(header.number, "per-gas price overflow".into()))?
        }
    };

    per_gas
        .checked_mul(gas_used)
        .ok_or_else(|| malformed(header.number, "transaction cost overflow".into()))
}

fn malformed(block: u64, reason: String) -> DetectError {
    DetectError::MalformedBlock { block, reason }
}
