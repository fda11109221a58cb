/// Transaction normalization.
///
/// Turns a mined transaction, its receipt and the enclosing header into a [`NormalizedTransaction`]:
/// recovered sender, destination, paid gas cost and, when the receipt holds a swap, the swapped
/// amounts and the pool address.
use ethers::types::{Transaction, TransactionReceipt, H160, H256, U256};
use log::{debug, warn};
use serde::Serialize;

use crate::common::abi::{EventKind, EventRegistry, SwapEvent};
use crate::common::errors::{DetectError, Result};
use crate::common::streams::BlockHeader;
use crate::sandwich::fees::{transaction_cost, FeeFields};

/// Stand-in recipient for contract-creation transactions.
pub const EMPTY_ADDRESS: H160 = H160([0u8; 20]);

/// Amounts moved through the pool by one swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwapAmounts {
    pub value_in: U256,
    pub value_out: U256,
}

/// A parsed on-chain transaction, scoped to one block's analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedTransaction {
    pub hash: H256,
    /// Address recovered from the signature.
    pub sender: H160,
    /// Destination, or [`EMPTY_ADDRESS`] for contract creation.
    pub recipient: H160,
    /// Pool identified through a companion transfer log. Best effort.
    pub token_pair: Option<H160>,
    /// `None` when the receipt holds no decodable swap log.
    pub swap: Option<SwapAmounts>,
    /// Fee actually paid, in wei.
    pub gas_cost: U256,
}

impl NormalizedTransaction {
    pub fn is_swap(&self) -> bool {
        self.swap.is_some()
    }

    pub fn value_in(&self) -> Option<U256> {
        self.swap.map(|s| s.value_in)
    }

    pub fn value_out(&self) -> Option<U256> {
        self.swap.map(|s| s.value_out)
    }
}

/// Chain-specific normalization parameters, built once and shared by reference.
#[derive(Debug, Clone)]
pub struct Normalizer {
    registry: EventRegistry,
    chain_id: U256,
}

impl Normalizer {
    pub fn new(registry: EventRegistry, chain_id: u64) -> Self {
        Self {
            registry,
            chain_id: U256::from(chain_id),
        }
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn chain_id(&self) -> U256 {
        self.chain_id
    }

    /// Normalizes one transaction.
    ///
    /// # Parameters
    /// * `tx`: &Transaction - The mined transaction.
    /// * `receipt`: &TransactionReceipt - Its receipt, fetched by the caller.
    /// * `header`: &BlockHeader - Header of the including block.
    ///
    /// # Returns
    /// * `Result<NormalizedTransaction>` - `SignatureRecovery` for an unverifiable signature,
    ///   `ReceiptUnavailable` for a receipt that does not belong to `tx`, `MalformedBlock` when the
    ///   fee fields violate the fee-market rules. A receipt without a swap is not an error.
    pub fn normalize(
        &self,
        tx: &Transaction,
        receipt: &TransactionReceipt,
        header: &BlockHeader,
    ) -> Result<NormalizedTransaction> {
        if receipt.transaction_hash != tx.hash {
            return Err(self.bad_receipt(header, tx.hash, "receipt belongs to another transaction"));
        }

        let sender = self.recover_sender(tx)?;
        let recipient = tx.to.unwrap_or(EMPTY_ADDRESS);

        let (swap, token_pair) = match self.find_swap(header, tx.hash, receipt) {
            Some(event) => {
                let (value_in, value_out) = event.directional_amounts();
                let amounts = SwapAmounts {
                    value_in,
                    value_out,
                };
                let pair = self.find_token_pair(header, tx.hash, receipt, &amounts);
                (Some(amounts), pair)
            }
            None => {
                debug!("[Block #{}] no swap in tx {:?}", header.number, tx.hash);
                (None, None)
            }
        };

        let gas_used = receipt
            .gas_used
            .ok_or_else(|| self.bad_receipt(header, tx.hash, "receipt has no gasUsed"))?;
        let fees = FeeFields::from_transaction(tx, header.number)?;
        let gas_cost = transaction_cost(gas_used, &fees, header)?;

        Ok(NormalizedTransaction {
            hash: tx.hash,
            sender,
            recipient,
            token_pair,
            swap,
            gas_cost,
        })
    }

    /// Recovers the signer, rejecting signatures bound to another chain.
    fn recover_sender(&self, tx: &Transaction) -> Result<H160> {
        let signature_error = |reason: String| DetectError::SignatureRecovery {
            tx_hash: tx.hash,
            reason,
        };

        let eip155_id = eip155_chain_id(tx);
        if let Some(chain_id) = tx.chain_id.or(eip155_id) {
            if chain_id != self.chain_id {
                return Err(signature_error(format!(
                    "signed for chain {chain_id}, expected {}",
                    self.chain_id
                )));
            }
        }

        // Legacy replay-protected transactions may arrive without an explicit chain id; the
        // sighash must still commit to it.
        let recovered = match (tx.chain_id, eip155_id) {
            (None, Some(chain_id)) => {
                let mut tx = tx.clone();
                tx.chain_id = Some(chain_id);
                tx.recover_from()
            }
            _ => tx.recover_from(),
        };
        recovered.map_err(|e| signature_error(e.to_string()))
    }

    fn find_swap(
        &self,
        header: &BlockHeader,
        tx_hash: H256,
        receipt: &TransactionReceipt,
    ) -> Option<SwapEvent> {
        for (index, log) in receipt.logs.iter().enumerate() {
            if self.registry.classify_log(log) != EventKind::Swap {
                continue;
            }
            match self.registry.decode_swap(log, index) {
                Ok(event) => return Some(event),
                Err(e) => warn!("[Block #{}] tx {:?}: {}", header.number, tx_hash, e),
            }
        }
        None
    }

    /// First transfer moving exactly the swapped in or out amount; its recipient is the pool.
    fn find_token_pair(
        &self,
        header: &BlockHeader,
        tx_hash: H256,
        receipt: &TransactionReceipt,
        amounts: &SwapAmounts,
    ) -> Option<H160> {
        for (index, log) in receipt.logs.iter().enumerate() {
            if self.registry.classify_log(log) != EventKind::Transfer {
                continue;
            }
            match self.registry.decode_transfer(log, index) {
                Ok(transfer)
                    if transfer.value == amounts.value_in || transfer.value == amounts.value_out =>
                {
                    return Some(transfer.to);
                }
                Ok(_) => {}
                // Non-fungible transfers share the topic but index a fourth field.
                Err(e) => debug!("[Block #{}] tx {:?}: {}", header.number, tx_hash, e),
            }
        }
        debug!(
            "[Block #{}] tx {:?}: swap without matching transfer",
            header.number, tx_hash
        );
        None
    }

    fn bad_receipt(&self, header: &BlockHeader, tx_hash: H256, reason: &str) -> DetectError {
        DetectError::ReceiptUnavailable {
            block: header.number,
            tx_hash,
            reason: reason.to_string(),
        }
    }
}

/// Chain id encoded in a legacy `v` value (`v = 2 * chain_id + 35 + parity`).
fn eip155_chain_id(tx: &Transaction) -> Option<U256> {
    let v = tx.v.as_u64();
    let is_legacy = tx.transaction_type.map_or(true, |ty| ty.is_zero());
    if is_legacy && v >= 35 {
        Some(U256::from((v - 35) / 2))
    } else {
        None
    }
}
