/// Event schema registry for the two log shapes the detector understands.
///
/// Holds the topic hashes of the constant-product `Swap` event and the ERC-20 `Transfer` event,
/// resolves raw receipt logs to an [`EventKind`] and decodes their bodies.
use ethers::abi::{self, AbiParser, Event, RawLog, Token};
use ethers::types::{Log, H160, H256, U256};
use ethers::utils::keccak256;

use crate::common::errors::{DetectError, Result};

/// Canonical signature of the constant-product pool `Swap` event.
pub const SWAP_EVENT_SIGNATURE: &str = "Swap(address,uint256,uint256,uint256,uint256,address)";
/// Canonical signature of the ERC-20 `Transfer` event.
pub const TRANSFER_EVENT_SIGNATURE: &str = "Transfer(address,address,uint256)";

const SWAP_EVENT_ABI: &str = "event Swap(address indexed sender, uint256 amount0In, uint256 amount1In, uint256 amount0Out, uint256 amount1Out, address indexed to)";
const TRANSFER_EVENT_ABI: &str =
    "event Transfer(address indexed from, address indexed to, uint256 value)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Swap,
    Transfer,
    Unknown,
}

/// Decoded body of a `Swap` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapEvent {
    pub sender: H160,
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
    pub to: H160,
}

impl SwapEvent {
    /// Returns `(value_in, value_out)` for the trade direction of this swap.
    ///
    /// A zero `amount0In` means token1 was sold for token0. Exactly one input side is expected to be
    /// non-zero per swap call on a constant-product pool.
    pub fn directional_amounts(&self) -> (U256, U256) {
        if self.amount0_in.is_zero() {
            (self.amount1_in, self.amount0_out)
        } else {
            (self.amount0_in, self.amount1_out)
        }
    }
}

/// Decoded body of a `Transfer` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: H160,
    pub to: H160,
    pub value: U256,
}

/// Immutable registry of recognised event schemas, built once at startup.
#[derive(Debug, Clone)]
pub struct EventRegistry {
    swap_topic: H256,
    transfer_topic: H256,
    swap: Event,
    transfer: Event,
}

impl EventRegistry {
    /// Parses the event ABIs and hashes their canonical signatures.
    ///
    /// # Returns
    /// * `Result<EventRegistry>` - `Config` error if the built-in ABIs fail to parse or disagree
    ///   with the canonical signatures.
    pub fn new() -> Result<Self> {
        let mut parser = AbiParser::default();
        let swap = parser
            .parse_event(SWAP_EVENT_ABI)
            .map_err(|e| DetectError::Config(format!("swap event ABI: {e}")))?;
        let transfer = parser
            .parse_event(TRANSFER_EVENT_ABI)
            .map_err(|e| DetectError::Config(format!("transfer event ABI: {e}")))?;

        let swap_topic = H256::from(keccak256(SWAP_EVENT_SIGNATURE));
        let transfer_topic = H256::from(keccak256(TRANSFER_EVENT_SIGNATURE));

        if swap.signature() != swap_topic || transfer.signature() != transfer_topic {
            return Err(DetectError::Config(
                "event ABI does not match canonical signature".to_string(),
            ));
        }

        Ok(Self {
            swap_topic,
            transfer_topic,
            swap,
            transfer,
        })
    }

    pub fn swap_topic(&self) -> H256 {
        self.swap_topic
    }

    pub fn transfer_topic(&self) -> H256 {
        self.transfer_topic
    }

    /// Resolves a first indexed topic to the event it identifies.
    pub fn classify(&self, topic0: &H256) -> EventKind {
        if *topic0 == self.swap_topic {
            EventKind::Swap
        } else if *topic0 == self.transfer_topic {
            EventKind::Transfer
        } else {
            EventKind::Unknown
        }
    }

    /// Resolves a log entry; logs without topics (anonymous events) are `Unknown`.
    pub fn classify_log(&self, log: &Log) -> EventKind {
        log.topics
            .first()
            .map_or(EventKind::Unknown, |topic0| self.classify(topic0))
    }

    /// Decodes a `Swap` log. `log_index` is the position within the receipt, used for error context.
    pub fn decode_swap(&self, log: &Log, log_index: usize) -> Result<SwapEvent> {
        let decoded = parse_raw(&self.swap, log, "Swap", log_index)?;
        let err = |field: &str| decode_error("Swap", log_index, format!("missing field {field}"));

        Ok(SwapEvent {
            sender: address_param(&decoded, "sender").ok_or_else(|| err("sender"))?,
            amount0_in: uint_param(&decoded, "amount0In").ok_or_else(|| err("amount0In"))?,
            amount1_in: uint_param(&decoded, "amount1In").ok_or_else(|| err("amount1In"))?,
            amount0_out: uint_param(&decoded, "amount0Out").ok_or_else(|| err("amount0Out"))?,
            amount1_out: uint_param(&decoded, "amount1Out").ok_or_else(|| err("amount1Out"))?,
            to: address_param(&decoded, "to").ok_or_else(|| err("to"))?,
        })
    }

    /// Decodes a `Transfer` log.
    pub fn decode_transfer(&self, log: &Log, log_index: usize) -> Result<TransferEvent> {
        let decoded = parse_raw(&self.transfer, log, "Transfer", log_index)?;
        let err =
            |field: &str| decode_error("Transfer", log_index, format!("missing field {field}"));

        Ok(TransferEvent {
            from: address_param(&decoded, "from").ok_or_else(|| err("from"))?,
            to: address_param(&decoded, "to").ok_or_else(|| err("to"))?,
            value: uint_param(&decoded, "value").ok_or_else(|| err("value"))?,
        })
    }
}

fn parse_raw(event: &Event, log: &Log, name: &'static str, log_index: usize) -> Result<abi::Log> {
    event
        .parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        })
        .map_err(|e| decode_error(name, log_index, e.to_string()))
}

fn decode_error(event: &'static str, log_index: usize, reason: String) -> DetectError {
    DetectError::EventDecode {
        event,
        log_index,
        reason,
    }
}

fn param(decoded: &abi::Log, name: &str) -> Option<Token> {
    decoded
        .params
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.value.clone())
}

fn uint_param(decoded: &abi::Log, name: &str) -> Option<U256> {
    param(decoded, name).and_then(Token::into_uint)
}

fn address_param(decoded: &abi::Log, name: &str) -> Option<H160> {
    param(decoded, name).and_then(Token::into_address)
}
