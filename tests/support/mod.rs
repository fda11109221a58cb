#![allow(dead_code)]

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Block, Bytes, Eip1559TransactionRequest, Log, Transaction, TransactionReceipt,
    TransactionRequest, H160, H256, U256, U64,
};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use tokio_util::sync::CancellationToken;

use sandscan::common::abi::{SWAP_EVENT_SIGNATURE, TRANSFER_EVENT_SIGNATURE};
use sandscan::common::errors::{DetectError, Result};
use sandscan::common::sink::LogSink;
use sandscan::common::streams::{BlockHeader, NodeClient};

pub const SWAP_CALLDATA: [u8; 4] = [0x02, 0x2c, 0x0d, 0x9f];
pub const GAS_LIMIT: u64 = 300_000;

pub fn wallet(seed: u8) -> LocalWallet {
    LocalWallet::from_bytes(&[seed; 32]).unwrap()
}

pub fn addr(n: u64) -> H160 {
    H160::from_low_u64_be(n)
}

/// Signed dynamic-fee transaction.
pub fn eip1559_tx(
    wallet: &LocalWallet,
    to: Option<H160>,
    nonce: u64,
    max_fee: u64,
    tip: u64,
    chain_id: u64,
) -> Transaction {
    let mut request = Eip1559TransactionRequest::new()
        .from(wallet.address())
        .nonce(nonce)
        .gas(GAS_LIMIT)
        .value(U256::zero())
        .max_fee_per_gas(max_fee)
        .max_priority_fee_per_gas(tip)
        .data(SWAP_CALLDATA.to_vec())
        .chain_id(chain_id);
    if let Some(to) = to {
        request = request.to(to);
    }
    let typed: TypedTransaction = request.into();
    let sig = wallet.sign_transaction_sync(&typed).unwrap();

    Transaction {
        hash: typed.hash(&sig),
        nonce: U256::from(nonce),
        from: wallet.address(),
        to,
        value: U256::zero(),
        gas: U256::from(GAS_LIMIT),
        input: Bytes::from(SWAP_CALLDATA.to_vec()),
        v: U64::from(sig.v),
        r: sig.r,
        s: sig.s,
        transaction_type: Some(U64::from(2)),
        max_fee_per_gas: Some(U256::from(max_fee)),
        max_priority_fee_per_gas: Some(U256::from(tip)),
        chain_id: Some(U256::from(chain_id)),
        access_list: Some(Default::default()),
        ..Default::default()
    }
}

/// Signed replay-protected legacy transaction, delivered without an explicit chain id field.
pub fn legacy_tx(
    wallet: &LocalWallet,
    to: H160,
    nonce: u64,
    gas_price: u64,
    data: Vec<u8>,
) -> Transaction {
    let request = TransactionRequest::new()
        .from(wallet.address())
        .to(to)
        .nonce(nonce)
        .gas(GAS_LIMIT)
        .gas_price(gas_price)
        .value(U256::zero())
        .data(data.clone())
        .chain_id(1u64);
    let typed: TypedTransaction = request.into();
    let sig = wallet.sign_transaction_sync(&typed).unwrap();

    Transaction {
        hash: typed.hash(&sig),
        nonce: U256::from(nonce),
        from: wallet.address(),
        to: Some(to),
        value: U256::zero(),
        gas: U256::from(GAS_LIMIT),
        gas_price: Some(U256::from(gas_price)),
        input: Bytes::from(data),
        v: U64::from(sig.v),
        r: sig.r,
        s: sig.s,
        transaction_type: Some(U64::zero()),
        ..Default::default()
    }
}

fn topic(signature: &str) -> H256 {
    H256::from(ethers::utils::keccak256(signature))
}

/// Constant-product `Swap` log: `[amount0In, amount1In, amount0Out, amount1Out]`.
pub fn swap_log(pool: H160, amounts: [u64; 4]) -> Log {
    Log {
        address: pool,
        topics: vec![
            topic(SWAP_EVENT_SIGNATURE),
            H256::from(addr(0xdead)),
            H256::from(addr(0xbeef)),
        ],
        data: Bytes::from(encode(&amounts.map(|a| Token::Uint(U256::from(a))))),
        ..Default::default()
    }
}

pub fn transfer_log(token: H160, from: H160, to: H160, value: u64) -> Log {
    Log {
        address: token,
        topics: vec![topic(TRANSFER_EVENT_SIGNATURE), H256::from(from), H256::from(to)],
        data: Bytes::from(encode(&[Token::Uint(U256::from(value))])),
        ..Default::default()
    }
}

pub fn receipt(tx_hash: H256, gas_used: u64, logs: Vec<Log>) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: tx_hash,
        gas_used: Some(U256::from(gas_used)),
        status: Some(U64::from(1)),
        logs,
        ..Default::default()
    }
}

/// A swap receipt on `pool` selling `value_in` of token0 for `value_out` of token1.
pub fn swap_receipt(
    tx_hash: H256,
    pool: H160,
    value_in: u64,
    value_out: u64,
) -> TransactionReceipt {
    receipt(
        tx_hash,
        100_000,
        vec![
            transfer_log(addr(0x70), addr(0x99), pool, value_in),
            swap_log(pool, [value_in, 0, 0, value_out]),
        ],
    )
}

pub fn block(number: u64, base_fee: u64, transactions: Vec<Transaction>) -> Block<Transaction> {
    Block {
        number: Some(U64::from(number)),
        base_fee_per_gas: Some(U256::from(base_fee)),
        transactions,
        ..Default::default()
    }
}

/// Scripted header subscription.
pub struct HeadScript {
    pub items: Vec<Result<BlockHeader>>,
    /// End the stream after the items instead of idling.
    pub ends: bool,
}

/// In-memory node.
#[derive(Default)]
pub struct MockNode {
    pub latest: u64,
    pub blocks: HashMap<u64, Block<Transaction>>,
    pub receipts: HashMap<H256, TransactionReceipt>,
    pub subscriptions: Mutex<VecDeque<HeadScript>>,
    pub subscribe_calls: Mutex<usize>,
    pub fetched_blocks: Mutex<Vec<u64>>,
    /// Cancelled as soon as the first block is fetched.
    pub cancel_on_fetch: Mutex<Option<CancellationToken>>,
}

impl MockNode {
    pub fn with_blocks(blocks: Vec<(Block<Transaction>, Vec<TransactionReceipt>)>) -> Self {
        let mut node = MockNode::default();
        for (block, receipts) in blocks {
            let number = block.number.unwrap().as_u64();
            node.latest = node.latest.max(number);
            for receipt in receipts {
                node.receipts.insert(receipt.transaction_hash, receipt);
            }
            node.blocks.insert(number, block);
        }
        node
    }

    pub fn script_heads(&self, items: Vec<Result<BlockHeader>>, ends: bool) {
        self.subscriptions.lock().push_back(HeadScript { items, ends });
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn latest_header(&self) -> Result<BlockHeader> {
        Ok(BlockHeader {
            number: self.latest,
            base_fee: Some(U256::from(100)),
        })
    }

    async fn block_with_txs(&self, number: u64) -> Result<Option<Block<Transaction>>> {
        self.fetched_blocks.lock().push(number);
        if let Some(token) = self.cancel_on_fetch.lock().as_ref() {
            token.cancel();
        }
        Ok(self.blocks.get(&number).cloned())
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        Ok(self.receipts.get(&hash).cloned())
    }

    async fn subscribe_new_heads(&self) -> Result<BoxStream<'_, Result<BlockHeader>>> {
        *self.subscribe_calls.lock() += 1;
        match self.subscriptions.lock().pop_front() {
            Some(HeadScript { items, ends: true }) => Ok(stream::iter(items).boxed()),
            Some(HeadScript { items, ends: false }) => {
                Ok(stream::iter(items).chain(stream::pending()).boxed())
            }
            None => Err(DetectError::Connection("no more subscriptions".into())),
        }
    }
}

/// Sink collecting records in memory.
#[derive(Default)]
pub struct MemorySink {
    pub records: Mutex<Vec<String>>,
}

impl LogSink for MemorySink {
    fn append(&self, record: &[u8]) -> io::Result<()> {
        self.records
            .lock()
            .push(String::from_utf8_lossy(record).into_owned());
        Ok(())
    }
}

/// Sink whose writes always fail.
pub struct BrokenSink;

impl LogSink for BrokenSink {
    fn append(&self, _record: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "disk full"))
    }
}
