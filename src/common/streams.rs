/// Node access for the block scanner.
///
/// [`NodeClient`] is the seam between the detection engine and the chain: the websocket
/// `Provider<Ws>` implements it for production, tests substitute an in-memory node.
use async_trait::async_trait;
use ethers::{
    providers::{Middleware, Provider, Ws},
    types::{Block, BlockNumber, Transaction, TransactionReceipt, H256, U256, U64},
};
use futures::stream::{BoxStream, StreamExt};
use log::info;

use crate::common::errors::{DetectError, Result};

/// The slice of a block header the engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// The block number.
    pub number: u64,
    /// The base fee per gas; `None` before the fee market was activated.
    pub base_fee: Option<U256>,
}

impl BlockHeader {
    /// Extracts the header fields from a block. Pending blocks (no number) yield `None`.
    pub fn from_block<T>(block: &Block<T>) -> Option<Self> {
        block.number.map(|number| BlockHeader {
            number: number.as_u64(),
            base_fee: block.base_fee_per_gas,
        })
    }
}

/// Chain queries consumed by the scanner.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Header of the current chain head.
    async fn latest_header(&self) -> Result<BlockHeader>;

    /// Block with its full, ordered transaction list. `Ok(None)` if the node does not know it.
    async fn block_with_txs(&self, number: u64) -> Result<Option<Block<Transaction>>>;

    /// Execution receipt of a mined transaction. `Ok(None)` if the node has none.
    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>>;

    /// Stream of new chain heads. Transport hiccups surface as `Err` items; the stream ending means
    /// the subscription was dropped.
    async fn subscribe_new_heads(&self) -> Result<BoxStream<'_, Result<BlockHeader>>>;
}

/// Opens a websocket provider.
///
/// # Parameters
/// * `wss_url`: &str - Node websocket endpoint.
///
/// # Returns
/// * `Result<Provider<Ws>>` - Connected provider, or `Connection` error.
pub async fn connect(wss_url: &str) -> Result<Provider<Ws>> {
    let ws = Ws::connect(wss_url)
        .await
        .map_err(|e| DetectError::Connection(format!("{wss_url}: {e}")))?;
    info!("Connected to {}", wss_url);
    Ok(Provider::new(ws))
}

fn connection_error(e: impl std::fmt::Display) -> DetectError {
    DetectError::Connection(e.to_string())
}

#[async_trait]
impl NodeClient for Provider<Ws> {
    async fn latest_header(&self) -> Result<BlockHeader> {
        let block = self
            .get_block(BlockNumber::Latest)
            .await
            .map_err(connection_error)?
            .ok_or_else(|| DetectError::Connection("node returned no latest block".into()))?;
        BlockHeader::from_block(&block)
            .ok_or_else(|| DetectError::Connection("latest block has no number".into()))
    }

    async fn block_with_txs(&self, number: u64) -> Result<Option<Block<Transaction>>> {
        self.get_block_with_txs(U64::from(number))
            .await
            .map_err(connection_error)
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        self.get_transaction_receipt(hash)
            .await
            .map_err(connection_error)
    }

    async fn subscribe_new_heads(&self) -> Result<BoxStream<'_, Result<BlockHeader>>> {
        let stream = self.subscribe_blocks().await.map_err(|e| {
            DetectError::Connection(format!("failed to subscribe to blocks: {e}"))
        })?;
        info!("Subscribed to new block headers");

        Ok(stream
            .map(|block| {
                BlockHeader::from_block(&block).ok_or_else(|| {
                    DetectError::Connection(format!(
                        "header {:?} arrived without a block number",
                        block.hash
                    ))
                })
            })
            .boxed())
    }
}
