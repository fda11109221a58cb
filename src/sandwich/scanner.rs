/// Block scanner: drives normalization and correlation over a block range or over new heads.
///
/// One scan runs at a time per scanner. Cancellation is cooperative: the token is checked at block
/// boundaries and raced against every wait on the header stream or a backoff, so a block that is
/// already being scanned always finishes before the scanner reports `Cancelled`.
use ethers::types::{Transaction, TransactionReceipt, H256};
use futures::{future::try_join_all, StreamExt};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::common::abi::EventRegistry;
use crate::common::constants::{Env, RecordFormat, DEFAULT_SUBSCRIPTION_BACKOFF_SECS};
use crate::common::errors::{DetectError, Result};
use crate::common::sink::{format_finding, LogSink};
use crate::common::streams::{BlockHeader, NodeClient};
use crate::sandwich::correlator::{correlate, CorrelationPolicy, SandwichFinding};
use crate::sandwich::normalizer::Normalizer;

/// Immutable detection parameters shared by every block pass.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub normalizer: Normalizer,
    pub policy: CorrelationPolicy,
    pub record_format: RecordFormat,
    /// Transactions with empty calldata are not normalized and their receipts are not fetched.
    pub skip_plain_transfers: bool,
    /// Wait after a subscription transport error.
    pub subscription_backoff: Duration,
    /// Stop live detection after this many blocks; `None` runs until cancelled.
    pub max_live_blocks: Option<u64>,
}

impl DetectorConfig {
    /// Defaults for `chain_id`: permissive policy, text records, 2 s backoff.
    pub fn new(chain_id: u64) -> Result<Self> {
        Ok(Self {
            normalizer: Normalizer::new(EventRegistry::new()?, chain_id),
            policy: CorrelationPolicy::permissive(),
            record_format: RecordFormat::Text,
            skip_plain_transfers: true,
            subscription_backoff: Duration::from_secs(DEFAULT_SUBSCRIPTION_BACKOFF_SECS),
            max_live_blocks: None,
        })
    }

    /// Preset from `CORRELATION_POLICY`; `REQUIRE_TOKEN_PAIR` overrides it only when set.
    pub fn from_env(env: &Env) -> Result<Self> {
        let mut policy = CorrelationPolicy::from_preset(env.policy)
            .with_amount_tolerance(env.amount_tolerance_pct);
        if let Some(require) = env.require_token_pair {
            policy = policy.with_require_token_pair(require);
        }

        Ok(Self {
            policy,
            record_format: env.log_format,
            skip_plain_transfers: env.skip_plain_transfers,
            subscription_backoff: Duration::from_secs(env.subscription_backoff_secs),
            ..Self::new(env.chain_id)?
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Subscribed,
    ScanningRange { start: u64, end: u64 },
    Cancelled,
}

/// Outcome of one block pass.
#[derive(Debug, Clone)]
pub struct BlockReport {
    pub block_number: u64,
    pub transactions: usize,
    /// Normalized transactions carrying a swap.
    pub swaps: usize,
    /// Transactions dropped for transaction-local errors.
    pub skipped: usize,
    pub findings: Vec<SandwichFinding>,
}

/// Totals of a range or live run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Blocks attempted, including failed ones.
    pub blocks: u64,
    pub failed_blocks: u64,
    pub findings: usize,
}

impl ScanSummary {
    fn record(&mut self, report: &BlockReport) {
        self.blocks += 1;
        self.findings += report.findings.len();
    }

    fn record_failure(&mut self) {
        self.blocks += 1;
        self.failed_blocks += 1;
    }
}

pub struct BlockScanner<C> {
    client: Arc<C>,
    config: Arc<DetectorConfig>,
    sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
    state: Mutex<ScanState>,
}

impl<C: NodeClient> BlockScanner<C> {
    pub fn new(client: Arc<C>, config: Arc<DetectorConfig>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            client,
            config,
            sink,
            cancel: CancellationToken::new(),
            state: Mutex::new(ScanState::Idle),
        }
    }

    pub fn state(&self) -> ScanState {
        *self.state.lock()
    }

    /// Token observed by this scanner; cancelling it is equivalent to [`BlockScanner::stop`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests cooperative cancellation and returns immediately.
    pub fn stop(&self) {
        info!("Stop requested");
        self.cancel.cancel();
        let mut state = self.state.lock();
        if *state == ScanState::Idle {
            *state = ScanState::Cancelled;
        }
    }

    /// Scans blocks `start..=end`.
    ///
    /// # Returns
    /// * `Result<ScanSummary>` - `InvalidRange` before any block is fetched if the range is reversed
    ///   or beyond the chain head, the first block-level error otherwise, or `Cancelled`.
    pub async fn start_range_detection(&self, start: u64, end: u64) -> Result<ScanSummary> {
        self.enter(ScanState::ScanningRange { start, end })?;
        let result = self.scan_range(start, end).await;
        self.leave(&result);
        result
    }

    /// Follows new chain heads, scanning each block once, until cancelled or `max_live_blocks` is
    /// reached.
    pub async fn start_live_detection(&self) -> Result<ScanSummary> {
        self.enter(ScanState::Subscribed)?;
        let result = self.follow_heads().await;
        self.leave(&result);
        result
    }

    /// Runs one block pass and emits its findings to the sink.
    pub async fn scan_block(&self, number: u64) -> Result<BlockReport> {
        let block = self
            .client
            .block_with_txs(number)
            .await?
            .ok_or(DetectError::BlockUnavailable(number))?;
        let header = BlockHeader {
            number,
            base_fee: block.base_fee_per_gas,
        };

        let candidates: Vec<&Transaction> = block
            .transactions
            .iter()
            .filter(|tx| !(self.config.skip_plain_transfers && tx.input.is_empty()))
            .collect();

        let receipts = try_join_all(
            candidates
                .iter()
                .map(|tx| self.fetch_receipt(number, tx.hash)),
        )
        .await?;

        let mut normalized = Vec::with_capacity(candidates.len());
        let mut skipped = 0;
        for (tx, receipt) in candidates.iter().zip(receipts.iter()) {
            match self.config.normalizer.normalize(tx, receipt, &header) {
                Ok(record) => normalized.push(record),
                Err(e) if e.is_transaction_local() => {
                    warn!("[Block #{}] skipping tx {:?}: {}", number, tx.hash, e);
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let findings = correlate(number, &normalized, &self.config.policy);
        for finding in &findings {
            self.emit(finding);
        }

        let report = BlockReport {
            block_number: number,
            transactions: block.transactions.len(),
            swaps: normalized.iter().filter(|tx| tx.is_swap()).count(),
            skipped,
            findings,
        };
        info!(
            "[Block #{}] txs: {}, swaps: {}, skipped: {}, findings: {}",
            number,
            report.transactions,
            report.swaps,
            report.skipped,
            report.findings.len()
        );
        Ok(report)
    }

    async fn scan_range(&self, start: u64, end: u64) -> Result<ScanSummary> {
        validate_range(self.client.as_ref(), start, end).await?;

        info!("Scanning blocks {} to {}", start, end);
        let mut summary = ScanSummary::default();
        for number in start..=end {
            self.check_cancelled()?;
            match self.scan_block(number).await {
                Ok(report) => summary.record(&report),
                Err(e) => {
                    error!("[Block #{}] scan aborted: {}", number, e);
                    return Err(e);
                }
            }
        }
        self.check_cancelled()?;

        info!(
            "Finished blocks {} to {}: {} findings",
            start, end, summary.findings
        );
        Ok(summary)
    }

    async fn follow_heads(&self) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let mut heads = self.client.subscribe_new_heads().await?;
        info!("Started detecting sandwich attacks on new blocks...");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.cancelled(),
                next = heads.next() => next,
            };

            match next {
                Some(Ok(header)) => {
                    info!("Detected new block: {}", header.number);
                    match self.scan_block(header.number).await {
                        Ok(report) => summary.record(&report),
                        Err(e) => {
                            error!("[Block #{}] scan failed: {}", header.number, e);
                            summary.record_failure();
                        }
                    }
                    if self
                        .config
                        .max_live_blocks
                        .map_or(false, |max| summary.blocks >= max)
                    {
                        info!("Processed {} live blocks, stopping", summary.blocks);
                        return Ok(summary);
                    }
                }
                Some(Err(e)) => {
                    warn!(
                        "Subscription error: {}, trying again in {:?}",
                        e, self.config.subscription_backoff
                    );
                    self.backoff().await?;
                }
                None => {
                    warn!(
                        "Header stream ended, resubscribing in {:?}",
                        self.config.subscription_backoff
                    );
                    self.backoff().await?;
                    heads = self.client.subscribe_new_heads().await?;
                }
            }
        }
    }

    async fn fetch_receipt(&self, block: u64, tx_hash: H256) -> Result<TransactionReceipt> {
        let unavailable = |reason: String| DetectError::ReceiptUnavailable {
            block,
            tx_hash,
            reason,
        };
        match self.client.transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => Ok(receipt),
            Ok(None) => Err(unavailable("receipt not found".to_string())),
            Err(e) => Err(unavailable(e.to_string())),
        }
    }

    fn emit(&self, finding: &SandwichFinding) {
        info!(
            "[Block #{}] sandwich candidate: front {:?} victim {:?} back {:?}",
            finding.block_number, finding.front.hash, finding.victim.hash, finding.back.hash
        );
        let record = format_finding(finding, self.config.record_format);
        if let Err(e) = self.sink.append(record.as_bytes()) {
            error!(
                "[Block #{}] failed to write finding: {}",
                finding.block_number, e
            );
        }
    }

    async fn backoff(&self) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => self.cancelled(),
            _ = tokio::time::sleep(self.config.subscription_backoff) => Ok(()),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return self.cancelled();
        }
        Ok(())
    }

    fn cancelled<T>(&self) -> Result<T> {
        info!("Stopping detection...");
        Err(DetectError::Cancelled)
    }

    fn enter(&self, next: ScanState) -> Result<()> {
        let mut state = self.state.lock();
        if self.cancel.is_cancelled() {
            *state = ScanState::Cancelled;
            return Err(DetectError::Cancelled);
        }
        match *state {
            ScanState::Subscribed | ScanState::ScanningRange { .. } => Err(DetectError::Busy),
            _ => {
                *state = next;
                Ok(())
            }
        }
    }

    /// A `stop()` that lands after the last cancellation check leaves a completed scan `Idle`;
    /// the cancelled token still rejects the next start.
    fn leave<T>(&self, result: &Result<T>) {
        let mut state = self.state.lock();
        *state = if matches!(result, Err(DetectError::Cancelled)) {
            ScanState::Cancelled
        } else {
            ScanState::Idle
        };
    }
}

/// Checks that `start..=end` is a non-empty range of mined blocks.
///
/// # Returns
/// * `Result<()>` - `InvalidRange` if the range is reversed or ends beyond the chain head.
pub async fn validate_range<C>(client: &C, start: u64, end: u64) -> Result<()>
where
    C: NodeClient + ?Sized,
{
    let latest = client.latest_header().await?.number;
    if start > end || end > latest {
        let err = DetectError::InvalidRange { start, end, latest };
        error!("{}", err);
        return Err(err);
    }
    Ok(())
}
