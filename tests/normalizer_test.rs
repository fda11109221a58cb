mod support;

use ethers::signers::Signer;
use ethers::types::{Bytes, Log, U256};
use sandscan::common::abi::EventRegistry;
use sandscan::common::errors::DetectError;
use sandscan::common::streams::BlockHeader;
use sandscan::sandwich::normalizer::{Normalizer, SwapAmounts, EMPTY_ADDRESS};
use support::*;

fn normalizer() -> Normalizer {
    Normalizer::new(EventRegistry::new().unwrap(), 1)
}

fn header() -> BlockHeader {
    BlockHeader {
        number: 19_000_000,
        base_fee: Some(U256::from(100)),
    }
}

#[test]
fn swap_with_matching_transfer_resolves_pair() {
    let signer = wallet(1);
    let pool = addr(0x500);
    let tx = eip1559_tx(&signer, Some(addr(0x7a)), 0, 150, 20, 1);
    let receipt = swap_receipt(tx.hash, pool, 1000, 990);

    let record = normalizer().normalize(&tx, &receipt, &header()).unwrap();

    assert_eq!(record.hash, tx.hash);
    assert_eq!(record.sender, signer.address());
    assert_eq!(record.recipient, addr(0x7a));
    assert_eq!(record.token_pair, Some(pool));
    assert_eq!(
        record.swap,
        Some(SwapAmounts {
            value_in: U256::from(1000),
            value_out: U256::from(990),
        })
    );
    // (100 + min(50, 20)) * 100_000
    assert_eq!(record.gas_cost, U256::from(12_000_000u64));
}

#[test]
fn token1_to_token0_swap_reads_opposite_fields() {
    let tx = eip1559_tx(&wallet(2), Some(addr(0x7a)), 0, 150, 20, 1);
    let pool = addr(0x501);
    let receipt = receipt(
        tx.hash,
        50_000,
        vec![
            transfer_log(addr(0x71), addr(0x99), pool, 400),
            swap_log(pool, [0, 400, 380, 0]),
        ],
    );

    let record = normalizer().normalize(&tx, &receipt, &header()).unwrap();
    assert_eq!(record.value_in(), Some(U256::from(400)));
    assert_eq!(record.value_out(), Some(U256::from(380)));
    assert_eq!(record.token_pair, Some(pool));
}

#[test]
fn receipt_without_swap_is_not_an_error() {
    let tx = eip1559_tx(&wallet(3), Some(addr(0x7a)), 0, 150, 20, 1);
    let receipt = receipt(
        tx.hash,
        21_000,
        vec![transfer_log(addr(0x71), addr(0x1), addr(0x2), 5)],
    );

    let record = normalizer().normalize(&tx, &receipt, &header()).unwrap();
    assert!(!record.is_swap());
    assert_eq!(record.value_in(), None);
    assert_eq!(record.value_out(), None);
    assert_eq!(record.token_pair, None);
    assert_eq!(record.gas_cost, U256::from(120u64 * 21_000));
}

#[test]
fn swap_without_matching_transfer_leaves_pair_unset() {
    let tx = eip1559_tx(&wallet(4), Some(addr(0x7a)), 0, 150, 20, 1);
    let receipt = receipt(
        tx.hash,
        50_000,
        vec![
            transfer_log(addr(0x71), addr(0x99), addr(0x502), 7),
            swap_log(addr(0x502), [1000, 0, 0, 990]),
        ],
    );

    let record = normalizer().normalize(&tx, &receipt, &header()).unwrap();
    assert!(record.is_swap());
    assert_eq!(record.token_pair, None);
}

#[test]
fn first_matching_transfer_after_swap_names_the_pool() {
    let tx = eip1559_tx(&wallet(13), Some(addr(0x7a)), 0, 150, 20, 1);
    let receipt = receipt(
        tx.hash,
        50_000,
        vec![
            swap_log(addr(0x600), [1000, 0, 0, 990]),
            transfer_log(addr(0x72), addr(0x600), addr(0x600), 990),
            transfer_log(addr(0x71), addr(0x99), addr(0x601), 1000),
        ],
    );

    let record = normalizer().normalize(&tx, &receipt, &header()).unwrap();
    assert_eq!(record.token_pair, Some(addr(0x600)));
}

#[test]
fn non_matching_transfers_are_passed_over() {
    let tx = eip1559_tx(&wallet(14), Some(addr(0x7a)), 0, 150, 20, 1);
    let receipt = receipt(
        tx.hash,
        50_000,
        vec![
            transfer_log(addr(0x73), addr(0x99), addr(0x610), 5),
            swap_log(addr(0x611), [1000, 0, 0, 990]),
            transfer_log(addr(0x71), addr(0x99), addr(0x611), 1000),
        ],
    );

    let record = normalizer().normalize(&tx, &receipt, &header()).unwrap();
    assert_eq!(record.token_pair, Some(addr(0x611)));
}

#[test]
fn undecodable_swap_log_is_skipped_for_the_next_one() {
    let tx = eip1559_tx(&wallet(5), Some(addr(0x7a)), 0, 150, 20, 1);
    let mut broken = swap_log(addr(0x503), [1, 0, 0, 1]);
    broken.data = Bytes::from(vec![0u8; 16]);
    let receipt = receipt(
        tx.hash,
        50_000,
        vec![broken, swap_log(addr(0x503), [800, 0, 0, 760])],
    );

    let record = normalizer().normalize(&tx, &receipt, &header()).unwrap();
    assert_eq!(record.value_in(), Some(U256::from(800)));
    assert_eq!(record.value_out(), Some(U256::from(760)));
}

#[test]
fn unknown_and_anonymous_logs_are_ignored() {
    let tx = eip1559_tx(&wallet(6), Some(addr(0x7a)), 0, 150, 20, 1);
    let receipt = receipt(
        tx.hash,
        50_000,
        vec![Log::default(), swap_log(addr(0x504), [10, 0, 0, 9])],
    );

    let record = normalizer().normalize(&tx, &receipt, &header()).unwrap();
    assert!(record.is_swap());
}

#[test]
fn contract_creation_uses_empty_address() {
    let tx = eip1559_tx(&wallet(7), None, 0, 150, 20, 1);
    let receipt = receipt(tx.hash, 500_000, vec![]);

    let record = normalizer().normalize(&tx, &receipt, &header()).unwrap();
    assert_eq!(record.recipient, EMPTY_ADDRESS);
}

#[test]
fn legacy_replay_protected_sender_is_recovered() {
    let signer = wallet(8);
    let tx = legacy_tx(&signer, addr(0x7a), 3, 80, SWAP_CALLDATA.to_vec());
    assert!(tx.chain_id.is_none());
    let receipt = swap_receipt(tx.hash, addr(0x505), 1000, 990);

    let record = normalizer().normalize(&tx, &receipt, &header()).unwrap();
    assert_eq!(record.sender, signer.address());
    assert_eq!(record.gas_cost, U256::from(80u64 * 100_000));
}

#[test]
fn signature_for_another_chain_is_rejected() {
    let tx = eip1559_tx(&wallet(9), Some(addr(0x7a)), 0, 150, 20, 5);
    let receipt = swap_receipt(tx.hash, addr(0x506), 1000, 990);

    let err = normalizer().normalize(&tx, &receipt, &header()).unwrap_err();
    assert!(matches!(err, DetectError::SignatureRecovery { tx_hash, .. } if tx_hash == tx.hash));
    assert!(err.is_transaction_local());
}

#[test]
fn malformed_signature_is_rejected() {
    let mut tx = eip1559_tx(&wallet(10), Some(addr(0x7a)), 0, 150, 20, 1);
    tx.r = U256::zero();
    tx.s = U256::zero();
    let receipt = swap_receipt(tx.hash, addr(0x507), 1000, 990);

    let err = normalizer().normalize(&tx, &receipt, &header()).unwrap_err();
    assert!(matches!(err, DetectError::SignatureRecovery { .. }));
}

#[test]
fn receipt_of_another_transaction_is_rejected() {
    let tx = eip1559_tx(&wallet(11), Some(addr(0x7a)), 0, 150, 20, 1);
    let other = eip1559_tx(&wallet(11), Some(addr(0x7a)), 1, 150, 20, 1);
    let receipt = swap_receipt(other.hash, addr(0x508), 1000, 990);

    let err = normalizer().normalize(&tx, &receipt, &header()).unwrap_err();
    assert!(matches!(err, DetectError::ReceiptUnavailable { .. }));
    assert!(!err.is_transaction_local());
}

#[test]
fn fee_cap_below_base_fee_is_a_malformed_block() {
    let tx = eip1559_tx(&wallet(12), Some(addr(0x7a)), 0, 90, 20, 1);
    let receipt = swap_receipt(tx.hash, addr(0x509), 1000, 990);

    let err = normalizer().normalize(&tx, &receipt, &header()).unwrap_err();
    assert!(matches!(err, DetectError::MalformedBlock { block: 19_000_000, .. }));
}
