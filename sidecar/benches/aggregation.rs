// Aggregation engine benchmarks: proof construction and the pairing-check
// verification path, over a mid-sized validator set.

use criterion::{criterion_group, criterion_main, Criterion};
use sidecar::aggregation::AggregationScheme;
use sidecar::crypto::{BLSSecretKey, Hash};
use sidecar::types::{
    Address, KeyTag, SetStatus, SignatureExtended, SignatureRequest, ValidatorSet, Validator,
    VaultStake,
};
use std::collections::BTreeMap;

const VALIDATORS: usize = 20;

fn build_fixture() -> (ValidatorSet, Vec<SignatureExtended>, Hash) {
    let request = SignatureRequest::new(KeyTag::Bls, 1, b"benchmark header".to_vec());
    let message_hash = request.message_hash();

    let mut validators = Vec::new();
    let mut signatures = Vec::new();
    for i in 0..VALIDATORS {
        let secret = BLSSecretKey::generate();
        let operator = Address::new([(i + 1) as u8; 20]);
        let mut keys = BTreeMap::new();
        keys.insert(KeyTag::Bls, secret.public_key().to_bytes());
        validators.push(Validator {
            operator,
            voting_power: 100,
            is_active: true,
            keys,
            vaults: vec![VaultStake {
                vault: operator,
                voting_power: 100,
            }],
        });
        signatures.push(SignatureExtended {
            message_hash,
            signature: secret.sign(message_hash.as_bytes()).to_bytes(),
            public_key: secret.public_key().to_bytes(),
        });
    }

    let set = ValidatorSet {
        epoch: 1,
        validators,
        quorum_threshold: 100 * (VALIDATORS as u128) * 2 / 3,
        required_key_tag: KeyTag::Bls,
        previous_header_hash: Hash::zero(),
        status: SetStatus::Committed,
    };
    (set, signatures, message_hash)
}

fn bench_aggregate(c: &mut Criterion) {
    let scheme = AggregationScheme::bls();
    let (set, signatures, message_hash) = build_fixture();

    c.bench_function("aggregate_20_validators", |b| {
        b.iter(|| {
            scheme
                .aggregate(&set, KeyTag::Bls, &message_hash, &signatures)
                .unwrap()
        })
    });
}

fn bench_verify(c: &mut Criterion) {
    let scheme = AggregationScheme::bls();
    let (set, signatures, message_hash) = build_fixture();
    let proof = scheme
        .aggregate(&set, KeyTag::Bls, &message_hash, &signatures)
        .unwrap();

    c.bench_function("verify_20_validators", |b| {
        b.iter(|| scheme.verify(&set, KeyTag::Bls, &proof).unwrap())
    });
}

criterion_group!(benches, bench_aggregate, bench_verify);
criterion_main!(benches);
