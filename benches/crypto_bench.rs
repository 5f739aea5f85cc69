//! Cryptographic operation benchmarks.
//!
//! Measures the per-transaction cost of the crypto layer: link-secret
//! encryption, wallet signature verification, and the hybrid envelope.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use fips204::traits::{SerDes, Signer};

use gatelink::crypto::{
    HybridEncryptor, HybridKeypair, PeerKeys, SessionCipher, Verifier, SEED_SIZE,
};

fn bench_session_cipher_encrypt(c: &mut Criterion) {
    let cipher = SessionCipher::new("bench-secret");
    let plaintext = vec![0u8; 256]; // typical link payload size

    let mut group = c.benchmark_group("session_cipher_encrypt");
    group.throughput(Throughput::Bytes(256));
    group.bench_function("256_bytes", |b| {
        b.iter(|| black_box(cipher.encrypt(&plaintext)))
    });
    group.finish();
}

fn bench_session_cipher_decrypt(c: &mut Criterion) {
    let cipher = SessionCipher::new("bench-secret");
    let ciphertext = cipher.encrypt(&vec![0u8; 256]);

    let mut group = c.benchmark_group("session_cipher_decrypt");
    group.throughput(Throughput::Bytes(256));
    group.bench_function("256_bytes", |b| {
        b.iter(|| black_box(cipher.decrypt(&ciphertext).unwrap()))
    });
    group.finish();
}

fn bench_signature_verify(c: &mut Criterion) {
    let (pk, sk) = fips204::ml_dsa_87::try_keygen().unwrap();
    let verifier = Verifier::from_bundle_keys(&BASE64.encode(pk.into_bytes()), None).unwrap();

    let payload = SessionCipher::new("bench-secret").encrypt(&[0u8; 128]);
    let signature = sk.try_sign(&payload, &[]).unwrap();

    c.bench_function("ml_dsa_87_verify", |b| {
        b.iter(|| black_box(verifier.verify(payload.as_slice(), signature.as_slice())))
    });
}

fn bench_hybrid_keygen(c: &mut Criterion) {
    let seed = [0x42u8; SEED_SIZE];
    c.bench_function("hybrid_keygen_from_seed", |b| {
        b.iter(|| black_box(HybridKeypair::from_seed(&seed).unwrap()))
    });
}

fn bench_hybrid_encrypt(c: &mut Criterion) {
    let local = HybridKeypair::from_seed(&[0x01u8; SEED_SIZE]).unwrap();
    let peer = HybridKeypair::from_seed(&[0x02u8; SEED_SIZE]).unwrap();
    let peer_keys =
        PeerKeys::from_bytes(&peer.encapsulation_public_key(), &peer.signing_public_key()).unwrap();
    let encryptor = HybridEncryptor::new(local, peer_keys);
    let message = vec![0u8; 1024];

    let mut group = c.benchmark_group("hybrid_encrypt");
    group.throughput(Throughput::Bytes(1024));
    group.bench_function("1024_bytes", |b| {
        b.iter(|| black_box(encryptor.encrypt(&message).unwrap()))
    });
    group.finish();
}

fn bench_hybrid_roundtrip(c: &mut Criterion) {
    let alice = HybridKeypair::from_seed(&[0x01u8; SEED_SIZE]).unwrap();
    let bob = HybridKeypair::from_seed(&[0x02u8; SEED_SIZE]).unwrap();

    let bob_public =
        PeerKeys::from_bytes(&bob.encapsulation_public_key(), &bob.signing_public_key()).unwrap();
    let alice_public =
        PeerKeys::from_bytes(&alice.encapsulation_public_key(), &alice.signing_public_key())
            .unwrap();

    let sender = HybridEncryptor::new(alice, bob_public);
    let receiver = HybridEncryptor::new(bob, alice_public);
    let message = vec![0u8; 1024];

    c.bench_function("hybrid_roundtrip_1024_bytes", |b| {
        b.iter(|| {
            let envelope = sender.encrypt(&message).unwrap();
            black_box(receiver.decrypt(&envelope).unwrap())
        })
    });
}

criterion_group!(
    benches,
    bench_session_cipher_encrypt,
    bench_session_cipher_decrypt,
    bench_signature_verify,
    bench_hybrid_keygen,
    bench_hybrid_encrypt,
    bench_hybrid_roundtrip,
);

criterion_main!(benches);
