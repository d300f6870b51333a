use std::collections::HashSet;
use tree_verifier::{fingerprint, Fingerprint};

#[test]
fn test_fingerprint_is_deterministic() {
    let samples: Vec<Vec<u8>> = vec![
        Vec::new(),
        b"tree".to_vec(),
        vec![0u8; 4096],
        (0..=255u8).cycle().take(10_000).collect(),
    ];

    for bytes in &samples {
        let first = fingerprint(bytes);
        let second = fingerprint(bytes);
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), Fingerprint::HEX_LEN);
        assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}

#[test]
fn test_known_digest() {
    assert_eq!(
        fingerprint(b"abc").as_str(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn test_no_collisions_across_corpus() {
    let mut seen = HashSet::new();
    let mut corpus: Vec<Vec<u8>> = Vec::new();

    // Single-byte flips of a fake JPEG header plus growing buffers
    let base: Vec<u8> = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
    for i in 0..base.len() {
        for bit in 0..8 {
            let mut flipped = base.clone();
            flipped[i] ^= 1 << bit;
            corpus.push(flipped);
        }
    }
    corpus.push(base);
    for len in 0..256 {
        corpus.push(vec![0xAB; len]);
    }

    for bytes in &corpus {
        assert!(
            seen.insert(fingerprint(bytes)),
            "Collision for input of {} bytes",
            bytes.len()
        );
    }
    assert_eq!(seen.len(), corpus.len());
}

#[test]
fn test_fingerprint_serializes_as_plain_string() {
    let digest = fingerprint(b"");
    let json = serde_json::to_string(&digest).unwrap();
    assert_eq!(json, format!("\"{}\"", digest));
}
