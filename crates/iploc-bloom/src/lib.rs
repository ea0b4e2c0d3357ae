//! Bloom filter for prefix and id membership
//!
//! Used three ways by iploc:
//! - `locationsSeen`: dedups location ids while the index is built
//! - `ipPrefixSeen`: records every 2- and 3-octet key prefix so a lookup can
//!   skip prefix-scoped scans that cannot succeed
//! - `visitedKeys`: per-lookup record of keys already containment-tested
//!
//! Only additions are supported. A filter never answers `false` for a key
//! that was added.
//!
//! # Encoding
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Header (32 bytes, little-endian)   │
//! │   Magic: "IPBF" (4 bytes)          │
//! │   Version: u16                     │
//! │   Reserved: u16                    │
//! │   Bit count: u64                   │
//! │   Hash count: u32                  │
//! │   Item count: u64                  │
//! │   CRC32 of bit words: u32          │
//! ├────────────────────────────────────┤
//! │ Bit words: [u64; ceil(bits / 64)]  │
//! └────────────────────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```
//! use iploc_bloom::BloomFilter;
//!
//! let mut filter = BloomFilter::new(1000, 0.01);
//! filter.add(b"::ffff:62.227.4.");
//! assert!(filter.has(b"::ffff:62.227.4."));
//!
//! let restored = BloomFilter::from_bytes(&filter.to_bytes()).unwrap();
//! assert!(restored.has(b"::ffff:62.227.4."));
//! ```

use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64_with_seed;

const MAGIC: &[u8; 4] = b"IPBF";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 32;

const SEED_H1: u64 = 0;
const SEED_H2: u64 = 0x517c_c1b7_2722_0a95;

/// Errors decoding a persisted filter
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BloomError {
    /// Blob shorter than its header or declared bit words
    #[error("Truncated bloom filter: {0} bytes")]
    Truncated(usize),

    /// Not a bloom filter blob
    #[error("Bad bloom filter magic")]
    BadMagic,

    /// Written by an incompatible encoder
    #[error("Unsupported bloom filter version: {0}")]
    UnsupportedVersion(u16),

    /// Bit words do not match the stored checksum
    #[error("Bloom filter checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    Checksum { expected: u32, actual: u32 },

    /// Header fields inconsistent with each other
    #[error("Corrupt bloom filter header: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, BloomError>;

/// Bloom filter using double hashing (Kirsch-Mitzenmacker) over xxh3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    items: u64,
}

impl BloomFilter {
    /// Create a filter sized for `expected_items` at `fp_rate`
    ///
    /// `m = -n * ln(p) / (ln 2)^2` bits and `k = (m / n) * ln 2` hashes.
    pub fn new(expected_items: usize, fp_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = fp_rate.clamp(1e-10, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).ceil().clamp(1.0, 30.0) as u32;

        Self {
            bits: vec![0u64; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
            items: 0,
        }
    }

    /// Add a key
    pub fn add(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let idx = self.bit_index(h1, h2, i);
            self.bits[(idx / 64) as usize] |= 1u64 << (idx % 64);
        }
        self.items += 1;
    }

    /// Check a key; `false` means it was definitely never added
    pub fn has(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        (0..self.num_hashes).all(|i| {
            let idx = self.bit_index(h1, h2, i);
            self.bits[(idx / 64) as usize] & (1u64 << (idx % 64)) != 0
        })
    }

    /// Number of `add` calls, duplicates included
    pub fn len(&self) -> u64 {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    pub fn bit_len(&self) -> u64 {
        self.num_bits
    }

    pub fn hash_count(&self) -> u32 {
        self.num_hashes
    }

    /// Approximate size of the bit array in bytes
    pub fn size_bytes(&self) -> usize {
        self.bits.len() * 8
    }

    /// False-positive rate expected at the current fill
    pub fn estimated_fp_rate(&self) -> f64 {
        let k = self.num_hashes as f64;
        let fill = 1.0 - (-(k * self.items as f64) / self.num_bits as f64).exp();
        fill.powf(k)
    }

    /// Serialize header and bit words
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.bits.len() * 8);
        for word in &self.bits {
            body.extend_from_slice(&word.to_le_bytes());
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&self.items.to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        buf.extend_from_slice(&body);
        buf
    }

    /// Deserialize a blob written by [`BloomFilter::to_bytes`]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(BloomError::Truncated(data.len()));
        }
        if &data[0..4] != MAGIC {
            return Err(BloomError::BadMagic);
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != VERSION {
            return Err(BloomError::UnsupportedVersion(version));
        }

        let num_bits = read_u64(&data[8..16]);
        let num_hashes = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
        let items = read_u64(&data[20..28]);
        let expected = u32::from_le_bytes([data[28], data[29], data[30], data[31]]);

        if num_bits == 0 || num_hashes == 0 {
            return Err(BloomError::Corrupt(format!(
                "{} bits, {} hashes",
                num_bits, num_hashes
            )));
        }

        let body = &data[HEADER_LEN..];
        let words = num_bits.div_ceil(64) as usize;
        if body.len() != words * 8 {
            return Err(BloomError::Truncated(data.len()));
        }

        let actual = crc32fast::hash(body);
        if actual != expected {
            return Err(BloomError::Checksum { expected, actual });
        }

        let bits = body.chunks_exact(8).map(read_u64).collect();
        Ok(Self {
            bits,
            num_bits,
            num_hashes,
            items,
        })
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }
}

fn hash_pair(key: &[u8]) -> (u64, u64) {
    // Odd h2 keeps the probe sequence from collapsing onto one bit
    (
        xxh3_64_with_seed(key, SEED_H1),
        xxh3_64_with_seed(key, SEED_H2) | 1,
    )
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bloom_basic() {
        let mut bf = BloomFilter::new(1000, 0.01);
        bf.add(b"::ffff:77.22.56.");
        bf.add(b"::ffff:77.22.");

        assert!(bf.has(b"::ffff:77.22.56."));
        assert!(bf.has(b"::ffff:77.22."));
        assert_eq!(bf.len(), 2);
    }

    #[test]
    fn test_bloom_empty() {
        let bf = BloomFilter::new(100, 0.01);
        assert!(bf.is_empty());
        assert!(!bf.has(b"anything"));
    }

    #[test]
    fn test_bloom_sizing() {
        // ~9.6 bits per item and 7 hashes at 1%
        let bf = BloomFilter::new(10_000, 0.01);
        assert!(bf.bit_len() >= 95_000 && bf.bit_len() <= 97_000);
        assert_eq!(bf.hash_count(), 7);

        // Production prefix filter stays within tens of MB
        let big = BloomFilter::new(5_634_792, 0.001);
        assert!(big.size_bytes() < 16 * 1024 * 1024);
    }

    #[test]
    fn test_no_false_negatives() {
        let n = 20_000;
        let mut bf = BloomFilter::new(n, 0.001);
        for i in 0..n {
            bf.add(format!("::ffff:{}.{}.", i / 256, i % 256).as_bytes());
        }
        for i in 0..n {
            assert!(bf.has(format!("::ffff:{}.{}.", i / 256, i % 256).as_bytes()));
        }
    }

    #[test]
    fn test_false_positive_rate() {
        let n = 10_000;
        let mut bf = BloomFilter::new(n, 0.01);
        for i in 0..n {
            bf.add(&(i as u64).to_le_bytes());
        }

        let trials = 20_000;
        let false_positives = (n..n + trials)
            .filter(|i| bf.has(&(*i as u64).to_le_bytes()))
            .count();
        let rate = false_positives as f64 / trials as f64;
        assert!(rate < 0.02, "FP rate too high: {:.4}", rate);
        assert!(bf.estimated_fp_rate() < 0.015);
    }

    #[test]
    fn test_serialize_roundtrip_preserves_membership() {
        let mut bf = BloomFilter::new(500, 0.001);
        for i in 0..500u32 {
            bf.add(&i.to_be_bytes());
        }

        let restored = BloomFilter::from_bytes(&bf.to_bytes()).unwrap();
        assert_eq!(restored, bf);
        assert!((0..500u32).all(|i| restored.has(&i.to_be_bytes())));
    }

    #[test]
    fn test_from_bytes_rejects_damage() {
        let mut bf = BloomFilter::new(100, 0.01);
        bf.add(b"key");
        let bytes = bf.to_bytes();

        assert_eq!(
            BloomFilter::from_bytes(&bytes[..10]),
            Err(BloomError::Truncated(10))
        );
        assert!(matches!(
            BloomFilter::from_bytes(&bytes[..bytes.len() - 1]),
            Err(BloomError::Truncated(_))
        ));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert_eq!(BloomFilter::from_bytes(&bad_magic), Err(BloomError::BadMagic));

        let mut bad_version = bytes.clone();
        bad_version[4] = 9;
        assert_eq!(
            BloomFilter::from_bytes(&bad_version),
            Err(BloomError::UnsupportedVersion(9))
        );

        let mut flipped = bytes.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0x01;
        assert!(matches!(
            BloomFilter::from_bytes(&flipped),
            Err(BloomError::Checksum { .. })
        ));
    }
}
