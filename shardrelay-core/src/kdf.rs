//! Key derivation hierarchy
//!
//! Every key in the system is produced by one HKDF-SHA-256 primitive with a
//! fixed `info` context:
//!
//! ```text
//! secret ──HKDF(salt="", info="src", 8)────────► SRC
//! secret ──HKDF(salt=SRC, info="sign", 32)─────► SIGN ──fan("signs")─────► SIGNS[0..=n]
//! secret ──HKDF(salt=SRC, info="encrypt", 32)──► ENCRYPT ──fan("encrypts")► ENCRYPTS[0..=n]
//! ```
//!
//! Fan entries use `label || i` as context, so every node gets a distinct
//! key. Entry 0 is the owner key used for end-to-end integrity checks.

use crate::crypto::{SymmetricKey, KEY_SIZE};
use crate::error::{Result, ShardRelayError};
use ring::hkdf;
use std::fmt;

/// SRC size (8 bytes)
pub const SRC_SIZE: usize = 8;

/// Largest output a single HKDF-SHA-256 expand can produce
pub const MAX_DERIVE_LEN: usize = 255 * 32;

/// Fan labels
pub const ENCRYPTS_LABEL: &str = "encrypts";
pub const SIGNS_LABEL: &str = "signs";
pub const LOGIN_ENCRYPTS_LABEL: &str = "login-encrypts";
pub const LOGIN_SIGNS_LABEL: &str = "login-signs";

const SRC_INFO: &[u8] = b"src";
const SIGN_INFO: &[u8] = b"sign";
const ENCRYPT_INFO: &[u8] = b"encrypt";
const SHARD_LABEL: &str = "shard";

struct OutputLen(usize);

impl hkdf::KeyType for OutputLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-SHA-256 extract-and-expand.
///
/// Pure and reproducible: identical inputs always give identical output.
pub fn derive(secret: &[u8], salt: &[u8], output_len: usize, info: &[u8]) -> Result<Vec<u8>> {
    if output_len == 0 || output_len > MAX_DERIVE_LEN {
        return Err(ShardRelayError::KeyDerivation(format!(
            "invalid output length {}",
            output_len
        )));
    }

    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(secret);
    let info = [info];
    let okm = prk
        .expand(&info, OutputLen(output_len))
        .map_err(|_| ShardRelayError::KeyDerivation("HKDF expand failed".to_string()))?;

    let mut out = vec![0u8; output_len];
    okm.fill(&mut out)
        .map_err(|_| ShardRelayError::KeyDerivation("HKDF fill failed".to_string()))?;
    Ok(out)
}

/// Derive a 32-byte key
pub fn derive_key(secret: &[u8], salt: &[u8], info: &[u8]) -> Result<SymmetricKey> {
    let bytes = derive(secret, salt, KEY_SIZE, info)?;
    SymmetricKey::from_slice(&bytes)
}

/// Subkey used to seal exactly one shard under a node key
pub fn shard_key(node_key: &SymmetricKey, src: &Src, index: usize) -> Result<SymmetricKey> {
    let info = format!("{}{}", SHARD_LABEL, index);
    derive_key(node_key.as_bytes(), src.as_bytes(), info.as_bytes())
}

/// Short deterministic identity derived from a root secret.
///
/// Doubles as the store lookup key and as salt/nonce seed for every later
/// derivation under that identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Src([u8; SRC_SIZE]);

impl Src {
    /// Derive the SRC of a root secret
    pub fn derive(secret: &[u8]) -> Result<Self> {
        let bytes = derive(secret, &[], SRC_SIZE, SRC_INFO)?;
        Self::from_slice(&bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; SRC_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != SRC_SIZE {
            return Err(ShardRelayError::InvalidKeyLength {
                expected: SRC_SIZE,
                actual: slice.len(),
            });
        }
        let mut src = [0u8; SRC_SIZE];
        src.copy_from_slice(slice);
        Ok(Self(src))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; SRC_SIZE] {
        &self.0
    }

    /// Decimal-digit-concatenated form, e.g. `[1, 23, 4, ..]` -> `"1234.."`
    pub fn lookup_key(&self) -> String {
        self.0.iter().map(|b| b.to_string()).collect()
    }
}

impl fmt::Debug for Src {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Src({})", self.lookup_key())
    }
}

impl fmt::Display for Src {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lookup_key())
    }
}

/// Ordered keys derived from one base key: owner key at 0, node keys at 1..=n
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyFan {
    keys: Vec<SymmetricKey>,
}

impl KeyFan {
    /// Derive `nodes + 1` keys from `base`, using `label || i` as context
    pub fn derive(base: &SymmetricKey, src: &Src, label: &str, nodes: usize) -> Result<Self> {
        let keys = (0..=nodes)
            .map(|i| {
                let info = format!("{}{}", label, i);
                derive_key(base.as_bytes(), src.as_bytes(), info.as_bytes())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { keys })
    }

    /// Derive one key per key-agreement output, entry `i` from `shared[i]`
    pub fn from_agreements(shared: &[[u8; KEY_SIZE]], src: &Src, label: &str) -> Result<Self> {
        let keys = shared
            .iter()
            .enumerate()
            .map(|(i, secret)| {
                let info = format!("{}{}", label, i);
                derive_key(secret, src.as_bytes(), info.as_bytes())
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_keys(keys)
    }

    /// Wrap an existing key list (must contain the owner key)
    pub fn from_keys(keys: Vec<SymmetricKey>) -> Result<Self> {
        if keys.is_empty() {
            return Err(ShardRelayError::KeyDerivation("empty key fan".to_string()));
        }
        Ok(Self { keys })
    }

    /// Owner key (entry 0)
    pub fn owner(&self) -> &SymmetricKey {
        &self.keys[0]
    }

    /// Key of node `node` (1-based)
    pub fn node(&self, node: usize) -> Result<&SymmetricKey> {
        if node == 0 || node >= self.keys.len() {
            return Err(ShardRelayError::InvalidShardIndex {
                index: node,
                max: self.node_count(),
            });
        }
        Ok(&self.keys[node])
    }

    /// Number of node keys (excludes the owner key)
    pub fn node_count(&self) -> usize {
        self.keys.len() - 1
    }

    /// All keys, owner first
    pub fn keys(&self) -> &[SymmetricKey] {
        &self.keys
    }
}

/// SRC plus the SIGN and ENCRYPT root keys of one secret
pub struct KeyHierarchy {
    src: Src,
    sign: SymmetricKey,
    encrypt: SymmetricKey,
}

impl KeyHierarchy {
    /// Derive the hierarchy for a root secret. The secret itself is not kept.
    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        let src = Src::derive(secret)?;
        let sign = derive_key(secret, src.as_bytes(), SIGN_INFO)?;
        let encrypt = derive_key(secret, src.as_bytes(), ENCRYPT_INFO)?;
        Ok(Self { src, sign, encrypt })
    }

    pub fn src(&self) -> Src {
        self.src
    }

    /// SIGNS fan for `nodes` nodes
    pub fn sign_fan(&self, nodes: usize) -> Result<KeyFan> {
        KeyFan::derive(&self.sign, &self.src, SIGNS_LABEL, nodes)
    }

    /// ENCRYPTS fan for `nodes` nodes
    pub fn encrypt_fan(&self, nodes: usize) -> Result<KeyFan> {
        KeyFan::derive(&self.encrypt, &self.src, ENCRYPTS_LABEL, nodes)
    }
}

impl fmt::Debug for KeyHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHierarchy").field("src", &self.src).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let a = derive(b"secret", b"salt", 32, b"info").unwrap();
        let b = derive(b"secret", b"salt", 32, b"info").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_derive_avalanche() {
        let base = derive(b"secret", b"salt", 32, b"info").unwrap();
        assert_ne!(base, derive(b"secreu", b"salt", 32, b"info").unwrap());
        assert_ne!(base, derive(b"secret", b"salu", 32, b"info").unwrap());
        assert_ne!(base, derive(b"secret", b"salt", 32, b"infp").unwrap());

        // a one-byte change should flip roughly half the output bits
        let flipped = derive(b"secreu", b"salt", 32, b"info").unwrap();
        let differing: u32 = base
            .iter()
            .zip(flipped.iter())
            .map(|(x, y)| (x ^ y).count_ones())
            .sum();
        assert!(differing > 64 && differing < 192, "differing bits: {}", differing);
    }

    #[test]
    fn test_derive_rejects_bad_length() {
        assert!(derive(b"secret", b"", 0, b"info").is_err());
        assert!(derive(b"secret", b"", MAX_DERIVE_LEN + 1, b"info").is_err());
        assert_eq!(derive(b"secret", b"", MAX_DERIVE_LEN, b"info").unwrap().len(), MAX_DERIVE_LEN);
    }

    #[test]
    fn test_src_is_deterministic() {
        assert_eq!(Src::derive(b"1234").unwrap(), Src::derive(b"1234").unwrap());
        assert_ne!(Src::derive(b"1234").unwrap(), Src::derive(b"1235").unwrap());
    }

    #[test]
    fn test_src_lookup_key() {
        let src = Src::from_bytes([1, 23, 4, 0, 255, 6, 7, 8]);
        assert_eq!(src.lookup_key(), "12340255678");
        assert_eq!(src.to_string(), src.lookup_key());
    }

    #[test]
    fn test_fan_entries_are_distinct() {
        let hierarchy = KeyHierarchy::from_secret(b"device code").unwrap();
        let fan = hierarchy.sign_fan(3).unwrap();
        assert_eq!(fan.keys().len(), 4);
        assert_eq!(fan.node_count(), 3);

        for i in 0..fan.keys().len() {
            for j in (i + 1)..fan.keys().len() {
                assert_ne!(fan.keys()[i], fan.keys()[j], "fan entries {} and {} collide", i, j);
            }
        }
    }

    #[test]
    fn test_sign_and_encrypt_fans_differ() {
        let hierarchy = KeyHierarchy::from_secret(b"device code").unwrap();
        let signs = hierarchy.sign_fan(3).unwrap();
        let encrypts = hierarchy.encrypt_fan(3).unwrap();
        assert_ne!(signs.owner(), encrypts.owner());
    }

    #[test]
    fn test_hierarchy_is_reproducible() {
        let a = KeyHierarchy::from_secret(b"invite").unwrap();
        let b = KeyHierarchy::from_secret(b"invite").unwrap();
        assert_eq!(a.src(), b.src());
        assert_eq!(a.encrypt_fan(3).unwrap(), b.encrypt_fan(3).unwrap());
    }

    #[test]
    fn test_fan_node_bounds() {
        let hierarchy = KeyHierarchy::from_secret(b"owner").unwrap();
        let fan = hierarchy.encrypt_fan(3).unwrap();
        assert!(fan.node(0).is_err());
        assert!(fan.node(1).is_ok());
        assert!(fan.node(3).is_ok());
        assert!(fan.node(4).is_err());
    }

    #[test]
    fn test_fan_from_agreements() {
        let src = Src::from_bytes([9; SRC_SIZE]);
        let shared = [[1u8; KEY_SIZE], [1u8; KEY_SIZE]];
        let fan = KeyFan::from_agreements(&shared, &src, LOGIN_SIGNS_LABEL).unwrap();
        // identical agreement outputs still yield distinct entries
        assert_ne!(fan.keys()[0], fan.keys()[1]);
        assert!(KeyFan::from_agreements(&[], &src, LOGIN_SIGNS_LABEL).is_err());
    }
}
