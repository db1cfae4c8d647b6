//! Finite-field Diffie-Hellman over the RFC 3526 2048-bit MODP group,
//! followed by HKDF-SHA256 to produce the channel key.

use hkdf::Hkdf;
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use std::sync::LazyLock;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::SymmetricKey;
use crate::{DH_MODULUS_BYTES, KEY_SIZE};

/// HKDF info label binding the derived key to this handshake
pub const HKDF_INFO: &[u8] = b"handshake data";

/// Generator of the MODP group
pub const GENERATOR: u32 = 2;

/// RFC 3526 section 3, 2048-bit MODP group (safe prime)
const MODP_2048_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

static MODP_2048: LazyLock<DhGroup> = LazyLock::new(|| {
    let p = BigUint::parse_bytes(MODP_2048_HEX.as_bytes(), 16)
        .expect("RFC 3526 modulus literal is valid hex");
    DhGroup::new(p, BigUint::from(GENERATOR))
});

/// A prime-order DH group `(p, g)`. Immutable once built.
#[derive(Debug, Clone)]
pub struct DhGroup {
    p: BigUint,
    g: BigUint,
    /// Highest valid public value / private exponent: p - 2
    max_element: BigUint,
}

impl DhGroup {
    fn new(p: BigUint, g: BigUint) -> Self {
        let max_element = &p - 2u32;
        Self { p, g, max_element }
    }

    /// The process-wide 2048-bit group used by every channel.
    pub fn modp_2048() -> &'static DhGroup {
        &MODP_2048
    }

    pub fn modulus(&self) -> &BigUint {
        &self.p
    }

    pub fn generator(&self) -> &BigUint {
        &self.g
    }

    /// Public values must lie in `[2, p-2]`; 0, 1 and p-1 confine the shared
    /// secret to a trivial subgroup.
    pub fn is_valid_public(&self, value: &BigUint) -> bool {
        *value >= BigUint::from(2u32) && *value <= self.max_element
    }
}

/// One side of a DH exchange: a fresh private exponent and its public value.
///
/// The exponent never leaves this struct.
pub struct KeyAgreement {
    private: BigUint,
    public: BigUint,
}

impl KeyAgreement {
    /// Generate a keypair from the operating system RNG.
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut rand::rngs::OsRng)
    }

    /// Generate a keypair with `x` uniform in `[2, p-2]` and `y = g^x mod p`.
    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let group = DhGroup::modp_2048();
        let low = BigUint::from(2u32);
        let high = group.modulus() - BigUint::one();
        let private = rng.gen_biguint_range(&low, &high);
        let public = group.generator().modpow(&private, group.modulus());
        Self { private, public }
    }

    pub fn public_value(&self) -> &BigUint {
        &self.public
    }

    /// Public value as a fixed-width big-endian integer.
    pub fn public_bytes(&self) -> [u8; DH_MODULUS_BYTES] {
        to_fixed_be(&self.public)
    }

    /// Decode a peer's big-endian public value. Range checks happen at
    /// derivation time.
    pub fn parse_public(bytes: &[u8]) -> Result<BigUint, CryptoError> {
        if bytes.is_empty() || bytes.len() > DH_MODULUS_BYTES {
            return Err(CryptoError::InvalidPeerKey);
        }
        Ok(BigUint::from_bytes_be(bytes))
    }

    /// Derive the 16-byte channel key from the peer's public value.
    pub fn derive_shared_key(&self, peer_public: &BigUint) -> Result<SymmetricKey, CryptoError> {
        let material = self.derive_key_material(peer_public, KEY_SIZE)?;
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&material);
        Ok(SymmetricKey::from_bytes(bytes))
    }

    /// Compute `peer^x mod p` and stretch it with HKDF-SHA256 to `key_len`
    /// bytes (no salt, info = [`HKDF_INFO`]).
    pub fn derive_key_material(
        &self,
        peer_public: &BigUint,
        key_len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let group = DhGroup::modp_2048();
        if !group.is_valid_public(peer_public) {
            tracing::debug!(bits = peer_public.bits(), "rejecting peer DH value");
            return Err(CryptoError::InvalidPeerKey);
        }

        let shared = Zeroizing::new(to_fixed_be(
            &peer_public.modpow(&self.private, group.modulus()),
        ));

        let hkdf = Hkdf::<Sha256>::new(None, &shared[..]);
        let mut okm = Zeroizing::new(vec![0u8; key_len]);
        hkdf.expand(HKDF_INFO, &mut okm[..])
            .map_err(|e| CryptoError::KeyDerivation(format!("HKDF expand: {e}")))?;
        Ok(okm)
    }
}

impl std::fmt::Debug for KeyAgreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyAgreement")
            .field("private", &"[REDACTED]")
            .field("public_bits", &self.public.bits())
            .finish()
    }
}

/// Big-endian encoding left-padded to the modulus width. `n` must be `< p`.
fn to_fixed_be(n: &BigUint) -> [u8; DH_MODULUS_BYTES] {
    let bytes = n.to_bytes_be();
    let mut out = [0u8; DH_MODULUS_BYTES];
    out[DH_MODULUS_BYTES - bytes.len()..].copy_from_slice(&bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    #[test]
    fn test_group_is_2048_bit_modp() {
        let group = DhGroup::modp_2048();
        assert_eq!(group.modulus().bits(), 2048);
        assert_eq!(group.generator(), &BigUint::from(2u32));
        // RFC 3526 primes start and end with 64 one bits
        let low_mask = (BigUint::one() << 64u32) - 1u32;
        assert_eq!(group.modulus() & &low_mask, low_mask);
        assert_eq!(group.modulus() >> 1984u32, low_mask);
    }

    #[test]
    fn test_shared_key_symmetry() {
        let alice = KeyAgreement::generate();
        let bob = KeyAgreement::generate();

        let k_ab = alice.derive_shared_key(bob.public_value()).unwrap();
        let k_ba = bob.derive_shared_key(alice.public_value()).unwrap();

        assert_eq!(k_ab.as_bytes(), k_ba.as_bytes());
    }

    #[test]
    fn test_different_peers_different_keys() {
        let alice = KeyAgreement::generate();
        let bob = KeyAgreement::generate();
        let carol = KeyAgreement::generate();

        let k_ab = alice.derive_shared_key(bob.public_value()).unwrap();
        let k_ac = alice.derive_shared_key(carol.public_value()).unwrap();
        assert_ne!(k_ab.as_bytes(), k_ac.as_bytes());
    }

    #[test]
    fn test_public_value_in_range() {
        let kp = KeyAgreement::generate();
        assert!(DhGroup::modp_2048().is_valid_public(kp.public_value()));
    }

    #[test]
    fn test_rejects_degenerate_peer_values() {
        let kp = KeyAgreement::generate();
        let p = DhGroup::modp_2048().modulus().clone();

        for bad in [
            BigUint::zero(),
            BigUint::one(),
            &p - 1u32,
            p.clone(),
            &p + 5u32,
        ] {
            assert_eq!(
                kp.derive_shared_key(&bad).unwrap_err(),
                CryptoError::InvalidPeerKey
            );
        }

        // Boundaries of the valid range are accepted
        assert!(kp.derive_shared_key(&BigUint::from(2u32)).is_ok());
        assert!(kp.derive_shared_key(&(&p - 2u32)).is_ok());
    }

    #[test]
    fn test_public_bytes_roundtrip() {
        let kp = KeyAgreement::generate();
        let bytes = kp.public_bytes();
        assert_eq!(bytes.len(), DH_MODULUS_BYTES);
        let parsed = KeyAgreement::parse_public(&bytes).unwrap();
        assert_eq!(&parsed, kp.public_value());
    }

    #[test]
    fn test_parse_public_rejects_bad_lengths() {
        assert_eq!(
            KeyAgreement::parse_public(&[]).unwrap_err(),
            CryptoError::InvalidPeerKey
        );
        assert_eq!(
            KeyAgreement::parse_public(&[1u8; DH_MODULUS_BYTES + 1]).unwrap_err(),
            CryptoError::InvalidPeerKey
        );
    }

    #[test]
    fn test_key_material_lengths() {
        let alice = KeyAgreement::generate();
        let bob = KeyAgreement::generate();

        let k32 = alice.derive_key_material(bob.public_value(), 32).unwrap();
        let k16 = alice.derive_key_material(bob.public_value(), 16).unwrap();
        assert_eq!(k32.len(), 32);
        // HKDF-Expand output is prefix-consistent for the same PRK and info
        assert_eq!(&k32[..16], &k16[..]);

        let too_long = alice.derive_key_material(bob.public_value(), 255 * 32 + 1);
        assert!(matches!(too_long, Err(CryptoError::KeyDerivation(_))));
    }

    #[test]
    fn test_debug_hides_private_exponent() {
        let kp = KeyAgreement::generate();
        assert!(format!("{kp:?}").contains("REDACTED"));
    }
}
