//! Single-unit cryptographic operations backing the worker pool opcodes.
//!
//! Everything here is deterministic and side-effect free; the pool fans these
//! out one unit per lane. Scalar arithmetic is curve25519 group-order
//! arithmetic and point arithmetic is Montgomery u-coordinate scalar
//! multiplication, both via `curve25519-dalek`.

use crate::params::{BLOCK_BYTE_LEN, BLOOM_DOMAIN_SEPARATOR, BLOOM_MESSAGE_BYTE_LEN, DIGEST_BYTE_LEN, KEY_BYTE_LEN, POINT_BYTE_LEN};
use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use curve25519_dalek::constants::X25519_BASEPOINT;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use turboshake::TurboShake128;

/// AES-128 encryption of a single block.
#[inline(always)]
pub fn block_encrypt(key: &[u8; KEY_BYTE_LEN], block: &[u8; BLOCK_BYTE_LEN]) -> [u8; BLOCK_BYTE_LEN] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);

    let mut out = [0u8; BLOCK_BYTE_LEN];
    out.copy_from_slice(&buf);
    out
}

/// AES-128 decryption of a single block.
#[inline(always)]
pub fn block_decrypt(key: &[u8; KEY_BYTE_LEN], block: &[u8; BLOCK_BYTE_LEN]) -> [u8; BLOCK_BYTE_LEN] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut buf);

    let mut out = [0u8; BLOCK_BYTE_LEN];
    out.copy_from_slice(&buf);
    out
}

/// Keyed pseudorandom function over one block: AES_k(m) ⊕ m, so the output
/// can not be inverted back to the input even with the key in hand.
#[inline(always)]
pub fn prf(key: &[u8; KEY_BYTE_LEN], block: &[u8; BLOCK_BYTE_LEN]) -> [u8; BLOCK_BYTE_LEN] {
    let mut out = block_encrypt(key, block);
    for (o, b) in out.iter_mut().zip(block.iter()) {
        *o ^= b;
    }
    out
}

/// Plain 64-byte digest of one block, used to spread probe material over the
/// bucket/label/mask layout.
pub fn digest(block: &[u8; BLOCK_BYTE_LEN]) -> [u8; DIGEST_BYTE_LEN] {
    let mut hasher = TurboShake128::default();
    hasher.absorb(block);
    hasher.finalize::<{ TurboShake128::DEFAULT_DOMAIN_SEPARATOR }>();

    let mut out = [0u8; DIGEST_BYTE_LEN];
    hasher.squeeze(&mut out);
    out
}

/// Domain-separated 64-byte digest of a salted membership message.
pub fn keyed_digest(message: &[u8; BLOOM_MESSAGE_BYTE_LEN]) -> [u8; DIGEST_BYTE_LEN] {
    let mut hasher = TurboShake128::default();
    hasher.absorb(message);
    hasher.finalize::<{ BLOOM_DOMAIN_SEPARATOR }>();

    let mut out = [0u8; DIGEST_BYTE_LEN];
    hasher.squeeze(&mut out);
    out
}

/// Product of two scalars mod the group order.
#[inline(always)]
pub fn field_mul(lhs: &[u8; POINT_BYTE_LEN], rhs: &[u8; POINT_BYTE_LEN]) -> [u8; POINT_BYTE_LEN] {
    (Scalar::from_bytes_mod_order(*lhs) * Scalar::from_bytes_mod_order(*rhs)).to_bytes()
}

/// Multiplicative inverse mod the group order, computed by exponentiation.
#[inline(always)]
pub fn field_inverse(operand: &[u8; POINT_BYTE_LEN]) -> [u8; POINT_BYTE_LEN] {
    Scalar::from_bytes_mod_order(*operand).invert().to_bytes()
}

/// Scalar multiplication against the fixed base point u = 9.
#[inline(always)]
pub fn scalar_mul_fixed_base(scalar: &[u8; POINT_BYTE_LEN]) -> [u8; POINT_BYTE_LEN] {
    (X25519_BASEPOINT * Scalar::from_bytes_mod_order(*scalar)).to_bytes()
}

/// Scalar multiplication against an arbitrary Montgomery point.
#[inline(always)]
pub fn scalar_mul(scalar: &[u8; POINT_BYTE_LEN], base: &[u8; POINT_BYTE_LEN]) -> [u8; POINT_BYTE_LEN] {
    (MontgomeryPoint(*base) * Scalar::from_bytes_mod_order(*scalar)).to_bytes()
}

/// Widens a 16-byte PRF output into a canonical 32-byte scalar.
#[inline(always)]
pub fn widen_to_scalar(block: &[u8; BLOCK_BYTE_LEN]) -> [u8; POINT_BYTE_LEN] {
    let mut scalar = [0u8; POINT_BYTE_LEN];
    scalar[..BLOCK_BYTE_LEN].copy_from_slice(block);
    scalar
}

/// Maps an opaque keyword onto the fixed block width every cryptographic
/// operation expects.
pub fn keyword_block(keyword: &[u8]) -> [u8; BLOCK_BYTE_LEN] {
    let mut hasher = TurboShake128::default();
    hasher.absorb(keyword);
    hasher.finalize::<{ TurboShake128::DEFAULT_DOMAIN_SEPARATOR }>();

    let mut out = [0u8; BLOCK_BYTE_LEN];
    hasher.squeeze(&mut out);
    out
}

/// Maps an opaque document identifier onto a block: zero-padded below the
/// block width, truncated to the first block above it.
pub fn identifier_block(id: &[u8]) -> [u8; BLOCK_BYTE_LEN] {
    let take = id.len().min(BLOCK_BYTE_LEN);
    let mut out = [0u8; BLOCK_BYTE_LEN];
    out[..take].copy_from_slice(&id[..take]);
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn prf_is_deterministic_and_differs_from_raw_encryption() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let mut key = [0u8; 16];
        let mut block = [0u8; 16];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut block);

        assert_eq!(prf(&key, &block), prf(&key, &block));
        assert_ne!(prf(&key, &block), block_encrypt(&key, &block));
    }

    #[test]
    fn block_cipher_round_trips() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);

        let mut key = [0u8; 16];
        let mut block = [0u8; 16];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut block);

        assert_eq!(block_decrypt(&key, &block_encrypt(&key, &block)), block);
    }

    #[test]
    fn field_inverse_cancels_multiplication() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        let mut block = [0u8; 16];
        rng.fill_bytes(&mut block);

        let x = widen_to_scalar(&block);
        let product = field_mul(&x, &field_inverse(&x));

        let mut one = [0u8; 32];
        one[0] = 1;
        assert_eq!(product, one);
    }

    #[test]
    fn exponent_blinding_commutes() {
        // (g^a)^b == (g^b)^a is exactly the identity the cross-tag check
        // relies on.
        let mut rng = ChaCha8Rng::seed_from_u64(10);

        let mut a16 = [0u8; 16];
        let mut b16 = [0u8; 16];
        rng.fill_bytes(&mut a16);
        rng.fill_bytes(&mut b16);

        let a = widen_to_scalar(&a16);
        let b = widen_to_scalar(&b16);

        let ga_b = scalar_mul(&b, &scalar_mul_fixed_base(&a));
        let gb_a = scalar_mul(&a, &scalar_mul_fixed_base(&b));
        assert_eq!(ga_b, gb_a);

        let gab = scalar_mul_fixed_base(&field_mul(&a, &b));
        assert_eq!(ga_b, gab);
    }

    #[test]
    fn digest_flavours_are_domain_separated() {
        let block = [0x5au8; 16];
        let mut message = [0u8; 40];
        message[..16].copy_from_slice(&block);

        // A plain digest of a prefix must not collide with the keyed flavour.
        assert_ne!(digest(&block)[..16], keyed_digest(&message)[..16]);
    }

    #[test]
    fn keyword_block_is_stable_and_width_independent() {
        assert_eq!(keyword_block(b"alpha"), keyword_block(b"alpha"));
        assert_ne!(keyword_block(b"alpha"), keyword_block(b"beta"));
        assert_ne!(keyword_block(b"alphaalphaalphaalpha"), keyword_block(b"alphaalphaalphaalph"));
    }
}
