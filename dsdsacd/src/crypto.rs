//! Thin wrappers around the crypto primitives the key exchange needs:
//! textbook RSA on fixed 128-byte blocks, PKCS#1 v1.5 type-2 padding,
//! SHA-1 digests, and AES-128-CBC sector decryption.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use num_bigint::BigUint;
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::SacdError;

pub const RSA_BLOCK: usize = 128;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

fn to_block(value: BigUint) -> Result<[u8; RSA_BLOCK], SacdError> {
    let bytes = value.to_bytes_be();
    if bytes.len() > RSA_BLOCK {
        return Err(SacdError::CryptoFailed("RSA result exceeds the block size"));
    }
    let mut block = [0u8; RSA_BLOCK];
    block[RSA_BLOCK - bytes.len()..].copy_from_slice(&bytes);
    Ok(block)
}

fn modpow(
    block: &[u8],
    exponent: &BigUint,
    modulus: &[u8],
) -> Result<[u8; RSA_BLOCK], SacdError> {
    if block.len() != RSA_BLOCK || modulus.len() != RSA_BLOCK {
        return Err(SacdError::CryptoFailed("RSA block size mismatch"));
    }
    let n = BigUint::from_bytes_be(modulus);
    let m = BigUint::from_bytes_be(block);
    if m >= n {
        return Err(SacdError::CryptoFailed("RSA input not below the modulus"));
    }
    to_block(m.modpow(exponent, &n))
}

/// Public RSA operation with the fixed exponent 65537.
pub fn rsa_public_op(block: &[u8], modulus: &[u8]) -> Result<[u8; RSA_BLOCK], SacdError> {
    modpow(block, &BigUint::from(65_537u32), modulus)
}

/// Private RSA operation with an explicit exponent.
pub fn rsa_private_op(
    block: &[u8],
    modulus: &[u8],
    exponent: &[u8],
) -> Result<[u8; RSA_BLOCK], SacdError> {
    modpow(block, &BigUint::from_bytes_be(exponent), modulus)
}

/// PKCS#1 v1.5 type-2 padding: `00 02 <nonzero random> 00 <message>`.
pub fn pkcs1_pad_type2(message: &[u8]) -> Result<[u8; RSA_BLOCK], SacdError> {
    if message.len() > RSA_BLOCK - 11 {
        return Err(SacdError::CryptoFailed("message too long for PKCS#1 padding"));
    }
    let mut block = [0u8; RSA_BLOCK];
    block[1] = 0x02;
    let pad_len = RSA_BLOCK - 3 - message.len();
    let mut rng = rand::rng();
    for slot in &mut block[2..2 + pad_len] {
        loop {
            let mut byte = [0u8; 1];
            rng.fill_bytes(&mut byte);
            if byte[0] != 0 {
                *slot = byte[0];
                break;
            }
        }
    }
    block[2 + pad_len] = 0x00;
    block[3 + pad_len..].copy_from_slice(message);
    Ok(block)
}

/// Strip PKCS#1 v1.5 type-2 padding, verifying its shape.
pub fn pkcs1_unpad_type2(block: &[u8]) -> Result<Vec<u8>, SacdError> {
    if block.len() != RSA_BLOCK || block[0] != 0x00 || block[1] != 0x02 {
        return Err(SacdError::CryptoFailed("bad PKCS#1 type-2 header"));
    }
    let separator = block[2..]
        .iter()
        .position(|&b| b == 0)
        .ok_or(SacdError::CryptoFailed("missing PKCS#1 separator"))?;
    if separator < 8 {
        return Err(SacdError::CryptoFailed("PKCS#1 padding too short"));
    }
    Ok(block[2 + separator + 1..].to_vec())
}

/// SHA-1 over a sequence of byte slices.
pub fn sha1_digest(parts: &[&[u8]]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// AES-128-CBC decryption in place, no padding; `data` must be a whole
/// number of 16-byte blocks.
pub fn aes128_cbc_decrypt_in_place(
    key: &[u8; 16],
    iv: &[u8; 16],
    data: &mut [u8],
) -> Result<(), SacdError> {
    if data.len() % 16 != 0 {
        return Err(SacdError::CryptoFailed("CBC data not block-aligned"));
    }
    let decryptor = Aes128CbcDec::new(key.into(), iv.into());
    decryptor
        .decrypt_padded_mut::<NoPadding>(data)
        .map_err(|_| SacdError::CryptoFailed("CBC decryption failed"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkcs1_padding_round_trips() {
        let message = b"sixteen byte msg";
        let block = pkcs1_pad_type2(message).unwrap();
        assert_eq!(block[0], 0x00);
        assert_eq!(block[1], 0x02);
        assert!(block[2..2 + RSA_BLOCK - 3 - message.len()]
            .iter()
            .all(|&b| b != 0));
        assert_eq!(pkcs1_unpad_type2(&block).unwrap(), message);
    }

    #[test]
    fn pkcs1_unpad_rejects_bad_headers() {
        let mut block = pkcs1_pad_type2(b"hello").unwrap();
        block[1] = 0x01;
        assert!(pkcs1_unpad_type2(&block).is_err());
        assert!(pkcs1_unpad_type2(&[0u8; RSA_BLOCK]).is_err());
    }

    #[test]
    fn rsa_rejects_oversized_inputs() {
        let modulus = [0xFFu8; RSA_BLOCK];
        let block = [0xFFu8; RSA_BLOCK];
        // block == modulus - not below it
        assert!(rsa_public_op(&block, &modulus).is_err());
        assert!(rsa_public_op(&[0u8; 64], &modulus).is_err());
    }

    #[test]
    fn sha1_matches_a_known_vector() {
        // SHA1("abc")
        let digest = sha1_digest(&[b"abc"]);
        assert_eq!(
            digest,
            [
                0xa9, 0x99, 0x3e, 0x36, 0x47, 0x06, 0x81, 0x6a, 0xba, 0x3e, 0x25, 0x71, 0x78,
                0x50, 0xc2, 0x6c, 0x9c, 0xd0, 0xd8, 0x9d
            ]
        );
    }

    #[test]
    fn cbc_decrypt_requires_block_alignment() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let mut data = vec![0u8; 15];
        assert!(aes128_cbc_decrypt_in_place(&key, &iv, &mut data).is_err());
        let mut data = vec![0u8; 32];
        assert!(aes128_cbc_decrypt_in_place(&key, &iv, &mut data).is_ok());
    }
}
