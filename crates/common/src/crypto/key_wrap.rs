//! AES key wrap (RFC 3394) with a 128-bit KEK.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::domain::{AesKey, DomainError, DomainResult};

const DEFAULT_IV: [u8; 8] = [0xA6; 8];

pub fn wrap_key(kek: &AesKey, plaintext: &[u8]) -> DomainResult<Vec<u8>> {
    if plaintext.len() < 16 || plaintext.len() % 8 != 0 {
        return Err(DomainError::InvalidArgument(format!(
            "key wrap input must be a multiple of 8 bytes and at least 16, got {}",
            plaintext.len()
        )));
    }
    let cipher = Aes128::new(GenericArray::from_slice(&kek.0));
    let n = plaintext.len() / 8;
    let mut a = DEFAULT_IV;
    let mut r: Vec<[u8; 8]> = plaintext
        .chunks(8)
        .map(|c| {
            let mut block = [0u8; 8];
            block.copy_from_slice(c);
            block
        })
        .collect();

    for j in 0..6u64 {
        for (i, ri) in r.iter_mut().enumerate() {
            let mut b = [0u8; 16];
            b[..8].copy_from_slice(&a);
            b[8..].copy_from_slice(ri);
            let mut block = GenericArray::clone_from_slice(&b);
            cipher.encrypt_block(&mut block);

            let t = (n as u64) * j + (i as u64 + 1);
            a.copy_from_slice(&block[..8]);
            for (byte, t_byte) in a.iter_mut().zip(t.to_be_bytes()) {
                *byte ^= t_byte;
            }
            ri.copy_from_slice(&block[8..]);
        }
    }

    let mut out = Vec::with_capacity(8 * (n + 1));
    out.extend_from_slice(&a);
    for block in r {
        out.extend_from_slice(&block);
    }
    Ok(out)
}

pub fn unwrap_key(kek: &AesKey, ciphertext: &[u8]) -> DomainResult<Vec<u8>> {
    if ciphertext.len() < 24 || ciphertext.len() % 8 != 0 {
        return Err(DomainError::InvalidArgument(format!(
            "wrapped key must be a multiple of 8 bytes and at least 24, got {}",
            ciphertext.len()
        )));
    }
    let cipher = Aes128::new(GenericArray::from_slice(&kek.0));
    let n = ciphertext.len() / 8 - 1;
    let mut a = [0u8; 8];
    a.copy_from_slice(&ciphertext[..8]);
    let mut r: Vec<[u8; 8]> = ciphertext[8..]
        .chunks(8)
        .map(|c| {
            let mut block = [0u8; 8];
            block.copy_from_slice(c);
            block
        })
        .collect();

    for j in (0..6u64).rev() {
        for i in (0..n).rev() {
            let t = (n as u64) * j + (i as u64 + 1);
            let mut b = [0u8; 16];
            for (k, t_byte) in t.to_be_bytes().iter().enumerate() {
                b[k] = a[k] ^ t_byte;
            }
            b[8..].copy_from_slice(&r[i]);
            let mut block = GenericArray::clone_from_slice(&b);
            cipher.decrypt_block(&mut block);

            a.copy_from_slice(&block[..8]);
            r[i].copy_from_slice(&block[8..]);
        }
    }

    if a != DEFAULT_IV {
        return Err(DomainError::Corruption(
            "key unwrap integrity check failed".to_string(),
        ));
    }
    Ok(r.concat())
}
