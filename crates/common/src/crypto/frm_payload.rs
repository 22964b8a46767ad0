//! LoRaWAN FRMPayload encryption.
//!
//! The payload is XORed with a keystream made of AES-128 encrypted A-blocks:
//!
//! ```text
//! 0x01 | 0x00 x4 | dir | DevAddr (LE) | FCnt (LE) | 0x00 | i
//! ```
//!
//! with `dir = 0` for uplink and `dir = 1` for downlink and `i` starting at 1.
//! Encryption and decryption are the same operation.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::domain::{AesKey, DevAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Uplink,
    Downlink,
}

impl Direction {
    fn as_byte(self) -> u8 {
        match self {
            Direction::Uplink => 0,
            Direction::Downlink => 1,
        }
    }
}

/// Applies the FRMPayload keystream to `payload`.
pub fn frm_payload_crypt(
    key: &AesKey,
    direction: Direction,
    dev_addr: DevAddr,
    f_cnt: u32,
    payload: &[u8],
) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(&key.0));

    let mut a_block = [0u8; 16];
    a_block[0] = 0x01;
    a_block[5] = direction.as_byte();
    let mut addr = dev_addr.0;
    addr.reverse();
    a_block[6..10].copy_from_slice(&addr);
    a_block[10..14].copy_from_slice(&f_cnt.to_le_bytes());

    let mut out = Vec::with_capacity(payload.len());
    for (i, chunk) in payload.chunks(16).enumerate() {
        a_block[15] = (i + 1) as u8;
        let mut keystream = GenericArray::clone_from_slice(&a_block);
        cipher.encrypt_block(&mut keystream);
        out.extend(chunk.iter().zip(keystream.iter()).map(|(p, s)| p ^ s));
    }
    out
}

pub fn encrypt_uplink(key: &AesKey, dev_addr: DevAddr, f_cnt: u32, payload: &[u8]) -> Vec<u8> {
    frm_payload_crypt(key, Direction::Uplink, dev_addr, f_cnt, payload)
}

pub fn decrypt_uplink(key: &AesKey, dev_addr: DevAddr, f_cnt: u32, payload: &[u8]) -> Vec<u8> {
    frm_payload_crypt(key, Direction::Uplink, dev_addr, f_cnt, payload)
}

pub fn encrypt_downlink(key: &AesKey, dev_addr: DevAddr, f_cnt: u32, payload: &[u8]) -> Vec<u8> {
    frm_payload_crypt(key, Direction::Downlink, dev_addr, f_cnt, payload)
}

pub fn decrypt_downlink(key: &AesKey, dev_addr: DevAddr, f_cnt: u32, payload: &[u8]) -> Vec<u8> {
    frm_payload_crypt(key, Direction::Downlink, dev_addr, f_cnt, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: AesKey = AesKey([0x22; 16]);
    const ADDR: DevAddr = DevAddr([0x22, 0x22, 0x22, 0x22]);

    #[test]
    fn test_round_trip_various_lengths_and_counters() {
        for len in [0usize, 1, 15, 16, 17, 51, 242] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            for f_cnt in [0u32, 1, 22, 0xFFFF, 0x1_0000, u32::MAX] {
                let encrypted = encrypt_downlink(&KEY, ADDR, f_cnt, &payload);
                assert_eq!(encrypted.len(), payload.len());
                assert_eq!(decrypt_downlink(&KEY, ADDR, f_cnt, &encrypted), payload);
            }
        }
    }

    #[test]
    fn test_direction_and_counter_change_keystream() {
        let payload = [1, 1, 1, 1];

        let up = encrypt_uplink(&KEY, ADDR, 1, &payload);
        let down = encrypt_downlink(&KEY, ADDR, 1, &payload);
        let down_next = encrypt_downlink(&KEY, ADDR, 2, &payload);

        assert_ne!(up, down);
        assert_ne!(down, down_next);
        assert_ne!(down.as_slice(), &payload);
    }

    #[test]
    fn test_dev_addr_is_little_endian_in_block() {
        let payload = [0u8; 4];
        let a = encrypt_uplink(&KEY, DevAddr([1, 2, 3, 4]), 1, &payload);
        let b = encrypt_uplink(&KEY, DevAddr([4, 3, 2, 1]), 1, &payload);
        assert_ne!(a, b);
    }
}
