// keccak256, EIP-55 checksumming and secp256k1 recovery primitives.

use ethereum_types::{Address, U256};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::Digest as _;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = sha3::Keccak256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    buf
}

pub fn eip55_checksum(addr: Address) -> String {
    let hex_lower = hex::encode(addr.as_bytes());
    let hash = keccak256(hex_lower.as_bytes());
    let mut out = String::with_capacity(2 + 40);
    out.push_str("0x");
    for (i, ch) in hex_lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            (hash[i / 2] >> 4) & 0x0f
        } else {
            hash[i / 2] & 0x0f
        };
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn word_address(addr: Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr.as_bytes());
    out
}

pub fn word_u256(x: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    x.to_big_endian(&mut out);
    out
}

pub fn word_bool(b: bool) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[31] = b as u8;
    out
}

pub fn abi_encode(words: &[[u8; 32]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * 32);
    for w in words {
        out.extend_from_slice(w);
    }
    out
}

/// Recover the signer address from a 32-byte digest and a 65-byte
/// `r || s || v` signature with `v ∈ {27, 28}` (EIP-2 low-s is enforced by
/// `k256`'s normalization on parse).
pub fn recover_signer(digest: &[u8; 32], signature: &[u8]) -> anyhow::Result<Address> {
    anyhow::ensure!(signature.len() == 65, "signature must be 65 bytes");

    let sig = Signature::from_slice(&signature[..64])?;
    let v = signature[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    anyhow::ensure!(recovery_byte <= 1, "invalid recovery id {v}");
    let recid = RecoveryId::from_byte(recovery_byte).ok_or_else(|| anyhow::anyhow!("invalid recovery id"))?;

    let verifying_key = VerifyingKey::recover_from_prehash(digest, &sig, recid)?;
    Ok(address_from_verifying_key(&verifying_key))
}

pub fn address_from_verifying_key(vk: &VerifyingKey) -> Address {
    let encoded = vk.to_encoded_point(false);
    let bytes = encoded.as_bytes();
    let hash = keccak256(&bytes[1..]);
    Address::from_slice(&hash[12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_known_vector() {
        let addr: Address = "5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
            .parse()
            .unwrap();
        assert_eq!(
            eip55_checksum(addr),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
    }
}
