// EIP-712 typed-data hashing and signature verification (C1).
//
// Domain `{name: "DEX", version: "1", chainId, verifyingContract}`, single
// primary type `Order` with the 15 fields of the canonical Order struct in
// declared order. Digest must be bit-identical to the on-chain contract's
// `getOrderHash`.

use ethereum_types::Address;
use thiserror::Error;

use crate::eth::{abi_encode, keccak256, recover_signer, word_address, word_bool, word_u256};
use crate::types::Order;

#[derive(Debug, Clone)]
pub struct Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("signature does not recover to the claimed maker")]
    MakerMismatch,
}

const ORDER_TYPE_STRING: &str = "Order(address maker,address tokenGet,address tokenGive,uint256 amountGet,uint256 amountGive,uint256 nonce,uint256 expiry,uint8 orderType,uint8 timeInForce,uint8 side,uint256 stopPrice,uint256 minFillAmount,bool allowPartialFill,address feeRecipient,uint256 feeAmount)";

const DOMAIN_TYPE_STRING: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

fn domain_separator(domain: &Domain) -> [u8; 32] {
    let type_hash = keccak256(DOMAIN_TYPE_STRING.as_bytes());
    let name_hash = keccak256(domain.name.as_bytes());
    let version_hash = keccak256(domain.version.as_bytes());
    let mut chain_word = [0u8; 32];
    chain_word[24..].copy_from_slice(&domain.chain_id.to_be_bytes());
    let contract_word = word_address(domain.verifying_contract);
    keccak256(&abi_encode(&[
        type_hash,
        name_hash,
        version_hash,
        chain_word,
        contract_word,
    ]))
}

fn order_struct_hash(order: &Order) -> [u8; 32] {
    let type_hash = keccak256(ORDER_TYPE_STRING.as_bytes());
    let mut order_type_word = [0u8; 32];
    order_type_word[31] = order.order_type.as_index();
    let mut tif_word = [0u8; 32];
    tif_word[31] = order.time_in_force.as_index();
    let mut side_word = [0u8; 32];
    side_word[31] = order.side.as_index();

    let words = [
        type_hash,
        word_address(order.maker),
        word_address(order.token_get),
        word_address(order.token_give),
        word_u256(order.amount_get),
        word_u256(order.amount_give),
        word_u256(order.nonce),
        word_u256(order.expiry),
        order_type_word,
        tif_word,
        side_word,
        word_u256(order.stop_price),
        word_u256(order.min_fill_amount),
        word_bool(order.allow_partial_fill),
        word_address(order.fee_recipient),
        word_u256(order.fee_amount),
    ];
    keccak256(&abi_encode(&words))
}

/// `keccak256(0x1901 || keccak256(domainSeparator) || keccak256(encode(Order)))`.
///
/// Note: per EIP-712 the domain separator and the struct hash are each
/// already a `keccak256` digest; this function does not re-hash them a
/// second time, matching the on-chain `getOrderHash`.
pub fn hash(domain: &Domain, order: &Order) -> [u8; 32] {
    let domain_sep = domain_separator(domain);
    let struct_hash = order_struct_hash(order);
    let mut preimage = Vec::with_capacity(2 + 32 + 32);
    preimage.extend_from_slice(b"\x19\x01");
    preimage.extend_from_slice(&domain_sep);
    preimage.extend_from_slice(&struct_hash);
    keccak256(&preimage)
}

pub fn recover(digest: &[u8; 32], signature: &[u8]) -> Result<Address, SignatureError> {
    recover_signer(digest, signature).map_err(|e| SignatureError::Malformed(e.to_string()))
}

pub fn verify(
    domain: &Domain,
    order: &Order,
    signature: &[u8],
    expected_maker: Address,
) -> Result<(), SignatureError> {
    let digest = hash(domain, order);
    let recovered = recover(&digest, signature)?;
    if recovered != expected_maker {
        return Err(SignatureError::MakerMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::U256;
    use k256::ecdsa::{SigningKey, RecoveryId};

    fn sample_order(maker: Address) -> Order {
        Order {
            maker,
            token_get: Address::repeat_byte(0x11),
            token_give: Address::repeat_byte(0x22),
            amount_get: U256::from(1000u64),
            amount_give: U256::from(2000u64),
            nonce: U256::from(1u64),
            expiry: U256::zero(),
            order_type: crate::types::OrderType::Limit,
            time_in_force: crate::types::TimeInForce::Gtc,
            side: crate::types::Side::Sell,
            stop_price: U256::zero(),
            min_fill_amount: U256::zero(),
            allow_partial_fill: true,
            fee_recipient: Address::zero(),
            fee_amount: U256::zero(),
        }
    }

    #[test]
    fn hash_is_deterministic() {
        let domain = Domain {
            name: "DEX".into(),
            version: "1".into(),
            chain_id: 31337,
            verifying_contract: Address::repeat_byte(0xaa),
        };
        let order = sample_order(Address::repeat_byte(0x33));
        let h1 = hash(&domain, &order);
        let h2 = hash(&domain, &order);
        assert_eq!(h1, h2);
    }

    #[test]
    fn recover_round_trips_through_sign() {
        let sk_bytes = [7u8; 32];
        let signing_key = SigningKey::from_bytes((&sk_bytes).into()).unwrap();
        let maker = crate::eth::address_from_verifying_key(signing_key.verifying_key());

        let domain = Domain {
            name: "DEX".into(),
            version: "1".into(),
            chain_id: 31337,
            verifying_contract: Address::repeat_byte(0xaa),
        };
        let order = sample_order(maker);
        let digest = hash(&domain, &order);

        let (sig, recid): (k256::ecdsa::Signature, RecoveryId) =
            signing_key.sign_prehash_recoverable(&digest).unwrap();
        let mut sig_bytes = [0u8; 65];
        sig_bytes[..64].copy_from_slice(&sig.to_bytes());
        sig_bytes[64] = 27 + recid.to_byte();

        let recovered = recover(&digest, &sig_bytes).unwrap();
        assert_eq!(recovered, maker);

        verify(&domain, &order, &sig_bytes, maker).unwrap();
    }
}
