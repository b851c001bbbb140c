//! Intrinsic transaction cost, used to pin exact gas for calls that run no code.

use crate::abi::keccak256;
use ethers::types::Address;

pub const TX_BASE_GAS: u64 = 21_000;
pub const TX_DATA_ZERO_GAS: u64 = 4;
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;

pub fn intrinsic_gas(data: &[u8]) -> u64 {
    data.iter().fold(TX_BASE_GAS, |gas, byte| {
        gas + if *byte == 0 {
            TX_DATA_ZERO_GAS
        } else {
            TX_DATA_NON_ZERO_GAS
        }
    })
}

/// 16 bytes of calldata: one zero byte followed by 15 non-zero bytes.
pub fn empty_account_calldata() -> Vec<u8> {
    (0u8..16).collect()
}

/// A fresh address no one has touched, unique per signer nonce.
pub fn fresh_account(signer: Address, signer_nonce: u64) -> Address {
    let mut seed = signer.as_bytes().to_vec();
    seed.extend_from_slice(b"empty-account");
    seed.extend_from_slice(&signer_nonce.to_be_bytes());
    Address::from_slice(&keccak256(&seed)[12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_account_transfer_costs_21244() {
        let data = empty_account_calldata();
        assert_eq!(data.len(), 16);
        assert_eq!(data.iter().filter(|b| **b == 0).count(), 1);
        assert_eq!(intrinsic_gas(&data), 21_000 + 15 * 16 + 4);
        assert_eq!(intrinsic_gas(&data), 21_244);
    }

    #[test]
    fn no_data_costs_base_only() {
        assert_eq!(intrinsic_gas(&[]), TX_BASE_GAS);
    }

    #[test]
    fn fresh_accounts_differ_per_nonce() {
        let signer = Address::from_low_u64_be(1);
        assert_ne!(fresh_account(signer, 0), fresh_account(signer, 1));
        assert_eq!(fresh_account(signer, 7), fresh_account(signer, 7));
    }
}
