//! Contract ABIs used by the strike engine
//!
//! Two contracts matter: the on-chain executor that settles a cycle in one
//! call, and Uniswap-V2 style pairs whose reserves feed the market graph.

use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes, U256};
use once_cell::sync::Lazy;
use serde_json::json;

use crate::{DataplaneError, Result};

/// Executor contract ABI
pub static EXECUTOR_ABI: Lazy<Abi> = Lazy::new(|| {
    serde_json::from_value(json!([
        {
            "inputs": [
                {"internalType": "address[]", "name": "tokens", "type": "address[]"},
                {"internalType": "address[]", "name": "pools", "type": "address[]"},
                {"internalType": "uint256", "name": "amountIn", "type": "uint256"},
                {"internalType": "uint256", "name": "minProfit", "type": "uint256"}
            ],
            "name": "executeArbitrage",
            "outputs": [],
            "stateMutability": "nonpayable",
            "type": "function"
        }
    ]))
    .expect("Valid executor ABI")
});

/// Uniswap V2 pair ABI
pub static UNISWAP_V2_PAIR_ABI: Lazy<Abi> = Lazy::new(|| {
    serde_json::from_value(json!([
        {
            "inputs": [],
            "name": "getReserves",
            "outputs": [
                {"internalType": "uint112", "name": "reserve0", "type": "uint112"},
                {"internalType": "uint112", "name": "reserve1", "type": "uint112"},
                {"internalType": "uint32", "name": "blockTimestampLast", "type": "uint32"}
            ],
            "stateMutability": "view",
            "type": "function"
        },
        {
            "inputs": [],
            "name": "token0",
            "outputs": [{"internalType": "address", "name": "", "type": "address"}],
            "stateMutability": "view",
            "type": "function"
        },
        {
            "inputs": [],
            "name": "token1",
            "outputs": [{"internalType": "address", "name": "", "type": "address"}],
            "stateMutability": "view",
            "type": "function"
        }
    ]))
    .expect("Valid Uniswap V2 pair ABI")
});

/// Reserves reported by a V2 pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairReserves {
    pub reserve0: U256,
    pub reserve1: U256,
    pub block_timestamp_last: u32,
}

/// ABI manager for encoding/decoding contract calls
pub struct AbiManager;

impl AbiManager {
    /// Encode a function call
    pub fn encode_function_call(abi: &Abi, function_name: &str, params: &[Token]) -> Result<Bytes> {
        let function = abi.function(function_name)?;
        Ok(Bytes::from(function.encode_input(params)?))
    }

    /// Decode function output
    pub fn decode_function_output(abi: &Abi, function_name: &str, output: &[u8]) -> Result<Vec<Token>> {
        let function = abi.function(function_name)?;
        Ok(function.decode_output(output)?)
    }

    /// Encode `executeArbitrage(tokens, pools, amountIn, minProfit)`
    pub fn encode_execute_arbitrage(
        tokens: &[Address],
        pools: &[Address],
        amount_in: U256,
        min_profit: U256,
    ) -> Result<Bytes> {
        if tokens.len() != pools.len() + 1 {
            return Err(DataplaneError::internal(format!(
                "cycle of {} tokens needs {} pools, got {}",
                tokens.len(),
                tokens.len().saturating_sub(1),
                pools.len()
            )));
        }
        Self::encode_function_call(
            &EXECUTOR_ABI,
            "executeArbitrage",
            &[
                Token::Array(tokens.iter().copied().map(Token::Address).collect()),
                Token::Array(pools.iter().copied().map(Token::Address).collect()),
                Token::Uint(amount_in),
                Token::Uint(min_profit),
            ],
        )
    }

    /// Encode getReserves() call
    pub fn encode_get_reserves_call() -> Result<Bytes> {
        Self::encode_function_call(&UNISWAP_V2_PAIR_ABI, "getReserves", &[])
    }

    /// Decode getReserves() output
    pub fn decode_get_reserves_output(output: &[u8]) -> Result<PairReserves> {
        let tokens = Self::decode_function_output(&UNISWAP_V2_PAIR_ABI, "getReserves", output)?;

        match tokens.as_slice() {
            [Token::Uint(r0), Token::Uint(r1), Token::Uint(ts)] => Ok(PairReserves {
                reserve0: *r0,
                reserve1: *r1,
                block_timestamp_last: ts.low_u32(),
            }),
            _ => Err(DataplaneError::decode("unexpected getReserves output")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::encode;

    #[test]
    fn test_execute_arbitrage_selector() {
        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);
        let pool = Address::repeat_byte(0x01);
        let data = AbiManager::encode_execute_arbitrage(&[a, b, a], &[pool, pool], U256::exp10(18), U256::zero()).unwrap();

        let selector = ethers::utils::id("executeArbitrage(address[],address[],uint256,uint256)");
        assert_eq!(&data[..4], &selector[..]);

        let decoded = EXECUTOR_ABI
            .function("executeArbitrage")
            .unwrap()
            .decode_input(&data[4..])
            .unwrap();
        assert_eq!(decoded[2], Token::Uint(U256::exp10(18)));
    }

    #[test]
    fn test_execute_arbitrage_rejects_mismatched_hops() {
        let a = Address::repeat_byte(0xaa);
        assert!(AbiManager::encode_execute_arbitrage(&[a, a], &[], U256::one(), U256::zero()).is_err());
    }

    #[test]
    fn test_decode_reserves() {
        let output = encode(&[
            Token::Uint(U256::from(1_000u64)),
            Token::Uint(U256::from(2_500u64)),
            Token::Uint(U256::from(1_700_000_000u64)),
        ]);
        let reserves = AbiManager::decode_get_reserves_output(&output).unwrap();
        assert_eq!(reserves.reserve0, U256::from(1_000u64));
        assert_eq!(reserves.reserve1, U256::from(2_500u64));
        assert_eq!(reserves.block_timestamp_last, 1_700_000_000);

        assert!(AbiManager::decode_get_reserves_output(&[0u8; 4]).is_err());
    }
}
