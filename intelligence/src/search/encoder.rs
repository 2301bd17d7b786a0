//! Payload encoding strategies
//!
//! Turning a cycle into call data is a deployment decision (which executor,
//! which calling convention), so the search takes it as a strategy.

use ethers::types::{Address, Bytes, U256};
use ethers::utils::parse_units;
use vesper_dataplane::contracts::AbiManager;

use super::dfs::Cycle;
use crate::error::{IntelligenceError, Result};

/// Encodes a cycle as executor call data
pub trait PayloadEncoder: Send + Sync {
    fn encode(&self, cycle: &Cycle) -> Result<Bytes>;
}

/// Encodes `executeArbitrage(address[] tokens, address[] pools, uint256 amountIn, uint256 minProfit)`.
///
/// Nodes must be token addresses and every hop must carry its pool address.
#[derive(Debug, Clone)]
pub struct ExecutorCallEncoder {
    amount_in: U256,
    min_profit: U256,
}

impl ExecutorCallEncoder {
    /// `notional` is in units of the origin asset, scaled by `decimals`
    pub fn new(notional: f64, decimals: u32, min_margin: f64) -> Result<Self> {
        Ok(Self {
            amount_in: to_base_units(notional, decimals)?,
            min_profit: to_base_units(notional * min_margin, decimals)?,
        })
    }

    pub fn amount_in(&self) -> U256 {
        self.amount_in
    }
}

fn to_base_units(amount: f64, decimals: u32) -> Result<U256> {
    if !(amount.is_finite() && amount >= 0.0) {
        return Err(IntelligenceError::search(format!("invalid amount {}", amount)));
    }
    let text = format!("{:.*}", decimals as usize, amount);
    let units = parse_units(text, decimals).map_err(|e| IntelligenceError::search(e.to_string()))?;
    Ok(units.into())
}

fn parse_address(value: &str, what: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|_| IntelligenceError::search(format!("{} {:?} is not an address", what, value)))
}

impl PayloadEncoder for ExecutorCallEncoder {
    fn encode(&self, cycle: &Cycle) -> Result<Bytes> {
        let tokens = cycle
            .nodes
            .iter()
            .map(|node| parse_address(node, "node"))
            .collect::<Result<Vec<_>>>()?;
        let pools = cycle
            .venues
            .iter()
            .map(|venue| match venue {
                Some(venue) => parse_address(venue, "venue"),
                None => Err(IntelligenceError::search("hop without a venue")),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(AbiManager::encode_execute_arbitrage(&tokens, &pools, self.amount_in, self.min_profit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    const POOL: &str = "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc";

    #[test]
    fn test_amounts() {
        let encoder = ExecutorCallEncoder::new(1.5, 18, 0.001).unwrap();
        assert_eq!(encoder.amount_in(), U256::from(1_500_000_000_000_000_000u128));
        assert_eq!(encoder.min_profit, U256::from(1_500_000_000_000_000u128));
        assert!(ExecutorCallEncoder::new(f64::NAN, 18, 0.001).is_err());
    }

    #[test]
    fn test_encodes_address_cycle() {
        let encoder = ExecutorCallEncoder::new(1.0, 18, 0.001).unwrap();
        let cycle = Cycle {
            nodes: vec![WETH.into(), USDC.into(), WETH.into()],
            venues: vec![Some(POOL.into()), Some(POOL.into())],
            log_sum: 0.01,
        };
        let payload = encoder.encode(&cycle).unwrap();
        assert_eq!(&payload[..4], &ethers::utils::id("executeArbitrage(address[],address[],uint256,uint256)")[..]);
    }

    #[test]
    fn test_rejects_symbolic_nodes() {
        let encoder = ExecutorCallEncoder::new(1.0, 18, 0.001).unwrap();
        let cycle = Cycle {
            nodes: vec!["A".into(), "B".into(), "A".into()],
            venues: vec![None, None],
            log_sum: 0.01,
        };
        assert!(encoder.encode(&cycle).is_err());
    }
}
