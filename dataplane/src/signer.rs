//! Local-key transaction signing

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes};

use crate::{traits::TransactionSigner, Chain, DataplaneError, Result};

/// Signs transactions with an in-memory private key bound to one chain id
#[derive(Debug, Clone)]
pub struct WalletSigner {
    wallet: LocalWallet,
}

impl WalletSigner {
    /// Parse a hex private key (with or without `0x`)
    pub fn from_private_key(private_key: &str, chain: Chain) -> Result<Self> {
        let wallet = private_key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| DataplaneError::internal(format!("Invalid private key for {}: {}", chain, e)))?;
        Ok(Self::new(wallet, chain))
    }

    pub fn new(wallet: LocalWallet, chain: Chain) -> Self {
        Self {
            wallet: wallet.with_chain_id(chain.chain_id()),
        }
    }
}

#[async_trait]
impl TransactionSigner for WalletSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, tx: &TypedTransaction) -> Result<Bytes> {
        let mut tx = tx.clone();
        if tx.chain_id().is_none() {
            tx.set_chain_id(self.wallet.chain_id());
        }
        let signature = self.wallet.sign_transaction(&tx).await?;
        Ok(tx.rlp_signed(&signature))
    }
}
