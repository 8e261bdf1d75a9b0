//! Adapter registry: dispatch by exchange tag.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::account::{Credentials, Exchange, ExchangeAccount};
use crate::error::Result;
use crate::port::outbound::exchange::ExchangeAdapter;

use super::binance::BinanceAdapter;
use super::bitget::BitgetAdapter;
use super::bybit::BybitAdapter;
use super::coinbase::CoinbaseAdapter;
use super::okx::OkxAdapter;

/// Builds adapters keyed by exchange tag and testnet flag.
///
/// Construction is cheap (an HTTP client per adapter); the executor builds
/// one per job, the reconciler one per account cycle.
pub struct AdapterRegistry {
    timeout: Duration,
}

impl AdapterRegistry {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Build an authenticated adapter for an account.
    pub fn build(
        &self,
        account: &ExchangeAccount,
        creds: &Credentials,
    ) -> Result<Arc<dyn ExchangeAdapter>> {
        self.build_for(account.exchange, account.testnet, creds)
    }

    /// Build an adapter for an explicit tag.
    pub fn build_for(
        &self,
        exchange: Exchange,
        testnet: bool,
        creds: &Credentials,
    ) -> Result<Arc<dyn ExchangeAdapter>> {
        Ok(match exchange {
            Exchange::Binance => Arc::new(BinanceAdapter::new(creds, testnet, self.timeout)?),
            Exchange::Bybit => Arc::new(BybitAdapter::new(creds, testnet, self.timeout)?),
            Exchange::Okx => Arc::new(OkxAdapter::new(creds, testnet, self.timeout)?),
            Exchange::Coinbase => Arc::new(CoinbaseAdapter::new(creds, testnet, self.timeout)?),
            Exchange::Bitget => Arc::new(BitgetAdapter::new(creds, testnet, self.timeout)?),
        })
    }

    /// Build an unauthenticated adapter for public endpoints (health
    /// probes, ticker pings).
    pub fn build_public(&self, exchange: Exchange) -> Result<Arc<dyn ExchangeAdapter>> {
        let creds = Credentials {
            api_key: String::new(),
            api_secret: String::new(),
            passphrase: Some(String::new()),
        };
        self.build_for(exchange, false, &creds)
    }
}

impl crate::port::outbound::exchange::AdapterFactory for AdapterRegistry {
    fn build(
        &self,
        account: &ExchangeAccount,
        creds: &Credentials,
    ) -> Result<Arc<dyn ExchangeAdapter>> {
        AdapterRegistry::build(self, account, creds)
    }

    fn build_public(&self, exchange: Exchange) -> Result<Arc<dyn ExchangeAdapter>> {
        AdapterRegistry::build_public(self, exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_every_tag() {
        let registry = AdapterRegistry::new(Duration::from_secs(10));
        for exchange in Exchange::ALL {
            let adapter = registry.build_public(exchange).unwrap();
            assert_eq!(adapter.exchange(), exchange);
        }
    }

    #[test]
    fn normalization_is_adapter_owned() {
        let registry = AdapterRegistry::new(Duration::from_secs(10));

        let binance = registry.build_public(Exchange::Binance).unwrap();
        let okx = registry.build_public(Exchange::Okx).unwrap();

        // The same written ticker maps to venue-specific canon.
        assert_eq!(binance.normalize_symbol("BTCUSDT.P"), "BTCUSDT");
        assert_eq!(okx.normalize_symbol("BTCUSDT.P"), "BTC-USDT-SWAP");
    }
}
