//! Per-account reconciliation cycles.
//!
//! The exchange is authoritative: positions are mirrored with a
//! transactional set-replace, trades are pulled from the last local
//! watermark, PnL snapshots are derived from the replaced set, and an
//! `account_update` event closes the cycle. A positions failure aborts the
//! cycle (partial state is worse than stale); a trades failure lets the
//! positions sync stand.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::domain::account::ExchangeAccount;
use crate::domain::order::OrderStatus;
use crate::domain::pnl::PnlRecord;
use crate::domain::position::Position;
use crate::domain::trade::Trade;
use crate::error::{Error, Result};
use crate::infrastructure::breaker::BreakerRegistry;
use crate::infrastructure::vault::{EncryptedCredentials, Vault};
use crate::port::outbound::events::{AccountUpdate, EventPublisher};
use crate::port::outbound::exchange::{AdapterFactory, ExchangeAdapter, Fill};
use crate::port::outbound::notifier::{Event, NotifierRegistry};
use crate::port::outbound::store::{
    AccountStore, OrderStore, PnlStore, PositionStore, TradeStore,
};

pub struct Reconciler<AS, PS, TS, OS, NS> {
    pub(super) accounts: Arc<AS>,
    positions: Arc<PS>,
    trades: Arc<TS>,
    orders: Arc<OS>,
    pnl: Arc<NS>,
    vault: Arc<Vault>,
    adapters: Arc<dyn AdapterFactory>,
    breakers: Arc<BreakerRegistry>,
    publisher: Arc<dyn EventPublisher>,
    notifiers: Arc<NotifierRegistry>,
}

impl<AS, PS, TS, OS, NS> Reconciler<AS, PS, TS, OS, NS>
where
    AS: AccountStore + Send + Sync + 'static,
    PS: PositionStore + Send + Sync + 'static,
    TS: TradeStore + Send + Sync + 'static,
    OS: OrderStore + Send + Sync + 'static,
    NS: PnlStore + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<AS>,
        positions: Arc<PS>,
        trades: Arc<TS>,
        orders: Arc<OS>,
        pnl: Arc<NS>,
        vault: Arc<Vault>,
        adapters: Arc<dyn AdapterFactory>,
        breakers: Arc<BreakerRegistry>,
        publisher: Arc<dyn EventPublisher>,
        notifiers: Arc<NotifierRegistry>,
    ) -> Self {
        Self {
            accounts,
            positions,
            trades,
            orders,
            pnl,
            vault,
            adapters,
            breakers,
            publisher,
            notifiers,
        }
    }

    /// Run one reconciliation cycle for an account.
    pub async fn cycle(&self, account_id: &str) -> Result<()> {
        let Some(account) = self.accounts.get(account_id).await? else {
            warn!(account_id, "Reconcile requested for an unknown account");
            return Ok(());
        };
        if !account.active {
            debug!(account_id, "Skipping inactive account");
            return Ok(());
        }

        let creds = self.vault.decrypt_credentials(&EncryptedCredentials {
            api_key: account.api_key_enc.clone(),
            api_secret: account.api_secret_enc.clone(),
            passphrase: account.passphrase_enc.clone(),
        })?;
        let adapter = self.adapters.build(&account, &creds)?;

        let snapshot = match self.sync_positions(&account, &*adapter).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                if let Error::CredentialsInvalid(_) = &err {
                    self.deactivate(&account, &err).await;
                }
                return Err(err);
            }
        };

        // A trades failure leaves the positions sync standing.
        if let Err(err) = self.sync_trades(&account, &*adapter).await {
            warn!(account_id = %account.id, error = %err, "Trades sync failed, positions stand");
        }

        let realized: Decimal = snapshot.iter().map(|p| p.realized_pnl).sum();
        let unrealized: Decimal = snapshot.iter().map(|p| p.unrealized_pnl).sum();
        self.pnl
            .insert(&PnlRecord::snapshot(
                &account.id,
                &account.user_id,
                realized,
                unrealized,
                Utc::now(),
            ))
            .await?;

        // Best-effort broadcast; a publish failure never fails the cycle.
        if let Err(err) = self
            .publisher
            .publish(AccountUpdate::new(&account.id, &account.user_id, Utc::now()))
        {
            warn!(account_id = %account.id, error = %err, "Failed to publish account update");
        }

        info!(
            account_id = %account.id,
            positions = snapshot.len(),
            realized = %realized,
            unrealized = %unrealized,
            "Reconcile cycle complete"
        );
        Ok(())
    }

    /// Mirror the authoritative position set. Returns the replaced rows.
    async fn sync_positions(
        &self,
        account: &ExchangeAccount,
        adapter: &dyn ExchangeAdapter,
    ) -> Result<Vec<Position>> {
        let live = self
            .breakers
            .get(&format!("exchange-orders-{}", adapter.exchange()))
            .call(|| adapter.get_positions(None))
            .await?;

        let now = Utc::now();
        let rows: Vec<Position> = live
            .into_iter()
            .filter(|p| !p.size.is_zero())
            .map(|p| Position {
                id: uuid::Uuid::new_v4().to_string(),
                account_id: account.id.clone(),
                exchange: account.exchange,
                symbol: p.symbol,
                side: p.side,
                size: p.size.abs(),
                entry_price: p.entry_price,
                mark_price: p.mark_price,
                unrealized_pnl: p.unrealized_pnl,
                realized_pnl: p.realized_pnl,
                leverage: p.leverage,
                liquidation_price: p.liquidation_price,
                updated_at: now,
            })
            .collect();

        self.positions.replace_all(&account.id, &rows).await?;
        Ok(rows)
    }

    /// Pull fills since the local watermark and roll them into orders.
    async fn sync_trades(
        &self,
        account: &ExchangeAccount,
        adapter: &dyn ExchangeAdapter,
    ) -> Result<()> {
        let since = self.trades.latest_timestamp(&account.id).await?;
        let fills = self
            .breakers
            .get(&format!("exchange-orders-{}", adapter.exchange()))
            .call(|| adapter.get_trades(None, since))
            .await?;
        if fills.is_empty() {
            return Ok(());
        }

        // Remember each fill's client order id for the fallback lookup.
        let client_ids: HashMap<String, Option<String>> = fills
            .iter()
            .map(|f| (f.trade_id.clone(), f.client_order_id.clone()))
            .collect();

        let candidates: Vec<Trade> = fills.iter().map(|f| fill_to_trade(account, f)).collect();
        let inserted = self.trades.insert_new(&candidates).await?;
        debug!(
            account_id = %account.id,
            fetched = candidates.len(),
            inserted = inserted.len(),
            "Trades synced"
        );

        for trade in &inserted {
            let order = match self
                .orders
                .find_by_exchange_order_id(&account.id, &trade.order_id)
                .await?
            {
                Some(order) => Some(order),
                None => match client_ids.get(&trade.trade_id).and_then(Clone::clone) {
                    Some(client_order_id) => {
                        self.orders
                            .find_by_client_order_id(&account.id, &client_order_id)
                            .await?
                    }
                    None => None,
                },
            };
            let Some(order) = order else {
                debug!(trade_id = %trade.trade_id, "Fill without a local order");
                continue;
            };

            let fills_for_order = self.trades.for_order(&trade.order_id).await?;
            let filled: Decimal = fills_for_order.iter().map(|t| t.quantity).sum();
            let remaining = (order.quantity - filled).max(Decimal::ZERO);
            let status = if filled >= order.quantity {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
            self.orders
                .update_fill(&order.id, filled, remaining, status)
                .await?;
        }
        Ok(())
    }

    /// Auth failures stop us from scheduling this account again until an
    /// operator reactivates it.
    async fn deactivate(&self, account: &ExchangeAccount, err: &Error) {
        warn!(
            account_id = %account.id,
            exchange = %account.exchange,
            error = %err,
            "Deactivating account after credential rejection"
        );
        if let Err(store_err) = self.accounts.deactivate(&account.id).await {
            warn!(account_id = %account.id, error = %store_err, "Failed to deactivate account");
            return;
        }
        self.notifiers.notify_all(Event::AccountDeactivated {
            account_id: account.id.clone(),
            exchange: account.exchange.as_str().to_string(),
            reason: err.to_string(),
        });
    }
}

fn fill_to_trade(account: &ExchangeAccount, fill: &Fill) -> Trade {
    Trade {
        id: uuid::Uuid::new_v4().to_string(),
        trade_id: fill.trade_id.clone(),
        order_id: fill.order_id.clone(),
        account_id: account.id.clone(),
        symbol: fill.symbol.clone(),
        side: fill.side,
        quantity: fill.quantity,
        price: fill.price,
        fee: fill.fee,
        fee_currency: fill.fee_currency.clone(),
        executed_at: fill.executed_at,
    }
}
