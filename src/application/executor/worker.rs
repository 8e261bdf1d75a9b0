//! Execution worker: consumes jobs and performs the exchange-side effect.
//!
//! Per job the pipeline is a sequential critical section: precheck,
//! credential decrypt, adapter selection, action dispatch, sizing against
//! the price fallback chain, balance guard, leverage, breaker-protected
//! submission, optional protective legs, persistence. Distinct jobs run
//! concurrently on a bounded pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::domain::account::ExchangeAccount;
use crate::domain::alert::{Action, Alert};
use crate::domain::job::Job;
use crate::domain::order::{
    close_client_order_id, entry_client_order_id, protective_client_order_id, Order, OrderSide,
    OrderStatus, OrderType, ProtectiveLeg,
};
use crate::error::{Error, Result};
use crate::infrastructure::breaker::BreakerRegistry;
use crate::infrastructure::retry::{retry, RetryPolicy};
use crate::infrastructure::vault::{EncryptedCredentials, Vault};
use crate::port::outbound::exchange::{
    AdapterFactory, ExchangeAdapter, PlaceOrderRequest, PlacedOrder,
};
use crate::port::outbound::notifier::{Event, NotifierRegistry};
use crate::port::outbound::queue::{Delivery, JobQueue, WorkKind, WorkPayload};
use crate::port::outbound::store::{AccountStore, JobStore, OrderStore};

use super::sizing;

/// Observable outcome of one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// One or more orders were submitted and persisted.
    Submitted { orders: usize },
    /// Nothing to do (close with no open position).
    Skipped,
}

pub struct ExecutionWorker<JS, AS, OS> {
    jobs: Arc<JS>,
    accounts: Arc<AS>,
    orders: Arc<OS>,
    vault: Arc<Vault>,
    adapters: Arc<dyn AdapterFactory>,
    breakers: Arc<BreakerRegistry>,
    queue: Arc<dyn JobQueue>,
    notifiers: Arc<NotifierRegistry>,
    retry_policy: RetryPolicy,
}

impl<JS, AS, OS> ExecutionWorker<JS, AS, OS>
where
    JS: JobStore + Send + Sync + 'static,
    AS: AccountStore + Send + Sync + 'static,
    OS: OrderStore + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<JS>,
        accounts: Arc<AS>,
        orders: Arc<OS>,
        vault: Arc<Vault>,
        adapters: Arc<dyn AdapterFactory>,
        breakers: Arc<BreakerRegistry>,
        queue: Arc<dyn JobQueue>,
        notifiers: Arc<NotifierRegistry>,
    ) -> Self {
        Self {
            jobs,
            accounts,
            orders,
            vault,
            adapters,
            breakers,
            queue,
            notifiers,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Consume loop: at most `concurrency` jobs in flight, drains for up to
    /// `drain_deadline` on shutdown.
    pub async fn run(
        self: Arc<Self>,
        concurrency: usize,
        drain_deadline: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        info!(concurrency, "Execution worker started");

        loop {
            // Back-pressure: hold a permit before taking a delivery.
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                delivery = self.queue.next(WorkKind::Execute) => {
                    let Some(delivery) = delivery else { break };
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        worker.handle(delivery).await;
                        drop(permit);
                    });
                }
            }
        }

        // Stop accepting; finish in-flight jobs up to the drain deadline.
        let drained = tokio::time::timeout(
            drain_deadline,
            semaphore.acquire_many(concurrency as u32),
        )
        .await;
        match drained {
            Ok(_) => info!("Execution worker drained"),
            Err(_) => warn!("Drain deadline reached with jobs still in flight"),
        }
    }

    /// Process one delivery end to end, including job-row bookkeeping and
    /// queue acknowledgement.
    pub async fn handle(&self, delivery: Delivery) {
        let WorkPayload::Execute { job_id, alert_id } = &delivery.payload else {
            self.queue.ack(&delivery).await;
            return;
        };

        let job = match self.jobs.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, "Delivery references a missing job");
                self.queue.ack(&delivery).await;
                return;
            }
            Err(err) => {
                error!(job_id = %job_id, error = %err, "Failed to load job");
                self.queue.nack(&delivery, &err).await;
                return;
            }
        };

        // Redelivery of finished work must not double-trade.
        if job.status.is_terminal() {
            debug!(job_id = %job.id, status = job.status.as_str(), "Skipping redelivered terminal job");
            self.queue.ack(&delivery).await;
            return;
        }

        if let Err(err) = self
            .jobs
            .set_status(&job.id, crate::domain::job::JobStatus::Processing)
            .await
        {
            error!(job_id = %job.id, error = %err, "Failed to mark job processing");
            self.queue.nack(&delivery, &err).await;
            return;
        }

        match self.execute(&job).await {
            Ok(outcome) => {
                if let Err(err) = self.jobs.complete(&job.id, Utc::now()).await {
                    error!(job_id = %job.id, error = %err, "Failed to mark job completed");
                    self.queue.nack(&delivery, &err).await;
                    return;
                }
                info!(
                    job_id = %job.id,
                    alert_id = %alert_id,
                    attempt = delivery.attempt,
                    outcome = ?outcome,
                    "Job completed"
                );
                self.queue.ack(&delivery).await;
            }
            Err(err) => {
                warn!(
                    job_id = %job.id,
                    alert_id = %alert_id,
                    attempt = delivery.attempt,
                    code = err.code(),
                    error = %err,
                    "Job failed"
                );
                if let Err(store_err) = self.jobs.fail(&job.id, &err.job_error()).await {
                    error!(job_id = %job.id, error = %store_err, "Failed to record job failure");
                }
                if !err.is_retryable() {
                    self.notifiers.notify_all(Event::JobFailed {
                        job_id: job.id.clone(),
                        alert_id: alert_id.clone(),
                        code: err.code().to_string(),
                    });
                }
                self.queue.nack(&delivery, &err).await;
            }
        }
    }

    /// Execute the job's alert against its exchange account.
    async fn execute(&self, job: &Job) -> Result<ExecutionOutcome> {
        let account_id = job
            .account_id
            .as_deref()
            .ok_or_else(|| Error::NoAccount(format!("job {} has no account", job.id)))?;
        let account = self
            .accounts
            .get(account_id)
            .await?
            .ok_or_else(|| Error::NoAccount(format!("account {account_id} not found")))?;
        if !account.active {
            return Err(Error::AccountInactive(account.id.clone()));
        }

        let creds = self.vault.decrypt_credentials(&EncryptedCredentials {
            api_key: account.api_key_enc.clone(),
            api_secret: account.api_secret_enc.clone(),
            passphrase: account.passphrase_enc.clone(),
        })?;
        let adapter = self.adapters.build(&account, &creds)?;

        let alert = Alert::parse(job.payload.as_bytes())?;
        match alert.action {
            Action::Buy | Action::Sell => self.open_position(job, &account, &*adapter, &alert).await,
            Action::Close => self.close_position(job, &account, &*adapter, &alert).await,
            Action::CloseAll => self.close_all(job, &account, &*adapter).await,
        }
    }

    async fn open_position(
        &self,
        job: &Job,
        account: &ExchangeAccount,
        adapter: &dyn ExchangeAdapter,
        alert: &Alert,
    ) -> Result<ExecutionOutcome> {
        let symbol = adapter.normalize_symbol(&alert.ticker);
        let side = match alert.action {
            Action::Sell => OrderSide::Sell,
            _ => OrderSide::Buy,
        };
        let leverage = alert.effective_leverage();
        let reduce_only = alert.reduce_only.unwrap_or(false);

        let price = self.resolve_price(adapter, account, &symbol).await?;

        // Percentage sizing needs the spendable quote balance.
        let free_balance = if matches!(
            alert.size_mode,
            Some(crate::domain::alert::SizeMode::Percentage)
        ) {
            let balances = self
                .breakers
                .get(&format!("exchange-balance-{}", adapter.exchange()))
                .call(|| adapter.get_balance())
                .await?;
            free_quote_balance(&balances, &symbol)
        } else {
            Decimal::ZERO
        };

        let quantity = sizing::order_quantity(alert, price, free_balance)?;

        // Balance guard; advisory when the order only reduces exposure.
        match adapter
            .validate_balance(&symbol, side, quantity, price, leverage)
            .await
        {
            Ok(check) if !check.is_valid => {
                let reason = check.reason.unwrap_or_else(|| "balance check failed".into());
                if reduce_only {
                    warn!(symbol = %symbol, reason = %reason, "Balance guard advisory on reduce-only order");
                } else {
                    return Err(Error::InsufficientFunds(reason));
                }
            }
            Ok(_) => {}
            Err(err) if reduce_only => {
                warn!(symbol = %symbol, error = %err, "Balance guard unavailable on reduce-only order");
            }
            Err(err) => return Err(err),
        }

        if leverage > 1 {
            match adapter.set_leverage(&symbol, leverage).await {
                Ok(outcome) => debug!(symbol = %symbol, leverage, ?outcome, "Leverage set"),
                Err(err) => warn!(symbol = %symbol, leverage, error = %err, "Set-leverage failed, continuing"),
            }
        }

        let client_order_id = entry_client_order_id(&job.alert_id, Utc::now());
        let placed = self
            .submit(adapter, &PlaceOrderRequest {
                symbol: symbol.clone(),
                side,
                amount: quantity,
                order_type: OrderType::Market,
                client_order_id: client_order_id.clone(),
                price: None,
                reduce_only,
                stop_loss: None,
                take_profit: None,
            })
            .await?;
        self.persist_order(job, account, &placed, OrderType::Market, reduce_only)
            .await?;
        let mut submitted = 1;

        // Protective legs: separate reduce-only conditional orders in the
        // same client-order-id family. The entry is already live, so a
        // failed leg logs rather than failing (and re-running) the job.
        for (leg, trigger) in [
            (ProtectiveLeg::StopLoss, alert.stop_loss),
            (ProtectiveLeg::TakeProfit, alert.take_profit),
        ] {
            let Some(trigger) = trigger else { continue };
            let order_type = match leg {
                ProtectiveLeg::StopLoss => OrderType::Stop,
                ProtectiveLeg::TakeProfit => OrderType::TakeProfit,
            };
            let request = PlaceOrderRequest {
                symbol: symbol.clone(),
                side: side.opposite(),
                amount: quantity,
                order_type,
                client_order_id: protective_client_order_id(&client_order_id, leg),
                price: Some(trigger),
                reduce_only: true,
                stop_loss: None,
                take_profit: None,
            };
            match self.submit(adapter, &request).await {
                Ok(placed) => {
                    self.persist_order(job, account, &placed, order_type, true).await?;
                    submitted += 1;
                }
                Err(err) => {
                    warn!(
                        symbol = %symbol,
                        leg = ?leg,
                        error = %err,
                        "Protective order failed; entry remains live"
                    );
                }
            }
        }

        Ok(ExecutionOutcome::Submitted { orders: submitted })
    }

    async fn close_position(
        &self,
        job: &Job,
        account: &ExchangeAccount,
        adapter: &dyn ExchangeAdapter,
        alert: &Alert,
    ) -> Result<ExecutionOutcome> {
        let symbol = adapter.normalize_symbol(&alert.ticker);
        let positions = self
            .breakers
            .get(&format!("exchange-orders-{}", adapter.exchange()))
            .call(|| adapter.get_positions(Some(&symbol)))
            .await?;

        let Some(position) = positions.into_iter().find(|p| p.symbol == symbol) else {
            info!(symbol = %symbol, "Close requested with no open position");
            return Ok(ExecutionOutcome::Skipped);
        };

        let placed = self
            .submit(adapter, &PlaceOrderRequest {
                symbol: symbol.clone(),
                side: position.side.closing_order_side(),
                amount: position.size.abs(),
                order_type: OrderType::Market,
                client_order_id: close_client_order_id(&job.alert_id, Utc::now()),
                price: None,
                reduce_only: true,
                stop_loss: None,
                take_profit: None,
            })
            .await?;
        self.persist_order(job, account, &placed, OrderType::Market, true).await?;
        Ok(ExecutionOutcome::Submitted { orders: 1 })
    }

    async fn close_all(
        &self,
        job: &Job,
        account: &ExchangeAccount,
        adapter: &dyn ExchangeAdapter,
    ) -> Result<ExecutionOutcome> {
        let positions = self
            .breakers
            .get(&format!("exchange-orders-{}", adapter.exchange()))
            .call(|| adapter.get_positions(None))
            .await?;
        if positions.is_empty() {
            info!(account_id = %account.id, "Close-all with no open positions");
            return Ok(ExecutionOutcome::Skipped);
        }

        let mut submitted = 0;
        let mut last_error = None;
        for position in positions {
            let request = PlaceOrderRequest {
                symbol: position.symbol.clone(),
                side: position.side.closing_order_side(),
                amount: position.size.abs(),
                order_type: OrderType::Market,
                client_order_id: close_client_order_id(&job.alert_id, Utc::now()),
                price: None,
                reduce_only: true,
                stop_loss: None,
                take_profit: None,
            };
            match self.submit(adapter, &request).await {
                Ok(placed) => {
                    self.persist_order(job, account, &placed, OrderType::Market, true).await?;
                    submitted += 1;
                }
                Err(err) => {
                    warn!(symbol = %position.symbol, error = %err, "Close failed for position");
                    last_error = Some(err);
                }
            }
        }

        // The job stands if any close went through.
        if submitted > 0 {
            Ok(ExecutionOutcome::Submitted { orders: submitted })
        } else {
            Err(last_error.unwrap_or_else(|| Error::Internal("close-all produced nothing".into())))
        }
    }

    /// Price-source fallback chain: ticker, open-position mark price, most
    /// recent open order. Refuses to trade blind.
    async fn resolve_price(
        &self,
        adapter: &dyn ExchangeAdapter,
        account: &ExchangeAccount,
        symbol: &str,
    ) -> Result<Decimal> {
        let exchange = adapter.exchange();

        let ticker_breaker = self.breakers.get(&format!("exchange-ticker-{exchange}"));
        match retry(&self.retry_policy, "get_ticker", || {
            ticker_breaker.call(|| adapter.get_ticker(symbol))
        })
        .await
        {
            Ok(ticker) if ticker.price > Decimal::ZERO => return Ok(ticker.price),
            Ok(_) => warn!(symbol, "Ticker returned a non-positive price"),
            Err(err) => warn!(symbol, error = %err, "Ticker unavailable, falling back"),
        }

        let orders_breaker = self.breakers.get(&format!("exchange-orders-{exchange}"));
        match retry(&self.retry_policy, "get_positions", || {
            orders_breaker.call(|| adapter.get_positions(Some(symbol)))
        })
        .await
        {
            Ok(positions) => {
                if let Some(mark) = positions
                    .iter()
                    .find(|p| p.symbol == symbol && p.mark_price > Decimal::ZERO)
                    .map(|p| p.mark_price)
                {
                    debug!(symbol, "Using open-position mark price");
                    return Ok(mark);
                }
            }
            Err(err) => warn!(symbol, error = %err, "Positions unavailable, falling back"),
        }

        match retry(&self.retry_policy, "get_open_orders", || {
            orders_breaker.call(|| adapter.get_open_orders(Some(symbol)))
        })
        .await
        {
            Ok(orders) => {
                if let Some(price) = orders
                    .iter()
                    .find(|o| o.symbol == symbol && o.price > Decimal::ZERO)
                    .map(|o| o.price)
                {
                    debug!(symbol, "Using most recent open-order price");
                    return Ok(price);
                }
            }
            Err(err) => warn!(symbol, error = %err, "Open orders unavailable"),
        }

        warn!(symbol, account_id = %account.id, "All price sources exhausted");
        Err(Error::PriceFeedUnavailable(symbol.to_string()))
    }

    async fn submit(
        &self,
        adapter: &dyn ExchangeAdapter,
        request: &PlaceOrderRequest,
    ) -> Result<PlacedOrder> {
        self.breakers
            .get(&format!("exchange-place-order-{}", adapter.exchange()))
            .call(|| adapter.place_order(request))
            .await
    }

    async fn persist_order(
        &self,
        job: &Job,
        account: &ExchangeAccount,
        placed: &PlacedOrder,
        order_type: OrderType,
        reduce_only: bool,
    ) -> Result<()> {
        let now = Utc::now();
        let order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            client_order_id: placed
                .client_order_id
                .clone()
                .unwrap_or_else(|| format!("tv_{}_{}", job.alert_id, now.timestamp_millis())),
            exchange_order_id: Some(placed.exchange_order_id.clone()),
            account_id: account.id.clone(),
            exchange: account.exchange,
            symbol: placed.symbol.clone(),
            side: placed.side,
            order_type,
            quantity: placed.quantity,
            price: placed.price,
            filled: placed.filled,
            remaining: (placed.quantity - placed.filled).max(Decimal::ZERO),
            status: map_exchange_status(&placed.status),
            reduce_only,
            created_at: now,
            updated_at: now,
        };
        self.orders.upsert(&order).await
    }
}

/// Spendable quote balance for a symbol, across the stablecoin quotes we
/// trade against.
fn free_quote_balance(
    balances: &std::collections::HashMap<String, Decimal>,
    symbol: &str,
) -> Decimal {
    for quote in ["USDT", "USDC", "USD", "BUSD"] {
        if symbol.contains(quote) {
            if let Some(free) = balances.get(quote) {
                return *free;
            }
        }
    }
    balances.get("USDT").copied().unwrap_or(Decimal::ZERO)
}

/// Map a venue status string onto the local order lifecycle.
fn map_exchange_status(raw: &str) -> OrderStatus {
    match raw.to_ascii_uppercase().as_str() {
        "FILLED" => OrderStatus::Filled,
        "PARTIALLY_FILLED" | "PARTIALLYFILLED" | "PARTIALLYFILLEDCANCELED" => {
            OrderStatus::PartiallyFilled
        }
        "CANCELED" | "CANCELLED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" => OrderStatus::Expired,
        "NEW" | "LIVE" | "OPEN" | "CREATED" | "ACCEPTED" => OrderStatus::Open,
        _ => OrderStatus::Submitted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn exchange_statuses_map_to_local_lifecycle() {
        assert_eq!(map_exchange_status("FILLED"), OrderStatus::Filled);
        assert_eq!(map_exchange_status("Filled"), OrderStatus::Filled);
        assert_eq!(map_exchange_status("NEW"), OrderStatus::Open);
        assert_eq!(map_exchange_status("live"), OrderStatus::Open);
        assert_eq!(map_exchange_status("CANCELED"), OrderStatus::Cancelled);
        assert_eq!(map_exchange_status("whatever"), OrderStatus::Submitted);
    }

    #[test]
    fn quote_balance_matches_the_symbol_quote() {
        let mut balances = std::collections::HashMap::new();
        balances.insert("USDT".to_string(), dec!(1000));
        balances.insert("USDC".to_string(), dec!(50));

        assert_eq!(free_quote_balance(&balances, "BTCUSDT"), dec!(1000));
        assert_eq!(free_quote_balance(&balances, "ETH-USDC"), dec!(50));
        // Unknown quote falls back to USDT.
        assert_eq!(free_quote_balance(&balances, "BTCETH"), dec!(1000));
    }
}
