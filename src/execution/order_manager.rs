//! Post-only order placement with the unfilled retry protocol
//!
//! Orders rest at the touch (bid for longs, ask for shorts). An unfilled order
//! is cancelled and reposted one tick further through the book per attempt
//! until it fills, the slip cap is hit, attempts run out, the deadline
//! passes or the caller cancels. Urgent exits fall back to a market order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::execution::exchange::{ExchangeGateway, FillState, Submission};
use crate::models::{MicroSnapshot, Side};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderConfig {
    pub max_slip_attempts: usize,
    pub max_slip_pct: f64,        // Total adverse slip allowed, percent of first price
    pub unfilled_wait_ms: u64,    // Wait before each fill check
    pub tick_size: f64,
    pub protocol_deadline_ms: u64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            max_slip_attempts: 3,
            max_slip_pct: 0.05,
            unfilled_wait_ms: 2_000,
            tick_size: 0.01,
            protocol_deadline_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    PostOnly,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTransition {
    pub at: DateTime<Utc>,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub side: Side, // Direction of this order, not of the position
    pub order_type: OrderType,
    pub price: f64,
    pub quantity: f64,
    pub filled_quantity: f64,
    pub average_fill_price: Option<f64>,
    pub reduce_only: bool,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub transitions: Vec<OrderTransition>,
    pub reject_reason: Option<String>,
}

impl Order {
    pub fn new(side: Side, order_type: OrderType, price: f64, quantity: f64, reduce_only: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            side,
            order_type,
            price,
            quantity,
            filled_quantity: 0.0,
            average_fill_price: None,
            reduce_only,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            transitions: Vec::new(),
            reject_reason: None,
        }
    }

    pub fn transition(&mut self, to: OrderStatus, note: impl Into<String>) {
        if self.status == to {
            return;
        }
        self.transitions.push(OrderTransition {
            at: Utc::now(),
            from: self.status,
            to,
            note: note.into(),
        });
        self.status = to;
    }

    pub fn remaining(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }

    fn apply_fill(&mut self, fill: &FillState) {
        self.filled_quantity = fill.filled_quantity.min(self.quantity);
        if fill.average_price.is_some() {
            self.average_fill_price = fill.average_price;
        }
        self.transition(fill.status, "exchange update");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolOutcome {
    Filled,
    UrgentMarketFallback,
    SlipCapExceeded,
    MaxAttemptsReached,
    Rejected,
    Cancelled,
    DeadlineExceeded,
    Fault(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolReport {
    pub outcome: ProtocolOutcome,
    pub attempts: usize, // Reposts after the first placement
    pub total_slip_pct: f64,
    pub order_ids: Vec<Uuid>,
    pub filled_quantity: f64,
    pub average_price: Option<f64>,
}

impl ProtocolReport {
    /// True when the protocol ended with the full quantity executed
    pub fn is_filled(&self) -> bool {
        matches!(
            self.outcome,
            ProtocolOutcome::Filled | ProtocolOutcome::UrgentMarketFallback
        )
    }
}

/// Retry bookkeeping for one protocol run
#[derive(Debug)]
struct RetryState {
    side: Side,
    quantity: f64,
    original_price: f64,
    attempt: usize,
    total_slip_pct: f64,
    deadline: Instant,
    order_ids: Vec<Uuid>,
    fills: HashMap<Uuid, (f64, f64)>, // order id → (qty, avg price)
}

impl RetryState {
    fn filled_quantity(&self) -> f64 {
        self.fills.values().map(|(qty, _)| qty).sum()
    }

    fn remaining(&self) -> f64 {
        (self.quantity - self.filled_quantity()).max(0.0)
    }

    fn average_price(&self) -> Option<f64> {
        let qty = self.filled_quantity();
        if qty <= 0.0 {
            return None;
        }
        let notional: f64 = self.fills.values().map(|(q, p)| q * p).sum();
        Some(notional / qty)
    }

    fn record(&mut self, order: &Order) {
        if order.filled_quantity > 0.0 {
            let price = order.average_fill_price.unwrap_or(order.price);
            self.fills.insert(order.id, (order.filled_quantity, price));
        }
    }

    /// Price for the current attempt: `attempt` ticks through the touch
    fn slipped_price(&self, tick: f64) -> f64 {
        let slip = tick * self.attempt as f64;
        match self.side {
            Side::Long => self.original_price + slip,
            Side::Short => self.original_price - slip,
        }
    }

    fn report(&self, outcome: ProtocolOutcome) -> ProtocolReport {
        ProtocolReport {
            outcome,
            attempts: self.attempt,
            total_slip_pct: self.total_slip_pct,
            order_ids: self.order_ids.clone(),
            filled_quantity: self.filled_quantity(),
            average_price: self.average_price(),
        }
    }
}

enum WaitResult {
    Elapsed,
    Cancelled,
    DeadlineExceeded,
}

pub struct OrderManager {
    config: OrderConfig,
    exchange: Arc<dyn ExchangeGateway>,
    orders: HashMap<Uuid, Order>,
    sequence: Vec<Uuid>, // Placement order
}

impl OrderManager {
    pub fn new(config: OrderConfig, exchange: Arc<dyn ExchangeGateway>) -> Self {
        Self {
            config,
            exchange,
            orders: HashMap::new(),
            sequence: Vec::new(),
        }
    }

    pub fn config(&self) -> &OrderConfig {
        &self.config
    }

    /// Resting price at the touch: best bid to buy, best ask to sell
    pub fn post_only_price(side: Side, snapshot: &MicroSnapshot) -> f64 {
        match side {
            Side::Long => snapshot.best_bid,
            Side::Short => snapshot.best_ask,
        }
    }

    pub fn get_order(&self, id: Uuid) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn active_orders(&self) -> Vec<&Order> {
        self.sequence
            .iter()
            .filter_map(|id| self.orders.get(id))
            .filter(|o| !o.status.is_terminal())
            .collect()
    }

    /// Most recent orders first
    pub fn order_history(&self, limit: usize) -> Vec<&Order> {
        self.sequence
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| self.orders.get(id))
            .collect()
    }

    pub async fn place_post_only(
        &mut self,
        side: Side,
        quantity: f64,
        price: f64,
        reduce_only: bool,
    ) -> Result<Order> {
        let order = Order::new(side, OrderType::PostOnly, price, quantity, reduce_only);
        self.submit(order).await
    }

    pub async fn place_market(
        &mut self,
        side: Side,
        quantity: f64,
        reference_price: f64,
        reduce_only: bool,
    ) -> Result<Order> {
        let order = Order::new(side, OrderType::Market, reference_price, quantity, reduce_only);
        self.submit(order).await
    }

    async fn submit(&mut self, mut order: Order) -> Result<Order> {
        let submission = self.exchange.submit_order(&order).await?;
        match submission {
            Submission::Accepted => order.transition(OrderStatus::Open, "accepted"),
            Submission::Rejected(reason) => {
                order.transition(OrderStatus::Rejected, reason.clone());
                order.reject_reason = Some(reason);
            }
        }
        tracing::debug!(
            id = %order.id,
            side = %order.side,
            order_type = ?order.order_type,
            price = order.price,
            quantity = order.quantity,
            status = ?order.status,
            "order submitted"
        );
        self.sequence.push(order.id);
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    /// Refresh an order from the exchange
    pub async fn check_fill(&mut self, id: Uuid) -> Result<Order> {
        let fill = self.exchange.order_state(id).await?;
        let order = self.orders.get_mut(&id).ok_or(Error::OrderNotFound(id))?;
        order.apply_fill(&fill);
        Ok(order.clone())
    }

    pub async fn cancel_order(&mut self, id: Uuid, reason: &str) -> Result<()> {
        let status = self
            .orders
            .get(&id)
            .map(|o| o.status)
            .ok_or(Error::OrderNotFound(id))?;
        if status.is_terminal() {
            return Ok(());
        }
        self.exchange.cancel_order(id).await?;
        if let Some(order) = self.orders.get_mut(&id) {
            order.transition(OrderStatus::Cancelled, reason);
        }
        Ok(())
    }

    /// Cancel on the exchange if possible; always mark the order cancelled locally
    async fn release(&mut self, id: Uuid, reason: &str) {
        if let Err(err) = self.cancel_order(id, reason).await {
            tracing::warn!(%id, %err, "cancel failed while releasing order");
            if let Some(order) = self.orders.get_mut(&id) {
                if !order.status.is_terminal() {
                    order.transition(OrderStatus::Cancelled, format!("released: {reason}"));
                }
            }
        }
    }

    async fn wait(&self, cancel: &CancellationToken, deadline: Instant) -> WaitResult {
        let pause = Duration::from_millis(self.config.unfilled_wait_ms);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => WaitResult::Cancelled,
            _ = tokio::time::sleep_until(deadline) => WaitResult::DeadlineExceeded,
            _ = tokio::time::sleep(pause) => WaitResult::Elapsed,
        }
    }

    /// Run the unfilled protocol for `quantity` on `side`
    ///
    /// Never returns an error: faults end the protocol with
    /// `ProtocolOutcome::Fault` and the resting order released.
    pub async fn place_and_manage(
        &mut self,
        side: Side,
        quantity: f64,
        snapshot: &MicroSnapshot,
        reduce_only: bool,
        is_urgent: bool,
        cancel: &CancellationToken,
    ) -> ProtocolReport {
        let original_price = Self::post_only_price(side, snapshot);
        let mut state = RetryState {
            side,
            quantity,
            original_price,
            attempt: 0,
            total_slip_pct: 0.0,
            deadline: Instant::now() + Duration::from_millis(self.config.protocol_deadline_ms),
            order_ids: Vec::new(),
            fills: HashMap::new(),
        };

        let mut order = match self.place_post_only(side, quantity, original_price, reduce_only).await {
            Ok(order) => order,
            Err(err) => return state.report(ProtocolOutcome::Fault(err.to_string())),
        };
        state.order_ids.push(order.id);
        if order.status == OrderStatus::Rejected {
            return state.report(ProtocolOutcome::Rejected);
        }

        loop {
            match self.wait(cancel, state.deadline).await {
                WaitResult::Elapsed => {}
                WaitResult::Cancelled => {
                    self.release(order.id, "protocol cancelled").await;
                    return state.report(ProtocolOutcome::Cancelled);
                }
                WaitResult::DeadlineExceeded => {
                    self.release(order.id, "protocol deadline").await;
                    return state.report(ProtocolOutcome::DeadlineExceeded);
                }
            }

            order = match self.check_fill(order.id).await {
                Ok(order) => order,
                Err(err) => {
                    self.release(order.id, "fill check failed").await;
                    return state.report(ProtocolOutcome::Fault(err.to_string()));
                }
            };
            state.record(&order);
            if order.status == OrderStatus::Filled || state.remaining() <= f64::EPSILON {
                tracing::info!(attempts = state.attempt, price = order.price, "order filled");
                return state.report(ProtocolOutcome::Filled);
            }
            if state.attempt >= self.config.max_slip_attempts {
                break;
            }

            state.attempt += 1;
            let new_price = state.slipped_price(self.config.tick_size);
            let slip_pct = (new_price - original_price).abs() / original_price * 100.0;
            state.total_slip_pct = slip_pct;
            if slip_pct > self.config.max_slip_pct {
                tracing::warn!(slip_pct, cap = self.config.max_slip_pct, "slip cap exceeded, abandoning");
                self.release(order.id, "slip cap exceeded").await;
                return state.report(ProtocolOutcome::SlipCapExceeded);
            }

            if let Err(err) = self.cancel_order(order.id, "repost with slip").await {
                self.release(order.id, "cancel before repost failed").await;
                return state.report(ProtocolOutcome::Fault(err.to_string()));
            }
            tracing::info!(attempt = state.attempt, new_price, slip_pct, "reposting unfilled order");

            order = match self
                .place_post_only(side, state.remaining(), new_price, reduce_only)
                .await
            {
                Ok(order) => order,
                Err(err) => return state.report(ProtocolOutcome::Fault(err.to_string())),
            };
            state.order_ids.push(order.id);
            if order.status == OrderStatus::Rejected {
                return state.report(ProtocolOutcome::Rejected);
            }
        }

        self.release(order.id, "max attempts reached").await;
        if !is_urgent {
            tracing::warn!(attempts = state.attempt, "max attempts reached, abandoning order");
            return state.report(ProtocolOutcome::MaxAttemptsReached);
        }

        tracing::warn!(attempts = state.attempt, "max attempts reached, urgent market fallback");
        let reference = state.slipped_price(self.config.tick_size);
        let market = match self
            .place_market(side, state.remaining(), reference, reduce_only)
            .await
        {
            Ok(order) => order,
            Err(err) => return state.report(ProtocolOutcome::Fault(err.to_string())),
        };
        state.order_ids.push(market.id);
        if market.status == OrderStatus::Rejected {
            return state.report(ProtocolOutcome::Rejected);
        }
        match self.check_fill(market.id).await {
            Ok(filled) => {
                state.record(&filled);
                if filled.status == OrderStatus::Filled {
                    state.report(ProtocolOutcome::UrgentMarketFallback)
                } else {
                    self.release(filled.id, "market order not filled").await;
                    state.report(ProtocolOutcome::Fault("market order not filled".to_string()))
                }
            }
            Err(err) => {
                self.release(market.id, "market fill check failed").await;
                state.report(ProtocolOutcome::Fault(err.to_string()))
            }
        }
    }
}
