//! Exchange seam for order placement, plus a paper venue for replay and tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::execution::order_manager::{Order, OrderStatus, OrderType};

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Accepted,
    Rejected(String),
}

/// Exchange view of one order
#[derive(Debug, Clone, PartialEq)]
pub struct FillState {
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub average_price: Option<f64>,
}

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn submit_order(&self, order: &Order) -> Result<Submission>;

    async fn order_state(&self, id: Uuid) -> Result<FillState>;

    async fn cancel_order(&self, id: Uuid) -> Result<()>;
}

/// How the paper venue treats resting post-only orders
///
/// Market orders always fill in full at their reference price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillModel {
    Immediate,
    OnOrderNumber(usize), // 1-based count of post-only submissions
    Never,
    Reject,
    FailQueries,
}

#[derive(Debug)]
struct PaperOrder {
    price: f64,
    quantity: f64,
    status: OrderStatus,
    fills: bool,
}

#[derive(Debug, Default)]
struct PaperBook {
    orders: HashMap<Uuid, PaperOrder>,
    post_only_count: usize,
}

pub struct PaperExchange {
    model: FillModel,
    book: Mutex<PaperBook>,
}

impl PaperExchange {
    pub fn new(model: FillModel) -> Self {
        Self {
            model,
            book: Mutex::new(PaperBook::default()),
        }
    }

    pub fn submitted_count(&self) -> usize {
        self.book.lock().map(|b| b.orders.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PaperBook>> {
        self.book
            .lock()
            .map_err(|e| Error::Exchange(format!("paper book poisoned: {e}")))
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn submit_order(&self, order: &Order) -> Result<Submission> {
        let mut book = self.lock()?;
        let fills = match order.order_type {
            OrderType::Market => true,
            OrderType::PostOnly => {
                if self.model == FillModel::Reject {
                    return Ok(Submission::Rejected("post-only would cross".to_string()));
                }
                book.post_only_count += 1;
                match self.model {
                    FillModel::Immediate => true,
                    FillModel::OnOrderNumber(n) => book.post_only_count >= n,
                    _ => false,
                }
            }
        };
        book.orders.insert(
            order.id,
            PaperOrder {
                price: order.price,
                quantity: order.quantity,
                status: OrderStatus::Open,
                fills,
            },
        );
        Ok(Submission::Accepted)
    }

    async fn order_state(&self, id: Uuid) -> Result<FillState> {
        if self.model == FillModel::FailQueries {
            return Err(Error::Exchange("order query timed out".to_string()));
        }
        let mut book = self.lock()?;
        let order = book.orders.get_mut(&id).ok_or(Error::OrderNotFound(id))?;
        if order.fills && order.status == OrderStatus::Open {
            order.status = OrderStatus::Filled;
        }
        let filled = order.status == OrderStatus::Filled;
        Ok(FillState {
            status: order.status,
            filled_quantity: if filled { order.quantity } else { 0.0 },
            average_price: filled.then_some(order.price),
        })
    }

    async fn cancel_order(&self, id: Uuid) -> Result<()> {
        let mut book = self.lock()?;
        let order = book.orders.get_mut(&id).ok_or(Error::OrderNotFound(id))?;
        if order.status == OrderStatus::Open {
            order.status = OrderStatus::Cancelled;
        }
        Ok(())
    }
}
