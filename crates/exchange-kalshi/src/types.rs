//! Kalshi wire types and their conversion to venue-neutral types.
//!
//! Kalshi quotes prices as integer cents (1..=99). The rest of the system uses
//! decimal dollars, so every conversion happens here.

use crate::error::{KalshiError, Result};
use algo_trade_core::{OrderKind, OrderRequest, OrderState, OrderStatus, Quote, Side};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Price Conversion
// =============================================================================

/// Converts integer cents to dollars.
#[must_use]
pub fn cents_to_dollars(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Converts a dollar price to whole cents.
///
/// # Errors
/// Returns error if the price is not a whole number of cents in `1..=99`.
pub fn dollars_to_cents(price: Decimal) -> Result<u32> {
    let cents = price * Decimal::ONE_HUNDRED;
    if cents.fract() != Decimal::ZERO {
        return Err(KalshiError::InvalidRequest(format!(
            "price {price} is not a whole number of cents"
        )));
    }
    match cents.to_u32() {
        Some(c) if (1..=99).contains(&c) => Ok(c),
        _ => Err(KalshiError::InvalidRequest(format!(
            "price {price} outside 0.01..=0.99"
        ))),
    }
}

// =============================================================================
// Markets
// =============================================================================

/// Envelope for `GET /markets/{ticker}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawMarketResponse {
    pub market: Option<RawMarket>,
}

/// Market fields needed to build a quote.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawMarket {
    pub ticker: String,
    pub status: Option<String>,
    pub yes_bid: Option<i64>,
    pub yes_ask: Option<i64>,
    pub volume: Option<i64>,
    pub volume_24h: Option<i64>,
}

impl RawMarket {
    /// Builds a YES quote. An empty bid side reads as 0, an empty ask side as 1.
    pub fn into_quote(self) -> Quote {
        let volume = self.volume_24h.or(self.volume).unwrap_or(0);
        Quote {
            market_id: self.ticker,
            bid: self.yes_bid.map_or(Decimal::ZERO, cents_to_dollars),
            ask: self.yes_ask.map_or(Decimal::ONE, cents_to_dollars),
            volume: Decimal::from(volume),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Body for `POST /portfolio/orders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct WireOrder {
    pub ticker: String,
    pub client_order_id: String,
    pub side: &'static str,
    pub action: &'static str,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yes_price: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_price: Option<u32>,
}

impl TryFrom<&OrderRequest> for WireOrder {
    type Error = KalshiError;

    fn try_from(order: &OrderRequest) -> Result<Self> {
        if order.quantity == 0 {
            return Err(KalshiError::InvalidRequest(
                "order quantity must be positive".to_string(),
            ));
        }

        let price = match (order.kind, order.limit_price) {
            (OrderKind::Limit, Some(price)) => Some(dollars_to_cents(price)?),
            (OrderKind::Limit, None) => {
                return Err(KalshiError::InvalidRequest(
                    "limit order without a price".to_string(),
                ))
            }
            (OrderKind::Market, _) => None,
        };

        let (yes_price, no_price) = match order.side {
            Side::Yes => (price, None),
            Side::No => (None, price),
        };

        Ok(Self {
            ticker: order.market_id.clone(),
            client_order_id: order.client_order_id.clone(),
            side: order.side.as_str(),
            action: order.action.as_str(),
            order_type: match order.kind {
                OrderKind::Market => "market",
                OrderKind::Limit => "limit",
            },
            count: order.quantity,
            yes_price,
            no_price,
        })
    }
}

/// Envelope for order endpoints.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawOrderResponse {
    pub order: Option<RawOrder>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawOrder {
    pub order_id: String,
    pub status: Option<String>,
    pub count: Option<i64>,
    #[serde(alias = "fill_count")]
    pub filled_count: Option<i64>,
    pub remaining_count: Option<i64>,
    /// Average fill price in cents.
    pub avg_fill_price: Option<Decimal>,
}

impl From<RawOrder> for OrderState {
    fn from(raw: RawOrder) -> Self {
        let filled = raw.filled_count.unwrap_or_else(|| {
            match (raw.count, raw.remaining_count) {
                (Some(count), Some(remaining)) => count - remaining,
                _ => 0,
            }
        });
        let filled_quantity = u32::try_from(filled.max(0)).unwrap_or(u32::MAX);

        let status = match raw.status.as_deref() {
            Some("executed" | "filled") => OrderStatus::Filled,
            Some("canceled" | "cancelled") => OrderStatus::Cancelled,
            Some("rejected") => OrderStatus::Rejected,
            Some("resting" | "partial_filled") if filled_quantity > 0 => {
                OrderStatus::PartiallyFilled
            }
            Some("resting") => OrderStatus::Resting,
            _ => OrderStatus::Pending,
        };

        Self {
            order_id: raw.order_id,
            status,
            filled_quantity,
            avg_fill_price: raw
                .avg_fill_price
                .filter(|_| filled_quantity > 0)
                .map(|cents| cents / Decimal::ONE_HUNDRED),
        }
    }
}
