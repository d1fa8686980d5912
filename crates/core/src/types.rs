//! Market and order types shared by the transport and the exit engine.
//!
//! Prices are probabilities expressed in dollars (`0.00..=1.00`) and are
//! always exact decimals. Quantities are whole contracts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::GatewayError;

// =============================================================================
// Side / Action
// =============================================================================

/// The contract held by a position on a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Top-of-book snapshot for the YES contract of a market.
///
/// NO prices are derived: a NO bid is `1 - yes_ask`, a NO ask is `1 - yes_bid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub market_id: String,
    /// Best YES bid in dollars.
    pub bid: Decimal,
    /// Best YES ask in dollars.
    pub ask: Decimal,
    /// Traded volume in contracts.
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Creates a quote stamped with the current time.
    #[must_use]
    pub fn new(market_id: impl Into<String>, bid: Decimal, ask: Decimal, volume: Decimal) -> Self {
        Self {
            market_id: market_id.into(),
            bid,
            ask,
            volume,
            timestamp: Utc::now(),
        }
    }

    /// Best price a holder of `side` can sell at.
    #[must_use]
    pub fn bid_for(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.bid,
            Side::No => Decimal::ONE - self.ask,
        }
    }

    /// Best price a buyer of `side` would pay.
    #[must_use]
    pub fn ask_for(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.ask,
            Side::No => Decimal::ONE - self.bid,
        }
    }

    /// Bid/ask spread. Identical for both sides.
    #[must_use]
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Rejects quotes that cannot describe a binary market.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidQuote`] when prices fall outside
    /// `[0, 1]`, the book is crossed, or volume is negative.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.bid < Decimal::ZERO || self.ask > Decimal::ONE {
            return Err(GatewayError::invalid_quote(
                &self.market_id,
                format!("prices out of range: bid={} ask={}", self.bid, self.ask),
            ));
        }
        if self.bid > self.ask {
            return Err(GatewayError::invalid_quote(
                &self.market_id,
                format!("crossed book: bid={} ask={}", self.bid, self.ask),
            ));
        }
        if self.volume < Decimal::ZERO {
            return Err(GatewayError::invalid_quote(
                &self.market_id,
                format!("negative volume: {}", self.volume),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Market or limit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => f.write_str("market"),
            Self::Limit => f.write_str("limit"),
        }
    }
}

/// Order to submit through a [`crate::MarketGateway`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market_id: String,
    pub side: Side,
    pub action: Action,
    pub kind: OrderKind,
    pub quantity: u32,
    /// Limit price in dollars, `None` for market orders.
    pub limit_price: Option<Decimal>,
    pub client_order_id: String,
}

impl OrderRequest {
    /// Creates a limit order selling `quantity` contracts of `side`.
    #[must_use]
    pub fn sell_limit(
        market_id: impl Into<String>,
        side: Side,
        quantity: u32,
        price: Decimal,
        client_order_id: impl Into<String>,
    ) -> Self {
        Self {
            market_id: market_id.into(),
            side,
            action: Action::Sell,
            kind: OrderKind::Limit,
            quantity,
            limit_price: Some(price),
            client_order_id: client_order_id.into(),
        }
    }

    /// Creates a market order selling `quantity` contracts of `side`.
    #[must_use]
    pub fn sell_market(
        market_id: impl Into<String>,
        side: Side,
        quantity: u32,
        client_order_id: impl Into<String>,
    ) -> Self {
        Self {
            market_id: market_id.into(),
            side,
            action: Action::Sell,
            kind: OrderKind::Market,
            quantity,
            limit_price: None,
            client_order_id: client_order_id.into(),
        }
    }
}

/// Exchange-reported order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Resting,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Returns true once the order can no longer fill.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

/// Point-in-time order state returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderState {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: u32,
    /// Average fill price in dollars, when anything filled.
    pub avg_fill_price: Option<Decimal>,
}

impl OrderState {
    #[must_use]
    pub fn is_filled(&self, quantity: u32) -> bool {
        self.status == OrderStatus::Filled || self.filled_quantity >= quantity
    }
}
