//! Order lifecycle and cart arithmetic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_LINE_QUANTITY: i32 = 999;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("cart is empty")]
    EmptyCart,
    #[error("quantity must be between 1 and 999, got {0}")]
    InvalidQuantity(i64),
    #[error("unknown order status '{0}'")]
    UnknownStatus(String),
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Check that an order in `self` may move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] for anything outside
    /// `new → processing → shipped → delivered` plus cancellation before
    /// shipping.
    pub fn transition_to(self, next: OrderStatus) -> Result<OrderStatus, OrderError> {
        use OrderStatus::{Cancelled, Delivered, New, Processing, Shipped};

        let allowed = matches!(
            (self, next),
            (New, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (New | Processing, Cancelled)
        );
        if allowed {
            Ok(next)
        } else {
            Err(OrderError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(OrderStatus::New),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

/// Check a requested line quantity.
///
/// # Errors
///
/// Returns [`OrderError::InvalidQuantity`] outside `1..=MAX_LINE_QUANTITY`.
pub fn validate_quantity(quantity: i64) -> Result<i32, OrderError> {
    i32::try_from(quantity)
        .ok()
        .filter(|q| (1..=MAX_LINE_QUANTITY).contains(q))
        .ok_or(OrderError::InvalidQuantity(quantity))
}

/// A cart line priced at checkout time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: i64,
    pub title: String,
    pub price: Decimal,
    pub quantity: i32,
}

impl PricedLine {
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// Sum of line subtotals.
///
/// # Errors
///
/// Returns [`OrderError::EmptyCart`] when there is nothing to order.
pub fn order_total(lines: &[PricedLine]) -> Result<Decimal, OrderError> {
    if lines.is_empty() {
        return Err(OrderError::EmptyCart);
    }
    Ok(lines.iter().map(PricedLine::subtotal).sum())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn line(product_id: i64, price: &str, quantity: i32) -> PricedLine {
        PricedLine {
            product_id,
            title: format!("Product {product_id}"),
            price: Decimal::from_str(price).unwrap(),
            quantity,
        }
    }

    #[test]
    fn total_sums_line_subtotals() {
        let total = order_total(&[line(1, "1999.90", 2), line(2, "10.05", 3)]).unwrap();
        assert_eq!(total, Decimal::from_str("4029.95").unwrap());
    }

    #[test]
    fn total_of_empty_cart_fails() {
        assert_eq!(order_total(&[]), Err(OrderError::EmptyCart));
    }

    #[test]
    fn quantity_bounds() {
        assert_eq!(validate_quantity(1), Ok(1));
        assert_eq!(validate_quantity(999), Ok(999));
        assert_eq!(validate_quantity(0), Err(OrderError::InvalidQuantity(0)));
        assert_eq!(
            validate_quantity(1000),
            Err(OrderError::InvalidQuantity(1000))
        );
        assert_eq!(
            validate_quantity(i64::MAX),
            Err(OrderError::InvalidQuantity(i64::MAX))
        );
    }

    #[test]
    fn happy_path_transitions() {
        let status = OrderStatus::New
            .transition_to(OrderStatus::Processing)
            .and_then(|s| s.transition_to(OrderStatus::Shipped))
            .and_then(|s| s.transition_to(OrderStatus::Delivered))
            .unwrap();
        assert_eq!(status, OrderStatus::Delivered);
    }

    #[test]
    fn cancellation_only_before_shipping() {
        assert!(OrderStatus::New.transition_to(OrderStatus::Cancelled).is_ok());
        assert!(OrderStatus::Processing
            .transition_to(OrderStatus::Cancelled)
            .is_ok());
        assert_eq!(
            OrderStatus::Shipped.transition_to(OrderStatus::Cancelled),
            Err(OrderError::InvalidTransition {
                from: OrderStatus::Shipped,
                to: OrderStatus::Cancelled
            })
        );
    }

    #[test]
    fn terminal_states_do_not_move() {
        for next in [OrderStatus::New, OrderStatus::Processing, OrderStatus::Shipped] {
            assert!(OrderStatus::Delivered.transition_to(next).is_err());
            assert!(OrderStatus::Cancelled.transition_to(next).is_err());
        }
    }

    #[test]
    fn status_parses_from_label() {
        assert_eq!("shipped".parse::<OrderStatus>(), Ok(OrderStatus::Shipped));
        assert_eq!(
            "lost".parse::<OrderStatus>(),
            Err(OrderError::UnknownStatus("lost".to_string()))
        );
    }
}
