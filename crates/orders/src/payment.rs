//! Payment method and the simplified payment intent record.
//!
//! No gateway is involved: the intent is an opaque record of how the shopper
//! intends to pay. Prepaid methods are treated as already confirmed.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{DomainError, Money};

use crate::order::OrderStatus;

/// Accepted payment methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "Cash On Delivery")]
    CashOnDelivery,
    #[serde(rename = "M-PESA")]
    MPesa,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 2] = [PaymentMethod::CashOnDelivery, PaymentMethod::MPesa];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "Cash On Delivery",
            PaymentMethod::MPesa => "M-PESA",
        }
    }

    /// Cash is collected on delivery, so the order can be processed right
    /// away; other methods wait for payment confirmation.
    pub fn initial_order_status(self) -> OrderStatus {
        match self {
            PaymentMethod::CashOnDelivery => OrderStatus::NotProcessed,
            PaymentMethod::MPesa => OrderStatus::Pending,
        }
    }

    pub fn initial_payment_status(self) -> PaymentStatus {
        match self {
            PaymentMethod::CashOnDelivery => PaymentStatus::Created,
            PaymentMethod::MPesa => PaymentStatus::Succeeded,
        }
    }
}

impl core::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "payment method must be one of: {}",
                    Self::ALL.map(PaymentMethod::as_str).join(", ")
                ))
            })
    }
}

/// Payment intent status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Created,
    Succeeded,
}

/// ISO-4217 style currency code (three uppercase ASCII letters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, DomainError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(
                "currency must be a three-letter code",
            ));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Kenyan shilling, the storefront's home currency.
impl Default for Currency {
    fn default() -> Self {
        Self("KES".to_string())
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

/// Record of an attempted or confirmed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub method: PaymentMethod,
    /// Cart total at the instant of conversion.
    pub amount: Money,
    pub status: PaymentStatus,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_two_accepted_methods() {
        assert_eq!(
            "Cash On Delivery".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::CashOnDelivery
        );
        assert_eq!("M-PESA".parse::<PaymentMethod>().unwrap(), PaymentMethod::MPesa);
        assert_eq!(" m-pesa ".parse::<PaymentMethod>().unwrap(), PaymentMethod::MPesa);
    }

    #[test]
    fn unknown_method_is_a_validation_error() {
        let err = "Bitcoin".parse::<PaymentMethod>().unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("Cash On Delivery, M-PESA")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn cash_on_delivery_is_created_and_not_processed() {
        let m = PaymentMethod::CashOnDelivery;
        assert_eq!(m.initial_order_status(), OrderStatus::NotProcessed);
        assert_eq!(m.initial_payment_status(), PaymentStatus::Created);
    }

    #[test]
    fn prepaid_is_succeeded_and_pending() {
        let m = PaymentMethod::MPesa;
        assert_eq!(m.initial_order_status(), OrderStatus::Pending);
        assert_eq!(m.initial_payment_status(), PaymentStatus::Succeeded);
    }

    #[test]
    fn serde_uses_display_names() {
        assert_eq!(
            serde_json::to_string(&PaymentMethod::CashOnDelivery).unwrap(),
            "\"Cash On Delivery\""
        );
        assert_eq!(
            serde_json::from_str::<PaymentMethod>("\"M-PESA\"").unwrap(),
            PaymentMethod::MPesa
        );
    }

    #[test]
    fn currency_is_normalised() {
        assert_eq!(Currency::new("kes").unwrap().as_str(), "KES");
        assert!(Currency::new("KSHS").is_err());
        assert!(Currency::new("K1S").is_err());
        assert_eq!(Currency::default().as_str(), "KES");
    }
}
