//! Money arithmetic in the smallest currency unit.

use crate::error::{DomainError, DomainResult};

/// Amount in the smallest currency unit (e.g. cents).
pub type Money = u64;

/// `price × quantity`, failing on overflow or a non-positive quantity.
pub fn line_total(price: Money, quantity: i64) -> DomainResult<Money> {
    let quantity = u64::try_from(quantity)
        .map_err(|_| DomainError::invariant("line quantity cannot be negative"))?;
    price
        .checked_mul(quantity)
        .ok_or_else(|| DomainError::invariant("line total overflows"))
}

/// Sum of line totals, failing on overflow.
pub fn sum<I>(amounts: I) -> DomainResult<Money>
where
    I: IntoIterator<Item = Money>,
{
    amounts.into_iter().try_fold(0u64, |acc, amount| {
        acc.checked_add(amount)
            .ok_or_else(|| DomainError::invariant("total overflows"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_total_multiplies() {
        assert_eq!(line_total(100, 5).unwrap(), 500);
    }

    #[test]
    fn line_total_rejects_negative_quantity() {
        assert!(matches!(
            line_total(100, -1),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn overflow_is_an_invariant_violation() {
        assert!(line_total(u64::MAX, 2).is_err());
        assert!(sum([u64::MAX, 1]).is_err());
    }
}
