//! Idempotency tags for broker submissions.
//!
//! Brokers accept only letters, digits, and dashes in order tags, so the tag
//! is `<signal>-p<profit cents>-c<credit cents>` with an `n` marking negative
//! amounts and any other character in the signal name replaced by a dash.

use rust_decimal::{Decimal, RoundingStrategy};

const MAX_TAG_LEN: usize = 255;

fn cents(amount: Decimal) -> String {
    let cents = (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    if cents.is_sign_negative() && !cents.is_zero() {
        format!("n{}", cents.abs())
    } else {
        cents.abs().to_string()
    }
}

/// Deterministic tag for `(signal_name, expected_profit, credit)`.
#[must_use]
pub fn idempotency_tag(signal_name: &str, expected_profit: Decimal, credit: Decimal) -> String {
    let name: String = signal_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let mut tag = format!("{name}-p{}-c{}", cents(expected_profit), cents(credit));
    tag.truncate(MAX_TAG_LEN);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn encodes_amounts_in_cents() {
        assert_eq!(
            idempotency_tag("SuperTrend1hStochRsi15mUp", dec!(125), dec!(1.25)),
            "SuperTrend1hStochRsi15mUp-p12500-c125"
        );
    }

    #[test]
    fn same_inputs_give_same_tag() {
        let a = idempotency_tag("Up", dec!(100.004), dec!(1.5));
        let b = idempotency_tag("Up", dec!(100.00), dec!(1.50));
        assert_eq!(a, b);
    }

    #[test]
    fn negative_and_odd_characters_stay_broker_safe() {
        let tag = idempotency_tag("my signal_v2", dec!(-20), dec!(-2.1));
        assert_eq!(tag, "my-signal-v2-pn2000-cn210");
        assert!(tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }
}
