//! Expected-value ranking of candidate spreads.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use optflow_core::{OptionSpread, SpreadStrategy};
use rust_decimal::Decimal;
use tracing::info;

/// Orders two spreads whose expected values are equal; the greater one wins.
pub type TieBreak = fn(&OptionSpread, &OptionSpread) -> Ordering;

/// Later expiration first, then higher credit.
#[must_use]
pub fn later_expiration_then_credit(a: &OptionSpread, b: &OptionSpread) -> Ordering {
    a.expiration()
        .cmp(&b.expiration())
        .then_with(|| a.credit_received.cmp(&b.credit_received))
}

#[derive(Debug, Clone, Copy)]
pub struct Ranker {
    tie_break: TieBreak,
}

impl Default for Ranker {
    fn default() -> Self {
        Self::new(later_expiration_then_credit)
    }
}

impl Ranker {
    #[must_use]
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    #[must_use]
    pub fn compare(&self, a: &OptionSpread, b: &OptionSpread) -> Ordering {
        a.expected_value()
            .cmp(&b.expected_value())
            .then_with(|| (self.tie_break)(a, b))
    }

    /// The candidate with the highest expected value, ties resolved by the tie-break.
    #[must_use]
    pub fn best<'a>(&self, candidates: &'a [OptionSpread]) -> Option<&'a OptionSpread> {
        candidates.iter().max_by(|a, b| self.compare(a, b))
    }

    /// The best positive-EV spread for every `(expiration, strategy)` present.
    ///
    /// Groups with no positive-EV candidate are logged and skipped. The
    /// result is sorted best first.
    #[must_use]
    pub fn select(&self, candidates: Vec<OptionSpread>) -> Vec<OptionSpread> {
        let mut groups: BTreeMap<(NaiveDate, SpreadStrategy), Vec<OptionSpread>> = BTreeMap::new();
        for spread in candidates {
            groups
                .entry((spread.expiration(), spread.strategy))
                .or_default()
                .push(spread);
        }

        let mut selected = Vec::with_capacity(groups.len());
        for ((expiration, strategy), group) in groups {
            match self.best(&group) {
                Some(best) if best.expected_value() > Decimal::ZERO => selected.push(best.clone()),
                _ => info!(%expiration, %strategy, candidates = group.len(), "no positive-EV spread"),
            }
        }
        selected.sort_by(|a, b| self.compare(b, a));
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optflow_core::{OptionContract, OptionType, ShortLegStats};
    use rust_decimal_macros::dec;

    fn spread(
        expiration: NaiveDate,
        pop: Decimal,
        profit: Decimal,
        loss: Decimal,
        credit: Decimal,
    ) -> OptionSpread {
        OptionSpread {
            strategy: SpreadStrategy::ShortPut,
            short_leg: OptionContract::new("COIN", expiration, dec!(200), OptionType::Put),
            long_leg: OptionContract::new("COIN", expiration, dec!(195), OptionType::Put),
            credit_received: credit,
            stats: ShortLegStats {
                expected_profit: profit,
                expected_loss: loss,
                probability_of_profit: pop,
            },
            short_fill: None,
            long_fill: None,
        }
    }

    fn may17() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
    }

    #[test]
    fn selects_highest_expected_value() {
        let a = spread(may17(), dec!(0.7), dec!(100), dec!(100), dec!(1));
        let b = spread(may17(), dec!(0.6), dec!(200), dec!(50), dec!(2));
        let selected = Ranker::default().select(vec![a, b.clone()]);
        assert_eq!(selected, vec![b]);
    }

    #[test]
    fn ties_prefer_later_expiration_then_higher_credit() {
        let later = NaiveDate::from_ymd_opt(2024, 5, 24).unwrap();
        let a = spread(may17(), dec!(0.5), dec!(100), dec!(50), dec!(1));
        let b = spread(later, dec!(0.5), dec!(100), dec!(50), dec!(1));
        let c = spread(may17(), dec!(0.5), dec!(100), dec!(50), dec!(1.5));
        let ranker = Ranker::default();
        let all = [a.clone(), b.clone(), c.clone()];
        assert_eq!(ranker.best(&all), Some(&b));
        assert_eq!(ranker.best(&[a, c.clone()]), Some(&c));
    }

    #[test]
    fn custom_tie_break_overrides_default() {
        fn earlier_first(a: &OptionSpread, b: &OptionSpread) -> Ordering {
            b.expiration().cmp(&a.expiration())
        }
        let later = NaiveDate::from_ymd_opt(2024, 5, 24).unwrap();
        let a = spread(may17(), dec!(0.5), dec!(100), dec!(50), dec!(1));
        let b = spread(later, dec!(0.5), dec!(100), dec!(50), dec!(1));
        let all = [a.clone(), b];
        assert_eq!(Ranker::new(earlier_first).best(&all), Some(&a));
    }

    #[test]
    fn non_positive_groups_are_skipped() {
        let losing = spread(may17(), dec!(0.2), dec!(100), dec!(100), dec!(1));
        assert!(Ranker::default().select(vec![losing]).is_empty());
    }

    #[test]
    fn selected_spread_maximizes_expected_value() {
        // Deterministic LCG so every run sees the same candidate sets.
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move |bound: u64| {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (seed >> 33) % bound
        };
        let expirations = [
            may17(),
            NaiveDate::from_ymd_opt(2024, 5, 24).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 31).unwrap(),
        ];

        let ranker = Ranker::default();
        for _ in 0..200 {
            let n = 1 + next(8) as usize;
            let candidates: Vec<OptionSpread> = (0..n)
                .map(|_| {
                    spread(
                        expirations[next(3) as usize],
                        Decimal::new(next(11) as i64, 1),
                        Decimal::from(next(5) * 50),
                        Decimal::from(next(5) * 50),
                        Decimal::new(next(4) as i64 * 25, 2),
                    )
                })
                .collect();

            let best = ranker.best(&candidates).unwrap();
            let max_ev = candidates.iter().map(OptionSpread::expected_value).max().unwrap();
            assert_eq!(best.expected_value(), max_ev);

            let tied: Vec<&OptionSpread> = candidates
                .iter()
                .filter(|c| c.expected_value() == max_ev)
                .collect();
            let latest = tied.iter().map(|c| c.expiration()).max().unwrap();
            assert_eq!(best.expiration(), latest);
            let top_credit = tied
                .iter()
                .filter(|c| c.expiration() == latest)
                .map(|c| c.credit_received)
                .max()
                .unwrap();
            assert_eq!(best.credit_received, top_credit);
        }
    }
}
