use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::api::{Odds, Sats};

/// Parimutuel odds for a pool pair. An empty market reports an even 50/50
/// prior with 2.00 multipliers on both sides. The no percentage is derived
/// from the rounded yes percentage so the pair always sums to 100, and a
/// multiplier only degenerates to "∞" when the dividing pool itself is empty,
/// not when its percentage merely rounds to zero.
pub fn odds(yes_pool: Sats, no_pool: Sats) -> Odds {
    let total = yes_pool + no_pool;
    if total == 0 {
        return Odds {
            yes_odds: 50,
            no_odds: 50,
            implied_yes: "2.00".to_string(),
            implied_no: "2.00".to_string(),
        };
    }
    let yes_odds = (dec!(100) * Decimal::from(yes_pool) / Decimal::from(total))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u32()
        .unwrap();
    Odds {
        yes_odds,
        no_odds: 100 - yes_odds,
        implied_yes: implied_multiplier(total, no_pool),
        implied_no: implied_multiplier(total, yes_pool),
    }
}

fn implied_multiplier(total: Sats, pool: Sats) -> String {
    if pool == 0 {
        return "∞".to_string();
    }
    let multiplier = (Decimal::from(total) / Decimal::from(pool))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.2}", multiplier)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_market_is_even_money() {
        let odds = odds(0, 0);
        assert_eq!(odds.yes_odds, 50);
        assert_eq!(odds.no_odds, 50);
        assert_eq!(odds.implied_yes, "2.00");
        assert_eq!(odds.implied_no, "2.00");
    }

    #[test]
    fn percentages_sum_to_100() {
        for (yes, no) in [(1, 2), (1, 199), (333, 667), (50_000, 30_000), (7, 0)] {
            let odds = odds(yes, no);
            assert_eq!(odds.yes_odds + odds.no_odds, 100, "pools {}/{}", yes, no);
        }
    }

    #[test]
    fn rounds_percentage_half_away_from_zero() {
        // 100 * 1 / 200 = 0.5 lands exactly on a midpoint
        let odds = odds(1, 199);
        assert_eq!(odds.yes_odds, 1);
        assert_eq!(odds.no_odds, 99);
    }

    #[test]
    fn multipliers_reflect_pool_ratio() {
        let odds = odds(1000, 500);
        assert_eq!(odds.yes_odds, 67);
        assert_eq!(odds.no_odds, 33);
        assert_eq!(odds.implied_yes, "3.00");
        assert_eq!(odds.implied_no, "1.50");
    }

    #[test]
    fn one_sided_market_degenerates() {
        let odds = odds(100, 0);
        assert_eq!(odds.yes_odds, 100);
        assert_eq!(odds.no_odds, 0);
        assert_eq!(odds.implied_yes, "∞");
        assert_eq!(odds.implied_no, "1.00");
    }

    #[test]
    fn tiny_pool_is_not_infinite() {
        // the yes side rounds to 0% yet still holds stake, so its multiplier
        // stays finite
        let odds = odds(1, 999);
        assert_eq!(odds.yes_odds, 0);
        assert_eq!(odds.no_odds, 100);
        assert_eq!(odds.implied_yes, "1.00");
        assert_eq!(odds.implied_no, "1000.00");
    }

    #[test]
    fn demo_pools_round_up_at_midpoint() {
        let odds = odds(50_000, 30_000);
        assert_eq!(odds.yes_odds, 63);
        assert_eq!(odds.no_odds, 37);
        assert_eq!(odds.implied_yes, "2.67");
        assert_eq!(odds.implied_no, "1.60");
    }
}
