//! Back-adjustment of bar series for splits and cash dividends.

use crate::domain::{ActionType, Adjustment, Bar, CorporateAction};

/// Back-adjust one security's bars (sorted by timestamp) for `actions`.
///
/// Bars dated strictly before an action's effective date are adjusted.
/// Splits divide prices and multiply volume by the ratio on either basis.
/// Dividends scale prices by `1 − d / prev_close` on the ratio basis, or
/// subtract `d` (expressed in post-split units) on the difference basis.
/// `Raw` returns the input untouched.
pub fn adjust_series(bars: &[Bar], actions: &[CorporateAction], basis: Adjustment) -> Vec<Bar> {
    let mut out = bars.to_vec();
    if basis == Adjustment::Raw {
        return out;
    }

    let mut ordered: Vec<&CorporateAction> = actions.iter().collect();
    ordered.sort_by(|a, b| {
        b.effective_date
            .cmp(&a.effective_date)
            .then(a.action.cmp(&b.action))
    });

    // splits with later effective dates, already folded into `out`
    let mut later_splits = 1.0;
    for action in ordered {
        let cut = out.partition_point(|b| b.timestamp().date_naive() < action.effective_date);
        if cut == 0 {
            continue;
        }
        match action.action {
            ActionType::Split => {
                let r = action.value;
                for bar in &mut out[..cut] {
                    bar.open /= r;
                    bar.high /= r;
                    bar.low /= r;
                    bar.close /= r;
                    bar.volume *= r;
                }
                later_splits *= r;
            }
            ActionType::CashDividend => match basis {
                Adjustment::Ratio => {
                    let prev_close_raw = bars[cut - 1].close;
                    if prev_close_raw <= 0.0 {
                        continue;
                    }
                    let factor = 1.0 - action.value / prev_close_raw;
                    for bar in &mut out[..cut] {
                        bar.open *= factor;
                        bar.high *= factor;
                        bar.low *= factor;
                        bar.close *= factor;
                    }
                }
                Adjustment::Difference => {
                    let d = action.value / later_splits;
                    for bar in &mut out[..cut] {
                        bar.open -= d;
                        bar.high -= d;
                        bar.low -= d;
                        bar.close -= d;
                    }
                }
                Adjustment::Raw => {}
            },
        }
    }

    for bar in &mut out {
        bar.adjustment = basis;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Instant, SecurityId};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn bar(day: u32, close: f64) -> Bar {
        let t = Utc.with_ymd_and_hms(2024, 3, day, 21, 0, 0).unwrap();
        Bar::daily(SecurityId(1), Instant::observed(t), close, close, close, close, 1_000.0)
    }

    fn action(day: u32, action: ActionType, value: f64) -> CorporateAction {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        CorporateAction {
            security_id: SecurityId(1),
            effective_date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            action,
            value,
            stamp: Instant::observed(t),
        }
    }

    #[test]
    fn split_divides_prior_prices_and_scales_volume() {
        let bars = vec![bar(4, 200.0), bar(5, 210.0), bar(6, 104.0)];
        let out = adjust_series(&bars, &[action(6, ActionType::Split, 2.0)], Adjustment::Ratio);
        assert_eq!(out[0].close, 100.0);
        assert_eq!(out[1].close, 105.0);
        assert_eq!(out[1].volume, 2_000.0);
        assert_eq!(out[2].close, 104.0);
        assert!(out.iter().all(|b| b.adjustment == Adjustment::Ratio));
    }

    #[test]
    fn ratio_dividend_uses_prev_close() {
        let bars = vec![bar(4, 100.0), bar(5, 98.0)];
        let out = adjust_series(
            &bars,
            &[action(5, ActionType::CashDividend, 2.0)],
            Adjustment::Ratio,
        );
        assert!((out[0].close - 98.0).abs() < 1e-12);
        assert_eq!(out[1].close, 98.0);
    }

    #[test]
    fn difference_dividend_is_expressed_in_post_split_units() {
        let bars = vec![bar(4, 100.0), bar(5, 100.0), bar(6, 50.0)];
        let actions = [
            action(5, ActionType::CashDividend, 2.0),
            action(6, ActionType::Split, 2.0),
        ];
        let out = adjust_series(&bars, &actions, Adjustment::Difference);
        // split first: 100 -> 50, then the $2 dividend is $1 post-split
        assert!((out[0].close - 49.0).abs() < 1e-12);
        assert!((out[1].close - 50.0).abs() < 1e-12);
        assert_eq!(out[2].close, 50.0);
    }

    #[test]
    fn raw_is_identity() {
        let bars = vec![bar(4, 200.0), bar(5, 100.0)];
        let out = adjust_series(&bars, &[action(5, ActionType::Split, 2.0)], Adjustment::Raw);
        assert_eq!(out, bars);
    }
}
