//! Trade-Series Performance Metrics
//!
//! Pure metric computation over an ordered trade series: Sharpe, Sortino,
//! Calmar, profit factor, and max-drawdown duration. Every function here is
//! total: degenerate inputs (empty series, zero variance, no losses) map to
//! defined numeric values, never NaN and never a panic.

use crate::models::Trade;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Trading periods per year used to annualize per-trade statistics.
pub const DEFAULT_ANNUALIZATION_FACTOR: f64 = 252.0;

/// Computed metrics for a trade series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeMetrics {
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    /// +infinity for an all-winning series; serialized as null by
    /// serde_json, which API consumers treat as "unbounded".
    pub profit_factor: f64,
    pub max_drawdown: f64,
    /// Longest below-peak span, in closed trades.
    pub drawdown_duration_trades: u64,
    /// Longest below-peak span, in seconds of wall time.
    pub drawdown_duration_secs: i64,
}

impl Default for TradeMetrics {
    fn default() -> Self {
        Self {
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            calmar_ratio: 0.0,
            profit_factor: 0.0,
            max_drawdown: 0.0,
            drawdown_duration_trades: 0,
            drawdown_duration_secs: 0,
        }
    }
}

/// Compute all metrics over the closed trades of a series.
///
/// Open trades are skipped: they have no realized P&L to attribute to a
/// period. An empty (or all-open) series returns the zero-valued default.
pub fn compute(trades: &[Trade], annualization_factor: f64) -> TradeMetrics {
    let closed: Vec<&Trade> = trades.iter().filter(|t| t.is_closed()).collect();
    if closed.is_empty() {
        return TradeMetrics::default();
    }

    let returns: Vec<f64> = closed.iter().map(|t| t.pnl).collect();

    let sharpe = sharpe_ratio(&returns, annualization_factor);
    let sortino = sortino_ratio(&returns, annualization_factor);
    let profit_factor = profit_factor(&returns);

    let (max_drawdown, dd_trades, dd_secs) = drawdown_stats(&closed);
    let calmar = calmar_ratio(&returns, max_drawdown, annualization_factor);

    TradeMetrics {
        sharpe_ratio: sharpe,
        sortino_ratio: sortino,
        calmar_ratio: calmar,
        profit_factor,
        max_drawdown,
        drawdown_duration_trades: dd_trades,
        drawdown_duration_secs: dd_secs,
    }
}

/// Sharpe = mean(period returns) / stdev(period returns) * sqrt(annualization).
///
/// Zero-variance and single-sample series resolve to 0, not NaN.
pub fn sharpe_ratio(returns: &[f64], annualization_factor: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.mean();
    let std_dev = returns.std_dev();
    if std_dev == 0.0 || !std_dev.is_finite() {
        return 0.0;
    }
    mean / std_dev * annualization_factor.max(0.0).sqrt()
}

/// Sortino: like Sharpe but the denominator is the downside deviation,
/// computed over negative-return periods only.
pub fn sortino_ratio(returns: &[f64], annualization_factor: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.mean();
    let negatives: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if negatives.is_empty() {
        return 0.0;
    }
    let downside_var = negatives.iter().map(|r| r * r).sum::<f64>() / negatives.len() as f64;
    let downside_dev = downside_var.sqrt();
    if downside_dev == 0.0 {
        return 0.0;
    }
    mean / downside_dev * annualization_factor.max(0.0).sqrt()
}

/// Calmar = annualized return / max drawdown. 0 when there is no drawdown.
pub fn calmar_ratio(returns: &[f64], max_drawdown: f64, annualization_factor: f64) -> f64 {
    if returns.is_empty() || max_drawdown <= 0.0 {
        return 0.0;
    }
    let annualized = returns.mean() * annualization_factor;
    annualized / max_drawdown
}

/// Profit factor = gross profit / |gross loss|.
///
/// Edge cases per the public contract: +infinity when there are wins and no
/// losses; 0 when the series is empty, all-losing, or all-zero.
pub fn profit_factor(returns: &[f64]) -> f64 {
    let gross_profit: f64 = returns.iter().filter(|r| **r > 0.0).sum();
    let gross_loss: f64 = returns.iter().filter(|r| **r < 0.0).sum();

    if gross_loss == 0.0 {
        if gross_profit > 0.0 {
            return f64::INFINITY;
        }
        return 0.0;
    }
    if gross_profit == 0.0 {
        return 0.0;
    }
    gross_profit / gross_loss.abs()
}

/// Walk the equity curve and return (max drawdown, longest below-peak span
/// in trades, longest below-peak span in seconds).
///
/// The duration clock starts at the close of the peak-setting trade and
/// runs until the close of the trade that restores the peak.
fn drawdown_stats(closed: &[&Trade]) -> (f64, u64, i64) {
    let mut equity = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut peak_time = closed.first().and_then(|t| t.close_time);
    let mut max_drawdown = 0.0_f64;

    let mut current_span: u64 = 0;
    let mut longest_span: u64 = 0;
    let mut longest_secs: i64 = 0;

    for trade in closed {
        equity += trade.pnl;

        if equity < peak {
            current_span += 1;
            if current_span > longest_span {
                longest_span = current_span;
            }
            if let (Some(start), Some(end)) = (peak_time, trade.close_time) {
                let secs = (end - start).num_seconds();
                if secs > longest_secs {
                    longest_secs = secs;
                }
            }
            let dd = peak - equity;
            if dd > max_drawdown {
                max_drawdown = dd;
            }
        } else {
            peak = equity;
            peak_time = trade.close_time;
            current_span = 0;
        }
    }

    (max_drawdown, longest_span, longest_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn make_trades(pnls: &[f64]) -> Vec<Trade> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        pnls.iter()
            .enumerate()
            .map(|(i, pnl)| Trade {
                pair: "EURUSD".to_string(),
                pnl: *pnl,
                entry_time: base + Duration::hours(i as i64),
                close_time: Some(base + Duration::hours(i as i64 + 1)),
            })
            .collect()
    }

    #[test]
    fn empty_series_is_all_zero() {
        let m = compute(&[], DEFAULT_ANNUALIZATION_FACTOR);
        assert_eq!(m, TradeMetrics::default());
    }

    #[test]
    fn open_trades_are_excluded() {
        let mut trades = make_trades(&[100.0, -50.0]);
        trades[1].close_time = None;
        let m = compute(&trades, DEFAULT_ANNUALIZATION_FACTOR);
        // Only the winning trade counts, so no losses exist.
        assert_eq!(m.profit_factor, f64::INFINITY);
    }

    #[test]
    fn profit_factor_all_winning_is_infinite() {
        assert_eq!(profit_factor(&[10.0, 20.0, 5.0]), f64::INFINITY);
    }

    #[test]
    fn profit_factor_all_losing_is_zero() {
        assert_eq!(profit_factor(&[-10.0, -20.0]), 0.0);
    }

    #[test]
    fn profit_factor_empty_is_zero() {
        assert_eq!(profit_factor(&[]), 0.0);
    }

    #[test]
    fn profit_factor_never_nan() {
        for returns in [&[][..], &[0.0][..], &[-1.0][..], &[1.0][..], &[1.0, -1.0][..]] {
            assert!(!profit_factor(returns).is_nan());
        }
    }

    #[test]
    fn profit_factor_mixed() {
        // 30 profit vs 10 loss
        let pf = profit_factor(&[10.0, 20.0, -10.0]);
        assert!((pf - 3.0).abs() < 1e-12);
    }

    #[test]
    fn sharpe_zero_variance_is_zero() {
        assert_eq!(sharpe_ratio(&[5.0, 5.0, 5.0], 252.0), 0.0);
    }

    #[test]
    fn sharpe_single_sample_is_zero() {
        assert_eq!(sharpe_ratio(&[5.0], 252.0), 0.0);
    }

    #[test]
    fn sharpe_positive_for_profitable_varied_series() {
        let s = sharpe_ratio(&[10.0, 12.0, 8.0, 11.0], 252.0);
        assert!(s > 0.0);
        assert!(s.is_finite());
    }

    #[test]
    fn sortino_no_losses_is_zero() {
        assert_eq!(sortino_ratio(&[1.0, 2.0], 252.0), 0.0);
    }

    #[test]
    fn sortino_uses_downside_only() {
        // mean = 2.5, downside dev over {-5} = 5
        let s = sortino_ratio(&[10.0, -5.0, 5.0, 0.0], 1.0);
        assert!((s - 2.5 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn drawdown_duration_tracks_longest_span() {
        // Equity: 10, 5, 2, 8, 12 -> below peak for 3 trades (5,2,8), peak
        // restored at 12.
        let trades = make_trades(&[10.0, -5.0, -3.0, 6.0, 4.0]);
        let m = compute(&trades, DEFAULT_ANNUALIZATION_FACTOR);
        assert_eq!(m.drawdown_duration_trades, 3);
        assert!((m.max_drawdown - 8.0).abs() < 1e-12);
        assert!(m.drawdown_duration_secs > 0);
    }

    #[test]
    fn calmar_no_drawdown_is_zero() {
        let trades = make_trades(&[1.0, 2.0, 3.0]);
        let m = compute(&trades, DEFAULT_ANNUALIZATION_FACTOR);
        assert_eq!(m.calmar_ratio, 0.0);
    }

    #[test]
    fn metrics_never_nan_on_degenerate_inputs() {
        for pnls in [&[][..], &[0.0][..], &[0.0, 0.0][..], &[-1.0][..]] {
            let m = compute(&make_trades(pnls), DEFAULT_ANNUALIZATION_FACTOR);
            assert!(!m.sharpe_ratio.is_nan());
            assert!(!m.sortino_ratio.is_nan());
            assert!(!m.calmar_ratio.is_nan());
            assert!(!m.profit_factor.is_nan());
        }
    }
}
