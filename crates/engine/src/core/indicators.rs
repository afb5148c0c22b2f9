//! Pure indicator math over candle series.
//!
//! No I/O, no side effects. Inputs are oldest-first slices and every
//! computation stays in `Decimal`. Insufficient input yields `None` (or an
//! empty `Vec` for series outputs) rather than a made-up value.
//!
//! Indicators implemented:
//! - EMA (SMA-seeded)
//! - True range and ATR (Wilder's smoothing)
//! - ADX (Wilder's directional movement system)
//!
//! References:
//!     Wilder (1978), "New Concepts in Technical Trading Systems".

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::Candle;

// ═══════════════════════════════════════════════════════════════════════════
// Moving averages
// ═══════════════════════════════════════════════════════════════════════════

/// Exponential Moving Average.
///
/// Multiplier `k = 2 / (period + 1)`. The first value is the SMA of the first
/// `period` prices. Returns an empty `Vec` if there is not enough data.
pub fn ema(prices: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    let k = dec!(2) / Decimal::from(period as u64 + 1);
    let one_minus_k = Decimal::ONE - k;

    let sma = prices[..period].iter().copied().sum::<Decimal>() / Decimal::from(period as u64);

    let mut out = Vec::with_capacity(prices.len() - period + 1);
    let mut prev = sma;
    out.push(sma);
    for &price in &prices[period..] {
        prev = price * k + prev * one_minus_k;
        out.push(prev);
    }
    out
}

/// Latest EMA value, or `None` with fewer than `period` prices.
pub fn ema_last(prices: &[Decimal], period: usize) -> Option<Decimal> {
    ema(prices, period).last().copied()
}

// ═══════════════════════════════════════════════════════════════════════════
// Volatility
// ═══════════════════════════════════════════════════════════════════════════

/// `max(high − low, |high − prev_close|, |low − prev_close|)`.
///
/// Without a previous close this degrades to the bar range.
pub fn true_range(candle: &Candle, prev_close: Option<Decimal>) -> Decimal {
    let hl = candle.high - candle.low;
    match prev_close {
        Some(pc) => hl.max((candle.high - pc).abs()).max((candle.low - pc).abs()),
        None => hl,
    }
}

/// Average True Range over `candles` with Wilder's smoothing.
///
/// Needs `period + 1` candles (the first only provides a previous close).
pub fn atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let trs: Vec<Decimal> = candles
        .windows(2)
        .map(|w| true_range(&w[1], Some(w[0].close)))
        .collect();

    let period_d = Decimal::from(period as u64);
    let period_m1 = Decimal::from(period as u64 - 1);

    let mut value = trs[..period].iter().copied().sum::<Decimal>() / period_d;
    for &tr in &trs[period..] {
        value = (value * period_m1 + tr) / period_d;
    }
    Some(value)
}

/// Incremental Wilder ATR fed one sealed candle at a time.
///
/// Seeds with the simple mean of the first `period` true ranges, then
/// smooths. [`Self::value`] is `None` until seeded.
#[derive(Debug, Clone)]
pub struct WilderAtr {
    period: usize,
    prev_close: Option<Decimal>,
    seed: Vec<Decimal>,
    value: Option<Decimal>,
}

impl WilderAtr {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            seed: Vec::with_capacity(period),
            value: None,
        }
    }

    pub fn update(&mut self, candle: &Candle) {
        let Some(prev_close) = self.prev_close.replace(candle.close) else {
            // First candle only provides the previous close.
            return;
        };
        let tr = true_range(candle, Some(prev_close));
        let period_d = Decimal::from(self.period as u64);

        match self.value {
            Some(v) => {
                self.value = Some((v * (period_d - Decimal::ONE) + tr) / period_d);
            }
            None => {
                self.seed.push(tr);
                if self.seed.len() == self.period {
                    self.value = Some(self.seed.iter().copied().sum::<Decimal>() / period_d);
                    self.seed.clear();
                }
            }
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        self.value
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Trend strength
// ═══════════════════════════════════════════════════════════════════════════

/// Average Directional Index (Wilder).
///
/// 1. `+DM = high − prev_high` when it exceeds `prev_low − low` and is
///    positive, mirrored for `−DM`.
/// 2. TR, +DM and −DM are Wilder-smoothed over `period`.
/// 3. `DX = 100 × |+DI − −DI| / (+DI + −DI)`.
/// 4. ADX is the mean of the first `period` DX values, then Wilder-smoothed.
///
/// Needs `2 × period + 1` candles. Flat input (zero DI sum) yields DX 0.
pub fn adx(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let period_d = Decimal::from(period as u64);
    let mut trs = Vec::with_capacity(candles.len() - 1);
    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);

    for w in candles.windows(2) {
        let (prev, cur) = (&w[0], &w[1]);
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        plus_dm.push(if up > down && up > Decimal::ZERO { up } else { Decimal::ZERO });
        minus_dm.push(if down > up && down > Decimal::ZERO { down } else { Decimal::ZERO });
        trs.push(true_range(cur, Some(prev.close)));
    }

    let mut s_tr: Decimal = trs[..period].iter().copied().sum();
    let mut s_plus: Decimal = plus_dm[..period].iter().copied().sum();
    let mut s_minus: Decimal = minus_dm[..period].iter().copied().sum();

    let dx = |tr: Decimal, p: Decimal, m: Decimal| -> Decimal {
        if tr.is_zero() {
            return Decimal::ZERO;
        }
        let pdi = p / tr * dec!(100);
        let mdi = m / tr * dec!(100);
        let sum = pdi + mdi;
        if sum.is_zero() {
            Decimal::ZERO
        } else {
            (pdi - mdi).abs() / sum * dec!(100)
        }
    };

    let mut dxs = Vec::with_capacity(trs.len() - period + 1);
    dxs.push(dx(s_tr, s_plus, s_minus));
    for i in period..trs.len() {
        s_tr = s_tr - s_tr / period_d + trs[i];
        s_plus = s_plus - s_plus / period_d + plus_dm[i];
        s_minus = s_minus - s_minus / period_d + minus_dm[i];
        dxs.push(dx(s_tr, s_plus, s_minus));
    }

    let mut value = dxs[..period].iter().copied().sum::<Decimal>() / period_d;
    for &d in &dxs[period..] {
        value = (value * (period_d - Decimal::ONE) + d) / period_d;
    }
    Some(value)
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
