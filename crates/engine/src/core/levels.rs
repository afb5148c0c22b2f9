//! Tick-to-candle synthesis and higher-timeframe liquidity levels.
//!
//! Ticks are bucketed into UTC-aligned M1 candles. A tick in a later bucket
//! seals the open candle; no empty candles are synthesized across gaps.
//! Each sealed M1 candle feeds the incremental ATR and is folded into the
//! building H1 and H4 candles. When a higher-timeframe candle seals, the
//! rolling high/low over its lookback is recomputed and any changed level
//! replaces the stored one as a whole.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::LevelConfig;
use crate::core::indicators::WilderAtr;
use crate::errors::EngineError;
use crate::types::{Candle, Level, LevelKind, Tick, Timeframe};

/// Result of one [`LevelTracker::push`].
#[derive(Debug, Clone, Default)]
pub struct LevelPush {
    /// A base candle sealed on this tick.
    pub candle_closed: bool,
    pub sealed: Option<Candle>,
    /// Levels that replaced a previous (or absent) level on this tick.
    pub updated_levels: Vec<Level>,
}

// ---------------------------------------------------------------------------
// Higher-timeframe state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct HtfLevels {
    timeframe: Timeframe,
    lookback: usize,
    building: Option<Candle>,
    history: VecDeque<Candle>,
    high: Option<Level>,
    low: Option<Level>,
}

impl HtfLevels {
    fn new(timeframe: Timeframe, lookback: usize) -> Self {
        let lookback = lookback.max(1);
        Self {
            timeframe,
            lookback,
            building: None,
            history: VecDeque::with_capacity(lookback + 1),
            high: None,
            low: None,
        }
    }

    /// Fold a sealed base candle; returns levels replaced as a result.
    fn on_base_close(&mut self, base: &Candle) -> Vec<Level> {
        let bucket = self.timeframe.bucket_start(base.open_time_ms);
        let mut updated = Vec::new();

        if self
            .building
            .as_ref()
            .is_some_and(|b| b.open_time_ms != bucket)
        {
            updated.extend(self.seal());
        }

        match self.building.as_mut() {
            Some(b) => b.merge(base),
            None => {
                let mut c = Candle::open_with(self.timeframe, bucket, base.open, base.volume);
                c.high = base.high;
                c.low = base.low;
                c.close = base.close;
                self.building = Some(c);
            }
        }

        // The last base interval of the bucket closes the bucket too.
        if self
            .building
            .as_ref()
            .is_some_and(|b| base.close_time_ms() >= b.close_time_ms())
        {
            updated.extend(self.seal());
        }
        updated
    }

    fn seal(&mut self) -> Vec<Level> {
        let Some(mut candle) = self.building.take() else {
            return Vec::new();
        };
        candle.closed = true;
        debug!(
            timeframe = %self.timeframe,
            open_time_ms = candle.open_time_ms,
            high = %candle.high,
            low = %candle.low,
            "higher-timeframe candle sealed"
        );
        self.push_history(candle);
        self.recompute()
    }

    fn push_history(&mut self, candle: Candle) {
        self.history.push_back(candle);
        while self.history.len() > self.lookback {
            self.history.pop_front();
        }
    }

    fn recompute(&mut self) -> Vec<Level> {
        let mut updated = Vec::new();

        // Ties go to the most recent candle.
        let high = self
            .history
            .iter()
            .fold(None::<&Candle>, |best, c| match best {
                Some(b) if b.high > c.high => Some(b),
                _ => Some(c),
            })
            .map(|c| self.level(c.high, LevelKind::High, c.open_time_ms));
        let low = self
            .history
            .iter()
            .fold(None::<&Candle>, |best, c| match best {
                Some(b) if b.low < c.low => Some(b),
                _ => Some(c),
            })
            .map(|c| self.level(c.low, LevelKind::Low, c.open_time_ms));

        if let Some(level) = replace_if_changed(&mut self.high, high) {
            updated.push(level);
        }
        if let Some(level) = replace_if_changed(&mut self.low, low) {
            updated.push(level);
        }
        updated
    }

    fn level(&self, price: Decimal, kind: LevelKind, formed_at_ms: i64) -> Level {
        Level {
            price,
            timeframe: self.timeframe,
            kind,
            formed_at_ms,
            touched: false,
        }
    }

    fn mark_touched(&mut self, price: Decimal) {
        for level in [self.high.as_mut(), self.low.as_mut()].into_iter().flatten() {
            if !level.touched && level.is_breached_by(price) {
                level.touched = true;
            }
        }
    }
}

/// Swap in `candidate` when its identity differs from the stored level.
fn replace_if_changed(slot: &mut Option<Level>, candidate: Option<Level>) -> Option<Level> {
    let candidate = candidate?;
    if slot.as_ref().map(Level::key) == Some(candidate.key()) {
        return None;
    }
    *slot = Some(candidate.clone());
    Some(candidate)
}

// ---------------------------------------------------------------------------
// LevelTracker
// ---------------------------------------------------------------------------

pub struct LevelTracker {
    open: Option<Candle>,
    htf: [HtfLevels; 2],
    atr: WilderAtr,
}

impl LevelTracker {
    pub fn new(config: &LevelConfig) -> Self {
        Self {
            open: None,
            htf: [
                HtfLevels::new(Timeframe::H1, config.h1_lookback),
                HtfLevels::new(Timeframe::H4, config.h4_lookback),
            ],
            atr: WilderAtr::new(config.atr_period),
        }
    }

    /// Fold one tick into the open base candle.
    ///
    /// A tick older than the open interval is rejected with
    /// [`EngineError::LateTick`] and changes nothing.
    pub fn push(&mut self, tick: &Tick) -> Result<LevelPush, EngineError> {
        tick.validate()?;

        let bucket = Timeframe::M1.bucket_start(tick.timestamp_ms);
        let mut out = LevelPush::default();

        match self.open.as_mut() {
            Some(open) if tick.timestamp_ms < open.open_time_ms => {
                return Err(EngineError::LateTick {
                    timestamp_ms: tick.timestamp_ms,
                    open_ms: open.open_time_ms,
                });
            }
            Some(open) if open.open_time_ms == bucket => {
                open.apply_trade(tick.price, tick.size);
            }
            _ => {
                let next = Candle::open_with(Timeframe::M1, bucket, tick.price, tick.size);
                if let Some(mut sealed) = self.open.replace(next) {
                    sealed.closed = true;
                    out.updated_levels = self.on_base_close(&sealed);
                    out.candle_closed = true;
                    out.sealed = Some(sealed);
                }
            }
        }

        for htf in &mut self.htf {
            htf.mark_touched(tick.price);
        }
        Ok(out)
    }

    fn on_base_close(&mut self, sealed: &Candle) -> Vec<Level> {
        self.atr.update(sealed);
        let mut updated = Vec::new();
        for htf in &mut self.htf {
            updated.extend(htf.on_base_close(sealed));
        }
        for level in &updated {
            info!(
                timeframe = %level.timeframe,
                kind = level.kind.as_str(),
                price = %level.price,
                formed_at_ms = level.formed_at_ms,
                "level updated"
            );
        }
        updated
    }

    /// Warm the tracker from exchange history so levels exist from the
    /// first tick. Open (unsealed) candles are ignored.
    pub fn seed(&mut self, h1: &[Candle], h4: &[Candle], m1: &[Candle]) -> Vec<Level> {
        let mut updated = Vec::new();
        for (htf, candles) in self.htf.iter_mut().zip([h1, h4]) {
            let tf = htf.timeframe;
            for c in candles.iter().filter(|c| c.closed && c.timeframe == tf) {
                htf.push_history(c.clone());
            }
            updated.extend(htf.recompute());
        }
        for c in m1.iter().filter(|c| c.closed) {
            self.atr.update(c);
        }
        info!(
            h1 = h1.len(),
            h4 = h4.len(),
            m1 = m1.len(),
            levels = updated.len(),
            atr = %self.atr(),
            "level tracker seeded"
        );
        updated
    }

    /// Current H1/H4 highs and lows.
    pub fn levels(&self) -> impl Iterator<Item = &Level> + '_ {
        self.htf
            .iter()
            .flat_map(|h| [h.high.as_ref(), h.low.as_ref()])
            .flatten()
    }

    pub fn level(&self, timeframe: Timeframe, kind: LevelKind) -> Option<&Level> {
        let htf = self.htf.iter().find(|h| h.timeframe == timeframe)?;
        match kind {
            LevelKind::High => htf.high.as_ref(),
            LevelKind::Low => htf.low.as_ref(),
        }
    }

    /// ATR over sealed base candles; zero until the smoother is seeded.
    pub fn atr(&self) -> Decimal {
        self.atr.value().unwrap_or(Decimal::ZERO)
    }

    pub fn open_candle(&self) -> Option<&Candle> {
        self.open.as_ref()
    }
}
