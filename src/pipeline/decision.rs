//! Per-instrument decision chain: indicators, composite, regime, strategy.
//!
//! Shared verbatim by the live runner and the backtester so both paths make
//! the same decision for the same candle sequence.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::Config;
use crate::exchange::{Candle, EngineEvent, EventSink};
use crate::indicators::{IndicatorEngine, IndicatorError};
use crate::regime::{RegimeClassifier, RegimeReading};
use crate::risk::{RiskManager, RiskState};
use crate::signal::{CompositeSignal, SignalCombiner, SignalError, SignalWeights};
use crate::strategy::{OrderIntent, StrategyContext, StrategyManager, StrategyState};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("{instrument}: candle at {received} not after {previous}")]
    OutOfOrderCandle {
        instrument: String,
        previous: DateTime<Utc>,
        received: DateTime<Utc>,
    },

    #[error("pipeline for {expected} received a {received} candle")]
    WrongInstrument { expected: String, received: String },
}

/// What the chain concluded for one candle.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub composite: Option<CompositeSignal>,
    pub regime: Option<RegimeReading>,
    pub active: StrategyState,
    pub intent: Option<OrderIntent>,
}

impl Decision {
    fn hold(active: StrategyState) -> Self {
        Self {
            composite: None,
            regime: None,
            active,
            intent: None,
        }
    }
}

pub struct DecisionCore {
    instrument: String,
    window: VecDeque<Candle>,
    window_size: usize,
    indicators: IndicatorEngine,
    combiner: SignalCombiner,
    classifier: RegimeClassifier,
    strategies: StrategyManager,
    sink: Arc<dyn EventSink>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl DecisionCore {
    /// Fails only on invalid signal weights.
    pub fn new(
        instrument: impl Into<String>,
        config: &Config,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, SignalError> {
        let instrument = instrument.into();
        let weights = SignalWeights::from_config(&config.signal_weights)?;
        Ok(Self {
            strategies: StrategyManager::new(instrument.clone(), &config.strategy, &config.indicators),
            instrument,
            window: VecDeque::with_capacity(config.indicators.window_size),
            window_size: config.indicators.window_size.max(1),
            indicators: IndicatorEngine::new(config.indicators.clone()),
            combiner: SignalCombiner::new(weights),
            classifier: RegimeClassifier::new(config.regime.clone()),
            sink,
            last_timestamp: None,
        })
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn active(&self) -> StrategyState {
        self.strategies.active()
    }

    /// Run the chain for a closed candle.
    ///
    /// Missing lookback is a hold, not an error. `state` is read only to tell
    /// the active strategy which of its own positions are open.
    pub fn on_candle(&mut self, candle: &Candle, state: &RiskState) -> Result<Decision, PipelineError> {
        if candle.instrument != self.instrument {
            return Err(PipelineError::WrongInstrument {
                expected: self.instrument.clone(),
                received: candle.instrument.clone(),
            });
        }
        if let Some(previous) = self.last_timestamp {
            if candle.timestamp <= previous {
                return Err(PipelineError::OutOfOrderCandle {
                    instrument: self.instrument.clone(),
                    previous,
                    received: candle.timestamp,
                });
            }
        }
        self.last_timestamp = Some(candle.timestamp);

        self.window.push_back(candle.clone());
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
        self.strategies.update(candle);

        let window = self.window.make_contiguous();
        let snapshot = match self.indicators.compute(window) {
            Ok(snapshot) => snapshot,
            Err(e) => return Ok(self.hold(candle, e)),
        };
        let composite = self.combiner.combine(&snapshot);
        let regime = match self.classifier.classify(window) {
            Ok(regime) => regime,
            Err(e) => return Ok(self.hold(candle, e)),
        };

        let handle = self.strategies.select_strategy(regime.regime);
        if handle.switched() {
            self.sink.emit(EngineEvent::StrategySwitched {
                timestamp: candle.timestamp,
                instrument: self.instrument.clone(),
                regime: regime.regime,
                from: handle.previous,
                to: handle.state,
            });
        }

        let intent = handle.kind().and_then(|kind| {
            let (open_long, open_short, open_grid_levels) =
                RiskManager::strategy_exposure(state, &self.instrument, kind);
            let ctx = StrategyContext {
                rsi: Some(snapshot.rsi.raw),
                open_long,
                open_short,
                open_grid_levels,
            };
            self.strategies.evaluate(candle, &composite, &ctx)
        });

        debug!(
            instrument = %self.instrument,
            score = composite.score,
            strength = %composite.strength(),
            regime = %regime.regime,
            confidence = regime.confidence,
            strategy = %handle.state,
            intent = intent.as_ref().map(|i| i.reason.as_str()),
            "Decision"
        );

        Ok(Decision {
            composite: Some(composite),
            regime: Some(regime),
            active: handle.state,
            intent,
        })
    }

    fn hold(&self, candle: &Candle, reason: IndicatorError) -> Decision {
        trace!(instrument = %self.instrument, at = %candle.timestamp, %reason, "Warming up");
        Decision::hold(self.strategies.active())
    }
}
