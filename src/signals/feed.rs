// =============================================================================
// Analyzer feeds: scripted and synthetic module implementations
// =============================================================================
//
// The real analyzers live outside this engine. `WaveAnalyzer` stands in for
// them in paper runs of the binary with a deterministic oscillating opinion
// per symbol. Tests script their modules with `ScriptedAnalyzer`.

use std::collections::HashMap;
#[cfg(test)]
use std::collections::VecDeque;

use crate::error::AnalyzerError;
use crate::signals::component::{
    AnalyzerModule, MacdSignal, ModuleKind, ModuleSignal, MtfScore, PatternSignal, PoiSignal,
    RsiBias, VolumeAnalysis,
};
use crate::types::Direction;

/// Build a record of the right variant for `kind` with neutral detail fields.
pub fn synthetic_signal(
    kind: ModuleKind,
    direction: Direction,
    score: f64,
    confidence: f64,
) -> ModuleSignal {
    let bias = match direction {
        Direction::Bullish => confidence / 100.0,
        Direction::Bearish => -confidence / 100.0,
        Direction::Neutral => 0.0,
    };
    match kind {
        ModuleKind::MultiTimeframe => ModuleSignal::MultiTimeframe(MtfScore {
            direction,
            score,
            confidence,
            aligned_timeframes: (bias.abs() * 4.0).round() as u32,
            total_timeframes: 4,
            trend_strength: 20.0 + bias.abs() * 30.0,
        }),
        ModuleKind::PointOfInterest => ModuleSignal::PointOfInterest(PoiSignal {
            direction,
            score,
            confidence,
            zone_type: match direction {
                Direction::Bullish => "demand".to_string(),
                Direction::Bearish => "supply".to_string(),
                Direction::Neutral => "none".to_string(),
            },
            inside_zone: bias.abs() > 0.7,
            distance_to_zone: (1.0 - bias.abs()) * 50.0,
        }),
        ModuleKind::Volume => ModuleSignal::Volume(VolumeAnalysis {
            direction,
            score,
            confidence,
            volume_ratio: 1.0 + bias.abs(),
            spike: bias.abs() > 0.8,
            climax: false,
            divergence: false,
        }),
        ModuleKind::Rsi => ModuleSignal::Rsi(RsiBias {
            direction,
            score,
            confidence,
            rsi: 50.0 - bias * 25.0,
            bias_score: bias,
            failure_swing: false,
        }),
        ModuleKind::Macd => ModuleSignal::Macd(MacdSignal {
            direction,
            score,
            confidence,
            histogram: bias * 0.001,
            crossover: bias.abs() > 0.6,
        }),
        ModuleKind::Pattern => ModuleSignal::Pattern(PatternSignal {
            direction,
            score,
            confidence,
            pattern: match direction {
                Direction::Bullish => "bullish_engulfing".to_string(),
                Direction::Bearish => "bearish_engulfing".to_string(),
                Direction::Neutral => "doji".to_string(),
            },
            bars_since: 1,
        }),
    }
}

// =============================================================================
// ScriptedAnalyzer
// =============================================================================

/// Replays a queue of prepared results; once drained it repeats the last one.
#[cfg(test)]
pub struct ScriptedAnalyzer {
    kind: ModuleKind,
    script: VecDeque<Result<ModuleSignal, AnalyzerError>>,
    last: Result<ModuleSignal, AnalyzerError>,
    calls: usize,
}

#[cfg(test)]
impl ScriptedAnalyzer {
    pub fn new(kind: ModuleKind) -> Self {
        Self {
            kind,
            script: VecDeque::new(),
            last: Err(AnalyzerError::NotReady),
            calls: 0,
        }
    }

    /// An analyzer that always reports the same opinion.
    pub fn constant(kind: ModuleKind, direction: Direction, score: f64, confidence: f64) -> Self {
        let mut analyzer = Self::new(kind);
        analyzer.last = Ok(synthetic_signal(kind, direction, score, confidence));
        analyzer
    }

    /// An analyzer that always fails.
    pub fn failing(kind: ModuleKind, error: AnalyzerError) -> Self {
        let mut analyzer = Self::new(kind);
        analyzer.last = Err(error);
        analyzer
    }

    pub fn push(&mut self, result: Result<ModuleSignal, AnalyzerError>) -> &mut Self {
        self.script.push_back(result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

#[cfg(test)]
impl AnalyzerModule for ScriptedAnalyzer {
    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn analyze(&mut self, _symbol: &str) -> Result<ModuleSignal, AnalyzerError> {
        self.calls += 1;
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        self.last.clone()
    }
}

// =============================================================================
// WaveAnalyzer
// =============================================================================

/// Steps a wave needs per symbol before it reports an opinion.
const WAVE_WARMUP_STEPS: u64 = 1;

/// Deterministic oscillating opinion. Each module kind runs at its own phase
/// so the modules agree part of the time and conflict the rest.
pub struct WaveAnalyzer {
    kind: ModuleKind,
    period: f64,
    steps: HashMap<String, u64>,
}

impl WaveAnalyzer {
    pub fn new(kind: ModuleKind, period: f64) -> Self {
        Self {
            kind,
            period: period.max(2.0),
            steps: HashMap::new(),
        }
    }

    fn phase(&self, symbol: &str) -> f64 {
        let kind_offset = ModuleKind::ALL
            .iter()
            .position(|k| *k == self.kind)
            .unwrap_or(0) as f64;
        let symbol_offset = symbol.bytes().map(f64::from).sum::<f64>();
        kind_offset * 0.35 + symbol_offset * 0.01
    }
}

impl AnalyzerModule for WaveAnalyzer {
    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn analyze(&mut self, symbol: &str) -> Result<ModuleSignal, AnalyzerError> {
        if symbol.trim().is_empty() {
            return Err(AnalyzerError::NoData(symbol.to_string()));
        }
        let phase = self.phase(symbol);
        let step = self.steps.entry(symbol.to_string()).or_insert(0);
        *step += 1;
        if *step <= WAVE_WARMUP_STEPS {
            return Err(AnalyzerError::NotReady);
        }

        let angle = (*step as f64) * std::f64::consts::TAU / self.period + phase;
        let bias = angle.sin();
        let direction = Direction::from_bias(bias, 0.15);
        let confidence = 40.0 + bias.abs() * 55.0;
        let score = 50.0 + bias * 50.0;

        Ok(synthetic_signal(self.kind, direction, score, confidence))
    }
}

/// Deterministic mark price for paper runs: a slow drift around a base level
/// derived from the symbol name.
pub fn synthetic_price(symbol: &str, step: u64) -> f64 {
    let seed = symbol.bytes().map(u64::from).sum::<u64>();
    let base = 1.0 + (seed % 100) as f64 / 100.0;
    let t = step as f64;
    base * (1.0 + 0.004 * (t / 17.0).sin() + 0.001 * (t / 3.0).cos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_replays_then_repeats_last() {
        let mut a = ScriptedAnalyzer::new(ModuleKind::Rsi);
        a.push(Err(AnalyzerError::NotReady)).push(Ok(synthetic_signal(
            ModuleKind::Rsi,
            Direction::Bullish,
            70.0,
            80.0,
        )));

        assert!(a.analyze("EURUSD").is_err());
        assert!(a.analyze("EURUSD").is_ok());
        assert!(a.analyze("EURUSD").is_ok());
        assert_eq!(a.calls(), 3);
    }

    #[test]
    fn unscripted_analyzer_is_not_ready() {
        let mut a = ScriptedAnalyzer::new(ModuleKind::Macd);
        assert_eq!(a.analyze("EURUSD").unwrap_err(), AnalyzerError::NotReady);
    }

    #[test]
    fn synthetic_signal_matches_kind() {
        for kind in ModuleKind::ALL {
            let s = synthetic_signal(kind, Direction::Bearish, 60.0, 70.0);
            assert_eq!(s.kind(), kind);
        }
    }

    #[test]
    fn wave_is_deterministic_per_symbol() {
        let mut a = WaveAnalyzer::new(ModuleKind::Volume, 12.0);
        let mut b = WaveAnalyzer::new(ModuleKind::Volume, 12.0);
        assert_eq!(a.analyze("GBPUSD").unwrap_err(), AnalyzerError::NotReady);
        assert_eq!(b.analyze("GBPUSD").unwrap_err(), AnalyzerError::NotReady);
        for _ in 0..5 {
            let x = a.analyze("GBPUSD").unwrap().normalize();
            let y = b.analyze("GBPUSD").unwrap().normalize();
            assert_eq!(x.direction, y.direction);
            assert!((x.confidence - y.confidence).abs() < 1e-12);
            assert!((0.0..=100.0).contains(&x.confidence));
        }
    }

    #[test]
    fn wave_without_symbol_has_no_data() {
        let mut a = WaveAnalyzer::new(ModuleKind::Rsi, 12.0);
        assert!(matches!(a.analyze(" "), Err(AnalyzerError::NoData(_))));
    }

    #[test]
    fn synthetic_price_is_positive_and_moves() {
        let a = synthetic_price("EURUSD", 1);
        let b = synthetic_price("EURUSD", 20);
        assert!(a > 0.0 && b > 0.0);
        assert!((a - b).abs() > 1e-9);
        assert_eq!(a, synthetic_price("EURUSD", 1));
    }
}
