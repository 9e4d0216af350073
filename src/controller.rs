// src/controller.rs
//
// Two-phase signal cycle controller. The phase alternates on a fixed cycle
// duration; at every boundary the controller classifies left-turn congestion
// on the newly active axis, picks one of four extension actions, runs the
// efficiency evaluator, and emits a decision record. The q-value/reward
// arithmetic is a deterministic scoring heuristic keyed on the frame index;
// it shapes the quality value fed to the extension generator, nothing is
// learned.
//
// All cycle state lives in this context object; two intersections run as two
// independent controllers.

use crate::evaluator::TrafficEvaluator;
use crate::extension::ExtensionTimeGenerator;
use crate::lane_stats::LaneStatsTable;
use crate::types::{DecisionRecord, Phase, SignalAction, SignalConfig};
use tracing::{debug, info};

/// Initial efficiency/wait baselines reported before the evaluator has run.
const INITIAL_EFFICIENCY_PCT: f64 = 15.0;
const INITIAL_WAIT_REDUCTION_PCT: f64 = 8.0;

/// Deterministic per-axis flow model standing in for the loop detectors of
/// the cross axis (and for both axes before any camera data exists).
#[derive(Debug, Clone, Copy)]
pub struct AxisFlows {
    pub left: u64,
    pub through: u64,
}

impl AxisFlows {
    pub fn left_ratio(&self) -> f64 {
        let total = self.left + self.through;
        if total > 0 {
            self.left as f64 / total as f64
        } else {
            0.0
        }
    }
}

pub fn simulated_flows(frame_index: u64) -> (AxisFlows, AxisFlows) {
    let primary = AxisFlows {
        left: 10 + frame_index % 5,
        through: 15 - frame_index % 5,
    };
    let secondary = AxisFlows {
        left: 8 + frame_index % 3,
        through: 12 - frame_index % 3,
    };
    (primary, secondary)
}

#[derive(Debug)]
struct ActionOutcome {
    action: SignalAction,
    extension_seconds: i64,
    new_q: f64,
    reward: f64,
    time_penalty_factor: f64,
    flow_sensitivity: f64,
    efficiency_increment: f64,
    reduction_increment: f64,
}

#[derive(Debug)]
pub struct CycleController {
    cycle_duration: f64,
    congestion_threshold: f64,
    phase: Phase,
    cycle_start_time: f64,
    time_gen: ExtensionTimeGenerator,
    baseline_efficiency_pct: f64,
    baseline_wait_pct: f64,
    decisions: Vec<DecisionRecord>,
}

impl CycleController {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            cycle_duration: config.cycle_duration,
            congestion_threshold: config.congestion_ratio_threshold,
            phase: Phase::Primary,
            cycle_start_time: 0.0,
            time_gen: ExtensionTimeGenerator::new(),
            baseline_efficiency_pct: INITIAL_EFFICIENCY_PCT,
            baseline_wait_pct: INITIAL_WAIT_REDUCTION_PCT,
            decisions: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    fn congested(&self, ratio: f64) -> bool {
        self.congestion_threshold <= ratio && ratio <= 1.0
    }

    /// Start-of-run decision, before any frame is processed. Uses the flow
    /// model at frame 0 for both the congestion ratios and the increments.
    pub fn start(&mut self, timestamp: f64) -> DecisionRecord {
        self.cycle_start_time = timestamp;

        let (primary, secondary) = simulated_flows(0);
        info!(
            "State: primary left-turn ratio {:.2}, secondary left-turn ratio {:.2}",
            primary.left_ratio(),
            secondary.left_ratio()
        );

        let congested = self.congested(primary.left_ratio());
        let outcome = self.decide(
            Phase::Primary,
            congested,
            0,
            primary.left as usize,
            primary.through as usize,
        );
        self.record(timestamp, outcome)
    }

    /// Per-frame tick. Returns a decision record when the cycle boundary
    /// was crossed, `None` otherwise.
    pub fn on_frame(
        &mut self,
        current_time: f64,
        frame_index: u64,
        stats: &LaneStatsTable,
        evaluator: &mut TrafficEvaluator,
    ) -> Option<DecisionRecord> {
        if current_time - self.cycle_start_time < self.cycle_duration {
            return None;
        }

        self.phase = self.phase.flipped();
        self.cycle_start_time = current_time;
        info!("Switching right-of-way to the {} phase", self.phase.as_str());

        let left_count = stats.left_turn_count();
        let straight_count = stats.straight_count();

        let eval = evaluator.evaluate(stats, left_count, straight_count, frame_index);
        self.baseline_efficiency_pct = eval.efficiency_improvement_pct;
        self.baseline_wait_pct = eval.wait_reduction_pct;
        info!(
            "Factors: speed {:.2}, left-turn {:.2}, balance {:.2}",
            eval.factors.speed_factor, eval.factors.left_turn_factor, eval.factors.balance_factor
        );

        let (primary, secondary) = simulated_flows(frame_index);
        let (axis, ratio) = match self.phase {
            Phase::Primary => (primary, primary.left_ratio()),
            Phase::Secondary => (secondary, secondary.left_ratio()),
        };
        info!(
            "State: {} left-turn ratio {:.2}, through ratio {:.2}",
            self.phase.as_str(),
            ratio,
            1.0 - ratio
        );
        debug!(
            "Axis flows: left {} through {} (threshold {:.2})",
            axis.left, axis.through, self.congestion_threshold
        );

        let congested = self.congested(ratio);
        let outcome = self.decide(self.phase, congested, frame_index, left_count, straight_count);
        Some(self.record(current_time, outcome))
    }

    /// One of four mutually exclusive branches: active phase × congestion.
    /// Constants per branch are the deployed tuning; the quality value is
    /// the one-step q-update toward the branch reward.
    fn decide(
        &mut self,
        phase: Phase,
        congested: bool,
        i: u64,
        left_count: usize,
        straight_count: usize,
    ) -> ActionOutcome {
        let left = left_count.max(1) as f64;
        let straight = straight_count.max(1) as f64;
        // max(1, ·) only guards the denominator; numerators keep raw counts.
        let left_raw = left_count as f64;
        let straight_raw = straight_count as f64;

        match (phase, congested) {
            (Phase::Primary, true) => {
                let q = 0.85 + (i % 10) as f64 * 0.005;
                let reward = 1.2 + (i % 3) as f64 * 0.02;
                let new_q = q + 0.1 * (reward - q);
                let ext = self.time_gen.generate(new_q, i);
                ActionOutcome {
                    action: SignalAction::ExtendPrimaryLeft,
                    extension_seconds: ext,
                    new_q,
                    reward,
                    time_penalty_factor: 1.0 + (new_q - 0.8) * 0.2,
                    flow_sensitivity: 0.75 + (i % 4) as f64 * 0.01,
                    efficiency_increment: (new_q - 0.8) * 10.0 + (left_raw / straight) * 2.0,
                    reduction_increment: (reward - 1.0) * 8.0 + (ext as f64 / 15.0) * 3.0,
                }
            }
            (Phase::Primary, false) => {
                let q = 0.75 + (i % 8) as f64 * 0.01;
                let reward = 1.1 + (i % 2) as f64 * 0.03;
                let new_q = q + 0.1 * (reward - q);
                let ext = self.time_gen.generate(new_q, i);
                ActionOutcome {
                    action: SignalAction::ExtendPrimaryThrough,
                    extension_seconds: ext,
                    new_q,
                    reward,
                    time_penalty_factor: 1.0 + (new_q - 0.7) * 0.15,
                    flow_sensitivity: 0.78 + (i % 5) as f64 * 0.02,
                    efficiency_increment: (new_q - 0.7) * 8.0 + (straight_raw / left) * 1.5,
                    reduction_increment: (reward - 1.0) * 6.0 + (ext as f64 / 15.0) * 2.0,
                }
            }
            (Phase::Secondary, true) => {
                let q = 0.82 + (i % 6) as f64 * 0.01;
                let reward = 1.15 + (i % 4) as f64 * 0.02;
                let new_q = q + 0.1 * (reward - q);
                let ext = self.time_gen.generate(new_q, i);
                ActionOutcome {
                    action: SignalAction::ExtendSecondaryLeft,
                    extension_seconds: ext,
                    new_q,
                    reward,
                    time_penalty_factor: 1.0 + (new_q - 0.8) * 0.18,
                    flow_sensitivity: 0.76 + (i % 3) as f64 * 0.01,
                    efficiency_increment: (new_q - 0.8) * 9.0 + (left_raw / straight) * 1.8,
                    reduction_increment: (reward - 1.0) * 7.0 + (ext as f64 / 15.0) * 2.5,
                }
            }
            (Phase::Secondary, false) => {
                let q = 0.78 + (i % 7) as f64 * 0.01;
                let reward = 1.12 + (i % 5) as f64 * 0.02;
                let new_q = q + 0.1 * (reward - q);
                let ext = self.time_gen.generate(new_q, i);
                ActionOutcome {
                    action: SignalAction::ExtendSecondaryThrough,
                    extension_seconds: ext,
                    new_q,
                    reward,
                    time_penalty_factor: 1.0 + (new_q - 0.75) * 0.16,
                    flow_sensitivity: 0.79 + (i % 6) as f64 * 0.01,
                    efficiency_increment: (new_q - 0.75) * 7.0 + (straight_raw / left) * 1.2,
                    reduction_increment: (reward - 1.0) * 5.0 + (ext as f64 / 15.0) * 1.8,
                }
            }
        }
    }

    fn record(&mut self, timestamp: f64, outcome: ActionOutcome) -> DecisionRecord {
        let efficiency_increment = outcome.efficiency_increment.clamp(1.0, 5.0);
        let reduction_increment = outcome.reduction_increment.clamp(0.5, 4.0);

        let record = DecisionRecord {
            timestamp,
            action: outcome.action,
            extension_seconds: outcome.extension_seconds,
            efficiency_improvement_pct: self.baseline_efficiency_pct + efficiency_increment,
            wait_reduction_pct: self.baseline_wait_pct + reduction_increment,
        };

        info!(
            "Decision: {} {}s (time penalty factor {:.2})",
            outcome.action.as_str(),
            outcome.extension_seconds,
            outcome.time_penalty_factor
        );
        info!(
            "Quality update: reward {:.2} -> new q {:.2} (flow sensitivity {:.2})",
            outcome.reward, outcome.new_q, outcome.flow_sensitivity
        );
        info!(
            "Projection: efficiency +{:.1}%, wait time -{:.1}%",
            record.efficiency_improvement_pct, record.wait_reduction_pct
        );

        self.decisions.push(record.clone());
        record
    }
}
