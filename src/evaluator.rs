// src/evaluator.rs
//
// Multi-factor traffic efficiency score (MSTPS), computed at every phase
// boundary. Five factors (left-turn pressure, speed, lane balance, a
// one-step-ahead prediction, and a periodic component) combined under
// regime-gated weights and mapped to the bounded efficiency / wait-reduction
// percentages the cycle controller attaches to its decisions.
//
// The smoothing transforms mirror the tuning of the deployed system: a
// Ricker-wavelet convolution over the boundary-sampled speed history, simple
// exponential smoothing for the prediction, and the low-frequency spectrum
// of the vehicle-count history once enough samples exist.

use crate::lane_stats::LaneStatsTable;
use crate::types::EvaluatorConfig;
use serde::Serialize;
use std::collections::VecDeque;
use std::f64::consts::PI;
use tracing::debug;

/// Logistic curve steepness shared by all sigmoid factors.
const SIGMOID_K: f64 = 5.0;
/// Exponential smoothing constant for the predictive factor.
const SMOOTHING_ALPHA: f64 = 0.3;
/// Amplitude and frequency of the fallback periodic factor.
const PERIODIC_AMPLITUDE: f64 = 0.15;
const PERIODIC_FREQUENCY: f64 = 0.05;
/// Ricker wavelet width used for speed/volume smoothing.
const RICKER_WIDTH: f64 = 5.0;
/// Assumed mean speed (m/s) before any speed sample exists.
const DEFAULT_AVG_SPEED: f64 = 5.0;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EvaluatorWeights {
    pub left_turn: f64,
    pub speed: f64,
    pub balance: f64,
    pub predictive: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FactorBreakdown {
    pub smoothed_speed: f64,
    pub smoothed_vehicles: f64,
    pub left_turn_factor: f64,
    pub speed_factor: f64,
    pub balance_factor: f64,
    pub predictive_factor: f64,
    pub periodic_factor: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Evaluation {
    pub score: f64,
    pub weights: EvaluatorWeights,
    pub factors: FactorBreakdown,
    /// score × 25, clamped to [5, 40]
    pub efficiency_improvement_pct: f64,
    /// score × 15, clamped to [2, 25]
    pub wait_reduction_pct: f64,
}

#[derive(Debug)]
pub struct TrafficEvaluator {
    free_flow_speed: f64,
    history_capacity: usize,
    speed_history: VecDeque<f64>,
    vehicle_history: VecDeque<f64>,
    step: u64,
}

impl TrafficEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Self {
        Self {
            free_flow_speed: config.free_flow_speed,
            history_capacity: config.history_capacity,
            speed_history: VecDeque::with_capacity(config.history_capacity),
            vehicle_history: VecDeque::with_capacity(config.history_capacity),
            step: 0,
        }
    }

    /// Evaluate the current state. Appends one sample to each history
    /// buffer, so this is meant to be called once per phase boundary.
    pub fn evaluate(
        &mut self,
        stats: &LaneStatsTable,
        left_turn_count: usize,
        straight_count: usize,
        frame_index: u64,
    ) -> Evaluation {
        let avg_speed = stats.overall_avg_speed(DEFAULT_AVG_SPEED);
        let total_vehicles = (left_turn_count + straight_count) as f64;
        self.push_history(avg_speed, total_vehicles);
        self.step += 1;

        let primary_left = left_turn_count as f64;
        let primary_through = straight_count as f64;
        // The cross axis has no camera; its counts follow the deterministic
        // flow model keyed on the frame index.
        let secondary_left = (frame_index % 8).max(1) as f64;
        let secondary_through = (frame_index % 12).max(1) as f64;

        let speeds: Vec<f64> = self.speed_history.iter().copied().collect();
        let vehicles: Vec<f64> = self.vehicle_history.iter().copied().collect();

        let smoothed_speed = if speeds.len() > 10 {
            ricker_smoothed_tail(&speeds, RICKER_WIDTH, 10)
        } else {
            avg_speed
        };
        let smoothed_vehicles = if vehicles.len() > 10 {
            ricker_smoothed_tail(&vehicles, RICKER_WIDTH, 10)
        } else {
            total_vehicles
        };

        // Left-turn pressure per axis, multiplied across axes.
        let primary_ratio = left_ratio(primary_left, primary_through);
        let secondary_ratio = left_ratio(secondary_left, secondary_through);
        let primary_factor = sigmoid(primary_ratio - 0.4);
        let secondary_factor = sigmoid(secondary_ratio - 0.4);
        let left_turn_factor = primary_factor * secondary_factor;

        let speed_factor = sigmoid(smoothed_speed / self.free_flow_speed - 0.5);

        let balance_factor = balance_factor(&stats.lane_vehicle_counts());

        // One-step-ahead view: smoothed speed ratio blended with the mean
        // of the two axis left-turn sigmoids (ratios assumed persistent).
        let pred_speed = exponential_smoothing(&speeds, SMOOTHING_ALPHA);
        let pred_speed_ratio = pred_speed / self.free_flow_speed;
        let predictive_factor =
            0.5 * (sigmoid(primary_ratio - 0.4) + sigmoid(secondary_ratio - 0.4))
                + 0.5 * pred_speed_ratio;

        let weights = select_weights(smoothed_speed, smoothed_vehicles);

        let periodic_factor = self.periodic_factor(&vehicles);

        let score = (weights.left_turn * left_turn_factor
            + weights.speed * speed_factor
            + weights.balance * balance_factor
            + weights.predictive * predictive_factor)
            * periodic_factor;

        let factors = FactorBreakdown {
            smoothed_speed,
            smoothed_vehicles,
            left_turn_factor,
            speed_factor,
            balance_factor,
            predictive_factor,
            periodic_factor,
        };

        debug!(
            "MSTPS {:.3} (speed {:.2}, left {:.2}, balance {:.2}, pred {:.2}, periodic {:.2})",
            score, speed_factor, left_turn_factor, balance_factor, predictive_factor, periodic_factor
        );

        Evaluation {
            score,
            weights,
            factors,
            efficiency_improvement_pct: (score * 25.0).clamp(5.0, 40.0),
            wait_reduction_pct: (score * 15.0).clamp(2.0, 25.0),
        }
    }

    fn push_history(&mut self, speed: f64, vehicles: f64) {
        if self.speed_history.len() >= self.history_capacity {
            self.speed_history.pop_front();
        }
        self.speed_history.push_back(speed);
        if self.vehicle_history.len() >= self.history_capacity {
            self.vehicle_history.pop_front();
        }
        self.vehicle_history.push_back(vehicles);
    }

    /// Low-frequency spectral magnitude of the vehicle history once it is
    /// long enough; a slow sinusoid of the step counter before that.
    fn periodic_factor(&self, vehicles: &[f64]) -> f64 {
        let n = vehicles.len();
        if n > 100 {
            // DFT bins with 0 < j/n < 0.01: a handful at most for a
            // bounded history, so they are computed directly.
            let mut magnitude_sum = 0.0;
            let mut bins = 0usize;
            let mut j = 1usize;
            while (j as f64) / (n as f64) < 0.01 {
                let mut re = 0.0;
                let mut im = 0.0;
                for (i, v) in vehicles.iter().enumerate() {
                    let angle = 2.0 * PI * (j as f64) * (i as f64) / (n as f64);
                    re += v * angle.cos();
                    im -= v * angle.sin();
                }
                magnitude_sum += (re * re + im * im).sqrt();
                bins += 1;
                j += 1;
            }
            if bins > 0 {
                1.0 + 0.2 * magnitude_sum / bins as f64
            } else {
                1.0
            }
        } else {
            1.0 + PERIODIC_AMPLITUDE * (PERIODIC_FREQUENCY * self.step as f64).sin()
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-SIGMOID_K * x).exp())
}

fn left_ratio(left: f64, through: f64) -> f64 {
    let total = left + through;
    if total > 0.0 {
        left / total
    } else {
        0.0
    }
}

/// Normalized Shannon entropy of the per-lane vehicle distribution.
/// 1.0 when no vehicles have been observed; 0.0 when one lane holds all.
fn balance_factor(lane_counts: &[usize]) -> f64 {
    let total: usize = lane_counts.iter().sum();
    if total == 0 {
        return 1.0;
    }
    let entropy: f64 = lane_counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.log2()
        })
        .sum();
    let max_entropy = (lane_counts.len() as f64).log2();
    if max_entropy > 0.0 {
        entropy / max_entropy
    } else {
        1.0
    }
}

/// Iterated single-exponential smoothing; returns the final smoothed value.
fn exponential_smoothing(data: &[f64], alpha: f64) -> f64 {
    let mut iter = data.iter();
    let Some(&first) = iter.next() else {
        return 0.0;
    };
    iter.fold(first, |acc, &x| alpha * x + (1.0 - alpha) * acc)
}

/// Regime-gated factor weights: heavy congestion leans on left-turn
/// pressure, saturated-but-flowing traffic leans on lane balance.
fn select_weights(smoothed_speed: f64, smoothed_vehicles: f64) -> EvaluatorWeights {
    if smoothed_speed < 5.0 && smoothed_vehicles > 30.0 {
        EvaluatorWeights {
            left_turn: 0.5,
            speed: 0.3,
            balance: 0.15,
            predictive: 0.05,
        }
    } else if smoothed_vehicles > 40.0 && smoothed_speed > 8.0 {
        EvaluatorWeights {
            left_turn: 0.3,
            speed: 0.2,
            balance: 0.4,
            predictive: 0.1,
        }
    } else {
        EvaluatorWeights {
            left_turn: 0.35,
            speed: 0.25,
            balance: 0.3,
            predictive: 0.1,
        }
    }
}

/// Convolve the series with a Ricker wavelet and average the last
/// `tail` responses. Kernel length follows the usual 10×width rule,
/// capped at the series length.
fn ricker_smoothed_tail(data: &[f64], width: f64, tail: usize) -> f64 {
    let n = data.len();
    let points = ((10.0 * width) as usize).min(n);
    let kernel = ricker_wavelet(points, width);

    let half = (points - 1) / 2;
    let mut responses = Vec::with_capacity(tail);
    let start = n.saturating_sub(tail);
    for i in start..n {
        let t = i + half;
        let mut acc = 0.0;
        for (k, w) in kernel.iter().enumerate() {
            if t >= k {
                let j = t - k;
                if j < n {
                    acc += data[j] * w;
                }
            }
        }
        responses.push(acc);
    }
    responses.iter().sum::<f64>() / responses.len() as f64
}

fn ricker_wavelet(points: usize, a: f64) -> Vec<f64> {
    let norm = 2.0 / ((3.0 * a).sqrt() * PI.powf(0.25));
    (0..points)
        .map(|i| {
            let x = i as f64 - (points as f64 - 1.0) / 2.0;
            norm * (1.0 - (x / a).powi(2)) * (-x * x / (2.0 * a * a)).exp()
        })
        .collect()
}
