//! Synthetic mixture-of-experts workload.
//!
//! Seeds the store with random FP16 experts, then replays a seeded routing
//! pattern: every round ("token") activates a few experts, reads them with
//! `get`, and optionally prefetches the next round's experts in background.

use std::time::Instant;

use half::f16;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::record::{ExpertId, ExpertRecord, ExpertWeights, Metadata, MetaValue};
use crate::cache::swapper::{SwapError, Swapper};
use crate::config::WorkloadConfig;
use crate::metrics::SwapStats;

/// Outcome of one workload run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    pub experts: usize,
    pub rounds: usize,
    pub requests: u64,
    pub elapsed_ms: u64,
    pub resident_experts: usize,
    pub resident_bytes: usize,
    pub failures: usize,
    /// Sum of the first gate element of every fetched expert.
    pub checksum: f64,
    pub stats: SwapStats,
}

pub fn expert_id(index: usize) -> ExpertId {
    format!("expert-{index:03}")
}

/// Build one expert with random FP16 payloads.
pub fn synthetic_expert(rng: &mut StdRng, index: usize, elements: usize) -> ExpertRecord {
    let mut payload = || -> Vec<f16> {
        (0..elements)
            .map(|_| f16::from_f32(rng.gen_range(-1.0f32..1.0)))
            .collect()
    };
    let (gate, up, down) = (payload(), payload(), payload());

    let mut metadata = Metadata::new();
    metadata.insert("index".to_string(), MetaValue::from(index as i64));
    metadata.insert("dtype".to_string(), MetaValue::from("f16"));
    ExpertRecord::from_slices(expert_id(index), &gate, &up, &down, metadata)
}

/// Register every expert and push it to disk, leaving RAM empty.
pub fn seed_experts(swapper: &mut Swapper, config: &WorkloadConfig) -> Result<(), SwapError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    for i in 0..config.experts {
        let record = synthetic_expert(&mut rng, i, config.expert_elements);
        swapper.register_record(record, false);
        swapper.swap_out(&expert_id(i), false)?;
    }
    info!(
        experts = config.experts,
        bytes_per_expert = config.expert_bytes(),
        "Seeded expert store"
    );
    Ok(())
}

/// Seeded routing: `rounds` lists of distinct expert indices.
pub fn routing(config: &WorkloadConfig) -> Vec<Vec<usize>> {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let per_round = config.experts_per_token.min(config.experts);
    (0..config.rounds)
        .map(|_| index::sample(&mut rng, config.experts, per_round).into_vec())
        .collect()
}

/// Replay the routing pattern against an already seeded swapper.
pub fn run(swapper: &mut Swapper, config: &WorkloadConfig) -> Result<WorkloadReport, SwapError> {
    let plan = routing(config);
    let start = Instant::now();
    let mut requests = 0u64;
    let mut checksum = 0.0f64;

    info!(
        rounds = plan.len(),
        experts_per_token = config.experts_per_token,
        prefetch_next = config.prefetch_next,
        "Starting workload"
    );

    for (round, experts) in plan.iter().enumerate() {
        for &i in experts {
            let weights = swapper.get(&expert_id(i), None)?;
            checksum += first_gate_value(&weights);
            requests += 1;
        }

        if config.prefetch_next {
            if let Some(next) = plan.get(round + 1) {
                for &i in next {
                    swapper.swap_in(&expert_id(i), true, 1)?;
                }
            }
        }

        if round % 50 == 0 {
            debug!(
                round,
                resident = swapper.resident_len(),
                pending = swapper.pending_len(),
                "Workload progress"
            );
        }
    }
    swapper.flush()?;

    let report = WorkloadReport {
        experts: config.experts,
        rounds: plan.len(),
        requests,
        elapsed_ms: start.elapsed().as_millis() as u64,
        resident_experts: swapper.resident_len(),
        resident_bytes: swapper.resident_bytes(),
        failures: swapper.recent_failures().len(),
        checksum,
        stats: swapper.stats(),
    };
    info!(
        requests,
        elapsed_ms = report.elapsed_ms,
        hit_rate = report.stats.hit_rate(),
        evictions = report.stats.evictions,
        "Workload finished"
    );
    Ok(report)
}

fn first_gate_value(weights: &ExpertWeights) -> f64 {
    ExpertWeights::typed::<f16>(&weights.gate)
        .and_then(|gate| gate.first())
        .map(|v| v.to_f64())
        .unwrap_or(0.0)
}
