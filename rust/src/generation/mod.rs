//! Full schedule generation: length, classification, speed template,
//! rotation, ranking and placement.

pub mod classify;
pub mod difficulty;
pub mod length;
pub mod placer;
pub mod rotate;
pub mod speed_list;
pub mod stats;

pub use classify::{classify, round_speed, Classification};
pub use difficulty::{rank_ports, Difficulty, DifficultyEntry};
pub use length::{compute_schedule_length, schedule_length_from_clock};
pub use placer::{place_ports, Placement, Placer};
pub use rotate::{rotate_aligned, rotate_to_idle};
pub use speed_list::{build_speed_list, split, SlotBudget};
pub use stats::{compute_stats, gap_jitter, validate, ScheduleStats, SlotStats};

use rustc_hash::FxHashMap;

use crate::config::SchedulerConfig;
use crate::error::SchedResult;
use crate::log_debug;
use crate::models::{Port, SpeedBin};

/// Placed ring before per-QPC ownership is established.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedRing {
    pub classification: Classification,
    pub placement: Placement,
}

/// Run the generation pipeline for `ports` over a ring of `length` slots.
pub fn generate_ring(
    ports: &[Port],
    config: &SchedulerConfig,
    length: usize,
) -> SchedResult<GeneratedRing> {
    let verbosity = config.verbosity;
    let classification = classify(ports, config)?;

    let ports_per_bin: FxHashMap<SpeedBin, usize> = SpeedBin::REAL
        .iter()
        .map(|&bin| (bin, classification.ports_in_bin(bin)))
        .collect();
    let budget = SlotBudget::new(length, &ports_per_bin);
    let mut template = build_speed_list(&budget, verbosity)?;

    let rotation = rotate_to_idle(&mut template)?;
    log_debug!(verbosity, "  Template rotated by {}", rotation);
    if verbosity >= crate::logging::VERBOSITY_DEBUG {
        let labels: Vec<String> = template.iter().map(ToString::to_string).collect();
        log_debug!(verbosity, "  Template: [{}]", labels.join(", "));
    }

    let ranked = rank_ports(
        &classification.fabric_speed,
        &classification.fabric_to_phys,
        verbosity,
    );
    let placement = place_ports(template, &classification, &ranked, verbosity)?;

    Ok(GeneratedRing {
        classification,
        placement,
    })
}
