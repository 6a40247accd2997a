//! Work particle scheduling.
//!
//! A schedule is an ordered list of stages. Stages run strictly in order and
//! the particles inside one stage may run concurrently:
//!
//! 1. the collateral particle (sequence number 0), whose verdict gates every
//!    target/background particle
//! 2. every chunk but the last, if any
//! 3. the last chunk alone, flagged as the final invocation

use crate::model::PixelIndex;
use crate::partition::partition;
use crate::particle::{ParticleKind, WorkParticle};
use crate::ports::CollateralLocation;
use crate::resolver::CommonParameters;
use std::sync::Arc;
use tracing::info;

/// Particles that may run concurrently.
#[derive(Debug, Clone, Default)]
pub struct Stage {
    /// Particles of the stage, by sequence number.
    pub particles: Vec<WorkParticle>,
}

impl Stage {
    /// Number of particles.
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// True when the stage holds no particles.
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

/// The ordered stages of one unit of work.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Context shared by every particle.
    pub parameters: Arc<CommonParameters>,
    /// Stages in execution order.
    pub stages: Vec<Stage>,
    /// Number of particles across all stages.
    pub total_particles: usize,
}

impl Schedule {
    /// Every particle, in stage order.
    pub fn particles(&self) -> impl Iterator<Item = &WorkParticle> {
        self.stages.iter().flat_map(|stage| stage.particles.iter())
    }

    /// One line per particle, e.g. `stage 1: particle 2 40 pixels, rows 3..=4`.
    pub fn layout(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.total_particles);
        for (stage, particles) in self.stages.iter().enumerate() {
            for particle in &particles.particles {
                let body = match particle.kind() {
                    ParticleKind::Collateral { .. } => "collateral".to_string(),
                    ParticleKind::TargetBackground { pixels } => {
                        let rows = particle.rows();
                        match (rows.first(), rows.last()) {
                            (Some(first), Some(last)) => {
                                format!("{} pixels, rows {first}..={last}", pixels.len())
                            }
                            _ => format!("{} pixels", pixels.len()),
                        }
                    }
                };
                let marker = if particle.is_last() { " (last)" } else { "" };
                lines.push(format!(
                    "stage {stage}: particle {} {body}{marker}",
                    particle.sequence_number()
                ));
            }
        }
        lines
    }
}

/// Builds the stage schedule for the pixels in `index`.
///
/// With `k` chunks there are `k + 1` particles. With no chunks at all the
/// collateral particle is also the final one.
pub fn schedule(
    index: &PixelIndex,
    collateral: Vec<CollateralLocation>,
    max_chunk_size: usize,
    parameters: Arc<CommonParameters>,
) -> Schedule {
    let chunks = partition(&index.all_pixels(), max_chunk_size).into_chunks();
    let chunk_count = chunks.len();
    let total_particles = chunk_count + 1;

    let mut stages = vec![Stage {
        particles: vec![WorkParticle::collateral(
            collateral,
            total_particles,
            chunk_count == 0,
        )],
    }];

    let mut parallel = Stage::default();
    let mut last = Stage::default();
    for (i, pixels) in chunks.into_iter().enumerate() {
        let sequence_number = i + 1;
        let is_last = sequence_number == chunk_count;
        let particle =
            WorkParticle::target_background(sequence_number, total_particles, is_last, pixels);
        if is_last {
            last.particles.push(particle);
        } else {
            parallel.particles.push(particle);
        }
    }
    if !parallel.is_empty() {
        stages.push(parallel);
    }
    if !last.is_empty() {
        stages.push(last);
    }

    info!(
        module = parameters.module,
        output = parameters.output,
        pixels = index.len(),
        particles = total_particles,
        stages = stages.len(),
        "Scheduled work particles"
    );

    Schedule {
        parameters,
        stages,
        total_particles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Pixel, TargetType};
    use crate::testing::sample_parameters;

    fn index(rows: i32, columns: i32) -> PixelIndex {
        let target = (0..rows).flat_map(|r| {
            (0..columns).map(move |c| Pixel::raw(2, 1, TargetType::LongCadence, r, c))
        });
        PixelIndex::new(target, Vec::new())
    }

    #[test]
    fn three_stages_for_several_chunks() {
        let s = schedule(&index(4, 5), Vec::new(), 5, Arc::new(sample_parameters()));
        assert_eq!(s.total_particles, 5);
        assert_eq!(s.stages.len(), 3);
        assert_eq!(s.stages[0].len(), 1);
        assert!(s.stages[0].particles[0].is_collateral());
        assert_eq!(s.stages[1].len(), 3);
        assert_eq!(s.stages[2].len(), 1);

        let last = &s.stages[2].particles[0];
        assert!(last.is_last());
        assert_eq!(last.sequence_number(), 4);
        assert_eq!(s.particles().filter(|p| p.is_last()).count(), 1);
        assert!(s.particles().all(|p| p.total_particles() == 5));
        let numbers: Vec<usize> = s.particles().map(WorkParticle::sequence_number).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn single_chunk_has_no_parallel_stage() {
        let s = schedule(&index(2, 3), Vec::new(), 100, Arc::new(sample_parameters()));
        assert_eq!(s.total_particles, 2);
        assert_eq!(s.stages.len(), 2);
        assert!(s.stages[1].particles[0].is_last());
        assert!(!s.stages[0].particles[0].is_last());
    }

    #[test]
    fn layout_puts_a_lone_chunk_in_stage_one() {
        let s = schedule(&index(2, 3), Vec::new(), 100, Arc::new(sample_parameters()));
        assert_eq!(
            s.layout(),
            vec![
                "stage 0: particle 0 collateral".to_string(),
                "stage 1: particle 1 6 pixels, rows 0..=1 (last)".to_string(),
            ]
        );

        let s = schedule(&index(4, 5), Vec::new(), 5, Arc::new(sample_parameters()));
        let layout = s.layout();
        assert_eq!(layout.len(), 5);
        assert_eq!(layout[3], "stage 1: particle 3 5 pixels, rows 2..=2");
        assert_eq!(layout[4], "stage 2: particle 4 5 pixels, rows 3..=3 (last)");
    }

    #[test]
    fn no_pixels_makes_collateral_last() {
        let s = schedule(&PixelIndex::default(), Vec::new(), 10, Arc::new(sample_parameters()));
        assert_eq!(s.total_particles, 1);
        assert_eq!(s.stages.len(), 1);
        assert!(s.stages[0].particles[0].is_last());
    }
}
