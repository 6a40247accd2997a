//! Work particles.
//!
//! A particle is one bounded unit of retrieval and packaging work. The
//! collateral particle reads the smear and black collateral locations; each
//! target/background particle reads one chunk of photometric pixels. Both
//! share the same state: a presence verdict that moves once from
//! [`DataPresence::Unknown`] to `Present` or `Missing`, the provenance of the
//! retrieved data, and the packaged [`CalInputs`].
//!
//! [`WorkParticle::execute`] consumes the particle and returns it executed,
//! so the single owner is always the only writer.

mod package;
mod presence;
mod retrieve;

pub use package::{CalInputs, CollateralInput, PixelInput};
pub use presence::series_present;

use crate::error::{CalError, CalResult};
use crate::model::{Pixel, SeriesId, TimeSeries};
use crate::ports::{CollateralLocation, TimeSeriesStore};
use crate::resolver::CommonParameters;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Whether a particle found usable data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataPresence {
    /// Not executed yet.
    #[default]
    Unknown,
    /// Usable data was retrieved.
    Present,
    /// Data is absent or incomplete.
    Missing,
}

impl DataPresence {
    /// True once a verdict has been reached.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DataPresence::Unknown)
    }
}

/// What a particle reads.
#[derive(Debug, Clone, PartialEq)]
pub enum ParticleKind {
    /// Smear and black collateral locations.
    Collateral {
        /// Locations read out for the cadence type.
        locations: Vec<CollateralLocation>,
    },
    /// One chunk of target and background pixels.
    TargetBackground {
        /// Pixels of the chunk, in row order.
        pixels: Vec<Pixel>,
    },
}

impl ParticleKind {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ParticleKind::Collateral { .. } => "collateral",
            ParticleKind::TargetBackground { .. } => "target/background",
        }
    }
}

/// Results of executing a particle.
#[derive(Debug, Clone, Default)]
struct ParticleState {
    presence: DataPresence,
    producer_ids: BTreeSet<u64>,
    input: Option<CalInputs>,
}

/// Context every particle of one unit of work executes against.
#[derive(Clone)]
pub struct ParticleContext {
    params: Arc<CommonParameters>,
    store: Arc<dyn TimeSeriesStore>,
    collateral_presence: DataPresence,
}

impl ParticleContext {
    /// Creates a context; the collateral verdict starts unknown.
    pub fn new(params: Arc<CommonParameters>, store: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            params,
            store,
            collateral_presence: DataPresence::Unknown,
        }
    }

    /// Context carrying the verdict of the collateral particle.
    pub fn with_collateral_presence(mut self, presence: DataPresence) -> Self {
        self.collateral_presence = presence;
        self
    }

    /// Shared parameters.
    pub fn params(&self) -> &Arc<CommonParameters> {
        &self.params
    }

    /// Verdict of the collateral particle, once known.
    pub fn collateral_presence(&self) -> DataPresence {
        self.collateral_presence
    }
}

impl std::fmt::Debug for ParticleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticleContext")
            .field("module", &self.params.module)
            .field("output", &self.params.output)
            .field("collateral_presence", &self.collateral_presence)
            .finish_non_exhaustive()
    }
}

/// One unit of retrieval and packaging work.
#[derive(Debug, Clone)]
pub struct WorkParticle {
    sequence_number: usize,
    total_particles: usize,
    is_last: bool,
    kind: ParticleKind,
    state: ParticleState,
}

impl WorkParticle {
    /// Creates the collateral particle (always sequence number 0).
    pub fn collateral(locations: Vec<CollateralLocation>, total_particles: usize, is_last: bool) -> Self {
        Self::new(0, total_particles, is_last, ParticleKind::Collateral { locations })
    }

    /// Creates a target/background particle.
    pub fn target_background(
        sequence_number: usize,
        total_particles: usize,
        is_last: bool,
        pixels: Vec<Pixel>,
    ) -> Self {
        Self::new(
            sequence_number,
            total_particles,
            is_last,
            ParticleKind::TargetBackground { pixels },
        )
    }

    fn new(sequence_number: usize, total_particles: usize, is_last: bool, kind: ParticleKind) -> Self {
        Self {
            sequence_number,
            total_particles,
            is_last,
            kind,
            state: ParticleState::default(),
        }
    }

    /// Position in the unit of work.
    pub fn sequence_number(&self) -> usize {
        self.sequence_number
    }

    /// Number of particles in the unit of work.
    pub fn total_particles(&self) -> usize {
        self.total_particles
    }

    /// True for the particle that signals the final invocation.
    pub fn is_last(&self) -> bool {
        self.is_last
    }

    /// What this particle reads.
    pub fn kind(&self) -> &ParticleKind {
        &self.kind
    }

    /// True for the collateral particle.
    pub fn is_collateral(&self) -> bool {
        matches!(self.kind, ParticleKind::Collateral { .. })
    }

    /// Presence verdict.
    pub fn presence(&self) -> DataPresence {
        self.state.presence
    }

    /// Tasks that produced the retrieved data.
    pub fn producer_ids(&self) -> &BTreeSet<u64> {
        &self.state.producer_ids
    }

    /// Packaged inputs, once executed.
    pub fn input(&self) -> Option<&CalInputs> {
        self.state.input.as_ref()
    }

    /// Mutable packaged inputs, once executed.
    pub fn input_mut(&mut self) -> Option<&mut CalInputs> {
        self.state.input.as_mut()
    }

    /// Takes the packaged inputs out of the particle.
    pub fn take_input(&mut self) -> Option<CalInputs> {
        self.state.input.take()
    }

    /// Pixel rows (or black rows for collateral) touched by this particle.
    pub fn rows(&self) -> BTreeSet<i32> {
        match &self.kind {
            ParticleKind::Collateral { locations } => locations
                .iter()
                .filter(|l| l.kind.offset_is_row())
                .map(|l| l.offset)
                .collect(),
            ParticleKind::TargetBackground { pixels } => pixels.iter().map(Pixel::row).collect(),
        }
    }

    fn series_ids(&self, params: &CommonParameters) -> Vec<SeriesId> {
        match &self.kind {
            ParticleKind::Collateral { locations } => locations
                .iter()
                .map(|l| l.raw_id(params.cadence_type, params.module, params.output))
                .collect(),
            ParticleKind::TargetBackground { pixels } => {
                pixels.iter().map(|p| p.series_id().clone()).collect()
            }
        }
    }

    /// Retrieves the particle's series, decides presence and packages inputs.
    ///
    /// Fails with [`CalError::ParticleAlreadyExecuted`] on a second call.
    #[instrument(skip_all, fields(particle = self.sequence_number, kind = self.kind.name()))]
    pub async fn execute(mut self, ctx: &ParticleContext) -> CalResult<Self> {
        if self.state.presence.is_terminal() {
            return Err(CalError::ParticleAlreadyExecuted(self.sequence_number));
        }

        let params = Arc::clone(&ctx.params);
        let module_parameters = &params.module_parameters;
        let interval = params.interval();

        let series = if params.is_data_absent() {
            debug!("No covering target table; skipping retrieval");
            HashMap::new()
        } else {
            let ids = self.series_ids(&params);
            retrieve::read_batched(
                ctx.store.as_ref(),
                &ids,
                interval,
                module_parameters.max_read_ids,
            )
            .await?
        };

        let producer_ids: BTreeSet<u64> = series
            .values()
            .flat_map(|s| s.originators.iter().copied())
            .collect();

        let coarse_point = module_parameters.enable_coarse_point_processing;
        let presence = if params.is_data_absent() {
            DataPresence::Missing
        } else {
            match &self.kind {
                ParticleKind::Collateral { locations } => presence::collateral_verdict(
                    params.cadence_type,
                    params.module,
                    params.output,
                    locations,
                    &series,
                    &params.cadence_times,
                    coarse_point,
                ),
                ParticleKind::TargetBackground { .. } => presence::target_verdict(
                    ctx.collateral_presence,
                    &series,
                    &params.cadence_times,
                    coarse_point,
                ),
            }
        };

        let mut input = CalInputs::new(
            self.sequence_number,
            self.total_particles,
            self.is_last,
            presence,
            Arc::clone(&params),
        );
        self.fill_input(&mut input, &series, &params);
        input.producer_ids = producer_ids.clone();
        input.attach_ffis(&self.rows());

        debug!(
            presence = ?presence,
            series = series.len(),
            producers = producer_ids.len(),
            "Particle executed"
        );

        self.state = ParticleState {
            presence,
            producer_ids,
            input: Some(input),
        };
        Ok(self)
    }

    fn fill_input(
        &self,
        input: &mut CalInputs,
        series: &HashMap<SeriesId, TimeSeries>,
        params: &CommonParameters,
    ) {
        let interval = params.interval();
        let lookup = |id: &SeriesId| {
            series
                .get(id)
                .cloned()
                .unwrap_or_else(|| TimeSeries::empty(id.clone(), interval))
        };

        match &self.kind {
            ParticleKind::Collateral { locations } => {
                input.collateral = locations
                    .iter()
                    .map(|location| {
                        let id = location.raw_id(params.cadence_type, params.module, params.output);
                        let s = lookup(&id);
                        CollateralInput {
                            kind: location.kind,
                            offset: location.offset,
                            values: s.values,
                            gaps: s.gaps,
                        }
                    })
                    .collect();
            }
            ParticleKind::TargetBackground { pixels } => {
                input.target_and_background_pixels = pixels
                    .iter()
                    .map(|pixel| {
                        let s = lookup(pixel.series_id());
                        PixelInput {
                            row: pixel.row(),
                            column: pixel.column(),
                            values: s.values,
                            gaps: s.gaps,
                        }
                    })
                    .collect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleParameters;
    use crate::model::{CadenceType, TargetType};
    use crate::resolver::UnitOfWork;
    use crate::testing::{CatalogFixture, FakeServices};

    async fn params(fakes: &FakeServices, parameters: ModuleParameters) -> Arc<CommonParameters> {
        let uow = UnitOfWork {
            pipeline_task_id: 42,
            cadence_type: CadenceType::Long,
            start_cadence: 100,
            end_cadence: 109,
            module: 2,
            output: 1,
        };
        let mut clocks = fakes.clock_cache();
        Arc::new(
            fakes
                .resolver(parameters)
                .resolve(&uow, &mut clocks)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn collateral_particle_reports_present_data_and_producers() {
        let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 109));
        let params = params(&fakes, ModuleParameters::default()).await;
        let locations = fakes.seed_collateral(&params, 77);
        let ctx = ParticleContext::new(Arc::clone(&params), fakes.store.clone());

        let particle = WorkParticle::collateral(locations.clone(), 3, false)
            .execute(&ctx)
            .await
            .unwrap();
        assert_eq!(particle.presence(), DataPresence::Present);
        assert_eq!(particle.producer_ids(), &BTreeSet::from([77]));
        let input = particle.input().unwrap();
        assert!(input.first_call);
        assert!(!input.last_call);
        assert!(!input.empty_inputs);
        assert_eq!(input.collateral.len(), locations.len());
    }

    #[tokio::test]
    async fn second_execution_is_rejected() {
        let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 109));
        let params = params(&fakes, ModuleParameters::default()).await;
        let ctx = ParticleContext::new(params, fakes.store.clone());

        let executed = WorkParticle::target_background(1, 2, true, Vec::new())
            .execute(&ctx)
            .await
            .unwrap();
        let err = executed.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, CalError::ParticleAlreadyExecuted(1)));
    }

    #[tokio::test]
    async fn missing_collateral_downgrades_valid_pixels() {
        let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 109));
        let params = params(&fakes, ModuleParameters::default()).await;
        let pixels = fakes.seed_pixels(&params, TargetType::LongCadence, &[(300, 10), (300, 11)], 5);

        let ctx = ParticleContext::new(Arc::clone(&params), fakes.store.clone())
            .with_collateral_presence(DataPresence::Missing);
        let particle = WorkParticle::target_background(1, 2, true, pixels.clone())
            .execute(&ctx)
            .await
            .unwrap();
        assert_eq!(particle.presence(), DataPresence::Missing);
        assert!(particle.input().unwrap().empty_inputs);
        assert!(particle.input().unwrap().ffis.is_empty());

        let ctx = ctx.with_collateral_presence(DataPresence::Present);
        let particle = WorkParticle::target_background(1, 2, true, pixels)
            .execute(&ctx)
            .await
            .unwrap();
        assert_eq!(particle.presence(), DataPresence::Present);
        assert!(particle.input().unwrap().last_call);
    }

    #[tokio::test]
    async fn ffi_rows_are_restricted_to_touched_rows() {
        let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 109));
        fakes.ffis.add_image(55_010.0, &[(300, vec![1.0]), (301, vec![2.0]), (400, vec![3.0])]);
        let parameters = ModuleParameters {
            enable_ffi_inform: true,
            ..ModuleParameters::default()
        };
        let params = params(&fakes, parameters).await;
        let pixels = fakes.seed_pixels(&params, TargetType::LongCadence, &[(300, 10), (400, 3)], 5);

        let ctx = ParticleContext::new(Arc::clone(&params), fakes.store.clone())
            .with_collateral_presence(DataPresence::Present);
        let particle = WorkParticle::target_background(1, 2, true, pixels)
            .execute(&ctx)
            .await
            .unwrap();
        let ffis = &particle.input().unwrap().ffis;
        assert_eq!(ffis.len(), 1);
        assert_eq!(ffis[0].rows.keys().copied().collect::<Vec<_>>(), vec![300, 400]);
    }

    #[tokio::test]
    async fn release_keeps_metadata() {
        let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 109));
        let params = params(&fakes, ModuleParameters::default()).await;
        let pixels = fakes.seed_pixels(&params, TargetType::LongCadence, &[(300, 10)], 5);
        let ctx = ParticleContext::new(Arc::clone(&params), fakes.store.clone());

        let mut particle = WorkParticle::target_background(1, 2, true, pixels)
            .execute(&ctx)
            .await
            .unwrap();
        let input = particle.input_mut().unwrap();
        input.release_series();
        assert!(input.is_released());
        assert_eq!(input.target_and_background_pixels.len(), 1);
        assert!(input.target_and_background_pixels[0].gaps.is_empty());
        assert_eq!(input.producer_ids, BTreeSet::from([5]));
        assert_eq!(particle.presence(), DataPresence::Present);
    }
}
