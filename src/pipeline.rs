//! The two entry points exposed to the host pipeline.
//!
//! [`CalPipeline::generate_inputs`] runs once per unit of work and returns the
//! stage schedule; [`CalPipeline::consume_outputs`] runs once per completed
//! engine run. [`CalPipeline::run_unit_of_work`] chains both around an
//! in-process [`CalibrationEngine`].

use crate::config::CalConfig;
use crate::consolidate::{ConsolidationSummary, EngineResult, OutputsConsumer};
use crate::dispatch::Dispatcher;
use crate::error::{CalError, CalResult};
use crate::particle::{CalInputs, WorkParticle};
use crate::ports::{CalServices, CalibrationEngine};
use crate::resolver::{CadenceClockCache, CommonParametersResolver, UnitOfWork};
use crate::schedule::{schedule, Schedule};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Flavour of the engine that produced a result batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineVariant {
    /// One result per particle.
    #[default]
    Standard,
    /// Full frame variant; its first result is a warm-up entry.
    FullFrame,
}

/// How unsuccessful results are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultMode {
    /// Report and skip unsuccessful results.
    #[default]
    Batch,
    /// Any unsuccessful result fails the whole consumption.
    SingleArtifact,
}

/// Outcome of [`CalPipeline::consume_outputs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    /// Results consolidated.
    pub consolidated: usize,
    /// Results skipped as unsuccessful or empty.
    pub skipped: usize,
    /// Writes across every consolidated result.
    pub writes: ConsolidationSummary,
}

/// Calibration stage orchestrator for one module/output.
pub struct CalPipeline {
    services: CalServices,
    config: CalConfig,
    resolver: CommonParametersResolver,
    clocks: CadenceClockCache,
    consumer: OutputsConsumer,
}

impl CalPipeline {
    /// Creates a pipeline over `services`.
    pub fn new(services: CalServices, config: CalConfig) -> Self {
        let resolver = CommonParametersResolver::new(services.clone(), config.module.clone());
        let clocks = CadenceClockCache::new(Arc::clone(&services.clocks));
        let consumer = OutputsConsumer::new(services.clone());
        Self {
            services,
            config,
            resolver,
            clocks,
            consumer,
        }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &CalConfig {
        &self.config
    }

    /// Resolves the unit of work and schedules its particles.
    #[instrument(skip(self), fields(module = uow.module, output = uow.output))]
    pub async fn generate_inputs(&mut self, uow: &UnitOfWork) -> CalResult<Schedule> {
        let params = Arc::new(self.resolver.resolve(uow, &mut self.clocks).await?);
        let (index, collateral) = futures::try_join!(
            self.resolver.pixel_index(&params),
            self.resolver.collateral_locations(&params)
        )?;
        Ok(schedule(
            &index,
            collateral,
            self.config.module.max_calibrate_pixels,
            params,
        ))
    }

    /// Executes every particle of `schedule`.
    pub async fn execute(&self, schedule: Schedule) -> CalResult<Vec<WorkParticle>> {
        let mut dispatcher =
            Dispatcher::from_config(&self.config.dispatch, Arc::clone(&self.services.store));
        if self.config.dispatch.persist_inputs {
            dispatcher = dispatcher.persist_inputs_to(self.config.storage.input_dir.clone());
        }
        dispatcher.run(schedule).await
    }

    /// Consolidates the results of one engine run.
    ///
    /// Blob files are read from the configured blob directory.
    pub async fn consume_outputs(
        &mut self,
        results: Vec<EngineResult>,
        variant: EngineVariant,
        mode: ResultMode,
    ) -> CalResult<ConsumeSummary> {
        let blob_dir = self.config.storage.blob_dir.clone();
        self.consume_outputs_in(results, variant, mode, &blob_dir).await
    }

    /// Like [`CalPipeline::consume_outputs`] with an explicit blob directory.
    #[instrument(skip(self, results), fields(results = results.len()))]
    pub async fn consume_outputs_in(
        &mut self,
        results: Vec<EngineResult>,
        variant: EngineVariant,
        mode: ResultMode,
        blob_dir: &Path,
    ) -> CalResult<ConsumeSummary> {
        let skip = match variant {
            EngineVariant::Standard => 0,
            EngineVariant::FullFrame => 1,
        };
        let mut summary = ConsumeSummary::default();

        for result in results.into_iter().skip(skip) {
            if !result.success {
                if mode == ResultMode::SingleArtifact {
                    return Err(CalError::EngineFailure {
                        invocation: result.invocation,
                        message: result.message,
                    });
                }
                error!(
                    invocation = result.invocation,
                    "Engine invocation failed: {}", result.message
                );
                summary.skipped += 1;
                continue;
            }
            let Some(outputs) = result.outputs else {
                warn!(invocation = result.invocation, "Engine returned no outputs");
                summary.skipped += 1;
                continue;
            };
            summary.writes += self.consumer.consolidate(&outputs, blob_dir).await?;
            summary.consolidated += 1;
        }

        info!(
            consolidated = summary.consolidated,
            skipped = summary.skipped,
            "Consumed engine outputs"
        );
        Ok(summary)
    }

    /// Generates inputs, runs `engine` on them and consolidates the results.
    pub async fn run_unit_of_work(
        &mut self,
        uow: &UnitOfWork,
        engine: &dyn CalibrationEngine,
        variant: EngineVariant,
        mode: ResultMode,
    ) -> CalResult<ConsumeSummary> {
        let schedule = self.generate_inputs(uow).await?;
        let mut inputs = Vec::with_capacity(schedule.total_particles);
        for mut particle in self.execute(schedule).await? {
            if let Some(input) = particle.take_input() {
                inputs.push(self.restore(input).await?);
            }
        }
        let results = engine.calibrate(&inputs).await?;
        self.consume_outputs(results, variant, mode).await
    }

    /// Reloads the samples of inputs released after persistence.
    async fn restore(&self, input: CalInputs) -> CalResult<CalInputs> {
        if !input.is_released() {
            return Ok(input);
        }
        let path = self.config.storage.input_dir.join(input.file_name());
        debug!(path = %path.display(), "Reloading persisted inputs");
        CalInputs::read_from(&path).await
    }
}

impl std::fmt::Debug for CalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalPipeline")
            .field("config", &self.config)
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleParameters;
    use crate::consolidate::CalOutputs;
    use crate::model::{CadenceType, CalibratedKind, SeriesId, TargetType};
    use crate::testing::{CatalogFixture, FakeEngine, FakeServices};

    fn uow() -> UnitOfWork {
        UnitOfWork {
            pipeline_task_id: 42,
            cadence_type: CadenceType::Long,
            start_cadence: 100,
            end_cadence: 109,
            module: 2,
            output: 1,
        }
    }

    fn result(invocation: usize, success: bool, fakes: &FakeServices) -> EngineResult {
        let info = fakes.pipeline_info(&uow());
        EngineResult {
            invocation,
            success,
            message: if success { String::new() } else { "engine crashed".into() },
            outputs: Some(CalOutputs::empty(info)),
        }
    }

    #[tokio::test]
    async fn failed_results_are_skipped_in_batch_mode() {
        let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 109));
        let mut pipeline = CalPipeline::new(fakes.services(), CalConfig::default());
        let dir = tempfile::tempdir().unwrap();

        let summary = pipeline
            .consume_outputs_in(
                vec![result(0, true, &fakes), result(1, false, &fakes)],
                EngineVariant::Standard,
                ResultMode::Batch,
                dir.path(),
            )
            .await
            .unwrap();
        assert_eq!(summary.consolidated, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(fakes.processing.records().len(), 1);
    }

    #[tokio::test]
    async fn failed_result_is_fatal_in_single_artifact_mode() {
        let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 109));
        let mut pipeline = CalPipeline::new(fakes.services(), CalConfig::default());
        let dir = tempfile::tempdir().unwrap();

        let err = pipeline
            .consume_outputs_in(
                vec![result(0, false, &fakes)],
                EngineVariant::Standard,
                ResultMode::SingleArtifact,
                dir.path(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CalError::EngineFailure { invocation: 0, .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn persisted_inputs_are_reloaded_for_the_engine() {
        let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 149));
        let unit = UnitOfWork {
            end_cadence: 149,
            ..uow()
        };
        let params = fakes
            .resolver(ModuleParameters::default())
            .resolve(&unit, &mut fakes.clock_cache())
            .await
            .unwrap();
        fakes.seed_collateral(&params, 7);
        fakes.seed_pixels(&params, TargetType::LongCadence, &[(300, 12), (301, 12)], 7);

        let dir = tempfile::tempdir().unwrap();
        let mut config = CalConfig::default();
        config.dispatch.persist_inputs = true;
        config.storage.input_dir = dir.path().join("inputs");
        config.storage.blob_dir = dir.path().join("blobs");

        let engine = FakeEngine::default();
        let mut pipeline = CalPipeline::new(fakes.services(), config);
        let summary = pipeline
            .run_unit_of_work(&unit, &engine, EngineVariant::Standard, ResultMode::SingleArtifact)
            .await
            .unwrap();

        assert_eq!(summary.consolidated, 2);
        assert!(dir.path().join("inputs/cal-inputs-0.json").exists());
        assert!(dir.path().join("inputs/cal-inputs-1.json").exists());
        let calibrated = fakes
            .store
            .get(&SeriesId::calibrated_pixel(
                CalibratedKind::Values,
                TargetType::LongCadence,
                2,
                1,
                301,
                12,
            ))
            .unwrap();
        assert_eq!(calibrated.values.len(), 50);
        assert!(!calibrated.is_fully_gapped());
    }

    #[tokio::test]
    async fn full_frame_variant_drops_warm_up_result() {
        let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 109));
        let mut pipeline = CalPipeline::new(fakes.services(), CalConfig::default());
        let dir = tempfile::tempdir().unwrap();

        let summary = pipeline
            .consume_outputs_in(
                vec![result(0, false, &fakes), result(1, true, &fakes)],
                EngineVariant::FullFrame,
                ResultMode::SingleArtifact,
                dir.path(),
            )
            .await
            .unwrap();
        assert_eq!(summary.consolidated, 1);
        assert_eq!(summary.skipped, 0);
    }
}
