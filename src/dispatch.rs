//! Stage-by-stage particle execution.
//!
//! Stages run strictly in order. Inside a stage particles run either one after
//! another or on a bounded pool of tokio tasks; the first failure aborts the
//! remaining tasks and the whole unit of work. The collateral verdict from the
//! first stage is handed to every later stage.

use crate::config::DispatchConfig;
use crate::error::{CalError, CalResult};
use crate::particle::{ParticleContext, WorkParticle};
use crate::ports::TimeSeriesStore;
use crate::schedule::Schedule;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

/// How particles inside one stage are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One particle at a time on the calling task.
    #[default]
    Sequential,
    /// One tokio task per particle, bounded by the worker count.
    Pooled,
}

/// Runs the stages of a [`Schedule`].
#[derive(Clone)]
pub struct Dispatcher {
    mode: DispatchMode,
    workers: usize,
    store: Arc<dyn TimeSeriesStore>,
    input_dir: Option<PathBuf>,
}

impl Dispatcher {
    /// Creates a dispatcher reading from `store`.
    pub fn new(mode: DispatchMode, workers: usize, store: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            mode,
            workers: workers.max(1),
            store,
            input_dir: None,
        }
    }

    /// Creates a dispatcher from configuration.
    pub fn from_config(config: &DispatchConfig, store: Arc<dyn TimeSeriesStore>) -> Self {
        Self::new(config.mode, config.effective_workers(), store)
    }

    /// Persist packaged inputs under `dir` and release their sample data.
    pub fn persist_inputs_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.input_dir = Some(dir.into());
        self
    }

    /// Execution mode.
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Executes every stage, returning the particles by sequence number.
    #[instrument(skip_all, fields(
        mode = ?self.mode,
        particles = schedule.total_particles,
        stages = schedule.stages.len(),
    ))]
    pub async fn run(&self, schedule: Schedule) -> CalResult<Vec<WorkParticle>> {
        let mut ctx = ParticleContext::new(Arc::clone(&schedule.parameters), Arc::clone(&self.store));
        let mut executed = Vec::with_capacity(schedule.total_particles);

        for (i, stage) in schedule.stages.into_iter().enumerate() {
            debug!(stage = i, particles = stage.len(), "Running stage");
            let mut done = match self.mode {
                DispatchMode::Sequential => self.run_sequential(stage.particles, &ctx).await?,
                DispatchMode::Pooled => self.run_pooled(stage.particles, &ctx).await?,
            };

            if let Some(collateral) = done.iter().find(|p| p.is_collateral()) {
                ctx = ctx.with_collateral_presence(collateral.presence());
            }
            for particle in &mut done {
                self.persist(particle).await?;
            }
            executed.extend(done);
        }

        executed.sort_by_key(WorkParticle::sequence_number);
        info!(
            collateral = ?ctx.collateral_presence(),
            "Executed {} work particles",
            executed.len()
        );
        Ok(executed)
    }

    async fn run_sequential(
        &self,
        particles: Vec<WorkParticle>,
        ctx: &ParticleContext,
    ) -> CalResult<Vec<WorkParticle>> {
        let mut done = Vec::with_capacity(particles.len());
        for particle in particles {
            done.push(particle.execute(ctx).await?);
        }
        Ok(done)
    }

    async fn run_pooled(
        &self,
        particles: Vec<WorkParticle>,
        ctx: &ParticleContext,
    ) -> CalResult<Vec<WorkParticle>> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let count = particles.len();

        for particle in particles {
            let semaphore = Arc::clone(&semaphore);
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| CalError::WorkerPool(e.to_string()))?;
                particle.execute(&ctx).await
            });
        }

        let mut done = Vec::with_capacity(count);
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(CalError::from(e)),
            };
            match result {
                Ok(particle) => done.push(particle),
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }
        done.sort_by_key(WorkParticle::sequence_number);
        Ok(done)
    }

    async fn persist(&self, particle: &mut WorkParticle) -> CalResult<()> {
        let Some(dir) = &self.input_dir else {
            return Ok(());
        };
        if let Some(input) = particle.input_mut() {
            let path = input.write_to(dir).await?;
            debug!(path = %path.display(), "Persisted inputs");
            input.release_series();
        }
        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("mode", &self.mode)
            .field("workers", &self.workers)
            .field("input_dir", &self.input_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleParameters;
    use crate::model::{CadenceType, TargetType};
    use crate::particle::DataPresence;
    use crate::resolver::UnitOfWork;
    use crate::schedule::schedule;
    use crate::testing::{CatalogFixture, FakeServices};

    async fn schedule_for(fakes: &FakeServices, max_chunk: usize) -> Schedule {
        let uow = UnitOfWork {
            pipeline_task_id: 42,
            cadence_type: CadenceType::Long,
            start_cadence: 100,
            end_cadence: 109,
            module: 2,
            output: 1,
        };
        let resolver = fakes.resolver(ModuleParameters::default());
        let mut clocks = fakes.clock_cache();
        let params = Arc::new(resolver.resolve(&uow, &mut clocks).await.unwrap());
        let collateral = fakes.seed_collateral(&params, 3);
        fakes.seed_pixels(
            &params,
            TargetType::LongCadence,
            &[(300, 1), (300, 2), (301, 1), (302, 1), (303, 4)],
            5,
        );
        let index = resolver.pixel_index(&params).await.unwrap();
        schedule(&index, collateral, max_chunk, params)
    }

    #[tokio::test]
    async fn pooled_and_sequential_agree() {
        let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 109));

        let sequential = Dispatcher::new(DispatchMode::Sequential, 1, fakes.store.clone())
            .run(schedule_for(&fakes, 1).await)
            .await
            .unwrap();
        let pooled = Dispatcher::new(DispatchMode::Pooled, 3, fakes.store.clone())
            .run(schedule_for(&fakes, 1).await)
            .await
            .unwrap();

        assert_eq!(sequential.len(), 5);
        assert_eq!(pooled.len(), sequential.len());
        for (a, b) in sequential.iter().zip(&pooled) {
            assert_eq!(a.sequence_number(), b.sequence_number());
            assert_eq!(a.presence(), b.presence());
            assert_eq!(a.presence(), DataPresence::Present);
        }
        assert!(pooled.last().unwrap().is_last());
    }

    #[tokio::test]
    async fn store_failure_aborts_pooled_run() {
        let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 109));
        let schedule = schedule_for(&fakes, 1).await;
        fakes.store.fail_reads(true);

        let err = Dispatcher::new(DispatchMode::Pooled, 2, fakes.store.clone())
            .run(schedule)
            .await
            .unwrap_err();
        assert!(matches!(err, CalError::Storage(_)));
    }

    #[tokio::test]
    async fn persisted_inputs_are_released() {
        let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 109));
        let dir = tempfile::tempdir().unwrap();

        let particles = Dispatcher::new(DispatchMode::Sequential, 1, fakes.store.clone())
            .persist_inputs_to(dir.path())
            .run(schedule_for(&fakes, 100).await)
            .await
            .unwrap();

        assert_eq!(particles.len(), 2);
        for particle in &particles {
            let input = particle.input().unwrap();
            assert!(input.is_released());
            assert!(dir.path().join(input.file_name()).exists());
        }
    }
}
