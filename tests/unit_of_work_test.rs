//! A unit of work from resolution through consolidation.

use rust_cal::config::{CalConfig, ModuleParameters};
use rust_cal::error::CalError;
use rust_cal::model::{CadenceInterval, CadenceType, CalibratedKind, MetricKind, SeriesId, TargetType};
use rust_cal::pipeline::{CalPipeline, EngineVariant, ResultMode};
use rust_cal::resolver::UnitOfWork;
use rust_cal::testing::{cadence_start_mjd, CatalogFixture, FakeEngine, FakeServices};

fn uow(start: i32, end: i32) -> UnitOfWork {
    UnitOfWork {
        pipeline_task_id: 42,
        cadence_type: CadenceType::Long,
        start_cadence: start,
        end_cadence: end,
        module: 2,
        output: 1,
    }
}

#[tokio::test]
async fn interval_inside_one_quarter_resolves_to_it() {
    let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 199));
    fakes
        .calendar
        .set_boundary(cadence_start_mjd(CadenceType::Long, 100));

    let params = fakes
        .resolver(ModuleParameters::default())
        .resolve(&uow(120, 150), &mut fakes.clock_cache())
        .await
        .unwrap();
    assert_eq!(params.quarter, 2);
    assert_eq!(params.interval(), CadenceInterval::new(120, 150));
    assert!(!params.is_data_absent());
}

#[tokio::test]
async fn quarter_straddle_is_fatal() {
    let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 199));
    fakes
        .calendar
        .set_boundary(cadence_start_mjd(CadenceType::Long, 150));

    let err = fakes
        .resolver(ModuleParameters::default())
        .resolve(&uow(120, 180), &mut fakes.clock_cache())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CalError::QuarterStraddle {
            start_quarter: 1,
            end_quarter: 2,
            ..
        }
    ));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn unit_of_work_round_trips_through_the_engine() {
    let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 149));
    let params = fakes
        .resolver(ModuleParameters::default())
        .resolve(&uow(100, 149), &mut fakes.clock_cache())
        .await
        .unwrap();
    fakes.seed_collateral(&params, 7);
    fakes.seed_pixels(&params, TargetType::LongCadence, &[(300, 12), (300, 13), (301, 12)], 7);
    fakes.seed_pixels(&params, TargetType::Background, &[(400, 40)], 7);

    let config = CalConfig {
        module: ModuleParameters {
            max_calibrate_pixels: 2,
            ..ModuleParameters::default()
        },
        ..CalConfig::default()
    };
    let engine = FakeEngine::default();
    let mut pipeline = CalPipeline::new(fakes.services(), config);
    let summary = pipeline
        .run_unit_of_work(&uow(100, 149), &engine, EngineVariant::Standard, ResultMode::Batch)
        .await
        .unwrap();

    assert_eq!(engine.calls(), 1);
    assert_eq!(summary.consolidated, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(fakes.processing.records().len(), 3);

    let calibrated = fakes
        .store
        .get(&SeriesId::calibrated_pixel(
            CalibratedKind::Values,
            TargetType::LongCadence,
            2,
            1,
            300,
            13,
        ))
        .unwrap();
    assert_eq!(calibrated.interval(), CadenceInterval::new(100, 149));
    assert!(calibrated.originators.contains(&42));

    assert!(fakes
        .store
        .get(&SeriesId::calibrated_pixel(
            CalibratedKind::Uncertainties,
            TargetType::Background,
            2,
            1,
            400,
            40,
        ))
        .is_some());
    assert!(fakes
        .store
        .get(&SeriesId::metric(CadenceType::Long, MetricKind::BlackLevel, 2, 1))
        .is_some());
    assert_eq!(fakes.store.event_windows().len(), 1);
}

#[tokio::test]
async fn failed_invocation_is_skipped_in_batch_mode() {
    let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 149));
    let params = fakes
        .resolver(ModuleParameters::default())
        .resolve(&uow(100, 149), &mut fakes.clock_cache())
        .await
        .unwrap();
    fakes.seed_collateral(&params, 7);
    fakes.seed_pixels(&params, TargetType::LongCadence, &[(300, 12)], 7);

    let engine = FakeEngine::default();
    engine.fail_invocation(1);
    let mut pipeline = CalPipeline::new(fakes.services(), CalConfig::default());
    let summary = pipeline
        .run_unit_of_work(&uow(100, 149), &engine, EngineVariant::Standard, ResultMode::Batch)
        .await
        .unwrap();
    assert_eq!(summary.consolidated, 1);
    assert_eq!(summary.skipped, 1);

    let err = pipeline
        .run_unit_of_work(
            &uow(100, 149),
            &engine,
            EngineVariant::Standard,
            ResultMode::SingleArtifact,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CalError::EngineFailure { invocation: 1, .. }));
}

#[tokio::test]
async fn uncovered_interval_runs_with_empty_inputs() {
    let fakes = FakeServices::new(CatalogFixture::long_cadence(100, 149).with_closest(100, 149));
    let engine = FakeEngine::default();
    let mut pipeline = CalPipeline::new(fakes.services(), CalConfig::default());

    let schedule = pipeline.generate_inputs(&uow(300, 320)).await.unwrap();
    assert!(schedule.parameters.is_data_absent());
    assert_eq!(schedule.total_particles, 1);

    let summary = pipeline
        .run_unit_of_work(&uow(300, 320), &engine, EngineVariant::Standard, ResultMode::Batch)
        .await
        .unwrap();
    assert_eq!(summary.consolidated, 1);
    assert_eq!(summary.writes.series_written, 0);
    assert!(fakes.store.read_batch_sizes().is_empty());
}
