use async_trait::async_trait;
use interfaces::{BlobStore, ConstantModel, MemoryBlobStore};
use serving_sim::{
    Code, InteractionLog, ItemCode, MetadataStore, ModelRegistry, ModelSnapshot, Outcome,
    PredictionModel, Scheduler, SchedulerPhase, SchedulerSettings, SimulationConfig,
    SimulatorError,
};
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();
    });
}

#[derive(Debug)]
struct BrokenModel {
    panics: bool,
}

#[async_trait]
impl PredictionModel for BrokenModel {
    fn model_name(&self) -> String {
        "broken".to_string()
    }

    fn version(&self) -> Option<u32> {
        None
    }

    async fn predict(&self, _items: &[ItemCode]) -> anyhow::Result<Outcome> {
        if self.panics {
            panic!("model exploded");
        }
        anyhow::bail!("model unavailable")
    }

    fn snapshot(&self) -> Option<ModelSnapshot> {
        None
    }
}

async fn build(
    model: Arc<dyn PredictionModel>,
    settings: SchedulerSettings,
) -> (Scheduler, Arc<InteractionLog>) {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let metadata = Arc::new(MetadataStore::load(store.clone()).await);
    let log = Arc::new(InteractionLog::load(store.clone(), metadata).await);
    let registry = ModelRegistry::load(store, model).await;
    let config = SimulationConfig {
        seed: Some(11),
        ..SimulationConfig::default()
    };
    let scheduler = Scheduler::spawn(&config, registry.holder(), log.clone(), settings).unwrap();
    (scheduler, log)
}

fn accelerated() -> SchedulerSettings {
    SchedulerSettings {
        accelerated_mode: true,
        ..SchedulerSettings::default()
    }
}

/// Let spawned tasks run without letting the paused clock move.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_mode_change_replaces_pending_timer() {
    init_tracing();
    let (scheduler, log) = build(Arc::new(ConstantModel::default()), SchedulerSettings::default()).await;

    scheduler.start().unwrap();
    settle().await;
    let stats = scheduler.stats();
    assert_eq!(stats.timers_armed, 1);
    assert_eq!(stats.pending_timers, 1);
    assert_eq!(scheduler.phase(), SchedulerPhase::Scheduling);

    scheduler.set_accelerated(true).unwrap();
    settle().await;
    let stats = scheduler.stats();
    assert_eq!(stats.timers_cancelled, 1);
    assert_eq!(stats.timers_armed, 2);
    assert_eq!(stats.pending_timers, 1);
    assert_eq!(stats.max_pending_timers, 1);
    assert_eq!(stats.ticks_completed, 0);

    // Re-applying the same mode is not a change.
    scheduler.set_accelerated(true).unwrap();
    settle().await;
    assert_eq!(scheduler.stats().timers_cancelled, 1);

    tokio::time::sleep(Duration::from_millis(15)).await;
    assert_eq!(log.len().await, 1);
    assert_eq!(scheduler.stats().max_pending_timers, 1);

    scheduler.stop().unwrap();
    settle().await;
    let stats = scheduler.stats();
    assert_eq!(stats.timers_cancelled, 2);
    assert_eq!(stats.pending_timers, 0);
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_paced_ticks_follow_target_rate() {
    init_tracing();
    let settings = SchedulerSettings {
        target_rate_per_second: 2.0,
        ..SchedulerSettings::default()
    };
    let (scheduler, log) = build(Arc::new(ConstantModel::default()), settings).await;

    scheduler.start().unwrap();
    // 500 ms wait, then two 100 ms pauses before the append.
    tokio::time::sleep(Duration::from_millis(690)).await;
    assert!(log.is_empty().await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(log.len().await, 1);

    // The in-flight request finishes its last pause, then the worker idles.
    scheduler.stop().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
    let stats = scheduler.stats();
    assert_eq!(stats.ticks_completed, 1);
    assert_eq!(stats.timers_armed, 1);
    assert_eq!(stats.pending_timers, 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(log.len().await, 1);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_prediction_records_fallback() {
    init_tracing();
    for panics in [false, true] {
        let (scheduler, log) = build(Arc::new(BrokenModel { panics }), accelerated()).await;

        let record = scheduler.tick().await.unwrap();
        assert_eq!(record.predicted_outcome, Code::new("A").unwrap());
        assert_eq!(record.satisfied, record.desired_outcome.as_str() == "A");
        assert_eq!(scheduler.stats().prediction_failures, 1);
        assert!(!scheduler.is_processing());

        assert!(scheduler.tick().await.is_some());
        assert_eq!(log.len().await, 2);
        scheduler.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_only_one_request_in_flight() {
    init_tracing();
    let slow = ConstantModel::default().with_think_time(Duration::from_millis(50));
    let (scheduler, log) = build(Arc::new(slow), SchedulerSettings::default()).await;

    let (first, second) = tokio::join!(scheduler.tick(), async {
        tokio::task::yield_now().await;
        assert!(scheduler.is_processing());
        scheduler.tick().await
    });

    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(scheduler.stats().ticks_skipped, 1);
    assert_eq!(log.len().await, 1);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_rates_are_rejected() {
    init_tracing();
    let (scheduler, _log) = build(Arc::new(ConstantModel::default()), SchedulerSettings::default()).await;

    for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(
            scheduler.set_target_rate(rate),
            Err(SimulatorError::InvalidRate { .. })
        ));
    }
    assert_eq!(scheduler.settings().target_rate_per_second, 1.0);

    scheduler.set_target_rate(4.0).unwrap();
    assert_eq!(scheduler.settings().target_rate_per_second, 4.0);
    assert_eq!(
        scheduler.settings().inter_tick_delay(Duration::from_millis(10)),
        Duration::from_millis(250)
    );

    scheduler.shutdown().await;
    assert!(matches!(scheduler.start(), Err(SimulatorError::SchedulerStopped)));
}
