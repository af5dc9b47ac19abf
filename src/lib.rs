// Library interface for RecoveryRS modules
// This allows integration tests and benches to access the core functionality

pub mod config;
pub mod cooldown;
pub mod database;
pub mod engine;
pub mod error;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod providers;
pub mod recovery;
pub mod training_load;

// Re-export commonly used types for convenience
pub use models::*;
pub use config::AppConfig;
pub use cooldown::{
    CooldownConfig, CooldownHandle, CooldownState, CooldownStateMachine, ProcessedActivity,
    RecoveryPhase,
};
pub use database::{CooldownStore, MemoryCooldownStore, SqliteCooldownStore};
pub use engine::{run_refresh_loop, CooldownSummary, RecoveryEngine};
pub use error::{RecoveryRsError, Result};
pub use history::{HistoricalRecoveryLearner, RecoveryTimeTable};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use metrics::MetricDeltaAnalyzer;
pub use providers::{ActivityProvider, BiometricProvider, StaticProvider};
pub use recovery::{RecoveryAggregator, RecoveryStatus};
pub use training_load::TrainingLoadCalculator;
