pub mod bar;
pub mod cycle;
pub mod health;
pub mod scheduler;
pub mod symbol;
pub mod sync_state;

pub use bar::{OhlcvBar, Timeframe};
pub use cycle::{CycleHistory, CycleResult, CycleStatus, PipelineCounters};
pub use health::{
    Alert, AlertCode, AlertSeverity, ComponentScore, HealthComponents, HealthScore, ScorePoint,
};
pub use scheduler::{SchedulerState, SchedulerStatus, TransitionReason, TransitionRecord};
pub use symbol::{PriorityTier, Symbol, SymbolCatalog};
pub use sync_state::{SymbolSyncState, SyncStateTable};
