pub mod captcha;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod executor;
pub mod order;
pub mod pacing;
pub mod persist;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod storefront;
pub mod testing;

pub use captcha::{create_resolver, CaptchaResolver, ResolverError};
pub use catalog::{
    CatalogError, JsonOrderCatalog, OrderCatalog, OrderFilter, OrderReportWriter, Transition,
};
pub use clock::{Clock, SystemClock};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use executor::{AdjustmentExecutor, AttemptResult, AttemptStatus};
pub use order::{AdjustmentState, EligibilityVerdict, Order, OrderSnapshot};
pub use pacing::{Pacer, PacingConfig};
pub use persist::PersistenceError;
pub use pipeline::{
    Orchestrator, PipelineConfig, PipelineError, RunLock, RunPhase, RunReport, RunTrigger,
};
pub use scheduler::{RunHistory, RunOutcome, RunPlan, RunRecord, Scheduler, SchedulerConfig};
pub use session::{Credentials, Session, SessionError, SessionManager, SessionStore};
pub use storefront::{Storefront, StorefrontError, WebDriverStorefront};
