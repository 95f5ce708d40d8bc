use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Account credentials are present
/// - Retry limits are consistent
/// - Delay ranges are ordered
/// - Scheduler horizon, active hours and jitter are in range
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let fail = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.account.email.trim().is_empty() {
        return fail("account.email cannot be empty");
    }
    if config.account.password.is_empty() {
        return fail("account.password cannot be empty");
    }

    let pipeline = &config.pipeline;
    if pipeline.max_attempts == 0 {
        return fail("pipeline.max_attempts must be at least 1");
    }
    if pipeline.max_attempts_per_run == 0 || pipeline.max_attempts_per_run > pipeline.max_attempts
    {
        return fail("pipeline.max_attempts_per_run must be between 1 and pipeline.max_attempts");
    }
    if pipeline.login_attempts == 0 {
        return fail("pipeline.login_attempts must be at least 1");
    }
    if pipeline.eligibility_window_days == 0 {
        return fail("pipeline.eligibility_window_days must be at least 1");
    }

    let pacing = &config.pacing;
    if pacing.short_delay_ms[0] > pacing.short_delay_ms[1] {
        return fail("pacing.short_delay_ms must be [min, max] with min <= max");
    }
    if pacing.long_delay_ms[0] > pacing.long_delay_ms[1] {
        return fail("pacing.long_delay_ms must be [min, max] with min <= max");
    }

    let scheduler = &config.scheduler;
    if scheduler.horizon_hours == 0 {
        return fail("scheduler.horizon_hours must be at least 1");
    }
    if scheduler.default_interval_hours == 0 {
        return fail("scheduler.default_interval_hours must be at least 1");
    }
    let [start, end] = scheduler.active_hours;
    if start > 23 || end > 23 || start > end {
        return fail("scheduler.active_hours must be [start, end] within 0..=23 with start <= end");
    }
    if scheduler.slot_jitter_minutes >= 60 {
        return fail("scheduler.slot_jitter_minutes must be below 60");
    }
    if scheduler.min_spacing_hours >= scheduler.horizon_hours {
        return fail("scheduler.min_spacing_hours must be below scheduler.horizon_hours");
    }

    if config.storefront.page_timeout_secs == 0 {
        return fail("storefront.page_timeout_secs cannot be 0");
    }

    Ok(())
}
