pub mod conditions;
pub mod content;
pub mod dispatch;
pub mod dispatch_scheduler;
pub mod email;
pub mod enrollment;
pub mod events;
pub mod instances;
pub mod metrics;
pub mod overrides;
pub mod recurrence;
pub mod schedule_store;
pub mod templates;
