use uuid::Uuid;

/// Non-retryable configuration errors. Anything else (database, SMTP) flows
/// through `anyhow` and is retried or surfaced by the caller.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("notification instance {0} not found")]
    InstanceNotFound(Uuid),
    #[error("notification template {0} not found")]
    TemplateNotFound(Uuid),
    #[error("instance {0} has no template attached")]
    TemplateDetached(Uuid),
    #[error("course {0} not found")]
    CourseNotFound(Uuid),
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    #[error("unknown override field: {0}")]
    UnknownField(String),
}
