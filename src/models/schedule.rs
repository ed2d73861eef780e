use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Schedule row state machine. The dispatch loop only ever produces
/// QUEUED → SENT; FAILED exists as an initial/manual value and DISABLED is
/// the parking state for users who stopped qualifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleStatus {
    Failed,
    Disabled,
    Queued,
    Sent,
}

impl From<i16> for ScheduleStatus {
    fn from(v: i16) -> Self {
        match v {
            1 => ScheduleStatus::Disabled,
            2 => ScheduleStatus::Queued,
            3 => ScheduleStatus::Sent,
            _ => ScheduleStatus::Failed,
        }
    }
}

impl From<ScheduleStatus> for i16 {
    fn from(v: ScheduleStatus) -> Self {
        match v {
            ScheduleStatus::Failed => 0,
            ScheduleStatus::Disabled => 1,
            ScheduleStatus::Queued => 2,
            ScheduleStatus::Sent => 3,
        }
    }
}

/// One pending or historical notification send for one (instance, user) pair.
/// `status` stored as SMALLINT; convert through [`ScheduleStatus`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Schedule {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub user_id: Uuid,
    /// Interval copied at creation time.
    pub interval_type: String,
    pub status: i16,
    pub schedule_time: DateTime<Utc>,
    pub notified_time: Option<DateTime<Utc>>,
    pub notify_count: i32,
    pub suppress_reached: bool,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn status_kind(&self) -> ScheduleStatus {
        self.status.into()
    }

    /// QUEUED or DISABLED, the at-most-one-per-pair states.
    pub fn is_active(&self) -> bool {
        matches!(
            self.status_kind(),
            ScheduleStatus::Queued | ScheduleStatus::Disabled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            ScheduleStatus::Failed,
            ScheduleStatus::Disabled,
            ScheduleStatus::Queued,
            ScheduleStatus::Sent,
        ] {
            let raw: i16 = status.into();
            assert_eq!(ScheduleStatus::from(raw), status);
        }
    }

    #[test]
    fn unknown_status_maps_to_failed() {
        assert_eq!(ScheduleStatus::from(42), ScheduleStatus::Failed);
    }
}
