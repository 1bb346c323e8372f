pub mod event;
pub mod settings;
pub mod state;

pub use event::{BookingMatch, CalendarEvent};
pub use settings::{OffsetDirection, Settings, TimeOffset};
pub use state::{
    OperationKind, PendingLockOperation, RetryClassStats, RetryStatistics, ScheduleState,
};
