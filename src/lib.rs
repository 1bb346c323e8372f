//! Staylock: booking-lifecycle orchestration for a short-term rental
//! property.
//!
//! The crate ingests a hosted calendar feed (Airbnb or OwnerRez ICS),
//! matches today's check-ins and check-outs, and drives wireless door locks
//! through a verifying retry engine: guest door codes are programmed before
//! arrival and removed after departure, with a delayed safety cleanup as the
//! backstop. Scheduling runs either at fixed daily times or at the booking's
//! own timestamps when the feed carries them.
//!
//! Host integration happens through capability traits: [`FeedSource`] for
//! feed retrieval, [`DeviceLock`] for lock hardware, [`ModeActivator`] for
//! property modes, [`NotificationSink`] / [`AnalyticsSink`] for outbound
//! reporting, and [`SnapshotStore`] / [`FlagStore`] for persistence. Wire
//! real implementations into a [`Services`] bundle and hand it to a
//! [`Scheduler`].

pub mod analytics;
pub mod calendar;
pub mod error;
pub mod locks;
pub mod models;
pub mod notify;
pub mod procedures;
pub mod scheduler;
pub mod store;
pub mod utils;

use std::sync::Arc;

pub use analytics::{AnalyticsEvent, AnalyticsSink, LogAnalytics};
pub use calendar::fetch::{FeedSource, HttpFeedSource};
pub use calendar::CalendarFormat;
pub use error::{AppError, AppResult};
pub use locks::device::DeviceLock;
pub use locks::LockEngine;
pub use models::Settings;
pub use notify::{NotificationSink, Notifier};
pub use procedures::{CheckinPhase, ModeActivator, NullModeActivator};
pub use scheduler::Scheduler;
pub use store::{FlagStore, JsonFileStore, MemoryStore, SnapshotStore};

/// Everything the procedures and scheduler need, bundled once at startup.
pub struct Services {
    pub settings: Settings,
    pub feed: Arc<dyn FeedSource>,
    pub locks: Vec<Arc<dyn DeviceLock>>,
    pub modes: Arc<dyn ModeActivator>,
    pub notifier: Notifier,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub engine: LockEngine,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub flags: Arc<dyn FlagStore>,
}
