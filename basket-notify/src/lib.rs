pub mod poller;
pub mod schedule;
pub mod sender;
pub mod service;
pub mod store;

pub use poller::{run_dispatch, run_sweep};
pub use schedule::{next_scheduled_at, NotificationSettings, NotificationState};
pub use sender::{LogSender, Reminder, ReminderSender};
pub use service::{DispatchReport, NotificationScheduler, SweepReport};
pub use store::{NotificationStore, PgNotificationStore, ScheduleBasis, UserSchedule};
