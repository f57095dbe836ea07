pub mod notifier;
pub mod postgres;

pub use notifier::{MasterOnlySink, NotificationSink, NullSink, WebhookNotifier};
pub use postgres::PostgresStore;
