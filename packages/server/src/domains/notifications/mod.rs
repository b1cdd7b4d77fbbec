mod notification;
mod protocol;

pub use notification::{NewNotification, Notification, NotificationLedger, PgNotificationLedger};
pub use protocol::{run_mailbox_fetch, FetchReport, ProtocolError, ProtocolOptions};
