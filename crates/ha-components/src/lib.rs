//! Home Assistant built-in components used by the configuration pipeline

pub mod persistent_notification;

pub use persistent_notification::{
    create_manager, Notification, NotificationSink, PersistentNotificationManager, UpdateType,
};
