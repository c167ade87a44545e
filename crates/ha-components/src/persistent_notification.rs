//! Persistent Notification Component
//!
//! In-memory store for the standing notifications shown in the UI. The
//! configuration pipeline writes its "Invalid config" notice here, updating
//! one notification in place as more components fail.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Domain name for persistent notification services
pub const DOMAIN: &str = "persistent_notification";

/// Something that can persist a user-visible notification
///
/// Implementations keep at most one notification per id: notifying again
/// with the same id replaces the previous message.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str, title: Option<&str>, notification_id: &str);
}

/// A persistent notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    /// Notification message (supports markdown)
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Whether a create call added a new notification or replaced one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Added,
    Updated,
}

/// Persistent Notification Manager
///
/// Thread-safe notification storage using DashMap. Creating an existing id
/// keeps its original creation time and swaps the content.
#[derive(Debug, Default)]
pub struct PersistentNotificationManager {
    notifications: DashMap<String, Notification>,
}

impl PersistentNotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a notification
    pub fn create(
        &self,
        notification_id: &str,
        message: &str,
        title: Option<&str>,
    ) -> (Notification, UpdateType) {
        let mut update_type = UpdateType::Added;
        let entry = self
            .notifications
            .entry(notification_id.to_string())
            .and_modify(|existing| {
                existing.message = message.to_string();
                existing.title = title.map(str::to_string);
                update_type = UpdateType::Updated;
            })
            .or_insert_with(|| Notification {
                notification_id: notification_id.to_string(),
                message: message.to_string(),
                title: title.map(str::to_string),
                created_at: Utc::now(),
            });
        let notification = entry.value().clone();
        drop(entry);

        match update_type {
            UpdateType::Added => info!("Created notification: {}", notification_id),
            UpdateType::Updated => debug!("Updated notification: {}", notification_id),
        }

        (notification, update_type)
    }

    /// Dismiss a notification, returning it if it existed
    pub fn dismiss(&self, notification_id: &str) -> Option<Notification> {
        let removed = self.notifications.remove(notification_id).map(|(_, n)| n);
        if removed.is_some() {
            info!("Dismissed notification: {}", notification_id);
        }
        removed
    }

    pub fn get(&self, notification_id: &str) -> Option<Notification> {
        self.notifications
            .get(notification_id)
            .map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

impl NotificationSink for PersistentNotificationManager {
    fn notify(&self, message: &str, title: Option<&str>, notification_id: &str) {
        self.create(notification_id, message, title);
    }
}

/// Create a shared notification manager
pub fn create_manager() -> Arc<PersistentNotificationManager> {
    Arc::new(PersistentNotificationManager::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_notification() {
        let manager = PersistentNotificationManager::new();

        let (notification, update_type) =
            manager.create("test_id", "Test message", Some("Title"));

        assert_eq!(notification.notification_id, "test_id");
        assert_eq!(notification.message, "Test message");
        assert_eq!(notification.title.as_deref(), Some("Title"));
        assert_eq!(update_type, UpdateType::Added);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_update_keeps_single_notification() {
        let manager = PersistentNotificationManager::new();

        let (first, _) = manager.create("invalid_config", "one", None);
        let (second, update_type) = manager.create("invalid_config", "two", None);

        assert_eq!(update_type, UpdateType::Updated);
        assert_eq!(second.message, "two");
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_sink_notify_creates_or_updates() {
        let manager = create_manager();
        let sink: Arc<dyn NotificationSink> = manager.clone();

        sink.notify("first", Some("Invalid config"), "invalid_config");
        sink.notify("second", Some("Invalid config"), "invalid_config");

        let stored = manager.get("invalid_config").unwrap();
        assert_eq!(stored.message, "second");
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_dismiss() {
        let manager = PersistentNotificationManager::new();
        manager.create("test_id", "Test", None);

        assert!(manager.dismiss("test_id").is_some());
        assert!(manager.dismiss("test_id").is_none());
        assert!(manager.is_empty());
    }
}
