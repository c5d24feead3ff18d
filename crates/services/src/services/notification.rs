//! Notification records plus hand-off to an external delivery channel.

use std::sync::Arc;

use async_trait::async_trait;
use db::{
    EntityStore, RepoResult, Repository, RepositoryError,
    models::notification::{Notification, NotificationKind, Recipient},
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Email/push delivery, owned by an external service
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Sender that only records deliveries in the log
pub struct TracingSender;

#[async_trait]
impl NotificationSender for TracingSender {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        match &notification.recipient {
            Recipient::Broadcast => info!(
                kind = %notification.kind,
                title = %notification.title,
                "Broadcast notification"
            ),
            Recipient::User { email } => info!(
                kind = %notification.kind,
                recipient = %email,
                title = %notification.title,
                "User notification"
            ),
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationService {
    repo: Repository<Notification>,
    sender: Arc<dyn NotificationSender>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn EntityStore>, sender: Arc<dyn NotificationSender>) -> Self {
        Self {
            repo: Repository::new(store),
            sender,
        }
    }

    /// Persist and deliver a notification. Delivery failures are logged, the
    /// stored record stays so the in-app inbox still shows it.
    pub async fn send(
        &self,
        recipient: Recipient,
        kind: NotificationKind,
        title: &str,
        message: &str,
    ) -> RepoResult<Notification> {
        let notification = self
            .repo
            .create(Notification::new(recipient, kind, title, message))
            .await?;

        if let Err(e) = self.sender.deliver(&notification).await {
            warn!(
                notification_id = %notification.id,
                error = %e,
                "Notification stored but not delivered"
            );
        }
        Ok(notification)
    }

    /// Fire-and-forget variant of [`Self::send`] for side notifications
    pub async fn notify(
        &self,
        recipient: Recipient,
        kind: NotificationKind,
        title: &str,
        message: &str,
    ) {
        if let Err(e) = self.send(recipient, kind, title, message).await {
            warn!(error = %e, title, "Failed to record notification");
        }
    }

    pub async fn list_for(&self, email: &str) -> RepoResult<Vec<Notification>> {
        Notification::find_for_user(&self.repo, email).await
    }

    /// Only personal notifications carry read state; a broadcast record is shared
    pub async fn mark_read(&self, id: Uuid) -> RepoResult<Notification> {
        let mut notification = self.repo.get_by_id(id).await?;
        if notification.recipient == Recipient::Broadcast {
            return Err(RepositoryError::Validation(
                "broadcast notifications cannot be marked as read".to_string(),
            ));
        }
        notification.is_read = true;
        self.repo.save(&notification).await
    }
}
