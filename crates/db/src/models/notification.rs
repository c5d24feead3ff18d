use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    entity::{Entity, Filter, SortOrder},
    repository::{RepoResult, Repository},
};

/// Who a notification is addressed to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    Broadcast,
    User { email: String },
}

impl Recipient {
    pub fn user(email: impl Into<String>) -> Self {
        Self::User {
            email: email.into().trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    Commission,
    RankUpgrade,
    Payout,
    MemberStatus,
    PreOrder,
    Compensation,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Notification {
    pub id: Uuid,
    pub recipient: Recipient,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(recipient: Recipient, kind: NotificationKind, title: &str, message: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            recipient,
            kind,
            title: title.to_string(),
            message: message.to_string(),
            is_read: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Notifications addressed to `email` plus broadcasts, newest first
    pub async fn find_for_user(repo: &Repository<Self>, email: &str) -> RepoResult<Vec<Self>> {
        let email = email.trim().to_lowercase();
        let mut notifications = repo
            .filter(
                &Filter::new()
                    .eq("recipient.type", "user")
                    .eq("recipient.email", &email),
                None,
                None,
            )
            .await?;
        notifications.extend(
            repo.filter(&Filter::new().eq("recipient.type", "broadcast"), None, None)
                .await?,
        );
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    pub async fn find_unread_broadcasts(repo: &Repository<Self>) -> RepoResult<Vec<Self>> {
        repo.filter(
            &Filter::new()
                .eq("recipient.type", "broadcast")
                .eq("is_read", false),
            Some(&SortOrder::desc("created_at")),
            None,
        )
        .await
    }
}

impl Entity for Notification {
    const NAME: &'static str = "Notification";

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title is required".to_string());
        }
        if let Recipient::User { email } = &self.recipient {
            if !email.contains('@') {
                return Err(format!("invalid recipient email: {}", email));
            }
        }
        Ok(())
    }
}
