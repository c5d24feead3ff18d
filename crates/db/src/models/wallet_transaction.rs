use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    entity::{Entity, Filter, SortOrder},
    repository::{RepoResult, Repository},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Release,
    Refund,
    Compensation,
    /// Cancels an earlier entry whose surrounding operation was rolled back
    Reversal,
}

/// Append-only wallet ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: TransactionKind,
    pub amount: i64,
    pub note: Option<String>,
    pub reverses: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletTransaction {
    pub fn new(wallet_id: Uuid, kind: TransactionKind, amount: i64, note: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            kind,
            amount,
            note,
            reverses: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Entry cancelling `self`
    pub fn reversal(&self) -> Self {
        Self {
            reverses: Some(self.id),
            ..Self::new(
                self.wallet_id,
                TransactionKind::Reversal,
                -self.amount,
                Some(format!("reversal of {} entry", self.kind)),
            )
        }
    }

    pub async fn find_by_wallet(repo: &Repository<Self>, wallet_id: Uuid) -> RepoResult<Vec<Self>> {
        repo.filter(
            &Filter::new().eq("wallet_id", wallet_id),
            Some(&SortOrder::asc("created_at")),
            None,
        )
        .await
    }
}

impl Entity for WalletTransaction {
    const NAME: &'static str = "WalletTransaction";
    const APPEND_ONLY: bool = true;

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        match self.kind {
            TransactionKind::Reversal if self.reverses.is_none() => {
                Err("reversal entries must reference the reversed entry".to_string())
            }
            TransactionKind::Reversal => Ok(()),
            _ if self.amount < 0 => Err(format!("{} amount cannot be negative", self.kind)),
            _ => Ok(()),
        }
    }
}
