use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    entity::{Entity, Filter},
    repository::{RepoResult, Repository},
};

/// Gamified ladder unlocking bonus commission, lowest first
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    TS,
    EnumString,
    Display,
    Default,
)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SeederRank {
    #[default]
    NguoiGieoHat,
    HatGiongKhoe,
    MamXanh,
    CayTruongThanh,
    DanhHieu,
}

impl SeederRank {
    pub const LADDER: [SeederRank; 5] = [
        SeederRank::NguoiGieoHat,
        SeederRank::HatGiongKhoe,
        SeederRank::MamXanh,
        SeederRank::CayTruongThanh,
        SeederRank::DanhHieu,
    ];

    pub fn next(self) -> Option<Self> {
        let position = Self::LADDER.iter().position(|r| *r == self)?;
        Self::LADDER.get(position + 1).copied()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Pending,
    Active,
    Suspended,
}

/// A person enrolled in the referral program
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReferralMember {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub referral_code: String,
    pub referred_by: Option<Uuid>, // Member whose code was used at registration
    pub status: MemberStatus,
    pub seeder_rank: SeederRank,
    pub seeder_rank_bonus: f64, // percent added on top of the tier rate
    pub has_certificate: bool,
    pub is_region_representative: bool,
    pub unpaid_commission: i64,
    pub total_paid_commission: i64,
    pub current_month_revenue: i64,
    pub revenue_period: String, // YYYY-MM that current_month_revenue belongs to
    pub total_referred_customers: u32,
    pub custom_rate_enabled: bool,
    pub custom_commission_rate: Option<f64>,
    pub suspended_reason: Option<String>,
    pub rank_upgraded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for registering a member
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreateReferralMember {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub referrer_code: Option<String>,
}

impl ReferralMember {
    pub fn new(
        data: &CreateReferralMember,
        referral_code: String,
        referred_by: Option<Uuid>,
        status: MemberStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            full_name: data.full_name.trim().to_string(),
            email: data.email.trim().to_lowercase(),
            phone: data.phone.clone(),
            referral_code,
            referred_by,
            status,
            seeder_rank: SeederRank::default(),
            seeder_rank_bonus: 0.0,
            has_certificate: false,
            is_region_representative: false,
            unpaid_commission: 0,
            total_paid_commission: 0,
            current_month_revenue: 0,
            revenue_period: period_month(now),
            total_referred_customers: 0,
            custom_rate_enabled: false,
            custom_commission_rate: None,
            suspended_reason: None,
            rank_upgraded_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    /// Revenue attributed to the period of `now`; stale periods count as zero
    pub fn revenue_in_period(&self, now: DateTime<Utc>) -> i64 {
        if self.revenue_period == period_month(now) {
            self.current_month_revenue
        } else {
            0
        }
    }

    pub async fn find_by_code(
        repo: &Repository<Self>,
        referral_code: &str,
    ) -> RepoResult<Option<Self>> {
        repo.find_one(&Filter::new().eq("referral_code", referral_code.trim().to_uppercase()))
            .await
    }

    pub async fn find_by_email(repo: &Repository<Self>, email: &str) -> RepoResult<Option<Self>> {
        repo.find_one(&Filter::new().eq("email", email.trim().to_lowercase()))
            .await
    }

    /// Members who registered with this member's code
    pub async fn find_f1_members(repo: &Repository<Self>, member_id: Uuid) -> RepoResult<Vec<Self>> {
        repo.filter(&Filter::new().eq("referred_by", member_id), None, None)
            .await
    }

    pub async fn find_by_status(
        repo: &Repository<Self>,
        status: MemberStatus,
    ) -> RepoResult<Vec<Self>> {
        repo.filter(&Filter::new().eq("status", status), None, None)
            .await
    }
}

/// Accounting period key, e.g. `2025-03`
pub fn period_month(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

impl Entity for ReferralMember {
    const NAME: &'static str = "ReferralMember";

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self.full_name.trim().is_empty() {
            return Err("full_name is required".to_string());
        }
        if !self.email.contains('@') {
            return Err(format!("invalid email: {}", self.email));
        }
        if self.referral_code.trim().is_empty() {
            return Err("referral_code is required".to_string());
        }
        if self.unpaid_commission < 0 || self.total_paid_commission < 0 {
            return Err("commission balances cannot be negative".to_string());
        }
        if let Some(rate) = self.custom_commission_rate {
            if !(0.0..=100.0).contains(&rate) {
                return Err(format!("custom_commission_rate {} outside 0-100", rate));
            }
        }
        Ok(())
    }

    fn unique_keys(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("referral_code", Value::String(self.referral_code.clone())),
            ("email", Value::String(self.email.clone())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_ladder_order_and_next() {
        assert!(SeederRank::NguoiGieoHat < SeederRank::HatGiongKhoe);
        assert!(SeederRank::CayTruongThanh < SeederRank::DanhHieu);
        assert_eq!(SeederRank::MamXanh.next(), Some(SeederRank::CayTruongThanh));
        assert_eq!(SeederRank::DanhHieu.next(), None);
        assert_eq!(SeederRank::HatGiongKhoe.to_string(), "hat_giong_khoe");
    }

    #[test]
    fn test_revenue_resets_outside_period() {
        let march = Utc.with_ymd_and_hms(2025, 3, 15, 8, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        let data = CreateReferralMember {
            full_name: "Lan".to_string(),
            email: "Lan@Example.vn".to_string(),
            phone: None,
            referrer_code: None,
        };
        let mut member =
            ReferralMember::new(&data, "LAN12345".to_string(), None, MemberStatus::Active, march);
        member.current_month_revenue = 500_000;

        assert_eq!(member.email, "lan@example.vn");
        assert_eq!(member.revenue_in_period(march), 500_000);
        assert_eq!(member.revenue_in_period(april), 0);
    }
}
