//! Administrative actions on referral members, events and settings.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::{
    Entity, EntityStore, Repository, SortOrder,
    models::{
        audit_log::AuditLog,
        notification::{NotificationKind, Recipient},
        referral_event::{ReferralEvent, ReferralEventStatus},
        referral_member::{CreateReferralMember, MemberStatus, ReferralMember, SeederRank},
        referral_setting::{RankRequirement, ReferralSetting},
    },
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use ts_rs::TS;
use uuid::Uuid;

use super::{
    cache::{CacheInvalidator, keys},
    codes,
    commission,
    notification::NotificationService,
    referral_commission::{ReferralError, SYSTEM_ACTOR},
    saga::Saga,
};

const CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PayoutReceipt {
    pub member_id: Uuid,
    pub amount: i64,
    pub events_paid: usize,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReferralDashboard {
    pub pending_members: usize,
    pub active_members: usize,
    pub suspended_members: usize,
    pub total_unpaid_commission: i64,
    pub total_paid_commission: i64,
    pub flagged_events: usize,
}

pub struct ReferralAdminService {
    members: Repository<ReferralMember>,
    events: Repository<ReferralEvent>,
    settings: Repository<ReferralSetting>,
    audit: Repository<AuditLog>,
    notifications: NotificationService,
    cache: Arc<dyn CacheInvalidator>,
}

impl ReferralAdminService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        notifications: NotificationService,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            members: Repository::new(store.clone()),
            events: Repository::new(store.clone()),
            settings: Repository::new(store.clone()),
            audit: Repository::new(store),
            notifications,
            cache,
        }
    }

    /// Enrol a new member, pending or active depending on settings
    pub async fn register_member(
        &self,
        data: CreateReferralMember,
        now: DateTime<Utc>,
    ) -> Result<ReferralMember, ReferralError> {
        let settings = ReferralSetting::load(&self.settings).await?;

        let referrer = match data
            .referrer_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            Some(code) => {
                let referrer = ReferralMember::find_by_code(&self.members, code)
                    .await?
                    .ok_or_else(|| ReferralError::UnknownCode(code.to_string()))?;
                if !referrer.is_active() {
                    return Err(ReferralError::MemberNotActive(referrer.id));
                }
                Some(referrer)
            }
            None => None,
        };

        let referral_code = self.allocate_code(&data.full_name).await?;
        let status = if settings.auto_approve_members {
            MemberStatus::Active
        } else {
            MemberStatus::Pending
        };
        let member = ReferralMember::new(
            &data,
            referral_code,
            referrer.as_ref().map(|r| r.id),
            status,
            now,
        );

        let mut saga = Saga::new("register_member");
        let members = self.members.clone();
        let member_id = member.id;
        let member = saga
            .step("create_member", self.members.create(member), move || async move {
                members.delete(member_id).await
            })
            .await?;
        if let Some(referrer) = referrer {
            let previous = referrer.clone();
            let mut updated = referrer;
            updated.total_referred_customers += 1;
            let members = self.members.clone();
            saga.step("count_f1", self.members.save(&updated), move || async move {
                members.save(&previous).await.map(|_| ())
            })
            .await?;
            self.cache.invalidate_prefix(&keys::member(updated.id)).await;
        }
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                SYSTEM_ACTOR,
                "member_registered",
                ReferralMember::NAME,
                member.id,
                json!({ "status": member.status, "referred_by": member.referred_by }),
            )),
        )
        .await?;
        saga.commit();

        info!(member_id = %member.id, status = %member.status, "Referral member registered");

        self.cache.invalidate(keys::DASHBOARD).await;
        self.cache.invalidate(&keys::referral_code(&member.referral_code)).await;
        let message = match member.status {
            MemberStatus::Active => format!("Welcome! Your referral code is {}", member.referral_code),
            _ => "Your registration is awaiting approval".to_string(),
        };
        self.notifications
            .notify(
                Recipient::user(&member.email),
                NotificationKind::MemberStatus,
                "Referral registration",
                &message,
            )
            .await;

        Ok(member)
    }

    pub async fn approve(&self, member_id: Uuid, actor: &str) -> Result<ReferralMember, ReferralError> {
        self.transition(member_id, &[MemberStatus::Pending], MemberStatus::Active, None, actor)
            .await
    }

    pub async fn suspend(
        &self,
        member_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<ReferralMember, ReferralError> {
        self.transition(
            member_id,
            &[MemberStatus::Pending, MemberStatus::Active],
            MemberStatus::Suspended,
            Some(reason),
            actor,
        )
        .await
    }

    pub async fn reactivate(&self, member_id: Uuid, actor: &str) -> Result<ReferralMember, ReferralError> {
        self.transition(member_id, &[MemberStatus::Suspended], MemberStatus::Active, None, actor)
            .await
    }

    /// Enable (`Some`) or disable (`None`) a member-specific commission rate
    pub async fn set_custom_rate(
        &self,
        member_id: Uuid,
        rate: Option<f64>,
        actor: &str,
    ) -> Result<ReferralMember, ReferralError> {
        let member = self.members.get_by_id(member_id).await?;
        let previous_rate = member.custom_commission_rate;

        let previous = member.clone();
        let mut updated = member;
        updated.custom_rate_enabled = rate.is_some();
        updated.custom_commission_rate = rate;

        let mut saga = Saga::new("set_custom_rate");
        let members = self.members.clone();
        let updated = saga
            .step("update_member", self.members.save(&updated), move || async move {
                members.save(&previous).await.map(|_| ())
            })
            .await?;
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                actor,
                "custom_rate_changed",
                ReferralMember::NAME,
                member_id,
                json!({ "from": previous_rate, "to": rate }),
            )),
        )
        .await?;
        saga.commit();

        self.cache.invalidate_prefix(&keys::member(member_id)).await;
        Ok(updated)
    }

    /// Pay out the member's whole unpaid balance
    pub async fn payout(
        &self,
        member_id: Uuid,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<PayoutReceipt, ReferralError> {
        let member = self.members.get_by_id(member_id).await?;
        let settings = ReferralSetting::load(&self.settings).await?;
        let amount = member.unpaid_commission;
        if amount <= 0 || amount < settings.min_payout_amount {
            return Err(ReferralError::BelowMinimumPayout {
                unpaid: amount,
                minimum: settings.min_payout_amount,
            });
        }

        let calculated = ReferralEvent::find_by_referrer(
            &self.events,
            member_id,
            Some(ReferralEventStatus::Calculated),
        )
        .await?;

        let mut saga = Saga::new("payout");
        for event in &calculated {
            let previous = event.clone();
            let mut paid = event.clone();
            paid.status = ReferralEventStatus::Paid;
            paid.paid_at = Some(now);
            let events = self.events.clone();
            saga.step("mark_event_paid", self.events.save(&paid), move || async move {
                events.save(&previous).await.map(|_| ())
            })
            .await?;
        }

        let previous = member.clone();
        let mut updated = member;
        updated.unpaid_commission = 0;
        updated.total_paid_commission += amount;
        let members = self.members.clone();
        let updated = saga
            .step("settle_member", self.members.save(&updated), move || async move {
                members.save(&previous).await.map(|_| ())
            })
            .await?;
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                actor,
                "commission_paid",
                ReferralMember::NAME,
                member_id,
                json!({ "amount": amount, "events": calculated.len() }),
            )),
        )
        .await?;
        saga.commit();

        info!(member_id = %member_id, amount, events = calculated.len(), "Commission paid out");

        self.cache.invalidate_prefix(&keys::member(member_id)).await;
        self.cache.invalidate(keys::DASHBOARD).await;
        self.notifications
            .notify(
                Recipient::user(&updated.email),
                NotificationKind::Payout,
                "Commission paid",
                &format!("{} has been paid to you", amount),
            )
            .await;

        Ok(PayoutReceipt {
            member_id,
            amount,
            events_paid: calculated.len(),
            paid_at: now,
        })
    }

    /// Reverse an unpaid commission judged fraudulent
    pub async fn mark_event_fraudulent(
        &self,
        event_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<ReferralEvent, ReferralError> {
        let event = self.events.get_by_id(event_id).await?;
        if event.status != ReferralEventStatus::Calculated {
            return Err(ReferralError::InvalidTransition(format!(
                "event {} is {}, only calculated events can be reversed",
                event_id, event.status
            )));
        }
        let member = self.members.get_by_id(event.referrer_id).await?;
        let reversed_amount = event.commission_amount;

        let previous_event = event.clone();
        let mut flagged = event;
        flagged.status = ReferralEventStatus::Fraudulent;
        flagged.commission_amount = 0;
        flagged.fraud_reasons.push(reason.to_string());

        let previous_member = member.clone();
        let mut updated = member;
        updated.unpaid_commission = (updated.unpaid_commission - reversed_amount).max(0);
        if updated.revenue_period == flagged.period_month {
            updated.current_month_revenue =
                (updated.current_month_revenue - flagged.order_amount).max(0);
        }

        let mut saga = Saga::new("reverse_commission");
        let events = self.events.clone();
        let flagged = saga
            .step("flag_event", self.events.save(&flagged), move || async move {
                events.save(&previous_event).await.map(|_| ())
            })
            .await?;
        let members = self.members.clone();
        saga.step("debit_member", self.members.save(&updated), move || async move {
            members.save(&previous_member).await.map(|_| ())
        })
        .await?;
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                actor,
                "commission_reversed",
                ReferralEvent::NAME,
                event_id,
                json!({ "reason": reason, "amount": reversed_amount, "referrer_id": updated.id }),
            )),
        )
        .await?;
        saga.commit();

        info!(event_id = %event_id, amount = reversed_amount, "Commission reversed as fraudulent");

        self.cache.invalidate_prefix(&keys::member(updated.id)).await;
        self.cache.invalidate(keys::DASHBOARD).await;
        Ok(flagged)
    }

    pub async fn get_settings(&self) -> Result<ReferralSetting, ReferralError> {
        Ok(ReferralSetting::load(&self.settings).await?)
    }

    pub async fn update_settings(
        &self,
        setting: ReferralSetting,
        actor: &str,
    ) -> Result<ReferralSetting, ReferralError> {
        commission::validate_tiers(&setting.commission_tiers).map_err(ReferralError::InvalidSettings)?;
        validate_ladder(&setting.seeder_rank_config).map_err(ReferralError::InvalidSettings)?;

        let saved = ReferralSetting::store(&self.settings, setting).await?;
        self.audit
            .create(AuditLog::new(
                actor,
                "settings_updated",
                ReferralSetting::NAME,
                saved.id,
                json!({
                    "tiers": saved.commission_tiers.len(),
                    "auto_approve_members": saved.auto_approve_members,
                }),
            ))
            .await?;

        // Rates feed every cached summary
        self.cache.invalidate_prefix("member:").await;
        Ok(saved)
    }

    pub async fn list_members(
        &self,
        status: Option<MemberStatus>,
    ) -> Result<Vec<ReferralMember>, ReferralError> {
        let sort = SortOrder::desc("created_at");
        let members = match status {
            Some(status) => {
                let mut members = ReferralMember::find_by_status(&self.members, status).await?;
                members.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                members
            }
            None => self.members.list(Some(&sort), None).await?,
        };
        Ok(members)
    }

    pub async fn dashboard(&self) -> Result<ReferralDashboard, ReferralError> {
        let members = self.members.list(None, None).await?;
        let events = self.events.list(None, None).await?;

        let count = |status: MemberStatus| members.iter().filter(|m| m.status == status).count();
        Ok(ReferralDashboard {
            pending_members: count(MemberStatus::Pending),
            active_members: count(MemberStatus::Active),
            suspended_members: count(MemberStatus::Suspended),
            total_unpaid_commission: members.iter().map(|m| m.unpaid_commission).sum(),
            total_paid_commission: members.iter().map(|m| m.total_paid_commission).sum(),
            flagged_events: events
                .iter()
                .filter(|e| e.status == ReferralEventStatus::Fraudulent)
                .count(),
        })
    }

    async fn transition(
        &self,
        member_id: Uuid,
        allowed_from: &[MemberStatus],
        to: MemberStatus,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<ReferralMember, ReferralError> {
        let member = self.members.get_by_id(member_id).await?;
        if !allowed_from.contains(&member.status) {
            return Err(ReferralError::InvalidTransition(format!(
                "member {} cannot move from {} to {}",
                member_id, member.status, to
            )));
        }

        let from = member.status;
        let previous = member.clone();
        let mut updated = member;
        updated.status = to;
        updated.suspended_reason = reason.map(str::to_string);

        let mut saga = Saga::new("member_status");
        let members = self.members.clone();
        let updated = saga
            .step("update_status", self.members.save(&updated), move || async move {
                members.save(&previous).await.map(|_| ())
            })
            .await?;
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                actor,
                "member_status_changed",
                ReferralMember::NAME,
                member_id,
                json!({ "from": from, "to": to, "reason": reason }),
            )),
        )
        .await?;
        saga.commit();

        info!(member_id = %member_id, from = %from, to = %to, "Member status changed");

        self.cache.invalidate_prefix(&keys::member(member_id)).await;
        self.cache.invalidate(keys::DASHBOARD).await;
        let message = match (to, reason) {
            (MemberStatus::Suspended, Some(reason)) => format!("Your account was suspended: {}", reason),
            (MemberStatus::Active, _) => format!(
                "Your account is active. Referral code: {}",
                updated.referral_code
            ),
            _ => format!("Your account status is now {}", to),
        };
        self.notifications
            .notify(
                Recipient::user(&updated.email),
                NotificationKind::MemberStatus,
                "Account status",
                &message,
            )
            .await;

        Ok(updated)
    }

    async fn allocate_code(&self, full_name: &str) -> Result<String, ReferralError> {
        for _ in 0..CODE_ATTEMPTS {
            let code = codes::referral_code(full_name);
            if ReferralMember::find_by_code(&self.members, &code)
                .await?
                .is_none()
            {
                return Ok(code);
            }
        }
        Err(ReferralError::CodeExhausted)
    }
}

/// Every rank above the base must be configured once, and F1 rank
/// requirements must point below the rank being earned.
fn validate_ladder(ladder: &[RankRequirement]) -> Result<(), String> {
    for rank in SeederRank::LADDER.iter().skip(1) {
        let entries = ladder.iter().filter(|r| r.rank == *rank).count();
        if entries != 1 {
            return Err(format!("rank {} must be configured exactly once", rank));
        }
    }
    for requirement in ladder {
        if let Some(f1_rank) = requirement.f1_rank_required {
            if f1_rank >= requirement.rank {
                return Err(format!(
                    "rank {} cannot require F1s at {} or above",
                    requirement.rank, f1_rank
                ));
            }
        }
        if !(0.0..=100.0).contains(&requirement.bonus_percent) {
            return Err(format!("rank {} bonus outside 0-100", requirement.rank));
        }
    }
    Ok(())
}
