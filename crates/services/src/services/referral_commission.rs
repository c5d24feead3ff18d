//! Commission accrual for referred orders.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use db::{
    Entity, EntityStore, Repository, RepositoryError,
    models::{
        audit_log::AuditLog,
        customer::Customer,
        notification::{NotificationKind, Recipient},
        order::Order,
        referral_event::{ReferralEvent, ReferralEventStatus},
        referral_member::{ReferralMember, SeederRank, period_month},
        referral_setting::ReferralSetting,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};
use ts_rs::TS;
use utils::response::{ErrorCode, HasErrorCode};
use uuid::Uuid;

use super::{
    cache::{CacheInvalidator, QueryCache, keys},
    commission::{self, TierMatch},
    fraud::{self, FraudContext},
    notification::NotificationService,
    rank::{self, RankProgress},
    saga::Saga,
};

pub(crate) const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Error)]
pub enum ReferralError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("referral member {0} is not active")]
    MemberNotActive(Uuid),
    #[error("order {0} already has a referral event")]
    AlreadyProcessed(Uuid),
    #[error("unknown referral code: {0}")]
    UnknownCode(String),
    #[error("invalid status transition: {0}")]
    InvalidTransition(String),
    #[error("unpaid commission {unpaid} is below the minimum payout of {minimum}")]
    BelowMinimumPayout { unpaid: i64, minimum: i64 },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("could not allocate a unique referral code")]
    CodeExhausted,
}

impl HasErrorCode for ReferralError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::Repository(e) => e.code(),
            Self::AlreadyProcessed(_) => ErrorCode::DuplicateEntry,
            Self::UnknownCode(_) => ErrorCode::NotFound,
            Self::CodeExhausted => ErrorCode::ServerError,
            Self::MemberNotActive(_)
            | Self::InvalidTransition(_)
            | Self::BelowMinimumPayout { .. }
            | Self::InvalidSettings(_) => ErrorCode::ValidationError,
        }
    }
}

/// Result of screening an order for commission
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommissionOutcome {
    /// Order carries no usable referral
    NoReferral,
    Recorded { event: ReferralEvent },
    /// Recorded with zero commission because fraud heuristics fired
    Flagged { event: ReferralEvent },
}

/// Commission dashboard figures for one member
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MemberCommissionSummary {
    pub member_id: Uuid,
    pub seeder_rank: SeederRank,
    pub period_month: String,
    pub month_revenue: i64,
    pub tier: TierMatch,
    pub rank_bonus: f64,
    pub effective_rate: f64,
    pub unpaid_commission: i64,
    pub total_paid_commission: i64,
    pub rank_progress: RankProgress,
}

pub struct ReferralCommissionService {
    members: Repository<ReferralMember>,
    events: Repository<ReferralEvent>,
    settings: Repository<ReferralSetting>,
    customers: Repository<Customer>,
    audit: Repository<AuditLog>,
    notifications: NotificationService,
    cache: QueryCache,
}

impl ReferralCommissionService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        notifications: NotificationService,
        cache: QueryCache,
    ) -> Self {
        Self {
            members: Repository::new(store.clone()),
            events: Repository::new(store.clone()),
            settings: Repository::new(store.clone()),
            customers: Repository::new(store.clone()),
            audit: Repository::new(store),
            notifications,
            cache,
        }
    }

    /// Record the referral event for an order and credit its referrer
    pub async fn process_order(
        &self,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<CommissionOutcome, ReferralError> {
        let Some(member) = self.resolve_referrer(order).await? else {
            debug!(order_id = %order.id, "Order has no referrer");
            return Ok(CommissionOutcome::NoReferral);
        };

        if ReferralEvent::find_by_order(&self.events, order.id)
            .await?
            .is_some()
        {
            return Err(ReferralError::AlreadyProcessed(order.id));
        }
        if !member.is_active() {
            return Err(ReferralError::MemberNotActive(member.id));
        }

        let settings = ReferralSetting::load(&self.settings).await?;
        let customer_orders_last_day = ReferralEvent::count_for_customer_since(
            &self.events,
            &order.customer_email,
            now - Duration::hours(24),
        )
        .await?;
        let assessment = fraud::assess(&FraudContext {
            referrer_email: &member.email,
            customer_email: &order.customer_email,
            order_amount: order.total_amount,
            customer_orders_last_day,
            max_orders_per_customer_per_day: settings.max_orders_per_customer_per_day,
            max_order_amount: settings.max_order_amount,
        });

        if assessment.is_suspicious() {
            let event = self
                .record_flagged(order, &member, assessment.reasons, now)
                .await?;
            return Ok(CommissionOutcome::Flagged { event });
        }

        let period = period_month(now);
        let previous = member.clone();
        let mut updated = member;
        if updated.revenue_period != period {
            updated.current_month_revenue = 0;
            updated.revenue_period = period.clone();
        }
        updated.current_month_revenue += order.total_amount;

        let tier = commission::resolve_tier(updated.current_month_revenue, &settings.commission_tiers);
        let rate = commission::effective_rate(tier.rate, &updated);
        let amount = commission::commission_amount(order.total_amount, rate);
        updated.unpaid_commission += amount;

        let event = ReferralEvent {
            id: Uuid::new_v4(),
            referrer_id: updated.id,
            order_id: order.id,
            customer_email: order.customer_email.clone(),
            order_amount: order.total_amount,
            commission_rate: rate,
            commission_amount: amount,
            tier_label: tier.label.clone(),
            status: ReferralEventStatus::Calculated,
            period_month: period,
            fraud_reasons: Vec::new(),
            paid_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut saga = Saga::new("record_commission");
        let events = self.events.clone();
        let event_id = event.id;
        let event = saga
            .step("create_event", self.events.create(event), move || async move {
                events.delete(event_id).await
            })
            .await?;
        let members = self.members.clone();
        let updated = saga
            .step("credit_member", self.members.save(&updated), move || async move {
                members.save(&previous).await.map(|_| ())
            })
            .await?;
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                SYSTEM_ACTOR,
                "commission_recorded",
                ReferralEvent::NAME,
                event.id,
                json!({
                    "order_id": order.id,
                    "referrer_id": updated.id,
                    "order_amount": order.total_amount,
                    "rate": rate,
                    "commission": amount,
                    "tier": tier.label,
                }),
            )),
        )
        .await?;
        saga.commit();

        info!(
            order_id = %order.id,
            member_id = %updated.id,
            rate,
            commission = amount,
            "Referral commission recorded"
        );

        self.invalidate_member(updated.id).await;
        self.notifications
            .notify(
                Recipient::user(&updated.email),
                NotificationKind::Commission,
                "New commission",
                &format!(
                    "Order {} earned {} commission at {:.2}%",
                    order.order_number, amount, rate
                ),
            )
            .await;

        Ok(CommissionOutcome::Recorded { event })
    }

    /// Register a customer brought in by `referral_code`
    pub async fn attribute_customer(
        &self,
        customer_email: &str,
        full_name: &str,
        referral_code: &str,
        now: DateTime<Utc>,
    ) -> Result<Customer, ReferralError> {
        let member = ReferralMember::find_by_code(&self.members, referral_code)
            .await?
            .ok_or_else(|| ReferralError::UnknownCode(referral_code.to_string()))?;
        if !member.is_active() {
            return Err(ReferralError::MemberNotActive(member.id));
        }

        let customer = Customer::new(customer_email, full_name, Some(member.id), now);
        let previous = member.clone();
        let mut updated = member;
        updated.total_referred_customers += 1;

        let mut saga = Saga::new("attribute_customer");
        let customers = self.customers.clone();
        let customer_id = customer.id;
        let customer = saga
            .step("create_customer", self.customers.create(customer), move || async move {
                customers.delete(customer_id).await
            })
            .await?;
        let members = self.members.clone();
        saga.step("count_f1", self.members.save(&updated), move || async move {
            members.save(&previous).await.map(|_| ())
        })
        .await?;
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                SYSTEM_ACTOR,
                "customer_attributed",
                Customer::NAME,
                customer.id,
                json!({ "referrer_id": updated.id, "referral_code": updated.referral_code }),
            )),
        )
        .await?;
        saga.commit();

        self.invalidate_member(updated.id).await;
        Ok(customer)
    }

    /// Cached commission overview for dashboards that poll
    pub async fn member_summary(
        &self,
        member_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<MemberCommissionSummary, ReferralError> {
        let summary = self
            .cache
            .get_or_load(&keys::member_summary(member_id), || async {
                let member = self.members.get_by_id(member_id).await?;
                let settings = ReferralSetting::load(&self.settings).await?;
                let f1_ranks: Vec<SeederRank> =
                    ReferralMember::find_f1_members(&self.members, member_id)
                        .await?
                        .into_iter()
                        .map(|m| m.seeder_rank)
                        .collect();

                let month_revenue = member.revenue_in_period(now);
                let tier = commission::resolve_tier(month_revenue, &settings.commission_tiers);
                let effective_rate = commission::effective_rate(tier.rate, &member);
                let rank_progress = rank::progress(
                    member.seeder_rank,
                    member.total_referred_customers,
                    &f1_ranks,
                    &settings.seeder_rank_config,
                );

                Ok::<_, RepositoryError>(MemberCommissionSummary {
                    member_id,
                    seeder_rank: member.seeder_rank,
                    period_month: period_month(now),
                    month_revenue,
                    tier,
                    rank_bonus: member.seeder_rank_bonus,
                    effective_rate,
                    unpaid_commission: member.unpaid_commission,
                    total_paid_commission: member.total_paid_commission,
                    rank_progress,
                })
            })
            .await?;
        Ok(summary)
    }

    async fn resolve_referrer(&self, order: &Order) -> Result<Option<ReferralMember>, ReferralError> {
        let code = order
            .referral_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        if let Some(code) = code {
            let members = self.members.clone();
            let member_id = self
                .cache
                .get_or_load(&keys::referral_code(code), || async move {
                    let member = ReferralMember::find_by_code(&members, code).await?;
                    Ok::<_, RepositoryError>(member.map(|m| m.id))
                })
                .await?;
            let member = match member_id {
                Some(id) => self.members.find_by_id(id).await?,
                None => None,
            };
            if member.is_none() {
                warn!(order_id = %order.id, code, "Order references unknown referral code");
            }
            return Ok(member);
        }

        let Some(customer) = Customer::find_by_email(&self.customers, &order.customer_email).await?
        else {
            return Ok(None);
        };
        match customer.referrer_id {
            Some(referrer_id) => Ok(self.members.find_by_id(referrer_id).await?),
            None => Ok(None),
        }
    }

    async fn record_flagged(
        &self,
        order: &Order,
        member: &ReferralMember,
        reasons: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<ReferralEvent, ReferralError> {
        let event = ReferralEvent {
            id: Uuid::new_v4(),
            referrer_id: member.id,
            order_id: order.id,
            customer_email: order.customer_email.clone(),
            order_amount: order.total_amount,
            commission_rate: 0.0,
            commission_amount: 0,
            tier_label: String::new(),
            status: ReferralEventStatus::Fraudulent,
            period_month: period_month(now),
            fraud_reasons: reasons,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut saga = Saga::new("flag_referral_order");
        let events = self.events.clone();
        let event_id = event.id;
        let event = saga
            .step("create_event", self.events.create(event), move || async move {
                events.delete(event_id).await
            })
            .await?;
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                SYSTEM_ACTOR,
                "commission_flagged",
                ReferralEvent::NAME,
                event.id,
                json!({ "order_id": order.id, "reasons": event.fraud_reasons }),
            )),
        )
        .await?;
        saga.commit();

        warn!(
            order_id = %order.id,
            member_id = %member.id,
            reasons = ?event.fraud_reasons,
            "Referral order flagged as fraudulent"
        );
        Ok(event)
    }

    async fn invalidate_member(&self, member_id: Uuid) {
        self.cache.invalidate_prefix(&keys::member(member_id)).await;
        self.cache.invalidate(keys::DASHBOARD).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::TimeZone;
    use db::{DBService, models::referral_member::{CreateReferralMember, MemberStatus}};
    use utils::response::HasErrorCode;

    use super::*;
    use crate::services::notification::TracingSender;

    struct Fixture {
        service: ReferralCommissionService,
        members: Repository<ReferralMember>,
        cache: QueryCache,
    }

    async fn fixture() -> Fixture {
        let db = DBService::new_in_memory().await.unwrap();
        let store = db.store();
        let notifications = NotificationService::new(store.clone(), Arc::new(TracingSender));
        let cache = QueryCache::new(StdDuration::from_secs(60));
        Fixture {
            service: ReferralCommissionService::new(store.clone(), notifications, cache.clone()),
            members: Repository::new(store),
            cache,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 20, 10, 0, 0).unwrap()
    }

    async fn member(fx: &Fixture, code: &str, month_revenue: i64) -> ReferralMember {
        let data = CreateReferralMember {
            full_name: "Nguyen Van An".to_string(),
            email: format!("{}@example.vn", code.to_lowercase()),
            phone: None,
            referrer_code: None,
        };
        let mut member = ReferralMember::new(&data, code.to_string(), None, MemberStatus::Active, now());
        member.current_month_revenue = month_revenue;
        fx.members.create(member).await.unwrap()
    }

    fn order(number: &str, email: &str, amount: i64, code: Option<&str>) -> Order {
        Order::new(number, email, amount, code.map(str::to_string), None, now())
    }

    #[tokio::test]
    async fn test_records_commission_at_tier_rate() {
        let fx = fixture().await;
        let referrer = member(&fx, "NVA12345", 0).await;

        let outcome = fx
            .service
            .process_order(&order("DH001", "khach@example.vn", 5_000_000, Some("nva12345")), now())
            .await
            .unwrap();
        let CommissionOutcome::Recorded { event } = outcome else {
            panic!("expected a recorded commission");
        };
        assert_eq!(event.commission_amount, 50_000);
        assert_eq!(event.tier_label, "Bac 1");
        assert_eq!(event.period_month, "2025-03");

        let referrer = fx.members.get_by_id(referrer.id).await.unwrap();
        assert_eq!(referrer.unpaid_commission, 50_000);
        assert_eq!(referrer.current_month_revenue, 5_000_000);
    }

    #[tokio::test]
    async fn test_referral_code_lookup_is_cached_but_balances_stay_fresh() {
        let fx = fixture().await;
        let referrer = member(&fx, "NVA12345", 0).await;

        fx.service
            .process_order(&order("DH010", "khach@example.vn", 1_000_000, Some("nva12345")), now())
            .await
            .unwrap();
        assert!(fx.cache.contains(&keys::referral_code("NVA12345")).await);

        fx.service
            .process_order(&order("DH011", "khach2@example.vn", 2_000_000, Some("NVA12345")), now())
            .await
            .unwrap();
        let referrer = fx.members.get_by_id(referrer.id).await.unwrap();
        assert_eq!(referrer.current_month_revenue, 3_000_000);
        assert_eq!(referrer.unpaid_commission, 30_000);
    }

    #[tokio::test]
    async fn test_order_crossing_tier_boundary_uses_upper_tier() {
        let fx = fixture().await;
        member(&fx, "NVA12345", 9_000_000).await;

        let outcome = fx
            .service
            .process_order(&order("DH002", "khach@example.vn", 1_000_000, Some("NVA12345")), now())
            .await
            .unwrap();
        let CommissionOutcome::Recorded { event } = outcome else {
            panic!("expected a recorded commission");
        };
        assert_eq!(event.tier_label, "Bac 2");
        assert_eq!(event.commission_amount, 20_000);
    }

    #[tokio::test]
    async fn test_rank_bonus_and_custom_rate() {
        let fx = fixture().await;
        let mut referrer = member(&fx, "NVA12345", 0).await;
        referrer.seeder_rank_bonus = 0.5;
        fx.members.save(&referrer).await.unwrap();

        let outcome = fx
            .service
            .process_order(&order("DH003", "a@example.vn", 1_000_000, Some("NVA12345")), now())
            .await
            .unwrap();
        let CommissionOutcome::Recorded { event } = outcome else {
            panic!("expected a recorded commission");
        };
        assert_eq!(event.commission_amount, 15_000);

        let mut referrer = fx.members.get_by_id(referrer.id).await.unwrap();
        referrer.custom_rate_enabled = true;
        referrer.custom_commission_rate = Some(4.0);
        fx.members.save(&referrer).await.unwrap();

        let outcome = fx
            .service
            .process_order(&order("DH004", "b@example.vn", 1_000_000, Some("NVA12345")), now())
            .await
            .unwrap();
        let CommissionOutcome::Recorded { event } = outcome else {
            panic!("expected a recorded commission");
        };
        assert_eq!(event.commission_amount, 40_000);
    }

    #[tokio::test]
    async fn test_month_rollover_resets_revenue() {
        let fx = fixture().await;
        let mut referrer = member(&fx, "NVA12345", 45_000_000).await;
        referrer.revenue_period = "2025-02".to_string();
        fx.members.save(&referrer).await.unwrap();

        let outcome = fx
            .service
            .process_order(&order("DH005", "c@example.vn", 2_000_000, Some("NVA12345")), now())
            .await
            .unwrap();
        let CommissionOutcome::Recorded { event } = outcome else {
            panic!("expected a recorded commission");
        };
        assert_eq!(event.tier_label, "Bac 1");

        let referrer = fx.members.get_by_id(referrer.id).await.unwrap();
        assert_eq!(referrer.revenue_period, "2025-03");
        assert_eq!(referrer.current_month_revenue, 2_000_000);
    }

    #[tokio::test]
    async fn test_order_is_processed_once() {
        let fx = fixture().await;
        member(&fx, "NVA12345", 0).await;
        let order = order("DH006", "d@example.vn", 1_000_000, Some("NVA12345"));

        fx.service.process_order(&order, now()).await.unwrap();
        let err = fx.service.process_order(&order, now()).await.unwrap_err();
        assert!(matches!(err, ReferralError::AlreadyProcessed(id) if id == order.id));
        assert_eq!(err.error_code(), ErrorCode::DuplicateEntry);
    }

    #[tokio::test]
    async fn test_self_referral_is_flagged_without_commission() {
        let fx = fixture().await;
        let referrer = member(&fx, "NVA12345", 0).await;

        let outcome = fx
            .service
            .process_order(&order("DH007", "NVA12345@example.vn", 1_000_000, Some("NVA12345")), now())
            .await
            .unwrap();
        let CommissionOutcome::Flagged { event } = outcome else {
            panic!("expected a flagged order");
        };
        assert_eq!(event.status, ReferralEventStatus::Fraudulent);
        assert_eq!(event.commission_amount, 0);

        let referrer = fx.members.get_by_id(referrer.id).await.unwrap();
        assert_eq!(referrer.unpaid_commission, 0);
    }

    #[tokio::test]
    async fn test_suspended_referrer_is_rejected() {
        let fx = fixture().await;
        let mut referrer = member(&fx, "NVA12345", 0).await;
        referrer.status = MemberStatus::Suspended;
        fx.members.save(&referrer).await.unwrap();

        let err = fx
            .service
            .process_order(&order("DH008", "e@example.vn", 1_000_000, Some("NVA12345")), now())
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::MemberNotActive(_)));
    }

    #[tokio::test]
    async fn test_attributed_customer_routes_later_orders() {
        let fx = fixture().await;
        let referrer = member(&fx, "NVA12345", 0).await;

        fx.service
            .attribute_customer("Khach@Example.vn", "Khach Hang", "NVA12345", now())
            .await
            .unwrap();
        let referrer_after = fx.members.get_by_id(referrer.id).await.unwrap();
        assert_eq!(referrer_after.total_referred_customers, 1);

        let outcome = fx
            .service
            .process_order(&order("DH009", "khach@example.vn", 1_000_000, None), now())
            .await
            .unwrap();
        assert!(matches!(outcome, CommissionOutcome::Recorded { .. }));

        let none = fx
            .service
            .process_order(&order("DH010", "stranger@example.vn", 1_000_000, None), now())
            .await
            .unwrap();
        assert!(matches!(none, CommissionOutcome::NoReferral));
    }

    #[tokio::test]
    async fn test_summary_is_cached_until_commission_changes() {
        let fx = fixture().await;
        let referrer = member(&fx, "NVA12345", 0).await;

        let summary = fx.service.member_summary(referrer.id, now()).await.unwrap();
        assert_eq!(summary.unpaid_commission, 0);
        assert!(fx.cache.contains(&keys::member_summary(referrer.id)).await);

        fx.service
            .process_order(&order("DH011", "f@example.vn", 1_000_000, Some("NVA12345")), now())
            .await
            .unwrap();
        assert!(!fx.cache.contains(&keys::member_summary(referrer.id)).await);

        let summary = fx.service.member_summary(referrer.id, now()).await.unwrap();
        assert_eq!(summary.unpaid_commission, 10_000);
        assert_eq!(summary.rank_progress.f1_required, 7);
    }
}
