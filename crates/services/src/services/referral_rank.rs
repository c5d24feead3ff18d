//! Applies rank progression to stored members.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use db::{
    Entity, EntityStore, Repository,
    models::{
        audit_log::AuditLog,
        notification::{NotificationKind, Recipient},
        referral_member::{MemberStatus, ReferralMember, SeederRank},
        referral_setting::ReferralSetting,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::{
    cache::{CacheInvalidator, keys},
    notification::NotificationService,
    rank::{self, RankDecision},
    referral_commission::ReferralError,
    saga::Saga,
};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RankEvaluation {
    pub member_id: Uuid,
    pub previous_rank: SeederRank,
    pub current_rank: SeederRank,
    pub upgraded: bool,
}

/// Summary of a sweep over all active members
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RankSweepReport {
    pub evaluated: usize,
    pub upgraded: Vec<RankEvaluation>,
    pub failed: usize,
}

pub struct ReferralRankService {
    members: Repository<ReferralMember>,
    settings: Repository<ReferralSetting>,
    audit: Repository<AuditLog>,
    notifications: NotificationService,
    cache: Arc<dyn CacheInvalidator>,
}

impl ReferralRankService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        notifications: NotificationService,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            members: Repository::new(store.clone()),
            settings: Repository::new(store.clone()),
            audit: Repository::new(store),
            notifications,
            cache,
        }
    }

    /// Evaluate one step of rank progression for a member
    pub async fn evaluate_member(
        &self,
        member_id: Uuid,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<RankEvaluation, ReferralError> {
        let member = self.members.get_by_id(member_id).await?;
        if !member.is_active() {
            return Err(ReferralError::MemberNotActive(member_id));
        }
        let settings = ReferralSetting::load(&self.settings).await?;
        self.evaluate_with(member, &settings, actor, now).await
    }

    /// Evaluate every active member once
    pub async fn evaluate_all(&self, actor: &str, now: DateTime<Utc>) -> Result<RankSweepReport, ReferralError> {
        let settings = ReferralSetting::load(&self.settings).await?;
        let members = ReferralMember::find_by_status(&self.members, MemberStatus::Active).await?;

        let mut report = RankSweepReport::default();
        for member in members {
            let member_id = member.id;
            report.evaluated += 1;
            match self.evaluate_with(member, &settings, actor, now).await {
                Ok(evaluation) if evaluation.upgraded => report.upgraded.push(evaluation),
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(member_id = %member_id, error = %e, "Rank evaluation failed");
                }
            }
        }
        Ok(report)
    }

    async fn evaluate_with(
        &self,
        member: ReferralMember,
        settings: &ReferralSetting,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<RankEvaluation, ReferralError> {
        let f1_ranks: Vec<SeederRank> = ReferralMember::find_f1_members(&self.members, member.id)
            .await?
            .into_iter()
            .map(|m| m.seeder_rank)
            .collect();

        let decision = rank::evaluate(
            member.seeder_rank,
            member.total_referred_customers,
            &f1_ranks,
            &settings.seeder_rank_config,
        );

        let RankDecision::Upgrade { to, requirement } = decision else {
            debug!(member_id = %member.id, rank = %member.seeder_rank, "Rank unchanged");
            return Ok(RankEvaluation {
                member_id: member.id,
                previous_rank: member.seeder_rank,
                current_rank: member.seeder_rank,
                upgraded: false,
            });
        };

        let previous = member.clone();
        let mut updated = member;
        updated.seeder_rank = to;
        updated.seeder_rank_bonus = requirement.bonus_percent;
        updated.has_certificate |= requirement.grants_certificate;
        updated.is_region_representative |= requirement.grants_region_representative;
        updated.rank_upgraded_at = Some(now);

        let mut saga = Saga::new("rank_upgrade");
        let members = self.members.clone();
        let previous_rank = previous.seeder_rank;
        let updated = saga
            .step("upgrade_member", self.members.save(&updated), move || async move {
                members.save(&previous).await.map(|_| ())
            })
            .await?;
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                actor,
                "rank_upgraded",
                ReferralMember::NAME,
                updated.id,
                json!({
                    "from": previous_rank,
                    "to": to,
                    "bonus_percent": requirement.bonus_percent,
                    "f1_count": updated.total_referred_customers,
                }),
            )),
        )
        .await?;
        saga.commit();

        info!(
            member_id = %updated.id,
            from = %previous_rank,
            to = %to,
            "Seeder rank upgraded"
        );

        self.cache.invalidate_prefix(&keys::member(updated.id)).await;
        self.notifications
            .notify(
                Recipient::user(&updated.email),
                NotificationKind::RankUpgrade,
                "Rank upgraded",
                &format!(
                    "You reached {} with a {:.2}% commission bonus",
                    to, requirement.bonus_percent
                ),
            )
            .await;

        Ok(RankEvaluation {
            member_id: updated.id,
            previous_rank,
            current_rank: to,
            upgraded: true,
        })
    }
}

/// Background job climbing members one rank per tick
pub struct RankProgressionJob {
    service: Arc<ReferralRankService>,
    poll_interval: Duration,
}

impl RankProgressionJob {
    pub const ACTOR: &'static str = "rank-job";

    pub fn spawn(
        service: Arc<ReferralRankService>,
        poll_interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let job = Self {
            service,
            poll_interval,
        };
        tokio::spawn(async move {
            job.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "Starting rank progression job with interval {:?}",
            self.poll_interval
        );

        let mut interval = interval(self.poll_interval);

        loop {
            interval.tick().await;
            match self.service.evaluate_all(Self::ACTOR, Utc::now()).await {
                Ok(report) if !report.upgraded.is_empty() || report.failed > 0 => {
                    info!(
                        evaluated = report.evaluated,
                        upgraded = report.upgraded.len(),
                        failed = report.failed,
                        "Rank progression sweep finished"
                    );
                }
                Ok(report) => {
                    debug!(evaluated = report.evaluated, "Rank progression sweep: no changes");
                }
                Err(e) => {
                    error!("Error running rank progression sweep: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use db::{DBService, models::referral_member::CreateReferralMember};

    use super::*;
    use crate::services::{cache::NoopInvalidator, notification::TracingSender};

    struct Fixture {
        service: ReferralRankService,
        members: Repository<ReferralMember>,
    }

    async fn fixture() -> Fixture {
        let db = DBService::new_in_memory().await.unwrap();
        let store = db.store();
        let notifications = NotificationService::new(store.clone(), Arc::new(TracingSender));
        Fixture {
            service: ReferralRankService::new(store.clone(), notifications, Arc::new(NoopInvalidator)),
            members: Repository::new(store),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 2, 0, 0).unwrap()
    }

    async fn member(
        fx: &Fixture,
        code: &str,
        rank: SeederRank,
        f1_count: u32,
        referred_by: Option<Uuid>,
    ) -> ReferralMember {
        let data = CreateReferralMember {
            full_name: format!("Member {}", code),
            email: format!("{}@example.vn", code.to_lowercase()),
            phone: None,
            referrer_code: None,
        };
        let mut member = ReferralMember::new(&data, code.to_string(), referred_by, MemberStatus::Active, now());
        member.seeder_rank = rank;
        member.total_referred_customers = f1_count;
        fx.members.create(member).await.unwrap()
    }

    #[tokio::test]
    async fn test_seven_f1_reach_second_rank_once() {
        let fx = fixture().await;
        let seeded = member(&fx, "AAA00001", SeederRank::NguoiGieoHat, 7, None).await;

        let first = fx.service.evaluate_member(seeded.id, "admin", now()).await.unwrap();
        assert!(first.upgraded);
        assert_eq!(first.current_rank, SeederRank::HatGiongKhoe);

        let stored = fx.members.get_by_id(seeded.id).await.unwrap();
        assert_eq!(stored.seeder_rank_bonus, 0.5);
        assert_eq!(stored.rank_upgraded_at, Some(now()));

        let second = fx.service.evaluate_member(seeded.id, "admin", now()).await.unwrap();
        assert!(!second.upgraded);
        assert_eq!(second.current_rank, SeederRank::HatGiongKhoe);
    }

    #[tokio::test]
    async fn test_qualified_f1_ranks_gate_upgrade() {
        let fx = fixture().await;
        let leader = member(&fx, "LEAD0001", SeederRank::HatGiongKhoe, 15, None).await;
        for i in 0..2 {
            member(&fx, &format!("F1X0000{}", i), SeederRank::HatGiongKhoe, 0, Some(leader.id)).await;
        }

        let stay = fx.service.evaluate_member(leader.id, "admin", now()).await.unwrap();
        assert!(!stay.upgraded);

        member(&fx, "F1X00009", SeederRank::MamXanh, 0, Some(leader.id)).await;
        let up = fx.service.evaluate_member(leader.id, "admin", now()).await.unwrap();
        assert!(up.upgraded);
        assert_eq!(up.current_rank, SeederRank::MamXanh);
    }

    #[tokio::test]
    async fn test_top_rank_grants_titles() {
        let fx = fixture().await;
        let leader = member(&fx, "TOP00001", SeederRank::CayTruongThanh, 50, None).await;
        for i in 0..3 {
            member(&fx, &format!("TOPF100{}", i), SeederRank::CayTruongThanh, 0, Some(leader.id)).await;
        }

        let up = fx.service.evaluate_member(leader.id, "admin", now()).await.unwrap();
        assert_eq!(up.current_rank, SeederRank::DanhHieu);

        let stored = fx.members.get_by_id(leader.id).await.unwrap();
        assert!(stored.has_certificate);
        assert!(stored.is_region_representative);
    }

    #[tokio::test]
    async fn test_sweep_skips_inactive_members() {
        let fx = fixture().await;
        member(&fx, "SWP00001", SeederRank::NguoiGieoHat, 7, None).await;
        let mut paused = member(&fx, "SWP00002", SeederRank::NguoiGieoHat, 7, None).await;
        paused.status = MemberStatus::Suspended;
        fx.members.save(&paused).await.unwrap();

        let report = fx.service.evaluate_all("rank-job", now()).await.unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.upgraded.len(), 1);
        assert_eq!(report.failed, 0);

        let err = fx
            .service
            .evaluate_member(paused.id, "admin", now())
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::MemberNotActive(_)));
    }
}
