use std::{sync::Arc, time::Duration};

use db::{DBService, Repository, models::{order::Order, product::Product}};
use services::services::{
    cache::{CacheInvalidator, QueryCache},
    notification::{NotificationService, TracingSender},
    preorder::PreOrderService,
    referral_admin::ReferralAdminService,
    referral_commission::ReferralCommissionService,
    referral_rank::ReferralRankService,
};

pub mod config;
pub mod error;
pub mod routes;

/// Shared handler state; every service talks to the same store and cache
#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub orders: Repository<Order>,
    pub products: Repository<Product>,
    pub commission: Arc<ReferralCommissionService>,
    pub ranks: Arc<ReferralRankService>,
    pub admin: Arc<ReferralAdminService>,
    pub preorders: Arc<PreOrderService>,
    pub notifications: NotificationService,
}

impl AppState {
    pub fn new(db: DBService, cache_ttl: Duration) -> Self {
        let store = db.store();
        let cache = QueryCache::new(cache_ttl);
        let invalidator: Arc<dyn CacheInvalidator> = Arc::new(cache.clone());
        let notifications = NotificationService::new(store.clone(), Arc::new(TracingSender));

        Self {
            orders: Repository::new(store.clone()),
            products: Repository::new(store.clone()),
            commission: Arc::new(ReferralCommissionService::new(
                store.clone(),
                notifications.clone(),
                cache,
            )),
            ranks: Arc::new(ReferralRankService::new(
                store.clone(),
                notifications.clone(),
                invalidator.clone(),
            )),
            admin: Arc::new(ReferralAdminService::new(
                store.clone(),
                notifications.clone(),
                invalidator.clone(),
            )),
            preorders: Arc::new(PreOrderService::new(store, notifications.clone(), invalidator)),
            notifications,
            db,
        }
    }
}
