//! Pre-order escrow, cancellation refunds and automatic compensation.

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use db::{
    Entity, EntityStore, RepoResult, Repository, RepositoryError,
    models::{
        audit_log::AuditLog,
        auto_compensation::{AutoCompensation, CompensationTrigger},
        notification::{NotificationKind, Recipient},
        order::{Order, OrderStatus},
        payment_wallet::{PaymentWallet, WalletStatus},
        preorder_cancellation::PreOrderCancellation,
        preorder_setting::{CompensationRule, PreOrderSetting},
        product::Product,
        product_lot::{LotStatus, ProductLot},
        wallet_transaction::{TransactionKind, WalletTransaction},
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
    cache::{CacheInvalidator, keys},
    compensation,
    notification::NotificationService,
    refund::{self, RefundQuote},
    saga::Saga,
};

#[derive(Debug, Error)]
pub enum PreOrderError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("order {0} is not a pre-order")]
    NotPreOrder(Uuid),
    #[error("product {0} is not sold as a pre-order")]
    ProductNotPreOrder(Uuid),
    #[error("order {0} has no payment wallet")]
    WalletMissing(Uuid),
    #[error("wallet for order {order_id} is {status}, expected held")]
    WalletNotHeld { order_id: Uuid, status: WalletStatus },
    #[error("invalid deposit: {0}")]
    InvalidDeposit(String),
    #[error("invalid lot update: {0}")]
    InvalidLotUpdate(String),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

impl HasErrorCode for PreOrderError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::Repository(e) => e.code(),
            Self::WalletMissing(_) => ErrorCode::NotFound,
            Self::NotPreOrder(_)
            | Self::ProductNotPreOrder(_)
            | Self::WalletNotHeld { .. }
            | Self::InvalidDeposit(_)
            | Self::InvalidLotUpdate(_)
            | Self::InvalidSettings(_) => ErrorCode::ValidationError,
        }
    }
}

/// Wallet with its ledger
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WalletStatement {
    pub wallet: PaymentWallet,
    pub transactions: Vec<WalletTransaction>,
}

/// Outcome of a delay or shortage report for a lot
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LotCompensationReport {
    pub lot: ProductLot,
    pub trigger: CompensationTrigger,
    pub magnitude: f64,
    pub rule: Option<CompensationRule>,
    pub compensations: Vec<AutoCompensation>,
    /// Orders already compensated for this trigger
    pub skipped: usize,
    pub failed: usize,
}

pub struct PreOrderService {
    orders: Repository<Order>,
    products: Repository<Product>,
    lots: Repository<ProductLot>,
    wallets: Repository<PaymentWallet>,
    transactions: Repository<WalletTransaction>,
    cancellations: Repository<PreOrderCancellation>,
    compensations: Repository<AutoCompensation>,
    settings: Repository<PreOrderSetting>,
    audit: Repository<AuditLog>,
    notifications: NotificationService,
    cache: Arc<dyn CacheInvalidator>,
}

impl PreOrderService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        notifications: NotificationService,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            orders: Repository::new(store.clone()),
            products: Repository::new(store.clone()),
            lots: Repository::new(store.clone()),
            wallets: Repository::new(store.clone()),
            transactions: Repository::new(store.clone()),
            cancellations: Repository::new(store.clone()),
            compensations: Repository::new(store.clone()),
            settings: Repository::new(store.clone()),
            audit: Repository::new(store),
            notifications,
            cache,
        }
    }

    /// Open a harvest lot for a pre-order product
    pub async fn create_lot(
        &self,
        product_id: Uuid,
        lot_code: &str,
        harvest_date: NaiveDate,
        expected_quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<ProductLot, PreOrderError> {
        let product = self.products.get_by_id(product_id).await?;
        if !product.is_preorder {
            return Err(PreOrderError::ProductNotPreOrder(product_id));
        }
        let lot = self
            .lots
            .create(ProductLot::new(product.id, lot_code, harvest_date, expected_quantity, now))
            .await?;
        info!(lot_id = %lot.id, lot_code = %lot.lot_code, %harvest_date, "Harvest lot opened");
        Ok(lot)
    }

    /// Hold the deposit for a pre-order in escrow
    pub async fn open_wallet(
        &self,
        order_id: Uuid,
        deposit_amount: i64,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentWallet, PreOrderError> {
        let order = self.orders.get_by_id(order_id).await?;
        if order.lot_id.is_none() {
            return Err(PreOrderError::NotPreOrder(order_id));
        }
        if deposit_amount <= 0 || deposit_amount > order.total_amount {
            return Err(PreOrderError::InvalidDeposit(format!(
                "deposit {} must be between 1 and the order total {}",
                deposit_amount, order.total_amount
            )));
        }

        let wallet = PaymentWallet::new(
            order.id,
            &order.customer_email,
            deposit_amount,
            order.total_amount - deposit_amount,
            now,
        );

        let mut saga = Saga::new("open_wallet");
        let wallets = self.wallets.clone();
        let wallet_id = wallet.id;
        let wallet = saga
            .step("create_wallet", self.wallets.create(wallet), move || async move {
                wallets.delete(wallet_id).await
            })
            .await?;
        self.append_entry(
            &mut saga,
            WalletTransaction::new(wallet.id, TransactionKind::Deposit, deposit_amount, None),
        )
        .await?;
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                actor,
                "wallet_opened",
                PaymentWallet::NAME,
                wallet.id,
                json!({ "order_id": order.id, "deposit": deposit_amount }),
            )),
        )
        .await?;
        saga.commit();

        info!(order_id = %order.id, wallet_id = %wallet.id, deposit = deposit_amount, "Pre-order wallet opened");
        Ok(wallet)
    }

    /// Refund the customer would receive when cancelling at `now`
    pub async fn refund_quote(
        &self,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RefundQuote, PreOrderError> {
        let (_, lot, wallet) = self.load_preorder(order_id).await?;
        let settings = PreOrderSetting::load(&self.settings).await?;
        Ok(refund::calculate_refund(
            wallet.deposit_amount,
            lot.harvest_date,
            now,
            &settings.refund_tiers,
        ))
    }

    /// Cancel a held pre-order and refund according to the notice period
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<PreOrderCancellation, PreOrderError> {
        let (order, lot, wallet) = self.load_preorder(order_id).await?;
        ensure_held(&wallet)?;

        let settings = PreOrderSetting::load(&self.settings).await?;
        let quote = refund::calculate_refund(
            wallet.deposit_amount,
            lot.harvest_date,
            now,
            &settings.refund_tiers,
        );

        let cancellation = PreOrderCancellation {
            id: Uuid::new_v4(),
            order_id: order.id,
            wallet_id: wallet.id,
            reason: reason.trim().to_string(),
            days_before_harvest: quote.days_before_harvest,
            refund_percent: quote.refund_percent,
            refund_amount: quote.refund_amount,
            tier_label: quote.tier_label.clone(),
            cancelled_by: actor.to_string(),
            created_at: now,
            updated_at: now,
        };

        let previous_wallet = wallet.clone();
        let mut refunded = wallet;
        refunded.refunded_amount = quote.refund_amount;
        // Nothing to return means the deposit is forfeited to the seller
        refunded.status = if quote.refund_amount > 0 {
            WalletStatus::Refunded
        } else {
            WalletStatus::Released
        };

        let previous_order = order.clone();
        let mut cancelled = order;
        cancelled.status = OrderStatus::Cancelled;

        let mut saga = Saga::new("cancel_preorder");
        let cancellations = self.cancellations.clone();
        let cancellation_id = cancellation.id;
        let cancellation = saga
            .step(
                "create_cancellation",
                self.cancellations.create(cancellation),
                move || async move { cancellations.delete(cancellation_id).await },
            )
            .await?;
        let wallets = self.wallets.clone();
        let refunded = saga
            .step("refund_wallet", self.wallets.save(&refunded), move || async move {
                wallets.save(&previous_wallet).await.map(|_| ())
            })
            .await?;
        let orders = self.orders.clone();
        saga.step("cancel_order", self.orders.save(&cancelled), move || async move {
            orders.save(&previous_order).await.map(|_| ())
        })
        .await?;
        if quote.refund_amount > 0 {
            self.append_entry(
                &mut saga,
                WalletTransaction::new(
                    refunded.id,
                    TransactionKind::Refund,
                    quote.refund_amount,
                    Some(quote.tier_label.clone()),
                ),
            )
            .await?;
        }
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                actor,
                "preorder_cancelled",
                Order::NAME,
                cancelled.id,
                json!({
                    "reason": cancellation.reason,
                    "days_before_harvest": quote.days_before_harvest,
                    "refund_percent": quote.refund_percent,
                    "refund_amount": quote.refund_amount,
                }),
            )),
        )
        .await?;
        saga.commit();

        info!(
            order_id = %cancelled.id,
            days_before_harvest = quote.days_before_harvest,
            refund = quote.refund_amount,
            "Pre-order cancelled"
        );

        self.cache.invalidate(&keys::order(cancelled.id)).await;
        self.notifications
            .notify(
                Recipient::user(&cancelled.customer_email),
                NotificationKind::PreOrder,
                "Pre-order cancelled",
                &format!(
                    "Order {} was cancelled. Refund: {} ({})",
                    cancelled.order_number, quote.refund_amount, quote.tier_label
                ),
            )
            .await;

        Ok(cancellation)
    }

    /// Release a held deposit once the order is fulfilled
    pub async fn release_wallet(
        &self,
        order_id: Uuid,
        actor: &str,
    ) -> Result<PaymentWallet, PreOrderError> {
        let wallet = PaymentWallet::find_by_order(&self.wallets, order_id)
            .await?
            .ok_or(PreOrderError::WalletMissing(order_id))?;
        ensure_held(&wallet)?;

        let previous = wallet.clone();
        let mut released = wallet;
        released.status = WalletStatus::Released;

        let mut saga = Saga::new("release_wallet");
        let wallets = self.wallets.clone();
        let released = saga
            .step("release_wallet", self.wallets.save(&released), move || async move {
                wallets.save(&previous).await.map(|_| ())
            })
            .await?;
        self.append_entry(
            &mut saga,
            WalletTransaction::new(
                released.id,
                TransactionKind::Release,
                released.deposit_amount,
                None,
            ),
        )
        .await?;
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                actor,
                "wallet_released",
                PaymentWallet::NAME,
                released.id,
                json!({ "order_id": order_id, "amount": released.deposit_amount }),
            )),
        )
        .await?;
        saga.commit();

        self.cache.invalidate(&keys::order(order_id)).await;
        Ok(released)
    }

    pub async fn wallet_statement(&self, order_id: Uuid) -> Result<WalletStatement, PreOrderError> {
        let wallet = PaymentWallet::find_by_order(&self.wallets, order_id)
            .await?
            .ok_or(PreOrderError::WalletMissing(order_id))?;
        let transactions = WalletTransaction::find_by_wallet(&self.transactions, wallet.id).await?;
        Ok(WalletStatement {
            wallet,
            transactions,
        })
    }

    /// Move a lot's harvest date back and compensate its held pre-orders
    pub async fn report_delay(
        &self,
        lot_id: Uuid,
        new_harvest_date: NaiveDate,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<LotCompensationReport, PreOrderError> {
        let lot = self.lots.get_by_id(lot_id).await?;
        if new_harvest_date < lot.harvest_date {
            return Err(PreOrderError::InvalidLotUpdate(format!(
                "new harvest date {} is earlier than {}",
                new_harvest_date, lot.harvest_date
            )));
        }

        let mut delayed = lot;
        delayed.harvest_date = new_harvest_date;
        delayed.status = LotStatus::Delayed;
        let delayed = self.lots.save(&delayed).await?;

        let magnitude = compensation::delay_days(delayed.original_harvest_date, new_harvest_date) as f64;
        self.compensate_lot(delayed, CompensationTrigger::Delay, magnitude, actor, now)
            .await
    }

    /// Record the harvested quantity and compensate any shortfall
    pub async fn report_shortage(
        &self,
        lot_id: Uuid,
        actual_quantity: i64,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<LotCompensationReport, PreOrderError> {
        if actual_quantity < 0 {
            return Err(PreOrderError::InvalidLotUpdate(
                "actual quantity cannot be negative".to_string(),
            ));
        }
        let lot = self.lots.get_by_id(lot_id).await?;

        let mut harvested = lot;
        harvested.actual_quantity = Some(actual_quantity);
        harvested.status = if actual_quantity < harvested.expected_quantity {
            LotStatus::Short
        } else {
            LotStatus::Harvested
        };
        let harvested = self.lots.save(&harvested).await?;

        let magnitude = compensation::shortage_percent(harvested.expected_quantity, actual_quantity);
        self.compensate_lot(harvested, CompensationTrigger::Shortage, magnitude, actor, now)
            .await
    }

    pub async fn get_settings(&self) -> Result<PreOrderSetting, PreOrderError> {
        Ok(PreOrderSetting::load(&self.settings).await?)
    }

    pub async fn update_settings(
        &self,
        setting: PreOrderSetting,
        actor: &str,
    ) -> Result<PreOrderSetting, PreOrderError> {
        validate_policy(&setting).map_err(PreOrderError::InvalidSettings)?;
        let saved = PreOrderSetting::store(&self.settings, setting).await?;
        self.audit
            .create(AuditLog::new(
                actor,
                "settings_updated",
                PreOrderSetting::NAME,
                saved.id,
                json!({
                    "refund_tiers": saved.refund_tiers.len(),
                    "compensation_rules": saved.compensation_rules.len(),
                }),
            ))
            .await?;
        Ok(saved)
    }

    async fn compensate_lot(
        &self,
        lot: ProductLot,
        trigger: CompensationTrigger,
        magnitude: f64,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<LotCompensationReport, PreOrderError> {
        let settings = PreOrderSetting::load(&self.settings).await?;
        let rule = compensation::match_rule(trigger, magnitude, &settings.compensation_rules).cloned();

        let mut report = LotCompensationReport {
            lot,
            trigger,
            magnitude,
            rule: rule.clone(),
            compensations: Vec::new(),
            skipped: 0,
            failed: 0,
        };
        let Some(rule) = rule else {
            debug!(lot_id = %report.lot.id, %trigger, magnitude, "No compensation rule matched");
            self.cache.invalidate(&keys::lot(report.lot.id)).await;
            return Ok(report);
        };

        let orders = Order::find_by_lot(&self.orders, report.lot.id).await?;
        for order in orders {
            if order.status == OrderStatus::Cancelled {
                continue;
            }
            let Some(wallet) = PaymentWallet::find_by_order(&self.wallets, order.id).await? else {
                continue;
            };
            if wallet.status != WalletStatus::Held {
                continue;
            }
            if AutoCompensation::find_for_order(&self.compensations, order.id, trigger)
                .await?
                .is_some()
            {
                report.skipped += 1;
                continue;
            }

            match self
                .compensate_order(&order, wallet, &report.lot, &rule, magnitude, &settings, actor, now)
                .await
            {
                Ok(record) => report.compensations.push(record),
                Err(e) => {
                    report.failed += 1;
                    warn!(order_id = %order.id, error = %e, "Automatic compensation failed");
                }
            }
        }

        info!(
            lot_id = %report.lot.id,
            %trigger,
            magnitude,
            compensated = report.compensations.len(),
            skipped = report.skipped,
            failed = report.failed,
            "Lot compensation finished"
        );
        self.cache.invalidate(&keys::lot(report.lot.id)).await;
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn compensate_order(
        &self,
        order: &Order,
        wallet: PaymentWallet,
        lot: &ProductLot,
        rule: &CompensationRule,
        magnitude: f64,
        settings: &PreOrderSetting,
        actor: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<AutoCompensation> {
        let quote = compensation::apply(rule, wallet.order_value(), now, settings.voucher_valid_days);
        let record = AutoCompensation {
            id: Uuid::new_v4(),
            order_id: order.id,
            wallet_id: wallet.id,
            lot_id: lot.id,
            trigger: rule.trigger,
            magnitude,
            value: quote.value.clone(),
            amount: quote.amount,
            voucher_code: quote.voucher_code.clone(),
            voucher_expires_at: quote.voucher_expires_at,
            created_at: now,
            updated_at: now,
        };

        let mut saga = Saga::new("auto_compensation");
        let compensations = self.compensations.clone();
        let record_id = record.id;
        let record = saga
            .step("create_compensation", self.compensations.create(record), move || async move {
                compensations.delete(record_id).await
            })
            .await?;
        // Vouchers are redeemed later and never touch the escrow balance
        if !quote.is_voucher() && quote.amount > 0 {
            let previous = wallet.clone();
            let mut credited = wallet;
            credited.compensated_amount += quote.amount;
            let wallets = self.wallets.clone();
            saga.step("credit_wallet", self.wallets.save(&credited), move || async move {
                wallets.save(&previous).await.map(|_| ())
            })
            .await?;
            self.append_entry(
                &mut saga,
                WalletTransaction::new(
                    credited.id,
                    TransactionKind::Compensation,
                    quote.amount,
                    Some(format!("{} compensation", rule.trigger)),
                ),
            )
            .await?;
        }
        saga.last(
            "audit",
            self.audit.create(AuditLog::new(
                actor,
                "compensation_granted",
                AutoCompensation::NAME,
                record.id,
                json!({
                    "order_id": order.id,
                    "lot_id": lot.id,
                    "trigger": rule.trigger,
                    "magnitude": magnitude,
                    "amount": quote.amount,
                    "voucher_code": quote.voucher_code,
                }),
            )),
        )
        .await?;
        saga.commit();

        self.cache.invalidate(&keys::order(order.id)).await;
        let message = match &record.voucher_code {
            Some(code) => format!(
                "Lot {} is affected. Voucher {} worth {} has been issued for order {}",
                lot.lot_code, code, record.amount, order.order_number
            ),
            None => format!(
                "Lot {} is affected. {} has been credited to order {}",
                lot.lot_code, record.amount, order.order_number
            ),
        };
        self.notifications
            .notify(
                Recipient::user(&order.customer_email),
                NotificationKind::Compensation,
                "Pre-order compensation",
                &message,
            )
            .await;

        Ok(record)
    }

    async fn load_preorder(
        &self,
        order_id: Uuid,
    ) -> Result<(Order, ProductLot, PaymentWallet), PreOrderError> {
        let order = self.orders.get_by_id(order_id).await?;
        let lot_id = order.lot_id.ok_or(PreOrderError::NotPreOrder(order_id))?;
        let lot = self.lots.get_by_id(lot_id).await?;
        let wallet = PaymentWallet::find_by_order(&self.wallets, order_id)
            .await?
            .ok_or(PreOrderError::WalletMissing(order_id))?;
        Ok((order, lot, wallet))
    }

    /// Append a ledger entry; rolling back appends its reversal
    async fn append_entry(
        &self,
        saga: &mut Saga,
        entry: WalletTransaction,
    ) -> RepoResult<WalletTransaction> {
        let transactions = self.transactions.clone();
        let reversal = entry.reversal();
        let step = format!("append_{}", entry.kind);
        saga.step(&step, self.transactions.create(entry), move || async move {
            transactions.create(reversal).await.map(|_| ())
        })
        .await
    }
}

fn ensure_held(wallet: &PaymentWallet) -> Result<(), PreOrderError> {
    if wallet.status != WalletStatus::Held {
        return Err(PreOrderError::WalletNotHeld {
            order_id: wallet.order_id,
            status: wallet.status,
        });
    }
    Ok(())
}

/// Refund tiers need distinct non-negative thresholds. Compensation rules
/// are matched first-hit, so each trigger's thresholds must descend.
fn validate_policy(setting: &PreOrderSetting) -> Result<(), String> {
    setting.validate()?;
    if setting.refund_tiers.is_empty() {
        return Err("at least one refund tier is required".to_string());
    }
    let mut seen = HashSet::new();
    for tier in &setting.refund_tiers {
        if tier.min_days_before_harvest < 0 {
            return Err(format!("refund tier '{}' has a negative threshold", tier.label));
        }
        if !seen.insert(tier.min_days_before_harvest) {
            return Err(format!(
                "duplicate refund threshold of {} days",
                tier.min_days_before_harvest
            ));
        }
    }

    for trigger in [CompensationTrigger::Delay, CompensationTrigger::Shortage] {
        let thresholds: Vec<f64> = setting
            .compensation_rules
            .iter()
            .filter(|r| r.trigger == trigger)
            .map(|r| r.min_magnitude)
            .collect();
        if thresholds.windows(2).any(|w| w[1] >= w[0]) {
            return Err(format!(
                "{} rules must be ordered from the highest threshold down",
                trigger
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use db::{
        DBService,
        models::auto_compensation::CompensationValue,
    };

    use super::*;
    use crate::services::{
        cache::NoopInvalidator, notification::TracingSender, referral_admin::ReferralAdminService,
    };

    struct Fixture {
        store: Arc<dyn EntityStore>,
        service: PreOrderService,
        orders: Repository<Order>,
        lots: Repository<ProductLot>,
        wallets: Repository<PaymentWallet>,
    }

    async fn fixture() -> Fixture {
        let db = DBService::new_in_memory().await.unwrap();
        let store = db.store();
        let notifications = NotificationService::new(store.clone(), Arc::new(TracingSender));
        Fixture {
            store: store.clone(),
            service: PreOrderService::new(store.clone(), notifications, Arc::new(NoopInvalidator)),
            orders: Repository::new(store.clone()),
            lots: Repository::new(store.clone()),
            wallets: Repository::new(store),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    async fn lot(fx: &Fixture, code: &str, days_out: i64) -> ProductLot {
        let harvest = now().date_naive() + Duration::days(days_out);
        fx.lots
            .create(ProductLot::new(Uuid::new_v4(), code, harvest, 1_000, now()))
            .await
            .unwrap()
    }

    /// Pre-order worth 1,000,000 with a 300,000 deposit held
    async fn preorder(fx: &Fixture, lot: &ProductLot, number: &str) -> Order {
        let order = fx
            .orders
            .create(Order::new(number, "khach@example.vn", 1_000_000, None, Some(lot.id), now()))
            .await
            .unwrap();
        fx.service
            .open_wallet(order.id, 300_000, "shop", now())
            .await
            .unwrap();
        order
    }

    #[tokio::test]
    async fn test_lots_require_preorder_products() {
        let fx = fixture().await;
        let harvest = now().date_naive() + Duration::days(20);
        let products: Repository<Product> = Repository::new(fx.store.clone());

        let mango = products
            .create_from_value(serde_json::json!({
                "name": "Xoai cat Hoa Loc",
                "price": 120_000,
                "stock": 0,
                "is_preorder": true,
            }))
            .await
            .unwrap();
        let lot = fx
            .service
            .create_lot(mango.id, "XOAI-2025-06", harvest, 500, now())
            .await
            .unwrap();
        assert_eq!(lot.original_harvest_date, harvest);
        assert_eq!(lot.status, LotStatus::Open);

        let rice = products
            .create_from_value(serde_json::json!({
                "name": "Gao ST25",
                "price": 40_000,
                "stock": 100,
                "is_preorder": false,
            }))
            .await
            .unwrap();
        let err = fx
            .service
            .create_lot(rice.id, "GAO-1", harvest, 100, now())
            .await
            .unwrap_err();
        assert!(matches!(err, PreOrderError::ProductNotPreOrder(_)));
    }

    #[tokio::test]
    async fn test_cancel_ten_days_out_refunds_everything() {
        let fx = fixture().await;
        let lot = lot(&fx, "LOT-10", 10).await;
        let order = preorder(&fx, &lot, "PO-1").await;

        let cancellation = fx
            .service
            .cancel_order(order.id, "changed my mind", "khach@example.vn", now())
            .await
            .unwrap();
        assert_eq!(cancellation.refund_percent, 100.0);
        assert_eq!(cancellation.refund_amount, 300_000);
        assert_eq!(cancellation.days_before_harvest, 10);

        let statement = fx.service.wallet_statement(order.id).await.unwrap();
        assert_eq!(statement.wallet.status, WalletStatus::Refunded);
        assert_eq!(statement.wallet.refunded_amount, 300_000);
        let kinds: Vec<TransactionKind> = statement.transactions.iter().map(|t| t.kind).collect();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&TransactionKind::Deposit));
        assert!(kinds.contains(&TransactionKind::Refund));

        let order = fx.orders.get_by_id(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_five_days_out_refunds_half() {
        let fx = fixture().await;
        let lot = lot(&fx, "LOT-5", 5).await;
        let order = preorder(&fx, &lot, "PO-2").await;

        let quote = fx.service.refund_quote(order.id, now()).await.unwrap();
        assert_eq!(quote.refund_amount, 150_000);

        let cancellation = fx
            .service
            .cancel_order(order.id, "travel", "khach@example.vn", now())
            .await
            .unwrap();
        assert_eq!(cancellation.refund_percent, 50.0);
        assert_eq!(cancellation.refund_amount, 150_000);
    }

    #[tokio::test]
    async fn test_cancel_one_day_out_forfeits_deposit() {
        let fx = fixture().await;
        let lot = lot(&fx, "LOT-1", 1).await;
        let order = preorder(&fx, &lot, "PO-3").await;

        let cancellation = fx
            .service
            .cancel_order(order.id, "too late", "khach@example.vn", now())
            .await
            .unwrap();
        assert_eq!(cancellation.refund_amount, 0);

        let statement = fx.service.wallet_statement(order.id).await.unwrap();
        assert_eq!(statement.wallet.status, WalletStatus::Released);
        assert_eq!(statement.transactions.len(), 1);

        let err = fx
            .service
            .cancel_order(order.id, "again", "khach@example.vn", now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PreOrderError::WalletNotHeld { status: WalletStatus::Released, .. }
        ));
    }

    #[tokio::test]
    async fn test_open_wallet_validation() {
        let fx = fixture().await;
        let plain = fx
            .orders
            .create(Order::new("SO-1", "khach@example.vn", 500_000, None, None, now()))
            .await
            .unwrap();
        let err = fx.service.open_wallet(plain.id, 100_000, "shop", now()).await.unwrap_err();
        assert!(matches!(err, PreOrderError::NotPreOrder(_)));

        let lot = lot(&fx, "LOT-X", 10).await;
        let order = fx
            .orders
            .create(Order::new("PO-X", "khach@example.vn", 500_000, None, Some(lot.id), now()))
            .await
            .unwrap();
        let err = fx.service.open_wallet(order.id, 600_000, "shop", now()).await.unwrap_err();
        assert!(matches!(err, PreOrderError::InvalidDeposit(_)));

        fx.service.open_wallet(order.id, 100_000, "shop", now()).await.unwrap();
        let err = fx.service.open_wallet(order.id, 100_000, "shop", now()).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::DuplicateEntry);
    }

    #[tokio::test]
    async fn test_release_wallet() {
        let fx = fixture().await;
        let lot = lot(&fx, "LOT-R", 10).await;
        let order = preorder(&fx, &lot, "PO-R").await;

        let wallet = fx.service.release_wallet(order.id, "shop").await.unwrap();
        assert_eq!(wallet.status, WalletStatus::Released);

        let err = fx.service.release_wallet(order.id, "shop").await.unwrap_err();
        assert!(matches!(err, PreOrderError::WalletNotHeld { .. }));

        let err = fx.service.release_wallet(Uuid::new_v4(), "shop").await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_eight_day_delay_credits_percent_once() {
        let fx = fixture().await;
        let lot = lot(&fx, "LOT-D", 10).await;
        let order = preorder(&fx, &lot, "PO-D").await;

        let new_date = lot.harvest_date + Duration::days(8);
        let report = fx
            .service
            .report_delay(lot.id, new_date, "farm", now())
            .await
            .unwrap();
        assert_eq!(report.magnitude, 8.0);
        assert_eq!(report.lot.status, LotStatus::Delayed);
        assert_eq!(report.compensations.len(), 1);
        assert_eq!(report.compensations[0].value, CompensationValue::Percent { percent: 10.0 });
        assert_eq!(report.compensations[0].amount, 100_000);

        let wallet = PaymentWallet::find_by_order(&fx.wallets, order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(wallet.compensated_amount, 100_000);

        let again = fx
            .service
            .report_delay(lot.id, new_date, "farm", now())
            .await
            .unwrap();
        assert!(again.compensations.is_empty());
        assert_eq!(again.skipped, 1);
    }

    #[tokio::test]
    async fn test_long_delay_issues_voucher_without_touching_wallet() {
        let fx = fixture().await;
        let lot = lot(&fx, "LOT-V", 10).await;
        let order = preorder(&fx, &lot, "PO-V").await;

        let report = fx
            .service
            .report_delay(lot.id, lot.harvest_date + Duration::days(15), "farm", now())
            .await
            .unwrap();
        let granted = &report.compensations[0];
        assert_eq!(granted.amount, 200_000);
        assert!(granted.voucher_code.as_deref().is_some_and(|c| c.starts_with("VC-")));
        assert_eq!(granted.voucher_expires_at, Some(now() + Duration::days(90)));

        let statement = fx.service.wallet_statement(order.id).await.unwrap();
        assert_eq!(statement.wallet.compensated_amount, 0);
        assert_eq!(statement.transactions.len(), 1);
    }

    #[tokio::test]
    async fn test_short_delay_matches_no_rule() {
        let fx = fixture().await;
        let lot = lot(&fx, "LOT-S", 10).await;
        preorder(&fx, &lot, "PO-S").await;

        let report = fx
            .service
            .report_delay(lot.id, lot.harvest_date + Duration::days(2), "farm", now())
            .await
            .unwrap();
        assert!(report.rule.is_none());
        assert!(report.compensations.is_empty());

        let err = fx
            .service
            .report_delay(lot.id, lot.harvest_date - Duration::days(1), "farm", now())
            .await
            .unwrap_err();
        assert!(matches!(err, PreOrderError::InvalidLotUpdate(_)));
    }

    #[tokio::test]
    async fn test_shortage_skips_cancelled_orders() {
        let fx = fixture().await;
        let lot = lot(&fx, "LOT-Q", 10).await;
        let kept = preorder(&fx, &lot, "PO-Q1").await;
        let dropped = preorder(&fx, &lot, "PO-Q2").await;
        fx.service
            .cancel_order(dropped.id, "no longer needed", "khach@example.vn", now())
            .await
            .unwrap();

        let report = fx
            .service
            .report_shortage(lot.id, 600, "farm", now())
            .await
            .unwrap();
        assert_eq!(report.magnitude, 40.0);
        assert_eq!(report.lot.status, LotStatus::Short);
        assert_eq!(report.compensations.len(), 1);
        assert_eq!(report.compensations[0].order_id, kept.id);
        assert_eq!(report.compensations[0].amount, 200_000);
    }

    #[tokio::test]
    async fn test_settings_reject_shadowed_rules() {
        let fx = fixture().await;
        let mut settings = fx.service.get_settings().await.unwrap();
        settings.compensation_rules.swap(0, 2);

        let err = fx.service.update_settings(settings, "admin").await.unwrap_err();
        assert!(matches!(err, PreOrderError::InvalidSettings(_)));

        let mut settings = fx.service.get_settings().await.unwrap();
        settings.voucher_valid_days = 30;
        let saved = fx.service.update_settings(settings, "admin").await.unwrap();
        assert_eq!(saved.voucher_valid_days, 30);
        assert_eq!(fx.service.get_settings().await.unwrap().voucher_valid_days, 30);
    }

    #[tokio::test]
    async fn test_settings_bound_voucher_lifetime() {
        let fx = fixture().await;
        let mut settings = fx.service.get_settings().await.unwrap();
        settings.voucher_valid_days = 100_000_000;

        let err = fx.service.update_settings(settings, "admin").await.unwrap_err();
        assert!(matches!(err, PreOrderError::InvalidSettings(_)));
        assert_eq!(fx.service.get_settings().await.unwrap().voucher_valid_days, 90);
    }

    #[tokio::test]
    async fn test_both_settings_singletons_share_one_database() {
        let fx = fixture().await;
        let notifications = NotificationService::new(fx.store.clone(), Arc::new(TracingSender));
        let admin = ReferralAdminService::new(fx.store.clone(), notifications, Arc::new(NoopInvalidator));

        let preorder = fx.service.get_settings().await.unwrap();
        fx.service.update_settings(preorder, "admin").await.unwrap();
        let mut referral = admin.get_settings().await.unwrap();
        referral.auto_approve_members = true;
        admin.update_settings(referral, "admin").await.unwrap();

        let mut preorder = fx.service.get_settings().await.unwrap();
        preorder.voucher_valid_days = 60;
        fx.service.update_settings(preorder, "admin").await.unwrap();

        assert!(admin.get_settings().await.unwrap().auto_approve_members);
        assert_eq!(fx.service.get_settings().await.unwrap().voucher_valid_days, 60);
    }
}
