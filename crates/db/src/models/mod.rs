pub mod audit_log;
pub mod auto_compensation;
pub mod customer;
pub mod notification;
pub mod order;
pub mod payment_wallet;
pub mod preorder_cancellation;
pub mod preorder_setting;
pub mod product;
pub mod product_lot;
pub mod referral_event;
pub mod referral_member;
pub mod referral_setting;
pub mod wallet_transaction;
