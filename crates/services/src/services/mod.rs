pub mod cache;
pub mod codes;
pub mod commission;
pub mod compensation;
pub mod fraud;
pub mod notification;
pub mod preorder;
pub mod rank;
pub mod referral_admin;
pub mod referral_commission;
pub mod referral_rank;
pub mod refund;
pub mod saga;
