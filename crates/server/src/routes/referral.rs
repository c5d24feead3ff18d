//! Routes for the referral program: members, commissions, ranks and settings.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json as ResponseJson,
    routing::{get, post, put},
};
use chrono::Utc;
use db::models::{
    customer::Customer,
    order::Order,
    referral_event::ReferralEvent,
    referral_member::{CreateReferralMember, MemberStatus, ReferralMember},
    referral_setting::ReferralSetting,
};
use serde::{Deserialize, Serialize};
use services::services::{
    referral_admin::{PayoutReceipt, ReferralDashboard},
    referral_commission::{CommissionOutcome, MemberCommissionSummary},
    referral_rank::{RankEvaluation, RankSweepReport},
};
use tracing::warn;
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use super::actor;
use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct MemberListQuery {
    pub status: Option<MemberStatus>,
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct CustomRateRequest {
    pub rate: Option<f64>,
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct AttributeCustomerRequest {
    pub email: String,
    pub full_name: String,
    pub referral_code: String,
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct CreateOrder {
    pub order_number: String,
    pub customer_email: String,
    pub total_amount: i64,
    pub referral_code: Option<String>,
    pub lot_id: Option<Uuid>,
}

/// A stored order and what happened to its referral commission
#[derive(Debug, Serialize, TS)]
#[ts(export)]
pub struct OrderReceipt {
    pub order: Order,
    pub commission: Option<CommissionOutcome>,
    pub commission_error: Option<String>,
}

/// Register a member, optionally under a referrer's code
pub async fn register_member(
    State(state): State<AppState>,
    Json(payload): Json<CreateReferralMember>,
) -> Result<ResponseJson<ApiResponse<ReferralMember>>, ApiError> {
    let member = state.admin.register_member(payload, Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn list_members(
    State(state): State<AppState>,
    Query(query): Query<MemberListQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<ReferralMember>>>, ApiError> {
    let members = state.admin.list_members(query.status).await?;
    Ok(ResponseJson(ApiResponse::success(members)))
}

pub async fn get_member_summary(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<MemberCommissionSummary>>, ApiError> {
    let summary = state.commission.member_summary(member_id, Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success(summary)))
}

pub async fn approve_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(member_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ReferralMember>>, ApiError> {
    let member = state.admin.approve(member_id, &actor(&headers)).await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn suspend_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(member_id): Path<Uuid>,
    Json(payload): Json<ReasonRequest>,
) -> Result<ResponseJson<ApiResponse<ReferralMember>>, ApiError> {
    if payload.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("a suspension reason is required".to_string()));
    }
    let member = state
        .admin
        .suspend(member_id, payload.reason.trim(), &actor(&headers))
        .await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn reactivate_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(member_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ReferralMember>>, ApiError> {
    let member = state.admin.reactivate(member_id, &actor(&headers)).await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn set_custom_rate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(member_id): Path<Uuid>,
    Json(payload): Json<CustomRateRequest>,
) -> Result<ResponseJson<ApiResponse<ReferralMember>>, ApiError> {
    let member = state
        .admin
        .set_custom_rate(member_id, payload.rate, &actor(&headers))
        .await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn payout_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(member_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<PayoutReceipt>>, ApiError> {
    let receipt = state
        .admin
        .payout(member_id, &actor(&headers), Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(receipt)))
}

pub async fn evaluate_member_rank(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(member_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<RankEvaluation>>, ApiError> {
    let evaluation = state
        .ranks
        .evaluate_member(member_id, &actor(&headers), Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(evaluation)))
}

/// Run rank progression for every active member now
pub async fn evaluate_all_ranks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<ResponseJson<ApiResponse<RankSweepReport>>, ApiError> {
    let report = state.ranks.evaluate_all(&actor(&headers), Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

pub async fn attribute_customer(
    State(state): State<AppState>,
    Json(payload): Json<AttributeCustomerRequest>,
) -> Result<ResponseJson<ApiResponse<Customer>>, ApiError> {
    let customer = state
        .commission
        .attribute_customer(&payload.email, &payload.full_name, &payload.referral_code, Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(customer)))
}

/// Store an order and accrue its referral commission. A commission failure
/// does not reject the order.
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrder>,
) -> Result<ResponseJson<ApiResponse<OrderReceipt>>, ApiError> {
    let now = Utc::now();
    let order = state
        .orders
        .create(Order::new(
            &payload.order_number,
            &payload.customer_email,
            payload.total_amount,
            payload.referral_code,
            payload.lot_id,
            now,
        ))
        .await?;

    let (commission, commission_error) = match state.commission.process_order(&order, now).await {
        Ok(outcome) => (Some(outcome), None),
        Err(e) => {
            warn!(order_id = %order.id, error = %e, "Commission not recorded for order");
            (None, Some(e.to_string()))
        }
    };

    Ok(ResponseJson(ApiResponse::success(OrderReceipt {
        order,
        commission,
        commission_error,
    })))
}

pub async fn mark_event_fraudulent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(event_id): Path<Uuid>,
    Json(payload): Json<ReasonRequest>,
) -> Result<ResponseJson<ApiResponse<ReferralEvent>>, ApiError> {
    let event = state
        .admin
        .mark_event_fraudulent(event_id, &payload.reason, &actor(&headers))
        .await?;
    Ok(ResponseJson(ApiResponse::success(event)))
}

pub async fn get_settings(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<ReferralSetting>>, ApiError> {
    let settings = state.admin.get_settings().await?;
    Ok(ResponseJson(ApiResponse::success(settings)))
}

pub async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ReferralSetting>,
) -> Result<ResponseJson<ApiResponse<ReferralSetting>>, ApiError> {
    let settings = state.admin.update_settings(payload, &actor(&headers)).await?;
    Ok(ResponseJson(ApiResponse::success(settings)))
}

pub async fn get_dashboard(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<ReferralDashboard>>, ApiError> {
    let dashboard = state.admin.dashboard().await?;
    Ok(ResponseJson(ApiResponse::success(dashboard)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/referral",
        Router::new()
            .route("/members", post(register_member).get(list_members))
            .route("/members/{member_id}/summary", get(get_member_summary))
            .route("/members/{member_id}/approve", post(approve_member))
            .route("/members/{member_id}/suspend", post(suspend_member))
            .route("/members/{member_id}/reactivate", post(reactivate_member))
            .route("/members/{member_id}/custom-rate", put(set_custom_rate))
            .route("/members/{member_id}/payout", post(payout_member))
            .route("/members/{member_id}/evaluate-rank", post(evaluate_member_rank))
            .route("/ranks/evaluate", post(evaluate_all_ranks))
            .route("/customers", post(attribute_customer))
            .route("/orders", post(create_order))
            .route("/events/{event_id}/fraudulent", post(mark_event_fraudulent))
            .route("/settings", get(get_settings).put(update_settings))
            .route("/dashboard", get(get_dashboard)),
    )
}
