//! Routes for pre-order escrow, cancellation and lot compensation.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json as ResponseJson,
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};
use db::models::{
    payment_wallet::PaymentWallet, preorder_cancellation::PreOrderCancellation,
    preorder_setting::PreOrderSetting, product::Product, product_lot::ProductLot,
};
use serde::Deserialize;
use services::services::{
    preorder::{LotCompensationReport, WalletStatement},
    refund::RefundQuote,
};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use super::actor;
use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct CreateLot {
    pub product_id: Uuid,
    pub lot_code: String,
    pub harvest_date: NaiveDate,
    pub expected_quantity: i64,
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct OpenWalletRequest {
    pub order_id: Uuid,
    pub deposit_amount: i64,
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub order_id: Uuid,
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct DelayRequest {
    pub new_harvest_date: NaiveDate,
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct ShortageRequest {
    pub actual_quantity: i64,
}

/// Create a product from a raw payload; missing required fields are a
/// validation error
pub async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<ResponseJson<ApiResponse<Product>>, ApiError> {
    let product = state.products.create_from_value(payload).await?;
    Ok(ResponseJson(ApiResponse::success(product)))
}

pub async fn create_lot(
    State(state): State<AppState>,
    Json(payload): Json<CreateLot>,
) -> Result<ResponseJson<ApiResponse<ProductLot>>, ApiError> {
    let lot = state
        .preorders
        .create_lot(
            payload.product_id,
            &payload.lot_code,
            payload.harvest_date,
            payload.expected_quantity,
            Utc::now(),
        )
        .await?;
    Ok(ResponseJson(ApiResponse::success(lot)))
}

pub async fn open_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<OpenWalletRequest>,
) -> Result<ResponseJson<ApiResponse<PaymentWallet>>, ApiError> {
    let wallet = state
        .preorders
        .open_wallet(payload.order_id, payload.deposit_amount, &actor(&headers), Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(wallet)))
}

pub async fn get_wallet(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<WalletStatement>>, ApiError> {
    let statement = state.preorders.wallet_statement(order_id).await?;
    Ok(ResponseJson(ApiResponse::success(statement)))
}

/// Refund the customer would get if they cancelled right now
pub async fn get_refund_quote(
    State(state): State<AppState>,
    Query(query): Query<QuoteQuery>,
) -> Result<ResponseJson<ApiResponse<RefundQuote>>, ApiError> {
    let quote = state.preorders.refund_quote(query.order_id, Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success(quote)))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<ResponseJson<ApiResponse<PreOrderCancellation>>, ApiError> {
    let cancellation = state
        .preorders
        .cancel_order(order_id, &payload.reason, &actor(&headers), Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(cancellation)))
}

pub async fn release_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<PaymentWallet>>, ApiError> {
    let wallet = state
        .preorders
        .release_wallet(order_id, &actor(&headers))
        .await?;
    Ok(ResponseJson(ApiResponse::success(wallet)))
}

pub async fn report_delay(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(lot_id): Path<Uuid>,
    Json(payload): Json<DelayRequest>,
) -> Result<ResponseJson<ApiResponse<LotCompensationReport>>, ApiError> {
    let report = state
        .preorders
        .report_delay(lot_id, payload.new_harvest_date, &actor(&headers), Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

pub async fn report_shortage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(lot_id): Path<Uuid>,
    Json(payload): Json<ShortageRequest>,
) -> Result<ResponseJson<ApiResponse<LotCompensationReport>>, ApiError> {
    let report = state
        .preorders
        .report_shortage(lot_id, payload.actual_quantity, &actor(&headers), Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

pub async fn get_settings(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<PreOrderSetting>>, ApiError> {
    let settings = state.preorders.get_settings().await?;
    Ok(ResponseJson(ApiResponse::success(settings)))
}

pub async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PreOrderSetting>,
) -> Result<ResponseJson<ApiResponse<PreOrderSetting>>, ApiError> {
    let settings = state
        .preorders
        .update_settings(payload, &actor(&headers))
        .await?;
    Ok(ResponseJson(ApiResponse::success(settings)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/products", post(create_product)).nest(
        "/preorders",
        Router::new()
            .route("/lots", post(create_lot))
            .route("/lots/{lot_id}/delay", post(report_delay))
            .route("/lots/{lot_id}/shortage", post(report_shortage))
            .route("/wallets", post(open_wallet))
            .route("/orders/{order_id}/wallet", get(get_wallet))
            .route("/orders/{order_id}/cancel", post(cancel_order))
            .route("/orders/{order_id}/release", post(release_wallet))
            .route("/quote", get(get_refund_quote))
            .route("/settings", get(get_settings).put(update_settings)),
    )
}
