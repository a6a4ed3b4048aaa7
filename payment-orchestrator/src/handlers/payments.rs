use crate::dtos::{CreatePaymentRequest, CreatePaymentResponse, OrderView, RefundOrderRequest};
use crate::error::{PaymentError, PaymentResult};
use crate::middleware::CallerContext;
use crate::models::{Order, ProviderType};
use crate::services::SubmitOrder;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

/// Loads an order that belongs to the caller. Other users' orders are
/// reported as missing.
async fn owned_order(state: &AppState, caller: &CallerContext, order_no: &str) -> PaymentResult<Order> {
    let order = state.orders.get(order_no).await?;
    if order.user_id != caller.user_id {
        return Err(PaymentError::NotFound(format!("order {}", order_no)));
    }
    Ok(order)
}

pub async fn create_payment(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(payload): Json<CreatePaymentRequest>,
) -> PaymentResult<impl IntoResponse> {
    let provider: ProviderType = payload.provider.parse()?;

    let receipt = state
        .orders
        .submit(SubmitOrder {
            item_ref: payload.item_ref,
            provider,
            user_id: caller.user_id,
            terminal: payload.terminal,
        })
        .await?;

    let redirect = state
        .orders
        .create_payment(&receipt.order_no, payload.correlation_tag)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatePaymentResponse {
            order_id: receipt.order_id,
            order_no: receipt.order_no,
            order_amount: receipt.order_amount,
            redirect_url: redirect.url,
            params: redirect.params,
        }),
    ))
}

pub async fn get_order(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(order_no): Path<String>,
) -> PaymentResult<Json<OrderView>> {
    let order = owned_order(&state, &caller, &order_no).await?;
    Ok(Json(order.into()))
}

/// Asks the gateway about a pending order and applies a confirmed payment.
pub async fn query_order(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(order_no): Path<String>,
) -> PaymentResult<Json<OrderView>> {
    owned_order(&state, &caller, &order_no).await?;
    let order = state.orders.reconcile(&order_no).await?;
    Ok(Json(order.into()))
}

pub async fn close_order(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(order_no): Path<String>,
) -> PaymentResult<impl IntoResponse> {
    owned_order(&state, &caller, &order_no).await?;
    let report = state.orders.close(&order_no).await?;
    Ok(Json(serde_json::json!({
        "order": OrderView::from(report.order),
        "provider": report.provider,
    })))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(order_no): Path<String>,
) -> PaymentResult<Json<OrderView>> {
    owned_order(&state, &caller, &order_no).await?;
    let order = state.orders.cancel(&order_no).await?;
    Ok(Json(order.into()))
}

pub async fn refund_order(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(order_no): Path<String>,
    payload: Option<Json<RefundOrderRequest>>,
) -> PaymentResult<Json<OrderView>> {
    owned_order(&state, &caller, &order_no).await?;
    let reason = payload.and_then(|Json(body)| body.reason);
    let order = state.orders.refund(&order_no, reason).await?;
    Ok(Json(order.into()))
}

pub async fn refund_status(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(order_no): Path<String>,
) -> PaymentResult<impl IntoResponse> {
    owned_order(&state, &caller, &order_no).await?;
    let result = state.orders.refund_query(&order_no).await?;
    Ok(Json(result))
}
