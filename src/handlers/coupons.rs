use crate::auth::{CustomerContext, OptionalCustomer};
use crate::handlers::common::{
    created_response, message_response, paginated_response, success_response, validate_input,
    PaginationMeta, PaginationParams,
};
use crate::{
    errors::ApiError,
    services::coupons::{
        ApplyCouponRequest, BulkGenerateInput, CouponView, CreateCouponInput, ListCouponsQuery,
        UpdateCouponInput, UsageView, ValidateCouponRequest,
    },
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::Response,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// Creates the router for coupon endpoints
pub fn coupons_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_coupons).post(create_coupon))
        .route("/validate", post(validate_coupon))
        .route("/apply", post(apply_coupon))
        .route("/bulk-generate", post(bulk_generate))
        .route("/expire", post(expire_coupons))
        .route("/code/:code", get(get_coupon_by_code))
        .route(
            "/:id",
            get(get_coupon).put(update_coupon).delete(delete_coupon),
        )
        .route("/:id/duplicate", post(duplicate_coupon))
        .route("/:id/usage", get(list_coupon_usage))
        .route("/:id/statistics", get(coupon_statistics))
}

async fn list_coupons(
    State(state): State<AppState>,
    Query(query): Query<ListCouponsQuery>,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let limit = state.config.page_size(query.limit);
    let page = state.config.page_number(query.page, limit);

    let (coupons, total) = state.services.coupons.list_coupons(&query, now).await?;
    let items: Vec<CouponView> = coupons
        .into_iter()
        .map(|c| CouponView::from_model(c, now))
        .collect();

    Ok(paginated_response(items, PaginationMeta::new(page, limit, total)))
}

async fn create_coupon(
    State(state): State<AppState>,
    Json(payload): Json<CreateCouponInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let coupon = state.services.coupons.create_coupon(payload).await?;
    Ok(created_response(CouponView::from_model(coupon, Utc::now())))
}

async fn get_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let coupon = state.services.coupons.get_coupon(id).await?;
    Ok(success_response(CouponView::from_model(coupon, Utc::now())))
}

async fn get_coupon_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, ApiError> {
    let coupon = state.services.coupons.get_coupon_by_code(&code).await?;
    Ok(success_response(CouponView::from_model(coupon, Utc::now())))
}

async fn update_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCouponInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let coupon = state.services.coupons.update_coupon(id, payload).await?;
    Ok(success_response(CouponView::from_model(coupon, Utc::now())))
}

async fn delete_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    state.services.coupons.delete_coupon(id).await?;
    Ok(message_response(json!({ "id": id }), "Coupon deleted"))
}

async fn duplicate_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let copy = state.services.coupons.duplicate_coupon(id).await?;
    Ok(created_response(CouponView::from_model(copy, Utc::now())))
}

/// Preview only. A refused coupon is still a 200 with `valid: false`.
async fn validate_coupon(
    State(state): State<AppState>,
    OptionalCustomer(customer_id): OptionalCustomer,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let validation = state
        .services
        .coupons
        .validate_coupon(&payload, customer_id)
        .await?;
    let message = validation.message.clone();
    Ok(message_response(validation, message))
}

async fn apply_coupon(
    State(state): State<AppState>,
    customer: CustomerContext,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let applied = state
        .services
        .coupons
        .apply_coupon(&payload, customer.customer_id)
        .await?;
    let message = applied.message.clone();
    Ok(message_response(applied, message))
}

async fn bulk_generate(
    State(state): State<AppState>,
    Json(payload): Json<BulkGenerateInput>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let now = Utc::now();
    let coupons: Vec<CouponView> = state
        .services
        .coupons
        .bulk_generate(payload)
        .await?
        .into_iter()
        .map(|c| CouponView::from_model(c, now))
        .collect();
    Ok(created_response(coupons))
}

async fn expire_coupons(State(state): State<AppState>) -> Result<Response, ApiError> {
    let expired = state
        .services
        .coupons
        .expire_stale_coupons(Utc::now())
        .await?;
    info!(expired, "Manual coupon expiry sweep");
    Ok(success_response(json!({ "expired": expired })))
}

async fn list_coupon_usage(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> Result<Response, ApiError> {
    let limit = state.config.page_size(params.limit);
    let page = state.config.page_number(params.page, limit);

    let (rows, total) = state
        .services
        .coupons
        .list_usage(id, params.page, params.limit)
        .await?;
    let items: Vec<UsageView> = rows.into_iter().map(UsageView::from).collect();

    Ok(paginated_response(items, PaginationMeta::new(page, limit, total)))
}

async fn coupon_statistics(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let stats = state.services.coupons.statistics(id).await?;
    Ok(success_response(stats))
}
