use crate::auth::OptionalCustomer;
use crate::handlers::common::{success_response, validate_input};
use crate::{
    errors::ApiError,
    services::commerce::{CartPriceRequest, PriceRequest},
    AppState,
};
use axum::{
    extract::{Json, State},
    response::Response,
    routing::post,
    Router,
};

/// Creates the router for pricing endpoints
pub fn pricing_routes() -> Router<AppState> {
    Router::new()
        .route("/calculate", post(calculate_price))
        .route("/cart", post(calculate_cart))
}

/// Prices one product line for the signed-in customer, or a guest.
async fn calculate_price(
    State(state): State<AppState>,
    OptionalCustomer(user_id): OptionalCustomer,
    Json(payload): Json<PriceRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let result = state
        .services
        .pricing
        .calculate_price(&payload, user_id)
        .await?;
    Ok(success_response(result))
}

async fn calculate_cart(
    State(state): State<AppState>,
    OptionalCustomer(user_id): OptionalCustomer,
    Json(payload): Json<CartPriceRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;
    let result = state
        .services
        .pricing
        .calculate_cart_total(&payload, user_id)
        .await?;
    Ok(success_response(result))
}
