//! Customer identity for coupon and pricing endpoints.
//!
//! Sessions are terminated upstream; the gateway forwards the authenticated
//! customer's id in [`CUSTOMER_ID_HEADER`]. Endpoints that record redemptions
//! use [`CustomerContext`], previews use [`OptionalCustomer`].

use crate::errors::ApiError;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::debug;
use uuid::Uuid;

pub const CUSTOMER_ID_HEADER: &str = "x-customer-id";

/// Authenticated customer. Rejects with 401 when no valid id is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomerContext {
    pub customer_id: Uuid,
}

/// Customer id when the caller is signed in, `None` for guests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionalCustomer(pub Option<Uuid>);

fn customer_id_from(parts: &Parts) -> Option<Uuid> {
    let raw = parts.headers.get(CUSTOMER_ID_HEADER)?.to_str().ok()?;
    match Uuid::parse_str(raw.trim()) {
        Ok(id) => Some(id),
        Err(_) => {
            debug!("Ignoring malformed {} header", CUSTOMER_ID_HEADER);
            None
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CustomerContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        customer_id_from(parts)
            .map(|customer_id| CustomerContext { customer_id })
            .ok_or(ApiError::Unauthorized)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for OptionalCustomer
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalCustomer(customer_id_from(parts)))
    }
}
