use axum::{extract::Request, middleware::Next, response::Response};

use crate::error::ApiError;

pub const TENANT_HEADER: &str = "X-Tenant-Id";
pub const USER_HEADER: &str = "X-User-Id";

/// Tenant and user resolved by the fronting gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
    pub user_id: String,
}

pub async fn tenant_context(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let tenant_id = header_value(&request, TENANT_HEADER)
        .ok_or_else(|| ApiError::Unauthorized("A tenant context is required".to_string()))?;
    let user_id = header_value(&request, USER_HEADER)
        .ok_or_else(|| ApiError::Unauthorized("A user context is required".to_string()))?;

    request
        .extensions_mut()
        .insert(TenantContext { tenant_id, user_id });

    Ok(next.run(request).await)
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
