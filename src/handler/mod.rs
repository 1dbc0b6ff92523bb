use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};

use crate::{
    api::AppState,
    auth::{AuthError, Identity},
};

pub mod stream;
pub mod system;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::error!("ApiError: {:?}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Camera went wrong because of an internal error",
        )
            .into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Rejection of a viewer whose identity could not be verified.
pub struct Unauthorized(AuthError);

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            format!("User verification failed: {}", self.0),
        )
            .into_response()
    }
}

/// A request that passed identity verification.
pub struct Viewer(pub Identity);

impl FromRequestParts<AppState> for Viewer {
    type Rejection = Unauthorized;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match state.auth.verify(&parts.headers).await {
            Ok(identity) => Ok(Viewer(identity)),
            Err(e) => {
                log::warn!("rejected {} {}: {}", parts.method, parts.uri, e);
                Err(Unauthorized(e))
            }
        }
    }
}
