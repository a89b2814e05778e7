use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};

use shared_config::AppConfig;
use shared_models::auth::{Actor, Role, User};
use shared_models::error::AppError;

use crate::jwt::validate_token;

// Middleware for authentication: validates the bearer token and stores the User as an extension
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let TypedHeader(auth) =
        bearer.ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;

    let user = validate_token(auth.token(), &config.jwt_secret)
        .map_err(|e| AppError::Auth(e.to_string()))?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

// Resolve the request-scoped actor from the authenticated user
pub fn current_actor(user: &User) -> Result<Actor, AppError> {
    Actor::try_from(user)
}

pub fn require_staff(actor: &Actor) -> Result<(), AppError> {
    if actor.is_staff() {
        Ok(())
    } else {
        Err(AppError::Policy(format!("Role '{}' may not perform this operation", actor.role)))
    }
}

pub fn require_admin(actor: &Actor) -> Result<(), AppError> {
    if actor.role == Role::Admin {
        Ok(())
    } else {
        Err(AppError::Policy("Only administrators may perform this operation".to_string()))
    }
}
