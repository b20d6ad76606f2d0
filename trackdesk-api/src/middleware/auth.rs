/// Authentication middleware layer
///
/// Resolves `Authorization: Bearer` or `X-Api-Key` credentials into an
/// [`AuthContext`] and stores it in the request extensions for handlers to
/// extract with `Extension<AuthContext>`.

use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use trackdesk_shared::auth::middleware::authenticate;

pub async fn auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth = authenticate(&state.db, state.jwt_secret(), req.headers()).await?;

    req.extensions_mut().insert(auth);

    Ok(next.run(req).await)
}
