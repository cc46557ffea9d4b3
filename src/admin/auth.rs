use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::accounts::Permissions;
use crate::admin::AdminState;

/// Header carrying the supervisor's fd-passing password.
pub const FD_PASSING_PASSWORD_HEADER: &str = "fd-passing-password";

/// Who is making a request and what they may do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuthorization {
    /// `None` for the supervisor or when authentication is disabled.
    pub username: Option<String>,
    pub permissions: Permissions,
}

impl ClientAuthorization {
    fn anonymous_full() -> Self {
        Self {
            username: None,
            permissions: Permissions::FULL,
        }
    }
}

/// Resolve the caller's rights, or `None` if the request must be rejected.
pub fn authorize(state: &AdminState, headers: &HeaderMap) -> Option<ClientAuthorization> {
    if let Some(expected) = &state.fd_passing_password {
        if let Some(given) = headers.get(FD_PASSING_PASSWORD_HEADER) {
            return given
                .to_str()
                .ok()
                .filter(|given| expected.matches(given))
                .map(|_| ClientAuthorization::anonymous_full());
        }
    }

    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let (username, password) = parse_basic(value.to_str().ok()?)?;
        let account = state.api_accounts.authenticate(&username, &password)?;
        return Some(ClientAuthorization {
            username: Some(username),
            permissions: account.permissions(),
        });
    }

    // Socket permissions are the only boundary when nothing is configured.
    if state.api_accounts.is_empty() && state.fd_passing_password.is_none() {
        return Some(ClientAuthorization::anonymous_full());
    }
    None
}

fn parse_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match authorize(&state, request.headers()) {
        Some(authorization) => {
            request.extensions_mut().insert(authorization);
            next.run(request).await
        }
        None => {
            tracing::debug!(path = %request.uri().path(), "Rejected unauthenticated admin request");
            (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"UstRouter\"")],
                "Unauthorized",
            )
                .into_response()
        }
    }
}
