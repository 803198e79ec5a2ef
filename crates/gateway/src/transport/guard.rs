// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Route authorization middleware: public / setup / protected route
//! classes, login redirects with `return_to`, and the setup gate.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::{cookie, SESSION_COOKIE};
use crate::auth::identity::urlencode;
use crate::error::ErrorCode;
use crate::store::KEY_SETUP_COMPLETE;
use crate::transport::state::Gateway;

/// Authorization class of a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// No cookie required.
    Public,
    /// Cookie required, allowed before setup completes.
    Setup,
    /// Cookie and completed setup required.
    Protected,
}

/// Classify a path. The WebSocket path is public here because the upgrade
/// handler does its own cookie-or-ticket check.
pub fn classify(path: &str, ws_path: &str) -> RouteClass {
    match path {
        "/login" | "/api/health" | "/manifest.webmanifest" | "/sw.js" => RouteClass::Public,
        p if p == ws_path => RouteClass::Public,
        p if p.starts_with("/api/auth/") => RouteClass::Public,
        "/setup" => RouteClass::Setup,
        p if p.starts_with("/api/setup/") => RouteClass::Setup,
        _ => RouteClass::Protected,
    }
}

/// Extract and verify the session cookie from request headers.
pub fn authenticated(gateway: &Gateway, headers: &axum::http::HeaderMap) -> bool {
    let Some(raw) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    cookie_value(raw)
        .map(|value| cookie::verify(&gateway.settings.app_secret, value).is_some())
        .unwrap_or(false)
}

/// Pull the session cookie's value out of a `Cookie` header.
fn cookie_value(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then_some(value)
    })
}

/// Axum middleware enforcing the route classes.
pub async fn guard_layer(
    State(gateway): State<Arc<Gateway>>,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();
    let class = classify(&path, &gateway.settings.ws_path);
    if class == RouteClass::Public {
        return next.run(req).await;
    }

    if !authenticated(&gateway, req.headers()) {
        if path.starts_with("/api/") {
            return ErrorCode::Unauthorized.to_http_response("sign in required").into_response();
        }
        let return_to = match req.uri().query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };
        return found(&format!("/login?return_to={}", urlencode(&return_to)));
    }

    if class == RouteClass::Protected {
        let setup_complete = gateway
            .store
            .get(KEY_SETUP_COMPLETE)
            .await
            .map(|v| v == "true")
            .unwrap_or(false);
        if !setup_complete {
            if path.starts_with("/api/") {
                return ErrorCode::SetupRequired
                    .to_http_response("setup is not complete")
                    .into_response();
            }
            return found("/setup");
        }
    }

    next.run(req).await
}

/// A plain `302 Found` redirect.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response()
}

#[cfg(test)]
#[path = "guard_tests.rs"]
mod tests;
