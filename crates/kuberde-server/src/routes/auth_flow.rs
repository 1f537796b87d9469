//! `GET /auth/login`, `GET /auth/callback`, `POST /auth/logout` (spec
//! §6 HTTP surface table). A thin OIDC Authorization Code flow whose
//! only job is to populate the signed session cookie the HTTP reverse
//! proxy path (§4.1 item 3) reads.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use cookie::{Cookie, CookieJar, Key, SameSite};
use serde::Deserialize;

use crate::state::AppState;

pub const SESSION_COOKIE: &str = "kuberde_session";

fn signing_key(state: &AppState) -> Key {
    Key::derive_from(state.config.cookie_signing_key.as_bytes())
}

#[derive(Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub return_url: Option<String>,
}

pub async fn login(Query(query): Query<LoginQuery>, State(state): State<AppState>) -> Response {
    let return_url = query.return_url.unwrap_or_else(|| "/".to_string());
    let mut oauth = state.oauth.lock().await;
    let redirect_url = oauth.begin_login(return_url);
    Redirect::to(&redirect_url).into_response()
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    code: String,
    state: String,
}

pub async fn callback(Query(query): Query<CallbackQuery>, State(app_state): State<AppState>) -> Response {
    let mut oauth = app_state.oauth.lock().await;
    let exchange = oauth.exchange_code(&query.state, &query.code).await;
    drop(oauth);

    let (token, return_url) = match exchange {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "OIDC callback failed");
            return (StatusCode::UNAUTHORIZED, "login failed").into_response();
        }
    };

    let mut jar = CookieJar::new();
    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_http_only(true);
    cookie.set_secure(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    jar.private_mut(&signing_key(&app_state)).add(cookie);

    let mut response = Redirect::to(&return_url).into_response();
    for c in jar.delta() {
        if let Ok(value) = header::HeaderValue::from_str(&c.to_string()) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

pub async fn logout(State(state): State<AppState>) -> Response {
    let mut jar = CookieJar::new();
    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    jar.private_mut(&signing_key(&state)).remove(removal);

    let mut response = StatusCode::NO_CONTENT.into_response();
    for c in jar.delta() {
        if let Ok(value) = header::HeaderValue::from_str(&c.to_string()) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

/// Recovers the bearer-shaped session token from the request's signed
/// cookie, if present and valid.
pub fn session_token(state: &AppState, headers: &axum::http::HeaderMap) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    let mut jar = CookieJar::new();
    for parsed in Cookie::split_parse(cookie_header) {
        if let Ok(c) = parsed {
            jar.add_original(c.into_owned());
        }
    }
    jar.private(&signing_key(state)).get(SESSION_COOKIE).map(|c| c.value().to_string())
}
