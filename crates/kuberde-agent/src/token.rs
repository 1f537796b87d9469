//! OAuth2 client-credentials token fetch (spec §4.3 "Startup" step 2).

use oauth2::basic::BasicClient;
use oauth2::{ClientId, ClientSecret, TokenResponse, TokenUrl};

use crate::config::Config;

/// Exchanges the configured client id/secret for a bearer access token
/// at `AUTH_TOKEN_URL`. Fatal if this fails (spec §4.3 failure
/// semantics: "If the token cannot be obtained at startup: fatal").
pub async fn fetch_access_token(config: &Config) -> anyhow::Result<String> {
    let client = BasicClient::new(
        ClientId::new(config.auth_client_id.clone()),
        Some(ClientSecret::new(config.auth_client_secret.clone())),
        oauth2::AuthUrl::new(config.auth_token_url.clone())?,
        Some(TokenUrl::new(config.auth_token_url.clone())?),
    );

    let token = client
        .exchange_client_credentials()
        .request_async(oauth2::reqwest::async_http_client)
        .await?;

    Ok(token.access_token().secret().clone())
}
