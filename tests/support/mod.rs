#![allow(dead_code)]

use std::sync::Arc;

use obo_broker::config::Config;
use obo_broker::oauth::{MemoryTokenBackend, Token, TokenBackend, now_unix};
use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TENANT: &str = "tenant";
pub const TOKEN_PATH: &str = "/tenant/oauth2/v2.0/token";
pub const AUTHORIZE_PATH: &str = "/tenant/oauth2/v2.0/authorize";
pub const BLUEPRINT_ID: &str = "bp-id";
pub const BLUEPRINT_SECRET: &str = "bp-secret";
pub const AGENT_ID: &str = "agent-id";
pub const REDIRECT_BASE: &str = "http://localhost:5050";

fn base_config(authority: &str) -> Config {
    let mut config = Config::default();
    config.env_files.clear();
    config.provider.authority = authority.to_string();
    config.provider.timeout_secs = 5;
    config.identity.tenant_id = Some(TENANT.to_string());
    config.callback.redirect_base_url = REDIRECT_BASE.to_string();
    config
}

pub fn blueprint_config(authority: &str) -> Config {
    let mut config = base_config(authority);
    config.identity.blueprint_client_id = Some(BLUEPRINT_ID.to_string());
    config.identity.blueprint_secret = Some(BLUEPRINT_SECRET.to_string());
    config.identity.agent_client_id = Some(AGENT_ID.to_string());
    config
}

pub fn legacy_config(authority: &str) -> Config {
    let mut config = base_config(authority);
    config.identity.client_id = Some("legacy-id".to_string());
    config.identity.client_secret = Some("legacy-secret".to_string());
    config
}

pub fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> Value {
    let mut body = json!({
        "token_type": "Bearer",
        "access_token": access,
        "expires_in": expires_in,
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body
}

pub fn valid_token(access: &str, refresh: &str) -> Token {
    Token::issued(access.to_string(), Some(refresh.to_string()), now_unix(), Some(3600))
}

pub fn expired_token(access: &str, refresh: &str) -> Token {
    Token {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        expires_at: now_unix() - 10.0,
    }
}

pub async fn seeded_backend(token: Option<Token>) -> Arc<MemoryTokenBackend> {
    let backend = Arc::new(MemoryTokenBackend::new());
    if let Some(token) = token {
        backend.save(&token).await.unwrap();
    }
    backend
}

/// Bootstrap (T1) grant: blueprint secret plus `fmi_path`
pub async fn mount_bootstrap(server: &MockServer, t1: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("fmi_path=agent-id"))
        .and(body_string_contains("client_secret=bp-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(t1, None, 3600)))
        .expect(times)
        .mount(server)
        .await;
}
