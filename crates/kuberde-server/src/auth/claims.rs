use serde::Deserialize;

/// Claims consumed from either an agent's or a user's bearer token
/// (spec §6 "Token contract").
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    pub preferred_username: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub realm_access: RealmAccess,
    pub exp: usize,
    #[serde(default)]
    pub iss: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

impl TokenClaims {
    pub fn is_admin(&self) -> bool {
        self.realm_access.roles.iter().any(|r| r == "admin")
    }
}
