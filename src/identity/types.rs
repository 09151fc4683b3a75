use serde::{Deserialize, Serialize};

/// Claims in tokens issued by the auth collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub exp: usize,
}

/// Verified caller, inserted into request extensions by `require_identity`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: Option<String>,
}

impl IdentityClaims {
    /// `id` wins over `sub`; blank values count as missing
    pub fn user_id(&self) -> Option<&str> {
        [self.id.as_deref(), self.sub.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|value| !value.is_empty())
    }
}
