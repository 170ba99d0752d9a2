use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;

use agromap_core::{Actor, EngineError, Role};

/// JWT payload fields this client cares about. The signature is never checked
/// here; the server re-verifies the token on every request.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: Option<String>,
    id: Option<serde_json::Value>,
    #[serde(rename = "userId")]
    user_id: Option<serde_json::Value>,
    #[serde(default)]
    roles: Vec<String>,
}

fn numeric_claim(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Ambient session state made explicit: the bearer token, the authenticated
/// actor, and the admin's impersonation target. Constructed once at session
/// start and threaded into every backend and client.
#[derive(Debug, Clone)]
pub struct SessionContext {
    token: Option<String>,
    actor: Actor,
    impersonation: Option<Actor>,
}

impl SessionContext {
    /// Build a session from a raw bearer token by decoding its payload
    /// segment. An undecodable token means the session cannot be trusted and
    /// the caller must log out.
    pub fn from_token(token: &str) -> Result<Self, EngineError> {
        let claims = decode_claims(token)?;
        let id = numeric_claim(claims.id.as_ref())
            .or_else(|| numeric_claim(claims.user_id.as_ref()));
        if id.is_none() {
            tracing::warn!("token carries no numeric id claim; owner checks limited until reload");
        }

        let actor = Actor {
            id,
            role: Role::from_claims(&claims.roles),
            email: claims.sub.unwrap_or_default(),
        };
        tracing::info!(role = actor.role.as_str(), "session established");

        Ok(Self {
            token: Some(token.to_string()),
            actor,
            impersonation: None,
        })
    }

    /// A demo session: local-only persistence, no meaningful account id.
    pub fn demo(email: impl Into<String>) -> Self {
        Self {
            token: None,
            actor: Actor {
                id: None,
                role: Role::Demo,
                email: email.into(),
            },
            impersonation: None,
        }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn bearer(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn impersonation(&self) -> Option<&Actor> {
        self.impersonation.as_ref()
    }

    /// Choose whose polygons admin operations act on; None returns to self.
    pub fn set_impersonation(&mut self, target: Option<Actor>) {
        self.impersonation = target;
    }

    /// Adopt an id learned after the fact (e.g. from the first loaded
    /// polygon's owner) when the token itself carried none.
    pub fn backfill_actor_id(&mut self, id: i64) {
        if self.actor.id.is_none() {
            tracing::info!(id, "backfilled actor id from loaded data");
            self.actor.id = Some(id);
        }
    }

    /// The owner whose polygons the current view shows: the impersonation
    /// target when one is selected, the actor otherwise.
    pub fn viewed_owner_id(&self) -> Option<i64> {
        match &self.impersonation {
            Some(target) => target.id,
            None => self.actor.id,
        }
    }
}

fn decode_claims(token: &str) -> Result<TokenClaims, EngineError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or(EngineError::Unauthenticated)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| EngineError::Unauthenticated)?;
    serde_json::from_slice(&bytes).map_err(|_| EngineError::Unauthenticated)
}
