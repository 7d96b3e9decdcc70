//! Signed session tokens
//!
//! Member sessions slide: every authenticated request gets a fresh token with
//! a new expiry. Staff sessions have a fixed lifetime.

use anyhow::Result;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    config::SessionConfig,
    models::{StaffAccount, StaffRole, UserId},
};

/// Who the session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Member,
    Staff,
}

/// JWT claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Member id or staff account id
    pub sub: String,
    pub kind: SessionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<StaffRole>,
    pub iat: u64,
    pub exp: u64,
}

impl Claims {
    /// The member this session belongs to, if it is a member session
    pub fn member_id(&self) -> Option<UserId> {
        match self.kind {
            SessionKind::Member => self.sub.parse().ok(),
            SessionKind::Staff => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.kind == SessionKind::Staff && self.role == Some(StaffRole::Admin)
    }

    pub fn is_staff(&self) -> bool {
        self.kind == SessionKind::Staff && self.role.is_some()
    }
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| anyhow::anyhow!("Failed to get current time: {}", e))?
        .as_secs())
}

/// Issues and checks HS256 session tokens
#[derive(Clone)]
pub struct SessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    member_ttl: u64,
    staff_ttl: u64,
}

impl SessionService {
    pub fn new(config: &SessionConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            member_ttl: config.member_ttl_seconds,
            staff_ttl: config.staff_ttl_seconds,
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        Ok(encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.encoding_key,
        )?)
    }

    pub fn issue_member(&self, user_id: UserId) -> Result<String> {
        let now = unix_now()?;
        self.sign(&Claims {
            sub: user_id.to_string(),
            kind: SessionKind::Member,
            role: None,
            iat: now,
            exp: now + self.member_ttl,
        })
    }

    pub fn issue_staff(&self, account: &StaffAccount) -> Result<String> {
        let now = unix_now()?;
        self.sign(&Claims {
            sub: account.id.to_string(),
            kind: SessionKind::Staff,
            role: Some(account.role),
            iat: now,
            exp: now + self.staff_ttl,
        })
    }

    /// Decode and check signature and expiry
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// Re-issue a member token with a fresh expiry; staff tokens are not extended
    pub fn refresh(&self, claims: &Claims) -> Result<Option<String>> {
        match claims.member_id() {
            Some(user_id) => self.issue_member(user_id).map(Some),
            None => Ok(None),
        }
    }

    pub fn member_ttl(&self) -> u64 {
        self.member_ttl
    }

    pub fn staff_ttl(&self) -> u64 {
        self.staff_ttl
    }
}
