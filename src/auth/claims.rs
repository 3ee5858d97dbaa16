//! Display-only decoding of the identity token.
//!
//! The `id_token` cookie is a compact JWS (`header.payload.signature`). Only
//! the payload is read, and nothing here verifies the signature: the claims are
//! used to render the UI and to answer group checks for client-side gating,
//! never for access control.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde_json::{Map, Value};
use tracing::warn;

pub const DEFAULT_GROUP_CLAIM: &str = "cognito:groups";

#[derive(Debug, thiserror::Error)]
pub enum ClaimsError {
    #[error("token is empty")]
    Empty,
    #[error("token is not a compact JWS")]
    Malformed,
    #[error("payload is not base64url: {0}")]
    Encoding(base64ct::Error),
    #[error("payload is not JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Claims decoded from an identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    claims: Map<String, Value>,
}

impl Profile {
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    #[must_use]
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.claim("sub").and_then(Value::as_str)
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.claim("email").and_then(Value::as_str)
    }

    /// String members of the group claim. Empty when the claim is missing or
    /// is not a list.
    #[must_use]
    pub fn groups(&self, claim: &str) -> Vec<&str> {
        self.claim(claim)
            .and_then(Value::as_array)
            .map(|groups| groups.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// True only when `claim` is a list that contains `group`.
    #[must_use]
    pub fn has_group(&self, claim: &str, group: &str) -> bool {
        self.claim(claim)
            .and_then(Value::as_array)
            .map_or(false, |groups| {
                groups.iter().any(|g| g.as_str() == Some(group))
            })
    }
}

/// Decode the payload segment of a compact JWS into a claims mapping.
///
/// # Errors
/// Returns an error if the token is empty, does not have three segments, or
/// the payload is not a base64url encoded JSON object.
pub fn decode(token: &str) -> Result<Profile, ClaimsError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ClaimsError::Empty);
    }

    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(ClaimsError::Malformed);
    };

    // Some issuers pad the segments even though RFC 7515 says not to
    let payload = payload.trim_end_matches('=');
    let bytes = Base64UrlUnpadded::decode_vec(payload).map_err(ClaimsError::Encoding)?;

    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(claims) => Ok(Profile { claims }),
        _ => Err(ClaimsError::NotAnObject),
    }
}

/// Fail-closed variant of [`decode`]: malformed tokens yield `None`.
#[must_use]
pub fn decode_profile(token: &str) -> Option<Profile> {
    match decode(token) {
        Ok(profile) => Some(profile),
        Err(e) => {
            warn!("Failed to decode identity token: {}", e);
            None
        }
    }
}

#[cfg(test)]
pub(crate) fn encode_token(claims: &Value) -> String {
    let header = Base64UrlUnpadded::encode_string(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = Base64UrlUnpadded::encode_string(claims.to_string().as_bytes());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_claims() {
        let token = encode_token(&json!({
            "sub": "6f1c2a",
            "email": "ada@example.com",
            "cognito:groups": ["admins", "editors"]
        }));

        let profile = decode(&token).unwrap();
        assert_eq!(profile.subject(), Some("6f1c2a"));
        assert_eq!(profile.email(), Some("ada@example.com"));
        assert_eq!(
            profile.groups(DEFAULT_GROUP_CLAIM),
            vec!["admins", "editors"]
        );
    }

    #[test]
    fn test_decode_padded_payload() {
        let token = encode_token(&json!({ "sub": "a" }));
        let mut parts: Vec<String> = token.split('.').map(ToString::to_string).collect();
        parts[1].push_str("==");
        let padded = parts.join(".");

        assert!(decode(&padded).is_ok());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(decode(""), Err(ClaimsError::Empty)));
        assert!(matches!(decode("abc"), Err(ClaimsError::Malformed)));
        assert!(matches!(decode("a.b.c.d"), Err(ClaimsError::Malformed)));
        assert!(matches!(decode("a.!!!.c"), Err(ClaimsError::Encoding(_))));

        let not_json = format!("a.{}.c", Base64UrlUnpadded::encode_string(b"not json"));
        assert!(matches!(decode(&not_json), Err(ClaimsError::Json(_))));

        let array = format!("a.{}.c", Base64UrlUnpadded::encode_string(b"[1,2]"));
        assert!(matches!(decode(&array), Err(ClaimsError::NotAnObject)));
    }

    #[test]
    fn test_decode_profile_fails_closed() {
        assert!(decode_profile("garbage").is_none());
    }

    #[test]
    fn test_has_group() {
        let with_list = decode(&encode_token(&json!({ "cognito:groups": ["admins"] }))).unwrap();
        assert!(with_list.has_group(DEFAULT_GROUP_CLAIM, "admins"));
        assert!(!with_list.has_group(DEFAULT_GROUP_CLAIM, "editors"));

        let absent = decode(&encode_token(&json!({ "sub": "a" }))).unwrap();
        assert!(!absent.has_group(DEFAULT_GROUP_CLAIM, "admins"));

        let not_list = decode(&encode_token(&json!({ "cognito:groups": "admins" }))).unwrap();
        assert!(!not_list.has_group(DEFAULT_GROUP_CLAIM, "admins"));
        assert!(not_list.groups(DEFAULT_GROUP_CLAIM).is_empty());
    }
}
