//! Signed, expiring tokens delegating one operation on one blob.
//!
//! Token layout: `base64url(payload_json) "." base64url(hmac_sha256(payload_b64))`,
//! both parts unpadded. The payload embeds the driver, method and absolute
//! expiry, so a verifier needs no session state and a token cannot be reused
//! for another operation or past its window.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::error::CloudStorageError;
use crate::metadata::MetaData;
use crate::models::DriverName;

pub const DEFAULT_SALT: &str = "cloud-storage.signer";

/// Operation a token delegates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

/// Decoded token contents. Field order here is the serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub driver: DriverName,
    pub method: Method,
    pub container: String,
    pub blob_name: String,
    /// Absolute expiry, seconds since the Unix epoch.
    pub expires: i64,
    pub max_age: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<(u64, u64)>,
    #[serde(default, skip_serializing_if = "MetaData::is_empty")]
    pub meta_data: MetaData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<String>,
}

impl SignedPayload {
    /// Fails when `issued_at + expires_in` is not representable.
    pub fn new(
        driver: DriverName,
        method: Method,
        container: impl Into<String>,
        blob_name: impl Into<String>,
        expires_in: i64,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, CloudStorageError> {
        let expires = issued_at
            .timestamp()
            .checked_add(expires_in)
            .ok_or_else(|| CloudStorageError::backend("Expiration is out of range."))?;

        Ok(Self {
            driver,
            method,
            container: container.into(),
            blob_name: blob_name.into(),
            expires,
            max_age: expires_in,
            content_disposition: None,
            content_type: None,
            cache_control: None,
            content_length: None,
            meta_data: MetaData::new(),
            acl: None,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() > self.expires
    }
}

/// HMAC-SHA256 signer bound to one driver and secret.
pub struct Signer {
    driver: DriverName,
    key: hmac::Key,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("driver", &self.driver)
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// The signing key is `HMAC-SHA256(secret, salt)`, which namespaces tokens
    /// by salt under a shared secret.
    pub fn new(driver: DriverName, secret: &str, salt: Option<&str>) -> Self {
        let root = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
        let derived = hmac::sign(&root, salt.unwrap_or(DEFAULT_SALT).as_bytes());
        Self {
            driver,
            key: hmac::Key::new(hmac::HMAC_SHA256, derived.as_ref()),
        }
    }

    pub fn driver(&self) -> DriverName {
        self.driver
    }

    pub fn sign(&self, payload: &SignedPayload) -> Result<String, CloudStorageError> {
        let json = serde_json::to_vec(payload)
            .map_err(|e| CloudStorageError::backend_with("Failed to encode signed payload", e))?;
        let body = URL_SAFE_NO_PAD.encode(json);
        let tag = hmac::sign(&self.key, body.as_bytes());
        Ok(format!("{body}.{}", URL_SAFE_NO_PAD.encode(tag.as_ref())))
    }

    pub fn validate(&self, token: &str) -> Result<SignedPayload, CloudStorageError> {
        self.validate_at(token, Utc::now())
    }

    /// Validate against an explicit clock.
    pub fn validate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SignedPayload, CloudStorageError> {
        let (body, mac) = token
            .split_once('.')
            .ok_or_else(|| CloudStorageError::Signature("malformed token".to_string()))?;

        let mac = URL_SAFE_NO_PAD
            .decode(mac)
            .map_err(|_| CloudStorageError::Signature("malformed signature".to_string()))?;
        hmac::verify(&self.key, body.as_bytes(), &mac)
            .map_err(|_| CloudStorageError::Signature("signature does not match".to_string()))?;

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| CloudStorageError::Signature("malformed payload".to_string()))?;
        let payload: SignedPayload = serde_json::from_slice(&json)
            .map_err(|e| CloudStorageError::Signature(format!("unreadable payload: {e}")))?;

        if payload.driver != self.driver {
            return Err(CloudStorageError::Signature(format!(
                "token was issued for driver {}",
                payload.driver
            )));
        }

        if payload.is_expired_at(now) {
            return Err(CloudStorageError::SignatureExpired);
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signer() -> Signer {
        Signer::new(DriverName::Local, "secret", None)
    }

    fn payload(now: DateTime<Utc>, expires_in: i64) -> SignedPayload {
        let mut payload = SignedPayload::new(
            DriverName::Local,
            Method::Get,
            "avatars",
            "user.png",
            expires_in,
            now,
        )
        .unwrap();
        payload.content_disposition = Some("attachment".to_string());
        payload.meta_data.set("Owner-Id", "1");
        payload
    }

    #[test]
    fn test_round_trip() {
        let now = Utc::now();
        let signer = signer();
        let token = signer.sign(&payload(now, 60)).unwrap();

        let decoded = signer.validate_at(&token, now).unwrap();
        assert_eq!(decoded, payload(now, 60));
        assert_eq!(decoded.max_age, 60);
        assert_eq!(decoded.expires, now.timestamp() + 60);
    }

    #[test]
    fn test_token_is_url_safe_and_deterministic() {
        let now = Utc::now();
        let signer = signer();
        let first = signer.sign(&payload(now, 60)).unwrap();
        let second = signer.sign(&payload(now, 60)).unwrap();

        assert_eq!(first, second);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let signer = signer();
        let token = signer.sign(&payload(now, 60)).unwrap();

        assert!(signer.validate_at(&token, now + Duration::seconds(60)).is_ok());
        assert!(matches!(
            signer.validate_at(&token, now + Duration::seconds(61)),
            Err(CloudStorageError::SignatureExpired)
        ));
    }

    #[test]
    fn test_negative_expiry_is_already_expired() {
        let now = Utc::now();
        let signer = signer();
        let token = signer.sign(&payload(now, -10)).unwrap();

        assert!(matches!(
            signer.validate_at(&token, now),
            Err(CloudStorageError::SignatureExpired)
        ));
    }

    #[test]
    fn test_unrepresentable_expiry_is_an_error() {
        let now = Utc::now();
        for expires_in in [i64::MAX, i64::MAX - now.timestamp() + 1] {
            let result =
                SignedPayload::new(DriverName::Local, Method::Get, "c", "b", expires_in, now);
            assert!(matches!(result, Err(CloudStorageError::Backend { .. })));
        }

        let longest = i64::MAX - now.timestamp();
        let far =
            SignedPayload::new(DriverName::Local, Method::Get, "c", "b", longest, now).unwrap();
        assert_eq!(far.expires, i64::MAX);
    }

    #[test]
    fn test_every_mac_bit_flip_is_rejected() {
        let now = Utc::now();
        let signer = signer();
        let token = signer.sign(&payload(now, 60)).unwrap();
        let (body, mac) = token.split_once('.').unwrap();
        let mac = URL_SAFE_NO_PAD.decode(mac).unwrap();

        for byte in 0..mac.len() {
            for bit in 0..8 {
                let mut corrupted = mac.clone();
                corrupted[byte] ^= 1 << bit;
                let forged = format!("{body}.{}", URL_SAFE_NO_PAD.encode(&corrupted));
                assert!(matches!(
                    signer.validate_at(&forged, now),
                    Err(CloudStorageError::Signature(_))
                ));
            }
        }
    }

    #[test]
    fn test_payload_tampering_is_rejected() {
        let now = Utc::now();
        let signer = signer();
        let token = signer.sign(&payload(now, 60)).unwrap();
        let (_, mac) = token.split_once('.').unwrap();

        let mut tampered = payload(now, 60);
        tampered.blob_name = "admin.png".to_string();
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&tampered).unwrap());

        assert!(matches!(
            signer.validate_at(&format!("{body}.{mac}"), now),
            Err(CloudStorageError::Signature(_))
        ));
    }

    #[test]
    fn test_character_corruption_is_rejected() {
        let now = Utc::now();
        let signer = signer();
        let token = signer.sign(&payload(now, 60)).unwrap();

        for index in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
            let corrupted = String::from_utf8(bytes).unwrap();
            assert!(signer.validate_at(&corrupted, now).is_err());
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        let signer = signer();
        for token in ["", "no-dot", ".", "abc.def", "%%%.%%%"] {
            assert!(matches!(
                signer.validate(token),
                Err(CloudStorageError::Signature(_))
            ));
        }
    }

    #[test]
    fn test_other_secret_or_salt_is_rejected() {
        let now = Utc::now();
        let token = signer().sign(&payload(now, 60)).unwrap();

        let other_secret = Signer::new(DriverName::Local, "other", None);
        let other_salt = Signer::new(DriverName::Local, "secret", Some("uploads"));
        assert!(other_secret.validate_at(&token, now).is_err());
        assert!(other_salt.validate_at(&token, now).is_err());
    }

    #[test]
    fn test_driver_mismatch_is_rejected() {
        let now = Utc::now();
        let token = signer().sign(&payload(now, 60)).unwrap();

        let google = Signer::new(DriverName::Googlestorage, "secret", None);
        assert!(matches!(
            google.validate_at(&token, now),
            Err(CloudStorageError::Signature(_))
        ));
    }
}
