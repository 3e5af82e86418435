//! Webhook request authentication
//!
//! Three modes: HMAC over the raw body (sha1/sha256/sha512, hex-encoded,
//! with or without an `alg=` prefix in the header), bearer token, and plain
//! header equality. All comparisons are constant-time.

use hmac::{Mac, SimpleHmac};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::crds::webhook_trigger::{SecretValue, WebhookAuth};
use crate::crds::HmacAlgorithm;
use crate::tasks::types::{Error, Result};

/// Resolve a trigger secret: inline value, or a Secret key read from the
/// trigger's namespace.
pub async fn resolve_secret(
    client: &Client,
    namespace: &str,
    secret: &SecretValue,
) -> Result<String> {
    if let Some(value) = &secret.value {
        return Ok(value.clone());
    }
    let Some(secret_ref) = &secret.secret_ref else {
        return Err(Error::ConfigError(
            "trigger auth carries neither a value nor a secretRef".to_string(),
        ));
    };
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret_obj = secrets.get_opt(&secret_ref.name).await?.ok_or_else(|| {
        Error::ConfigError(format!("secret {namespace}/{} not found", secret_ref.name))
    })?;
    let key = secret_ref.key.as_deref().unwrap_or("token");
    let data = secret_obj
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| {
            Error::ConfigError(format!(
                "secret {namespace}/{} has no key {key:?}",
                secret_ref.name
            ))
        })?;
    String::from_utf8(data.0.clone())
        .map_err(|_| Error::ConfigError(format!("secret key {key:?} is not UTF-8")))
}

/// Authenticate a request against the trigger's configured mode.
///
/// `signature_header`, `authorization` and `match_header` are the raw
/// header values relevant to each mode, pre-extracted by the handler.
pub fn authenticate(
    auth: &WebhookAuth,
    resolved_secret: &str,
    body: &[u8],
    signature_header: Option<&str>,
    authorization: Option<&str>,
    match_header: Option<&str>,
) -> bool {
    if let Some(hmac_auth) = &auth.hmac {
        let Some(signature) = signature_header else {
            return false;
        };
        let algorithm = hmac_auth.algorithm.unwrap_or_default();
        return verify_hmac(algorithm, resolved_secret, body, signature);
    }
    if auth.bearer.is_some() {
        let Some(authorization) = authorization else {
            return false;
        };
        let presented = authorization
            .strip_prefix("Bearer ")
            .unwrap_or(authorization);
        return constant_time_eq(presented.as_bytes(), resolved_secret.as_bytes());
    }
    if auth.header_match.is_some() {
        let Some(presented) = match_header else {
            return false;
        };
        return constant_time_eq(presented.as_bytes(), resolved_secret.as_bytes());
    }
    false
}

/// Verify a hex-encoded HMAC signature, accepting an `alg=` prefix
/// (`sha256=deadbeef...`) as sent by common webhook producers.
#[must_use]
pub fn verify_hmac(algorithm: HmacAlgorithm, secret: &str, body: &[u8], signature: &str) -> bool {
    let hex_part = match signature.split_once('=') {
        Some((prefix, rest)) if prefix == algorithm.to_string() => rest,
        Some(_) => return false,
        None => signature,
    };
    let Ok(signature_bytes) = hex::decode(hex_part) else {
        return false;
    };
    let computed = match algorithm {
        HmacAlgorithm::Sha1 => hmac_bytes::<Sha1>(secret, body),
        HmacAlgorithm::Sha256 => hmac_bytes::<Sha256>(secret, body),
        HmacAlgorithm::Sha512 => hmac_bytes::<Sha512>(secret, body),
    };
    let Some(computed) = computed else {
        return false;
    };
    constant_time_eq(&computed, &signature_bytes)
}

fn hmac_bytes<D>(secret: &str, body: &[u8]) -> Option<Vec<u8>>
where
    D: hmac::digest::Digest + hmac::digest::core_api::BlockSizeUser,
{
    let mut mac = <SimpleHmac<D> as Mac>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::webhook_trigger::{HeaderMatchAuth, HmacAuth, TokenAuth};

    fn hex_hmac_sha256(secret: &str, body: &[u8]) -> String {
        let mut mac = SimpleHmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn hmac_sha256_with_and_without_prefix() {
        let body = br#"{"action":"opened"}"#;
        let signature = hex_hmac_sha256("s3cret", body);
        assert!(verify_hmac(HmacAlgorithm::Sha256, "s3cret", body, &signature));
        assert!(verify_hmac(
            HmacAlgorithm::Sha256,
            "s3cret",
            body,
            &format!("sha256={signature}")
        ));
        assert!(!verify_hmac(
            HmacAlgorithm::Sha256,
            "s3cret",
            body,
            &format!("sha1={signature}")
        ));
        assert!(!verify_hmac(HmacAlgorithm::Sha256, "wrong", body, &signature));
        assert!(!verify_hmac(HmacAlgorithm::Sha256, "s3cret", b"other", &signature));
    }

    #[test]
    fn hmac_rejects_malformed_hex() {
        assert!(!verify_hmac(
            HmacAlgorithm::Sha256,
            "s3cret",
            b"body",
            "not-hex!"
        ));
    }

    #[test]
    fn hmac_sha1_and_sha512_produce_distinct_signatures() {
        let body = b"payload";
        let sha1_sig = {
            let mut mac = SimpleHmac::<Sha1>::new_from_slice(b"k").unwrap();
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        };
        assert!(verify_hmac(HmacAlgorithm::Sha1, "k", body, &sha1_sig));
        assert!(!verify_hmac(HmacAlgorithm::Sha512, "k", body, &sha1_sig));
    }

    fn hmac_auth() -> WebhookAuth {
        WebhookAuth {
            hmac: Some(HmacAuth {
                header: "x-hub-signature-256".to_string(),
                algorithm: Some(HmacAlgorithm::Sha256),
                secret: SecretValue {
                    value: Some("s3cret".to_string()),
                    secret_ref: None,
                },
            }),
            ..Default::default()
        }
    }

    #[test]
    fn authenticate_hmac_mode() {
        let auth = hmac_auth();
        let body = b"{}";
        let signature = hex_hmac_sha256("s3cret", body);
        assert!(authenticate(&auth, "s3cret", body, Some(&signature), None, None));
        assert!(!authenticate(&auth, "s3cret", body, None, None, None));
    }

    #[test]
    fn authenticate_bearer_mode() {
        let auth = WebhookAuth {
            bearer: Some(TokenAuth {
                secret: SecretValue {
                    value: Some("t0ken".to_string()),
                    secret_ref: None,
                },
            }),
            ..Default::default()
        };
        assert!(authenticate(&auth, "t0ken", b"", None, Some("Bearer t0ken"), None));
        assert!(authenticate(&auth, "t0ken", b"", None, Some("t0ken"), None));
        assert!(!authenticate(&auth, "t0ken", b"", None, Some("Bearer nope"), None));
        assert!(!authenticate(&auth, "t0ken", b"", None, None, None));
    }

    #[test]
    fn authenticate_header_mode() {
        let auth = WebhookAuth {
            header_match: Some(HeaderMatchAuth {
                name: "x-api-key".to_string(),
                secret: SecretValue {
                    value: Some("k3y".to_string()),
                    secret_ref: None,
                },
            }),
            ..Default::default()
        };
        assert!(authenticate(&auth, "k3y", b"", None, None, Some("k3y")));
        assert!(!authenticate(&auth, "k3y", b"", None, None, Some("other")));
    }
}
