//! Policy validation.
//!
//! Policies are checked after the data key has been recovered and before any
//! content is decrypted. Every active policy must pass; the first failure is
//! reported with the policy's name and type. Rules are normalised when the
//! artifact is created so malformed rules fail encryption, not decryption.

use crate::error::{VaultError, VaultResult};
use crate::model::{config_str, ConfigMap, EncryptionPolicy, PolicyType};
use crate::request::{AccessContext, PolicyConfig};
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

const TOKEN_DIGEST_KEY: &str = "token_sha256";

fn invalid_rules(config: &PolicyConfig, reason: impl std::fmt::Display) -> VaultError {
    VaultError::InvalidRequest(format!(
        "{} policy {}: {reason}",
        config.policy_type, config.name
    ))
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Builds the persisted policy for a request, normalising its rules.
pub fn create_policy(
    artifact_id: Uuid,
    config: &PolicyConfig,
    created_at: DateTime<Utc>,
) -> VaultResult<EncryptionPolicy> {
    let rules = normalise_rules(config)?;
    let name = if config.name.trim().is_empty() {
        config.policy_type.to_string()
    } else {
        config.name.clone()
    };

    Ok(EncryptionPolicy {
        id: Uuid::new_v4(),
        artifact_id,
        policy_type: config.policy_type,
        name,
        rules,
        is_active: true,
        created_at,
    })
}

fn normalise_rules(config: &PolicyConfig) -> VaultResult<ConfigMap> {
    let mut rules = config.rules.clone();
    match config.policy_type {
        PolicyType::Ttl => {
            ttl_duration(&rules).map_err(|reason| invalid_rules(config, reason))?;
        }
        PolicyType::Environment | PolicyType::Instance | PolicyType::Region => {
            let tags = allowed_tags(config.policy_type, &rules)
                .map_err(|reason| invalid_rules(config, reason))?;
            if let Some(key) = config.policy_type.tag_key() {
                rules.insert(key.into(), tags.into());
            }
        }
        PolicyType::MultiFactor => {
            if let Some(token) = rules.remove("token") {
                let token = token
                    .as_str()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| invalid_rules(config, "`token` must be a non-empty string"))?;
                rules.insert(TOKEN_DIGEST_KEY.into(), token_digest(token).into());
            }
            let digest = config_str(&rules, TOKEN_DIGEST_KEY)
                .ok_or_else(|| invalid_rules(config, "requires `token` or `token_sha256`"))?;
            if digest.len() != 64 || hex::decode(digest).is_err() {
                return Err(invalid_rules(config, "`token_sha256` must be 64 hex characters"));
            }
            let digest = digest.to_ascii_lowercase();
            rules.insert(TOKEN_DIGEST_KEY.into(), digest.into());
        }
    }
    Ok(rules)
}

fn ttl_duration(rules: &ConfigMap) -> Result<TimeDelta, String> {
    let span = if let Some(text) = config_str(rules, "duration") {
        humantime::parse_duration(text.trim()).map_err(|e| format!("invalid duration: {e}"))?
    } else if let Some(secs) = rules.get("duration_secs") {
        let secs = secs
            .as_u64()
            .ok_or_else(|| format!("invalid duration_secs: {secs}"))?;
        std::time::Duration::from_secs(secs)
    } else {
        return Err("requires `duration` or `duration_secs`".into());
    };
    TimeDelta::from_std(span).map_err(|_| "duration out of range".to_string())
}

fn allowed_tags(policy_type: PolicyType, rules: &ConfigMap) -> Result<Vec<String>, String> {
    let key = policy_type
        .tag_key()
        .ok_or_else(|| format!("{policy_type} is not a tag policy"))?;
    let tags: Vec<String> = match rules.get(key) {
        Some(Value::String(tag)) => vec![tag.trim().to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|t| t.trim().to_string())
                    .ok_or_else(|| format!("`{key}` entries must be strings"))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(format!("`{key}` must be a string or a list of strings")),
        None => return Err(format!("requires `{key}`")),
    };
    let tags: Vec<String> = tags.into_iter().filter(|t| !t.is_empty()).collect();
    if tags.is_empty() {
        return Err(format!("`{key}` lists no values"));
    }
    Ok(tags)
}

/// Checks every active policy against `ctx`.
pub fn validate(
    policies: &[EncryptionPolicy],
    artifact_created_at: DateTime<Utc>,
    ctx: &AccessContext,
) -> VaultResult<()> {
    let now = ctx.evaluated_at();
    for policy in policies.iter().filter(|p| p.is_active) {
        check(policy, artifact_created_at, now, ctx).map_err(|reason| {
            debug!(policy = %policy.name, kind = %policy.policy_type, %reason, "policy rejected access");
            VaultError::PolicyViolation {
                policy: policy.name.clone(),
                kind: policy.policy_type,
                reason,
            }
        })?;
    }
    Ok(())
}

fn check(
    policy: &EncryptionPolicy,
    artifact_created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    ctx: &AccessContext,
) -> Result<(), String> {
    match policy.policy_type {
        PolicyType::Ttl => {
            let ttl = ttl_duration(&policy.rules)?;
            let expires_at = artifact_created_at
                .checked_add_signed(ttl)
                .ok_or_else(|| "expiry out of range".to_string())?;
            if now >= expires_at {
                return Err(format!("artifact expired at {}", expires_at.to_rfc3339()));
            }
            Ok(())
        }
        PolicyType::Environment | PolicyType::Instance | PolicyType::Region => {
            let allowed = allowed_tags(policy.policy_type, &policy.rules)?;
            let kind = policy.policy_type.to_string().to_lowercase();
            let Some(tag) = ctx
                .tag(policy.policy_type)
                .map(str::trim)
                .filter(|t| !t.is_empty())
            else {
                return Err(format!("caller {kind} not provided"));
            };
            if allowed.iter().any(|a| a == tag) {
                Ok(())
            } else {
                Err(format!("{kind} {tag:?} is not allowed"))
            }
        }
        PolicyType::MultiFactor => {
            let expected = config_str(&policy.rules, TOKEN_DIGEST_KEY)
                .ok_or_else(|| "multi-factor rule has no token digest".to_string())?;
            let Some(token) = ctx.mfa_token.as_deref() else {
                return Err("multi-factor token required".into());
            };
            if token_digest(token) == expected {
                Ok(())
            } else {
                Err("multi-factor token rejected".into())
            }
        }
    }
}
