use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::contract::{
    ConfigurationError, MAX_INSTANCES_PER_POLICY, MAX_POLICY_NAME_LENGTH, PROVIDER_SNAPSHOT_CEILING,
};
use crate::snapshot::InstanceRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    pub name: String,
    pub max_snapshots: usize,
    pub target_instances: Vec<InstanceRef>,
}

pub type PolicySet = BTreeMap<String, RetentionPolicy>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPolicy {
    #[serde(rename = "maxSnapshots", alias = "max_snapshots")]
    max_snapshots: Option<i64>,
    instances: Option<Vec<String>>,
}

/// Policy entries in document order. Repeated keys are kept so they can be
/// reported instead of overwriting each other.
struct RawDocument(Vec<(String, RawPolicy)>);

impl<'de> Deserialize<'de> for RawDocument {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = RawDocument;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("an object mapping policy names to policies")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<String, RawPolicy>()? {
                    entries.push(entry);
                }
                Ok(RawDocument(entries))
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

/// Parses and validates the policy configuration document.
///
/// The document maps policy names to `{ "maxSnapshots": n, "instances": [..] }`.
pub fn load_policies(text: &str) -> Result<PolicySet, ConfigurationError> {
    let RawDocument(entries) = serde_json::from_str::<RawDocument>(text)
        .map_err(|error| ConfigurationError::MalformedJson(error.to_string()))?;

    if entries.is_empty() {
        return Err(ConfigurationError::NoPolicies);
    }

    let mut policies = PolicySet::new();
    for (name, raw_policy) in entries {
        let policy = validate_policy(name, raw_policy)?;
        if policies.contains_key(&policy.name) {
            return Err(ConfigurationError::DuplicatePolicy { name: policy.name });
        }
        policies.insert(policy.name.clone(), policy);
    }

    Ok(policies)
}

fn validate_policy(name: String, raw: RawPolicy) -> Result<RetentionPolicy, ConfigurationError> {
    let name = validate_policy_name(name)?;

    let Some(max_snapshots) = raw.max_snapshots else {
        return Err(ConfigurationError::MissingField {
            policy: name,
            field: "maxSnapshots",
        });
    };
    if max_snapshots <= 0 {
        return Err(ConfigurationError::NonPositiveMaxSnapshots {
            policy: name,
            value: max_snapshots,
        });
    }
    let max_snapshots = match usize::try_from(max_snapshots) {
        Ok(value) if value <= PROVIDER_SNAPSHOT_CEILING => value,
        _ => {
            return Err(ConfigurationError::MaxSnapshotsAboveCeiling {
                policy: name,
                value: max_snapshots,
                ceiling: PROVIDER_SNAPSHOT_CEILING,
            });
        }
    };

    let Some(instances) = raw.instances else {
        return Err(ConfigurationError::MissingField {
            policy: name,
            field: "instances",
        });
    };
    if instances.is_empty() {
        return Err(ConfigurationError::EmptyInstanceList { policy: name });
    }
    if instances.len() > MAX_INSTANCES_PER_POLICY {
        return Err(ConfigurationError::TooManyInstances {
            policy: name,
            count: instances.len(),
            max: MAX_INSTANCES_PER_POLICY,
        });
    }

    let mut target_instances = Vec::with_capacity(instances.len());
    for raw_instance in &instances {
        match InstanceRef::parse(raw_instance) {
            Some(instance) => target_instances.push(instance),
            None => return Err(ConfigurationError::BlankInstance { policy: name }),
        }
    }

    Ok(RetentionPolicy {
        name,
        max_snapshots,
        target_instances,
    })
}

fn validate_policy_name(name: String) -> Result<String, ConfigurationError> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(ConfigurationError::EmptyPolicyName);
    }
    if name.chars().count() > MAX_POLICY_NAME_LENGTH {
        return Err(ConfigurationError::PolicyNameTooLong {
            name,
            max: MAX_POLICY_NAME_LENGTH,
        });
    }
    if !name.chars().all(is_policy_name_char) {
        return Err(ConfigurationError::InvalidPolicyName { name });
    }
    Ok(name)
}

/// Names end up inside snapshot names, so they stay within a safe alphabet.
fn is_policy_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Resolves the policies a trigger asked for. An empty selection means
/// every configured policy, in name order.
pub fn resolve_policies<'a>(
    policies: &'a PolicySet,
    selection: &[String],
) -> Result<Vec<&'a RetentionPolicy>, ConfigurationError> {
    if selection.is_empty() {
        return Ok(policies.values().collect());
    }

    let mut resolved: Vec<&RetentionPolicy> = Vec::with_capacity(selection.len());
    for requested in selection {
        let name = requested.trim();
        let policy = policies
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownPolicy {
                name: name.to_string(),
            })?;
        if !resolved.iter().any(|seen| seen.name == policy.name) {
            resolved.push(policy);
        }
    }

    Ok(resolved)
}

pub fn config_fingerprint(policies: &PolicySet) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_policy_json(policies));
    format!("{:x}", hasher.finalize())
}

fn stable_policy_json(policies: &PolicySet) -> String {
    // BTreeMap keys and derived field order keep this canonical.
    serde_json::to_string(policies).unwrap_or_default()
}
