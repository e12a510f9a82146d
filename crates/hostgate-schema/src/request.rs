use crate::types::{HostGroup, LockKey, OwnerToken};
use crate::ValidationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]+-[a-zA-Z0-9]+(?:-[a-zA-Z0-9]+)*$").expect("static regex is valid")
});

static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]+-[a-zA-Z0-9]+(?:-[a-zA-Z0-9]+)*-\d{3}$")
        .expect("static regex is valid")
});

// Each octet 0-255; leading zeros are tolerated.
static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    let octet = r"(?:25[0-5]|2[0-4]\d|[0-1]\d{2}|[1-9]?\d)";
    Regex::new(&format!(r"^{octet}\.{octet}\.{octet}\.{octet}$")).expect("static regex is valid")
});

/// Body of `POST /v1/host/register`.
///
/// Field names follow the public API (`id`, `hostname`, `address`); the
/// capitalised names used by older clients (`ID`, `Hostname`, `IP`) are
/// accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    #[serde(default, alias = "ID")]
    pub id: String,
    #[serde(default, alias = "Hostname")]
    pub hostname: String,
    #[serde(default, alias = "IP", alias = "ip")]
    pub address: String,
}

impl RegistrationRequest {
    pub fn new(id: &str, hostname: &str, address: &str) -> Self {
        Self {
            id: id.to_owned(),
            hostname: hostname.to_owned(),
            address: address.to_owned(),
        }
    }

    pub fn from_json(body: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(body).map_err(|e| ValidationError::Json(e.to_string()))
    }

    /// Check every field. Emptiness is reported first, for all fields at once.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing: Vec<&str> = [
            ("id", &self.id),
            ("hostname", &self.hostname),
            ("ip", &self.address),
        ]
        .iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(name, _)| *name)
        .collect();
        if !missing.is_empty() {
            return Err(ValidationError::Missing(missing.join("/")));
        }

        validate_id(&self.id)?;
        validate_hostname(&self.hostname)?;
        validate_address(&self.address)
    }

    pub fn group(&self) -> HostGroup {
        HostGroup::from_hostname(&self.hostname)
    }

    pub fn owner(&self) -> OwnerToken {
        OwnerToken::from_parts(&self.id, &self.address)
    }

    pub fn lock_key(&self) -> LockKey {
        LockKey::for_hostname(&self.hostname)
    }
}

/// Body of `POST /v1/host/unregister`.
///
/// `id` and `address` are an optional guard: when both are present the lock
/// is only released if they match its owner; when both are absent the lock is
/// released unconditionally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterRequest {
    #[serde(default, alias = "Hostname")]
    pub hostname: String,
    #[serde(default, alias = "ID")]
    pub id: Option<String>,
    #[serde(default, alias = "IP", alias = "ip")]
    pub address: Option<String>,
}

impl UnregisterRequest {
    pub fn from_json(body: &[u8]) -> Result<Self, ValidationError> {
        let mut req: Self =
            serde_json::from_slice(body).map_err(|e| ValidationError::Json(e.to_string()))?;
        // An empty string is the same as leaving the field out.
        req.id = req.id.filter(|s| !s.is_empty());
        req.address = req.address.filter(|s| !s.is_empty());
        Ok(req)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.hostname.is_empty() {
            return Err(ValidationError::Missing("hostname".to_owned()));
        }
        validate_hostname(&self.hostname)?;
        match (&self.id, &self.address) {
            (Some(id), Some(address)) => {
                validate_id(id)?;
                validate_address(address)
            }
            (None, None) => Ok(()),
            _ => Err(ValidationError::PartialOwner),
        }
    }

    /// The owner guard, if one was supplied.
    pub fn expected_owner(&self) -> Option<OwnerToken> {
        match (&self.id, &self.address) {
            (Some(id), Some(address)) => Some(OwnerToken::from_parts(id, address)),
            _ => None,
        }
    }

    pub fn lock_key(&self) -> LockKey {
        LockKey::for_hostname(&self.hostname)
    }
}

pub fn validate_id(id: &str) -> Result<(), ValidationError> {
    if ID_RE.is_match(id) {
        Ok(())
    } else {
        Err(ValidationError::InvalidId(id.to_owned()))
    }
}

pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    if HOSTNAME_RE.is_match(hostname) {
        Ok(())
    } else {
        Err(ValidationError::InvalidHostname(hostname.to_owned()))
    }
}

pub fn validate_address(address: &str) -> Result<(), ValidationError> {
    if ADDRESS_RE.is_match(address) {
        Ok(())
    } else {
        Err(ValidationError::InvalidAddress(address.to_owned()))
    }
}
