use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

/// Visa categories offered on the intake form. Advisory only.
pub const VISA_OPTIONS: [&str; 4] = ["O-1", "EB-1A", "EB-2 NIW", "I don't know"];

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    Pending,
    ReachedOut,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 2] = [LeadStatus::Pending, LeadStatus::ReachedOut];

    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::Pending    => "pending",
            LeadStatus::ReachedOut => "reached_out",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LeadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownStatus(s.to_string()))
    }
}

/// A prospective client's case record as held by the store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub first_name: String,
    pub last_name:  String,
    #[serde(default)]
    pub email:      String,
    #[serde(default)]
    pub country:    String,
    #[serde(default)]
    pub linkedin:   String,
    #[serde(default, deserialize_with = "de_visas")]
    pub visas:      Vec<String>,
    #[serde(default)]
    pub message:    String,

    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub status: LeadStatus,
}

impl Lead {
    /// `needle` must already be lowercased.
    pub fn name_contains(&self, needle: &str) -> bool {
        self.first_name.to_lowercase().contains(needle)
            || self.last_name.to_lowercase().contains(needle)
    }
}

/// Intake form payload. `id`, `dateCreated` and `status` are assigned by the store.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NewLead {
    pub first_name: String,
    pub last_name:  String,
    pub email:      String,
    pub country:    String,
    pub linkedin:   String,
    #[serde(deserialize_with = "de_visas")]
    pub visas:      Vec<String>,
    pub message:    String,
}

impl NewLead {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing: Vec<&'static str> = [
            ("firstName", &self.first_name),
            ("lastName",  &self.last_name),
            ("email",     &self.email),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::MissingFields(missing))
        }
    }
}

/// Raw status edit as it arrives over the wire; see [`StatusUpdateRequest::validate`].
#[derive(Deserialize, Debug, Default)]
pub struct StatusUpdateRequest {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id:     Option<String>,
    pub status: Option<String>,
}

impl StatusUpdateRequest {
    pub fn validate(self) -> Result<StatusUpdate, ValidationError> {
        let id     = self.id.filter(|id| !id.trim().is_empty());
        let status = self.status.filter(|status| !status.trim().is_empty());

        match (id, status) {
            (Some(id), Some(status)) => Ok(StatusUpdate {
                id,
                status: status.trim().parse()?,
            }),
            _ => Err(ValidationError::MissingIdOrStatus),
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    pub id:     String,
    pub status: LeadStatus,
}

// ── serde helpers ──────────────────────────────────────────────────────
/// Sheet rows carry numeric ids; both sides of the wire accept either form.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(text)  => text,
            RawId::Number(num) => num.to_string(),
        }
    }
}

fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(RawId::deserialize(deserializer)?.into_string())
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(RawId::into_string))
}

fn de_visas<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawVisas {
        List(Vec<String>),
        Joined(String),
    }

    let labels = match Option::<RawVisas>::deserialize(deserializer)? {
        Some(RawVisas::List(list))   => list,
        Some(RawVisas::Joined(text)) => text.split(',').map(str::to_string).collect(),
        None                         => Vec::new(),
    };

    let mut visas: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.trim();
        if !label.is_empty() && !visas.iter().any(|seen| seen == label) {
            visas.push(label.to_string());
        }
    }
    Ok(visas)
}
