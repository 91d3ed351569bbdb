use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Local projection of an upstream strain. Every field except `is_archived`
/// and `updated_at` is owned by the upstream catalog.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Strain {
    pub id: String,
    pub sku: Option<String>,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub strain_type: Option<String>,
    pub thc_content: Option<f64>,
    pub cbd_content: Option<f64>,
    pub cbg_content: Option<f64>,
    pub retail_price: Option<f64>,
    pub availability: bool,
    pub stock: Option<i64>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub feelings: Vec<String>,
    #[serde(default)]
    pub flavors: Vec<String>,
    #[serde(default)]
    pub helps_with: Vec<String>,
    pub brand_name: Option<String>,
    /// Locally owned; never sent on upsert so an archived row stays archived.
    #[serde(default, skip_serializing)]
    pub is_archived: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdminApproval {
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl AdminApproval {
    /// Parses upstream spellings, unknown values fall back to pending.
    pub fn from_upstream(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "VERIFIED" | "APPROVED" => AdminApproval::Verified,
            "REJECTED" | "DECLINED" => AdminApproval::Rejected,
            _ => AdminApproval::Pending,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RehomeStatus {
    #[default]
    None,
    Pending,
    Success,
    Failed,
}

/// Local projection of an upstream client, keyed by the local auth user.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClientRecord {
    pub user_id: String,
    pub drgreen_client_id: String,
    #[serde(default)]
    pub old_drgreen_client_id: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_kyc_verified: bool,
    #[serde(default)]
    pub admin_approval: AdminApproval,
    pub country_code: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<Value>,
    #[serde(default)]
    pub rehome_status: RehomeStatus,
    #[serde(default)]
    pub rehome_error: Option<String>,
    #[serde(default)]
    pub rehomed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub api_key_scope: Option<String>,
}

impl ClientRecord {
    pub fn new(user_id: impl Into<String>, drgreen_client_id: impl Into<String>) -> Self {
        ClientRecord {
            user_id: user_id.into(),
            drgreen_client_id: drgreen_client_id.into(),
            old_drgreen_client_id: None,
            email: None,
            full_name: None,
            is_kyc_verified: false,
            admin_approval: AdminApproval::Pending,
            country_code: None,
            shipping_address: None,
            rehome_status: RehomeStatus::None,
            rehome_error: None,
            rehomed_at: None,
            api_key_scope: None,
        }
    }
}

/// A verified local auth identity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_archived_flag_not_serialized() {
        let strain = Strain {
            id: "s1".into(),
            sku: None,
            name: "Blue Dream".into(),
            description: None,
            strain_type: Some("Hybrid".into()),
            thc_content: Some(21.5),
            cbd_content: None,
            cbg_content: None,
            retail_price: None,
            availability: true,
            stock: None,
            image_url: None,
            feelings: vec![],
            flavors: vec![],
            helps_with: vec![],
            brand_name: None,
            is_archived: true,
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(&strain).unwrap();
        assert!(value.get("is_archived").is_none());
        assert_eq!(value["type"], "Hybrid");
    }

    #[test]
    fn test_client_record_defaults() {
        let record: ClientRecord = serde_json::from_value(json!({
            "user_id": "u1",
            "drgreen_client_id": "c1",
            "email": "a@example.com",
            "full_name": null,
            "country_code": "PT",
            "admin_approval": "VERIFIED",
        }))
        .unwrap();
        assert_eq!(record.admin_approval, AdminApproval::Verified);
        assert_eq!(record.rehome_status, RehomeStatus::None);
        assert!(!record.is_kyc_verified);
    }

    #[test]
    fn test_admin_approval_from_upstream() {
        assert_eq!(AdminApproval::from_upstream("verified"), AdminApproval::Verified);
        assert_eq!(AdminApproval::from_upstream("REJECTED"), AdminApproval::Rejected);
        assert_eq!(AdminApproval::from_upstream("whatever"), AdminApproval::Pending);
    }
}
