//! Ordered candidate lists for reading loosely shaped upstream records.
//!
//! The upstream API is not consistent about field names, so each logical
//! attribute lists the spellings it may arrive under. The first candidate
//! holding a usable value wins. Candidates starting with `/` are JSON
//! pointers into nested objects.

use serde_json::Value;

pub const STRAIN_ID: &[&str] = &["id", "strainId", "_id"];
pub const STRAIN_NAME: &[&str] = &["name", "strainName", "title"];
pub const SKU: &[&str] = &["sku", "batchNumber", "/strainLocations/0/sku"];
pub const DESCRIPTION: &[&str] = &["description", "desc", "strainDescription"];
pub const STRAIN_TYPE: &[&str] = &["type", "strainType", "category"];
pub const THC: &[&str] = &["thc", "thcContent", "THC", "thc_content"];
pub const CBD: &[&str] = &["cbd", "cbdContent", "CBD", "cbd_content"];
pub const CBG: &[&str] = &["cbg", "cbgContent", "CBG", "cbg_content"];
pub const RETAIL_PRICE: &[&str] = &[
    "retailPrice",
    "retail_price",
    "price",
    "/strainLocations/0/retailPrice",
];
pub const AVAILABILITY: &[&str] = &[
    "availability",
    "isAvailable",
    "available",
    "/strainLocations/0/isAvailable",
];
pub const STOCK: &[&str] = &[
    "stock",
    "stockQuantity",
    "quantity",
    "/strainLocations/0/stockQuantity",
];
pub const IMAGE_URL: &[&str] = &[
    "imageUrl",
    "image_url",
    "image",
    "/strainImages/0/strainImageUrl",
];
pub const FEELINGS: &[&str] = &["feelings", "effects"];
pub const FLAVORS: &[&str] = &["flavors", "flavour", "flavours", "flavor"];
pub const HELPS_WITH: &[&str] = &["helpsWith", "helps_with", "medicalConditions"];
pub const BRAND_NAME: &[&str] = &["brandName", "brand_name", "/brand/name", "brand"];

pub const CLIENT_ID: &[&str] = &["id", "clientId", "client_id"];
pub const CLIENT_EMAIL: &[&str] = &["email", "emailAddress", "/user/email"];
pub const FIRST_NAME: &[&str] = &["firstName", "first_name"];
pub const LAST_NAME: &[&str] = &["lastName", "last_name"];
pub const KYC_VERIFIED: &[&str] = &[
    "isKYCVerified",
    "isKycVerified",
    "kycVerified",
    "is_kyc_verified",
];
pub const ADMIN_APPROVAL: &[&str] = &["adminApproval", "admin_approval", "approvalStatus"];
pub const CLIENT_COUNTRY: &[&str] = &["/shipping/countryCode", "countryCode", "country_code"];
pub const SHIPPING: &[&str] = &["shipping", "shippingAddress", "shipping_address"];

const STRAIN_PAGE: &[&str] = &["/data/strains", "/data", "/strains"];
const CLIENT_PAGE: &[&str] = &["/data/clients", "/data", "/clients"];
const HAS_NEXT_PAGE: &[&str] = &[
    "/data/pageMetaDto/hasNextPage",
    "/pageMetaDto/hasNextPage",
    "/data/meta/hasNextPage",
];

fn lookup<'a>(record: &'a Value, candidate: &str) -> Option<&'a Value> {
    let value = if candidate.starts_with('/') {
        record.pointer(candidate)
    } else {
        record.get(candidate)
    };
    value.filter(|value| !value.is_null())
}

/// First candidate that parses as a number. Numeric strings such as `"21.5%"`
/// are accepted.
pub fn number(record: &Value, candidates: &[&str]) -> Option<f64> {
    candidates
        .iter()
        .filter_map(|candidate| lookup(record, candidate))
        .find_map(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
            _ => None,
        })
}

/// First candidate holding a non-empty string. Numbers are rendered as text.
pub fn string(record: &Value, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|candidate| lookup(record, candidate))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// First candidate holding a boolean, a `"true"`/`"false"` string or a number.
pub fn boolean(record: &Value, candidates: &[&str]) -> Option<bool> {
    candidates
        .iter()
        .filter_map(|candidate| lookup(record, candidate))
        .find_map(|value| match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|n| n != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        })
}

/// First candidate holding a list. Accepts arrays of strings, arrays of
/// objects with a `name`, or a comma separated string.
pub fn string_list(record: &Value, candidates: &[&str]) -> Vec<String> {
    candidates
        .iter()
        .filter_map(|candidate| lookup(record, candidate))
        .find_map(|value| match value {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.trim().to_string()),
                        Value::Object(_) => {
                            item.get("name").and_then(Value::as_str).map(str::to_string)
                        }
                        _ => None,
                    })
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            Value::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

fn page(body: &Value, candidates: &[&str]) -> Vec<Value> {
    candidates
        .iter()
        .find_map(|candidate| body.pointer(candidate).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default()
}

pub fn strain_page(body: &Value) -> Vec<Value> {
    page(body, STRAIN_PAGE)
}

pub fn client_page(body: &Value) -> Vec<Value> {
    page(body, CLIENT_PAGE)
}

/// The upstream pagination flag, when the response carries one.
pub fn has_next_page(body: &Value) -> Option<bool> {
    boolean(body, HAS_NEXT_PAGE)
}
