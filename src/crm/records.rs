// Form submission payloads and CRM record shaping

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Records default to the Leads module when the form does not say otherwise
pub const DEFAULT_MODULE: &str = "Leads";

/// Form submission payload accepted from the frontend
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmitRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub message: Option<String>,
    pub question: Option<String>,
    /// "Leads" or "Contacts"
    pub module: Option<String>,
    pub lead_source: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub file_number: Option<String>,
    pub account_name: Option<String>,
    pub description: Option<String>,
    pub custom_fields: Map<String, Value>,
    pub attachments: Vec<Attachment>,
}

/// File attachment reference supplied by the frontend
#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: Option<String>,
    pub path: Option<String>,
}

impl SubmitRequest {
    pub fn module(&self) -> &str {
        self.module
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODULE)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Normalize a phone number for the CRM.
///
/// The form audience is primarily Saudi, so bare national numbers get a
/// +966 prefix; recognizable international formats pass through with a
/// leading plus.
pub fn format_phone_number(phone: &str) -> String {
    let cleaned: String = phone.trim().chars().filter(|c| c.is_ascii_digit()).collect();
    if cleaned.is_empty() {
        return String::new();
    }

    if let Some(rest) = cleaned.strip_prefix("966") {
        // A 966 prefix followed by a full US number means the caller
        // double-prefixed; keep the inner number
        if rest.starts_with('1') && rest.len() >= 10 {
            return format!("+{}", rest);
        }

        let national = rest.strip_prefix('0').unwrap_or(rest);
        if national.starts_with('5') && (national.len() == 9 || national.len() == 10) {
            return format!("+966{}", national);
        }

        // Not a recognizable Saudi mobile, keep whatever was entered
        return format!("+{}", cleaned);
    }

    if cleaned.len() > 10 {
        if cleaned.starts_with('1') && cleaned.len() == 11 {
            return format!("+{}", cleaned);
        }
        // Long numbers not starting with 5 already carry a country code
        if !cleaned.starts_with('5') {
            return format!("+{}", cleaned);
        }
    }

    if let Some(rest) = cleaned.strip_prefix('0') {
        return format!("+966{}", rest);
    }

    format!("+966{}", cleaned)
}

/// Expand a date-only value to the full ISO-8601 datetime Zoho requires.
///
/// `YYYY-MM-DD` becomes midnight with a +03:00 offset (Riyadh); values that
/// already carry a time component pass through; anything else is rejected.
pub fn format_date_value(value: &str) -> Option<String> {
    if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok() {
        return Some(format!("{}T00:00:00+03:00", value));
    }

    if value.contains('T') {
        return Some(value.to_string());
    }

    None
}

/// Build the CRM record payload from a form submission.
///
/// Base Lead/Contact fields first, then cleaned custom fields merged on top
/// (custom fields take precedence); null and empty values are dropped.
pub fn build_record(req: &SubmitRequest) -> Map<String, Value> {
    let mut record = Map::new();

    let last_name = non_empty(&req.last_name)
        .or_else(|| non_empty(&req.name))
        .unwrap_or("N/A");
    record.insert("Last_Name".to_string(), Value::from(last_name));
    record.insert(
        "First_Name".to_string(),
        Value::from(req.first_name.clone().unwrap_or_default()),
    );
    record.insert(
        "Email".to_string(),
        Value::from(req.email.clone().unwrap_or_default()),
    );

    let phone = non_empty(&req.phone)
        .or_else(|| non_empty(&req.mobile))
        .unwrap_or("");
    record.insert("Phone".to_string(), Value::from(format_phone_number(phone)));

    let description = non_empty(&req.description)
        .or_else(|| non_empty(&req.message))
        .or_else(|| non_empty(&req.question))
        .unwrap_or("");
    record.insert("Description".to_string(), Value::from(description));
    record.insert(
        "Lead_Source".to_string(),
        Value::from(non_empty(&req.lead_source).unwrap_or("Website Form")),
    );

    let module = req.module();
    if module == "Leads" {
        // Medical consultation forms reuse Company for the file number
        if let Some(file_number) = non_empty(&req.file_number) {
            record.insert("Company".to_string(), Value::from(file_number));
        } else if let Some(company) = non_empty(&req.company) {
            record.insert("Company".to_string(), Value::from(company));
        }

        if let Some(Value::String(status)) = req.custom_fields.get("Status") {
            record.insert("Lead_Status".to_string(), Value::from(status.as_str()));
        }
    }

    if module == "Contacts" {
        if let Some(account_name) = non_empty(&req.account_name) {
            record.insert("Account_Name".to_string(), Value::from(account_name));
        }
    }

    for (key, value) in &req.custom_fields {
        // Status is lifted into Lead_Status above
        if key == "Status" || value.is_null() {
            continue;
        }
        if matches!(value, Value::String(s) if s.is_empty()) {
            continue;
        }

        match (key.as_str(), value) {
            // field2 is the org's custom phone field
            ("field2", Value::String(s)) => {
                let phone = format_phone_number(s);
                if !phone.is_empty() {
                    record.insert(key.clone(), Value::from(phone));
                }
            }
            // field is the org's custom datetime field
            ("field", Value::String(s)) => match format_date_value(s) {
                Some(datetime) => {
                    record.insert(key.clone(), Value::from(datetime));
                }
                None => {
                    tracing::warn!(field = %key, value = %s, "Invalid date format, skipping field");
                }
            },
            _ => {
                record.insert(key.clone(), value.clone());
            }
        }
    }

    record.retain(|_, v| !v.is_null());
    record
}
