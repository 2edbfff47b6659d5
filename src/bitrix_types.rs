use crate::error::AppError;

use serde::{Deserialize, Serialize};

/// Every Bitrix REST response wraps its payload in a `result` field; a
/// missing `result` on a write means the remote call failed.
#[derive(Deserialize, Debug)]
pub struct BitrixResponse<T> {
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl<T> BitrixResponse<T> {
    pub fn into_result(self, method: &'static str) -> Result<T, AppError> {
        match self.result {
            Some(result) => Ok(result),
            None => {
                let detail = self
                    .error_description
                    .or(self.error)
                    .unwrap_or_else(|| "no result in response".to_string());
                Err(AppError::with_detail(method, detail))
            }
        }
    }
}

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ExternalCallRegister {
    pub user_id: i64,
    pub phone_number: String,
    pub call_start_date: String,
    pub call_duration: u64,
    pub call_id: String,
    pub r#type: u8,
    pub show: u8,
}

#[derive(Deserialize, Debug)]
pub struct RegisteredCall {
    #[serde(rename = "CALL_ID")]
    pub call_id: String,
}

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ExternalCallFinish {
    pub call_id: String,
    pub user_id: i64,
    pub duration: u64,
    pub status_code: u16,
    pub record_url: String,
    pub add_to_chat: u8,
}

/// Bitrix multifield entry, as returned in a contact's `PHONE` list.
#[derive(Deserialize, Debug, Clone)]
pub struct MultiField {
    #[serde(rename = "VALUE", default)]
    pub value: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Contact {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<Vec<MultiField>>,
}

impl Contact {
    pub fn id_num(&self) -> Result<i64, AppError> {
        self.id
            .parse()
            .map_err(|_| AppError::with_detail("contact-id", self.id.clone()))
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Desconhecido")
    }

    pub fn phone_values(&self) -> impl Iterator<Item = &str> {
        self.phone
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|field| field.value.as_str())
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Deal {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub assigned_by_id: Option<String>,
}

impl Deal {
    pub fn id_num(&self) -> Result<i64, AppError> {
        self.id
            .parse()
            .map_err(|_| AppError::with_detail("deal-id", self.id.clone()))
    }

    /// Defensive owner check; Bitrix list filters can be inexact.
    pub fn assigned_to(&self, user_id: i64) -> bool {
        self.assigned_by_id
            .as_deref()
            .and_then(|id| id.parse::<i64>().ok())
            == Some(user_id)
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DuplicateMatches {
    #[serde(default)]
    pub contact: Vec<i64>,
    #[serde(default)]
    pub lead: Vec<i64>,
}

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ActivityFields {
    pub owner_id: i64,
    pub owner_type_id: u8,
    pub type_id: u8,
    pub subject: String,
    pub communications: Vec<Communication>,
    pub responsible_id: i64,
    pub description: String,
    pub description_type: u8,
    pub completed: String,
    pub direction: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Communication {
    pub value: String,
    pub r#type: String,
    pub entity_type_id: u8,
    pub entity_id: i64,
}

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ActivityUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Activity {
    pub id: String,
    #[allow(dead_code)]
    #[serde(default)]
    pub subject: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    pub origin_id: Option<String>,
}

impl Activity {
    pub fn id_num(&self) -> Result<i64, AppError> {
        self.id
            .parse()
            .map_err(|_| AppError::with_detail("activity-id", self.id.clone()))
    }
}
