use crate::bitrix_types::{
    Activity, ActivityFields, ActivityUpdate, BitrixResponse, Contact, Deal, DuplicateMatches,
    ExternalCallFinish, ExternalCallRegister, RegisteredCall,
};
use crate::error::AppError;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::error;

/// The set of CRM operations the pipeline needs, abstracted so tests can run
/// against a scripted double instead of a live Bitrix portal.
#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn find_contacts_by_phone(&self, phone: &str) -> Result<Vec<Contact>, AppError>;

    /// In-progress deals for a contact, constrained to the responsible user.
    /// Callers must still re-check ownership on each returned deal.
    async fn find_open_deals(
        &self,
        contact_id: i64,
        assigned_user_id: i64,
    ) -> Result<Vec<Deal>, AppError>;

    async fn find_duplicates_by_phone(&self, phone: &str) -> Result<DuplicateMatches, AppError>;

    async fn get_contact(&self, contact_id: i64) -> Result<Option<Contact>, AppError>;

    async fn register_external_call(
        &self,
        register: &ExternalCallRegister,
    ) -> Result<RegisteredCall, AppError>;

    async fn finish_external_call(&self, finish: &ExternalCallFinish) -> Result<(), AppError>;

    async fn add_activity(&self, fields: &ActivityFields) -> Result<i64, AppError>;

    async fn update_activity(
        &self,
        activity_id: i64,
        fields: &ActivityUpdate,
    ) -> Result<(), AppError>;

    async fn list_activities_by_origin(&self, origin_id: &str) -> Result<Vec<Activity>, AppError>;
}

/// Thin client over a Bitrix inbound-webhook base URL
/// (`https://<portal>/rest/<user>/<token>`).
pub struct BitrixClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl BitrixClient {
    pub fn new(http_client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}.json", self.base_url, method)
    }

    async fn post<P, T>(&self, method: &'static str, payload: &P) -> Result<T, AppError>
    where
        P: Serialize + Sync,
        T: DeserializeOwned,
    {
        let resp = self
            .http_client
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!(method = method, error = %e, "failed to send request to Bitrix");
                AppError::with_detail(method, e.to_string())
            })?;
        let parsed = resp.json::<BitrixResponse<T>>().await.map_err(|e| {
            error!(method = method, error = %e, "failed to deserialize Bitrix response");
            AppError::with_detail(method, e.to_string())
        })?;
        parsed.into_result(method)
    }

    async fn get<T>(&self, method: &'static str, query: &[(&str, String)]) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let resp = self
            .http_client
            .get(self.method_url(method))
            .query(query)
            .send()
            .await
            .map_err(|e| {
                error!(method = method, error = %e, "failed to send request to Bitrix");
                AppError::with_detail(method, e.to_string())
            })?;
        let parsed = resp.json::<BitrixResponse<T>>().await.map_err(|e| {
            error!(method = method, error = %e, "failed to deserialize Bitrix response");
            AppError::with_detail(method, e.to_string())
        })?;
        parsed.into_result(method)
    }
}

#[async_trait]
impl CrmApi for BitrixClient {
    async fn find_contacts_by_phone(&self, phone: &str) -> Result<Vec<Contact>, AppError> {
        self.get(
            "crm.contact.list",
            &[
                ("filter[PHONE]", phone.to_string()),
                ("select[]", "ID".to_string()),
                ("select[]", "NAME".to_string()),
                ("select[]", "PHONE".to_string()),
            ],
        )
        .await
    }

    async fn find_open_deals(
        &self,
        contact_id: i64,
        assigned_user_id: i64,
    ) -> Result<Vec<Deal>, AppError> {
        self.get(
            "crm.deal.list",
            &[
                ("filter[CONTACT_ID]", contact_id.to_string()),
                ("filter[ASSIGNED_BY_ID]", assigned_user_id.to_string()),
                // "P" is Bitrix stage semantics for in-progress
                ("filter[STAGE_SEMANTIC_ID]", "P".to_string()),
                ("order[ID]", "DESC".to_string()),
                ("select[]", "ID".to_string()),
                ("select[]", "TITLE".to_string()),
                ("select[]", "ASSIGNED_BY_ID".to_string()),
            ],
        )
        .await
    }

    async fn find_duplicates_by_phone(&self, phone: &str) -> Result<DuplicateMatches, AppError> {
        self.post(
            "crm.duplicate.findbycomm",
            &json!({ "type": "PHONE", "values": [phone] }),
        )
        .await
    }

    async fn get_contact(&self, contact_id: i64) -> Result<Option<Contact>, AppError> {
        let resp = self
            .http_client
            .get(self.method_url("crm.contact.get"))
            .query(&[("id", contact_id.to_string())])
            .send()
            .await
            .map_err(|e| {
                error!(contact_id, error = %e, "failed to fetch contact from Bitrix");
                AppError::with_detail("crm.contact.get", e.to_string())
            })?;
        let parsed = resp
            .json::<BitrixResponse<Contact>>()
            .await
            .map_err(|e| {
                error!(contact_id, error = %e, "failed to deserialize Bitrix contact");
                AppError::with_detail("crm.contact.get", e.to_string())
            })?;
        // An unknown id comes back as an error payload; treat it as a miss.
        Ok(parsed.result)
    }

    async fn register_external_call(
        &self,
        register: &ExternalCallRegister,
    ) -> Result<RegisteredCall, AppError> {
        self.post("telephony.externalcall.register", register).await
    }

    async fn finish_external_call(&self, finish: &ExternalCallFinish) -> Result<(), AppError> {
        let _: serde_json::Value = self.post("telephony.externalcall.finish", finish).await?;
        Ok(())
    }

    async fn add_activity(&self, fields: &ActivityFields) -> Result<i64, AppError> {
        let result: serde_json::Value = self
            .post("crm.activity.add", &json!({ "fields": fields }))
            .await?;
        // Bitrix has returned this id both as a number and as a string
        result
            .as_i64()
            .or_else(|| result.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| AppError::with_detail("crm.activity.add", result.to_string()))
    }

    async fn update_activity(
        &self,
        activity_id: i64,
        fields: &ActivityUpdate,
    ) -> Result<(), AppError> {
        let _: serde_json::Value = self
            .post(
                "crm.activity.update",
                &json!({ "ID": activity_id, "fields": fields }),
            )
            .await?;
        Ok(())
    }

    async fn list_activities_by_origin(&self, origin_id: &str) -> Result<Vec<Activity>, AppError> {
        self.get(
            "crm.activity.list",
            &[
                ("filter[ORIGIN_ID]", origin_id.to_string()),
                ("select[]", "ID".to_string()),
                ("select[]", "SUBJECT".to_string()),
                ("select[]", "ORIGIN_ID".to_string()),
            ],
        )
        .await
    }
}
