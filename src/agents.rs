use crate::error::AppError;

use serde::Deserialize;
use std::collections::HashMap;

/// One roster entry: the Bitrix user behind a ramal, plus the DDD used to
/// complete local numbers dialed from that extension.
#[derive(Deserialize, Debug, Clone)]
pub struct AgentMapping {
    pub user_id: i64,
    #[serde(default)]
    pub ddd: Option<String>,
}

/// Immutable ramal → agent roster, loaded once at startup.  An unmapped
/// ramal is an expected, terminal condition for an event, not an error.
pub struct AgentDirectory {
    agents: HashMap<String, AgentMapping>,
}

impl AgentDirectory {
    /// Load the roster from a JSON file shaped as
    /// `{ "<ramal>": {"user_id": 36, "ddd": "11"}, … }`.
    pub fn from_file(path: &str) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::with_detail("agents-file", format!("{path}: {e}")))?;
        let agents: HashMap<String, AgentMapping> = serde_json::from_str(&raw)
            .map_err(|e| AppError::with_detail("agents-file", format!("{path}: {e}")))?;
        Self::validated(agents)
    }

    /// The fixed roster this deployment shipped with, used when no file is
    /// configured.
    pub fn builtin() -> Self {
        let agents = HashMap::from([
            ("1529".to_string(), mapping(36, "11")),
            ("1557".to_string(), mapping(38, "11")),
            ("1560".to_string(), mapping(34, "71")),
            ("1520".to_string(), mapping(30, "71")),
            ("1810".to_string(), mapping(94, "11")),
        ]);
        Self { agents }
    }

    fn validated(agents: HashMap<String, AgentMapping>) -> Result<Self, AppError> {
        if agents.is_empty() {
            return Err(AppError::new("agents-file-empty"));
        }
        for (ramal, agent) in &agents {
            if agent.user_id <= 0 {
                return Err(AppError::with_detail(
                    "agents-file-invalid-user",
                    format!("ramal {ramal}"),
                ));
            }
        }
        Ok(Self { agents })
    }

    pub fn resolve(&self, ramal: &str) -> Option<&AgentMapping> {
        self.agents.get(ramal)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }
}

fn mapping(user_id: i64, ddd: &str) -> AgentMapping {
    AgentMapping {
        user_id,
        ddd: Some(ddd.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_roster_resolves_known_ramal() {
        let directory = AgentDirectory::builtin();
        let agent = directory.resolve("1529").unwrap();
        assert_eq!(agent.user_id, 36);
        assert_eq!(agent.ddd.as_deref(), Some("11"));
        assert_eq!(directory.len(), 5);
    }

    #[test]
    fn unknown_ramal_is_a_miss_not_an_error() {
        assert!(AgentDirectory::builtin().resolve("9999").is_none());
    }

    #[test]
    fn roster_json_parses() {
        let agents: HashMap<String, AgentMapping> =
            serde_json::from_str(r#"{"1529": {"user_id": 36, "ddd": "11"}, "2001": {"user_id": 7}}"#)
                .unwrap();
        let directory = AgentDirectory::validated(agents).unwrap();
        assert_eq!(directory.resolve("2001").unwrap().user_id, 7);
        assert!(directory.resolve("2001").unwrap().ddd.is_none());
    }

    #[test]
    fn empty_or_invalid_roster_is_rejected() {
        assert!(AgentDirectory::validated(HashMap::new()).is_err());
        let bad = HashMap::from([("1529".to_string(), AgentMapping { user_id: 0, ddd: None })]);
        assert!(AgentDirectory::validated(bad).is_err());
    }
}
