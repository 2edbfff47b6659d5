use crate::agents::AgentDirectory;
use crate::bitrix::CrmApi;
use crate::config::Config;
use crate::dedup::DedupGuard;

use std::sync::Arc;

/// Shared state behind every webhook request.  Everything here is immutable
/// after startup except the dedup guard, which is internally synchronized.
pub struct AppState {
    pub config: Config,
    pub agents: AgentDirectory,
    pub dedup: DedupGuard,
    pub crm: Arc<dyn CrmApi>,
}
