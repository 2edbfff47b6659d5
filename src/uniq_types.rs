use serde::Deserialize;

/// Outer envelope of a Uniq webhook notification.  Only `payload` carries
/// anything the pipeline acts on; `type` is pass-through metadata.
#[derive(Deserialize, Debug)]
pub struct WebhookEnvelope {
    #[allow(dead_code)]
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub payload: CallEvent,
}

/// One call-event notification.  Every field is defaulted so that a sparse
/// or partial payload still deserializes; structural validation is the
/// pipeline's job, not serde's.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct CallEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subscribers: Vec<Subscriber>,
    #[serde(default)]
    pub times: CallTimes,
    #[serde(default)]
    pub duration: Option<u64>,
    #[allow(dead_code)]
    #[serde(default)]
    pub status: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    pub called: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    pub caller_id: Option<String>,
}

impl CallEvent {
    /// The internal agent leg of the call (the `user` subscriber).
    pub fn agent_leg(&self) -> Option<&Subscriber> {
        self.subscribers
            .iter()
            .find(|sub| sub.kind == SubscriberKind::User)
    }

    /// The counterparty leg (the `remote` subscriber).
    pub fn remote_leg(&self) -> Option<&Subscriber> {
        self.subscribers
            .iter()
            .find(|sub| sub.kind == SubscriberKind::Remote)
    }

    /// Duration in seconds: the platform-supplied value when present,
    /// otherwise derived from `release - setup`.  Zero means unknown.
    pub fn effective_duration(&self) -> u64 {
        if let Some(duration) = self.duration {
            return duration;
        }
        if self.times.setup > 0 && self.times.release >= self.times.setup {
            return (self.times.release - self.times.setup) as u64;
        }
        0
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct CallTimes {
    #[serde(default)]
    pub setup: i64,
    #[serde(default)]
    pub release: i64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Subscriber {
    #[serde(rename = "type", default)]
    pub kind: SubscriberKind,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub number: String,
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberKind {
    User,
    Remote,
    #[default]
    #[serde(other)]
    Unknown,
}
