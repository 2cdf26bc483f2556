use std::fmt;

/// Hierarchical session scope identifier: `agent:<agentId>:<surface>:<subtype>[:thread:<id>]`.
///
/// Mirrors the `{channel_name}:{sender_id}` keying convention used by the
/// channel dispatcher, generalized to the agent/surface/thread shape this
/// orchestrator routes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    /// Builds `agent:<agentId>:<surface>:<subtype>` with no thread suffix.
    pub fn build(agent_id: &str, surface: &str, subtype: &str) -> Self {
        Self(format!("agent:{agent_id}:{surface}:{subtype}"))
    }

    /// Builds the thread-scoped variant of an existing key.
    pub fn with_thread(&self, thread_id: &str) -> Self {
        Self(format!("{}:thread:{}", self.0, thread_id))
    }

    /// Parses a raw string without validating segment counts beyond the
    /// mandatory `agent:` prefix — unknown surfaces are preserved verbatim
    /// so callers can round-trip keys they don't otherwise interpret.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.starts_with("agent:") {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    /// Builds the synthetic key used by the cron subsystem: `cron:<id>`.
    pub fn cron(id: &str) -> Self {
        Self(format!("cron:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> Vec<&str> {
        self.0.split(':').collect()
    }

    pub fn agent_id(&self) -> Option<&str> {
        let segs = self.segments();
        if segs.first() == Some(&"agent") {
            segs.get(1).copied()
        } else {
            None
        }
    }

    pub fn surface(&self) -> Option<&str> {
        let segs = self.segments();
        if segs.first() == Some(&"agent") {
            segs.get(2).copied()
        } else {
            None
        }
    }

    /// Returns the trailing thread id, if this key carries a `:thread:<id>`
    /// or `:topic:<id>` suffix (the Telegram forum-topic spelling of the
    /// same thread-scoping concept).
    pub fn thread_id(&self) -> Option<&str> {
        let segs = self.segments();
        segs.windows(2)
            .position(|w| w[0] == "thread" || w[0] == "topic")
            .and_then(|i| segs.get(i + 1))
            .copied()
    }

    /// Strips a trailing `:thread:<id>` suffix, returning the parent key's
    /// string form. Used when forking a thread session from its parent.
    pub fn parent(&self) -> Option<SessionKey> {
        let idx = self.0.find(":thread:")?;
        Some(SessionKey(self.0[..idx].to_string()))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for SessionKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for SessionKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_thread_roundtrips_parent() {
        let parent = SessionKey::build("main", "slack", "channel:C1");
        let thread = parent.with_thread("123");
        assert_eq!(thread.as_str(), "agent:main:slack:channel:C1:thread:123");
        assert_eq!(thread.parent().as_ref(), Some(&parent));
        assert_eq!(thread.thread_id(), Some("123"));
    }

    #[test]
    fn agent_id_and_surface_extracted() {
        let key = SessionKey::build("main", "telegram", "group:123");
        assert_eq!(key.agent_id(), Some("main"));
        assert_eq!(key.surface(), Some("telegram"));
    }

    #[test]
    fn cron_key_has_no_agent_prefix() {
        let key = SessionKey::cron("nightly-report");
        assert_eq!(key.as_str(), "cron:nightly-report");
        assert_eq!(key.agent_id(), None);
    }

    #[test]
    fn topic_suffix_is_recognized_as_thread_id() {
        let key = SessionKey::parse("agent:main:telegram:group:123:topic:456").unwrap();
        assert_eq!(key.thread_id(), Some("456"));
    }
}
