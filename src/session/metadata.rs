//! Per-conversation feature flags from participant metadata

use serde::Deserialize;

use crate::room::Participant;

/// Features toggled per conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Expose the retrieval tool to the model
    pub rag_enabled: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self { rag_enabled: true }
    }
}

/// Decoded participant metadata
///
/// Every field is optional; an absent field leaves the running value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantMetadata {
    #[serde(default)]
    pub rag_enabled: Option<bool>,
}

impl ParticipantMetadata {
    /// Decode a metadata string
    ///
    /// Empty or malformed metadata decodes to the empty value.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Self::default();
        };

        match serde_json::from_str(raw) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed participant metadata");
                Self::default()
            }
        }
    }
}

/// Resolve flags from the participants present, in join order
///
/// Each participant whose metadata carries `ragEnabled` overrides the value
/// so far, so the last one examined wins.
#[must_use]
pub fn resolve_feature_flags(participants: &[Participant]) -> FeatureFlags {
    let mut flags = FeatureFlags::default();

    for participant in participants {
        let meta = ParticipantMetadata::parse(participant.metadata.as_deref());
        if let Some(rag_enabled) = meta.rag_enabled {
            tracing::debug!(
                identity = %participant.identity,
                rag_enabled,
                "participant sets ragEnabled"
            );
            flags.rag_enabled = rag_enabled;
        }
    }

    tracing::info!(
        participants = participants.len(),
        rag_enabled = flags.rag_enabled,
        "resolved feature flags"
    );
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(identity: &str, metadata: Option<&str>) -> Participant {
        Participant::new(identity, metadata.map(str::to_string))
    }

    #[test]
    fn no_participants_defaults_on() {
        assert!(resolve_feature_flags(&[]).rag_enabled);
    }

    #[test]
    fn explicit_values_respected() {
        assert!(!resolve_feature_flags(&[peer("a", Some(r#"{"ragEnabled":false}"#))]).rag_enabled);
        assert!(resolve_feature_flags(&[peer("a", Some(r#"{"ragEnabled":true}"#))]).rag_enabled);
    }

    #[test]
    fn missing_empty_or_malformed_metadata_defaults_on() {
        let cases = [
            None,
            Some(""),
            Some("   "),
            Some("{}"),
            Some("{not json"),
            Some("42"),
            Some(r#"{"ragEnabled":"no"}"#),
        ];
        for raw in cases {
            assert!(resolve_feature_flags(&[peer("a", raw)]).rag_enabled, "metadata {raw:?}");
        }
    }

    #[test]
    fn last_participant_with_key_wins() {
        let peers = [
            peer("a", Some(r#"{"ragEnabled":true}"#)),
            peer("b", Some(r#"{"ragEnabled":false}"#)),
        ];
        assert!(!resolve_feature_flags(&peers).rag_enabled);
    }

    #[test]
    fn keyless_participant_does_not_reset() {
        let peers = [
            peer("a", Some(r#"{"ragEnabled":false}"#)),
            peer("b", Some(r#"{"theme":"dark"}"#)),
            peer("c", Some("garbage")),
        ];
        assert!(!resolve_feature_flags(&peers).rag_enabled);
    }
}
