use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Command carried inside a poll response, consumed exactly once by the
/// dispatcher. Wire shape is `{"action": "<kebab-case>", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum PollAction {
    Reconnect,
    Reboot,
    Identify {
        #[serde(rename = "displayTime", default = "default_display_time")]
        display_time: u64,
    },
    ClearIdentify,
    ClearCache,
}

fn default_display_time() -> u64 {
    10
}

/// Decodes the raw `actions` array from a poll response. Unknown or
/// malformed entries are skipped with a warning; the service may introduce
/// new action kinds ahead of client rollout.
pub fn parse_actions(raw: &[Value]) -> Vec<PollAction> {
    raw.iter()
        .filter_map(|value| match serde_json::from_value(value.clone()) {
            Ok(action) => Some(action),
            Err(err) => {
                warn!(target: "marquee.actions", %err, payload = %value, "skipping unrecognized poll action");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_actions_in_order() {
        let raw = vec![
            json!({"action": "reconnect"}),
            json!({"action": "identify", "displayTime": 5}),
            json!({"action": "clear-identify"}),
            json!({"action": "clear-cache"}),
            json!({"action": "reboot"}),
        ];
        let actions = parse_actions(&raw);
        assert_eq!(
            actions,
            vec![
                PollAction::Reconnect,
                PollAction::Identify { display_time: 5 },
                PollAction::ClearIdentify,
                PollAction::ClearCache,
                PollAction::Reboot,
            ]
        );
    }

    #[test]
    fn identify_defaults_display_time() {
        let actions = parse_actions(&[json!({"action": "identify"})]);
        assert_eq!(actions, vec![PollAction::Identify { display_time: 10 }]);
    }

    #[test]
    fn unknown_actions_are_skipped_not_fatal() {
        let raw = vec![
            json!({"action": "self-destruct"}),
            json!("not even an object"),
            json!({"action": "reboot"}),
        ];
        assert_eq!(parse_actions(&raw), vec![PollAction::Reboot]);
    }
}
