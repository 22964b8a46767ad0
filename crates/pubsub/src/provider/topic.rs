//! Topic helpers shared by the providers.

/// Whether `topic` matches the MQTT style `filter`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut topic_levels = topic.split('/');
    for level in filter.split('/') {
        match (level, topic_levels.next()) {
            ("#", _) => return true,
            ("+", Some(_)) => {}
            (expected, Some(actual)) if expected == actual => {}
            _ => return false,
        }
    }
    topic_levels.next().is_none()
}

/// NATS subject of a `/` separated topic. Wildcards map to their NATS
/// counterparts.
pub fn to_nats_subject(topic: &str) -> String {
    topic
        .split('/')
        .filter(|level| !level.is_empty())
        .map(|level| match level {
            "+" => "*",
            "#" => ">",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(".")
}

pub fn from_nats_subject(subject: &str) -> String {
    subject.replace('.', "/")
}

/// Device identifier of a downlink topic `{prefix}/{device_id}`.
pub fn device_id_of<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    topic
        .strip_prefix(prefix.trim_end_matches('/'))
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("app/down/push/+", "app/down/push/dev-1"));
        assert!(topic_matches("app/#", "app/down/push/dev-1"));
        assert!(topic_matches("app/up", "app/up"));
        assert!(!topic_matches("app/down/push/+", "app/down/push"));
        assert!(!topic_matches("app/down/push/+", "app/down/push/dev-1/extra"));
        assert!(!topic_matches("app/up", "app/down"));
    }

    #[test]
    fn test_nats_subject() {
        assert_eq!(to_nats_subject("app/down/push/+"), "app.down.push.*");
        assert_eq!(to_nats_subject("/app/#"), "app.>");
        assert_eq!(from_nats_subject("app.down.push.dev-1"), "app/down/push/dev-1");
    }

    #[test]
    fn test_device_id_of() {
        assert_eq!(device_id_of("app/down/push", "app/down/push/dev-1"), Some("dev-1"));
        assert_eq!(device_id_of("app/down/push/", "app/down/push/dev-1"), Some("dev-1"));
        assert_eq!(device_id_of("app/down/push", "app/down/push/a/b"), None);
        assert_eq!(device_id_of("app/down/push", "app/down/replace/dev-1"), None);
    }
}
