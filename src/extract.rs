//! Field extraction for provisioning replies
//!
//! Provisioning replies are small and have a fixed shape, so instead of a
//! full parser we look for the literal `"key":"` and read up to the next
//! quote. Escaped quotes inside values and duplicate keys elsewhere in the
//! payload are not supported. Anything that does not match yields `None`,
//! which the state machine turns into a protocol error.
//!
//! The state machine only sees [`ResponseParser`], so a real parser can be
//! dropped in without touching it.

/// Field lookup used by the provisioning state machine.
pub trait ResponseParser {
    /// Value of a top-level string field.
    fn field(&self, text: &str, key: &str) -> Option<String>;

    /// Value of a string field inside the object stored under `parent`.
    fn nested_field(&self, text: &str, parent: &str, child: &str) -> Option<String>;
}

/// Substring-based extractor for flat or one-level-nested replies.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubstringExtractor;

impl ResponseParser for SubstringExtractor {
    fn field(&self, text: &str, key: &str) -> Option<String> {
        get_field(text, key).map(str::to_owned)
    }

    fn nested_field(&self, text: &str, parent: &str, child: &str) -> Option<String> {
        get_nested_field(text, parent, child).map(str::to_owned)
    }
}

/// Value following the first `"<key>":"`, up to the next `"`.
pub fn get_field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("\"{key}\":\"");
    let start = text.find(&pattern)? + pattern.len();
    let rest = &text[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// Looks up `child` inside the object opened by `"<parent>":{`.
///
/// The object runs to its matching `}`, or to the end of the text if it is
/// never closed.
pub fn get_nested_field<'a>(text: &'a str, parent: &str, child: &str) -> Option<&'a str> {
    let pattern = format!("\"{parent}\":{{");
    let start = text.find(&pattern)? + pattern.len();
    let body = &text[start..];

    let mut depth = 1usize;
    let mut end = body.len();
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = i;
                    break;
                }
            }
            _ => {}
        }
    }

    get_field(&body[..end], child)
}

/// Status code from a reply topic such as `$dps/registrations/res/202/?$rid=1`.
pub fn status_from_topic(topic: &str) -> Option<u16> {
    let start = topic.find("/res/")? + "/res/".len();
    let code = topic[start..].split('/').next()?;
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    code.parse().ok()
}

/// Request id echoed in a reply topic's `$rid=` parameter.
pub fn request_id_from_topic(topic: &str) -> Option<u32> {
    let (_, query) = topic.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("$rid="))
        .and_then(|rid| rid.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ASSIGNED: &str = r#"{"operationId":"4.abc.def","status":"assigned","registrationState":{"registrationId":"dev-1","assignedHub":"hub-1.azure-devices.net","deviceId":"dev-1","status":"assigned","substatus":"initialAssignment","payload":{"a":"b"}}}"#;

    #[test]
    fn reads_flat_fields() {
        assert_eq!(get_field(ASSIGNED, "operationId"), Some("4.abc.def"));
        assert_eq!(get_field(ASSIGNED, "status"), Some("assigned"));
        assert_eq!(get_field(ASSIGNED, "missing"), None);
    }

    #[test]
    fn unterminated_value_is_absent() {
        assert_eq!(get_field(r#"{"operationId":"4.abc"#, "operationId"), None);
        assert_eq!(get_field("", "status"), None);
    }

    #[test]
    fn reads_nested_fields() {
        assert_eq!(
            get_nested_field(ASSIGNED, "registrationState", "assignedHub"),
            Some("hub-1.azure-devices.net")
        );
        assert_eq!(
            get_nested_field(ASSIGNED, "registrationState", "deviceId"),
            Some("dev-1")
        );
        assert_eq!(get_nested_field(ASSIGNED, "nope", "deviceId"), None);
    }

    #[test]
    fn nested_lookup_stays_inside_parent() {
        let text = r#"{"registrationState":{"status":"assigned"},"deviceId":"outside"}"#;
        assert_eq!(get_nested_field(text, "registrationState", "deviceId"), None);
    }

    #[test]
    fn unclosed_parent_runs_to_end() {
        let text = r#"{"registrationState":{"assignedHub":"h","deviceId":"d""#;
        assert_eq!(get_nested_field(text, "registrationState", "deviceId"), Some("d"));
    }

    #[test]
    fn parses_topic_metadata() {
        let topic = "$dps/registrations/res/202/?$rid=7&retry-after=3";
        assert_eq!(status_from_topic(topic), Some(202));
        assert_eq!(request_id_from_topic(topic), Some(7));

        assert_eq!(status_from_topic("$dps/registrations/res/20/?$rid=1"), None);
        assert_eq!(status_from_topic("devices/dev-1/messages/events/"), None);
        assert_eq!(request_id_from_topic("$dps/registrations/res/200/"), None);
    }

    #[test]
    fn extractor_trait_returns_owned_values() {
        let parser = SubstringExtractor;
        assert_eq!(parser.field(ASSIGNED, "status").as_deref(), Some("assigned"));
        assert_eq!(
            parser
                .nested_field(ASSIGNED, "registrationState", "assignedHub")
                .as_deref(),
            Some("hub-1.azure-devices.net")
        );
    }

    proptest! {
        #[test]
        fn missing_pattern_is_absent(text in ".{0,200}", key in "[a-zA-Z]{1,12}") {
            let pattern = format!("\"{key}\":\"");
            prop_assume!(!text.contains(&pattern));
            prop_assert_eq!(get_field(&text, &key), None);
        }

        #[test]
        fn arbitrary_input_never_panics(text in ".{0,200}") {
            let _ = get_field(&text, "status");
            let _ = get_nested_field(&text, "registrationState", "deviceId");
            let _ = status_from_topic(&text);
            let _ = request_id_from_topic(&text);
        }
    }
}
