use crate::{MessageHeader, MessagePart};
use std::collections::HashMap;

pub const LABEL_UNREAD: &str = "UNREAD";
pub const LABEL_STARRED: &str = "STARRED";
pub const LABEL_INBOX: &str = "INBOX";

/// Levels of parts below the payload root that attachment detection inspects.
const ATTACHMENT_SCAN_DEPTH: usize = 2;

/// Header names lower-cased; the first occurrence of a repeated header wins.
pub fn headers_map(headers: &[MessageHeader]) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(headers.len());
    for header in headers {
        map.entry(header.name.to_ascii_lowercase())
            .or_insert_with(|| header.value.clone());
    }
    map
}

/// Splits `Name <email>` into the address and an optional display name.
/// A bare address yields no name.
pub fn parse_address(raw: &str) -> (String, Option<String>) {
    let value = raw.trim();
    let lt = value.rfind('<');
    let gt = value.rfind('>');

    if let (Some(lt), Some(gt)) = (lt, gt) {
        if lt < gt {
            let name = value[..lt].trim().trim_matches('"').trim();
            let address = value[lt + 1..gt].trim();
            return (
                address.to_string(),
                (!name.is_empty()).then(|| name.to_string()),
            );
        }
    }

    (value.trim_matches('"').to_string(), None)
}

/// Parses a comma-separated address header. Commas inside quoted display
/// names do not split.
pub fn parse_address_list(raw: Option<&str>) -> Vec<(String, Option<String>)> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    split_outside_quotes(raw)
        .into_iter()
        .map(parse_address)
        .filter(|(address, _)| !address.is_empty())
        .collect()
}

fn split_outside_quotes(raw: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut start = 0;

    for (idx, ch) in raw.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                segments.push(&raw[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    segments.push(&raw[start..]);

    segments
        .into_iter()
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

pub fn split_references(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| value.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// True when one of the payload's parts, or one of their parts, declares an
/// attachment id. The root body itself is not inspected.
pub fn has_attachments(payload: &MessagePart) -> bool {
    payload
        .parts
        .iter()
        .any(|part| part_has_attachment(part, 1))
}

fn part_has_attachment(part: &MessagePart, depth: usize) -> bool {
    if part.body.attachment_id.as_deref().is_some_and(|id| !id.is_empty()) {
        return true;
    }
    if depth >= ATTACHMENT_SCAN_DEPTH {
        return false;
    }
    part.parts
        .iter()
        .any(|child| part_has_attachment(child, depth + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PartBody;

    fn part_with_attachment(attachment_id: Option<&str>, parts: Vec<MessagePart>) -> MessagePart {
        MessagePart {
            body: PartBody {
                attachment_id: attachment_id.map(str::to_string),
                ..PartBody::default()
            },
            parts,
            ..MessagePart::default()
        }
    }

    #[test]
    fn parses_named_and_bare_addresses() {
        assert_eq!(
            parse_address("Jane Doe <jane@x.com>"),
            ("jane@x.com".to_string(), Some("Jane Doe".to_string()))
        );
        assert_eq!(
            parse_address("\"Doe, Jane\" <jane@x.com>"),
            ("jane@x.com".to_string(), Some("Doe, Jane".to_string()))
        );
        assert_eq!(parse_address("jane@x.com"), ("jane@x.com".to_string(), None));
        assert_eq!(parse_address("<jane@x.com>"), ("jane@x.com".to_string(), None));
    }

    #[test]
    fn address_list_respects_quoted_commas() {
        let parsed = parse_address_list(Some(
            "\"Doe, Jane\" <jane@x.com>, bob@y.com , Studio <studio@biz.com>",
        ));
        assert_eq!(
            parsed,
            vec![
                ("jane@x.com".to_string(), Some("Doe, Jane".to_string())),
                ("bob@y.com".to_string(), None),
                ("studio@biz.com".to_string(), Some("Studio".to_string())),
            ]
        );
        assert!(parse_address_list(None).is_empty());
        assert!(parse_address_list(Some(" , ")).is_empty());
    }

    #[test]
    fn header_names_are_lower_cased() {
        let headers = vec![
            MessageHeader {
                name: "Subject".to_string(),
                value: "Booking".to_string(),
            },
            MessageHeader {
                name: "Received".to_string(),
                value: "first".to_string(),
            },
            MessageHeader {
                name: "RECEIVED".to_string(),
                value: "second".to_string(),
            },
        ];
        let map = headers_map(&headers);
        assert_eq!(map.get("subject").map(String::as_str), Some("Booking"));
        assert_eq!(map.get("received").map(String::as_str), Some("first"));
    }

    #[test]
    fn references_split_on_whitespace() {
        assert_eq!(
            split_references(Some("<a@x>  <b@x>\n <c@x>")),
            vec!["<a@x>", "<b@x>", "<c@x>"]
        );
        assert!(split_references(None).is_empty());
    }

    #[test]
    fn detects_attachment_two_levels_deep() {
        let payload = part_with_attachment(
            None,
            vec![part_with_attachment(
                None,
                vec![part_with_attachment(Some("att-1"), Vec::new())],
            )],
        );
        assert!(has_attachments(&payload));
    }

    #[test]
    fn no_attachment_id_anywhere_is_false() {
        let payload = part_with_attachment(
            None,
            vec![part_with_attachment(
                None,
                vec![part_with_attachment(None, Vec::new())],
            )],
        );
        assert!(!has_attachments(&payload));
    }

    #[test]
    fn root_body_attachment_id_is_ignored() {
        let root_only = part_with_attachment(Some("att-0"), Vec::new());
        assert!(!has_attachments(&root_only));

        let direct_child = part_with_attachment(
            Some("att-0"),
            vec![part_with_attachment(Some("att-1"), Vec::new())],
        );
        assert!(has_attachments(&direct_child));
    }

    #[test]
    fn attachment_below_scan_depth_is_not_seen() {
        let deep = part_with_attachment(
            None,
            vec![part_with_attachment(
                None,
                vec![part_with_attachment(
                    None,
                    vec![part_with_attachment(Some("att-3"), Vec::new())],
                )],
            )],
        );
        assert!(!has_attachments(&deep));
    }
}
