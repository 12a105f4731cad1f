//! Validation and record-key construction shared by every component.

use crate::config::RoomPolicy;
use crate::error::{EngineError, Result};

pub const MAX_ROOM_LEN: usize = 64;
pub const MAX_USER_ID_LEN: usize = 64;
pub const MAX_USER_NAME_CHARS: usize = 32;

/// Stripped from chat bodies, matched case-insensitively.
const BODY_DENYLIST: &[&str] = &[
    "<script",
    "</script>",
    "javascript:",
    "onerror=",
    "onload=",
    "onclick=",
    "onmouseover=",
];

/// A room name that has been validated (and possibly escaped) into a single
/// key segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    name: String,
    segment: String,
}

impl RoomKey {
    /// The room as the client named it.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The room as it appears inside record keys.
    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn prefix(&self) -> String {
        format!("{}/", self.segment)
    }
}

pub fn room_key(room: &str, policy: RoomPolicy) -> Result<RoomKey> {
    if room.is_empty() {
        return Err(EngineError::validation("room must not be empty"));
    }
    if room.len() > MAX_ROOM_LEN {
        return Err(EngineError::validation(format!(
            "room must be at most {} bytes",
            MAX_ROOM_LEN
        )));
    }
    if room.chars().any(char::is_control) {
        return Err(EngineError::validation("room contains control characters"));
    }

    let segment = match policy {
        RoomPolicy::Reject if room.contains('/') => {
            return Err(EngineError::validation("room must not contain '/'"));
        }
        RoomPolicy::Reject => room.to_string(),
        RoomPolicy::Escape => room.replace('%', "%25").replace('/', "%2F"),
    };

    Ok(RoomKey {
        name: room.to_string(),
        segment,
    })
}

pub fn is_hex_color(color: &str) -> bool {
    match color.strip_prefix('#') {
        Some(hex) => hex.len() == 6 && hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

pub fn validate_color(color: &str) -> Result<()> {
    if is_hex_color(color) {
        Ok(())
    } else {
        Err(EngineError::validation(format!("invalid color '{}', expected #rrggbb", color)))
    }
}

pub fn validate_user_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_USER_ID_LEN {
        return Err(EngineError::validation(format!(
            "user id must be 1..={} bytes",
            MAX_USER_ID_LEN
        )));
    }
    if id.contains('/') || id.chars().any(char::is_control) {
        return Err(EngineError::validation("user id contains forbidden characters"));
    }
    Ok(())
}

/// Returns the trimmed name.
pub fn validate_user_name(name: &str) -> Result<&str> {
    let name = name.trim();
    let chars = name.chars().count();
    if chars == 0 || chars > MAX_USER_NAME_CHARS {
        return Err(EngineError::validation(format!(
            "username must be 1..={} characters",
            MAX_USER_NAME_CHARS
        )));
    }
    Ok(name)
}

pub fn pixel_key(room: &RoomKey, x: u32, y: u32) -> String {
    format!("{}/{}:{}", room.segment(), x, y)
}

/// `None` for keys outside the room or not exactly as `pixel_key` writes them.
pub fn parse_pixel_key(room: &RoomKey, key: &str) -> Option<(u32, u32)> {
    let rest = key.strip_prefix(room.segment())?.strip_prefix('/')?;
    let (x, y) = rest.split_once(':')?;
    Some((parse_coord(x)?, parse_coord(y)?))
}

/// Plain decimal without sign or leading zeros.
fn parse_coord(s: &str) -> Option<u32> {
    let canonical = !s.is_empty()
        && s.bytes().all(|b| b.is_ascii_digit())
        && (s == "0" || !s.starts_with('0'));
    if canonical { s.parse().ok() } else { None }
}

/// Numeric ids are zero-padded so key order follows id order.
pub fn message_key(room: &RoomKey, id: &str) -> String {
    if !id.is_empty() && id.len() <= 20 && id.bytes().all(|b| b.is_ascii_digit()) {
        format!("{}/{:0>20}", room.segment(), id)
    } else {
        format!("{}/{}", room.segment(), id)
    }
}

/// Best-effort filter: removes denylisted fragments until none remain, then
/// truncates to `max_chars` characters. Not an HTML sanitizer.
pub fn sanitize_body(body: &str, max_chars: usize) -> String {
    let mut out = body.to_string();
    loop {
        let before = out.len();
        for needle in BODY_DENYLIST {
            out = remove_ignore_ascii_case(&out, needle);
        }
        if out.len() == before {
            break;
        }
    }
    match out.char_indices().nth(max_chars) {
        Some((idx, _)) => out[..idx].to_string(),
        None => out,
    }
}

fn remove_ignore_ascii_case(haystack: &str, needle: &str) -> String {
    let lower = haystack.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut pos = 0;
    while let Some(found) = lower[pos..].find(needle) {
        out.push_str(&haystack[pos..pos + found]);
        pos += found + needle.len();
    }
    out.push_str(&haystack[pos..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors() {
        assert!(is_hex_color("#ff0000"));
        assert!(is_hex_color("#A1b2C3"));
        assert!(!is_hex_color("ff0000"));
        assert!(!is_hex_color("#fff"));
        assert!(!is_hex_color("#gg0000"));
        assert!(!is_hex_color("#ff00000"));
        assert!(validate_color("red").is_err());
    }

    #[test]
    fn room_with_separator() {
        assert!(matches!(
            room_key("a/b", RoomPolicy::Reject),
            Err(EngineError::Validation(_))
        ));

        let escaped = room_key("a/b", RoomPolicy::Escape).unwrap();
        assert_eq!(escaped.name(), "a/b");
        assert_eq!(escaped.segment(), "a%2Fb");

        // Escaping is injective: a literal "%2F" does not collide.
        let literal = room_key("a%2Fb", RoomPolicy::Escape).unwrap();
        assert_ne!(literal.segment(), escaped.segment());

        assert!(room_key("", RoomPolicy::Escape).is_err());
        assert!(room_key(&"r".repeat(65), RoomPolicy::Reject).is_err());
    }

    #[test]
    fn pixel_keys_round_trip() {
        let room = room_key("r1", RoomPolicy::Reject).unwrap();
        let key = pixel_key(&room, 5, 17);
        assert_eq!(key, "r1/5:17");
        assert_eq!(parse_pixel_key(&room, &key), Some((5, 17)));

        assert_eq!(parse_pixel_key(&room, "r1/5"), None);
        assert_eq!(parse_pixel_key(&room, "r1/-1:3"), None);
        assert_eq!(parse_pixel_key(&room, "r1/a:b"), None);
        assert_eq!(parse_pixel_key(&room, "r10/1:1"), None);
    }

    #[test]
    fn only_canonical_pixel_keys_parse() {
        let room = room_key("r1", RoomPolicy::Reject).unwrap();
        assert_eq!(parse_pixel_key(&room, "r1/0:0"), Some((0, 0)));
        assert_eq!(parse_pixel_key(&room, "r1/10:20"), Some((10, 20)));
        for key in ["r1/+5:5", "r1/05:5", "r1/5:00", "r1/:5", "r1/5: 5", "r1/5:5:5"] {
            assert_eq!(parse_pixel_key(&room, key), None, "{}", key);
        }
    }

    #[test]
    fn message_keys_sort_by_id() {
        let room = room_key("r1", RoomPolicy::Reject).unwrap();
        let a = message_key(&room, "99");
        let b = message_key(&room, "100");
        assert!(a < b);
        assert_eq!(message_key(&room, "abc"), "r1/abc");
    }

    #[test]
    fn sanitizer_strips_denylist() {
        assert_eq!(sanitize_body("hi <SCRIPT>alert(1)</script>", 500), "hi >alert(1)");
        assert_eq!(sanitize_body("<a href=JavaScript:x>", 500), "<a href=x>");
        assert_eq!(sanitize_body("<img onerror=x>", 500), "<img x>");
        // Nested fragments that reassemble after one pass.
        assert_eq!(sanitize_body("<scr<scriptipt", 500), "");
    }

    #[test]
    fn sanitizer_truncates_on_char_boundary() {
        let body = "é".repeat(600);
        let clean = sanitize_body(&body, 500);
        assert_eq!(clean.chars().count(), 500);
        assert_eq!(sanitize_body("short", 500), "short");
    }

    #[test]
    fn user_fields() {
        assert!(validate_user_id("u1").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("a/b").is_err());
        assert_eq!(validate_user_name("  ada ").unwrap(), "ada");
        assert!(validate_user_name("   ").is_err());
        assert!(validate_user_name(&"x".repeat(33)).is_err());
    }
}
