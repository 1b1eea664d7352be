// crates/machina-selector/src/grammar.rs
// ============================================================================
// Module: Selector Output Grammar
// Description: Parser for the tagged block language policies emit.
// Purpose: Extract exactly one decision from untrusted selector output.
// Dependencies: base64, machina-core, serde_json
// ============================================================================

//! ## Overview
//! External policies answer in a tagged block language:
//! `<PICK><SIDdddd><END>`, optionally carrying an input patch as
//! `<INP>{json}</INP>` or `<INP64>base64(json)</INP64>` before `<END>`,
//! plus the terminal blocks `<ASK_SUP><END>` and `<NOOP><END>`.
//! Surrounding chatter is tolerated: the parser scans for the first
//! structurally complete block and decides from it. A structurally complete
//! pick whose SID is not in the menu, or whose patch is not a JSON object,
//! yields [`Selection::Invalid`] — fail closed rather than scan on to
//! something the policy said later.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use machina_core::Menu;
use machina_core::Selection;
use machina_core::Sid;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Tokens
// ============================================================================

/// Pick block opener.
const TOK_PICK: &str = "<PICK>";
/// Terminal supervisor block.
const TOK_ASK_SUP: &str = "<ASK_SUP><END>";
/// Terminal no-op block.
const TOK_NOOP: &str = "<NOOP><END>";
/// Block terminator.
const TOK_END: &str = "<END>";
/// Inline JSON patch opener/closer.
const TOK_INP_OPEN: &str = "<INP>";
/// Inline JSON patch closer.
const TOK_INP_CLOSE: &str = "</INP>";
/// Base64 patch opener.
const TOK_INP64_OPEN: &str = "<INP64>";
/// Base64 patch closer.
const TOK_INP64_CLOSE: &str = "</INP64>";

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses raw selector output against the current menu.
///
/// The first structurally complete block in the text decides; anything
/// around it is ignored. No complete block means [`Selection::Invalid`].
#[must_use]
pub fn parse_selector_output(raw: &str, menu: &Menu) -> Selection {
    let mut cursor = 0;
    loop {
        let Some(block) = next_block(raw, cursor) else {
            return Selection::Invalid;
        };
        match block {
            Block::AskSup => return Selection::AskSup,
            Block::Noop => return Selection::Noop,
            Block::Pick {
                body,
                next_cursor,
            } => match parse_pick_body(body) {
                // A structurally complete pick decides, valid or not.
                Some((sid, patch)) => {
                    return validate_pick(sid, patch, menu);
                }
                None => cursor = next_cursor,
            },
        }
    }
}

/// One candidate block found in the raw text.
enum Block<'a> {
    /// `<ASK_SUP><END>`.
    AskSup,
    /// `<NOOP><END>`.
    Noop,
    /// `<PICK>...<END>` body plus where to resume scanning on failure.
    Pick {
        /// Text between `<PICK>` and `<END>`.
        body: &'a str,
        /// Offset just past the `<PICK>` opener, for rescans.
        next_cursor: usize,
    },
}

/// Finds the earliest candidate block at or after `cursor`.
fn next_block(raw: &str, cursor: usize) -> Option<Block<'_>> {
    let window = raw.get(cursor ..)?;
    let pick_at = window.find(TOK_PICK);
    let ask_at = window.find(TOK_ASK_SUP);
    let noop_at = window.find(TOK_NOOP);

    let earliest = [
        pick_at.map(|at| (at, 0_u8)),
        ask_at.map(|at| (at, 1_u8)),
        noop_at.map(|at| (at, 2_u8)),
    ]
    .into_iter()
    .flatten()
    .min()?;

    match earliest {
        (_, 1) => Some(Block::AskSup),
        (_, 2) => Some(Block::Noop),
        (at, _) => {
            let body_start = cursor + at + TOK_PICK.len();
            let body_window = raw.get(body_start ..)?;
            let end_at = body_window.find(TOK_END)?;
            Some(Block::Pick {
                body: &body_window[.. end_at],
                next_cursor: body_start,
            })
        }
    }
}

/// Parses the body of a pick block into SID text and optional patch text.
///
/// Returns `None` when the body is not structurally complete, letting the
/// scanner move past chatter that merely mentions `<PICK>`.
fn parse_pick_body(body: &str) -> Option<(&str, Option<PatchText<'_>>)> {
    let rest = body.strip_prefix("<SID")?;
    let close = rest.find('>')?;
    let digits = &rest[.. close];
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sid_text = &body[1 .. 4 + digits.len()];
    let after_sid = &rest[close + 1 ..];

    if after_sid.is_empty() {
        return Some((sid_text, None));
    }
    if let Some(inner) = after_sid.strip_prefix(TOK_INP_OPEN) {
        let close = inner.rfind(TOK_INP_CLOSE)?;
        if !inner[close + TOK_INP_CLOSE.len() ..].is_empty() {
            return None;
        }
        return Some((sid_text, Some(PatchText::Json(&inner[.. close]))));
    }
    if let Some(inner) = after_sid.strip_prefix(TOK_INP64_OPEN) {
        let close = inner.rfind(TOK_INP64_CLOSE)?;
        if !inner[close + TOK_INP64_CLOSE.len() ..].is_empty() {
            return None;
        }
        return Some((sid_text, Some(PatchText::Base64(&inner[.. close]))));
    }
    None
}

/// Input patch text in one of its two encodings.
enum PatchText<'a> {
    /// Inline JSON object.
    Json(&'a str),
    /// Base64-encoded JSON object.
    Base64(&'a str),
}

/// Validates a structurally complete pick against the menu.
fn validate_pick(sid_text: &str, patch: Option<PatchText<'_>>, menu: &Menu) -> Selection {
    let Some(sid) = Sid::parse_wire(sid_text) else {
        return Selection::Invalid;
    };
    if menu.lookup(sid).is_none() {
        return Selection::Invalid;
    }
    let input_patch = match patch {
        None => None,
        Some(text) => match decode_patch(&text) {
            Some(map) => Some(map),
            None => return Selection::Invalid,
        },
    };
    Selection::Pick {
        sid,
        input_patch,
    }
}

/// Decodes a patch into a JSON object; anything else is rejected.
fn decode_patch(text: &PatchText<'_>) -> Option<Map<String, Value>> {
    let json = match text {
        PatchText::Json(json) => (*json).to_string(),
        PatchText::Base64(encoded) => {
            let bytes = BASE64.decode(encoded.trim()).ok()?;
            String::from_utf8(bytes).ok()?
        }
    };
    match serde_json::from_str::<Value>(&json) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use machina_core::Aid;
    use serde_json::json;

    use super::*;

    /// Two-item menu: SID0001 and SID0002.
    fn menu() -> Menu {
        Menu::assign(vec![
            (Aid::new("AID.SCAN.v1"), "Scan".to_string(), vec!["scan".to_string()]),
            (Aid::new("AID.NOOP.v1"), "Noop".to_string(), vec![]),
        ])
        .unwrap()
    }

    /// Asserts a pick of the given raw SID with no patch.
    fn assert_pick(selection: &Selection, raw_sid: u16) {
        match selection {
            Selection::Pick {
                sid,
                input_patch,
            } => {
                assert_eq!(sid.get(), raw_sid);
                assert!(input_patch.is_none());
            }
            other => panic!("expected pick, got {}", other.kind()),
        }
    }

    #[test]
    fn bare_pick_parses() {
        let selection = parse_selector_output("<PICK><SID0001><END>", &menu());
        assert_pick(&selection, 1);
    }

    #[test]
    fn surrounding_chatter_is_tolerated() {
        let raw = "I think the best option is scanning.\n<PICK><SID0002><END>\nthanks!";
        let selection = parse_selector_output(raw, &menu());
        assert_pick(&selection, 2);
    }

    #[test]
    fn first_complete_block_wins() {
        let raw = "<NOOP><END> and then <PICK><SID0001><END>";
        assert_eq!(parse_selector_output(raw, &menu()), Selection::Noop);
    }

    #[test]
    fn incomplete_pick_mention_is_skipped() {
        let raw = "use <PICK> wisely... final answer: <PICK><SID0001><END>";
        let selection = parse_selector_output(raw, &menu());
        assert_pick(&selection, 1);
    }

    #[test]
    fn inline_patch_parses_as_object() {
        let raw = r#"<PICK><SID0001><INP>{"max_rows": 10}</INP><END>"#;
        match parse_selector_output(raw, &menu()) {
            Selection::Pick {
                input_patch: Some(patch),
                ..
            } => assert_eq!(patch["max_rows"], json!(10)),
            other => panic!("expected patched pick, got {}", other.kind()),
        }
    }

    #[test]
    fn base64_patch_parses_as_object() {
        let encoded = BASE64.encode(r#"{"pattern":"WARN"}"#);
        let raw = format!("<PICK><SID0001><INP64>{encoded}</INP64><END>");
        match parse_selector_output(&raw, &menu()) {
            Selection::Pick {
                input_patch: Some(patch),
                ..
            } => assert_eq!(patch["pattern"], json!("WARN")),
            other => panic!("expected patched pick, got {}", other.kind()),
        }
    }

    #[test]
    fn non_object_patch_is_invalid() {
        let raw = r#"<PICK><SID0001><INP>[1,2,3]</INP><END>"#;
        assert_eq!(parse_selector_output(raw, &menu()), Selection::Invalid);
    }

    #[test]
    fn malformed_base64_is_invalid() {
        let raw = "<PICK><SID0001><INP64>!!!not-base64!!!</INP64><END>";
        assert_eq!(parse_selector_output(raw, &menu()), Selection::Invalid);
    }

    #[test]
    fn sid_outside_menu_is_invalid() {
        let raw = "<PICK><SID9999><END>";
        assert_eq!(parse_selector_output(raw, &menu()), Selection::Invalid);
    }

    #[test]
    fn ask_sup_and_noop_parse() {
        assert_eq!(parse_selector_output("<ASK_SUP><END>", &menu()), Selection::AskSup);
        assert_eq!(parse_selector_output("<NOOP><END>", &menu()), Selection::Noop);
    }

    #[test]
    fn empty_and_garbage_outputs_are_invalid() {
        assert_eq!(parse_selector_output("", &menu()), Selection::Invalid);
        assert_eq!(parse_selector_output("no blocks here", &menu()), Selection::Invalid);
        assert_eq!(parse_selector_output("<PICK><SID12><END>", &menu()), Selection::Invalid);
    }
}
