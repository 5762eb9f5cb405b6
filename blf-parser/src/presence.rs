//! Looser fallback for PBXs that answer with presence documents instead of
//! dialog-info.

use crate::dialog::parse_dialog_info;
use crate::state::LineState;

/// Best-effort line state from a presence-style body.
///
/// Bodies that mention `dialog-info` go through the dialog parser. Otherwise
/// a PIDF basic status of `closed` (with no `open`) is idle and `open` is busy.
pub fn parse_presence_body(body: &[u8]) -> LineState {
    if contains(body, b"dialog-info") {
        return parse_dialog_info(body);
    }
    let open = contains(body, b"open");
    if contains(body, b"closed") && !open {
        LineState::Idle
    } else if open {
        LineState::Busy
    } else {
        LineState::Unknown
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
