//! # blf-parser
//!
//! Turns busy-lamp-field notification bodies into a small line-state
//! vocabulary and maps that vocabulary onto presence values.
//!
//! ## Usage
//!
//! ```rust
//! use blf_parser::{parse_dialog_info, Activity, Availability, LineState};
//!
//! let body = br#"<dialog-info xmlns="urn:ietf:params:xml:ns:dialog-info" entity="sip:1001@pbx">
//!   <dialog id="1"><state>confirmed</state></dialog>
//! </dialog-info>"#;
//!
//! let state = parse_dialog_info(body);
//! assert_eq!(state, LineState::Busy);
//! assert_eq!(state.to_presence(), (Availability::Busy, Activity::InACall));
//! ```

pub mod dialog;
pub mod error;
pub mod presence;
pub mod state;

pub use dialog::{
    decode_dialog_info, extension_from_dialog_info, extract_user, parse_dialog_info, DialogInfo,
    DialogRecord, SchemaVariant, DIALOG_INFO_NAMESPACE, SCHEMA_VARIANTS,
};
pub use error::{ParseError, ParseResult};
pub use presence::parse_presence_body;
pub use state::{Activity, Availability, LineState};
