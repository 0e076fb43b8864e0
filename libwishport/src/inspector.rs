//! Structural inspection of application-bound RPC frames.
//!
//! Frames are BSON documents produced by the core. An error frame carries an integer `err` field (the request id)
//! and a `data` document with a numeric `code`. The inspector only reads; the payload is never altered.

use bson::{Bson, Document};
use log::*;

/// The code of an RPC error frame, or `None` if the payload is not one.
pub fn rpc_error_code(payload: &[u8]) -> Option<i64> {
    let doc = Document::from_reader(payload).ok()?;
    if !matches!(doc.get("err"), Some(Bson::Int32(_))) {
        return None;
    }
    let data = doc.get_document("data").ok()?;
    match data.get("code") {
        Some(Bson::Int32(code)) => Some(i64::from(*code)),
        Some(Bson::Int64(code)) => Some(*code),
        _ => None,
    }
}

/// True if `payload` is an RPC error frame carrying `fatal_code`.
pub fn is_fatal_frame(payload: &[u8], fatal_code: i32) -> bool {
    match rpc_error_code(payload) {
        Some(code) if code == i64::from(fatal_code) => true,
        Some(code) => {
            trace!("RPC error frame with code {code} passed through");
            false
        }
        None => false,
    }
}
