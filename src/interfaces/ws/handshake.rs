//! OCPP-J WebSocket handshake helpers
//!
//! Charge points connect at `ws://<host>:<port>/ocpp/{identity}` or
//! `ws://<host>:<port>/ocpp/{account}/{identity}`.

/// OCPP 1.6 WebSocket subprotocol
pub const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Length of an account token in the connection path
const ACCOUNT_LEN: usize = 40;

/// Who is connecting, as read from the request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub identity: String,
    pub account: Option<String>,
}

/// Parse the upgrade request path. The identity is the last segment; a
/// 40-character segment in front of it is the account.
pub fn parse_path(path: &str) -> Option<ConnectTarget> {
    let path = path.split('?').next().unwrap_or_default();
    let path = path.trim_start_matches('/');
    if path.is_empty() || path.ends_with('/') || path == "ocpp" {
        return None;
    }
    let rest = path.strip_prefix("ocpp/").unwrap_or(path);

    let segments: Vec<&str> = rest.split('/').collect();
    match segments.as_slice() {
        [identity] => Some(ConnectTarget {
            identity: identity.to_string(),
            account: None,
        }),
        [account, identity] if !account.is_empty() && !identity.is_empty() => Some(ConnectTarget {
            identity: identity.to_string(),
            account: (account.len() == ACCOUNT_LEN).then(|| account.to_string()),
        }),
        _ => None,
    }
}

/// Whether the client offered the OCPP 1.6 subprotocol.
pub fn offers_ocpp16(requested: &str) -> bool {
    requested
        .split(',')
        .map(|s| s.trim())
        .any(|p| p.eq_ignore_ascii_case(OCPP_SUBPROTOCOL))
}
