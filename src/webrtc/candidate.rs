//! ICE candidate attribute parsing
//!
//! Browsers trickle candidates as the text of an `a=candidate` attribute:
//!
//! ```text
//! candidate:<foundation> <component> <protocol> <priority> <ip> <port> typ <type> [...]
//! ```
//!
//! Only the first eight fields are interpreted. The connection address is
//! passed through untouched; the engine rejects unusable addresses.

use super::WebRTCError;

const MIN_FIELDS: usize = 8;

/// Structured form of a trickled ICE candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub foundation: String,
    pub component: u16,
    /// Transport protocol, lowercased (`udp` / `tcp`)
    pub protocol: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    /// host / srflx / prflx / relay
    pub candidate_type: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Attach the media line the remote side correlated this candidate with
    pub fn with_media(mut self, sdp_mid: Option<String>, sdp_mline_index: Option<u16>) -> Self {
        self.sdp_mid = sdp_mid;
        self.sdp_mline_index = sdp_mline_index;
        self
    }

    /// Render back to the `candidate:` attribute form
    pub fn to_attribute(&self) -> String {
        format!(
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation, self.component, self.protocol, self.priority, self.ip, self.port, self.candidate_type
        )
    }
}

/// Parse a candidate attribute string.
pub fn parse(candidate: &str) -> Result<IceCandidate, WebRTCError> {
    let parts: Vec<&str> = candidate.split_whitespace().collect();

    if parts.len() < MIN_FIELDS {
        return Err(WebRTCError::MalformedCandidate(format!(
            "expected at least {} fields, got {}",
            MIN_FIELDS,
            parts.len()
        )));
    }

    let foundation = parts[0]
        .split(':')
        .nth(1)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            WebRTCError::MalformedCandidate(format!("foundation field has no value: {}", parts[0]))
        })?;

    Ok(IceCandidate {
        foundation: foundation.to_string(),
        component: parse_number(parts[1], "component")?,
        protocol: parts[2].to_ascii_lowercase(),
        priority: parse_number(parts[3], "priority")?,
        ip: parts[4].to_string(),
        port: parse_number(parts[5], "port")?,
        candidate_type: parts[7].to_string(),
        sdp_mid: None,
        sdp_mline_index: None,
    })
}

fn parse_number<T: std::str::FromStr>(field: &str, name: &str) -> Result<T, WebRTCError> {
    field
        .parse()
        .map_err(|_| WebRTCError::MalformedCandidate(format!("invalid {}: {}", name, field)))
}
