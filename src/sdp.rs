//! Utilities for picking apart SDP bodies and [RFC 8840] trickle fragments.
//!
//! Nothing here understands SDP semantically: the gateway only ever needs a
//! handful of named attribute lines, so everything is plain line-oriented
//! text processing, tolerant to both `\r\n` and `\n` endings.
//!
//! [RFC 8840]: https://tools.ietf.org/html/rfc8840

use serde::{Deserialize, Serialize};

/// ICE credentials (`a=ice-ufrag` / `a=ice-pwd`) of a session description.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IceCredentials {
    /// Value of the `a=ice-ufrag:` attribute.
    pub ufrag: String,

    /// Value of the `a=ice-pwd:` attribute.
    pub pwd: String,
}

/// Single trickled ICE candidate in the form the media backend accepts.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Candidate {
    /// Regular `a=candidate:` line.
    Fragment {
        /// Index of the media section the candidate belongs to.
        #[serde(rename = "sdpMLineIndex")]
        sdp_m_line_index: u64,

        /// Full candidate attribute value, including the `candidate:`
        /// prefix.
        candidate: String,
    },

    /// `a=end-of-candidates` sentinel.
    Completed {
        /// Always `true`.
        completed: bool,
    },
}

impl Candidate {
    /// Builds a [`Candidate::Fragment`] for the first media section.
    #[must_use]
    pub fn fragment(candidate: String) -> Self {
        Self::Fragment {
            sdp_m_line_index: 0,
            candidate,
        }
    }

    /// Builds the end-of-candidates sentinel.
    #[must_use]
    pub fn completed() -> Self {
        Self::Completed { completed: true }
    }
}

/// Parsed [RFC 8840] trickle fragment.
///
/// [RFC 8840]: https://tools.ietf.org/html/rfc8840
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Fragment {
    /// New `a=ice-ufrag:` value, if the fragment carries one.
    pub ufrag: Option<String>,

    /// New `a=ice-pwd:` value, if the fragment carries one.
    pub pwd: Option<String>,

    /// Candidates enumerated by the fragment, in order of appearance,
    /// including the end-of-candidates sentinel.
    pub candidates: Vec<Candidate>,
}

impl Fragment {
    /// Indicates whether this [`Fragment`] requests an ICE restart against
    /// the provided current credentials: both new credentials must be
    /// present and differ from the current pair.
    #[must_use]
    pub fn is_restart(&self, current: &IceCredentials) -> bool {
        self.restart_credentials(current).is_some()
    }

    /// Returns the new ICE credentials of this [`Fragment`] iff it
    /// requests a restart (see [`Fragment::is_restart`]).
    #[must_use]
    pub fn restart_credentials(
        &self,
        current: &IceCredentials,
    ) -> Option<IceCredentials> {
        match (&self.ufrag, &self.pwd) {
            (Some(ufrag), Some(pwd))
                if ufrag != &current.ufrag || pwd != &current.pwd =>
            {
                Some(IceCredentials {
                    ufrag: ufrag.clone(),
                    pwd: pwd.clone(),
                })
            }
            _ => None,
        }
    }
}

/// Checks that the provided body contains a `v=0` session description line.
#[must_use]
pub fn contains_session_description(sdp: &str) -> bool {
    lines(sdp).any(|l| l == "v=0")
}

/// Extracts ICE credentials from a session description.
///
/// First occurrence of each attribute wins.
#[must_use]
pub fn extract_ice_credentials(sdp: &str) -> Option<IceCredentials> {
    let mut ufrag = None;
    let mut pwd = None;
    for line in lines(sdp) {
        if let Some(v) = line.strip_prefix("a=ice-ufrag:") {
            ufrag.get_or_insert_with(|| v.to_owned());
        } else if let Some(v) = line.strip_prefix("a=ice-pwd:") {
            pwd.get_or_insert_with(|| v.to_owned());
        }
    }
    Some(IceCredentials {
        ufrag: ufrag?,
        pwd: pwd?,
    })
}

/// Parses an `application/trickle-ice-sdpfrag` body.
#[must_use]
pub fn parse_fragment(body: &str) -> Fragment {
    let mut fragment = Fragment::default();
    for line in lines(body) {
        if let Some(v) = line.strip_prefix("a=ice-ufrag:") {
            fragment.ufrag = Some(v.to_owned());
        } else if let Some(v) = line.strip_prefix("a=ice-pwd:") {
            fragment.pwd = Some(v.to_owned());
        } else if let Some(rest) = line.strip_prefix("a=candidate:") {
            fragment
                .candidates
                .push(Candidate::fragment(format!("candidate:{}", rest)));
        } else if line == "a=end-of-candidates" {
            fragment.candidates.push(Candidate::completed());
        }
    }
    fragment
}

/// Rewrites every `a=ice-ufrag:` and `a=ice-pwd:` line of the provided
/// session description to the new credentials, preserving line endings.
#[must_use]
pub fn rewrite_ice_credentials(sdp: &str, new: &IceCredentials) -> String {
    sdp.split_inclusive('\n')
        .map(|raw| {
            let (line, ending) = split_ending(raw);
            if line.starts_with("a=ice-ufrag:") {
                format!("a=ice-ufrag:{}{}", new.ufrag, ending)
            } else if line.starts_with("a=ice-pwd:") {
                format!("a=ice-pwd:{}{}", new.pwd, ending)
            } else {
                raw.to_owned()
            }
        })
        .collect()
}

/// Projects a full SDP answer into the fragment returned on a successful ICE
/// restart: the answer is truncated to its first two `m=` sections, out of
/// which only ICE-relevant lines survive.
#[must_use]
pub fn restart_answer_fragment(answer: &str) -> String {
    const KEPT_PREFIXES: &[&str] = &[
        "a=ice-",
        "a=group:BUNDLE",
        "m=",
        "a=mid:",
        "a=candidate:",
        "a=end-of-candidates",
    ];

    let mut media_sections = 0;
    let mut out = String::new();
    for line in lines(answer) {
        if line.starts_with("m=") {
            media_sections += 1;
            if media_sections > 2 {
                break;
            }
        }
        if KEPT_PREFIXES.iter().any(|p| line.starts_with(p)) {
            out.push_str(line);
            out.push_str("\r\n");
        }
    }
    out
}

/// Iterates over lines of an SDP body, with any line endings stripped.
fn lines(body: &str) -> impl Iterator<Item = &str> {
    body.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l))
}

/// Splits a `split_inclusive` chunk into its payload and line ending.
fn split_ending(raw: &str) -> (&str, &str) {
    if let Some(line) = raw.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = raw.strip_suffix('\n') {
        (line, "\n")
    } else {
        (raw, "")
    }
}
