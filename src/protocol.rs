//! NNTP protocol helpers: command construction, response parsing and
//! yEnc header extraction
//!
//! Commands follow RFC 3977 and RFC 4643. Only the pieces the streaming
//! client actually speaks are implemented; this is a client, not a server.

use crate::constants::protocol::MIN_RESPONSE_LENGTH;
use crate::error::NntpError;

/// Response codes the client dispatches on (RFC 3977 / RFC 4643)
pub mod codes {
    /// Service available, posting allowed
    pub const GREETING_POSTING_OK: u16 = 200;
    /// Service available, posting prohibited
    pub const GREETING_NO_POSTING: u16 = 201;
    /// Server date and time follows
    pub const DATE: u16 = 111;
    /// Article body follows (multiline)
    pub const BODY_FOLLOWS: u16 = 222;
    /// Article exists (STAT)
    pub const ARTICLE_EXISTS: u16 = 223;
    /// Authentication accepted
    pub const AUTH_ACCEPTED: u16 = 281;
    /// Password required
    pub const PASSWORD_REQUIRED: u16 = 381;
    /// No article with that message-id
    pub const NO_SUCH_ARTICLE: u16 = 430;
}

/// QUIT command (RFC 3977 Section 5.4)
pub const QUIT: &str = "QUIT\r\n";

/// DATE command (RFC 3977 Section 7.1)
pub const DATE: &str = "DATE\r\n";

/// Construct AUTHINFO USER command (RFC 4643 Section 2.3)
#[inline]
pub fn authinfo_user(username: &str) -> String {
    format!("AUTHINFO USER {username}\r\n")
}

/// Construct AUTHINFO PASS command (RFC 4643 Section 2.4)
#[inline]
pub fn authinfo_pass(password: &str) -> String {
    format!("AUTHINFO PASS {password}\r\n")
}

/// Construct BODY command with message-ID (RFC 3977 Section 6.2.3)
#[inline]
pub fn body_by_msgid(msgid: &str) -> String {
    format!("BODY {msgid}\r\n")
}

/// Construct STAT command with message-ID (RFC 3977 Section 6.2.4)
#[inline]
pub fn stat_by_msgid(msgid: &str) -> String {
    format!("STAT {msgid}\r\n")
}

/// A parsed single-line NNTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Three-digit status code
    pub code: u16,
    /// Text after the status code, CRLF stripped
    pub message: String,
}

impl Response {
    /// Parse a response line (CRLF optional)
    pub fn parse(line: &str) -> Result<Self, NntpError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.len() < MIN_RESPONSE_LENGTH {
            return Err(NntpError::Protocol(format!("short response: {line:?}")));
        }
        let (code_str, rest) = match (line.get(..3), line.get(3..)) {
            (Some(code), Some(rest)) => (code, rest),
            _ => {
                return Err(NntpError::Protocol(format!("invalid status line: {line:?}")));
            }
        };
        let code: u16 = code_str
            .parse()
            .map_err(|_| NntpError::Protocol(format!("invalid status line: {line:?}")))?;
        Ok(Self {
            code,
            message: rest.trim_start().to_string(),
        })
    }

    /// Whether this code introduces a multiline data block
    #[must_use]
    pub fn is_multiline(&self) -> bool {
        matches!(self.code, 100..=199 | 215 | 220 | 221 | 222 | 224 | 225 | 230 | 231)
    }
}

/// Whether an accumulated response buffer ends at the multiline terminator
#[inline]
#[must_use]
pub fn has_terminator(data: &[u8]) -> bool {
    data.ends_with(crate::constants::protocol::MULTILINE_TERMINATOR)
}

/// Remove RFC 3977 Section 3.1.1 dot-stuffing from a body line
///
/// Lines beginning with two dots had one prepended by the server; the
/// terminator line itself (a single dot) never reaches this function.
#[inline]
#[must_use]
pub fn unstuff_line(line: &[u8]) -> &[u8] {
    if line.starts_with(b"..") { &line[1..] } else { line }
}

/// yEnc header metadata parsed from the first lines of an article body
///
/// Only `=ybegin` and the optional `=ypart` line are read; the encoded
/// payload itself is opaque to this crate. For multipart posts the
/// `size=` attribute of `=ybegin` carries the size of the *whole* file,
/// and `=ypart begin=/end=` delimit this part's 1-based byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Total decoded size of the file this segment belongs to
    pub file_size: u64,
    /// Zero-based offset of this part's first byte within the file
    pub part_offset: u64,
    /// Decoded size of this part
    pub part_size: u64,
    /// File name announced by the poster, if any
    pub file_name: Option<String>,
}

impl SegmentHeader {
    /// Parse from the `=ybegin` line and, for multipart posts, the
    /// `=ypart` line that follows it
    pub fn parse(ybegin: &str, ypart: Option<&str>) -> Result<Self, NntpError> {
        let ybegin = ybegin.trim_end_matches(['\r', '\n']);
        if !ybegin.starts_with("=ybegin ") {
            return Err(NntpError::Protocol(format!(
                "expected =ybegin line, got {ybegin:?}"
            )));
        }

        let file_size = yenc_attr(ybegin, "size")
            .ok_or_else(|| NntpError::Protocol("=ybegin missing size attribute".to_string()))?
            .parse::<u64>()
            .map_err(|_| NntpError::Protocol("=ybegin size is not a number".to_string()))?;
        // name is always the last attribute and may contain spaces
        let file_name = ybegin
            .split_once(" name=")
            .map(|(_, name)| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let (part_offset, part_size) = match ypart {
            Some(line) => {
                let line = line.trim_end_matches(['\r', '\n']);
                if !line.starts_with("=ypart ") {
                    return Err(NntpError::Protocol(format!(
                        "expected =ypart line, got {line:?}"
                    )));
                }
                let begin = yenc_attr(line, "begin")
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or_else(|| {
                        NntpError::Protocol("=ypart missing begin attribute".to_string())
                    })?;
                let end = yenc_attr(line, "end")
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or_else(|| {
                        NntpError::Protocol("=ypart missing end attribute".to_string())
                    })?;
                if begin == 0 || end < begin {
                    return Err(NntpError::Protocol(format!(
                        "invalid =ypart range {begin}..{end}"
                    )));
                }
                (begin - 1, end - begin + 1)
            }
            // single-part post: the segment is the whole file
            None => (0, file_size),
        };

        Ok(Self {
            file_size,
            part_offset,
            part_size,
            file_name,
        })
    }
}

/// Extract a `key=value` attribute from a yEnc header line
///
/// Not applicable to `name=`, whose value may contain spaces.
fn yenc_attr<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split_whitespace()
        .filter_map(|token| token.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}
