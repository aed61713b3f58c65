use std::fmt;
use std::ops::BitOr;

/// Per-connection state bits.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u16);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// The connection may serve another request after this one.
    pub const KEEP_ALIVE: Flags = Flags(1 << 0);
    /// The current request was HTTP/1.1.
    pub const HTTP11: Flags = Flags(1 << 1);
    /// Accepted on a secure listener.
    pub const SECURE: Flags = Flags(1 << 2);
    /// The response body is chunk framed.
    pub const CHUNKED: Flags = Flags(1 << 3);
    pub const HEADERS_WRITTEN: Flags = Flags(1 << 4);
    pub const FINALIZED: Flags = Flags(1 << 5);
    /// The response carries no body (HEAD, 204, 304); written bytes are discarded.
    pub const NO_BODY: Flags = Flags(1 << 6);
    /// Close once the output has drained.
    pub const CLOSING: Flags = Flags(1 << 7);
    /// The peer closed its write half.
    pub const PEER_EOF: Flags = Flags(1 << 8);
    /// The request was rewritten; resolution restarts from the first route.
    pub const REROUTE: Flags = Flags(1 << 9);
    /// Query and form variables have been decoded.
    pub const VARS_DECODED: Flags = Flags(1 << 10);
    /// The whole request body has been received.
    pub const CONTENT_DONE: Flags = Flags(1 << 11);
    /// The background writer produced nothing on its last call and waits to be woken.
    pub const WRITER_IDLE: Flags = Flags(1 << 12);

    const NAMES: [(Flags, &'static str); 13] = [
        (Flags::KEEP_ALIVE, "KEEP_ALIVE"),
        (Flags::HTTP11, "HTTP11"),
        (Flags::SECURE, "SECURE"),
        (Flags::CHUNKED, "CHUNKED"),
        (Flags::HEADERS_WRITTEN, "HEADERS_WRITTEN"),
        (Flags::FINALIZED, "FINALIZED"),
        (Flags::NO_BODY, "NO_BODY"),
        (Flags::CLOSING, "CLOSING"),
        (Flags::PEER_EOF, "PEER_EOF"),
        (Flags::REROUTE, "REROUTE"),
        (Flags::VARS_DECODED, "VARS_DECODED"),
        (Flags::CONTENT_DONE, "CONTENT_DONE"),
        (Flags::WRITER_IDLE, "WRITER_IDLE"),
    ];

    #[inline]
    pub fn contains(self, other: Flags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: Flags, on: bool) {
        if on { self.insert(other) } else { self.remove(other) }
    }

    /// Only the bits in `keep`.
    pub fn retain(self, keep: Flags) -> Flags {
        Flags(self.0 & keep.0)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_set();
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                list.entry(&format_args!("{name}"));
            }
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain() {
        let flags = Flags::KEEP_ALIVE | Flags::SECURE | Flags::FINALIZED | Flags::CHUNKED;
        let kept = flags.retain(Flags::KEEP_ALIVE | Flags::SECURE | Flags::HTTP11);
        assert_eq!(kept, Flags::KEEP_ALIVE | Flags::SECURE);
        assert_eq!(format!("{kept:?}"), "{KEEP_ALIVE, SECURE}");
    }

    #[test]
    fn test_set() {
        let mut flags = Flags::NONE;
        flags.set(Flags::CLOSING, true);
        assert!(flags.contains(Flags::CLOSING));
        flags.set(Flags::CLOSING, false);
        assert_eq!(flags, Flags::NONE);
    }
}
