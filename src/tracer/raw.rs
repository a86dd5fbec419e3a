use serde::{Serialize, Deserialize};

/// A string copied out of a tracee's address space.
///
/// argv and envp entries are arbitrary byte sequences as far as the kernel
/// cares, and a faulty pointer in the traced program is not our error to
/// die on. Decoding happens here, once, at capture time: clean utf8 becomes
/// `Text`, anything else is kept as the exact bytes, and a pointer we could
/// not follow at all is remembered by its address.
#[derive(Debug,Clone,Hash,Eq,Ord,PartialEq,PartialOrd,Serialize,Deserialize)]
pub enum RawString {
    Text(String),
    Bytes(Vec<u8>),
    Unreadable(u64)
}

impl RawString {
    pub fn from_bytes(bytes : Vec<u8>) -> RawString {
        match String::from_utf8(bytes) {
            Ok(s) => { RawString::Text(s) }
            Err(err) => { RawString::Bytes(err.into_bytes()) }
        }
    }

    /// A human-readable rendition for reports; binary content is rendered
    /// lossily and must not be fed back into anything that replays paths.
    pub fn display(&self) -> std::borrow::Cow<str> {
        match self {
            RawString::Text(s) => { std::borrow::Cow::Borrowed(s.as_str()) }
            RawString::Bytes(bytes) => { String::from_utf8_lossy(bytes) }
            RawString::Unreadable(addr) => {
                std::borrow::Cow::Owned(format!("<unreadable:{:#x}>", addr))
            }
        }
    }
}
