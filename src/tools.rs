use base64ct::{Base64, Encoding};
use ring::hmac;

/// HMAC-SHA1 over `msg` with `key`, as required by the header-based
/// authentication scheme.
#[must_use]
pub fn sha1_hmac(key: &[u8], msg: &[u8]) -> hmac::Tag {
    let s_key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    hmac::sign(&s_key, msg)
}

#[must_use]
pub fn base64_encode(input: &[u8]) -> String {
    Base64::encode_string(input)
}
