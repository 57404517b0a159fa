//! Datagram codec for the ssh-reverse-mux protocol.
//!
//! Two pairs of pure functions with inverses: [`build_request`]/[`parse_request`]
//! and [`build_response`]/[`parse_response`]. Every datagram carries a fresh
//! 16-byte salt and a 64-byte keyed BLAKE2b MAC so that replayed bytes are
//! authenticated without any state beyond the pre-shared secret.

use std::fmt;

use blake2::{
    Blake2bMac,
    digest::{Mac, consts::U64},
};
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Length of the random salt prefixed to every MAC computation.
pub const SALT_LEN: usize = 16;

/// Length of the BLAKE2b MAC tag.
pub const MAC_LEN: usize = 64;

/// Maximum length of an identity string.
pub const MAX_IDENT_LEN: usize = 255;

type Blake2bMac512 = Blake2bMac<U64>;

#[derive(Debug)]
pub enum Error {
    /// `ident` is empty or longer than [`MAX_IDENT_LEN`].
    InvalidIdent,
    /// The secret could not be used to key BLAKE2b (only possible for absurd
    /// key lengths; BLAKE2b accepts keys up to 64 bytes).
    InvalidSecret,
    /// The datagram is too short, too long, or otherwise structurally wrong.
    Malformed,
    /// The MAC did not verify under the given secret and identity.
    NotAuthenticated,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn mac(secret: &[u8], parts: &[&[u8]]) -> Result<[u8; MAC_LEN], Error> {
    let mut mac = Blake2bMac512::new_from_slice(secret).map_err(|_| Error::InvalidSecret)?;

    for part in parts {
        mac.update(part);
    }

    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Builds an authenticated request datagram for `ident`.
///
/// ```
/// use mux_codec::{build_request, parse_request};
///
/// let bytes = build_request(b"secret", b"node-a").unwrap();
/// assert_eq!(parse_request(b"secret", &bytes).unwrap(), b"node-a".to_vec());
/// ```
pub fn build_request(secret: &[u8], ident: &[u8]) -> Result<Vec<u8>, Error> {
    if ident.is_empty() || ident.len() > MAX_IDENT_LEN {
        return Err(Error::InvalidIdent);
    }

    let salt = random_salt();
    let tag = mac(secret, &[&salt, ident])?;

    let mut buf = Vec::with_capacity(1 + ident.len() + SALT_LEN + MAC_LEN);
    buf.push(ident.len() as u8);
    buf.extend_from_slice(ident);
    buf.extend_from_slice(&salt);
    buf.extend_from_slice(&tag);
    Ok(buf)
}

/// Parses and authenticates a request datagram, returning the enclosed
/// identity on success.
///
/// Any structural or authentication failure collapses to [`Error::NotAuthenticated`]
/// (or [`Error::Malformed`] for datagrams too short to even contain a length
/// prefix) — callers must not distinguish "bad MAC" from "bad shape" on the
/// wire, only in logs.
pub fn parse_request(secret: &[u8], bytes: &[u8]) -> Result<Vec<u8>, Error> {
    let ident_len = *bytes.first().ok_or(Error::Malformed)? as usize;
    if ident_len == 0 {
        return Err(Error::NotAuthenticated);
    }

    let ident_end = 1 + ident_len;
    let salt_end = ident_end + SALT_LEN;
    let mac_end = salt_end + MAC_LEN;
    if bytes.len() != mac_end {
        return Err(Error::Malformed);
    }

    let ident = &bytes[1..ident_end];
    let salt = &bytes[ident_end..salt_end];
    let tag = &bytes[salt_end..mac_end];

    let expected = mac(secret, &[salt, ident]).map_err(|_| Error::NotAuthenticated)?;
    if expected.ct_eq(tag).unwrap_u8() != 1 {
        return Err(Error::NotAuthenticated);
    }

    Ok(ident.to_vec())
}

/// Builds an authenticated response datagram binding `(ssh_port, tun_port)`
/// to `ident`.
///
/// ```
/// use mux_codec::{build_response, parse_response};
///
/// let bytes = build_response(b"secret", b"node-a", 22, 22000).unwrap();
/// assert_eq!(parse_response(b"secret", b"node-a", &bytes).unwrap(), (22, 22000));
/// ```
pub fn build_response(
    secret: &[u8],
    ident: &[u8],
    ssh_port: u16,
    tun_port: u16,
) -> Result<Vec<u8>, Error> {
    if ident.is_empty() || ident.len() > MAX_IDENT_LEN {
        return Err(Error::InvalidIdent);
    }

    let payload = [
        (ssh_port >> 8) as u8,
        ssh_port as u8,
        (tun_port >> 8) as u8,
        tun_port as u8,
    ];

    let salt = random_salt();
    let tag = mac(secret, &[ident, &salt, &payload])?;

    let mut buf = Vec::with_capacity(1 + payload.len() + SALT_LEN + MAC_LEN);
    buf.push(payload.len() as u8);
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&salt);
    buf.extend_from_slice(&tag);
    Ok(buf)
}

/// Parses and authenticates a response datagram against the caller's own
/// `ident`, returning `(ssh_port, tun_port)` on success.
pub fn parse_response(secret: &[u8], ident: &[u8], bytes: &[u8]) -> Result<(u16, u16), Error> {
    let res_len = *bytes.first().ok_or(Error::Malformed)? as usize;
    if res_len != 4 {
        return Err(Error::Malformed);
    }

    let payload_end = 1 + res_len;
    let salt_end = payload_end + SALT_LEN;
    let mac_end = salt_end + MAC_LEN;
    if bytes.len() != mac_end {
        return Err(Error::Malformed);
    }

    let payload = &bytes[1..payload_end];
    let salt = &bytes[payload_end..salt_end];
    let tag = &bytes[salt_end..mac_end];

    let expected = mac(secret, &[ident, salt, payload]).map_err(|_| Error::NotAuthenticated)?;
    if expected.ct_eq(tag).unwrap_u8() != 1 {
        return Err(Error::NotAuthenticated);
    }

    let ssh_port = u16::from_be_bytes([payload[0], payload[1]]);
    let tun_port = u16::from_be_bytes([payload[2], payload[3]]);
    Ok((ssh_port, tun_port))
}
