//! Session requests and responses
//!
//! Each transaction kind has a fixed field set. Requests are CBOR maps
//! tagged with a `KIND` entry so a payload sealed for one endpoint cannot be
//! replayed against another.

use crate::cbor::{self, MapReader};
use ciborium::value::Value;
use shardrelay_core::error::{Result, ShardRelayError};
use std::fmt;
use std::str::FromStr;

const KIND: &str = "KIND";

/// The four transaction kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Register,
    Login,
    Rekey,
    Invite,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 4] = [
        TransactionKind::Register,
        TransactionKind::Login,
        TransactionKind::Rekey,
        TransactionKind::Invite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Register => "Register",
            TransactionKind::Login => "Login",
            TransactionKind::Rekey => "Rekey",
            TransactionKind::Invite => "Invite",
        }
    }

    /// Lowercase path segment used on the HTTP boundary
    pub fn route(&self) -> &'static str {
        match self {
            TransactionKind::Register => "register",
            TransactionKind::Login => "login",
            TransactionKind::Rekey => "rekey",
            TransactionKind::Invite => "invite",
        }
    }

    /// Login is the only kind authenticated with the rotating login fans
    pub fn uses_login_keys(&self) -> bool {
        matches!(self, TransactionKind::Login)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = ShardRelayError;

    fn from_str(s: &str) -> Result<Self> {
        TransactionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.route() == s)
            .ok_or_else(|| ShardRelayError::MalformedEnvelope(format!("unknown transaction kind {}", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub ds_pub: Vec<u8>,
    pub de_pub: Vec<u8>,
    pub nonce: Vec<u8>,
    pub w_token: Vec<u8>,
    pub device_id: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub ds_pub: Vec<u8>,
    /// NONCE to store for the next rotation
    pub nonce: Vec<u8>,
    /// ENCRYPTS fan wrapped under the currently stored NONCE
    pub w_encrypts: Vec<Vec<u8>>,
    /// SIGNS fan wrapped under the currently stored NONCE
    pub w_signs: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RekeyRequest {
    pub ds_pub: Vec<u8>,
    pub de_pub: Vec<u8>,
    pub nonce: Vec<u8>,
    pub w_encrypts: Vec<Vec<u8>>,
    pub w_signs: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteRequest {
    pub invite_id: Vec<u8>,
    pub encrypts: Vec<Vec<u8>>,
    pub signs: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register(RegisterRequest),
    Login(LoginRequest),
    Rekey(RekeyRequest),
    Invite(InviteRequest),
}

impl Request {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Request::Register(_) => TransactionKind::Register,
            Request::Login(_) => TransactionKind::Login,
            Request::Rekey(_) => TransactionKind::Rekey,
            Request::Invite(_) => TransactionKind::Invite,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let kind = (KIND, Value::Text(self.kind().as_str().to_string()));
        let map = match self {
            Request::Register(r) => cbor::map(vec![
                kind,
                ("DS_PUB", cbor::bytes(&r.ds_pub)),
                ("DE_PUB", cbor::bytes(&r.de_pub)),
                ("NONCE", cbor::bytes(&r.nonce)),
                ("wTOKEN", cbor::bytes(&r.w_token)),
                ("deviceID", cbor::bytes(&r.device_id)),
            ]),
            Request::Login(r) => cbor::map(vec![
                kind,
                ("DS_PUB", cbor::bytes(&r.ds_pub)),
                ("NONCE", cbor::bytes(&r.nonce)),
                ("wENCRYPTS", cbor::byte_list(&r.w_encrypts)),
                ("wSIGNS", cbor::byte_list(&r.w_signs)),
            ]),
            Request::Rekey(r) => cbor::map(vec![
                kind,
                ("DS_PUB", cbor::bytes(&r.ds_pub)),
                ("DE_PUB", cbor::bytes(&r.de_pub)),
                ("NONCE", cbor::bytes(&r.nonce)),
                ("wENCRYPTS", cbor::byte_list(&r.w_encrypts)),
                ("wSIGNS", cbor::byte_list(&r.w_signs)),
            ]),
            Request::Invite(r) => cbor::map(vec![
                kind,
                ("inviteID", cbor::bytes(&r.invite_id)),
                ("ENCRYPTS", cbor::byte_list(&r.encrypts)),
                ("SIGNS", cbor::byte_list(&r.signs)),
            ]),
        };
        cbor::to_vec(&map)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut map = MapReader::decode(bytes)?;
        let kind: TransactionKind = map.text(KIND)?.parse()?;

        let request = match kind {
            TransactionKind::Register => Request::Register(RegisterRequest {
                ds_pub: map.bytes("DS_PUB")?,
                de_pub: map.bytes("DE_PUB")?,
                nonce: map.bytes("NONCE")?,
                w_token: map.bytes("wTOKEN")?,
                device_id: map.bytes("deviceID")?,
            }),
            TransactionKind::Login => Request::Login(LoginRequest {
                ds_pub: map.bytes("DS_PUB")?,
                nonce: map.bytes("NONCE")?,
                w_encrypts: map.byte_list("wENCRYPTS")?,
                w_signs: map.byte_list("wSIGNS")?,
            }),
            TransactionKind::Rekey => Request::Rekey(RekeyRequest {
                ds_pub: map.bytes("DS_PUB")?,
                de_pub: map.bytes("DE_PUB")?,
                nonce: map.bytes("NONCE")?,
                w_encrypts: map.byte_list("wENCRYPTS")?,
                w_signs: map.byte_list("wSIGNS")?,
            }),
            TransactionKind::Invite => Request::Invite(InviteRequest {
                invite_id: map.bytes("inviteID")?,
                encrypts: map.byte_list("ENCRYPTS")?,
                signs: map.byte_list("SIGNS")?,
            }),
        };
        map.finish()?;
        Ok(request)
    }

    /// Decode and require a specific kind
    pub fn decode_as(bytes: &[u8], expected: TransactionKind) -> Result<Self> {
        let request = Self::decode(bytes)?;
        if request.kind() != expected {
            return Err(ShardRelayError::MalformedEnvelope(format!(
                "{} request sent to {} endpoint",
                request.kind(),
                expected
            )));
        }
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Register { se_pub: Vec<Vec<u8>> },
    Login { w_token: Vec<u8>, se_pub: Vec<Vec<u8>> },
    Rekey { w_token: Vec<u8>, se_pub: Vec<Vec<u8>> },
    Invite,
}

const INVITE_SUCCESS: &str = "SUCCESS";

impl Response {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Response::Register { .. } => TransactionKind::Register,
            Response::Login { .. } => TransactionKind::Login,
            Response::Rekey { .. } => TransactionKind::Rekey,
            Response::Invite => TransactionKind::Invite,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let map = match self {
            Response::Register { se_pub } => cbor::map(vec![("SE_PUB", cbor::byte_list(se_pub))]),
            Response::Login { w_token, se_pub } | Response::Rekey { w_token, se_pub } => cbor::map(vec![
                ("wTOKEN", cbor::bytes(w_token)),
                ("SE_PUB", cbor::byte_list(se_pub)),
            ]),
            Response::Invite => cbor::map(vec![("INVITE", Value::Text(INVITE_SUCCESS.to_string()))]),
        };
        cbor::to_vec(&map)
    }

    /// Responses are untagged, so the caller supplies the kind it asked for
    pub fn decode(kind: TransactionKind, bytes: &[u8]) -> Result<Self> {
        let mut map = MapReader::decode(bytes)?;
        let response = match kind {
            TransactionKind::Register => Response::Register {
                se_pub: map.byte_list("SE_PUB")?,
            },
            TransactionKind::Login => Response::Login {
                w_token: map.bytes("wTOKEN")?,
                se_pub: map.byte_list("SE_PUB")?,
            },
            TransactionKind::Rekey => Response::Rekey {
                w_token: map.bytes("wTOKEN")?,
                se_pub: map.byte_list("SE_PUB")?,
            },
            TransactionKind::Invite => {
                if map.text("INVITE")? != INVITE_SUCCESS {
                    return Err(cbor::malformed("invite not acknowledged"));
                }
                Response::Invite
            }
        };
        map.finish()?;
        Ok(response)
    }
}
