//! Device side of the session protocol
//!
//! A device is identified by the SRC of its root secret. Before it can
//! register, an existing identity (normally the owner) must invite it, which
//! pre-provisions the device's ENCRYPTS/SIGNS fans on the relay.
//!
//! Key material per device:
//! - DS: Ed25519 signing identity (public half stored by the relay)
//! - DE: X25519 exchange key, combined with the node SE keys into the
//!   rotating login fans
//! - NONCE: 32-byte key-encryption key the fans are wrapped under on
//!   Login/Rekey, replaced after each accepted rotation
//! - wTOKEN: opaque token stored by the relay and handed back on Login

use crate::envelope::TransactionEnvelope;
use crate::message::{
    InviteRequest, LoginRequest, RegisterRequest, RekeyRequest, Request, Response, TransactionKind,
};
use crate::transaction::seal_transaction;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use shardrelay_core::crypto::{unwrap_key, wrap_key, SymmetricKey};
use shardrelay_core::error::{Result, ShardRelayError};
use shardrelay_core::exchange::ExchangeKeyPair;
use shardrelay_core::kdf::{KeyFan, KeyHierarchy, Src, LOGIN_ENCRYPTS_LABEL, LOGIN_SIGNS_LABEL};
use std::fmt;
use tracing::debug;

/// Login fans derived from node SE public keys and a device DE key
pub fn login_fans(de: &ExchangeKeyPair, se_pub: &[Vec<u8>], device_id: &Src) -> Result<(KeyFan, KeyFan)> {
    let shared = se_pub
        .iter()
        .map(|public| de.agree(public))
        .collect::<Result<Vec<_>>>()?;
    Ok((
        KeyFan::from_agreements(&shared, device_id, LOGIN_ENCRYPTS_LABEL)?,
        KeyFan::from_agreements(&shared, device_id, LOGIN_SIGNS_LABEL)?,
    ))
}

/// Wrap every key of a fan under `kek`
pub fn wrap_fan(kek: &SymmetricKey, fan: &KeyFan) -> Result<Vec<Vec<u8>>> {
    fan.keys().iter().map(|key| wrap_key(kek, key)).collect()
}

/// Inverse of [`wrap_fan`]
pub fn unwrap_fan(kek: &SymmetricKey, wrapped: &[Vec<u8>]) -> Result<KeyFan> {
    let keys = wrapped
        .iter()
        .map(|w| unwrap_key(kek, w))
        .collect::<Result<Vec<_>>>()?;
    KeyFan::from_keys(keys)
}

/// Rotation waiting for the relay's answer
struct Pending {
    kind: TransactionKind,
    nonce: SymmetricKey,
    ds: Option<SigningKey>,
    de: Option<ExchangeKeyPair>,
}

/// Client-side state of one device
pub struct DeviceSession {
    hierarchy: KeyHierarchy,
    node_count: usize,
    encrypts: KeyFan,
    signs: KeyFan,
    ds: SigningKey,
    de: ExchangeKeyPair,
    nonce: SymmetricKey,
    token: SymmetricKey,
    w_token: Vec<u8>,
    login: Option<(KeyFan, KeyFan)>,
    pending: Option<Pending>,
}

impl DeviceSession {
    /// Fresh device for `root_secret` talking to `node_count` nodes
    pub fn new(root_secret: &[u8], node_count: usize) -> Result<Self> {
        let hierarchy = KeyHierarchy::from_secret(root_secret)?;
        let encrypts = hierarchy.encrypt_fan(node_count)?;
        let signs = hierarchy.sign_fan(node_count)?;

        // only the device can open its own token
        let token = SymmetricKey::generate();
        let w_token = wrap_key(encrypts.owner(), &token)?;

        Ok(Self {
            hierarchy,
            node_count,
            encrypts,
            signs,
            ds: SigningKey::generate(&mut OsRng),
            de: ExchangeKeyPair::generate(),
            nonce: SymmetricKey::generate(),
            token,
            w_token,
            login: None,
            pending: None,
        })
    }

    pub fn src(&self) -> Src {
        self.hierarchy.src()
    }

    pub fn ds_pub(&self) -> [u8; 32] {
        self.ds.verifying_key().to_bytes()
    }

    pub fn de_pub(&self) -> [u8; 32] {
        self.de.public_bytes()
    }

    pub fn nonce(&self) -> &SymmetricKey {
        &self.nonce
    }

    pub fn w_token(&self) -> &[u8] {
        &self.w_token
    }

    pub fn encrypts(&self) -> &KeyFan {
        &self.encrypts
    }

    pub fn signs(&self) -> &KeyFan {
        &self.signs
    }

    /// Whether Register (or a later rotation) has produced login fans
    pub fn has_login_keys(&self) -> bool {
        self.login.is_some()
    }

    /// Register this device. Requires a prior invite for its SRC.
    pub fn register_request(&mut self) -> Result<Vec<u8>> {
        let request = Request::Register(RegisterRequest {
            ds_pub: self.ds_pub().to_vec(),
            de_pub: self.de_pub().to_vec(),
            nonce: self.nonce.as_bytes().to_vec(),
            w_token: self.w_token.clone(),
            device_id: self.src().as_bytes().to_vec(),
        });
        self.pending = Some(Pending {
            kind: TransactionKind::Register,
            nonce: self.nonce.clone(),
            ds: None,
            de: None,
        });
        self.seal(&request, &self.encrypts, &self.signs)
    }

    /// Log in with the current login fans, handing over the ENCRYPTS/SIGNS
    /// fans wrapped under the current NONCE
    pub fn login_request(&mut self) -> Result<Vec<u8>> {
        let (login_encrypts, login_signs) = self.login.as_ref().ok_or_else(|| {
            ShardRelayError::UnknownIdentity(format!("{} has no login keys", self.src()))
        })?;

        let next_nonce = SymmetricKey::generate();
        let request = Request::Login(LoginRequest {
            ds_pub: self.ds_pub().to_vec(),
            nonce: next_nonce.as_bytes().to_vec(),
            w_encrypts: wrap_fan(&self.nonce, &self.encrypts)?,
            w_signs: wrap_fan(&self.nonce, &self.signs)?,
        });
        let sealed = self.seal(&request, login_encrypts, login_signs)?;

        self.pending = Some(Pending {
            kind: TransactionKind::Login,
            nonce: next_nonce,
            ds: None,
            de: None,
        });
        Ok(sealed)
    }

    /// Rotate DS, DE and NONCE, authenticated with the device fans
    pub fn rekey_request(&mut self) -> Result<Vec<u8>> {
        let next_nonce = SymmetricKey::generate();
        let next_ds = SigningKey::generate(&mut OsRng);
        let next_de = ExchangeKeyPair::generate();

        let request = Request::Rekey(RekeyRequest {
            ds_pub: next_ds.verifying_key().to_bytes().to_vec(),
            de_pub: next_de.public_bytes().to_vec(),
            nonce: next_nonce.as_bytes().to_vec(),
            w_encrypts: wrap_fan(&self.nonce, &self.encrypts)?,
            w_signs: wrap_fan(&self.nonce, &self.signs)?,
        });
        let sealed = self.seal(&request, &self.encrypts, &self.signs)?;

        self.pending = Some(Pending {
            kind: TransactionKind::Rekey,
            nonce: next_nonce,
            ds: Some(next_ds),
            de: Some(next_de),
        });
        Ok(sealed)
    }

    /// Pre-provision a device whose root secret is `invitee_secret`
    pub fn invite_request(&self, invitee_secret: &[u8]) -> Result<Vec<u8>> {
        let invitee = KeyHierarchy::from_secret(invitee_secret)?;
        let encrypts = invitee.encrypt_fan(self.node_count)?;
        let signs = invitee.sign_fan(self.node_count)?;

        let request = Request::Invite(InviteRequest {
            invite_id: invitee.src().as_bytes().to_vec(),
            encrypts: encrypts.keys().iter().map(|k| k.as_bytes().to_vec()).collect(),
            signs: signs.keys().iter().map(|k| k.as_bytes().to_vec()).collect(),
        });
        self.seal(&request, &self.encrypts, &self.signs)
    }

    /// Apply the relay's answer to the last request. Login returns the
    /// unwrapped token.
    pub fn accept(&mut self, kind: TransactionKind, response: &[u8]) -> Result<Option<SymmetricKey>> {
        let response = Response::decode(kind, response)?;
        if kind == TransactionKind::Invite {
            return Ok(None);
        }

        let pending = match self.pending.take() {
            Some(p) if p.kind == kind => p,
            other => {
                self.pending = other;
                return Err(ShardRelayError::Internal(format!("no {} in flight", kind)));
            }
        };

        let (se_pub, w_token) = match response {
            Response::Register { se_pub } => (se_pub, None),
            Response::Login { w_token, se_pub } | Response::Rekey { w_token, se_pub } => {
                (se_pub, Some(w_token))
            }
            Response::Invite => return Ok(None),
        };

        let src = self.src();
        let login = login_fans(pending.de.as_ref().unwrap_or(&self.de), &se_pub, &src)?;
        let token = match w_token {
            Some(w_token) => {
                let token = unwrap_key(self.encrypts.owner(), &w_token)?;
                if token != self.token {
                    return Err(ShardRelayError::IntegrityFailure);
                }
                Some(token)
            }
            None => None,
        };

        if let Some(ds) = pending.ds {
            self.ds = ds;
        }
        if let Some(de) = pending.de {
            self.de = de;
        }
        self.nonce = pending.nonce;
        self.login = Some(login);
        debug!(src = %src, kind = %kind, nodes = self.node_count, "device keys rotated");

        Ok(token)
    }

    fn seal(&self, request: &Request, encrypts: &KeyFan, signs: &KeyFan) -> Result<Vec<u8>> {
        let payload = request.encode()?;
        let envelope: TransactionEnvelope = seal_transaction(&payload, &self.src(), encrypts, signs)?;
        envelope.encode()
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("src", &self.src())
            .field("node_count", &self.node_count)
            .field("has_login_keys", &self.login.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::InboundTransaction;

    #[test]
    fn test_wrap_unwrap_fan() {
        let kek = SymmetricKey::generate();
        let fan = KeyHierarchy::from_secret(b"x").unwrap().encrypt_fan(3).unwrap();
        let wrapped = wrap_fan(&kek, &fan).unwrap();
        assert_eq!(wrapped.len(), 4);
        assert_eq!(unwrap_fan(&kek, &wrapped).unwrap(), fan);
        assert!(matches!(
            unwrap_fan(&SymmetricKey::generate(), &wrapped),
            Err(ShardRelayError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_login_fans_agree_on_both_sides() {
        let device = ExchangeKeyPair::generate();
        let nodes: Vec<ExchangeKeyPair> = (0..4).map(|_| ExchangeKeyPair::generate()).collect();
        let se_pub: Vec<Vec<u8>> = nodes.iter().map(|n| n.public_bytes().to_vec()).collect();
        let src = Src::from_bytes([4; 8]);

        let (device_enc, device_sig) = login_fans(&device, &se_pub, &src).unwrap();

        let shared: Vec<[u8; 32]> = nodes.iter().map(|n| n.agree(&device.public_bytes()).unwrap()).collect();
        assert_eq!(device_enc, KeyFan::from_agreements(&shared, &src, LOGIN_ENCRYPTS_LABEL).unwrap());
        assert_eq!(device_sig, KeyFan::from_agreements(&shared, &src, LOGIN_SIGNS_LABEL).unwrap());
        assert_ne!(device_enc.keys()[1], device_enc.keys()[2]);
    }

    #[test]
    fn test_register_request_opens_with_device_fans() {
        let mut device = DeviceSession::new(b"device root", 3).unwrap();
        let bytes = device.register_request().unwrap();

        let inbound = InboundTransaction::decode(&bytes).unwrap();
        assert_eq!(inbound.src(), &device.src());
        let payload = inbound.open(device.encrypts(), device.signs()).unwrap();
        match Request::decode_as(&payload, TransactionKind::Register).unwrap() {
            Request::Register(r) => {
                assert_eq!(r.device_id, device.src().as_bytes().to_vec());
                assert_eq!(r.nonce, device.nonce().as_bytes().to_vec());
                assert_eq!(r.w_token, device.w_token());
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_login_needs_login_keys() {
        let mut device = DeviceSession::new(b"device root", 3).unwrap();
        assert!(matches!(
            device.login_request(),
            Err(ShardRelayError::UnknownIdentity(_))
        ));
    }

    #[test]
    fn test_accept_without_request_fails() {
        let mut device = DeviceSession::new(b"device root", 1).unwrap();
        let node = ExchangeKeyPair::generate();
        let response = Response::Register {
            se_pub: vec![node.public_bytes().to_vec(); 2],
        }
        .encode()
        .unwrap();
        assert!(device.accept(TransactionKind::Register, &response).is_err());

        device.register_request().unwrap();
        assert!(device.accept(TransactionKind::Register, &response).unwrap().is_none());
        assert!(device.has_login_keys());
    }
}
