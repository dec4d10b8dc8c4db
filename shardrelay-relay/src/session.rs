//! Register / Login / Rekey / Invite state machine
//!
//! Every handler runs the same inbound pipeline before touching state:
//! decode -> look up the claimed SRC -> HMAC check -> decrypt -> decode the
//! tagged request. Any failure rejects the transaction and leaves the store
//! unchanged. Successful transactions replace the device record wholesale.

use crate::keystore::{DeviceKeyState, DeviceKeyStore, Registration};
use ed25519_dalek::VerifyingKey;
use shardrelay_core::crypto::SymmetricKey;
use shardrelay_core::error::{Result, ShardRelayError};
use shardrelay_core::exchange::ExchangeKeyPair;
use shardrelay_core::kdf::{KeyFan, KeyHierarchy, Src, LOGIN_ENCRYPTS_LABEL, LOGIN_SIGNS_LABEL};
use shardrelay_protocol::device::unwrap_fan;
use shardrelay_protocol::message::{
    InviteRequest, LoginRequest, RegisterRequest, RekeyRequest, Request, Response, TransactionKind,
};
use shardrelay_protocol::transaction::InboundTransaction;
use std::sync::Arc;
use tracing::{debug, info};

/// Server half of the session protocol
pub struct SessionProtocol {
    store: Arc<DeviceKeyStore>,
    node_count: usize,
}

impl SessionProtocol {
    pub fn new(store: Arc<DeviceKeyStore>, node_count: usize) -> Result<Self> {
        if node_count == 0 || node_count > shardrelay_core::erasure::MAX_TOTAL_SHARDS {
            return Err(ShardRelayError::Configuration(format!(
                "node count must be in 1..=255, got {}",
                node_count
            )));
        }
        Ok(Self { store, node_count })
    }

    pub fn store(&self) -> &Arc<DeviceKeyStore> {
        &self.store
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Provision the owner identity from its secret so it can issue invites
    pub fn bootstrap_owner(&self, owner_secret: &[u8]) -> Result<Src> {
        let hierarchy = KeyHierarchy::from_secret(owner_secret)?;
        let src = hierarchy.src();
        let state = DeviceKeyState::provisioned(
            hierarchy.encrypt_fan(self.node_count)?,
            hierarchy.sign_fan(self.node_count)?,
        );
        if self.store.insert_new(src, state) {
            info!(src = %src, "owner identity provisioned");
        } else {
            debug!(src = %src, "owner identity already present");
        }
        Ok(src)
    }

    pub fn handle_register(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        self.handle(TransactionKind::Register, envelope)
    }

    pub fn handle_login(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        self.handle(TransactionKind::Login, envelope)
    }

    pub fn handle_rekey(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        self.handle(TransactionKind::Rekey, envelope)
    }

    pub fn handle_invite(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        self.handle(TransactionKind::Invite, envelope)
    }

    /// Run one transaction of `kind` and return the encoded response
    pub fn handle(&self, kind: TransactionKind, envelope: &[u8]) -> Result<Vec<u8>> {
        let (src, current, request) = self.open(kind, envelope)?;

        let response = match request {
            Request::Register(r) => self.register(src, &current, r)?,
            Request::Login(r) => self.login(src, &current, r)?,
            Request::Rekey(r) => self.rekey(src, &current, r)?,
            Request::Invite(r) => self.invite(src, r)?,
        };

        info!(src = %src, kind = %kind, "transaction accepted");
        response.encode()
    }

    fn open(
        &self,
        kind: TransactionKind,
        envelope: &[u8],
    ) -> Result<(Src, Arc<DeviceKeyState>, Request)> {
        let inbound = InboundTransaction::decode(envelope)?;
        let src = *inbound.src();

        let current = self
            .store
            .get(&src)
            .ok_or_else(|| ShardRelayError::UnknownIdentity(src.to_string()))?;

        let (encrypts, signs) = if kind.uses_login_keys() {
            current
                .login_fans()
                .ok_or_else(|| ShardRelayError::UnknownIdentity(format!("{} is not registered", src)))?
        } else {
            (&current.encrypts, &current.signs)
        };

        let payload = inbound.open(encrypts, signs)?;
        let request = Request::decode_as(&payload, kind)?;
        debug!(src = %src, kind = %kind, bytes = payload.len(), "transaction opened");
        Ok((src, current, request))
    }

    fn register(&self, src: Src, current: &Arc<DeviceKeyState>, r: RegisterRequest) -> Result<Response> {
        if r.device_id != src.as_bytes() {
            return Err(malformed("deviceID does not match envelope SRC"));
        }
        check_ds_pub(&r.ds_pub)?;
        let nonce = parse_nonce(&r.nonce)?;

        let (se_priv, login_encrypts, login_signs) = self.issue_login_keys(&r.de_pub, &src)?;
        let se_pub = public_keys(&se_priv);

        let next = DeviceKeyState {
            encrypts: current.encrypts.clone(),
            signs: current.signs.clone(),
            registration: Some(Registration {
                nonce,
                w_token: r.w_token,
                ds_pub: r.ds_pub,
                de_pub: r.de_pub,
                se_priv,
                login_encrypts,
                login_signs,
            }),
        };
        self.commit(&src, current, next)?;
        Ok(Response::Register { se_pub })
    }

    fn login(&self, src: Src, current: &Arc<DeviceKeyState>, r: LoginRequest) -> Result<Response> {
        let registration = registered(current, &src)?;
        if r.ds_pub != registration.ds_pub {
            return Err(ShardRelayError::IntegrityFailure);
        }

        let (encrypts, signs) = self.unwrap_fans(&registration.nonce, &r.w_encrypts, &r.w_signs)?;
        let nonce = parse_nonce(&r.nonce)?;
        let (se_priv, login_encrypts, login_signs) = self.issue_login_keys(&registration.de_pub, &src)?;
        let se_pub = public_keys(&se_priv);
        let w_token = registration.w_token.clone();

        let next = DeviceKeyState {
            encrypts,
            signs,
            registration: Some(Registration {
                nonce,
                w_token: w_token.clone(),
                ds_pub: registration.ds_pub.clone(),
                de_pub: registration.de_pub.clone(),
                se_priv,
                login_encrypts,
                login_signs,
            }),
        };
        self.commit(&src, current, next)?;
        Ok(Response::Login { w_token, se_pub })
    }

    fn rekey(&self, src: Src, current: &Arc<DeviceKeyState>, r: RekeyRequest) -> Result<Response> {
        let registration = registered(current, &src)?;
        check_ds_pub(&r.ds_pub)?;

        let (encrypts, signs) = self.unwrap_fans(&registration.nonce, &r.w_encrypts, &r.w_signs)?;
        let nonce = parse_nonce(&r.nonce)?;
        let (se_priv, login_encrypts, login_signs) = self.issue_login_keys(&r.de_pub, &src)?;
        let se_pub = public_keys(&se_priv);
        let w_token = registration.w_token.clone();

        let next = DeviceKeyState {
            encrypts,
            signs,
            registration: Some(Registration {
                nonce,
                w_token: w_token.clone(),
                ds_pub: r.ds_pub,
                de_pub: r.de_pub,
                se_priv,
                login_encrypts,
                login_signs,
            }),
        };
        self.commit(&src, current, next)?;
        Ok(Response::Rekey { w_token, se_pub })
    }

    fn invite(&self, inviter: Src, r: InviteRequest) -> Result<Response> {
        let invitee = Src::from_slice(&r.invite_id).map_err(|_| malformed("bad inviteID length"))?;
        let encrypts = self.fan_from_raw(&r.encrypts)?;
        let signs = self.fan_from_raw(&r.signs)?;

        if !self.store.insert_new(invitee, DeviceKeyState::provisioned(encrypts, signs)) {
            return Err(malformed("inviteID is already provisioned"));
        }
        info!(inviter = %inviter, invitee = %invitee, "identity invited");
        Ok(Response::Invite)
    }

    /// Fresh SE keypairs for every fan slot plus the login fans they imply
    fn issue_login_keys(&self, de_pub: &[u8], device_id: &Src) -> Result<(Vec<ExchangeKeyPair>, KeyFan, KeyFan)> {
        let se_priv: Vec<ExchangeKeyPair> = (0..=self.node_count).map(|_| ExchangeKeyPair::generate()).collect();
        let shared = se_priv
            .iter()
            .map(|se| se.agree(de_pub))
            .collect::<Result<Vec<_>>>()
            .map_err(|_| malformed("bad DE_PUB"))?;
        let login_encrypts = KeyFan::from_agreements(&shared, device_id, LOGIN_ENCRYPTS_LABEL)?;
        let login_signs = KeyFan::from_agreements(&shared, device_id, LOGIN_SIGNS_LABEL)?;
        Ok((se_priv, login_encrypts, login_signs))
    }

    fn unwrap_fans(&self, nonce: &SymmetricKey, w_encrypts: &[Vec<u8>], w_signs: &[Vec<u8>]) -> Result<(KeyFan, KeyFan)> {
        self.check_fan_len(w_encrypts.len())?;
        self.check_fan_len(w_signs.len())?;
        Ok((unwrap_fan(nonce, w_encrypts)?, unwrap_fan(nonce, w_signs)?))
    }

    fn fan_from_raw(&self, raw: &[Vec<u8>]) -> Result<KeyFan> {
        self.check_fan_len(raw.len())?;
        let keys = raw
            .iter()
            .map(|k| SymmetricKey::from_slice(k).map_err(|_| malformed("bad fan key length")))
            .collect::<Result<Vec<_>>>()?;
        KeyFan::from_keys(keys)
    }

    fn check_fan_len(&self, len: usize) -> Result<()> {
        if len != self.node_count + 1 {
            return Err(ShardRelayError::MalformedEnvelope(format!(
                "expected {} fan entries, got {}",
                self.node_count + 1,
                len
            )));
        }
        Ok(())
    }

    fn commit(&self, src: &Src, current: &Arc<DeviceKeyState>, next: DeviceKeyState) -> Result<()> {
        if self.store.replace(src, current, next) {
            Ok(())
        } else {
            Err(ShardRelayError::Internal(format!(
                "concurrent update of {}",
                src
            )))
        }
    }
}

fn registered<'a>(state: &'a DeviceKeyState, src: &Src) -> Result<&'a Registration> {
    state
        .registration
        .as_ref()
        .ok_or_else(|| ShardRelayError::UnknownIdentity(format!("{} is not registered", src)))
}

fn parse_nonce(bytes: &[u8]) -> Result<SymmetricKey> {
    SymmetricKey::from_slice(bytes).map_err(|_| malformed("NONCE must be 32 bytes"))
}

fn check_ds_pub(bytes: &[u8]) -> Result<()> {
    let array: [u8; 32] = bytes.try_into().map_err(|_| malformed("DS_PUB must be 32 bytes"))?;
    VerifyingKey::from_bytes(&array).map_err(|_| malformed("DS_PUB is not a valid Ed25519 key"))?;
    Ok(())
}

fn public_keys(pairs: &[ExchangeKeyPair]) -> Vec<Vec<u8>> {
    pairs.iter().map(|p| p.public_bytes().to_vec()).collect()
}

fn malformed(reason: &str) -> ShardRelayError {
    ShardRelayError::MalformedEnvelope(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardrelay_protocol::device::DeviceSession;

    const OWNER: &[u8] = b"owner code 0000";

    fn setup(nodes: usize) -> (SessionProtocol, DeviceSession) {
        let protocol = SessionProtocol::new(Arc::new(DeviceKeyStore::new()), nodes).unwrap();
        protocol.bootstrap_owner(OWNER).unwrap();
        let owner = DeviceSession::new(OWNER, nodes).unwrap();
        (protocol, owner)
    }

    #[test]
    fn test_rejects_bad_node_count() {
        assert!(SessionProtocol::new(Arc::new(DeviceKeyStore::new()), 0).is_err());
        assert!(SessionProtocol::new(Arc::new(DeviceKeyStore::new()), 256).is_err());
    }

    #[test]
    fn test_bootstrap_is_idempotent() {
        let (protocol, owner) = setup(3);
        assert_eq!(protocol.bootstrap_owner(OWNER).unwrap(), owner.src());
        assert_eq!(protocol.store().len(), 1);
    }

    #[test]
    fn test_invite_provisions_fans() {
        let (protocol, owner) = setup(3);
        let device = DeviceSession::new(b"device code", 3).unwrap();

        let response = protocol.handle_invite(&owner.invite_request(b"device code").unwrap()).unwrap();
        assert_eq!(Response::decode(TransactionKind::Invite, &response).unwrap(), Response::Invite);

        let stored = protocol.store().get(&device.src()).unwrap();
        assert_eq!(&stored.encrypts, device.encrypts());
        assert_eq!(&stored.signs, device.signs());
        assert!(!stored.is_registered());
    }

    #[test]
    fn test_second_invite_for_same_identity_rejected() {
        let (protocol, owner) = setup(2);
        let invite = owner.invite_request(b"device code").unwrap();
        protocol.handle_invite(&invite).unwrap();
        assert!(matches!(
            protocol.handle_invite(&owner.invite_request(b"device code").unwrap()),
            Err(ShardRelayError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_register_unknown_identity() {
        let (protocol, _) = setup(3);
        let mut stranger = DeviceSession::new(b"never invited", 3).unwrap();
        assert!(matches!(
            protocol.handle_register(&stranger.register_request().unwrap()),
            Err(ShardRelayError::UnknownIdentity(_))
        ));
    }

    #[test]
    fn test_register_sent_to_login_endpoint() {
        let (protocol, owner) = setup(3);
        protocol.handle_invite(&owner.invite_request(b"device code").unwrap()).unwrap();
        let mut device = DeviceSession::new(b"device code", 3).unwrap();
        let envelope = device.register_request().unwrap();

        // not registered, so no login fans to check against
        assert!(matches!(
            protocol.handle_login(&envelope),
            Err(ShardRelayError::UnknownIdentity(_))
        ));
        // device fans authenticate, but the request kind is wrong
        assert!(matches!(
            protocol.handle_rekey(&envelope),
            Err(ShardRelayError::MalformedEnvelope(_))
        ));
        assert!(!protocol.store().get(&device.src()).unwrap().is_registered());
    }

    #[test]
    fn test_login_before_register_is_unknown() {
        let (protocol, owner) = setup(3);
        // the owner has fans but no registration
        let mut owner = owner;
        assert!(owner.login_request().is_err());
        assert!(matches!(
            protocol.handle_rekey(&owner.rekey_request().unwrap()),
            Err(ShardRelayError::UnknownIdentity(_))
        ));
    }

    #[test]
    fn test_garbage_envelope_is_malformed() {
        let (protocol, _) = setup(3);
        assert!(matches!(
            protocol.handle_register(&[0x82, 0x41]),
            Err(ShardRelayError::MalformedEnvelope(_))
        ));
    }
}
