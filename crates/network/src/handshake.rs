//! The mutual authenticated handshake.
//!
//! Both endpoints exchange identity keys and nonces, then Ed25519-signed
//! X25519 ephemerals bound to those nonces and the protocol tag, derive
//! direction-asymmetric AEAD keys, and verify they are on the same chain
//! and genesis. Any mismatch closes the connection before a single
//! encrypted frame is exchanged; secrets and intermediates are zeroed as
//! soon as the keys are derived.

use crate::framing::{read_plain_frame, write_plain_frame, SecureReceiver, SecureSender};
use basalt_crypto::{
    derive_directional_keys, eddsa, ephemeral_binding, ephemeral_keypair, random_nonce,
    ValidatorKeys, X25519PublicKey,
};
use basalt_types::{
    from_bytes_canonical, to_bytes_canonical, CodecError, Decode, Ed25519PublicKey,
    Ed25519Signature, Encode, Hash256, NetworkError, PeerId, Reader, Writer,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// First handshake message: who we are and which chain we serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub chain_id: u32,
    pub genesis_hash: Hash256,
    pub identity: Ed25519PublicKey,
    pub nonce: [u8; 32],
}

impl Encode for Hello {
    fn encode(&self, w: &mut Writer) {
        w.put_u32(self.chain_id);
        self.genesis_hash.encode(w);
        self.identity.encode(w);
        w.put_raw(&self.nonce);
    }
}

impl Decode for Hello {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            chain_id: r.read_u32()?,
            genesis_hash: Hash256::decode(r)?,
            identity: Ed25519PublicKey::decode(r)?,
            nonce: r.read_array::<32>()?,
        })
    }
}

/// Second handshake message: a signed ephemeral key. The signature covers
/// the protocol tag, the ephemeral key and both nonces, so it can neither
/// be replayed across connections nor transplanted between protocols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEphemeral {
    pub ephemeral: [u8; 32],
    pub signature: Ed25519Signature,
}

impl Encode for SignedEphemeral {
    fn encode(&self, w: &mut Writer) {
        w.put_raw(&self.ephemeral);
        self.signature.encode(w);
    }
}

impl Decode for SignedEphemeral {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            ephemeral: r.read_array::<32>()?,
            signature: Ed25519Signature::decode(r)?,
        })
    }
}

/// What the transport needs to run a handshake.
#[derive(Clone)]
pub struct HandshakeConfig {
    pub chain_id: u32,
    pub genesis_hash: Hash256,
    pub keys: Arc<ValidatorKeys>,
}

/// The authenticated result.
pub struct Established<R, W> {
    pub peer_id: PeerId,
    pub peer_identity: Ed25519PublicKey,
    pub sender: SecureSender<W>,
    pub receiver: SecureReceiver<R>,
}

/// Runs the mutual handshake over a split stream.
///
/// Both sides run the same exchange; `initiator` only selects which derived
/// key becomes the send key.
pub async fn perform_handshake<R, W>(
    mut reader: R,
    mut writer: W,
    config: &HandshakeConfig,
    initiator: bool,
) -> Result<Established<R, W>, NetworkError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // 1. Identity, chain binding and nonce exchange.
    let local_nonce = random_nonce();
    let hello = Hello {
        chain_id: config.chain_id,
        genesis_hash: config.genesis_hash,
        identity: config.keys.ed25519_public(),
        nonce: local_nonce,
    };
    write_plain_frame(&mut writer, &to_bytes_canonical(&hello)).await?;
    let remote_hello: Hello = from_bytes_canonical(&read_plain_frame(&mut reader).await?)?;

    if remote_hello.chain_id != config.chain_id {
        return Err(NetworkError::ChainMismatch {
            expected: config.chain_id,
            got: remote_hello.chain_id,
        });
    }
    if remote_hello.genesis_hash != config.genesis_hash {
        return Err(NetworkError::GenesisMismatch);
    }

    // 2. Signed ephemerals, bound to both nonces.
    let (ephemeral_secret, ephemeral_public) = ephemeral_keypair();
    let binding = ephemeral_binding(&ephemeral_public, &local_nonce, &remote_hello.nonce);
    let signed = SignedEphemeral {
        ephemeral: *ephemeral_public.as_bytes(),
        signature: config.keys.sign_identity(&binding),
    };
    write_plain_frame(&mut writer, &to_bytes_canonical(&signed)).await?;
    let remote_signed: SignedEphemeral =
        from_bytes_canonical(&read_plain_frame(&mut reader).await?)?;

    let remote_ephemeral = X25519PublicKey::from(remote_signed.ephemeral);
    let remote_binding = ephemeral_binding(&remote_ephemeral, &remote_hello.nonce, &local_nonce);
    if !eddsa::verify(
        &remote_hello.identity,
        &remote_binding,
        &remote_signed.signature,
    ) {
        return Err(NetworkError::HandshakeFailed(
            "ephemeral binding signature invalid".into(),
        ));
    }

    // 3. Shared secret and directional keys. The shared secret and the
    // ephemeral secret zeroize on drop inside this scope; only the two
    // framing keys survive.
    let (send_key, recv_key) = {
        let shared = ephemeral_secret.diffie_hellman(&remote_ephemeral);
        let keys = derive_directional_keys(
            &shared,
            &config.keys.ed25519_public(),
            &remote_hello.identity,
            initiator,
        )
        .map_err(|e| NetworkError::HandshakeFailed(e.to_string()))?;
        (*keys.send, *keys.recv)
    };

    let peer_id = basalt_crypto::derive_peer_id(&remote_hello.identity);
    debug!(target: "net", %peer_id, initiator, "handshake established");
    Ok(Established {
        peer_id,
        peer_identity: remote_hello.identity,
        sender: SecureSender::new(writer, send_key),
        receiver: SecureReceiver::new(reader, recv_key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chain_id: u32, genesis: u8, seed: u8) -> HandshakeConfig {
        HandshakeConfig {
            chain_id,
            genesis_hash: Hash256([genesis; 32]),
            keys: Arc::new(ValidatorKeys::from_seeds(&[seed; 32], &[seed + 50; 32]).unwrap()),
        }
    }

    type DuplexEstablished = Established<
        tokio::io::ReadHalf<tokio::io::DuplexStream>,
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
    >;

    async fn run_pair(
        a: HandshakeConfig,
        b: HandshakeConfig,
    ) -> (
        Result<DuplexEstablished, NetworkError>,
        Result<DuplexEstablished, NetworkError>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        tokio::join!(
            perform_handshake(client_read, client_write, &a, true),
            perform_handshake(server_read, server_write, &b, false),
        )
    }

    #[tokio::test]
    async fn handshake_establishes_working_channels() {
        let a = config(100, 7, 1);
        let b = config(100, 7, 2);
        let (res_a, res_b) = run_pair(a.clone(), b.clone()).await;
        let mut est_a = res_a.unwrap();
        let mut est_b = res_b.unwrap();

        // Authenticated identities line up.
        assert_eq!(est_a.peer_identity, b.keys.ed25519_public());
        assert_eq!(est_b.peer_identity, a.keys.ed25519_public());
        assert_eq!(est_a.peer_id, basalt_crypto::derive_peer_id(&b.keys.ed25519_public()));

        // Frames flow in both directions over disjoint keys.
        est_a.sender.send(b"from a").await.unwrap();
        assert_eq!(est_b.receiver.recv().await.unwrap(), b"from a");
        est_b.sender.send(b"from b").await.unwrap();
        assert_eq!(est_a.receiver.recv().await.unwrap(), b"from b");
    }

    #[tokio::test]
    async fn chain_mismatch_hard_closes() {
        let (res_a, res_b) = run_pair(config(100, 7, 1), config(101, 7, 2)).await;
        assert!(matches!(res_a, Err(NetworkError::ChainMismatch { .. })));
        assert!(matches!(res_b, Err(NetworkError::ChainMismatch { .. })));
    }

    #[tokio::test]
    async fn genesis_mismatch_hard_closes() {
        let (res_a, res_b) = run_pair(config(100, 7, 1), config(100, 8, 2)).await;
        assert!(matches!(res_a, Err(NetworkError::GenesisMismatch)));
        assert!(matches!(res_b, Err(NetworkError::GenesisMismatch)));
    }
}
