//! Length-prefixed frames and the AEAD-encrypted channel.
//!
//! Each wire frame is a 4-byte little-endian length followed by the frame
//! body (an authenticated ciphertext once the handshake completes). The two
//! directions of a connection hold distinct keys, so both counters start at
//! zero with no possibility of nonce collision; within a direction the
//! counter is strictly monotonic and the receiver only ever accepts the
//! next expected counter, which rejects replays and reordering outright.

use basalt_crypto::{aead_open, aead_seal, counter_nonce, AEAD_TAG_LEN};
use basalt_types::NetworkError;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Cap on a single frame (ciphertext included).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
/// How long a frame read may stall before the connection is dropped.
pub const FRAME_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Writes one plaintext frame (handshake only).
pub async fn write_plain_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &[u8],
) -> Result<(), NetworkError> {
    if body.len() > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one plaintext frame (handshake only), bounded in size and time.
pub async fn read_plain_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, NetworkError> {
    let body = timeout(FRAME_READ_TIMEOUT, async {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes).await?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(NetworkError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        Ok(body)
    })
    .await
    .map_err(|_| NetworkError::FrameTimeout)??;
    Ok(body)
}

/// The sending half of an encrypted channel. Sends are serialized by the
/// exclusive borrow; the counter can never skip or repeat.
pub struct SecureSender<W> {
    writer: W,
    key: [u8; 32],
    counter: u64,
}

impl<W: AsyncWrite + Unpin> SecureSender<W> {
    pub fn new(writer: W, key: [u8; 32]) -> Self {
        Self {
            writer,
            key,
            counter: 0,
        }
    }

    pub async fn send(&mut self, plaintext: &[u8]) -> Result<(), NetworkError> {
        if plaintext.len() + AEAD_TAG_LEN > MAX_FRAME_LEN {
            return Err(NetworkError::FrameTooLarge {
                len: plaintext.len(),
                max: MAX_FRAME_LEN - AEAD_TAG_LEN,
            });
        }
        // A connection that exhausts its counter space must re-key; close
        // it instead of ever reusing a nonce.
        let counter = self.counter;
        if counter == u64::MAX {
            return Err(NetworkError::NonceReplay);
        }
        self.counter += 1;

        let nonce = counter_nonce(counter);
        let ciphertext = aead_seal(&self.key, &nonce, &[], plaintext)
            .map_err(|_| NetworkError::AeadFailure)?;
        write_plain_frame(&mut self.writer, &ciphertext).await
    }
}

/// The receiving half of an encrypted channel.
pub struct SecureReceiver<R> {
    reader: R,
    key: [u8; 32],
    counter: u64,
}

impl<R: AsyncRead + Unpin> SecureReceiver<R> {
    pub fn new(reader: R, key: [u8; 32]) -> Self {
        Self {
            reader,
            key,
            counter: 0,
        }
    }

    pub async fn recv(&mut self) -> Result<Vec<u8>, NetworkError> {
        let ciphertext = read_plain_frame(&mut self.reader).await?;
        // Only the exact next counter can decrypt: a replayed or reordered
        // frame fails authentication.
        let nonce = counter_nonce(self.counter);
        let plaintext =
            aead_open(&self.key, &nonce, &[], &ciphertext).map_err(|_| NetworkError::NonceReplay)?;
        self.counter += 1;
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_crypto::{derive_directional_keys, ephemeral_keypair};
    use basalt_types::Ed25519PublicKey;

    fn channel_pair() -> ([u8; 32], [u8; 32]) {
        let (a_secret, a_public) = ephemeral_keypair();
        let (b_secret, b_public) = ephemeral_keypair();
        let shared_a = a_secret.diffie_hellman(&b_public);
        let shared_b = b_secret.diffie_hellman(&a_public);
        let id_a = Ed25519PublicKey([1; 32]);
        let id_b = Ed25519PublicKey([2; 32]);
        let keys_a = derive_directional_keys(&shared_a, &id_a, &id_b, true).unwrap();
        let keys_b = derive_directional_keys(&shared_b, &id_b, &id_a, false).unwrap();
        (*keys_a.send, *keys_b.recv)
    }

    #[tokio::test]
    async fn frames_roundtrip_over_a_duplex() {
        let (send_key, recv_key) = channel_pair();
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (_client_read, client_write) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);

        let mut sender = SecureSender::new(client_write, send_key);
        let mut receiver = SecureReceiver::new(server_read, recv_key);

        for i in 0u8..5 {
            sender.send(&[i; 100]).await.unwrap();
        }
        for i in 0u8..5 {
            assert_eq!(receiver.recv().await.unwrap(), vec![i; 100]);
        }
    }

    #[tokio::test]
    async fn replayed_frame_is_rejected() {
        let (send_key, recv_key) = channel_pair();
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (_client_read, mut client_write) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);
        let mut receiver = SecureReceiver::new(server_read, recv_key);

        // Frame sealed under counter 0 decrypts once.
        let frame = aead_seal(&send_key, &counter_nonce(0), &[], b"frame zero").unwrap();
        write_plain_frame(&mut client_write, &frame).await.unwrap();
        assert_eq!(receiver.recv().await.unwrap(), b"frame zero");

        // The identical ciphertext replayed after the receiver moved on
        // must not authenticate.
        write_plain_frame(&mut client_write, &frame).await.unwrap();
        assert!(matches!(
            receiver.recv().await,
            Err(NetworkError::NonceReplay)
        ));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_allocation() {
        let (client, server) = tokio::io::duplex(1024);
        let (_r, mut client_write) = tokio::io::split(client);
        let (mut server_read, _w) = tokio::io::split(server);

        // A length prefix far over the cap, with no body behind it.
        let huge = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        client_write.write_all(&huge).await.unwrap();
        client_write.flush().await.unwrap();

        assert!(matches!(
            read_plain_frame(&mut server_read).await,
            Err(NetworkError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn nonces_never_repeat_within_a_direction() {
        // Structural check: distinct counters map to distinct nonces.
        let mut seen = std::collections::HashSet::new();
        for counter in 0u64..1_000 {
            assert!(seen.insert(counter_nonce(counter)));
        }
    }
}
