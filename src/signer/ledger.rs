//! Ledger device over an APDU transport
//!
//! Speaks the Solana app's APDU set. The transport is a TCP stream using the
//! device-emulator framing (also served by USB/HID bridges):
//! request `[len u32 BE][apdu]`, response `[len u32 BE][data][sw u16 BE]`
//! where `len` counts the data bytes only.

use async_trait::async_trait;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::errors::{DeviceError, SignerError};
use super::hardware::{DerivationPath, HardwareWallet};

const CLA: u8 = 0xE0;
const INS_GET_PUBKEY: u8 = 0x05;
const INS_SIGN_MESSAGE: u8 = 0x06;
const P1_NON_CONFIRM: u8 = 0x00;
const P1_CONFIRM: u8 = 0x01;
const P2_EXTEND: u8 = 0x01;
const P2_MORE: u8 = 0x02;
const MAX_PAYLOAD: usize = 255;

const SW_OK: u16 = 0x9000;
const SW_USER_REFUSED: u16 = 0x6985;

/// Largest response body accepted from the transport
const MAX_RESPONSE_LEN: usize = 1024;

/// One APDU exchange
#[async_trait]
pub trait ApduTransport: Send + Sync {
    /// Returns response data and status word
    async fn exchange(&self, apdu: &[u8]) -> Result<(Vec<u8>, u16), SignerError>;

    async fn close(&self) -> Result<(), SignerError>;
}

/// Length-prefixed APDU frames over TCP
pub struct TcpApduTransport {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpApduTransport {
    pub async fn connect(addr: &str) -> Result<Self, SignerError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| SignerError::disconnected(format!("{addr}: {e}")))?;
        info!(addr, "Connected to hardware signer transport");
        Ok(Self {
            addr: addr.to_string(),
            stream: Mutex::new(Some(stream)),
        })
    }
}

#[async_trait]
impl ApduTransport for TcpApduTransport {
    async fn exchange(&self, apdu: &[u8]) -> Result<(Vec<u8>, u16), SignerError> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| SignerError::disconnected(format!("{} closed", self.addr)))?;
        let io = |e: std::io::Error| SignerError::disconnected(format!("{}: {e}", self.addr));

        let mut frame = Vec::with_capacity(4 + apdu.len());
        frame.extend_from_slice(&(apdu.len() as u32).to_be_bytes());
        frame.extend_from_slice(apdu);
        stream.write_all(&frame).await.map_err(io)?;

        let len = stream.read_u32().await.map_err(io)? as usize;
        if len > MAX_RESPONSE_LEN {
            return Err(SignerError::protocol(format!("response length {len} too large")));
        }
        let mut data = vec![0u8; len];
        stream.read_exact(&mut data).await.map_err(io)?;
        let sw = stream.read_u16().await.map_err(io)?;
        Ok((data, sw))
    }

    async fn close(&self) -> Result<(), SignerError> {
        if let Some(mut stream) = self.stream.lock().await.take() {
            // Peer may already be gone
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}

/// Ledger running the Solana app
pub struct LedgerDevice<T: ApduTransport = TcpApduTransport> {
    transport: T,
}

impl LedgerDevice<TcpApduTransport> {
    pub async fn connect(addr: &str) -> Result<Self, SignerError> {
        Ok(Self::new(TcpApduTransport::connect(addr).await?))
    }
}

impl<T: ApduTransport> LedgerDevice<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn send(&self, ins: u8, p1: u8, p2: u8, data: &[u8]) -> Result<Vec<u8>, SignerError> {
        if data.len() > MAX_PAYLOAD {
            return Err(SignerError::protocol("APDU payload too large"));
        }
        let mut apdu = Vec::with_capacity(5 + data.len());
        apdu.extend_from_slice(&[CLA, ins, p1, p2, data.len() as u8]);
        apdu.extend_from_slice(data);

        let (response, sw) = self.transport.exchange(&apdu).await?;
        match sw {
            SW_OK => Ok(response),
            SW_USER_REFUSED => Err(DeviceError::UserCancelled.into()),
            other => Err(SignerError::protocol(format!("device status 0x{other:04x}"))),
        }
    }
}

/// Split a payload into device-sized chunks with their P2 flags
fn chunk_payload(payload: &[u8]) -> Vec<(u8, &[u8])> {
    let chunks: Vec<&[u8]> = payload.chunks(MAX_PAYLOAD).collect();
    let last = chunks.len().saturating_sub(1);
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut p2 = 0;
            if i > 0 {
                p2 |= P2_EXTEND;
            }
            if i < last {
                p2 |= P2_MORE;
            }
            (p2, chunk)
        })
        .collect()
}

#[async_trait]
impl<T: ApduTransport> HardwareWallet for LedgerDevice<T> {
    async fn get_address(&self, path: &DerivationPath) -> Result<Pubkey, SignerError> {
        let response = self
            .send(INS_GET_PUBKEY, P1_NON_CONFIRM, 0, &path.to_bytes())
            .await?;
        let bytes: [u8; 32] = response
            .get(..32)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| SignerError::protocol("short public key response"))?;
        Ok(Pubkey::new_from_array(bytes))
    }

    async fn sign_message(
        &self,
        path: &DerivationPath,
        message: &[u8],
    ) -> Result<Signature, SignerError> {
        // One signer, then the path, then the message
        let mut payload = vec![1u8];
        payload.extend_from_slice(&path.to_bytes());
        payload.extend_from_slice(message);

        let chunks = chunk_payload(&payload);
        debug!(chunks = chunks.len(), path = %path, "Requesting device signature");

        let mut response = Vec::new();
        for (p2, chunk) in chunks {
            response = self.send(INS_SIGN_MESSAGE, P1_CONFIRM, p2, chunk).await?;
        }

        let bytes: [u8; 64] = response
            .get(..64)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| SignerError::protocol("short signature response"))?;
        Ok(Signature::from(bytes))
    }

    async fn disconnect(&self) -> Result<(), SignerError> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::{Keypair, Signer};
    use std::sync::Mutex as StdMutex;

    /// Plays the device side of the Solana app
    struct EmulatedApp {
        keypair: Keypair,
        refuse: bool,
        seen: StdMutex<Vec<Vec<u8>>>,
        pending: StdMutex<Vec<u8>>,
    }

    impl EmulatedApp {
        fn new(refuse: bool) -> Self {
            Self {
                keypair: Keypair::new(),
                refuse,
                seen: StdMutex::new(Vec::new()),
                pending: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ApduTransport for EmulatedApp {
        async fn exchange(&self, apdu: &[u8]) -> Result<(Vec<u8>, u16), SignerError> {
            self.seen.lock().unwrap().push(apdu.to_vec());
            let (ins, p2, data) = (apdu[1], apdu[3], &apdu[5..]);
            assert_eq!(apdu[4] as usize, data.len());

            match ins {
                INS_GET_PUBKEY => Ok((self.keypair.pubkey().to_bytes().to_vec(), SW_OK)),
                INS_SIGN_MESSAGE => {
                    let mut pending = self.pending.lock().unwrap();
                    pending.extend_from_slice(data);
                    if p2 & P2_MORE != 0 {
                        return Ok((Vec::new(), SW_OK));
                    }
                    if self.refuse {
                        return Ok((Vec::new(), SW_USER_REFUSED));
                    }
                    // [signers][path len][path...][message]
                    let path_len = pending[1] as usize;
                    let message = pending[2 + path_len * 4..].to_vec();
                    pending.clear();
                    let sig = self.keypair.sign_message(&message);
                    Ok((sig.as_ref().to_vec(), SW_OK))
                }
                _ => Ok((Vec::new(), 0x6d00)),
            }
        }

        async fn close(&self) -> Result<(), SignerError> {
            Ok(())
        }
    }

    #[test]
    fn test_chunk_flags() {
        let payload = vec![7u8; MAX_PAYLOAD * 2 + 10];
        let chunks = chunk_payload(&payload);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].0, P2_MORE);
        assert_eq!(chunks[1].0, P2_EXTEND | P2_MORE);
        assert_eq!(chunks[2].0, P2_EXTEND);
        assert_eq!(chunks[2].1.len(), 10);

        let single = chunk_payload(&[1, 2, 3]);
        assert_eq!(single, vec![(0u8, &[1u8, 2, 3][..])]);
    }

    #[tokio::test]
    async fn test_get_address_and_sign_long_message() {
        let device = LedgerDevice::new(EmulatedApp::new(false));
        let path = DerivationPath::default();

        let address = device.get_address(&path).await.unwrap();
        assert_eq!(address, device.transport.keypair.pubkey());

        let message = vec![3u8; 600];
        let signature = device.sign_message(&path, &message).await.unwrap();
        assert!(signature.verify(address.as_ref(), &message));
        // get_address + three sign chunks
        assert_eq!(device.transport.seen.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_user_refusal_maps_to_cancelled() {
        let device = LedgerDevice::new(EmulatedApp::new(true));
        let err = device
            .sign_message(&DerivationPath::default(), b"msg")
            .await
            .unwrap_err();
        assert_eq!(err, SignerError::Device(DeviceError::UserCancelled));
    }

    #[tokio::test]
    async fn test_tcp_framing() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let expected = Pubkey::new_unique();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let len = socket.read_u32().await.unwrap() as usize;
            let mut apdu = vec![0u8; len];
            socket.read_exact(&mut apdu).await.unwrap();
            assert_eq!(&apdu[..2], &[CLA, INS_GET_PUBKEY]);

            socket.write_u32(32).await.unwrap();
            socket.write_all(expected.as_ref()).await.unwrap();
            socket.write_u16(SW_OK).await.unwrap();
        });

        let device = LedgerDevice::connect(&addr).await.unwrap();
        let address = device.get_address(&DerivationPath::default()).await.unwrap();
        assert_eq!(address, expected);
        device.disconnect().await.unwrap();
        server.await.unwrap();

        let err = device.get_address(&DerivationPath::default()).await.unwrap_err();
        assert!(matches!(err, SignerError::Device(DeviceError::Disconnected(_))));
    }
}
