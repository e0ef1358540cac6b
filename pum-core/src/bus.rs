//! Half-duplex bus transport: wraps the raw framed codec (`frame.rs`) with
//! DE-line gating and busy-tracking, behind one trait so a node can be
//! driven over a real UART or an in-memory channel pair in tests.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::Duration;

use crate::error::BusError;
use crate::frame::{encode_frame, read_frame, Frame};

/// Drives the transceiver's direction-enable GPIO. A real node toggles a
/// physical pin; `NullDirectionControl` is a no-op for transports (like an
/// in-memory channel) that have no direction to switch.
pub trait DirectionControl: Send {
    fn enable_transmit(&mut self);
    fn enable_receive(&mut self);
}

pub struct NullDirectionControl;

impl DirectionControl for NullDirectionControl {
    fn enable_transmit(&mut self) {}
    fn enable_receive(&mut self) {}
}

/// Minimum settle time the transceiver needs after toggling DE.
pub const DE_SETTLE: Duration = Duration::from_micros(10);

/// The bus-level operations the Server/Client pipelines need. Implemented
/// once over a real UART+DE pin, and once over an in-memory channel pair
/// for tests.
#[async_trait]
pub trait BusTransport: Send {
    /// Fails with `Busy` if a send is already in progress.
    async fn send_raw(&self, payload: &[u8]) -> Result<(), BusError>;
    /// Scans for and decodes the next frame, honoring `deadline`.
    async fn read_frame(&self, deadline: Duration) -> Result<Frame, BusError>;
}

/// A `BusTransport` over any `AsyncRead + AsyncWrite` half-duplex link
/// (a real RS-485 UART in production), gating transmission through a
/// `DirectionControl` and an internal busy flag so concurrent sends fail
/// fast rather than interleaving on the wire.
pub struct SerialBus<IO, D> {
    io: Mutex<IO>,
    direction: Mutex<D>,
    sending: std::sync::atomic::AtomicBool,
}

impl<IO, D> SerialBus<IO, D>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    D: DirectionControl,
{
    pub fn new(io: IO, direction: D) -> Self {
        Self {
            io: Mutex::new(io),
            direction: Mutex::new(direction),
            sending: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<IO, D> BusTransport for SerialBus<IO, D>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
    D: DirectionControl + Send,
{
    async fn send_raw(&self, payload: &[u8]) -> Result<(), BusError> {
        if self
            .sending
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::AcqRel,
                std::sync::atomic::Ordering::Acquire,
            )
            .is_err()
        {
            return Err(BusError::Busy);
        }

        let framed = encode_frame(payload).ok_or(BusError::Truncated)?;
        let result = async {
            {
                let mut direction = self.direction.lock().await;
                direction.enable_transmit();
            }
            tokio::time::sleep(DE_SETTLE).await;

            let mut io = self.io.lock().await;
            io.write_all(&framed).await.map_err(|_| BusError::Truncated)?;
            io.flush().await.map_err(|_| BusError::Truncated)?;
            drop(io);

            tokio::time::sleep(DE_SETTLE).await;
            {
                let mut direction = self.direction.lock().await;
                direction.enable_receive();
            }
            Ok(())
        }
        .await;

        self.sending.store(false, std::sync::atomic::Ordering::Release);
        result
    }

    async fn read_frame(&self, deadline: Duration) -> Result<Frame, BusError> {
        let mut io = self.io.lock().await;
        read_frame(&mut *io, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn send_then_read_round_trips_over_a_duplex_pair() {
        let (a, b) = duplex(256);
        let sender = SerialBus::new(a, NullDirectionControl);
        let receiver = SerialBus::new(b, NullDirectionControl);

        sender.send_raw(&[1, 2, 3]).await.unwrap();
        let frame = receiver.read_frame(Duration::from_millis(200)).await.unwrap();
        assert_eq!(frame.payload, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn concurrent_send_reports_busy() {
        let (a, _b) = duplex(4); // tiny buffer keeps the first send in flight
        let sender = std::sync::Arc::new(SerialBus::new(a, NullDirectionControl));

        let s1 = sender.clone();
        let _first = tokio::spawn(async move { s1.send_raw(&[0u8; 64]).await });

        tokio::time::sleep(Duration::from_millis(1)).await;
        let second = sender.send_raw(&[9]).await;
        assert_eq!(second, Err(BusError::Busy));
    }
}
