use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;
use tracing::{error, trace};

use crate::config::NoiseConfig;

/// Sends one datagram through the noisy channel.
///
/// The channel may drop the datagram, flip one of its bits, or hold it back
/// for a bounded random delay before delivery. Loss and corruption are
/// silent; the layers above must recover on their own.
pub async fn send_over_noisy_channel(
    socket: &Arc<UdpSocket>,
    mut bytes: Vec<u8>,
    dst: SocketAddr,
    noise: &NoiseConfig,
) -> anyhow::Result<()> {
    // draw all randomness up front; the rng must not live across an await
    let (dropped, delay) = {
        let mut rng = rand::rng();

        let dropped = noise.loss_probability > 0.0 && rng.random_bool(noise.loss_probability);

        if !dropped
            && !bytes.is_empty()
            && noise.corruption_probability > 0.0
            && rng.random_bool(noise.corruption_probability)
        {
            let index = rng.random_range(0..bytes.len());
            bytes[index] ^= 1 << rng.random_range(0..8u32);
            trace!("noisy channel corrupted byte {} of datagram to {}", index, dst);
        }

        let delay = if noise.max_delay.is_zero() {
            Duration::ZERO
        } else {
            noise.max_delay.mul_f64(rng.random::<f64>())
        };

        (dropped, delay)
    };

    if dropped {
        trace!("noisy channel dropped datagram to {}", dst);
        return Ok(());
    }

    if delay.is_zero() {
        socket.send_to(&bytes, dst).await?;
    } else {
        let socket = socket.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = socket.send_to(&bytes, dst).await {
                error!("delayed send to {} failed: {}", dst, e);
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use tokio::time::timeout;

    use super::*;

    async fn socket_pair() -> (Arc<UdpSocket>, UdpSocket) {
        let sender = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (sender, receiver)
    }

    #[tokio::test]
    async fn test_clean_channel_delivers() {
        let (sender, receiver) = socket_pair().await;

        send_over_noisy_channel(
            &sender,
            b"ping".to_vec(),
            receiver.local_addr().unwrap(),
            &NoiseConfig::off(),
        )
        .await
        .unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = timeout(Duration::from_secs(1), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test]
    async fn test_total_loss_delivers_nothing() {
        let (sender, receiver) = socket_pair().await;
        let noise = NoiseConfig {
            loss_probability: 1.0,
            ..NoiseConfig::off()
        };

        for _ in 0..16 {
            send_over_noisy_channel(
                &sender,
                b"ping".to_vec(),
                receiver.local_addr().unwrap(),
                &noise,
            )
            .await
            .unwrap();
        }

        let mut buf = [0u8; 16];
        let received = timeout(Duration::from_millis(200), receiver.recv_from(&mut buf)).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn test_delayed_datagram_still_arrives() {
        let (sender, receiver) = socket_pair().await;
        let noise = NoiseConfig {
            max_delay: Duration::from_millis(50),
            ..NoiseConfig::off()
        };

        send_over_noisy_channel(
            &sender,
            b"late".to_vec(),
            receiver.local_addr().unwrap(),
            &noise,
        )
        .await
        .unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = timeout(Duration::from_secs(1), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"late");
    }
}
