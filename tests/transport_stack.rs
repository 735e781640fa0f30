//! End-to-end transport tests over the real stack: two host transports
//! exchanging segments through the router on loopback.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;

use chatstack::addr::{VirtualAddress, Vip};
use chatstack::config::{NoiseConfig, StackConfig};
use chatstack::network::RouterNetwork;
use chatstack::topology::Topology;
use chatstack::transport::{host_transport, ReliableTransport};

async fn start_router(topology: &Arc<Topology>, noise: &NoiseConfig) -> JoinHandle<()> {
    let router = RouterNetwork::start_for(topology.clone(), noise.clone())
        .await
        .expect("router starts");
    tokio::spawn(async move {
        let _ = router.run().await;
    })
}

async fn start_host(
    topology: &Arc<Topology>,
    name: &str,
    config: &Arc<StackConfig>,
    noise: &NoiseConfig,
) -> Arc<ReliableTransport> {
    host_transport(name, topology.clone(), config.clone(), noise.clone())
        .await
        .expect("host stack starts")
}

#[tokio::test]
async fn test_arbitrary_binary_payload_survives_the_roundtrip() {
    let topology = common::four_node_topology(23000);
    let noise = NoiseConfig::off();
    let config = common::fast_config();

    let router = start_router(&topology, &noise).await;
    let alice = start_host(&topology, "Alice", &config, &noise).await;
    let bob = start_host(&topology, "Bob", &config, &noise).await;

    // several MSS worth of every possible byte value
    let payload: Vec<u8> = (0u8..=255).cycle().take(5000).collect();

    let outbound = alice.connect(VirtualAddress::new(Vip::new("HOST_B"), 7000));
    let sender = {
        let outbound = outbound.clone();
        let payload = payload.clone();
        tokio::spawn(async move { outbound.send(&payload).await })
    };

    let inbound = timeout(Duration::from_secs(10), bob.accept())
        .await
        .expect("accept in time")
        .expect("accept succeeds");
    let received = timeout(Duration::from_secs(10), inbound.receive())
        .await
        .expect("receive in time")
        .expect("receive succeeds")
        .expect("a whole message");
    assert_eq!(received, payload);
    sender.await.unwrap().unwrap();

    // the connection is bi-directional
    inbound.send(b"pong").await.unwrap();
    let reply = timeout(Duration::from_secs(10), outbound.receive())
        .await
        .expect("reply in time")
        .unwrap()
        .unwrap();
    assert_eq!(reply, b"pong");

    alice.shutdown().await;
    bob.shutdown().await;
    router.abort();
}

#[tokio::test]
async fn test_hundred_messages_arrive_in_order_under_heavy_loss() {
    let topology = common::four_node_topology(23010);
    let noise = NoiseConfig {
        loss_probability: 0.5,
        corruption_probability: 0.05,
        max_delay: Duration::from_millis(2),
    };
    let config = Arc::new(StackConfig {
        ack_timeout: Duration::from_millis(25),
        retry_ceiling: 80,
        ..common::fast_config().as_ref().clone()
    });

    let router = start_router(&topology, &noise).await;
    let alice = start_host(&topology, "Alice", &config, &noise).await;
    let bob = start_host(&topology, "Bob", &config, &noise).await;

    let outbound = alice.connect(VirtualAddress::new(Vip::new("HOST_B"), 7000));
    let sender = tokio::spawn(async move {
        for i in 0..100 {
            outbound.send(format!("message {:03}", i).as_bytes()).await?;
        }
        Ok::<(), anyhow::Error>(())
    });

    let inbound = timeout(Duration::from_secs(30), bob.accept())
        .await
        .expect("accept in time")
        .expect("accept succeeds");

    for i in 0..100 {
        let received = timeout(Duration::from_secs(60), inbound.receive())
            .await
            .expect("message in time")
            .expect("receive succeeds")
            .expect("a whole message");
        assert_eq!(
            String::from_utf8(received).unwrap(),
            format!("message {:03}", i)
        );
    }
    sender.await.unwrap().unwrap();

    alice.shutdown().await;
    bob.shutdown().await;
    router.abort();
}

#[tokio::test]
async fn test_fin_teardown_signals_end_of_stream_on_both_sides() {
    let topology = common::four_node_topology(23020);
    let noise = NoiseConfig::off();
    let config = common::fast_config();

    let router = start_router(&topology, &noise).await;
    let alice = start_host(&topology, "Alice", &config, &noise).await;
    let bob = start_host(&topology, "Bob", &config, &noise).await;

    let outbound = alice.connect(VirtualAddress::new(Vip::new("HOST_B"), 7000));
    let sender = {
        let outbound = outbound.clone();
        tokio::spawn(async move { outbound.send(b"bye").await })
    };

    let inbound = timeout(Duration::from_secs(10), bob.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inbound.receive().await.unwrap().unwrap(), b"bye");
    sender.await.unwrap().unwrap();

    outbound.close().await;
    assert!(outbound.is_closed());
    assert_eq!(alice.active_connections(), 0);

    // the peer's pending receive observes end-of-stream
    let eos = timeout(Duration::from_secs(10), inbound.receive())
        .await
        .expect("eos in time")
        .unwrap();
    assert_eq!(eos, None);
    assert!(inbound.fin_received());

    inbound.close().await;
    assert_eq!(bob.active_connections(), 0);

    alice.shutdown().await;
    bob.shutdown().await;
    router.abort();
}
