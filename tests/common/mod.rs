#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatstack::chat::message::ChatMessage;
use chatstack::chat::ui::{ChatUi, ConnectionStatus};
use chatstack::config::StackConfig;
use chatstack::topology::{NodeSpec, Topology};

/// The standard deployment, shifted onto a per-test port block so parallel
/// tests do not collide.
pub fn four_node_topology(base_port: u16) -> Arc<Topology> {
    Arc::new(
        Topology::new(
            vec![
                NodeSpec::new("Alice", "HOST_A", "AA:AA:AA:AA:AA:AA", ([127, 0, 0, 1], base_port).into()),
                NodeSpec::new("Bob", "HOST_B", "BB:BB:BB:BB:BB:BB", ([127, 0, 0, 1], base_port + 1).into()),
                NodeSpec::new("Server", "HOST_S", "CC:CC:CC:CC:CC:CC", ([127, 0, 0, 1], base_port + 2).into()),
                NodeSpec::new("Router", "HOST_R", "DD:DD:DD:DD:DD:DD", ([127, 0, 0, 1], base_port + 3).into()),
            ],
            "Router",
        )
        .expect("test topology is well-formed"),
    )
}

/// Stack tuning for tests: short ACK timeout, generous retry budget.
pub fn fast_config() -> Arc<StackConfig> {
    Arc::new(StackConfig {
        ack_timeout: Duration::from_millis(50),
        retry_ceiling: 40,
        fin_retry_ceiling: 3,
        ..StackConfig::default()
    })
}

/// A UI double that records everything the client hands it.
pub struct CapturingUi {
    delivered: Mutex<Vec<ChatMessage>>,
    statuses: Mutex<Vec<ConnectionStatus>>,
    rosters: Mutex<Vec<Vec<String>>>,
}

impl CapturingUi {
    pub fn new() -> Arc<CapturingUi> {
        Arc::new(CapturingUi {
            delivered: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            rosters: Mutex::new(Vec::new()),
        })
    }

    pub fn delivered(&self) -> Vec<ChatMessage> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn rosters(&self) -> Vec<Vec<String>> {
        self.rosters.lock().unwrap().clone()
    }

    pub fn saw_system(&self, content: &str) -> bool {
        self.delivered().iter().any(
            |m| matches!(m, ChatMessage::System { content: c, .. } if c == content),
        )
    }
}

impl ChatUi for CapturingUi {
    fn deliver(&self, message: &ChatMessage) {
        self.delivered.lock().unwrap().push(message.clone());
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn set_roster(&self, roster: &[String]) {
        self.rosters.lock().unwrap().push(roster.to_vec());
    }

    fn prompt_for_file(&self) -> Option<PathBuf> {
        None
    }
}

/// Polls a condition for up to ten seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
