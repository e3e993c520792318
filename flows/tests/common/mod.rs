#![allow(dead_code)]

use std::sync::Arc;
use tally_core::{Amount, Currency, FinalizedTransaction, LifecycleId, PartyId, PartyKey};
use tally_flows::{
    logging, Coordinator, FlowConfig, InMemoryNotary, InMemoryVault, LocalNetwork,
    PartyDirectory, Responder,
};

pub fn usd(quantity: u64) -> Amount {
    Amount::new(quantity, Currency::USD)
}

pub fn test_config() -> FlowConfig {
    FlowConfig {
        session_retries: 2,
        signature_timeout_ms: 500,
        finality_ack_timeout_ms: 500,
        ordering_poll_attempts: 3,
        ordering_poll_interval_ms: 10,
    }
}

/// One party: its vault plus both sides of the flows.
pub struct Node {
    pub key: PartyKey,
    pub vault: Arc<InMemoryVault>,
    pub coordinator: Coordinator,
    pub responder: Arc<Responder>,
}

impl Node {
    pub fn party(&self) -> PartyId {
        self.key.party()
    }
}

pub struct Harness {
    pub network: LocalNetwork,
    pub notary: Arc<InMemoryNotary>,
    pub directory: PartyDirectory,
}

impl Harness {
    pub fn new(keys: &[PartyKey]) -> Self {
        logging::init_tracing();
        let notary = Arc::new(InMemoryNotary::new(PartyKey::generate()));
        let directory =
            PartyDirectory::new(notary.party()).with_parties(keys.iter().map(PartyKey::party));
        Self {
            network: LocalNetwork::new(),
            notary,
            directory,
        }
    }

    /// A harness with `count` parties, all answering proposals.
    pub fn start(count: usize) -> (Harness, Vec<Node>) {
        let keys: Vec<PartyKey> = (0..count).map(|_| PartyKey::generate()).collect();
        let harness = Harness::new(&keys);
        let nodes = keys
            .into_iter()
            .map(|key| {
                let vault = Arc::new(InMemoryVault::new(key.party()));
                let node = harness.node(key, vault);
                harness.serve(&node);
                node
            })
            .collect();
        (harness, nodes)
    }

    pub fn node(&self, key: PartyKey, vault: Arc<InMemoryVault>) -> Node {
        let party = key.party();
        let coordinator = Coordinator::new(
            key.clone(),
            self.directory.clone(),
            Arc::new(self.network.transport(party)),
            self.notary.clone(),
            vault.clone(),
            vault.clone(),
            test_config(),
        );
        let responder = Arc::new(Responder::new(
            key.clone(),
            self.directory.clone(),
            self.notary.clone(),
            vault.clone(),
        ));
        Node {
            key,
            vault,
            coordinator,
            responder,
        }
    }

    /// Registers `node` on the network and answers its sessions in the
    /// background.
    pub fn serve(&self, node: &Node) {
        let inbox = self.network.register(node.party());
        tokio::spawn(Arc::clone(&node.responder).serve(inbox));
    }
}

pub fn lifecycle_of(tx: &FinalizedTransaction) -> LifecycleId {
    tx.proposal()
        .unwrap()
        .outputs
        .iter()
        .find_map(|state| state.as_obligation().map(|record| record.lifecycle_id))
        .unwrap()
}
