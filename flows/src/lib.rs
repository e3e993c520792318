pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod messages;
pub mod ordering;
pub mod responder;
pub mod transport;
pub mod vault;

pub use config::FlowConfig;
pub use coordinator::Coordinator;
pub use directory::PartyDirectory;
pub use error::{FlowError, OrderingError, ReserveError, TransportError, VaultError};
pub use ledger::{PaymentLedger, Reservation};
pub use messages::{FlowMessage, Refusal};
pub use ordering::{InMemoryNotary, OrderingOutcome, OrderingService};
pub use responder::{Responder, RoundOutcome};
pub use transport::{Inbox, LocalNetwork, LocalTransport, Session, Transport};
pub use vault::{InMemoryVault, Vault, VaultEntry};
