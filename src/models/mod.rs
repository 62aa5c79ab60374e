pub mod client;
pub mod paiement;
pub mod passage;
pub mod prestation;
pub mod sync_log;
pub mod user;

pub use client::Client;
pub use paiement::{ModePaiement, Paiement, StatutPaiement};
pub use passage::{Passage, PassageLigne};
pub use prestation::Prestation;
pub use sync_log::{SyncLog, SyncOutcome};
pub use user::{Role, User};
