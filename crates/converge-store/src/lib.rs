//! Storage ports (`ports`) and a Postgres backend (`pg`). Every concern —
//! events, intents, locks, deliveries, reviews, findings, commit links,
//! embeddings, policy documents — is modeled as an independent trait;
//! `Store` composes them by bound so a backend only implements what it uses.

pub mod error;
pub mod pg;
pub mod ports;

pub use error::StoreError;
pub use pg::{PgStore, ENV_DB_URL};
pub use ports::{
    ChainStateStore, CommitLinkStore, DeliveryStore, EmbeddingStore, EventStore, IntentStore,
    LockStore, PolicyDocStore, ReviewStore, SecurityFindingStore, Store,
};
