// Planning poker core: card deck, estimation rounds, session analytics, and
// the record store contract. No I/O happens in this crate.

pub mod aggregate;
pub mod deck;
pub mod model;
pub mod round;
pub mod store;

pub use deck::{classify, Card, CardError, Points, SpecialCard};
pub use round::{evaluate, RoundError, RoundOutcome, RoundResult};
pub use store::RecordStore;
