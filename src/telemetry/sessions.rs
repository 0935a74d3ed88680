//! Session bookkeeping for capture ordering.

pub mod clock;

pub use clock::SessionClock;
