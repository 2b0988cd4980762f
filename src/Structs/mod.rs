pub mod flat;
pub use flat::{Flat, Handle};
