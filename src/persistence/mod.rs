//! Local durability for batches the database would not take

pub mod dead_letter;

pub use dead_letter::{replay, DeadLetter, DeadLetterSpool};
