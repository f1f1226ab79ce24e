//! Basic types shared by kyute input crates.

pub mod counter;
mod data;

pub use crate::{counter::Counter, data::Data};
