#![deny(unsafe_op_in_unsafe_fn)]
#![warn(rust_2018_idioms, clippy::pedantic)]
#![allow(
    clippy::cast_lossless,
    clippy::must_use_candidate,
    clippy::unreadable_literal
)]

pub mod doc;
pub mod utils;

pub(crate) mod chunk;
pub(crate) mod db;
pub(crate) mod internals;

pub use doc::{ClipDocument, Error, FormatError, Result};
