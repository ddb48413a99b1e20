#![doc = include_str!("../README.md")]
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::unimplemented,
    clippy::use_self,
    missing_debug_implementations,
    unreachable_pub
)]

mod errors;
pub use errors::Error;

pub mod plc;
pub mod tag;

mod cip;
mod cpf;

pub mod eip;
pub mod server;
