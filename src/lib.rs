#![allow(warnings)]
#![cfg_attr(feature = "nightly", feature(backtrace))]

pub(crate) mod deps {
    pub use derive_more;
    pub use lazy_static;
    pub use libc;
    pub use log;
    pub use nix;
    pub use serde;
    pub use serde_yaml;
    pub use thiserror;
}

mod fmt;
mod io;

pub mod addr;
pub mod aio;
pub mod annotate;
pub mod cluster;
pub mod config;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod instr;
pub mod mmapfile;
pub mod opcode;
pub mod paths;
pub mod pipeline;
pub mod place;
pub mod prioqueue;
pub mod progfile;
pub mod program;
pub mod programs;
pub mod protocol;
pub mod replace;
pub mod schedule;
pub mod stats;
pub mod streams;
