#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

pub mod bootstrap;
pub mod error;
pub mod parser;

pub use bootstrap::{ConfigFile, Settings, build_gateway, resolve};
pub use error::CliError;
pub use parser::{Cli, Preset};
