#![allow(dead_code)]

mod git;
mod provider;

pub use git::*;
pub use provider::*;
