//! Access boundary policy model, normalized permission/scope sets, and bearer tokens.

pub mod boundary;
pub mod set;
pub mod token;

pub use boundary::*;
pub use set::*;
pub use token::{bearer::*, secret::*};
