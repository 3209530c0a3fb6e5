//! Pure, side-effect-free transforms from raw chain records to typed
//! domain entities.

pub mod abi;
pub mod signature;
pub mod trace_tree;
pub mod transfers;
