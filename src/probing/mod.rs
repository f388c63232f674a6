//! Frame-to-phoneme attribution, label collapsing, balancing and the
//! layer-wise linear probes.

pub mod aligner;
pub mod balance;
pub mod frames;
pub mod phone_map;
pub mod probe;
pub mod runner;
pub mod tables;
