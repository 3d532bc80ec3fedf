//! Burn ML models for searched-cell image classification.
//!
//! This crate turns a discovered cell description (a `Genotype`) into a
//! trainable convolutional classifier:
//! - `genotype`: the cell vocabulary and the parser for serialized genotype
//!   expressions produced by an architecture search.
//! - `ops`: the candidate operations a cell edge can carry.
//! - `network`: cells assembled into a full classifier with an optional
//!   auxiliary head and drop-path regularization.
//!
//! These are pure Burn Modules; the `evaluation` crate drives training and
//! inference around them.

pub mod genotype;
pub mod network;
pub mod ops;

pub use genotype::{Genotype, GenotypeError, OpKind};
pub use network::{AuxiliaryHead, Cell, Network, NetworkConfig};
pub use ops::drop_path;

pub mod prelude {
    pub use super::genotype::{Genotype, OpKind};
    pub use super::network::{Network, NetworkConfig};
}
