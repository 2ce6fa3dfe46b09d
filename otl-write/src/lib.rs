//! Writing OpenType layout tables.
//!
//! This crate contains the serialization backbone used by the feature
//! compiler: a big-endian table writer that tracks offsets between tables,
//! deduplicates identical subtables, and assigns final byte positions, plus
//! owned representations of the layout tables themselves (GSUB, GPOS, GDEF,
//! BASE, STAT, name) and builders for coverage and class tables.
//!
//! Tables are plain structs that know how to write themselves into a
//! [`TableWriter`]; the writer is responsible for everything positional.

pub mod base;
pub mod error;
pub mod gdef;
pub mod gpos;
pub mod gsub;
pub mod layout;
pub mod name;
pub mod stat;
pub mod write;

pub use error::Error;
pub use write::{dump_table, TableWrite, TableWriter};

/// Scalar types used in font files.
pub extern crate font_types as types;
