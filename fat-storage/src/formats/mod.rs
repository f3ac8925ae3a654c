//! Concrete archive formats.
//!
//! Each module is one game format: a sniffing/construction plugin for the
//! [`crate::FormatRegistry`] plus the [`crate::FatFormat`] hook set the
//! core drives.  The formats cover every table topology the engine deals
//! with: central tables at the front (GRP, POD) or back (WAD, EPF, RFF) of
//! the archive, per-file embedded headers (Monster Bash DAT, Stellar 7
//! RES), and an external sidecar table (Doofus G-D).

pub mod bash;
pub mod doofus;
pub mod epf;
pub mod grp;
pub mod pod;
pub mod rff;
pub mod stellar7;
pub mod wad;
