//! Positional cross-matching of astronomical source catalogs.
//!
//! Skyjoin pairs sources from two catalogs whose sky positions lie within an
//! angular radius of each other. Positions are projected onto the unit
//! sphere and searched with a KD-tree using the chord length equivalent of
//! the radius. The pair lists are then merged with both catalogs into a
//! single table and reduced to one row per source when needed.

pub mod crossmatch;
pub mod geom;
pub mod kdtree;
pub mod merge;
pub mod pipeline;
pub mod table;
