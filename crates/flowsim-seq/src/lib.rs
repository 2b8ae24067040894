//! Compact integer sequence encodings.
//!
//! Two complementary stores back statistics timelines with sublinear
//! memory in the common case:
//!
//! - [`PackedUintSeq`] delta-packs a non-decreasing `u64` sequence into a
//!   byte stream, one to eight bytes per element. Suited to timestamp
//!   series, whose raw deltas are small.
//! - [`RleField`] records a sequence as maximal arithmetic progressions
//!   (strides). Counter timelines under steady traffic collapse to a
//!   handful of strides.

pub mod packed;
pub mod rle;

pub use packed::{PackedUintSeq, PackedUintSeqIter, SeqError};
pub use rle::{RleField, RleFieldIter};
