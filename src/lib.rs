/*!
# Squeeze

An iterative entropy-guided shortest-path LZ77 optimizer for DEFLATE.

Given a byte range inside a larger input, [`Optimizer`] produces the
sequence of LZ77 symbols (literals and length/distance back-references)
that minimizes the estimated bit cost of encoding that range, by way of a
dynamic-programming pass over every byte, re-run under successively
re-estimated statistical cost models with a little deterministic randomness
to knock the search out of ruts.

The crate deliberately stops at the symbol store: Huffman bitstream
emission, block splitting, and container framing all belong to whatever
sits downstream. [`calculate_block_size_dynamic`] and
[`calculate_block_size_fixed`] report what a range _would_ cost to encode,
which is also the yardstick the optimizer judges itself by.

```
use squeeze::{Lz77Store, Optimizer};

let data = b"hello hello hello hello";
let mut store = Lz77Store::new();
Optimizer::new()
    .optimal(data, 0, data.len(), 15, &mut store)
    .unwrap();

let covered: usize = store.entries().iter().map(|e| usize::from(e.length())).sum();
assert_eq!(covered, data.len());
```
*/

#![deny(unsafe_code)]

#![warn(
	clippy::pedantic,
	macro_use_extern_crate,
	missing_copy_implementations,
	missing_docs,
	non_ascii_idents,
	trivial_casts,
	trivial_numeric_casts,
	unreachable_pub,
	unused_extern_crates,
	unused_import_braces,
)]

#![allow(
	clippy::cast_possible_truncation,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::module_name_repetitions,
	clippy::redundant_pub_crate,
)]

mod blocks;
mod cache;
mod error;
mod hash;
mod katajainen;
mod squeeze;
mod stats;
mod store;
mod symbols;

pub use blocks::{
	calculate_block_size_dynamic,
	calculate_block_size_fixed,
};
pub use error::SqueezeError;
pub use squeeze::Optimizer;
pub use store::{
	Lz77Entry,
	Lz77Store,
};



/// # Size of the Litlen Alphabet.
pub(crate) const NUM_LL: usize = 288;

/// # Size of the Distance Alphabet.
pub(crate) const NUM_D: usize = 32;

/// # Back-Reference Window Size.
pub(crate) const WINDOW_SIZE: usize = 32_768;

/// # Window Ring Mask.
pub(crate) const WINDOW_MASK: usize = WINDOW_SIZE - 1;

/// # Minimum Match Length.
pub(crate) const MIN_MATCH: usize = 3;

/// # Maximum Match Length.
pub(crate) const MAX_MATCH: usize = 258;

/// # Sublength Table Size.
///
/// Sublength tables are indexed directly by length, `0..=MAX_MATCH`.
pub(crate) const SUBLEN_LEN: usize = MAX_MATCH + 1;
