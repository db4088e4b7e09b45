/*!
# Squeeze: Block Sizing.

Exact bit counts for a store range as a DEFLATE block: the "true" metric
the iterative driver judges its rounds by, as opposed to the cost model's
entropy estimates.

The dynamic accounting is the expensive one: length-limited Huffman codes
for both alphabets, a second candidate code set built from RLE-friendlier
counts, and the cheapest of eight tree-encoding flavors, all per call. Since
the driver tends to re-ask about identical histograms round after round, the
results are memoized behind a content hash.
*/

use dactyl::NoHash;
use std::{
	cell::RefCell,
	collections::HashMap,
	hash::{
		BuildHasher,
		Hash,
		Hasher,
	},
};
use crate::{
	error::SqueezeError,
	katajainen::code_lengths,
	Lz77Store,
	NUM_D,
	NUM_LL,
	symbols::{
		DISTANCE_EXTRA_BITS,
		FIXED_TREE_LL,
		LENGTH_SYMBOL_EXTRA_BITS,
	},
};

/// # Tree Symbol Transmission Order.
///
/// The jumbled order RFC 1951 ships code-length code lengths in.
const TREE_ORDER: [usize; 19] = [
	16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// # Memoized Dynamic Sizes.
type SizeCache = HashMap<u64, u32, NoHash>;

thread_local!(
	/// # Dynamic Size Cache.
	///
	/// Keyed by a hash of the (pinned) histograms; cleared at the top of
	/// each driver call so it never outgrows one block's worth of variety.
	static CACHE: RefCell<SizeCache> = RefCell::new(HashMap::default())
);



/// # Fixed Block Size (Bits).
///
/// The exact cost of encoding the store range as a fixed-tree block,
/// including the three-bit block header and the end-of-block symbol.
#[must_use]
pub fn calculate_block_size_fixed(store: &Lz77Store, lstart: usize, lend: usize) -> u32 {
	// Header plus the seven-bit end symbol.
	let mut size = 3 + 7;

	for e in store.entries().get(lstart..lend).unwrap_or_default() {
		if e.dist == 0 {
			size += FIXED_TREE_LL[e.litlen as usize];
		}
		else {
			size += FIXED_TREE_LL[e.ll_symbol as usize]
				+ LENGTH_SYMBOL_EXTRA_BITS[e.ll_symbol as usize - 257]
				+ 5
				+ DISTANCE_EXTRA_BITS[e.d_symbol as usize];
		}
	}

	size
}

/// # Dynamic Block Size (Bits).
///
/// The exact cost of encoding the store range as a dynamic-tree block:
/// three-bit header, best-of-eight tree encoding, and the symbol data under
/// whichever of the plain or RLE-optimized code sets comes out smaller.
///
/// ## Errors
///
/// Returns an error if the range is out of bounds, or should any internal
/// sanity check fail.
pub fn calculate_block_size_dynamic(store: &Lz77Store, lstart: usize, lend: usize)
-> Result<u32, SqueezeError> {
	let (mut ll_counts, d_counts) = store.histogram(lstart, lend)?;
	ll_counts[256] = 1;

	// Same histogram, same answer.
	let key = histogram_hash(&ll_counts, &d_counts);
	if let Some(size) = CACHE.with_borrow(|cache| cache.get(&key).copied()) {
		return Ok(size);
	}

	let size = 3 + dynamic_lengths_size(&ll_counts, &d_counts)?;
	CACHE.with_borrow_mut(|cache| { cache.insert(key, size); });
	Ok(size)
}

/// # Reset the Size Cache.
///
/// Called at the top of each driver run; histograms from other blocks are
/// dead weight.
pub(crate) fn reset_size_cache() { CACHE.with_borrow_mut(HashMap::clear); }



/// # Best Tree-Plus-Data Size.
///
/// Build length-limited codes straight from the counts, then again from
/// RLE-optimized copies, and return the smaller complete (tree + data) size.
/// The data half always bills against the _true_ counts; only the code
/// lengths differ between candidates.
fn dynamic_lengths_size(ll_counts: &[u32; NUM_LL], d_counts: &[u32; NUM_D])
-> Result<u32, SqueezeError> {
	let ll_lengths = code_lengths(ll_counts, 15)?;
	let d_lengths = patch_distance_codes(code_lengths(d_counts, 15)?);
	let size = best_tree_size(&ll_lengths, &d_lengths)?
		+ data_size(ll_counts, d_counts, &ll_lengths, &d_lengths);

	let mut ll_counts2 = *ll_counts;
	let mut d_counts2 = *d_counts;
	optimize_huffman_for_rle(&mut ll_counts2);
	optimize_huffman_for_rle(&mut d_counts2);
	let ll_lengths2 = code_lengths(&ll_counts2, 15)?;
	let d_lengths2 = patch_distance_codes(code_lengths(&d_counts2, 15)?);

	// If optimization didn't move the codes, there's nothing to compare.
	if ll_lengths2 == ll_lengths && d_lengths2 == d_lengths { return Ok(size); }

	let size2 = best_tree_size(&ll_lengths2, &d_lengths2)?
		+ data_size(ll_counts, d_counts, &ll_lengths2, &d_lengths2);

	Ok(size.min(size2))
}

/// # Symbol Data Size.
fn data_size(
	ll_counts: &[u32; NUM_LL],
	d_counts: &[u32; NUM_D],
	ll_lengths: &[u32; NUM_LL],
	d_lengths: &[u32; NUM_D],
) -> u32 {
	// Literals.
	let a = ll_lengths.iter()
		.zip(ll_counts)
		.take(256)
		.map(|(&l, &c)| l * c)
		.sum::<u32>();

	// Lengths, extra bits included.
	let b = ll_lengths[257..286].iter()
		.zip(&ll_counts[257..286])
		.zip(LENGTH_SYMBOL_EXTRA_BITS)
		.map(|((&l, &c), extra)| (l + extra) * c)
		.sum::<u32>();

	// Distances, ditto.
	let c = d_lengths.iter()
		.zip(d_counts)
		.take(30)
		.zip(DISTANCE_EXTRA_BITS)
		.map(|((&l, &c), extra)| (l + extra) * c)
		.sum::<u32>();

	// And the end-of-block symbol.
	a + b + c + ll_lengths[256]
}

/// # Patch Thin Distance Codes.
///
/// Ancient zlib inflates reject blocks with fewer than two distance codes,
/// so pad the code set out to two when needed.
fn patch_distance_codes(mut d_lengths: [u32; NUM_D]) -> [u32; NUM_D] {
	let used = d_lengths.iter().take(30).filter(|&&l| l != 0).count();
	if used == 0 {
		d_lengths[0] = 1;
		d_lengths[1] = 1;
	}
	else if used == 1 {
		if d_lengths[0] == 0 { d_lengths[0] = 1; }
		else { d_lengths[1] = 1; }
	}
	d_lengths
}

/// # Best Tree Size (Bits).
///
/// The cost of transmitting the code lengths themselves, minimized over the
/// eight combinations of allowing the repeat codes 16/17/18.
fn best_tree_size(ll_lengths: &[u32; NUM_LL], d_lengths: &[u32; NUM_D])
-> Result<u32, SqueezeError> {
	// Trailing zero lengths need not be transmitted.
	let mut hlit = 29_usize;
	while 0 < hlit && ll_lengths[256 + hlit] == 0 { hlit -= 1; }
	let mut hdist = 29_usize;
	while 0 < hdist && d_lengths[hdist] == 0 { hdist -= 1; }

	// The two alphabets ship as one joined stream.
	let mut all = Vec::with_capacity(257 + hlit + 1 + hdist);
	all.extend_from_slice(&ll_lengths[..257 + hlit]);
	all.extend_from_slice(&d_lengths[..1 + hdist]);

	let mut best = u32::MAX;
	for extra in 0..8_u8 {
		let cl_counts = tree_counts(&all, extra & 1 != 0, extra & 2 != 0, extra & 4 != 0);
		let cl_lengths = code_lengths(&cl_counts, 7)?;

		let mut hclen = 15_usize;
		while 0 < hclen && cl_counts[TREE_ORDER[hclen + 3]] == 0 { hclen -= 1; }

		let mut size = 14 + (hclen as u32 + 4) * 3;
		size += cl_lengths.iter()
			.zip(cl_counts)
			.map(|(&l, c)| l * c)
			.sum::<u32>();
		size += cl_counts[16] * 2;
		size += cl_counts[17] * 3;
		size += cl_counts[18] * 7;

		if size < best { best = size; }
	}

	Ok(best)
}

/// # Code-Length Code Counts.
///
/// Simulate the RLE encoding of the joined length stream under the given
/// repeat-code permissions and tally what would be transmitted.
fn tree_counts(lengths: &[u32], use_16: bool, use_17: bool, use_18: bool) -> [u32; 19] {
	let mut cl_counts = [0_u32; 19];

	let mut i = 0;
	while i < lengths.len() {
		let symbol = lengths[i];
		let mut count = 1_u32;

		// Peek ahead through the repetition, if repeats can pay off here.
		if use_16 || (symbol == 0 && (use_17 || use_18)) {
			let mut j = i + 1;
			while j < lengths.len() && lengths[j] == symbol {
				count += 1;
				j += 1;
			}
			i = j - 1;
		}

		// Zero runs get the dedicated repeat codes.
		if symbol == 0 && 3 <= count {
			if use_18 {
				while 11 <= count {
					cl_counts[18] += 1;
					count -= count.min(138);
				}
			}
			if use_17 {
				while 3 <= count {
					cl_counts[17] += 1;
					count -= count.min(10);
				}
			}
		}

		// Non-zero runs repeat the previous symbol; the first instance is
		// transmitted literally.
		if use_16 && 4 <= count {
			count -= 1;
			cl_counts[symbol as usize] += 1;
			while 3 <= count {
				cl_counts[16] += 1;
				count -= count.min(6);
			}
		}

		// Whatever's left goes out as-is.
		cl_counts[symbol as usize] += count;
		i += 1;
	}

	cl_counts
}

/// # Optimize Counts for RLE.
///
/// Flatten population counts so the consequent Huffman tree RLE-compresses
/// better, at a (hopefully smaller) cost in code optimality. Stretches that
/// already repeat well are left alone; wobbly neighborhoods collapse to
/// their rounded average.
fn optimize_huffman_for_rle(counts: &mut [u32]) {
	// Trailing zeroes stay put; repeats there would add distance codes the
	// format doesn't have.
	let mut len = counts.len();
	while 0 < len && counts[len - 1] == 0 { len -= 1; }
	if len == 0 { return; }
	let counts = &mut counts[..len];

	// Mark the stretches already good for RLE: 5+ zeroes or 7+ identical
	// non-zeroes.
	let mut good = vec![false; len];
	let mut symbol = counts[0];
	let mut stride = 0_usize;
	for i in 0..=len {
		if i == len || counts[i] != symbol {
			if (symbol == 0 && 5 <= stride) || (symbol != 0 && 7 <= stride) {
				for g in &mut good[i - stride..i] { *g = true; }
			}
			stride = 1;
			if i != len { symbol = counts[i]; }
		}
		else { stride += 1; }
	}

	// Collapse everything else toward local averages.
	let mut stride = 0_u32;
	let mut limit = counts[0];
	let mut sum = 0_u32;
	for i in 0..=len {
		if i == len || good[i] || counts[i].abs_diff(limit) >= 4 {
			if sum != 0 && 4 <= stride {
				let v = ((sum + stride / 2) / stride).max(1);
				for c in &mut counts[i - stride as usize..i] { *c = v; }
			}
			stride = 0;
			sum = 0;

			// Re-aim the limit a few entries ahead so slow drifts still
			// collapse.
			limit =
				if i + 4 <= len {
					(counts[i] + counts[i + 1] + counts[i + 2] + counts[i + 3] + 2) / 4
				}
				else if i < len { counts[i] }
				else { 0 };
		}

		stride += 1;
		if i != len { sum += counts[i]; }
	}
}

/// # Histogram Hash.
///
/// A content key for the memo cache. The seeds are arbitrary but fixed;
/// reproducibility beats DoS resistance inside a single-threaded sizing
/// loop.
fn histogram_hash(ll_counts: &[u32; NUM_LL], d_counts: &[u32; NUM_D]) -> u64 {
	let mut h = ahash::RandomState::with_seeds(
		0x243f_6a88_85a3_08d3,
		0x1319_8a2e_0370_7344,
		0xa409_3822_299f_31d0,
		0x082e_fa98_ec4e_6c89,
	).build_hasher();

	ll_counts.hash(&mut h);
	d_counts.hash(&mut h);
	h.finish()
}



#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn t_fixed_size() {
		let mut store = Lz77Store::new();

		// An empty range is just the header and end symbol.
		assert_eq!(calculate_block_size_fixed(&store, 0, 0), 10);

		// One cheap literal, one expensive literal, one match.
		store.push(0x41, 0, 0).unwrap();
		store.push(0xF0, 0, 1).unwrap();
		store.push(258, 1, 2).unwrap();
		assert_eq!(
			calculate_block_size_fixed(&store, 0, 3),
			10 + 8 + 9 + (8 + 0 + 5 + 0),
		);
	}

	#[test]
	fn t_patch_distance_codes() {
		let out = patch_distance_codes([0; NUM_D]);
		assert_eq!((out[0], out[1]), (1, 1));

		let mut thin = [0_u32; NUM_D];
		thin[0] = 5;
		let out = patch_distance_codes(thin);
		assert_eq!((out[0], out[1]), (5, 1));

		let mut thin = [0_u32; NUM_D];
		thin[7] = 5;
		let out = patch_distance_codes(thin);
		assert_eq!((out[0], out[7]), (1, 5));

		// Two or more codes pass through untouched.
		let mut fine = [0_u32; NUM_D];
		fine[2] = 3;
		fine[9] = 4;
		assert_eq!(patch_distance_codes(fine), fine);
	}

	#[test]
	fn t_optimize_rle_flattens() {
		// A wobbly neighborhood collapses to its average…
		let mut counts = [10, 11, 10, 12, 10, 11, 10, 12, 0, 0];
		optimize_huffman_for_rle(&mut counts);
		assert!(counts[..8].windows(2).all(|w| w[0] == w[1]));

		// …while trailing zeroes and clean runs survive untouched.
		assert_eq!(&counts[8..], &[0, 0]);
		let mut clean = [4, 4, 4, 4, 4, 4, 4, 4];
		optimize_huffman_for_rle(&mut clean);
		assert_eq!(clean, [4, 4, 4, 4, 4, 4, 4, 4]);
	}

	#[test]
	fn t_tree_counts() {
		// Zero runs: raw without repeat codes, one code-17 for a short run,
		// one code-18 once the run reaches eleven.
		let counts = tree_counts(&[0_u32; 8], false, false, false);
		assert_eq!(counts[0], 8);

		let counts = tree_counts(&[0_u32; 8], false, true, false);
		assert_eq!((counts[0], counts[17]), (0, 1));

		// Too short for 18 on its own; the leftovers go out raw.
		let counts = tree_counts(&[0_u32; 8], false, false, true);
		assert_eq!((counts[0], counts[18]), (8, 0));

		let counts = tree_counts(&[0_u32; 12], false, false, true);
		assert_eq!((counts[0], counts[18]), (0, 1));

		// Six sevens with 16 allowed: one literal plus one repeat.
		let counts = tree_counts(&[7_u32; 6], true, false, false);
		assert_eq!((counts[7], counts[16]), (1, 1));
	}

	#[test]
	fn t_dynamic_size_sane() {
		let mut store = Lz77Store::new();
		for (i, b) in b"hello hello hello hello".iter().enumerate() {
			store.push(u16::from(*b), 0, i).unwrap();
		}

		let size = calculate_block_size_dynamic(&store, 0, store.len()).unwrap();

		// Tree overhead alone guarantees a few dozen bits; the payload
		// bound is eight bits a byte plus headers.
		assert!(50 < size);
		assert!(size < 23 * 8 + 200);

		// The memo should agree with itself.
		assert_eq!(
			calculate_block_size_dynamic(&store, 0, store.len()).unwrap(),
			size,
		);
	}
}
