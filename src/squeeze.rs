/*!
# Squeeze: Shortest-Path Optimizer.

The crate's namesake: a dynamic-programming forward pass over every byte of
a block, scored by a pluggable cost model, traced backwards into a path of
symbol lengths, and replayed through the matcher into an LZ77 store.

The statistical driver runs that pipeline repeatedly, re-estimating the cost
model from its own output each round and perturbing the statistics when the
search stalls. Whatever scored best by true dynamic-tree bit count, not
the model's estimate, is what the caller keeps.
*/

use crate::{
	blocks::{
		calculate_block_size_dynamic,
		reset_size_cache,
	},
	cache::MatchCache,
	error::{
		squeeze_error,
		SqueezeError,
	},
	hash::MatchFinder,
	Lz77Store,
	MAX_MATCH,
	MIN_MATCH,
	stats::{
		Mwc,
		SymbolStats,
	},
	SUBLEN_LEN,
	symbols::{
		distance_extra_bits,
		distance_symbol,
		DISTANCE_EXTRA_BITS,
		LENGTH_EXTRA_BITS,
		LENGTH_SYMBOLS,
	},
};

/// # Distance Symbol Boundaries.
///
/// The smallest distance belonging to each of the thirty distance symbols.
/// Distances within one symbol share a cost, so scanning these alone gives
/// an exact lower bound.
const DISTANCE_BOUNDARIES: [u16; 30] = [
	1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193,
	257, 385, 513, 769, 1025, 1537, 2049, 3073, 4097, 6145,
	8193, 12_289, 16_385, 24_577,
];



#[derive(Clone, Copy)]
/// # Symbol Cost Model.
///
/// Estimated bits to encode one symbol: a literal when `dist == 0`, a
/// length/distance pair otherwise. The DP's inner loop calls this millions
/// of times per block, so both variants stay branch-light and inlinable.
enum CostModel<'a> {
	/// # RFC 1951 Fixed-Tree Bits.
	Fixed,

	/// # Entropy Estimates From Gathered Statistics.
	Stats(&'a SymbolStats),
}

impl CostModel<'_> {
	#[inline]
	/// # Symbol Cost in Bits.
	fn cost(self, litlen: u16, dist: u16) -> f64 {
		match self {
			Self::Fixed =>
				if dist == 0 {
					if litlen <= 143 { 8.0 } else { 9.0 }
				}
				else {
					let base =
						if LENGTH_SYMBOLS[litlen as usize] <= 279 { 7.0 }
						else { 8.0 };
					base + 5.0
						+ f64::from(LENGTH_EXTRA_BITS[litlen as usize])
						+ f64::from(distance_extra_bits(dist))
				},
			Self::Stats(stats) =>
				if dist == 0 { stats.ll_bits[litlen as usize] }
				else {
					let dsym = distance_symbol(dist) as usize;
					stats.ll_bits[LENGTH_SYMBOLS[litlen as usize] as usize]
						+ f64::from(LENGTH_EXTRA_BITS[litlen as usize])
						+ stats.d_bits[dsym]
						+ f64::from(DISTANCE_EXTRA_BITS[dsym])
				},
		}
	}

	/// # Minimum Match Cost.
	///
	/// A lower bound over every length/distance symbol: the cheapest length
	/// (probed against distance one) combined with the cheapest distance
	/// (probed at length three). The DP uses it to skip cost-model calls
	/// that cannot possibly improve anything.
	fn min_cost(self) -> f64 {
		let mut bestlength = 3_u16;
		let mut best = f64::INFINITY;
		for l in MIN_MATCH as u16..=MAX_MATCH as u16 {
			let c = self.cost(l, 1);
			if c < best {
				best = c;
				bestlength = l;
			}
		}

		let mut bestdist = 1_u16;
		best = f64::INFINITY;
		for d in DISTANCE_BOUNDARIES {
			let c = self.cost(3, d);
			if c < best {
				best = c;
				bestdist = d;
			}
		}

		self.cost(bestlength, bestdist)
	}
}



/// # Squeeze Optimizer.
///
/// Owns the matcher, the longest-match cache, and the DP scratch buffers so
/// repeated blocks don't churn the allocator. One instance serves one thread;
/// separate threads get separate instances and never share anything but the
/// (read-only) input.
pub struct Optimizer {
	/// # Match Finder.
	hash: MatchFinder,

	/// # Longest-Match Cache.
	cache: MatchCache,

	/// # DP Cells: (Cost To Reach, Length of Arriving Symbol).
	costs: Vec<(f32, u16)>,

	/// # Traced Path of Symbol Lengths.
	path: Vec<u16>,
}

impl Default for Optimizer {
	fn default() -> Self { Self::new() }
}

impl Optimizer {
	#[must_use]
	/// # New.
	pub fn new() -> Self {
		Self {
			hash: MatchFinder::new(),
			cache: MatchCache::new(),
			costs: Vec::new(),
			path: Vec::new(),
		}
	}

	/// # Optimal LZ77 (Statistical).
	///
	/// Squeeze `data[instart..inend]` through `iterations` rounds of
	/// statistics-driven shortest-path search, seeded by a greedy pass. The
	/// best round, judged by true dynamic-tree bit count, lands in
	/// `store`.
	///
	/// Note `iterations == 0` leaves `store` untouched; pass at least one to
	/// get a result. An empty range returns immediately.
	///
	/// ## Errors
	///
	/// Returns an error if the range is out of bounds, or should any
	/// internal sanity check fail.
	pub fn optimal(
		&mut self,
		data: &[u8],
		instart: usize,
		inend: usize,
		iterations: u32,
		store: &mut Lz77Store,
	) -> Result<(), SqueezeError> {
		if inend < instart || data.len() < inend { return Err(squeeze_error!()); }
		if instart == inend { return Ok(()); }
		let data = &data[..inend];

		self.cache.init(inend - instart);
		reset_size_cache();

		// Greedy seed, and statistics from it.
		let mut current = Lz77Store::new();
		greedy_pass(&mut self.hash, &mut self.cache, data, instart, &mut current)?;
		let mut stats = SymbolStats::new();
		stats.load_store(&current);
		stats.crunch();

		let mut ran = Mwc::new();
		let mut best_stats = SymbolStats::new();
		let mut last_cost = 0_u32;
		let mut best_cost = u32::MAX;
		let mut last_ran = -1_i64;

		// Each round feeds on the previous round's output statistics.
		for i in 0..i64::from(iterations) {
			current.clear();
			self.optimal_run(data, instart, Some(&stats), &mut current)?;

			// Judge by the exact metric, not the model's estimate.
			let cost = calculate_block_size_dynamic(&current, 0, current.len())?;
			if cost < best_cost {
				store.replace(&current);
				best_stats = stats;
				best_cost = cost;
			}

			// Re-estimate from what we just produced. Once randomness has
			// entered the picture, keep half the previous round in the mix
			// to steady convergence.
			stats.reload_store(&current, last_ran != -1);
			stats.crunch();

			// Stalled? Shake the best-known statistics and try again.
			if 5 < i && cost == last_cost {
				stats = best_stats;
				stats.randomize(&mut ran);
				stats.crunch();
				last_ran = i;
			}

			last_cost = cost;
		}

		Ok(())
	}

	/// # Optimal LZ77 (Fixed Tree).
	///
	/// A single shortest-path pass scored against the fixed DEFLATE tree,
	/// appended to `store`. Optimal for fixed-tree blocks; no iteration
	/// needed because the cost model never moves.
	///
	/// ## Errors
	///
	/// Returns an error if the range is out of bounds, or should any
	/// internal sanity check fail.
	pub fn optimal_fixed(
		&mut self,
		data: &[u8],
		instart: usize,
		inend: usize,
		store: &mut Lz77Store,
	) -> Result<(), SqueezeError> {
		if inend < instart || data.len() < inend { return Err(squeeze_error!()); }
		if instart == inend { return Ok(()); }
		let data = &data[..inend];

		self.cache.init(inend - instart);
		self.optimal_run(data, instart, None, store)
	}

	/// # Greedy LZ77.
	///
	/// One left-to-right pass with lazy matching, appended to `store`. This
	/// is the seed the statistical driver starts from, exposed for callers
	/// that want a fast baseline to compare against.
	///
	/// ## Errors
	///
	/// Returns an error if the range is out of bounds, or should any
	/// internal sanity check fail.
	pub fn greedy(
		&mut self,
		data: &[u8],
		instart: usize,
		inend: usize,
		store: &mut Lz77Store,
	) -> Result<(), SqueezeError> {
		if inend < instart || data.len() < inend { return Err(squeeze_error!()); }
		if instart == inend { return Ok(()); }
		let data = &data[..inend];

		self.cache.init(inend - instart);
		greedy_pass(&mut self.hash, &mut self.cache, data, instart, store)
	}

	/// # One Squeeze Pass.
	///
	/// Forward DP, backward trace, replay. `data` arrives pre-capped at the
	/// block end; `stats` picks the cost model.
	fn optimal_run(
		&mut self,
		data: &[u8],
		instart: usize,
		stats: Option<&SymbolStats>,
		store: &mut Lz77Store,
	) -> Result<(), SqueezeError> {
		let model = stats.map_or(CostModel::Fixed, CostModel::Stats);
		best_lengths(&mut self.hash, &mut self.cache, data, instart, model, &mut self.costs)?;
		trace_backwards(&self.costs, &mut self.path)?;
		follow_path(&mut self.hash, &mut self.cache, data, instart, &self.path, store)
	}
}



/// # Forward Pass.
///
/// Fill `costs[j]` with the cheapest way to reach byte `instart + j`, and
/// the length of the symbol that gets there. Cell zero anchors the chain;
/// everything else starts at the infinity sentinel and relaxes downward as
/// literal and match edges are tried, strictly-less-than so the first
/// discovery wins ties.
fn best_lengths(
	hash: &mut MatchFinder,
	cache: &mut MatchCache,
	data: &[u8],
	instart: usize,
	model: CostModel<'_>,
	costs: &mut Vec<(f32, u16)>,
) -> Result<(), SqueezeError> {
	let blocksize = data.len() - instart;
	costs.clear();
	costs.resize(blocksize + 1, (f32::INFINITY, 0));
	costs[0] = (0.0, 0);

	hash.reset(data, instart);
	let min_cost = model.min_cost();
	let mut sublen = [0_u16; SUBLEN_LEN];

	let mut i = instart;
	while i < data.len() {
		hash.update(data, i);

		// Deep inside a long same-byte run, the best local move is a
		// max-length match at distance one, over and over; fill a whole
		// stride of cells arithmetically instead of re-asking the matcher.
		if
			instart + MAX_MATCH + 1 < i &&
			i + 2 * MAX_MATCH + 1 < data.len() &&
			((2 * MAX_MATCH) as u16) < hash.same_at(i) &&
			(MAX_MATCH as u16) < hash.same_at(i - MAX_MATCH)
		{
			let symbol_cost = model.cost(MAX_MATCH as u16, 1);
			for _ in 0..MAX_MATCH {
				let j = i - instart;
				costs[j + MAX_MATCH] = (
					(f64::from(costs[j].0) + symbol_cost) as f32,
					MAX_MATCH as u16,
				);
				i += 1;
				hash.update(data, i);
			}
		}

		let j = i - instart;
		let (_dist, length) =
			hash.find(data, i, MAX_MATCH as u16, Some(&mut sublen), cache, instart)?;

		// Literal edge.
		let cost_j = f64::from(costs[j].0);
		let c = model.cost(u16::from(data[i]), 0) + cost_j;
		if c < f64::from(costs[j + 1].0) {
			costs[j + 1] = (c as f32, 1);
		}

		// Match edges, one per reachable length.
		let kend = (length as usize).min(data.len() - i);
		let min_cost_add = min_cost + cost_j;
		for k in MIN_MATCH..=kend {
			// Nothing a match can do for a cell already at or under the
			// floor; skip the model call.
			if f64::from(costs[j + k].0) <= min_cost_add { continue; }

			let c = model.cost(k as u16, sublen[k]) + cost_j;
			if c < f64::from(costs[j + k].0) {
				costs[j + k] = (c as f32, k as u16);
			}
		}

		i += 1;
	}

	debug_assert!(costs.iter().all(|&(c, _)| 0.0 <= c && c < f32::INFINITY));
	Ok(())
}

/// # Backward Trace.
///
/// Hop backwards through the filled cost cells, collecting each arriving
/// symbol's length, then flip the result forward. The lengths must walk the
/// block exactly: never zero, never past the cell they came from.
fn trace_backwards(costs: &[(f32, u16)], path: &mut Vec<u16>) -> Result<(), SqueezeError> {
	path.truncate(0);

	let mut index = costs.len() - 1;
	while index != 0 {
		let length = costs[index].1;
		if length == 0 || index < length as usize || (MAX_MATCH as u16) < length {
			return Err(squeeze_error!());
		}
		path.push(length);
		index -= length as usize;
	}

	path.reverse();
	Ok(())
}

/// # Replay a Path.
///
/// Walk the traced lengths forward through a fresh matcher state, recovering
/// each match's distance by re-querying at the capped length, and append the
/// resulting symbols to `store`. The DP only remembered lengths; distances
/// are deterministic given position and length, so this costs one cheap
/// (cache-warmed) query apiece.
fn follow_path(
	hash: &mut MatchFinder,
	cache: &mut MatchCache,
	data: &[u8],
	instart: usize,
	path: &[u16],
	store: &mut Lz77Store,
) -> Result<(), SqueezeError> {
	if data.len() <= instart { return Ok(()); }

	hash.reset(data, instart);
	let mut pos = instart;
	for &length in path {
		hash.update(data, pos);

		if MIN_MATCH as u16 <= length {
			// Recover the distance, and double-check the matcher agrees
			// about the length, as that's an easy thing to screw up.
			let (dist, test_length) = hash.find(data, pos, length, None, cache, instart)?;
			if test_length != length && MIN_MATCH as u16 <= test_length {
				return Err(squeeze_error!());
			}
			verify_len_dist(data, pos, dist, length)?;
			store.push(length, dist, pos)?;
		}
		else {
			store.push(u16::from(data[pos]), 0, pos)?;
		}

		// Hash the rest of the symbol's span.
		for k in 1..length as usize {
			hash.update(data, pos + k);
		}
		pos += length as usize;
	}

	Ok(())
}

/// # Verify a Back-Reference.
///
/// Confirm the bytes a match claims to copy really do repeat.
fn verify_len_dist(data: &[u8], pos: usize, dist: u16, length: u16)
-> Result<(), SqueezeError> {
	let dist = dist as usize;
	let length = length as usize;

	if
		dist != 0 && dist <= pos &&
		pos + length <= data.len() &&
		data[pos - dist..pos - dist + length] == data[pos..pos + length]
	{
		Ok(())
	}
	else { Err(squeeze_error!()) }
}

/// # Greedy Pass With Lazy Matching.
///
/// The classic one-step-lookahead heuristic: take a match unless the next
/// position offers a meaningfully better one, in which case emit a literal
/// and take that instead. Distances past 1024 get their score docked a
/// point, which empirically pays for their extra bits.
fn greedy_pass(
	hash: &mut MatchFinder,
	cache: &mut MatchCache,
	data: &[u8],
	instart: usize,
	store: &mut Lz77Store,
) -> Result<(), SqueezeError> {
	/// # Distance-Aware Length Score.
	const fn score(length: u16, dist: u16) -> u16 {
		if 1024 < dist { length.saturating_sub(1) }
		else { length }
	}

	hash.reset(data, instart);

	let mut sublen = [0_u16; SUBLEN_LEN];
	let mut prev_length = 0_u16;
	let mut prev_dist = 0_u16;
	let mut match_available = false;

	let mut i = instart;
	while i < data.len() {
		hash.update(data, i);
		let (mut dist, mut length) =
			hash.find(data, i, MAX_MATCH as u16, Some(&mut sublen), cache, instart)?;

		let length_score = score(length, dist);
		let prev_score = score(prev_length, prev_dist);

		if match_available {
			match_available = false;

			if prev_score + 1 < length_score {
				// The new match wins; the byte it displaced becomes a
				// literal.
				store.push(u16::from(data[i - 1]), 0, i - 1)?;
				if MIN_MATCH as u16 <= length_score && (length as usize) < MAX_MATCH {
					match_available = true;
					prev_length = length;
					prev_dist = dist;
					i += 1;
					continue;
				}
			}
			else {
				// The held-back match wins; emit it at its own position.
				length = prev_length;
				dist = prev_dist;
				verify_len_dist(data, i - 1, dist, length)?;
				store.push(length, dist, i - 1)?;

				// The match body swallows positions through i-1+length; the
				// current one is already hashed.
				for _ in 2..length as usize {
					i += 1;
					hash.update(data, i);
				}
				i += 1;
				continue;
			}
		}
		else if MIN_MATCH as u16 <= length_score && (length as usize) < MAX_MATCH {
			// Hold the match back one position to see if something better
			// turns up.
			match_available = true;
			prev_length = length;
			prev_dist = dist;
			i += 1;
			continue;
		}

		if MIN_MATCH as u16 <= length_score {
			verify_len_dist(data, i, dist, length)?;
			store.push(length, dist, i)?;
		}
		else {
			length = 1;
			store.push(u16::from(data[i]), 0, i)?;
		}

		for _ in 1..length as usize {
			i += 1;
			hash.update(data, i);
		}
		i += 1;
	}

	Ok(())
}



#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn t_min_cost_fixed() {
		// Cheapest length symbol is seven bits (lengths 3..=10), cheapest
		// distance is five bits flat: twelve total.
		assert!((CostModel::Fixed.min_cost() - 12.0).abs() < f64::EPSILON);
	}

	#[test]
	fn t_fixed_costs() {
		// Literals split at 143/144.
		assert!((CostModel::Fixed.cost(143, 0) - 8.0).abs() < f64::EPSILON);
		assert!((CostModel::Fixed.cost(144, 0) - 9.0).abs() < f64::EPSILON);

		// Length 3 at distance 1: 7 + 5, no extra bits.
		assert!((CostModel::Fixed.cost(3, 1) - 12.0).abs() < f64::EPSILON);

		// Length 258 at distance 1: symbol 285 sits in the 8-bit band.
		assert!((CostModel::Fixed.cost(258, 1) - 13.0).abs() < f64::EPSILON);

		// Length 20 at distance 5: 2 length extra bits, 1 distance extra.
		assert!((CostModel::Fixed.cost(20, 5) - 15.0).abs() < f64::EPSILON);
	}

	#[test]
	fn t_trace() {
		// A hand-built cost table: literal, literal, then a three-match.
		let costs = vec![
			(0.0_f32, 0_u16),
			(8.0, 1),
			(16.0, 1),
			(20.0, 3),
			(28.0, 1),
			(24.0, 3),
		];
		let mut path = Vec::new();
		trace_backwards(&costs, &mut path).unwrap();
		assert_eq!(path, vec![1, 1, 3]);
		assert_eq!(path.iter().map(|&l| l as usize).sum::<usize>(), 5);

		// Zero lengths mid-chain are a hard error.
		let costs = vec![(0.0_f32, 0_u16), (8.0, 0)];
		assert!(trace_backwards(&costs, &mut path).is_err());
	}

	#[test]
	fn t_verify() {
		let data = b"abcabcabc";
		assert!(verify_len_dist(data, 3, 3, 6).is_ok());
		assert!(verify_len_dist(data, 3, 3, 7).is_err());
		assert!(verify_len_dist(data, 3, 4, 3).is_err());
		assert!(verify_len_dist(data, 0, 1, 3).is_err());
	}
}
