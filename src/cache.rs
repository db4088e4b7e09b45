/*!
# Squeeze: Longest-Match Cache.

The iterative driver asks the matcher the same questions over and over
(once for the greedy seed, then once per DP pass, then once per replay), so
full-window match results are cached per block position.

Each position stores its best `(length, distance)` pair plus a packed
"sublength" record: up to eight `(length - 3, distance)` boundary entries
marking where the best distance changes as the length grows, with the final
entry carrying the maximum cached length.
*/

use crate::{
	error::{
		squeeze_error,
		SqueezeError,
	},
	MIN_MATCH,
	SUBLEN_LEN,
};



/// # Boundary Entries Per Position.
const CACHE_ENTRIES: usize = 8;

/// # Packed Bytes Per Position.
///
/// Each boundary entry takes three bytes: the length (minus three, so it
/// fits a byte) and a little-endian distance.
const CACHE_BYTES: usize = CACHE_ENTRIES * 3;



/// # Longest-Match Cache.
pub(crate) struct MatchCache {
	/// # Best Length/Distance Per Position.
	///
	/// `(1, 0)` means unset; `(0, 0)` means "no match here"; anything else
	/// is a real result.
	ld: Vec<(u16, u16)>,

	/// # Packed Sublength Records.
	sublen: Vec<u8>,
}

impl MatchCache {
	/// # New (Empty).
	pub(crate) const fn new() -> Self {
		Self {
			ld: Vec::new(),
			sublen: Vec::new(),
		}
	}

	/// # Initialize for a Block.
	///
	/// Size the cache for `blocksize` positions and mark every one unset.
	pub(crate) fn init(&mut self, blocksize: usize) {
		self.ld.clear();
		self.ld.resize(blocksize, (1, 0));
		self.sublen.clear();
		self.sublen.resize(blocksize * CACHE_BYTES, 0);
	}

	/// # Find Match.
	///
	/// Serve a previously-cached result for `pos` if the caller's `limit`
	/// allows it, writing through the out-params and returning `true`. When
	/// the cached length is the only thing standing in the way, the limit is
	/// lowered instead so the caller can search less.
	pub(crate) fn find(
		&self,
		pos: usize,
		limit: &mut u16,
		sublen: &mut Option<&mut [u16; SUBLEN_LEN]>,
		distance: &mut u16,
		length: &mut u16,
	) -> Result<bool, SqueezeError> {
		let (cache_len, cache_dist) = *self.ld.get(pos).ok_or(squeeze_error!())?;

		// Unset means unhelpable.
		if cache_len == 1 && cache_dist == 0 { return Ok(false); }

		let record = &self.sublen[pos * CACHE_BYTES..(pos + 1) * CACHE_BYTES];
		let max_cached =
			if sublen.is_some() { max_sublen(record) }
			else { 0 };

		if
			*limit == crate::MAX_MATCH as u16 ||
			cache_len <= *limit ||
			(sublen.is_some() && max_cached >= *limit)
		{
			if sublen.is_none() || cache_len <= max_cached {
				*length = cache_len.min(*limit);

				if let Some(s) = sublen {
					if MIN_MATCH as u16 <= *length { write_sublen(record, s); }
					*distance =
						if (*length as usize) < MIN_MATCH { 0 }
						else { s[*length as usize] };

					// The record's distance-at-length must agree with the
					// redundantly-cached best distance.
					if
						*limit == crate::MAX_MATCH as u16 &&
						MIN_MATCH as u16 <= *length &&
						*distance != cache_dist
					{
						return Err(squeeze_error!());
					}
				}
				else { *distance = cache_dist; }

				return Ok(true);
			}

			// The cache can't answer directly, but it does bound the search.
			*limit = cache_len;
		}

		Ok(false)
	}

	/// # Store Match.
	///
	/// Cache a full-window search result for `pos`, first-write-wins.
	pub(crate) fn store(
		&mut self,
		pos: usize,
		sublen: &[u16; SUBLEN_LEN],
		distance: u16,
		length: u16,
	) -> Result<(), SqueezeError> {
		if self.ld.len() <= pos { return Err(squeeze_error!()); }
		if self.ld[pos] != (1, 0) { return Ok(()); }

		// A fruitless search is itself worth remembering. (Sub-minimum
		// "matches" count as fruitless whatever their distance.)
		if (length as usize) < MIN_MATCH {
			self.ld[pos] = (0, 0);
			return Ok(());
		}
		if distance == 0 { return Err(squeeze_error!()); }

		self.ld[pos] = (length, distance);

		// Pack the boundary entries: one per distance change, oldest first.
		let record = &mut self.sublen[pos * CACHE_BYTES..(pos + 1) * CACHE_BYTES];
		let mut j = 0;
		let mut bestlength = 0_u16;
		for i in MIN_MATCH..=length as usize {
			if i == length as usize || sublen[i] != sublen[i + 1] {
				record[j * 3] = (i - MIN_MATCH) as u8;
				let [d1, d2] = sublen[i].to_le_bytes();
				record[j * 3 + 1] = d1;
				record[j * 3 + 2] = d2;
				bestlength = i as u16;
				j += 1;
				if CACHE_ENTRIES <= j { break; }
			}
		}

		// If the record has spare room, echo the max length into the final
		// slot so lookups don't have to scan for it.
		if j < CACHE_ENTRIES {
			if bestlength != length { return Err(squeeze_error!()); }
			record[(CACHE_ENTRIES - 1) * 3] = (bestlength as usize - MIN_MATCH) as u8;
		}
		else if length < bestlength { return Err(squeeze_error!()); }

		Ok(())
	}
}



/// # Max Cached Sublength.
///
/// Zero if the record is empty, otherwise the length stashed in the final
/// slot (plus the three the packing subtracted).
fn max_sublen(record: &[u8]) -> u16 {
	if record[1] == 0 && record[2] == 0 { 0 }
	else { u16::from(record[(CACHE_ENTRIES - 1) * 3]) + MIN_MATCH as u16 }
}

/// # Unpack Sublengths.
///
/// Expand the boundary entries back into a flat distance-by-length table.
fn write_sublen(record: &[u8], sublen: &mut [u16; SUBLEN_LEN]) {
	let maxlength = max_sublen(record) as usize;
	let mut from = MIN_MATCH;
	for chunk in record.chunks_exact(3) {
		let length = usize::from(chunk[0]) + MIN_MATCH;
		let dist = u16::from_le_bytes([chunk[1], chunk[2]]);
		if from <= length { sublen[from..=length].fill(dist); }
		if maxlength <= length { return; }
		from = length + 1;
	}
}



#[cfg(test)]
mod test {
	use super::*;
	use crate::MAX_MATCH;

	#[test]
	fn t_roundtrip() {
		let mut cache = MatchCache::new();
		cache.init(4);

		// Build a sublength table with a few distance boundaries.
		let mut sublen = [0_u16; SUBLEN_LEN];
		sublen[3..=10].fill(100);
		sublen[11..=40].fill(250);
		sublen[41..=77].fill(3_000);
		cache.store(2, &sublen, 3_000, 77).unwrap();

		// A full-limit lookup should reproduce it.
		let mut out = [0_u16; SUBLEN_LEN];
		let mut limit = MAX_MATCH as u16;
		let mut dist = 0;
		let mut length = 0;
		let hit = cache.find(2, &mut limit, &mut Some(&mut out), &mut dist, &mut length).unwrap();
		assert!(hit);
		assert_eq!((dist, length), (3_000, 77));
		assert_eq!(out[3..=77], sublen[3..=77]);

		// A capped lookup should return the distance at that length.
		let mut limit = 20;
		let hit = cache.find(2, &mut limit, &mut Some(&mut out), &mut dist, &mut length).unwrap();
		assert!(hit);
		assert_eq!((dist, length), (250, 20));
	}

	#[test]
	fn t_no_match() {
		let mut cache = MatchCache::new();
		cache.init(2);

		let sublen = [0_u16; SUBLEN_LEN];
		cache.store(0, &sublen, 0, 1).unwrap();

		let mut limit = MAX_MATCH as u16;
		let mut dist = 9;
		let mut length = 9;
		let hit = cache.find(0, &mut limit, &mut None, &mut dist, &mut length).unwrap();
		assert!(hit);
		assert_eq!((dist, length), (0, 0));

		// Unset positions can't help.
		assert!(! cache.find(1, &mut limit, &mut None, &mut dist, &mut length).unwrap());
	}

	#[test]
	fn t_first_write_wins() {
		let mut cache = MatchCache::new();
		cache.init(1);

		let mut sublen = [0_u16; SUBLEN_LEN];
		sublen[3..=5].fill(7);
		cache.store(0, &sublen, 7, 5).unwrap();

		// A second store is a no-op.
		sublen[3..=9].fill(8);
		cache.store(0, &sublen, 8, 9).unwrap();

		let mut limit = MAX_MATCH as u16;
		let mut dist = 0;
		let mut length = 0;
		assert!(cache.find(0, &mut limit, &mut None, &mut dist, &mut length).unwrap());
		assert_eq!((dist, length), (7, 5));
	}
}
