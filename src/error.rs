/*!
# Squeeze: Errors.
*/

use std::{
	error::Error,
	fmt,
};



#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// # Squeeze Error.
///
/// This library uses `Result` return types like conditionally-triggering
/// assertions. An error means an internal invariant in the matcher, the
/// cost model, or the path bookkeeping failed to hold, so the offending
/// source location is recorded to aid investigation.
///
/// Errors shouldn't actually be reachable, but, well, bugs happen!
pub struct SqueezeError {
	/// # Source File.
	file: &'static str,

	/// # Source Line.
	line: u32,
}

impl SqueezeError {
	/// # New.
	pub(crate) const fn new(file: &'static str, line: u32) -> Self {
		Self { file, line }
	}
}

impl fmt::Display for SqueezeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!(
			"squeeze invariant failed at {}:{}",
			self.file,
			self.line,
		))
	}
}

impl Error for SqueezeError {}



/// # Error Constructor.
///
/// Build a `SqueezeError` pointing at the check that tripped.
macro_rules! squeeze_error {
	() => (crate::error::SqueezeError::new(file!(), line!()));
}

/// # Expose the macro to the rest of the crate.
pub(crate) use squeeze_error;
