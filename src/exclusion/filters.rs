//! File property filters

/// Upper bound on attachment size
#[derive(Debug, Clone, Copy)]
pub struct SizeFilter {
	max_bytes: u64,
}

impl SizeFilter {
	pub fn new(max_bytes: u64) -> Self {
		Self { max_bytes }
	}

	/// Whether a byte length fits (the bound is inclusive)
	pub fn matches_len(&self, size: u64) -> bool {
		size <= self.max_bytes
	}

	pub fn max_bytes(&self) -> u64 {
		self.max_bytes
	}
}


// vim: ts=4
