//! Range checks for settings

use std::path::Path;

use super::ValidationError;

/// Reject `value` outside `min..=max`
pub fn check_range<T>(name: &'static str, value: T, min: T, max: T) -> Result<(), ValidationError>
where
	T: PartialOrd + std::fmt::Display,
{
	if value < min || value > max {
		return Err(ValidationError::Setting {
			name,
			reason: format!("{} is outside {}..={}", value, min, max),
		});
	}
	Ok(())
}

/// Quiet period before an event settles, in milliseconds
pub fn validate_debounce_ms(ms: u64) -> Result<(), ValidationError> {
	check_range("debounce_ms", ms, 1, 60_000)
}

pub fn validate_batch_size(size: usize) -> Result<(), ValidationError> {
	check_range("batch_size", size, 1, 10_000)
}

pub fn validate_retry_count(count: u32) -> Result<(), ValidationError> {
	check_range("retry_attempts", count, 0, 100)
}

/// Any timeout or period given in whole seconds
pub fn validate_seconds(name: &'static str, secs: u64) -> Result<(), ValidationError> {
	check_range(name, secs, 1, 3600)
}

/// Queue and pool sizes
pub fn validate_capacity(name: &'static str, value: usize) -> Result<(), ValidationError> {
	check_range(name, value, 1, usize::MAX)
}

/// The vault root must exist and be a directory
pub fn validate_root_dir(root: &Path) -> Result<(), ValidationError> {
	let reason = if root.as_os_str().is_empty() {
		"not set".to_string()
	} else if !root.is_dir() {
		format!("{} is not a directory", root.display())
	} else {
		return Ok(());
	};
	Err(ValidationError::Setting { name: "vault_path", reason })
}


// vim: ts=4
