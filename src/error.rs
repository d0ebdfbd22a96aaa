#![allow(missing_docs)]

use std::{error, fmt, io};

#[derive(Debug)]
pub struct Error {
	kind: ErrorKind,
	cause: Option<Box<dyn error::Error + Send + Sync>>,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ErrorKind {
	/// An unknown error
	Unknown,

	/// The clock parameters passed to [`initialize`] have a zero multiplier or
	/// divisor.
	///
	/// [`initialize`]: ../struct.Agent.html#method.initialize
	InvalidClock,

	/// The protocol header has already been claimed by an earlier (or
	/// concurrent) call to [`initialize`].
	///
	/// [`initialize`]: ../struct.Agent.html#method.initialize
	AlreadyInitialized,

	/// The operation requires an initialised protocol header.
	NotInitialized,

	/// The in-memory buffer cannot hold the protocol header.
	BufferTooSmall,

	/// The data store (or the trace hardware behind it) failed to
	/// initialise.
	StoreInit,

	/// PMU families cannot be changed once sampling has been enabled.
	SamplingStarted,

	/// The PMU family table is full.
	///
	/// See [`AgentConfig::set_max_pmu_families`].
	///
	/// [`AgentConfig::set_max_pmu_families`]: ../config/struct.AgentConfig.html#method.set_max_pmu_families
	FamilyTableFull,

	/// A PMU family with the same MIDR already covers one of the requested
	/// cores.
	OverlappingCores,

	/// The task or memory map table is full, or disabled.
	TableFull,

	/// The core number is outside `[0, max_cores)`.
	CoreOutOfRange,

	/// The counter driver failed to program the counters.
	DriverInit,

	/// The per-core PMU settings have already been written.
	SettingsWritten,

	/// The host does not provide the facilities needed by the platform.
	Unsupported,
}

impl ErrorKind {
	fn description(&self) -> &'static str {
		match *self {
			ErrorKind::InvalidClock => "clock multiplier and divisor cannot be zero",
			ErrorKind::AlreadyInitialized => "protocol cannot be initialized twice",
			ErrorKind::NotInitialized => "protocol not initialized",
			ErrorKind::BufferTooSmall => "buffer too small for the protocol header",
			ErrorKind::StoreInit => "data store failed to initialize",
			ErrorKind::SamplingStarted => "sampling already started",
			ErrorKind::FamilyTableFull => "no space for another PMU family",
			ErrorKind::OverlappingCores => "overlapping core sets for the same MIDR",
			ErrorKind::TableFull => "table full",
			ErrorKind::CoreOutOfRange => "core number out of range",
			ErrorKind::DriverInit => "counter driver failed to initialize",
			ErrorKind::SettingsWritten => "PMU settings already written",
			ErrorKind::Unsupported => "unsupported platform",
			ErrorKind::Unknown => "unknown error",
		}
	}
}

impl error::Error for Error {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		match self.cause {
			None => None,
			Some(ref b) => Some(b.as_ref()),
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self.cause {
			None => write!(f, "{}", self.kind.description()),
			Some(ref cause) => write!(f, "{}: {}", self.kind.description(), cause),
		}
	}
}

#[doc(hidden)]
impl PartialEq for Error {
	fn eq(&self, other: &Error) -> bool {
		self.kind == other.kind
	}
}

impl Error {
	pub fn kind(&self) -> &ErrorKind {
		&self.kind
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Self {
		new_error(kind)
	}
}

pub(crate) fn new_os_error(kind: ErrorKind) -> Error {
	// Get the last OS error to reference as the cause
	Error {
		kind,
		cause: Some(Box::new(io::Error::last_os_error())),
	}
}

pub(crate) fn new_error(kind: ErrorKind) -> Error {
	Error { kind, cause: None }
}
