// Copyright 2023 The Arbor Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for chain
use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Display};

/// Error definition
#[derive(Debug)]
pub struct Error {
	inner: Context<ErrorKind>,
}

/// Chain error definitions
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	/// The proof of space does not verify for its challenge
	#[fail(display = "Invalid Proof of Space")]
	InvalidProofOfSpace,
	/// A foliage or signage point signature does not verify
	#[fail(display = "Invalid Foliage Signature")]
	InvalidFoliageSignature,
	/// A VDF output fails against its witness
	#[fail(display = "Invalid VDF")]
	InvalidVdf,
	/// Finished sub-slots do not chain into each other
	#[fail(display = "Invalid Sub-Slot Linkage")]
	InvalidSubSlotLinkage,
	/// Block height is not previous + 1
	#[fail(display = "Invalid Block Height")]
	InvalidBlockHeight,
	/// Claimed total iterations disagree with the recomputed value
	#[fail(display = "Invalid Total Iters")]
	InvalidTotalIters,
	/// Claimed weight disagrees with the recomputed value
	#[fail(display = "Invalid Weight")]
	InvalidWeight,
	/// Signage point index outside the sub-slot
	#[fail(display = "Invalid Signage Point Index: {}", _0)]
	InvalidSignagePointIndex(u8),
	/// More sub-blocks in a sub-slot than the consensus cap
	#[fail(display = "Too Many Sub-Blocks in Sub-Slot")]
	TooManySubBlocksInSlot,
	/// An overflow sub-block in the first sub-slot of a new epoch
	#[fail(display = "Overflow Sub-Block in New Epoch")]
	OverflowInNewEpoch,
	/// The previous sub-block is not in our chain
	#[fail(display = "Invalid Prev Block Hash")]
	InvalidPrevBlockHash,
	/// Pre-farm pool target on a non-genesis parent without a pool signature
	#[fail(display = "Invalid Pool Target")]
	InvalidPoolTarget,
	/// The block was processed before
	#[fail(display = "Already Processed")]
	AlreadyProcessed,
	/// Another task committed a conflicting change first
	#[fail(display = "Race Lost")]
	RaceLost,
	/// A weight proof failed validation
	#[fail(display = "Invalid Weight Proof: {}", _0)]
	InvalidWeightProof(String),
	/// Something the chain expected to hold is missing
	#[fail(display = "Not Found: {}", _0)]
	NotFound(String),
	/// Internal issue when trying to save or load data from store
	#[fail(display = "Store Error: {}", _0)]
	StoreErr(String),
	/// Anything else
	#[fail(display = "Other Error: {}", _0)]
	Other(String),
}

impl Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		Display::fmt(&self.inner, f)
	}
}

impl Error {
	/// get kind
	pub fn kind(&self) -> ErrorKind {
		self.inner.get_context().clone()
	}
	/// get cause
	pub fn cause(&self) -> Option<&dyn Fail> {
		self.inner.cause()
	}
	/// get backtrace
	pub fn backtrace(&self) -> Option<&Backtrace> {
		self.inner.backtrace()
	}
}

impl ErrorKind {
	/// Whether the error proves the sender handed us intrinsically bad data,
	/// in which case the caller should drop the connection.
	pub fn requires_disconnect(&self) -> bool {
		// shorter to match on all the "not the sender's fault" errors
		match self {
			ErrorKind::InvalidPrevBlockHash
			| ErrorKind::AlreadyProcessed
			| ErrorKind::RaceLost
			| ErrorKind::NotFound(_)
			| ErrorKind::StoreErr(_)
			| ErrorKind::Other(_) => false,
			_ => true,
		}
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Error {
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<Context<ErrorKind>> for Error {
	fn from(inner: Context<ErrorKind>) -> Error {
		Error { inner }
	}
}
