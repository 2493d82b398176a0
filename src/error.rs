// Copyright (C) 2020-2021 Parity Technologies (UK) Ltd. & Centrality Investments Ltd
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Cross-chain coordination core errors
//!
//! Validation and decode errors are surfaced to callers; everything else below
//! is logged and recovered locally per the propagation policy.

use alloy_primitives::{Address, B256};

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum Error {
	/// Content hash mismatch between a new signature and an existing aggregate.
	#[error("signature does not match the aggregate's content hash")]
	InvalidSign,

	/// The signature's `r` value is already present in the aggregate.
	#[error("duplicate signature from an already-recorded anchor")]
	DuplicateSign,

	/// `v`/`r`/`s` arrays disagree in length; the aggregate is corrupt.
	#[error("signature array length mismatch: v={v} r={r} s={s}")]
	SignatureArityMismatch { v: usize, r: usize, s: usize },

	/// Signer recovered from `(v, r, s)` is not in the anchor set for the destination chain.
	#[error("signer {0:?} is not a registered anchor for this destination chain")]
	UnknownSigner(Address),

	/// No `(anchors, signConfirm)` registration exists for the destination chain id.
	#[error("destination chain {0} is not registered")]
	UnknownChain(u64),

	/// A message from the inter-chain channel targeted a different network.
	#[error("destination id {got} does not match local network id {want}")]
	WrongDestination { got: u64, want: u64 },

	/// Signature recovery failed (malformed `r`/`s`, or secp256k1 rejected it).
	#[error("failed to recover signer: {0}")]
	RecoveryFailed(String),

	/// Wire decode of a peer message payload failed.
	#[error("failed to decode message body: {0}")]
	Decode(String),

	/// An unrecognised peer message code.
	#[error("invalid message code: {0}")]
	InvalidMsgCode(u8),

	/// Id not present in the requested pool.
	#[error("unknown id: {0:?}")]
	NotFound(B256),

	/// Finish-driven cleanup could not remove from one or both stores.
	#[error("store cleanup failed: {0}")]
	CleanupFailed(String),

	/// The local anchor keystore has no usable signing key.
	#[error("keystore error: {0}")]
	Keystore(String),

	/// Attempted to move an aggregate's status backward.
	#[error("status cannot move backward: {from} -> {to}")]
	NonMonotoneStatus { from: String, to: String },

	/// The gas estimator declined to estimate (reverted call, or no answer).
	#[error("gas estimate unavailable for destination call")]
	GasEstimateUnavailable,
}

pub type Result<T> = std::result::Result<T, Error>;
