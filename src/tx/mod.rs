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

//! Signed message types: `CrossTx`/`CrossTxWithSigs` (outbound) and `RecTx`/`RecTxWithSigs`
//! (inbound receipts), their deterministic content hashes, and per-message signature
//! aggregation. Grounded in `go-simplechain`'s `cross/core/cross_transaction.go`.

mod cross_tx;
mod rec_tx;

pub use cross_tx::{CrossTx, CrossTxData, CrossTxWithSigs};
pub use rec_tx::{RecTx, RecTxData, RecTxWithSigs};

use alloy_primitives::{Address, B256, U256};
use codec::{Decode, Encode};

/// Status of an aggregate cross-message. Transitions are monotone: a status may only
/// move forward through this list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, codec::Encode, codec::Decode)]
pub enum Status {
	Waiting,
	Executing,
	Finishing,
	Finished,
}

impl Status {
	/// Attempt to move to `next`. Rejects any non-forward transition.
	pub fn advance(self, next: Status) -> Result<Status, crate::error::Error> {
		if next >= self {
			Ok(next)
		} else {
			Err(crate::error::Error::NonMonotoneStatus { from: format!("{self:?}"), to: format!("{next:?}") })
		}
	}
}

/// Left-pad `value`'s big-endian bytes out to 32 bytes, matching the source's
/// `common.LeftPadBytes`.
pub(crate) fn pad32_u256(value: U256) -> [u8; 32] {
	value.to_be_bytes::<32>()
}

pub(crate) fn pad32_u64(value: u64) -> [u8; 32] {
	let mut out = [0u8; 32];
	out[24..].copy_from_slice(&value.to_be_bytes());
	out
}

/// Raw-byte codec helpers for the `alloy_primitives` fixed-width types used across
/// `CrossTx`/`RecTx` and their aggregates. `alloy-primitives` does not implement
/// `parity_scale_codec::{Encode, Decode}`, so the wire format for these fields is
/// written by hand instead of derived.
pub(crate) fn encode_b256<O: codec::Output + ?Sized>(value: &B256, dest: &mut O) {
	dest.write(value.as_slice());
}

pub(crate) fn decode_b256<I: codec::Input>(input: &mut I) -> core::result::Result<B256, codec::Error> {
	let mut buf = [0u8; 32];
	input.read(&mut buf)?;
	Ok(B256::from(buf))
}

pub(crate) fn encode_address<O: codec::Output + ?Sized>(value: &Address, dest: &mut O) {
	dest.write(value.as_slice());
}

pub(crate) fn decode_address<I: codec::Input>(input: &mut I) -> core::result::Result<Address, codec::Error> {
	let mut buf = [0u8; 20];
	input.read(&mut buf)?;
	Ok(Address::from(buf))
}

pub(crate) fn encode_u256<O: codec::Output + ?Sized>(value: &U256, dest: &mut O) {
	dest.write(&value.to_be_bytes::<32>());
}

pub(crate) fn decode_u256<I: codec::Input>(input: &mut I) -> core::result::Result<U256, codec::Error> {
	let mut buf = [0u8; 32];
	input.read(&mut buf)?;
	Ok(U256::from_be_bytes(buf))
}

pub(crate) fn encode_b256_vec<O: codec::Output + ?Sized>(values: &[B256], dest: &mut O) {
	codec::Compact(values.len() as u32).encode_to(dest);
	for value in values {
		encode_b256(value, dest);
	}
}

pub(crate) fn decode_b256_vec<I: codec::Input>(input: &mut I) -> core::result::Result<Vec<B256>, codec::Error> {
	let len = <codec::Compact<u32>>::decode(input)?.0 as usize;
	let mut out = Vec::with_capacity(len);
	for _ in 0..len {
		out.push(decode_b256(input)?);
	}
	Ok(out)
}
