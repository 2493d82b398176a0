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

use alloy_primitives::{keccak256, Address, B256, U256};
use codec::{Decode, Encode};
use once_cell::sync::OnceCell;

use super::{
	decode_address, decode_b256, decode_b256_vec, decode_u256, encode_address, encode_b256, encode_b256_vec, encode_u256,
	pad32_u256, pad32_u64, Status,
};
use crate::error::{Error, Result};
use crate::price::Price;

/// Fields common to `CrossTx` and `CrossTxWithSigs` — everything except the signature(s).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossTxData {
	/// Tokens offered on the origin chain.
	pub value: U256,
	/// Globally unique id generated by the origin contract.
	pub ctx_id: B256,
	/// Origin-chain transaction hash.
	pub tx_hash: B256,
	/// Origin-chain block hash the maker event was observed in.
	pub block_hash: B256,
	/// Token owner.
	pub from: Address,
	/// Recipient.
	pub to: Address,
	/// Destination chain id.
	pub dest_id: u64,
	/// Tokens requested on the destination chain.
	pub dest_value: U256,
	/// Opaque payload forwarded to the destination contract.
	pub input: Vec<u8>,
}

impl CrossTxData {
	/// `keccak256(pad32(value) || ctxId || txHash || from || to || blockHash ||
	/// pad32(destId) || pad32(destValue) || input)`, per spec §4.1.
	pub(crate) fn content_hash(&self) -> B256 {
		let mut buf = Vec::with_capacity(32 * 6 + 20 * 2 + self.input.len());
		buf.extend_from_slice(&pad32_u256(self.value));
		buf.extend_from_slice(self.ctx_id.as_slice());
		buf.extend_from_slice(self.tx_hash.as_slice());
		buf.extend_from_slice(self.from.as_slice());
		buf.extend_from_slice(self.to.as_slice());
		buf.extend_from_slice(self.block_hash.as_slice());
		buf.extend_from_slice(&pad32_u64(self.dest_id));
		buf.extend_from_slice(&pad32_u256(self.dest_value));
		buf.extend_from_slice(&self.input);
		keccak256(&buf)
	}
}

impl codec::Encode for CrossTxData {
	fn encode_to<O: codec::Output + ?Sized>(&self, dest: &mut O) {
		encode_u256(&self.value, dest);
		encode_b256(&self.ctx_id, dest);
		encode_b256(&self.tx_hash, dest);
		encode_b256(&self.block_hash, dest);
		encode_address(&self.from, dest);
		encode_address(&self.to, dest);
		self.dest_id.encode_to(dest);
		encode_u256(&self.dest_value, dest);
		self.input.encode_to(dest);
	}
}

impl codec::Decode for CrossTxData {
	fn decode<I: codec::Input>(input: &mut I) -> core::result::Result<Self, codec::Error> {
		Ok(Self {
			value: decode_u256(input)?,
			ctx_id: decode_b256(input)?,
			tx_hash: decode_b256(input)?,
			block_hash: decode_b256(input)?,
			from: decode_address(input)?,
			to: decode_address(input)?,
			dest_id: u64::decode(input)?,
			dest_value: decode_u256(input)?,
			input: Vec::<u8>::decode(input)?,
		})
	}
}

/// A single-signature outbound cross-chain intent.
#[derive(Debug, Clone)]
pub struct CrossTx {
	pub data: CrossTxData,
	pub v: u64,
	pub r: B256,
	pub s: B256,
	hash: OnceCell<B256>,
	sign_hash: OnceCell<B256>,
}

impl CrossTx {
	pub fn new(data: CrossTxData, v: u64, r: B256, s: B256) -> Self {
		Self { data, v, r, s, hash: OnceCell::new(), sign_hash: OnceCell::new() }
	}

	pub fn id(&self) -> B256 {
		self.data.ctx_id
	}

	pub fn dest_id(&self) -> u64 {
		self.data.dest_id
	}

	/// Content hash over all non-signature fields; memoized on first computation.
	pub fn content_hash(&self) -> B256 {
		*self.hash.get_or_init(|| self.data.content_hash())
	}

	/// `content_hash() || pad32(v) || r || s`, used as a per-message gossip dedup key
	/// (the source's `SignHash`), distinct from the digest that is actually signed.
	pub fn sign_hash(&self) -> B256 {
		*self.sign_hash.get_or_init(|| {
			let mut buf = Vec::with_capacity(96);
			buf.extend_from_slice(self.content_hash().as_slice());
			buf.extend_from_slice(&pad32_u64(self.v));
			buf.extend_from_slice(self.r.as_slice());
			buf.extend_from_slice(self.s.as_slice());
			keccak256(&buf)
		})
	}
}

impl PartialEq for CrossTx {
	fn eq(&self, other: &Self) -> bool {
		self.data == other.data && self.v == other.v && self.r == other.r && self.s == other.s
	}
}
impl Eq for CrossTx {}

impl codec::Encode for CrossTx {
	fn encode_to<O: codec::Output + ?Sized>(&self, dest: &mut O) {
		self.data.encode_to(dest);
		self.v.encode_to(dest);
		encode_b256(&self.r, dest);
		encode_b256(&self.s, dest);
	}
}

impl codec::Decode for CrossTx {
	fn decode<I: codec::Input>(input: &mut I) -> core::result::Result<Self, codec::Error> {
		let data = CrossTxData::decode(input)?;
		let v = u64::decode(input)?;
		let r = decode_b256(input)?;
		let s = decode_b256(input)?;
		Ok(CrossTx::new(data, v, r, s))
	}
}

/// An aggregated `CrossTx` carrying every anchor signature collected so far.
#[derive(Debug, Clone)]
pub struct CrossTxWithSigs {
	pub data: CrossTxData,
	v: Vec<u64>,
	r: Vec<B256>,
	s: Vec<B256>,
	pub status: Status,
	pub block_num: u64,
	hash: OnceCell<B256>,
}

impl CrossTxWithSigs {
	/// Start a new aggregate from a single signed `CrossTx` (the source's
	/// `NewCrossTransactionWithSignatures`).
	pub fn new(ctx: &CrossTx, block_num: u64) -> Self {
		Self {
			data: ctx.data.clone(),
			v: vec![ctx.v],
			r: vec![ctx.r],
			s: vec![ctx.s],
			status: Status::Waiting,
			block_num,
			hash: OnceCell::new(),
		}
	}

	pub fn id(&self) -> B256 {
		self.data.ctx_id
	}

	pub fn dest_id(&self) -> u64 {
		self.data.dest_id
	}

	pub fn content_hash(&self) -> B256 {
		*self.hash.get_or_init(|| self.data.content_hash())
	}

	/// `destValue / value`, sentinel-max when `value == 0`.
	pub fn price(&self) -> Price {
		Price::new(self.data.dest_value, self.data.value)
	}

	/// Enforces invariant 2 of §3.2: the three signature arrays must agree in length.
	/// A disagreement here means in-memory corruption, not a recoverable input error,
	/// so it is a hard error rather than the source's silent `0`.
	pub fn signature_count(&self) -> Result<usize> {
		if self.v.len() == self.r.len() && self.r.len() == self.s.len() {
			Ok(self.v.len())
		} else {
			Err(Error::SignatureArityMismatch { v: self.v.len(), r: self.r.len(), s: self.s.len() })
		}
	}

	pub fn signatures(&self) -> impl Iterator<Item = (u64, B256, B256)> + '_ {
		self.v.iter().copied().zip(self.r.iter().copied()).zip(self.s.iter().copied()).map(|((v, r), s)| (v, r, s))
	}

	/// Validate and append `ctx`'s signature. Rejects a content-hash mismatch as
	/// `InvalidSign` and a repeated `r` as `DuplicateSign`.
	pub fn add_signature(&mut self, ctx: &CrossTx) -> Result<()> {
		if self.content_hash() != ctx.content_hash() {
			return Err(Error::InvalidSign);
		}
		if self.r.contains(&ctx.r) {
			return Err(Error::DuplicateSign);
		}
		self.v.push(ctx.v);
		self.r.push(ctx.r);
		self.s.push(ctx.s);
		Ok(())
	}

	/// Remove the `index`-th signature from all three parallel arrays.
	pub fn remove_signature(&mut self, index: usize) {
		if index < self.v.len() {
			self.v.remove(index);
			self.r.remove(index);
			self.s.remove(index);
		}
	}

	/// Advance `status` forward; rejects any attempt to move it backward.
	pub fn set_status(&mut self, next: Status) -> Result<()> {
		self.status = self.status.advance(next)?;
		Ok(())
	}

	/// Split the aggregate back into one `CrossTx` per collected signature. Each one
	/// re-aggregates to an equivalent bundle via `add_signature`.
	pub fn resolution(&self) -> Result<Vec<CrossTx>> {
		let n = self.signature_count()?;
		Ok((0..n)
			.map(|i| CrossTx::new(self.data.clone(), self.v[i], self.r[i], self.s[i]))
			.collect())
	}
}

impl codec::Encode for CrossTxWithSigs {
	fn encode_to<O: codec::Output + ?Sized>(&self, dest: &mut O) {
		self.data.encode_to(dest);
		self.v.encode_to(dest);
		encode_b256_vec(&self.r, dest);
		encode_b256_vec(&self.s, dest);
		self.status.encode_to(dest);
		self.block_num.encode_to(dest);
	}
}

impl codec::Decode for CrossTxWithSigs {
	fn decode<I: codec::Input>(input: &mut I) -> core::result::Result<Self, codec::Error> {
		Ok(Self {
			data: CrossTxData::decode(input)?,
			v: Vec::<u64>::decode(input)?,
			r: decode_b256_vec(input)?,
			s: decode_b256_vec(input)?,
			status: Status::decode(input)?,
			block_num: u64::decode(input)?,
			hash: OnceCell::new(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_data(ctx_id: u8, value: u64, dest_value: u64) -> CrossTxData {
		CrossTxData {
			value: U256::from(value),
			ctx_id: B256::repeat_byte(ctx_id),
			tx_hash: B256::repeat_byte(0xAA),
			block_hash: B256::repeat_byte(0xBB),
			from: Address::repeat_byte(0x01),
			to: Address::repeat_byte(0x02),
			dest_id: 7,
			dest_value: U256::from(dest_value),
			input: vec![1, 2, 3],
		}
	}

	#[test]
	fn content_hash_is_deterministic_and_ignores_signature() {
		let data = sample_data(1, 100, 200);
		let a = CrossTx::new(data.clone(), 27, B256::repeat_byte(1), B256::repeat_byte(2));
		let b = CrossTx::new(data, 28, B256::repeat_byte(3), B256::repeat_byte(4));
		assert_eq!(a.content_hash(), b.content_hash());
		assert_ne!(a.sign_hash(), b.sign_hash());
	}

	#[test]
	fn add_signature_rejects_mismatched_content() {
		let ctx = CrossTx::new(sample_data(1, 100, 200), 27, B256::repeat_byte(1), B256::repeat_byte(2));
		let mut cws = CrossTxWithSigs::new(&ctx, 10);

		let other = CrossTx::new(sample_data(1, 100, 300), 27, B256::repeat_byte(5), B256::repeat_byte(6));
		assert_eq!(cws.add_signature(&other), Err(Error::InvalidSign));
	}

	#[test]
	fn add_signature_rejects_duplicate_r() {
		let ctx = CrossTx::new(sample_data(1, 100, 200), 27, B256::repeat_byte(1), B256::repeat_byte(2));
		let mut cws = CrossTxWithSigs::new(&ctx, 10);

		let dup = CrossTx::new(sample_data(1, 100, 200), 28, B256::repeat_byte(1), B256::repeat_byte(9));
		assert_eq!(cws.add_signature(&dup), Err(Error::DuplicateSign));
	}

	#[test]
	fn resolution_round_trips() {
		let ctx = CrossTx::new(sample_data(1, 100, 200), 27, B256::repeat_byte(1), B256::repeat_byte(2));
		let mut cws = CrossTxWithSigs::new(&ctx, 10);
		let second = CrossTx::new(sample_data(1, 100, 200), 28, B256::repeat_byte(3), B256::repeat_byte(4));
		cws.add_signature(&second).unwrap();

		let resolved = cws.resolution().unwrap();
		assert_eq!(resolved.len(), 2);

		let mut rebuilt = CrossTxWithSigs::new(&resolved[0], 10);
		rebuilt.add_signature(&resolved[1]).unwrap();
		assert_eq!(rebuilt.content_hash(), cws.content_hash());
		assert_eq!(rebuilt.signature_count().unwrap(), cws.signature_count().unwrap());
	}

	#[test]
	fn status_cannot_move_backward() {
		let ctx = CrossTx::new(sample_data(1, 100, 200), 27, B256::repeat_byte(1), B256::repeat_byte(2));
		let mut cws = CrossTxWithSigs::new(&ctx, 10);
		cws.set_status(Status::Executing).unwrap();
		assert!(cws.set_status(Status::Waiting).is_err());
		cws.set_status(Status::Finishing).unwrap();
		cws.set_status(Status::Finished).unwrap();
	}

	#[test]
	fn zero_value_price_is_sentinel_max() {
		let ctx = CrossTx::new(sample_data(1, 0, 200), 27, B256::repeat_byte(1), B256::repeat_byte(2));
		let cws = CrossTxWithSigs::new(&ctx, 10);
		let other_ctx = CrossTx::new(sample_data(2, 1, 1_000_000), 27, B256::repeat_byte(1), B256::repeat_byte(2));
		let other = CrossTxWithSigs::new(&other_ctx, 10);
		assert!(cws.price() > other.price());
	}
}
