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

/// Fields common to `RecTx`/`RecTxWithSigs` — the destination-chain receipt mirror of
/// `CrossTxData`, with the `blockNumber`/`index` pair the inbound pool orders on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecTxData {
	pub value: U256,
	pub ctx_id: B256,
	pub tx_hash: B256,
	pub block_hash: B256,
	pub from: Address,
	pub to: Address,
	pub dest_id: u64,
	pub dest_value: U256,
	pub input: Vec<u8>,
	/// Destination-chain block the receipt was observed in; orders the inbound heap.
	pub block_number: u64,
	/// Position within `block_number`; the heap's tie-breaker.
	pub index: u64,
}

impl RecTxData {
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

impl codec::Encode for RecTxData {
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
		self.block_number.encode_to(dest);
		self.index.encode_to(dest);
	}
}

impl codec::Decode for RecTxData {
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
			block_number: u64::decode(input)?,
			index: u64::decode(input)?,
		})
	}
}

/// A single-signature inbound receipt.
#[derive(Debug, Clone)]
pub struct RecTx {
	pub data: RecTxData,
	pub v: u64,
	pub r: B256,
	pub s: B256,
	hash: OnceCell<B256>,
	sign_hash: OnceCell<B256>,
}

impl RecTx {
	pub fn new(data: RecTxData, v: u64, r: B256, s: B256) -> Self {
		Self { data, v, r, s, hash: OnceCell::new(), sign_hash: OnceCell::new() }
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

impl PartialEq for RecTx {
	fn eq(&self, other: &Self) -> bool {
		self.data == other.data && self.v == other.v && self.r == other.r && self.s == other.s
	}
}
impl Eq for RecTx {}

impl codec::Encode for RecTx {
	fn encode_to<O: codec::Output + ?Sized>(&self, dest: &mut O) {
		self.data.encode_to(dest);
		self.v.encode_to(dest);
		encode_b256(&self.r, dest);
		encode_b256(&self.s, dest);
	}
}

impl codec::Decode for RecTx {
	fn decode<I: codec::Input>(input: &mut I) -> core::result::Result<Self, codec::Error> {
		let data = RecTxData::decode(input)?;
		let v = u64::decode(input)?;
		let r = decode_b256(input)?;
		let s = decode_b256(input)?;
		Ok(RecTx::new(data, v, r, s))
	}
}

/// An aggregated `RecTx` carrying every anchor signature collected so far.
#[derive(Debug, Clone)]
pub struct RecTxWithSigs {
	pub data: RecTxData,
	v: Vec<u64>,
	r: Vec<B256>,
	s: Vec<B256>,
	pub status: Status,
	hash: OnceCell<B256>,
}

impl RecTxWithSigs {
	pub fn new(rtx: &RecTx) -> Self {
		Self {
			data: rtx.data.clone(),
			v: vec![rtx.v],
			r: vec![rtx.r],
			s: vec![rtx.s],
			status: Status::Waiting,
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

	/// Ordering key for the inbound min-heap: ascending `(blockNumber, index)`.
	pub fn order_key(&self) -> (u64, u64) {
		(self.data.block_number, self.data.index)
	}

	pub fn price(&self) -> Price {
		Price::new(self.data.dest_value, self.data.value)
	}

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

	pub fn add_signature(&mut self, rtx: &RecTx) -> Result<()> {
		if self.content_hash() != rtx.content_hash() {
			return Err(Error::InvalidSign);
		}
		if self.r.contains(&rtx.r) {
			return Err(Error::DuplicateSign);
		}
		self.v.push(rtx.v);
		self.r.push(rtx.r);
		self.s.push(rtx.s);
		Ok(())
	}

	pub fn remove_signature(&mut self, index: usize) {
		if index < self.v.len() {
			self.v.remove(index);
			self.r.remove(index);
			self.s.remove(index);
		}
	}

	pub fn set_status(&mut self, next: Status) -> Result<()> {
		self.status = self.status.advance(next)?;
		Ok(())
	}

	pub fn resolution(&self) -> Result<Vec<RecTx>> {
		let n = self.signature_count()?;
		Ok((0..n)
			.map(|i| RecTx::new(self.data.clone(), self.v[i], self.r[i], self.s[i]))
			.collect())
	}
}

impl codec::Encode for RecTxWithSigs {
	fn encode_to<O: codec::Output + ?Sized>(&self, dest: &mut O) {
		self.data.encode_to(dest);
		self.v.encode_to(dest);
		encode_b256_vec(&self.r, dest);
		encode_b256_vec(&self.s, dest);
		self.status.encode_to(dest);
	}
}

impl codec::Decode for RecTxWithSigs {
	fn decode<I: codec::Input>(input: &mut I) -> core::result::Result<Self, codec::Error> {
		Ok(Self {
			data: RecTxData::decode(input)?,
			v: Vec::<u64>::decode(input)?,
			r: decode_b256_vec(input)?,
			s: decode_b256_vec(input)?,
			status: Status::decode(input)?,
			hash: OnceCell::new(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_data(ctx_id: u8, block_number: u64, index: u64) -> RecTxData {
		RecTxData {
			value: U256::from(100u64),
			ctx_id: B256::repeat_byte(ctx_id),
			tx_hash: B256::repeat_byte(0xAA),
			block_hash: B256::repeat_byte(0xBB),
			from: Address::repeat_byte(0x01),
			to: Address::repeat_byte(0x02),
			dest_id: 7,
			dest_value: U256::from(200u64),
			input: vec![],
			block_number,
			index,
		}
	}

	#[test]
	fn order_key_matches_block_number_then_index() {
		let rtx = RecTx::new(sample_data(1, 10, 3), 27, B256::repeat_byte(1), B256::repeat_byte(2));
		let rws = RecTxWithSigs::new(&rtx);
		assert_eq!(rws.order_key(), (10, 3));
	}

	#[test]
	fn add_signature_rejects_duplicate_r() {
		let rtx = RecTx::new(sample_data(1, 10, 3), 27, B256::repeat_byte(1), B256::repeat_byte(2));
		let mut rws = RecTxWithSigs::new(&rtx);
		let dup = RecTx::new(sample_data(1, 10, 3), 28, B256::repeat_byte(1), B256::repeat_byte(9));
		assert_eq!(rws.add_signature(&dup), Err(Error::DuplicateSign));
	}

	#[test]
	fn resolution_round_trips() {
		let rtx = RecTx::new(sample_data(1, 10, 3), 27, B256::repeat_byte(1), B256::repeat_byte(2));
		let mut rws = RecTxWithSigs::new(&rtx);
		let second = RecTx::new(sample_data(1, 10, 3), 28, B256::repeat_byte(3), B256::repeat_byte(4));
		rws.add_signature(&second).unwrap();

		let resolved = rws.resolution().unwrap();
		assert_eq!(resolved.len(), 2);
		let mut rebuilt = RecTxWithSigs::new(&resolved[0]);
		rebuilt.add_signature(&resolved[1]).unwrap();
		assert_eq!(rebuilt.content_hash(), rws.content_hash());
	}
}
