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

//! The local anchor's signing key, wrapped as a `Newtype` the same way the teacher
//! wraps its `SyncCryptoStorePtr`, but backed directly by `libsecp256k1` instead of
//! a runtime-hosted keystore — this crate has no runtime to host one.

use alloy_primitives::{keccak256, Address, B256};
use libsecp256k1::{Message, PublicKey, RecoveryId, SecretKey, Signature};

use crate::error::{Error, Result};

/// A newtype around an optional local signing key. `None` models a non-anchor node:
/// it can still store and relay, but every signing call fails with `Error::Keystore`.
pub struct AnchorKeystore(Option<SecretKey>);

impl AnchorKeystore {
	pub fn new(key: SecretKey) -> Self {
		Self(Some(key))
	}

	/// A keystore with no local key, for non-anchor nodes.
	pub fn none() -> Self {
		Self(None)
	}

	pub fn is_anchor(&self) -> bool {
		self.0.is_some()
	}

	/// The Ethereum-style address derived from the local key, if any.
	pub fn address(&self) -> Option<Address> {
		self.0.as_ref().map(|key| public_key_to_address(&PublicKey::from_secret_key(key)))
	}

	/// Sign `digest` (already the content hash, not re-hashed here) with the local
	/// key. Returns `(v, r, s)` in the legacy Ethereum encoding: `v` is `27` or `28`
	/// before any EIP-155 chain-id offset is applied by the caller.
	pub fn sign(&self, digest: B256) -> Result<(u64, B256, B256)> {
		let key = self.0.as_ref().ok_or_else(|| Error::Keystore("no local anchor key".to_string()))?;
		let message = Message::parse(digest.as_ref());
		let (signature, recovery_id) = libsecp256k1::sign(&message, key);
		let bytes = signature.serialize();
		let r = B256::from_slice(&bytes[0..32]);
		let s = B256::from_slice(&bytes[32..64]);
		let v = 27u64 + recovery_id.serialize() as u64;
		Ok((v, r, s))
	}
}

/// Recover the signer's address from a `(v, r, s)` signature over `digest`. `v` may
/// carry an EIP-155 offset (`chain_id * 2 + 35/36`); it is normalized back to the
/// `0/1` recovery id before recovery, matching `go-simplechain`'s `types.Sender`.
pub fn recover_signer(digest: B256, v: u64, r: B256, s: B256) -> Result<Address> {
	let recovery_id = normalize_recovery_id(v)?;
	let mut sig_bytes = [0u8; 64];
	sig_bytes[0..32].copy_from_slice(r.as_slice());
	sig_bytes[32..64].copy_from_slice(s.as_slice());
	let signature =
		Signature::parse_standard(&sig_bytes).map_err(|e| Error::RecoveryFailed(format!("{e:?}")))?;
	let message = Message::parse(digest.as_ref());
	let public = libsecp256k1::recover(&message, &signature, &recovery_id)
		.map_err(|e| Error::RecoveryFailed(format!("{e:?}")))?;
	Ok(public_key_to_address(&public))
}

/// Derive the EIP-155 chain id encoded in `v`, if any. Legacy (non-EIP-155) `v`
/// values of `27`/`28` return `None`.
pub fn chain_id_from_v(v: u64) -> Option<u64> {
	if v >= 35 {
		Some((v - 35) / 2)
	} else {
		None
	}
}

fn normalize_recovery_id(v: u64) -> Result<RecoveryId> {
	let parity = if v >= 35 {
		(v - 35) % 2
	} else if v == 27 || v == 28 {
		v - 27
	} else {
		return Err(Error::RecoveryFailed(format!("unsupported v: {v}")));
	};
	RecoveryId::parse(parity as u8).map_err(|e| Error::RecoveryFailed(format!("{e:?}")))
}

fn public_key_to_address(public: &PublicKey) -> Address {
	let uncompressed = public.serialize();
	let hash = keccak256(&uncompressed[1..]);
	Address::from_slice(&hash[12..])
}

#[cfg(test)]
mod tests {
	use super::*;

	fn alice_key() -> SecretKey {
		SecretKey::parse(&[0x11; 32]).unwrap()
	}

	#[test]
	fn sign_then_recover_round_trips() {
		let key = alice_key();
		let keystore = AnchorKeystore::new(key);
		let address = keystore.address().unwrap();

		let digest = B256::repeat_byte(0x42);
		let (v, r, s) = keystore.sign(digest).unwrap();

		let recovered = recover_signer(digest, v, r, s).unwrap();
		assert_eq!(recovered, address);
	}

	#[test]
	fn eip155_v_is_normalized_before_recovery() {
		let key = alice_key();
		let keystore = AnchorKeystore::new(key);
		let address = keystore.address().unwrap();

		let digest = B256::repeat_byte(0x7);
		let (v, r, s) = keystore.sign(digest).unwrap();
		let parity = v - 27;
		let eip155_v = 1337u64 * 2 + 35 + parity;

		assert_eq!(chain_id_from_v(eip155_v), Some(1337));
		let recovered = recover_signer(digest, eip155_v, r, s).unwrap();
		assert_eq!(recovered, address);
	}

	#[test]
	fn no_key_fails_closed() {
		let keystore = AnchorKeystore::none();
		assert!(!keystore.is_anchor());
		assert!(keystore.sign(B256::repeat_byte(1)).is_err());
	}
}
