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

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;

/// Concurrent id -> item map, read-mostly. Mirrors `rwsLookup`/`txLookup`: callers
/// outside the owning pool may peek without taking the pool's wider lock.
pub struct Lookup<Id, T> {
	all: RwLock<HashMap<Id, T>>,
}

impl<Id: Eq + Hash + Clone, T: Clone> Lookup<Id, T> {
	pub fn new() -> Self {
		Self { all: RwLock::new(HashMap::new()) }
	}

	pub fn get(&self, id: &Id) -> Option<T> {
		self.all.read().get(id).cloned()
	}

	pub fn contains(&self, id: &Id) -> bool {
		self.all.read().contains_key(id)
	}

	pub fn insert(&self, id: Id, item: T) {
		self.all.write().insert(id, item);
	}

	pub fn remove(&self, id: &Id) -> Option<T> {
		self.all.write().remove(id)
	}

	pub fn count(&self) -> usize {
		self.all.read().len()
	}

	/// Snapshot of every item currently stored, for heap rebuilds.
	pub fn all_items(&self) -> Vec<T> {
		self.all.read().values().cloned().collect()
	}
}

impl<Id: Eq + Hash + Clone, T: Clone> Default for Lookup<Id, T> {
	fn default() -> Self {
		Self::new()
	}
}
