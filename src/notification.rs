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

//! Generic pub/sub notification channel, generalized from the teacher's
//! `EthySignedCommitmentSender`/`Stream` pair so the same machinery backs every
//! event subscription the pools and handler expose (`CWssResultEvent`,
//! `NewRWssEvent`, ...).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

type SharedSenders<T> = Arc<Mutex<Vec<UnboundedSender<T>>>>;

/// Sending endpoint for an event topic. Cheap to clone; every clone notifies the
/// same set of subscribers.
#[derive(Clone)]
pub struct NotificationSender<T: Clone> {
	subscribers: SharedSenders<T>,
}

/// Receiving endpoint for an event topic's subscriptions.
#[derive(Clone)]
pub struct NotificationStream<T: Clone> {
	subscribers: SharedSenders<T>,
}

impl<T: Clone> NotificationSender<T> {
	/// Notify every live subscriber, pruning closed ones first.
	pub fn notify(&self, event: T) {
		let mut subscribers = self.subscribers.lock();
		subscribers.retain(|s| !s.is_closed());
		if !subscribers.is_empty() {
			subscribers.retain(|s| s.send(event.clone()).is_ok());
		}
	}
}

impl<T: Clone> NotificationStream<T> {
	/// Create a fresh sender/stream pair sharing one subscriber list.
	pub fn channel() -> (NotificationSender<T>, Self) {
		let subscribers = Arc::new(Mutex::new(Vec::new()));
		(NotificationSender { subscribers: subscribers.clone() }, Self { subscribers })
	}

	/// Register a new subscription and return its receiving half.
	pub fn subscribe(&self) -> UnboundedReceiver<T> {
		let (sender, receiver) = mpsc::unbounded_channel();
		self.subscribers.lock().push(sender);
		receiver
	}
}
