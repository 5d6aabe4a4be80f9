// Copyright 2026 Daniel Pelikan
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

//! Timer service on tokio.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::{Inbound, InboundSender};
use crate::hfp::{Event, PeerAddress, TimerKind, TimerToken};

/// One sleeping task per (peer, kind). Expiries are posted to the inbox.
pub struct TokioTimers {
    tx: InboundSender,
    tasks: HashMap<(PeerAddress, TimerKind), (TimerToken, JoinHandle<()>)>,
}

impl TokioTimers {
    pub fn new(tx: InboundSender) -> Self {
        Self {
            tx,
            tasks: HashMap::new(),
        }
    }

    pub fn start(&mut self, token: TimerToken, after: Duration) {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Inbound::Peer {
                peer: token.peer,
                event: Event::TimerExpired(token),
            });
        });
        if let Some((_, previous)) = self.tasks.insert((token.peer, token.kind), (token, task)) {
            previous.abort();
        }
    }

    /// Stop the timer armed with `token`. A cancel for an older arming
    /// leaves the current one running.
    pub fn cancel(&mut self, token: TimerToken) {
        let key = (token.peer, token.kind);
        if self.tasks.get(&key).is_some_and(|(armed, _)| *armed == token) {
            if let Some((_, task)) = self.tasks.remove(&key) {
                debug!("Cancelling {:?} timer for {}", token.kind, token.peer);
                task.abort();
            }
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, (_, task)) in self.tasks.drain() {
            task.abort();
        }
    }
}
