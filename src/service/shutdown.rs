// Copyright 2025 jonefeewang@gmail.com
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

use tokio::sync::broadcast;

/// Listens for the input-wide shutdown broadcast.
///
/// A lagged or dropped sender counts as shutdown, so a forwarding task never
/// outlives the input that spawned it.
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_marks_shutdown() {
        let (notify, _) = broadcast::channel(1);
        let mut shutdown = Shutdown::new(notify.subscribe());
        assert!(!shutdown.is_shutdown());

        notify.send(()).unwrap();
        shutdown.recv().await;
        assert!(shutdown.is_shutdown());

        // already shut down, returns immediately
        shutdown.recv().await;
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (notify, rx) = broadcast::channel::<()>(1);
        let mut shutdown = Shutdown::new(rx);
        drop(notify);
        shutdown.recv().await;
        assert!(shutdown.is_shutdown());
    }
}
