// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Control requests sent to the consumer thread. Every request is acknowledged once the consumer
//! has acted on it.

use std::sync::mpsc;

use sync::Mutex;

use crate::error::Error;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start or resume decoding.
    Run,
    /// Stop pulling data from the ring buffer until the next `Run`.
    Pause,
    /// Exit the consumer loop.
    Stop,
}

pub(crate) struct Request {
    pub command: Command,
    reply: mpsc::Sender<()>,
}

impl Request {
    /// Acknowledges the request. The sender may have given up waiting, which is not an error.
    pub fn reply(self) {
        let _ = self.reply.send(());
    }
}

pub(crate) struct CommandSender {
    requests: Mutex<mpsc::Sender<Request>>,
}

impl CommandSender {
    /// Sends `command` and waits until the consumer acknowledges it.
    pub fn send(&self, command: Command) -> Result<()> {
        let (reply, ack) = mpsc::channel();
        self.requests
            .lock()
            .send(Request { command, reply })
            .map_err(|_| Error::WorkerGone)?;
        ack.recv().map_err(|_| Error::WorkerGone)
    }
}

pub(crate) struct CommandReceiver {
    requests: mpsc::Receiver<Request>,
}

impl CommandReceiver {
    /// Returns the next pending request without blocking.
    pub fn try_recv(&self) -> Option<Request> {
        self.requests.try_recv().ok()
    }
}

pub(crate) fn channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel();
    (
        CommandSender {
            requests: Mutex::new(tx),
        },
        CommandReceiver { requests: rx },
    )
}
