//! Calls the server made to the client that have not been answered yet.

use std::collections::HashMap;

use serde_json::Value;
use tether_core::{CallError, RequestId};
use tokio::sync::oneshot;

type Resolver = oneshot::Sender<Result<Value, CallError>>;

/// Request id to resolver. Each entry is settled exactly once.
#[derive(Default)]
pub(crate) struct PendingCallTable {
    next: u64,
    calls: HashMap<RequestId, Resolver>,
}

impl PendingCallTable {
    /// Allocate the next request id and park `resolver` under it.
    pub(crate) fn register(&mut self, resolver: Resolver) -> RequestId {
        let id = RequestId::server(self.next);
        self.next += 1;
        let _ = self.calls.insert(id.clone(), resolver);
        id
    }

    /// Settle the call `id`. Returns `false` if no such call is pending.
    pub(crate) fn resolve(&mut self, id: &RequestId, result: Result<Value, CallError>) -> bool {
        match self.calls.remove(id) {
            Some(resolver) => {
                // The caller may have stopped waiting; that is fine.
                let _ = resolver.send(result);
                true
            }
            None => false,
        }
    }

    /// Settle every pending call with `err`.
    pub(crate) fn reject_all(&mut self, err: &CallError) -> usize {
        let count = self.calls.len();
        for (_, resolver) in self.calls.drain() {
            let _ = resolver.send(Err(err.clone()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}
