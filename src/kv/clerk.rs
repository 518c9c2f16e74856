use std::time::Duration;

use async_trait::async_trait;
use tarpc::{client::RpcError, context};
use tokio::time::sleep;
use tracing::warn;

use crate::kv::{
    rpc::{GetReply, KvErr, PutReply},
    server::KvClient,
};

const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Narrow seam over the two RPC calls `Clerk` makes. The only production
/// implementor is `KvClient`; tests substitute a transport that fails
/// deterministically instead of relying on an actual dropped connection
/// to exercise the retry path.
#[async_trait]
pub trait KvRpc: Send + Sync {
    async fn get(&self, ctx: context::Context, key: String) -> Result<GetReply, RpcError>;
    async fn put(
        &self,
        ctx: context::Context,
        key: String,
        value: String,
        version: u64,
    ) -> Result<PutReply, RpcError>;
}

#[async_trait]
impl KvRpc for KvClient {
    async fn get(&self, ctx: context::Context, key: String) -> Result<GetReply, RpcError> {
        KvClient::get(self, ctx, key).await
    }

    async fn put(
        &self,
        ctx: context::Context,
        key: String,
        value: String,
        version: u64,
    ) -> Result<PutReply, RpcError> {
        KvClient::put(self, ctx, key, value, version).await
    }
}

/// Client-side stub that turns the underlying `tarpc` transport's
/// at-least-once delivery into the server's documented at-most-one-success
/// semantics. Transport failures are retried indefinitely and never
/// surface to callers; only server-reported outcomes do.
#[derive(Clone)]
pub struct Clerk<C: KvRpc + Clone = KvClient> {
    client: C,
}

impl<C: KvRpc + Clone> Clerk<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Returns `(value, version, err)`. `err` is `Ok` or `NoKey`; transport
    /// failures are retried forever and never reach the caller.
    pub async fn get(&self, key: &str) -> (String, u64, KvErr) {
        loop {
            match self.client.get(context::current(), key.to_string()).await {
                Ok(reply) => return (reply.value, reply.version, reply.err),
                Err(e) => {
                    warn!(key, error = %e, "get transport failure, retrying");
                    sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    /// `Ok`/`NoKey` are definite. A `Version` conflict on the first
    /// attempt is also definite: the Put never took effect. A `Version`
    /// conflict on a *retried* attempt is ambiguous — an earlier send
    /// may have applied and only its reply got lost — so it is reported
    /// as `Maybe` rather than `Version`.
    pub async fn put(&self, key: &str, value: &str, version: u64) -> KvErr {
        let mut retried = false;
        loop {
            let call = self
                .client
                .put(context::current(), key.to_string(), value.to_string(), version)
                .await;
            match call {
                Ok(reply) => {
                    if reply.err == KvErr::Version && retried {
                        return KvErr::Maybe;
                    }
                    return reply.err;
                }
                Err(e) => {
                    warn!(key, error = %e, "put transport failure, retrying");
                    retried = true;
                    sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::server::{Kv, KvServer};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Fails the first `fail_first_{get,put}` calls to each method with a
    /// transport error, then forwards to a real in-process `KvServer` so
    /// the eventual reply still reflects genuine server-side state.
    #[derive(Clone)]
    struct FlakyKvRpc {
        inner: KvServer,
        get_calls: Arc<AtomicUsize>,
        put_calls: Arc<AtomicUsize>,
        fail_first_get: usize,
        fail_first_put: usize,
    }

    impl FlakyKvRpc {
        fn new(fail_first_get: usize, fail_first_put: usize) -> Self {
            Self {
                inner: KvServer::new(),
                get_calls: Arc::new(AtomicUsize::new(0)),
                put_calls: Arc::new(AtomicUsize::new(0)),
                fail_first_get,
                fail_first_put,
            }
        }
    }

    #[async_trait]
    impl KvRpc for FlakyKvRpc {
        async fn get(&self, ctx: context::Context, key: String) -> Result<GetReply, RpcError> {
            let n = self.get_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_get {
                return Err(RpcError::Disconnected);
            }
            Ok(Kv::get(self.inner.clone(), ctx, key).await)
        }

        async fn put(
            &self,
            ctx: context::Context,
            key: String,
            value: String,
            version: u64,
        ) -> Result<PutReply, RpcError> {
            let n = self.put_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_put {
                return Err(RpcError::Disconnected);
            }
            Ok(Kv::put(self.inner.clone(), ctx, key, value, version).await)
        }
    }

    #[tokio::test]
    async fn get_retries_transport_failures_and_returns_server_reply() {
        let client = FlakyKvRpc::new(2, 0);
        let calls = client.get_calls.clone();
        let ck = Clerk::new(client);

        let (_, _, err) = ck.get("missing").await;
        assert_eq!(err, KvErr::NoKey);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn put_version_conflict_on_first_attempt_is_reported_as_version() {
        let ck = Clerk::new(FlakyKvRpc::new(0, 0));
        assert_eq!(ck.put("x", "1", 0).await, KvErr::Ok);

        // No transport failure happened, so this is a genuine first
        // attempt: the stale version must be reported as-is.
        let err = ck.put("x", "2", 0).await;
        assert_eq!(err, KvErr::Version);
    }

    #[tokio::test]
    async fn put_version_conflict_after_a_retried_attempt_is_reported_as_maybe() {
        let inner = KvServer::new();
        Kv::put(inner.clone(), context::current(), "x".into(), "1".into(), 0).await;

        // The key is already at version 1. The first Put attempt never
        // reaches the server (simulated transport failure), so by the
        // time the retried attempt lands, its stale version 0 collides
        // with the real version 1 — that collision must be reported as
        // `Maybe`, since the caller can't tell it apart from the first
        // attempt having actually applied before its reply was lost.
        let client = FlakyKvRpc {
            inner,
            get_calls: Arc::new(AtomicUsize::new(0)),
            put_calls: Arc::new(AtomicUsize::new(0)),
            fail_first_get: 0,
            fail_first_put: 1,
        };
        let ck = Clerk::new(client);

        let err = ck.put("x", "2", 0).await;
        assert_eq!(err, KvErr::Maybe);
    }
}
