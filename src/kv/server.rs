use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tarpc::context::Context;
use tracing::info;

use crate::kv::rpc::{GetReply, KvErr, PutReply};

struct Entry {
    value: String,
    version: u64,
}

/// In-memory mapping from key to (value, version), guarded by a single
/// mutex held for the entire duration of each `Get`/`Put`. State vanishes
/// on restart; there is no log and no replication.
#[derive(Clone)]
pub struct KvServer {
    state: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Default for KvServer {
    fn default() -> Self {
        Self::new()
    }
}

impl KvServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[tarpc::service]
pub trait Kv {
    async fn get(key: String) -> GetReply;
    async fn put(key: String, value: String, version: u64) -> PutReply;
}

#[tarpc::server]
impl Kv for KvServer {
    async fn get(self, _: Context, key: String) -> GetReply {
        let state = self.state.lock().unwrap();
        match state.get(&key) {
            Some(entry) => GetReply {
                value: entry.value.clone(),
                version: entry.version,
                err: KvErr::Ok,
            },
            None => GetReply {
                value: String::new(),
                version: 0,
                err: KvErr::NoKey,
            },
        }
    }

    async fn put(self, _: Context, key: String, value: String, version: u64) -> PutReply {
        let mut state = self.state.lock().unwrap();
        match state.get_mut(&key) {
            Some(entry) => {
                if entry.version != version {
                    return PutReply {
                        err: KvErr::Version,
                    };
                }
                entry.value = value;
                entry.version += 1;
                info!(key, version = entry.version, "put applied to existing key");
                PutReply { err: KvErr::Ok }
            }
            None => {
                if version != 0 {
                    return PutReply { err: KvErr::NoKey };
                }
                state.insert(key.clone(), Entry { value, version: 1 });
                info!(key, "put installed new key at version 1");
                PutReply { err: KvErr::Ok }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block<T>(fut: impl std::future::Future<Output = T>) -> T {
        futures::executor::block_on(fut)
    }

    #[test]
    fn get_on_absent_key_is_no_key() {
        let kv = KvServer::new();
        let reply = block(Kv::get(kv, Context::current(), "x".into()));
        assert_eq!(reply.err, KvErr::NoKey);
    }

    #[test]
    fn put_on_absent_key_installs_version_one() {
        let kv = KvServer::new();
        let reply = block(Kv::put(kv.clone(), Context::current(), "x".into(), "1".into(), 0));
        assert_eq!(reply.err, KvErr::Ok);
        let get = block(Kv::get(kv, Context::current(), "x".into()));
        assert_eq!((get.value.as_str(), get.version, get.err), ("1", 1, KvErr::Ok));
    }

    #[test]
    fn put_on_absent_key_with_nonzero_version_is_no_key_not_version() {
        let kv = KvServer::new();
        let reply = block(Kv::put(kv, Context::current(), "x".into(), "1".into(), 5));
        assert_eq!(reply.err, KvErr::NoKey);
    }

    #[test]
    fn put_with_stale_version_is_rejected() {
        let kv = KvServer::new();
        block(Kv::put(kv.clone(), Context::current(), "x".into(), "1".into(), 0));
        let reply = block(Kv::put(kv, Context::current(), "x".into(), "2".into(), 0));
        assert_eq!(reply.err, KvErr::Version);
    }

    #[test]
    fn put_chain_bumps_version_monotonically() {
        let kv = KvServer::new();
        block(Kv::put(kv.clone(), Context::current(), "x".into(), "1".into(), 0));
        let r = block(Kv::put(kv.clone(), Context::current(), "x".into(), "2".into(), 1));
        assert_eq!(r.err, KvErr::Ok);
        let get = block(Kv::get(kv, Context::current(), "x".into()));
        assert_eq!(get.version, 2);
        assert_eq!(get.value, "2");
    }
}
