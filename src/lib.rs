pub mod kv;
pub mod mr;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    /// Serializes tests that change the process-wide working directory;
    /// several `mr` operations read and write paths relative to `cwd`, so
    /// two such tests running concurrently would step on each other.
    pub(crate) static CWD_GUARD: Mutex<()> = Mutex::new(());
}
