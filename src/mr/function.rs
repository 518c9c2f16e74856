//! The hard-coded map reduce functions, may be changed to dynamic linking shared library in the future

/// Word Count application
pub mod wc {
    /// `filename` is passed through per the spec's `map(filename, content)`
    /// signature but word count itself is oblivious to it.
    pub fn map(_filename: &str, content: &str) -> Vec<(String, String)> {
        content
            .split_whitespace()
            .map(|word| (word.to_string(), "1".to_string()))
            .collect()
    }

    pub fn reduce(_key: &str, values: Vec<String>) -> String {
        values.len().to_string()
    }
}

// TODO: Add more functions for MapReduce applications here
