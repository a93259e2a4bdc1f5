//! Inputs shared by the benchmarks.

/// A captured request kept next to the benches.
#[derive(Debug, Copy, Clone)]
pub struct TestFile {
    file_name: &'static str,
    content: &'static str,
}

impl TestFile {
    pub const fn new(file_name: &'static str, content: &'static str) -> Self {
        Self { file_name, content }
    }

    pub fn content(&self) -> &'static str {
        self.content
    }

    pub fn file_name(&self) -> &'static str {
        self.file_name
    }
}

/// A request file sent `requests` times back to back on one keep-alive connection.
#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    file: TestFile,
    requests: usize,
}

impl TestCase {
    pub fn single(name: &'static str, file: TestFile) -> Self {
        Self { name, file, requests: 1 }
    }

    pub fn pipelined(name: &'static str, file: TestFile, requests: usize) -> Self {
        Self { name, file, requests: requests.max(1) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn file(&self) -> &TestFile {
        &self.file
    }

    pub fn requests(&self) -> usize {
        self.requests
    }

    /// The bytes a client would put on the wire.
    pub fn wire(&self) -> String {
        self.file.content().repeat(self.requests)
    }
}
