/// Accepted facts between transaction flushes (0 disables batching)
pub const DEFAULT_COMMIT_RATE: u32 = 5000;

/// Dump date used when none is given on the command line
pub const DEFAULT_DUMP_DATE: &str = "20130601";

/// Directory searched for dump files by default
pub const DEFAULT_DATA_DIR: &str = "data";

/// SQLite database written by the importer by default
pub const DEFAULT_DATABASE: &str = "discogs.sqlite3";

/// Progress update interval (tick every N elements)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Read buffer for (possibly decompressed) dump input
pub const READ_BUFFER_SIZE: usize = 128 * 1024;

/// SQLite caps bound parameters per statement; name lookups are chunked below it.
pub const LOOKUP_CHUNK_SIZE: usize = 500;

/// Suffixes tried, in order, when locating a dump file.
pub const DUMP_EXTENSIONS: &[&str] = &["xml", "xml.gz", "xml.bz2"];
