//! Lease extractor
//!
//! Scans ISC dhcpd lease files for `lease <address> { ... }` blocks that
//! carry a `client-hostname` and yields one [`Lease`] per block.
//!
//! ## Matching
//!
//! A block is recognised by a single pattern rather than a grammar. The
//! pattern may cross any number of lines as long as no line *starts* with
//! `}` before the `client-hostname` field; a `}` inside a quoted value on
//! the same line (e.g. a `uid` string) is tolerated.
//!
//! ## Modes
//!
//! - [`LeaseParser::parse_data`] / [`LeaseParser::parse_file`]: whole buffer,
//!   all matches at once.
//! - [`LeaseParser::parse_streaming`]: searches forward match by match and
//!   hands every lease to the consumer as soon as it is found. Checks the
//!   cancellation token before every search.
//! - [`LeaseParser::parse_streaming_with_handler`]: drives the stream and
//!   spawns the handler once per lease. Handlers run concurrently with the
//!   scan and with each other; the call returns once every spawned handler
//!   has finished.

use crate::error::Result;
use crate::lease::Lease;
use regex::bytes::{Captures, Regex};
use std::future::Future;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, LazyLock};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Pattern matching one lease block with a client hostname
///
/// Group 1 is the address literal, group 2 the hostname.
const LEASE_PATTERN: &str =
    r#"(?-u)lease ([0-9a-f.:]+) \{(?:[^}]|\}[^\n]+")+client-hostname "([^"]+)";"#;

static LEASE_MATCHER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(LEASE_PATTERN).expect("lease pattern is valid"));

/// Boxed stream of extracted leases
pub type LeaseStream = Pin<Box<dyn Stream<Item = Lease> + Send + 'static>>;

/// Why a matched block could not be turned into a lease
#[derive(Debug, Clone, PartialEq, Eq)]
enum MatchError {
    MissingGroup,
    InvalidAddress(String),
}

impl std::fmt::Display for MatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchError::MissingGroup => write!(f, "match has invalid group count"),
            MatchError::InvalidAddress(addr) => write!(f, "failed to parse address '{}'", addr),
        }
    }
}

/// Extracts leases from lease file contents
#[derive(Debug, Clone, Default)]
pub struct LeaseParser;

impl LeaseParser {
    /// Create a new parser
    pub fn new() -> Self {
        Self
    }

    /// Read `path` fully and extract all leases
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<Lease>)`: every well-formed lease, in file order
    /// - `Err(Error::Io)`: the file could not be read
    pub async fn parse_file(&self, path: impl AsRef<Path>) -> Result<Vec<Lease>> {
        let content = tokio::fs::read(path.as_ref()).await?;
        Ok(self.parse_data(&content))
    }

    /// Extract all leases from an in-memory buffer
    ///
    /// Blocks whose address fails to parse are logged and skipped.
    pub fn parse_data(&self, data: &[u8]) -> Vec<Lease> {
        let mut matches = 0usize;
        let leases: Vec<Lease> = LEASE_MATCHER
            .captures_iter(data)
            .inspect(|_| matches += 1)
            .filter_map(|caps| match lease_from_captures(&caps) {
                Ok(lease) => Some(lease),
                Err(e) => {
                    warn!(error = %e, "unparsable lease match");
                    None
                }
            })
            .collect();

        debug!(count = leases.len(), matches, "parsed leases");
        leases
    }

    /// Stream leases from `path` as they are found
    ///
    /// The file is read once in full; matches are then searched one at a
    /// time from a moving offset. A file that cannot be read ends the
    /// stream immediately (the error is logged). Cancelling `cancel` ends
    /// the stream without error within one search iteration.
    pub fn parse_streaming(&self, path: impl Into<PathBuf>, cancel: CancellationToken) -> LeaseStream {
        let path = path.into();
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let content = match tokio::fs::read(&path).await {
                Ok(content) => content,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to open lease file");
                    return;
                }
            };

            let mut offset = 0usize;
            let mut count = 0usize;
            loop {
                if cancel.is_cancelled() {
                    debug!(path = %path.display(), count, "stopped parsing");
                    return;
                }

                let Some(caps) = LEASE_MATCHER.captures_at(&content, offset) else {
                    debug!(path = %path.display(), count, "no more matches in file");
                    return;
                };

                // Group 0 always participates in a match
                let (start, end) = caps
                    .get(0)
                    .map_or((offset, content.len()), |m| (m.start(), m.end()));

                match lease_from_captures(&caps) {
                    Ok(lease) => {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                debug!(path = %path.display(), count, "stopped parsing");
                                return;
                            }
                            sent = tx.send(lease) => {
                                if sent.is_err() {
                                    // Consumer went away
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            matched = %String::from_utf8_lossy(&content[start..end]),
                            "failed to parse match"
                        );
                    }
                }

                offset = end;
                count += 1;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Stream leases from `path` and spawn `handler` for each one
    ///
    /// The handler for one lease may still be running while the next match
    /// is searched; handlers must not rely on ordering. Returns after the
    /// scan ended (exhausted, unreadable file or cancelled) and all spawned
    /// handlers completed.
    pub async fn parse_streaming_with_handler<F, Fut>(
        &self,
        path: impl Into<PathBuf>,
        cancel: CancellationToken,
        handler: F,
    ) where
        F: Fn(Lease) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let scan = cancel.child_token();
        let mut stream = self.parse_streaming(path, scan.clone());
        let handler = Arc::new(handler);
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = scan.cancelled() => break,
                next = stream.next() => match next {
                    Some(lease) => {
                        let handler = Arc::clone(&handler);
                        handlers.spawn(async move { (*handler)(lease).await });
                    }
                    None => break,
                },
            }
        }
        scan.cancel();

        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "lease handler task failed");
            }
        }
    }
}

fn lease_from_captures(caps: &Captures<'_>) -> std::result::Result<Lease, MatchError> {
    let (Some(address), Some(name)) = (caps.get(1), caps.get(2)) else {
        return Err(MatchError::MissingGroup);
    };

    let address = String::from_utf8_lossy(address.as_bytes());
    let parsed: IpAddr = address
        .parse()
        .map_err(|_| MatchError::InvalidAddress(address.to_string()))?;

    Ok(Lease::new(String::from_utf8_lossy(name.as_bytes()), parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;
    use std::sync::Mutex;

    const LEASES: &str = r#"# The format of this file is documented in the dhcpd.leases(5) manual page.
# This lease file was written by isc-dhcp-4.4.1

server-duid "\000\001\000\001)\307\3240\000PV\257\244\325";

lease 10.90.32.80 {
  starts 5 2022/06/03 12:18:58;
  ends 5 2022/06/03 12:20:58;
  cltt 5 2022/06/03 12:18:58;
  binding state active;
  next binding state free;
  hardware ethernet 00:50:56:af:a4:d5;
  uid "\377-\032\2413\000\002\000\000\253\021\261L\001}\301\202~\213";
  client-hostname "k8s-master-worker-qqd2c";
}
lease 10.90.32.81 {
  starts 5 2022/06/03 12:18:58;
  binding state free;
  hardware ethernet 00:50:56:af:a4:d6;
}
lease 10.90.36.105 {
  starts 5 2022/06/03 12:19:04;
  binding state active;
  client-hostname "tzdim-dachstein";
}
lease 2001:db8::2 {
  binding state active;
  client-hostname "v6-host";
}
lease 1.2.3 {
  binding state active;
  client-hostname "broken-address";
}
lease 10.90.36.86 {
  binding state active;
  client-hostname "tzdim-marmolata";
}
"#;

    fn expected() -> HashSet<Lease> {
        [
            Lease::for_test("k8s-master-worker-qqd2c", "10.90.32.80"),
            Lease::for_test("tzdim-dachstein", "10.90.36.105"),
            Lease::for_test("v6-host", "2001:db8::2"),
            Lease::for_test("tzdim-marmolata", "10.90.36.86"),
        ]
        .into_iter()
        .collect()
    }

    fn lease_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_data() {
        let leases = LeaseParser::new().parse_data(LEASES.as_bytes());
        assert_eq!(leases.len(), 4);
        assert_eq!(leases.into_iter().collect::<HashSet<_>>(), expected());
    }

    #[test]
    fn test_block_without_hostname_does_not_swallow_next_block() {
        let leases = LeaseParser::new().parse_data(LEASES.as_bytes());
        assert!(
            !leases
                .iter()
                .any(|l| l.address() == "10.90.32.81".parse::<IpAddr>().unwrap())
        );
    }

    #[test]
    fn test_reparse_is_identical() {
        let parser = LeaseParser::new();
        let first: HashSet<_> = parser.parse_data(LEASES.as_bytes()).into_iter().collect();
        let second: HashSet<_> = parser.parse_data(LEASES.as_bytes()).into_iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_non_utf8_content() {
        let mut data = b"lease 10.0.0.9 {\n  uid \"\xff\xfe\";\n".to_vec();
        data.extend_from_slice(b"  client-hostname \"raw\";\n}\n");
        let leases = LeaseParser::new().parse_data(&data);
        assert_eq!(leases, vec![Lease::for_test("raw", "10.0.0.9")]);
    }

    #[tokio::test]
    async fn test_parse_file() {
        let file = lease_file(LEASES);
        let leases = LeaseParser::new().parse_file(file.path()).await.unwrap();
        assert_eq!(leases.into_iter().collect::<HashSet<_>>(), expected());
    }

    #[tokio::test]
    async fn test_parse_missing_file() {
        let result = LeaseParser::new().parse_file("/nonexistent/dhcpd.leases").await;
        tokio_test::assert_err!(result);
    }

    #[tokio::test]
    async fn test_streaming_parse() {
        let file = lease_file(LEASES);
        let stream = LeaseParser::new().parse_streaming(file.path(), CancellationToken::new());

        let leases: Vec<Lease> = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            stream.collect(),
        )
        .await
        .unwrap();

        // Streaming preserves file order
        assert_eq!(leases[0].name(), "k8s-master-worker-qqd2c");
        assert_eq!(leases.into_iter().collect::<HashSet<_>>(), expected());
    }

    #[tokio::test]
    async fn test_streaming_missing_file_ends_empty() {
        let stream = LeaseParser::new()
            .parse_streaming("/nonexistent/dhcpd.leases", CancellationToken::new());
        let leases: Vec<Lease> = stream.collect().await;
        assert!(leases.is_empty());
    }

    #[tokio::test]
    async fn test_streaming_cancelled_before_start() {
        let file = lease_file(LEASES);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let leases: Vec<Lease> = LeaseParser::new()
            .parse_streaming(file.path(), cancel)
            .collect()
            .await;
        assert!(leases.is_empty());
    }

    #[tokio::test]
    async fn test_streaming_with_handler() {
        let file = lease_file(LEASES);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            LeaseParser::new().parse_streaming_with_handler(
                file.path(),
                CancellationToken::new(),
                move |lease| {
                    let sink = Arc::clone(&sink);
                    async move { sink.lock().unwrap().push(lease) }
                },
            ),
        )
        .await
        .unwrap();

        let seen: HashSet<_> = seen.lock().unwrap().drain(..).collect();
        assert_eq!(seen, expected());
    }

    const LARGE_FILE_LEASES: usize = 5000;

    fn large_lease_file() -> tempfile::NamedTempFile {
        let content: String = (0..LARGE_FILE_LEASES)
            .map(|i| {
                format!(
                    "lease 10.{}.{}.{} {{\n  binding state active;\n  client-hostname \"host{}\";\n}}\n",
                    i / 65536,
                    (i / 256) % 256,
                    i % 256,
                    i
                )
            })
            .collect();
        lease_file(&content)
    }

    #[tokio::test]
    async fn test_streaming_cancelled_mid_scan() {
        let file = large_lease_file();
        let cancel = CancellationToken::new();
        let mut stream = LeaseParser::new().parse_streaming(file.path(), cancel.clone());

        let mut delivered = 0usize;
        let drained = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while stream.next().await.is_some() {
                delivered += 1;
                if delivered == 10 {
                    cancel.cancel();
                }
            }
        })
        .await;

        // The stream ends on its own; at most the lease already queued follows
        tokio_test::assert_ok!(drained);
        assert!(delivered >= 10);
        assert!(delivered <= 11, "delivered {} leases after cancel", delivered);
    }

    #[tokio::test]
    async fn test_streaming_with_handler_cancelled_mid_scan() {
        let file = large_lease_file();
        let cancel = CancellationToken::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let stop = cancel.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            LeaseParser::new().parse_streaming_with_handler(file.path(), cancel.clone(), move |_lease| {
                let counter = Arc::clone(&counter);
                let stop = stop.clone();
                async move {
                    if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1 == 10 {
                        stop.cancel();
                    }
                }
            }),
        )
        .await
        .unwrap();

        let calls = calls.load(std::sync::atomic::Ordering::SeqCst);
        assert!(cancel.is_cancelled());
        assert!(calls >= 10);
        assert!(calls < LARGE_FILE_LEASES, "scan ran to the end after cancel");
    }
}
