//! Record sources
//!
//! Sources are pull-based: the job runner asks for the next record only after the
//! previous batch's commit (and any failure logging) has returned, so nothing is
//! decoded while a transaction is outstanding.

use async_trait::async_trait;
use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord, Trim};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::SourceError;
use crate::record::{FieldValue, Header, Record};

/// A finite, non-restartable sequence of records
#[async_trait]
pub trait RecordSource: Send {
    /// Next record, `Ok(None)` at end of data
    ///
    /// After an error the source must not be polled again.
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError>;
}

/// Opens a fresh [`RecordSource`] for one job
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// Human-readable location, used in logs and errors
    fn locator(&self) -> String;

    async fn open(&self) -> Result<Box<dyn RecordSource>, SourceError>;
}

/// Dialect knobs for delimited input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvOptions {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_quote")]
    pub quote: char,
    /// Trim surrounding whitespace from headers and fields
    #[serde(default)]
    pub trim: bool,
}

fn default_delimiter() -> char {
    ','
}

fn default_quote() -> char {
    '"'
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            quote: default_quote(),
            trim: false,
        }
    }
}

impl CsvOptions {
    /// Delimiter and quote as single bytes, `None` if either is not ASCII
    pub fn as_bytes(&self) -> Option<(u8, u8)> {
        let delimiter = u8::try_from(self.delimiter).ok().filter(u8::is_ascii)?;
        let quote = u8::try_from(self.quote).ok().filter(u8::is_ascii)?;
        Some((delimiter, quote))
    }
}

/// Field-level quoting state, mirroring how the decoder reads quotes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted,
    /// A quote seen inside a quoted field: either an escape or the closing quote
    QuoteInQuoted,
}

impl QuoteState {
    fn next(self, byte: u8, delimiter: u8, quote: u8) -> Self {
        let boundary = byte == delimiter || byte == b'\n' || byte == b'\r';
        match self {
            QuoteState::FieldStart if byte == quote => QuoteState::Quoted,
            QuoteState::FieldStart | QuoteState::Unquoted if boundary => QuoteState::FieldStart,
            QuoteState::FieldStart | QuoteState::Unquoted => QuoteState::Unquoted,
            QuoteState::Quoted if byte == quote => QuoteState::QuoteInQuoted,
            QuoteState::Quoted => QuoteState::Quoted,
            QuoteState::QuoteInQuoted if byte == quote => QuoteState::Quoted,
            QuoteState::QuoteInQuoted if boundary => QuoteState::FieldStart,
            QuoteState::QuoteInQuoted => QuoteState::Unquoted,
        }
    }
}

/// Passes bytes through and flags end of input inside an open quoted field
///
/// The decoder itself accepts that case and returns the rest of the input as one
/// field, so the flag is checked after every record.
struct QuoteTracker<R> {
    inner: R,
    delimiter: u8,
    quote: u8,
    state: QuoteState,
    unterminated: Arc<AtomicBool>,
}

impl<R> QuoteTracker<R> {
    fn new(inner: R, delimiter: u8, quote: u8) -> (Self, Arc<AtomicBool>) {
        let unterminated = Arc::new(AtomicBool::new(false));
        let tracker = Self {
            inner,
            delimiter,
            quote,
            state: QuoteState::FieldStart,
            unterminated: unterminated.clone(),
        };
        (tracker, unterminated)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for QuoteTracker<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        let had_room = buf.remaining() > 0;

        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let fresh = &buf.filled()[before..];
        if fresh.is_empty() {
            if had_room && this.state == QuoteState::Quoted {
                this.unterminated.store(true, Ordering::Relaxed);
            }
        } else {
            for &byte in fresh {
                this.state = this.state.next(byte, this.delimiter, this.quote);
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// Header-plus-rows delimited decoder over any async byte stream
pub struct CsvSource<R> {
    reader: AsyncReader<QuoteTracker<R>>,
    unterminated: Arc<AtomicBool>,
    header: Header,
    row: StringRecord,
    locator: String,
}

impl<R> CsvSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Read and validate the header row
    pub async fn new(input: R, options: &CsvOptions, locator: impl Into<String>) -> Result<Self, SourceError> {
        let locator = locator.into();
        let header_error = |message: String| SourceError::Header {
            locator: locator.clone(),
            message,
        };

        let (delimiter, quote) = options
            .as_bytes()
            .ok_or_else(|| header_error(format!("non-ASCII delimiter or quote in {options:?}")))?;

        let (input, unterminated) = QuoteTracker::new(input, delimiter, quote);
        let mut reader = AsyncReaderBuilder::new()
            .delimiter(delimiter)
            .quote(quote)
            .trim(if options.trim { Trim::All } else { Trim::None })
            .has_headers(true)
            .flexible(false)
            .create_reader(input);

        let raw = reader
            .headers()
            .await
            .map_err(|e| header_error(e.to_string()))?
            .clone();
        if unterminated.load(Ordering::Relaxed) {
            return Err(header_error("unterminated quoted field".to_string()));
        }

        let names: Vec<String> = raw
            .iter()
            .enumerate()
            .map(|(idx, name)| if idx == 0 { name.trim_start_matches('\u{feff}') } else { name })
            .map(str::to_string)
            .collect();

        if names.is_empty() || names.iter().all(|n| n.is_empty()) {
            return Err(header_error("missing header row".to_string()));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = names.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(header_error(format!("duplicate field name '{dup}'")));
        }

        Ok(Self {
            reader,
            unterminated,
            header: names.into(),
            row: StringRecord::new(),
            locator,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }
}

#[async_trait]
impl<R> RecordSource for CsvSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        let read = self.reader.read_record(&mut self.row).await;
        if read.is_ok() && self.unterminated.load(Ordering::Relaxed) {
            return Err(SourceError::Decode {
                locator: self.locator.clone(),
                line: self.row.position().map(|p| p.line()),
                message: "unterminated quoted field at end of input".to_string(),
            });
        }

        match read {
            Ok(false) => Ok(None),
            Ok(true) => {
                let values = self.row.iter().map(FieldValue::from).collect();
                Record::new(self.header.clone(), values)
                    .map(Some)
                    .ok_or_else(|| SourceError::Decode {
                        locator: self.locator.clone(),
                        line: self.row.position().map(|p| p.line()),
                        message: format!(
                            "expected {} fields, found {}",
                            self.header.len(),
                            self.row.len()
                        ),
                    })
            }
            Err(e) => Err(SourceError::decode(&self.locator, e)),
        }
    }
}

/// Opens a delimited file from local storage
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
    options: CsvOptions,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>, options: CsvOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SourceFactory for CsvFileSource {
    fn locator(&self) -> String {
        self.path.display().to_string()
    }

    async fn open(&self) -> Result<Box<dyn RecordSource>, SourceError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|source| SourceError::Open {
                locator: self.locator(),
                source,
            })?;
        let source = CsvSource::new(file, &self.options, self.locator()).await?;
        Ok(Box::new(source))
    }
}

/// Adapts any stream of decoded records, e.g. an in-memory fixture
pub struct StreamSource<S> {
    stream: S,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> RecordSource for StreamSource<S>
where
    S: Stream<Item = Result<Record, SourceError>> + Send + Unpin,
{
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        self.stream.next().await.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &'static [u8], options: CsvOptions) -> Result<Vec<Record>, SourceError> {
        let mut source = CsvSource::new(input, &options, "inline").await?;
        let mut out = Vec::new();
        while let Some(record) = source.next_record().await? {
            out.push(record);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_decodes_rows_in_order() {
        let records = collect(b"id,name\n1,Acme\n2,\"Globex, Inc\"\n", CsvOptions::default())
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("name"), Some(&FieldValue::from("Globex, Inc")));
        assert!(std::sync::Arc::ptr_eq(records[0].header(), records[1].header()));
    }

    #[tokio::test]
    async fn test_custom_delimiter_and_trim() {
        let options = CsvOptions {
            delimiter: ';',
            trim: true,
            ..CsvOptions::default()
        };
        let records = collect(b" id ; name \n 7 ; Initech \n", options).await.unwrap();
        assert_eq!(records[0].get("id"), Some(&FieldValue::from("7")));
        assert_eq!(records[0].get("name"), Some(&FieldValue::from("Initech")));
    }

    #[tokio::test]
    async fn test_ragged_row_is_decode_error_after_good_rows() {
        let mut source = CsvSource::new(&b"id,name\n1,a\n2\n3,c\n"[..], &CsvOptions::default(), "ragged.csv")
            .await
            .unwrap();

        assert!(source.next_record().await.unwrap().is_some());
        let err = source.next_record().await.unwrap_err();
        assert!(matches!(err, SourceError::Decode { ref locator, .. } if locator == "ragged.csv"));
    }

    #[tokio::test]
    async fn test_unterminated_quote_is_decode_error() {
        let mut source = CsvSource::new(
            &b"id,name\n1,\"Acme\n2,Globex\n3,Initech\n"[..],
            &CsvOptions::default(),
            "open-quote.csv",
        )
        .await
        .unwrap();

        let err = source.next_record().await.unwrap_err();
        assert!(matches!(err, SourceError::Decode { ref locator, .. } if locator == "open-quote.csv"));
        assert!(err.to_string().contains("unterminated quoted field"));
    }

    #[tokio::test]
    async fn test_unterminated_quote_after_good_rows() {
        let mut source = CsvSource::new(
            &b"id,name\n1,Acme\n2,\"Globex\n"[..],
            &CsvOptions::default(),
            "inline",
        )
        .await
        .unwrap();

        assert_eq!(
            source.next_record().await.unwrap().unwrap().get("name"),
            Some(&FieldValue::from("Acme"))
        );
        assert!(matches!(
            source.next_record().await,
            Err(SourceError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_unterminated_quote_in_header() {
        let err = collect(b"id,\"name\n1,2\n", CsvOptions::default()).await.unwrap_err();
        assert!(matches!(err, SourceError::Header { .. }));
    }

    #[tokio::test]
    async fn test_escaped_quotes_and_embedded_newlines_are_accepted() {
        let records = collect(
            b"id,name,note\n1,\"Acme \"\"Corp\"\"\nLtd\",5\"\r\n2,\"\",x\n",
            CsvOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("name"), Some(&FieldValue::from("Acme \"Corp\"\nLtd")));
        assert_eq!(records[0].get("note"), Some(&FieldValue::from("5\"")));
        assert_eq!(records[1].get("name"), Some(&FieldValue::from("")));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_decode_error() {
        let mut source = CsvSource::new(&b"id,name\n1,\xff\xfe\n"[..], &CsvOptions::default(), "bytes.csv")
            .await
            .unwrap();

        let err = source.next_record().await.unwrap_err();
        assert!(matches!(err, SourceError::Decode { line: Some(2), .. }));
    }

    #[tokio::test]
    async fn test_empty_input_has_no_header() {
        let err = collect(b"", CsvOptions::default()).await.unwrap_err();
        assert!(matches!(err, SourceError::Header { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_header_rejected() {
        let err = collect(b"id,id\n1,2\n", CsvOptions::default()).await.unwrap_err();
        assert!(err.to_string().contains("duplicate field name 'id'"));
    }

    #[tokio::test]
    async fn test_non_ascii_delimiter_rejected() {
        let options = CsvOptions {
            delimiter: '§',
            ..CsvOptions::default()
        };
        assert!(matches!(
            collect(b"a\n", options).await,
            Err(SourceError::Header { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_open_error() {
        let factory = CsvFileSource::new("/definitely/not/here.csv", CsvOptions::default());
        let err = factory.open().await.err().unwrap();
        assert!(matches!(err, SourceError::Open { .. }));
    }

    #[tokio::test]
    async fn test_stream_source() {
        let items = vec![
            Ok(Record::from_pairs(vec![("id", FieldValue::Integer(1))])),
            Err(SourceError::Decode {
                locator: "memory".into(),
                line: Some(3),
                message: "truncated".into(),
            }),
        ];
        let mut source = StreamSource::new(futures::stream::iter(items));
        assert!(source.next_record().await.unwrap().is_some());
        assert!(source.next_record().await.is_err());
    }
}
