use std::{fmt, io, result};

use crate::changeform::extra::ExtraData;
use crate::changeform::qust::RunDataItem3Entry;
use crate::changeform::ChangeFormData;

pub type Result<T> = result::Result<T, Error>;

/// Result type threaded through every nom parser in this crate. The input is
/// always a byte slice over the (decompressed) save buffer.
pub type PResult<'a, O> = nom::IResult<&'a [u8], O, Error>;

#[derive(Debug)]
pub struct Error(Box<Inner>);

#[derive(Debug)]
struct Inner {
    kind: ErrorKind,
    /// Whatever was decoded before the failure. Any kind may carry one.
    partial: Option<Partial>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error(Box::new(Inner {
            kind,
            partial: None,
        }))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.0.kind
    }

    pub fn format(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Format(message.into()))
    }

    pub fn truncated(remaining: usize) -> Error {
        Error::new(ErrorKind::Truncation { remaining })
    }

    pub fn position_mismatch(declared: u64, consumed: u64) -> Error {
        Error::new(ErrorKind::PositionMismatch { declared, consumed })
    }

    pub fn compression(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Compression(message.into()))
    }

    pub fn unknown_variant(what: &'static str, tag: u32) -> Error {
        Error::new(ErrorKind::UnknownVariant { what, tag })
    }

    /// Attaches a partially decoded element. An existing partial wins; it
    /// was attached closer to the failure.
    pub fn with_partial(mut self, partial: Partial) -> Error {
        if self.0.partial.is_none() {
            self.0.partial = Some(partial);
        }
        self
    }

    /// Tags an error with the file section it came from.
    pub fn in_section(self, name: &'static str) -> Error {
        Error::new(ErrorKind::Section { name, inner: self })
    }

    /// The partially decoded element recovered before the failure, if any.
    pub fn partial(&self) -> Option<&Partial> {
        if let Some(ref partial) = self.0.partial {
            return Some(partial);
        }
        match self.0.kind {
            ErrorKind::Section { ref inner, .. } => inner.partial(),
            _ => None,
        }
    }

    /// Wraps into the nom failure variant so parsers can bail out without
    /// giving combinators a chance to backtrack over corrupt data.
    pub(crate) fn fail(self) -> nom::Err<Error> {
        nom::Err::Failure(self)
    }
}

/// The error taxonomy of the codec. Kinds map to what went wrong on the wire,
/// not to where in the code it happened; `Section` adds the where.
#[derive(Debug)]
pub enum ErrorKind {
    /// Structurally malformed data: bad magic, unknown game or version,
    /// unknown change-form type codes, oversized counts and similar.
    Format(String),

    /// A read ran past the end of its buffer. `remaining` is how many bytes
    /// were left when the read was attempted.
    Truncation { remaining: usize },

    /// A declared block size disagrees with the bytes actually consumed.
    /// Usually means the producer and this reader disagree on a schema.
    PositionMismatch { declared: u64, consumed: u64 },

    /// zlib or lz4 failed. Fatal on read; on write the update is rejected.
    Compression(String),

    /// A byte tag outside the known catalogue.
    UnknownVariant { what: &'static str, tag: u32 },

    /// Plumbing errors out of the parser combinators that do not map to any
    /// of the kinds above.
    Parse(nom::error::ErrorKind),

    /// I/O around the codec. The codec itself only ever sees buffers.
    Io(io::Error),

    /// An error tagged with the section it occurred in.
    Section { name: &'static str, inner: Error },
}

/// A partially constructed element, attached to errors so callers can show
/// what was recovered before the failure.
#[derive(Debug)]
pub enum Partial {
    /// Extra-data entries decoded before the entry that failed.
    ExtraData(Vec<ExtraData>),

    /// A change-form body salvaged as raw bytes when decoding failed.
    ChangeForm(Box<ChangeFormData>),

    /// Quest run-data entries decoded before an unknown sub-type tag.
    QuestRunItems(Vec<RunDataItem3Entry>),

    /// Raw bytes salvaged from a region that could not be decoded further.
    Bytes(Vec<u8>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0.kind {
            ErrorKind::Format(ref message) => write!(f, "malformed save data: {message}"),
            ErrorKind::Truncation { remaining } => {
                write!(f, "unexpected end of data ({remaining} bytes left)")
            }
            ErrorKind::PositionMismatch { declared, consumed } => write!(
                f,
                "block size mismatch: declared {declared} bytes, consumed {consumed}"
            ),
            ErrorKind::Compression(ref message) => write!(f, "compression error: {message}"),
            ErrorKind::UnknownVariant { what, tag } => {
                write!(f, "unknown {what}: type={tag}")
            }
            ErrorKind::Parse(kind) => write!(f, "parse error: {}", kind.description()),
            ErrorKind::Io(ref err) => write!(f, "io error: {err}"),
            ErrorKind::Section { name, ref inner } => write!(f, "in {name}: {inner}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.0.kind {
            ErrorKind::Io(ref err) => Some(err),
            ErrorKind::Section { ref inner, .. } => Some(inner),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::new(ErrorKind::Io(err))
    }
}

impl From<nom::Err<Error>> for Error {
    fn from(err: nom::Err<Error>) -> Error {
        match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => e,
            // We only use complete parsers; Incomplete means a streaming
            // combinator sneaked in. Treat it as running out of data.
            nom::Err::Incomplete(_) => Error::truncated(0),
        }
    }
}

impl<'a> nom::error::ParseError<&'a [u8]> for Error {
    fn from_error_kind(input: &'a [u8], kind: nom::error::ErrorKind) -> Self {
        match kind {
            nom::error::ErrorKind::Eof | nom::error::ErrorKind::Complete => {
                Error::truncated(input.len())
            }
            other => Error::new(ErrorKind::Parse(other)),
        }
    }

    fn append(_input: &'a [u8], _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_tag_shows_up_in_message() {
        let err = Error::truncated(3).in_section("plugin table");
        assert_eq!(
            err.to_string(),
            "in plugin table: unexpected end of data (3 bytes left)"
        );
    }

    #[test]
    fn partial_is_reachable_through_section_wrapper() {
        let err = Error::unknown_variant("ExtraData", 200)
            .with_partial(Partial::Bytes(vec![1, 2, 3]))
            .in_section("change form");
        match err.partial() {
            Some(Partial::Bytes(bytes)) => assert_eq!(bytes, &[1, 2, 3]),
            other => panic!("expected byte partial, got {other:?}"),
        }
    }

    #[test]
    fn with_partial_keeps_the_innermost_attachment() {
        let err = Error::unknown_variant("ExtraData", 200)
            .with_partial(Partial::Bytes(vec![1]))
            .with_partial(Partial::Bytes(vec![2]));
        match err.partial() {
            Some(Partial::Bytes(bytes)) => assert_eq!(bytes, &[1]),
            other => panic!("expected byte partial, got {other:?}"),
        }
    }

    #[test]
    fn every_kind_can_carry_a_partial() {
        let err = Error::position_mismatch(10, 8).with_partial(Partial::Bytes(vec![9]));
        assert!(matches!(err.partial(), Some(Partial::Bytes(_))));
    }
}
