use std::io;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::{self, SimpleFile};
use codespan_reporting::term;
use termcolor::WriteColor;
use thiserror::Error;

use crate::types::{Span, Spanned};

pub type Result<T, E = Error> = std::result::Result<T, E>;
pub type ErrorS = Spanned<Error>;

#[remain::sorted]
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("AttributeError: {0}")]
    AttributeError(#[from] AttributeError),
    #[error("IndexError: {0}")]
    IndexError(#[from] IndexError),
    #[error("IOError: {0}")]
    IoError(#[from] IoError),
    #[error("MemoryError: {0}")]
    MemoryError(#[from] MemoryError),
    #[error("NameError: {0}")]
    NameError(#[from] NameError),
    #[error("OverflowError: {0}")]
    OverflowError(#[from] OverflowError),
    #[error("SyntaxError: {0}")]
    SyntaxError(#[from] SyntaxError),
    #[error("TypeError: {0}")]
    TypeError(#[from] TypeError),
    #[error("ZeroDivisionError: {0}")]
    ZeroDivisionError(#[from] ZeroDivisionError),
}

impl Error {
    /// Name of the error class, as printed in front of the message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::AttributeError(_) => "AttributeError",
            Error::IndexError(_) => "IndexError",
            Error::IoError(_) => "IOError",
            Error::MemoryError(_) => "MemoryError",
            Error::NameError(_) => "NameError",
            Error::OverflowError(_) => "OverflowError",
            Error::SyntaxError(_) => "SyntaxError",
            Error::TypeError(_) => "TypeError",
            Error::ZeroDivisionError(_) => "ZeroDivisionError",
        }
    }

    /// The message without the error class prefix.
    pub fn message(&self) -> String {
        match self {
            Error::AttributeError(e) => e.to_string(),
            Error::IndexError(e) => e.to_string(),
            Error::IoError(e) => e.to_string(),
            Error::MemoryError(e) => e.to_string(),
            Error::NameError(e) => e.to_string(),
            Error::OverflowError(e) => e.to_string(),
            Error::SyntaxError(e) => e.to_string(),
            Error::TypeError(e) => e.to_string(),
            Error::ZeroDivisionError(e) => e.to_string(),
        }
    }
}

impl AsDiagnostic for Error {
    fn as_diagnostic(&self) -> Diagnostic<()> {
        let diagnostic = Diagnostic::error().with_code(self.code()).with_message(self.message());
        match self {
            Error::SyntaxError(
                SyntaxError::UnrecognizedEOF { expected } | SyntaxError::UnrecognizedToken { expected, .. },
            ) => diagnostic.with_notes(vec![format!("expected: {}", one_of(expected))]),
            _ => diagnostic,
        }
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AttributeError {
    #[error("{type_:?} object has no attribute {name:?}")]
    NoSuchAttribute { type_: String, name: String },
    #[error("only instances have properties, cannot access {name:?} on {type_:?}")]
    NotAnInstance { type_: String, name: String },
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IndexError {
    #[error("indices must be integers, not {type_:?}")]
    InvalidIndexType { type_: String },
    #[error("index {index} out of range for {type_:?} of length {len}")]
    OutOfBounds { type_: String, index: i64, len: usize },
    #[error("pop from empty {type_:?}")]
    PopFromEmpty { type_: String },
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IoError {
    #[error("unable to write to file: {file:?}")]
    WriteError { file: String },
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MemoryError {
    #[error("unable to map {requested} bytes")]
    OutOfMemory { requested: usize },
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NameError {
    #[error("name {name:?} is not defined")]
    NotDefined { name: String },
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OverflowError {
    #[error("jump body is too large")]
    JumpTooLarge,
    #[error("result of {op} does not fit in a long")]
    NumericRange { op: String },
    #[error("stack overflow")]
    StackOverflow,
    #[error("cannot use more than 65536 constants in one function")]
    TooManyConstants,
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SyntaxError {
    #[error("invalid input")]
    InvalidToken,
    #[error("unexpected end of file")]
    UnrecognizedEOF { expected: Vec<String> },
    #[error("unexpected {token:?}")]
    UnrecognizedToken { token: String, expected: Vec<String> },
    #[error("unterminated string")]
    UnterminatedString,
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TypeError {
    #[error("{name}() takes {exp_args} arguments but {got_args} were given")]
    ArityMismatch { name: String, exp_args: usize, got_args: usize },
    #[error("{container:?} cannot hold a value of type {type_:?}")]
    ElementMismatch { container: String, type_: String },
    #[error("capacity must be a non-negative integer, not {type_:?}")]
    InvalidCapacity { type_: String },
    #[error("{type_:?} object is not callable")]
    NotCallable { type_: String },
    #[error("byte {byte:#04x} at index {index} is not an ASCII character")]
    NotAscii { index: usize, byte: u8 },
    #[error("{type_:?} object is not subscriptable")]
    NotIndexable { type_: String },
    #[error("unhashable type: {type_:?}")]
    Unhashable { type_: String },
    #[error("{type_:?} object does not support {op}")]
    Unsupported { op: String, type_: String },
    #[error("unsupported operand type(s) for {op}: {lt_type:?} and {rt_type:?}")]
    UnsupportedOperandInfix { op: String, lt_type: String, rt_type: String },
    #[error("unsupported operand type for {op}: {rt_type:?}")]
    UnsupportedOperandPrefix { op: String, rt_type: String },
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ZeroDivisionError {
    #[error("{op} by zero")]
    DivideByZero { op: String },
}

pub trait AsDiagnostic {
    fn as_diagnostic(&self) -> Diagnostic<()>;
}

fn one_of(tokens: &[String]) -> String {
    let (token_last, tokens) = match tokens.split_last() {
        Some((token_last, &[])) => return token_last.to_string(),
        Some((token_last, tokens)) => (token_last, tokens),
        None => return "nothing".to_string(),
    };

    let mut output = String::new();
    for token in tokens {
        output.push_str(token);
        output.push_str(", ");
    }
    output.push_str("or ");
    output.push_str(token_last);
    output
}

/// Renders a compile error, pointing at its span in `source`.
pub fn report_err(
    writer: &mut dyn WriteColor,
    source: &str,
    (e, span): &ErrorS,
) -> io::Result<()> {
    let file = SimpleFile::new("<script>", source);
    let config = term::Config::default();
    let diagnostic = e.as_diagnostic().with_labels(vec![Label::primary((), span_in(source, span))]);
    term::emit(writer, &config, &file, &diagnostic).map_err(into_io)
}

/// Renders a runtime error followed by one note per active call frame.
pub fn report_trace(
    writer: &mut dyn WriteColor,
    e: &Error,
    trace: &[String],
) -> io::Result<()> {
    let file = SimpleFile::new("<script>", "");
    let config = term::Config::default();
    let diagnostic = e.as_diagnostic().with_notes(trace.to_vec());
    term::emit(writer, &config, &file, &diagnostic).map_err(into_io)
}

fn into_io(e: files::Error) -> io::Error {
    match e {
        files::Error::Io(e) => e,
        e => io::Error::new(io::ErrorKind::Other, e.to_string()),
    }
}

fn span_in(source: &str, span: &Span) -> Span {
    let end = span.end.min(source.len());
    span.start.min(end)..end
}
