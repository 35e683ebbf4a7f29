use std::ops::Range;

/// Byte range into the source text. Compile errors carry one.
pub type Span = Range<usize>;
pub type Spanned<T> = (T, Span);

/// 1-based source line, as recorded per instruction in a chunk.
pub type Line = u32;
