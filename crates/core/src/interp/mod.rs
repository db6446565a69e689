//! Content stream interpretation.
//!
//! The pipeline runs lexer tokens through the [`preprocessor`] (operand
//! validation, CTM tracking), the [`evaluator`] (resource resolution into
//! a self-contained operator list) and the [`optimizer`] (pattern
//! collapsing at flush time). [`text`] runs the same operation stream for
//! extraction instead of rendering.

pub mod evaluator;
pub mod opcodes;
pub mod oplist;
pub mod optimizer;
pub mod preprocessor;
pub mod text;

pub use evaluator::{
    CancelToken, EvaluatorOptions, PDFPageEvaluator, has_blend_modes,
};
pub use opcodes::OpCode;
pub use oplist::{
    GroupOptions, ImageData, ImageKind, ObjPayload, Operand, OperatorChunk, OperatorList,
    OperatorListIR, Operands, RenderIntent, RenderSink, TilingPatternIR,
};
pub use preprocessor::{ContentPreprocessor, Operation};
pub use text::{TextDirection, TextExtractor, TextItem, TextState};
