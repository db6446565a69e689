//! Content stream preprocessing: tokens to validated operations.
//!
//! The preprocessor reads one operation at a time, collecting operands
//! until an operator keyword arrives, validating the operand count against
//! the operator table, and tracking the pieces of graphics state needed
//! before evaluation (the CTM and the save-depth). Malformed operations
//! degrade: an under-supplied operator is skipped, an unknown keyword is
//! logged and ignored, and operands past the hard cap are dropped.

use tracing::{info, warn};

use super::opcodes::{OpCode, op_spec};
use super::oplist::{Operand, Operands};
use crate::error::Result;
use crate::parser::lexer::{Lexer, Token};
use crate::utils::{MATRIX_IDENTITY, Matrix, mult_matrix};

/// Largest operand count any operator accepts (SCN/scn).
const MAX_OPERANDS: usize = 33;

/// One validated content operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub op: OpCode,
    pub args: Operands,
}

pub struct ContentPreprocessor<'a> {
    lexer: Lexer<'a>,
    ctm: Matrix,
    saved_states: Vec<Matrix>,
}

impl<'a> ContentPreprocessor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_ctm(data, MATRIX_IDENTITY)
    }

    pub fn with_ctm(data: &'a [u8], ctm: Matrix) -> Self {
        Self {
            lexer: Lexer::new(data),
            ctm,
            saved_states: Vec::new(),
        }
    }

    /// Current transformation matrix, kept in sync with q/Q/cm.
    pub fn ctm(&self) -> Matrix {
        self.ctm
    }

    pub fn set_ctm(&mut self, ctm: Matrix) {
        self.ctm = ctm;
    }

    /// Number of saves without a matching restore so far. The evaluator
    /// emits this many synthetic restores at end of stream.
    pub fn saved_states_depth(&self) -> usize {
        self.saved_states.len()
    }

    /// Read the next operation, or `None` at end of stream.
    pub fn read(&mut self) -> Result<Option<Operation>> {
        let mut args: Operands = Vec::new();
        loop {
            let token = self.lexer.next_token()?;
            let keyword = match token {
                Token::Eof => return Ok(None),
                Token::Keyword(kw) => kw,
                other => {
                    if let Some(operand) = self.operand_from_token(other)? {
                        if args.len() >= MAX_OPERANDS {
                            warn!("operand overflow, dropping operand");
                        } else {
                            args.push(operand);
                        }
                    }
                    continue;
                }
            };

            if keyword == b"BI" {
                return Ok(Some(self.read_inline_image()?));
            }

            let Some(spec) = op_spec(&keyword) else {
                warn!(
                    keyword = %String::from_utf8_lossy(&keyword),
                    "unknown operator"
                );
                continue;
            };

            if spec.variable_args {
                if args.len() > spec.num_args {
                    info!(
                        op = spec.op.name(),
                        expected = spec.num_args,
                        received = args.len(),
                        "too many operands for variable-arity operator"
                    );
                }
            } else if args.len() < spec.num_args {
                // Not executable with missing operands; skip the operator.
                info!(
                    op = spec.op.name(),
                    expected = spec.num_args,
                    received = args.len(),
                    "too few operands, skipping operator"
                );
                args.clear();
                continue;
            } else if args.len() > spec.num_args {
                info!(
                    op = spec.op.name(),
                    expected = spec.num_args,
                    received = args.len(),
                    "too many operands"
                );
            }

            self.preprocess(spec.op, &args);
            return Ok(Some(Operation { op: spec.op, args }));
        }
    }

    fn preprocess(&mut self, op: OpCode, args: &Operands) {
        match op {
            OpCode::Save => self.saved_states.push(self.ctm),
            OpCode::Restore => {
                if let Some(ctm) = self.saved_states.pop() {
                    self.ctm = ctm;
                }
            }
            OpCode::Transform => {
                let m: Vec<f64> = args.iter().filter_map(Operand::as_num).collect();
                if m.len() == 6 {
                    self.ctm = mult_matrix((m[0], m[1], m[2], m[3], m[4], m[5]), self.ctm);
                }
            }
            _ => {}
        }
    }

    /// Convert a token to an operand. `None` for stray closers, which are
    /// logged and skipped.
    fn operand_from_token(&mut self, token: Token) -> Result<Option<Operand>> {
        Ok(Some(match token {
            Token::Null => Operand::Null,
            Token::Bool(b) => Operand::Bool(b),
            Token::Int(i) => Operand::Int(i),
            Token::Real(r) => Operand::Real(r),
            Token::Name(n) => Operand::Name(n),
            Token::String(s) => Operand::Str(s),
            Token::ArrayStart => self.collect_array()?,
            Token::DictStart => self.collect_dict()?,
            other => {
                warn!(token = ?other, "stray token in operand position");
                return Ok(None);
            }
        }))
    }

    fn collect_array(&mut self) -> Result<Operand> {
        let mut items = Vec::new();
        loop {
            match self.lexer.next_token()? {
                Token::ArrayEnd => return Ok(Operand::Array(items)),
                Token::Eof => {
                    warn!("unterminated array in content stream");
                    return Ok(Operand::Array(items));
                }
                Token::Keyword(kw) => {
                    warn!(
                        keyword = %String::from_utf8_lossy(&kw),
                        "keyword inside array operand, ignored"
                    );
                }
                token => {
                    if let Some(operand) = self.operand_from_token(token)? {
                        items.push(operand);
                    }
                }
            }
        }
    }

    fn collect_dict(&mut self) -> Result<Operand> {
        let mut entries = Vec::new();
        loop {
            let key = match self.lexer.next_token()? {
                Token::DictEnd => return Ok(Operand::Dict(entries)),
                Token::Eof => {
                    warn!("unterminated dictionary in content stream");
                    return Ok(Operand::Dict(entries));
                }
                Token::Name(n) => n,
                other => {
                    warn!(token = ?other, "non-name dictionary key in content stream");
                    continue;
                }
            };
            match self.lexer.next_token()? {
                Token::DictEnd => {
                    warn!(key = %key, "dictionary key without value");
                    return Ok(Operand::Dict(entries));
                }
                Token::Eof => return Ok(Operand::Dict(entries)),
                token => {
                    if let Some(value) = self.operand_from_token(token)? {
                        entries.push((key, value));
                    }
                }
            }
        }
    }

    /// Parse `BI <dict entries> ID <data> EI` into a single operation
    /// carrying the parameter dictionary and the raw image bytes.
    fn read_inline_image(&mut self) -> Result<Operation> {
        let mut entries = Vec::new();
        loop {
            match self.lexer.next_token()? {
                Token::Keyword(kw) if kw == b"ID" => break,
                Token::Name(key) => {
                    let token = self.lexer.next_token()?;
                    if let Some(value) = self.operand_from_token(token)? {
                        entries.push((key, value));
                    }
                }
                Token::Eof => {
                    warn!("unterminated inline image dictionary");
                    return Ok(Operation {
                        op: OpCode::BeginInlineImage,
                        args: vec![Operand::Dict(entries), Operand::Str(Vec::new())],
                    });
                }
                other => {
                    warn!(token = ?other, "unexpected token in inline image dictionary");
                }
            }
        }

        // One whitespace byte separates ID from the data.
        let remaining = self.lexer.remaining();
        if remaining
            .first()
            .is_some_and(|&b| crate::parser::lexer::is_whitespace(b))
        {
            let pos = self.lexer.tell();
            self.lexer.set_pos(pos + 1);
        }

        // ASCII85 data carries its own terminator; trust it over a byte
        // scan, then consume the EI that follows. Everything else scans for
        // a delimiter-bounded EI.
        let filter = entries
            .iter()
            .find(|(k, _)| k == "F" || k == "Filter")
            .map(|(_, v)| v);
        let is_ascii85 = matches!(
            filter,
            Some(Operand::Name(n)) if n == "ASCII85Decode" || n == "A85"
        ) || matches!(
            filter,
            Some(Operand::Array(items))
                if matches!(
                    items.first(),
                    Some(Operand::Name(n)) if n == "ASCII85Decode" || n == "A85"
                )
        );

        let data = if is_ascii85 {
            let data = self.lexer.read_through(b"~>");
            match self.lexer.next_token()? {
                Token::Keyword(kw) if kw == b"EI" => {}
                other => warn!(token = ?other, "missing EI after inline image data"),
            }
            data
        } else {
            self.lexer.read_until_marker(b"EI")
        };

        Ok(Operation {
            op: OpCode::BeginInlineImage,
            args: vec![Operand::Dict(entries), Operand::Str(data)],
        })
    }
}
