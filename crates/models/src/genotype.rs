//! Cell genotypes and the parser for their serialized form.
//!
//! An architecture search emits genotypes as expressions of the shape
//! `Genotype(normal=[('sep_conv_3x3', 1), ...], normal_concat=range(2, 6),
//! reduce=[...], reduce_concat=range(2, 6))`. The archs config file stores
//! these verbatim, so this module parses that textual form into a typed
//! description the network constructor can consume.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenotypeError {
    #[error("unknown operation name `{0}`")]
    UnknownOp(String),
    #[error("expected {expected} at byte {at}")]
    Expected { expected: &'static str, at: usize },
    #[error("missing field `{0}` in genotype expression")]
    MissingField(&'static str),
    #[error("unknown field `{0}` in genotype expression")]
    UnknownField(String),
    #[error("edge list has odd length {0}; every node takes two incoming edges")]
    OddEdgeList(usize),
    #[error("empty concat list")]
    EmptyConcat,
}

/// The candidate operation vocabulary for a cell edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    SepConv3x3,
    SepConv5x5,
    DilConv3x3,
    DilConv5x5,
    MaxPool3x3,
    AvgPool3x3,
    SkipConnect,
    NoOp,
}

impl OpKind {
    pub fn from_name(name: &str) -> Result<Self, GenotypeError> {
        match name {
            "sep_conv_3x3" => Ok(Self::SepConv3x3),
            "sep_conv_5x5" => Ok(Self::SepConv5x5),
            "dil_conv_3x3" => Ok(Self::DilConv3x3),
            "dil_conv_5x5" => Ok(Self::DilConv5x5),
            "max_pool_3x3" => Ok(Self::MaxPool3x3),
            "avg_pool_3x3" => Ok(Self::AvgPool3x3),
            "skip_connect" => Ok(Self::SkipConnect),
            "none" => Ok(Self::NoOp),
            other => Err(GenotypeError::UnknownOp(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SepConv3x3 => "sep_conv_3x3",
            Self::SepConv5x5 => "sep_conv_5x5",
            Self::DilConv3x3 => "dil_conv_3x3",
            Self::DilConv5x5 => "dil_conv_5x5",
            Self::MaxPool3x3 => "max_pool_3x3",
            Self::AvgPool3x3 => "avg_pool_3x3",
            Self::SkipConnect => "skip_connect",
            Self::NoOp => "none",
        }
    }
}

/// A discovered cell structure: per-node operations and input connections for
/// the normal and reduction cells, plus the state indices concatenated into
/// each cell's output. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genotype {
    pub normal: Vec<(OpKind, usize)>,
    pub normal_concat: Vec<usize>,
    pub reduce: Vec<(OpKind, usize)>,
    pub reduce_concat: Vec<usize>,
}

impl Genotype {
    /// Parse a serialized genotype expression.
    pub fn parse(expr: &str) -> Result<Self, GenotypeError> {
        Parser::new(expr).genotype()
    }

    /// Number of intermediate nodes in the normal cell.
    pub fn normal_steps(&self) -> usize {
        self.normal.len() / 2
    }

    /// Number of intermediate nodes in the reduction cell.
    pub fn reduce_steps(&self) -> usize {
        self.reduce.len() / 2
    }
}

impl std::fmt::Display for Genotype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn edges(f: &mut std::fmt::Formatter<'_>, list: &[(OpKind, usize)]) -> std::fmt::Result {
            write!(f, "[")?;
            for (i, (op, idx)) in list.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "('{}', {})", op.name(), idx)?;
            }
            write!(f, "]")
        }
        fn concat(f: &mut std::fmt::Formatter<'_>, list: &[usize]) -> std::fmt::Result {
            write!(f, "[")?;
            for (i, idx) in list.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{idx}")?;
            }
            write!(f, "]")
        }

        write!(f, "Genotype(normal=")?;
        edges(f, &self.normal)?;
        write!(f, ", normal_concat=")?;
        concat(f, &self.normal_concat)?;
        write!(f, ", reduce=")?;
        edges(f, &self.reduce)?;
        write!(f, ", reduce_concat=")?;
        concat(f, &self.reduce_concat)?;
        write!(f, ")")
    }
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn genotype(&mut self) -> Result<Genotype, GenotypeError> {
        self.skip_ws();
        self.keyword("Genotype")?;
        self.expect(b'(', "`(`")?;

        let mut normal = None;
        let mut normal_concat = None;
        let mut reduce = None;
        let mut reduce_concat = None;

        loop {
            self.skip_ws();
            if self.eat(b')') {
                break;
            }
            let field = self.ident()?;
            self.expect(b'=', "`=`")?;
            match field.as_str() {
                "normal" => normal = Some(self.edge_list()?),
                "reduce" => reduce = Some(self.edge_list()?),
                "normal_concat" => normal_concat = Some(self.concat_list()?),
                "reduce_concat" => reduce_concat = Some(self.concat_list()?),
                other => return Err(GenotypeError::UnknownField(other.to_string())),
            }
            self.skip_ws();
            if !self.eat(b',') {
                self.expect(b')', "`,` or `)`")?;
                break;
            }
        }

        let genotype = Genotype {
            normal: normal.ok_or(GenotypeError::MissingField("normal"))?,
            normal_concat: normal_concat.ok_or(GenotypeError::MissingField("normal_concat"))?,
            reduce: reduce.ok_or(GenotypeError::MissingField("reduce"))?,
            reduce_concat: reduce_concat.ok_or(GenotypeError::MissingField("reduce_concat"))?,
        };

        if genotype.normal.len() % 2 != 0 {
            return Err(GenotypeError::OddEdgeList(genotype.normal.len()));
        }
        if genotype.reduce.len() % 2 != 0 {
            return Err(GenotypeError::OddEdgeList(genotype.reduce.len()));
        }
        if genotype.normal_concat.is_empty() || genotype.reduce_concat.is_empty() {
            return Err(GenotypeError::EmptyConcat);
        }
        Ok(genotype)
    }

    /// `[('op_name', index), ...]`
    fn edge_list(&mut self) -> Result<Vec<(OpKind, usize)>, GenotypeError> {
        self.skip_ws();
        self.expect(b'[', "`[`")?;
        let mut edges = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(b']') {
                break;
            }
            self.expect(b'(', "`(`")?;
            let name = self.quoted()?;
            self.expect(b',', "`,`")?;
            let index = self.number()?;
            self.expect(b')', "`)`")?;
            edges.push((OpKind::from_name(&name)?, index));
            self.skip_ws();
            if !self.eat(b',') {
                self.expect(b']', "`,` or `]`")?;
                break;
            }
        }
        Ok(edges)
    }

    /// `range(a, b)` or `[a, b, ...]`
    fn concat_list(&mut self) -> Result<Vec<usize>, GenotypeError> {
        self.skip_ws();
        if self.peek() == Some(b'[') {
            self.pos += 1;
            let mut out = Vec::new();
            loop {
                self.skip_ws();
                if self.eat(b']') {
                    break;
                }
                out.push(self.number()?);
                self.skip_ws();
                if !self.eat(b',') {
                    self.expect(b']', "`,` or `]`")?;
                    break;
                }
            }
            return Ok(out);
        }
        self.keyword("range")?;
        self.expect(b'(', "`(`")?;
        let start = self.number()?;
        self.expect(b',', "`,`")?;
        let end = self.number()?;
        self.expect(b')', "`)`")?;
        Ok((start..end).collect())
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8, expected: &'static str) -> Result<(), GenotypeError> {
        if self.eat(byte) {
            Ok(())
        } else {
            Err(GenotypeError::Expected {
                expected,
                at: self.pos,
            })
        }
    }

    fn keyword(&mut self, word: &'static str) -> Result<(), GenotypeError> {
        self.skip_ws();
        if self.src[self.pos..].starts_with(word.as_bytes()) {
            self.pos += word.len();
            Ok(())
        } else {
            Err(GenotypeError::Expected {
                expected: word,
                at: self.pos,
            })
        }
    }

    fn ident(&mut self) -> Result<String, GenotypeError> {
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(GenotypeError::Expected {
                expected: "identifier",
                at: self.pos,
            });
        }
        Ok(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }

    fn quoted(&mut self) -> Result<String, GenotypeError> {
        self.skip_ws();
        let quote = match self.peek() {
            Some(q @ (b'\'' | b'"')) => q,
            _ => {
                return Err(GenotypeError::Expected {
                    expected: "quoted operation name",
                    at: self.pos,
                })
            }
        };
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|b| b != quote) {
            self.pos += 1;
        }
        if self.peek() != Some(quote) {
            return Err(GenotypeError::Expected {
                expected: "closing quote",
                at: self.pos,
            });
        }
        let name = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        self.pos += 1;
        Ok(name)
    }

    fn number(&mut self) -> Result<usize, GenotypeError> {
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(GenotypeError::Expected {
                expected: "number",
                at: self.pos,
            });
        }
        String::from_utf8_lossy(&self.src[start..self.pos])
            .parse()
            .map_err(|_| GenotypeError::Expected {
                expected: "number",
                at: start,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DARTS_V2: &str = "Genotype(normal=[('sep_conv_3x3', 0), ('sep_conv_3x3', 1), \
        ('sep_conv_3x3', 0), ('sep_conv_3x3', 1), ('sep_conv_3x3', 1), ('skip_connect', 0), \
        ('skip_connect', 0), ('dil_conv_3x3', 2)], normal_concat=range(2, 6), \
        reduce=[('max_pool_3x3', 0), ('max_pool_3x3', 1), ('skip_connect', 2), \
        ('max_pool_3x3', 1), ('max_pool_3x3', 0), ('skip_connect', 2), ('skip_connect', 2), \
        ('max_pool_3x3', 1)], reduce_concat=range(2, 6))";

    #[test]
    fn parses_canonical_expression() {
        let g = Genotype::parse(DARTS_V2).unwrap();
        assert_eq!(g.normal.len(), 8);
        assert_eq!(g.reduce.len(), 8);
        assert_eq!(g.normal_steps(), 4);
        assert_eq!(g.normal[0], (OpKind::SepConv3x3, 0));
        assert_eq!(g.reduce[0], (OpKind::MaxPool3x3, 0));
        assert_eq!(g.normal_concat, vec![2, 3, 4, 5]);
        assert_eq!(g.reduce_concat, vec![2, 3, 4, 5]);
    }

    #[test]
    fn parsing_is_deterministic() {
        assert_eq!(
            Genotype::parse(DARTS_V2).unwrap(),
            Genotype::parse(DARTS_V2).unwrap()
        );
    }

    #[test]
    fn accepts_explicit_concat_list_and_double_quotes() {
        let g = Genotype::parse(
            "Genotype(normal=[(\"skip_connect\", 0), (\"none\", 1)], normal_concat=[2], \
             reduce=[('avg_pool_3x3', 0), ('dil_conv_5x5', 1)], reduce_concat=[2])",
        )
        .unwrap();
        assert_eq!(g.normal, vec![(OpKind::SkipConnect, 0), (OpKind::NoOp, 1)]);
        assert_eq!(g.normal_concat, vec![2]);
        assert_eq!(g.reduce[1], (OpKind::DilConv5x5, 1));
    }

    #[test]
    fn accepts_fields_in_any_order() {
        let g = Genotype::parse(
            "Genotype(reduce_concat=range(2, 3), reduce=[('max_pool_3x3', 0), ('none', 1)], \
             normal_concat=range(2, 3), normal=[('sep_conv_5x5', 0), ('sep_conv_5x5', 1)])",
        )
        .unwrap();
        assert_eq!(g.normal[0].0, OpKind::SepConv5x5);
    }

    #[test]
    fn rejects_unknown_op() {
        let err = Genotype::parse(
            "Genotype(normal=[('conv_7x7', 0), ('none', 1)], normal_concat=range(2, 3), \
             reduce=[('none', 0), ('none', 1)], reduce_concat=range(2, 3))",
        )
        .unwrap_err();
        assert_eq!(err, GenotypeError::UnknownOp("conv_7x7".to_string()));
    }

    #[test]
    fn rejects_missing_field() {
        let err = Genotype::parse(
            "Genotype(normal=[('none', 0), ('none', 1)], normal_concat=range(2, 3))",
        )
        .unwrap_err();
        assert_eq!(err, GenotypeError::MissingField("reduce"));
    }

    #[test]
    fn rejects_odd_edge_list() {
        let err = Genotype::parse(
            "Genotype(normal=[('none', 0)], normal_concat=range(2, 3), \
             reduce=[('none', 0), ('none', 1)], reduce_concat=range(2, 3))",
        )
        .unwrap_err();
        assert_eq!(err, GenotypeError::OddEdgeList(1));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Genotype::parse("not a genotype").is_err());
        assert!(Genotype::parse("Genotype(normal=[('none', 0), ('none', 1)]").is_err());
    }

    #[test]
    fn display_round_trips() {
        let g = Genotype::parse(DARTS_V2).unwrap();
        assert_eq!(Genotype::parse(&g.to_string()).unwrap(), g);
    }
}
