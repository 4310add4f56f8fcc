//! Display text for values. Every rendering re-parses to the value it came
//! from: uncertain or complex magnitudes are parenthesized before their unit,
//! and units without a symbol of their own fold their scale into the
//! magnitude and render the coherent composed symbol between pipes.

use std::fmt::Display;

use crate::matrix::{Cell, Matrix};
use crate::quantity::Quantity;

// a symbol the lexer would accept attached directly to a number
fn attachable(symbol: &str) -> bool {
    let mut chars = symbol.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '°' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphabetic() || c == '°' || c.is_ascii_digit())
}

fn complex_pair(re: f64, im: f64) -> String {
    if im < 0.0 {
        format!("{re} - {}i", -im)
    } else {
        format!("{re} + {im}i")
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // units that arose from arithmetic have no symbol; fold their scale
        // away and show the coherent composition
        let (re, im, sre, sim, symbol) = match &self.unit.symbol {
            Some(symbol) => (self.re, self.im, self.sre, self.sim, Some(symbol.clone())),
            None => {
                let k = self.unit.scale;
                let symbol = self.unit.dim.coherent_symbol();
                (
                    self.re * k,
                    self.im * k,
                    self.sre * k,
                    self.sim * k,
                    (!symbol.is_empty()).then_some(symbol),
                )
            }
        };

        let uncertain = sre != 0.0 || sim != 0.0;
        let body = match (self.complex, uncertain) {
            (false, false) => format!("{re}"),
            (false, true) => format!("{re} ± {sre}"),
            (true, false) => complex_pair(re, im),
            (true, true) => format!(
                "({}) ± ({})",
                complex_pair(re, im),
                complex_pair(sre, sim)
            ),
        };

        match symbol {
            None => write!(f, "{body}"),
            Some(symbol) if !self.complex && !uncertain => {
                if attachable(&symbol) {
                    write!(f, "{body}{symbol}")
                } else {
                    write!(f, "{body}|{symbol}|")
                }
            }
            Some(symbol) => write!(f, "({body})|{symbol}|"),
        }
    }
}

impl Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Quantity(q) => write!(f, "{q}"),
            Cell::Text(t) => {
                write!(f, "\"")?;
                for c in t.chars() {
                    match c {
                        '{' => write!(f, "{{{{")?,
                        '}' => write!(f, "}}}}")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Cell::Nested(m) => write!(f, "{m}"),
        }
    }
}

impl Display for Matrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, row) in self.rows().iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            for (j, cell) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{cell}")?;
            }
        }
        write!(f, "]")
    }
}
