use std::fmt::Display;

use miette::Error;

use crate::error::RuntimeError;

/// Reduced rational, used for dimension exponents so roots of units stay
/// representable (`sqrt(m2)` is `m`, `x^(1/2)` halves every exponent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frac {
    num: i64,
    den: i64,
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

impl Frac {
    pub const ZERO: Frac = Frac { num: 0, den: 1 };
    pub const ONE: Frac = Frac { num: 1, den: 1 };

    pub fn new(num: i64, den: i64) -> Frac {
        assert!(den != 0, "fraction with zero denominator");
        let sign = if den < 0 { -1 } else { 1 };
        let g = gcd(num, den);
        Frac {
            num: sign * num / g,
            den: sign * den / g,
        }
    }

    pub fn int(n: i64) -> Frac {
        Frac { num: n, den: 1 }
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    pub fn add(self, other: Frac) -> Frac {
        Frac::new(self.num * other.den + other.num * self.den, self.den * other.den)
    }

    pub fn sub(self, other: Frac) -> Frac {
        Frac::new(self.num * other.den - other.num * self.den, self.den * other.den)
    }

    pub fn mul(self, other: Frac) -> Frac {
        Frac::new(self.num * other.num, self.den * other.den)
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Best small-denominator rational for `x`, via continued fractions.
    /// Returns `None` when nothing with denominator <= 64 comes within 1e-9.
    pub fn approximate(x: f64) -> Option<Frac> {
        if !x.is_finite() {
            return None;
        }
        let (mut h0, mut h1) = (1_i64, x.floor() as i64);
        let (mut k0, mut k1) = (0_i64, 1_i64);
        let mut frac = x - x.floor();
        for _ in 0..24 {
            if (h1 as f64 / k1 as f64 - x).abs() < 1e-9 {
                return Some(Frac::new(h1, k1));
            }
            if frac.abs() < 1e-12 {
                break;
            }
            let inv = 1.0 / frac;
            let a = inv.floor() as i64;
            frac = inv - inv.floor();
            (h0, h1) = (h1, a * h1 + h0);
            (k0, k1) = (k1, a * k1 + k0);
            if k1 > 64 || h1.abs() > i64::from(i32::MAX) {
                return None;
            }
        }
        None
    }
}

impl Display for Frac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// The seven SI base dimensions, as rational exponents.
/// Order (and the coherent-symbol rendering order) is kg, A, mol, m, s, K, cd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim(pub [Frac; 7]);

pub const KG: usize = 0;
pub const AMP: usize = 1;
pub const MOL: usize = 2;
pub const METRE: usize = 3;
pub const SEC: usize = 4;
pub const KELVIN: usize = 5;
pub const CANDELA: usize = 6;

const DIM_SYMBOLS: [&str; 7] = ["kg", "A", "mol", "m", "s", "K", "cd"];

impl Dim {
    pub const NONE: Dim = Dim([Frac::ZERO; 7]);

    pub fn is_none(&self) -> bool {
        self.0.iter().all(Frac::is_zero)
    }

    pub fn combine(&self, other: &Dim, invert_rhs: bool) -> Dim {
        let mut out = [Frac::ZERO; 7];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = if invert_rhs {
                self.0[i].sub(other.0[i])
            } else {
                self.0[i].add(other.0[i])
            };
        }
        Dim(out)
    }

    pub fn pow(&self, n: Frac) -> Dim {
        let mut out = [Frac::ZERO; 7];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.0[i].mul(n);
        }
        Dim(out)
    }

    /// Composed coherent symbol, e.g. `kg.m.s-2`. Empty for a dimensionless
    /// vector.
    pub fn coherent_symbol(&self) -> String {
        let mut out = String::new();
        for (i, exp) in self.0.iter().enumerate() {
            if exp.is_zero() {
                continue;
            }
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(DIM_SYMBOLS[i]);
            if *exp != Frac::ONE {
                out.push_str(&exp.to_string());
            }
        }
        out
    }
}

/// Ratio of two unit scales. A ratio within rounding error of a power of
/// ten is snapped exact, so prefix rescaling like μm to nm stays lossless
/// (`1e-6 / 1e-9` divides to `999.9999999999999` on raw f64 scales).
pub(crate) fn scale_ratio(from: f64, to: f64) -> f64 {
    let ratio = from / to;
    if ratio > 0.0 && ratio.is_finite() {
        let exp = ratio.log10().round();
        if exp.abs() <= 300.0 {
            let snapped = 10f64.powi(exp as i32);
            if ((ratio - snapped) / snapped).abs() < 1e-9 {
                return snapped;
            }
        }
    }
    ratio
}

/// An immutable unit: dimension vector, scale relative to the coherent SI
/// unit, and the display symbol it was resolved from (absent for units that
/// arise from arithmetic).
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub dim: Dim,
    pub scale: f64,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnitOp {
    Mul,
    Div,
}

impl Unit {
    pub fn dimensionless() -> Unit {
        Unit {
            dim: Dim::NONE,
            scale: 1.0,
            symbol: None,
        }
    }

    pub fn is_dimensionless(&self) -> bool {
        self.dim.is_none()
    }

    /// Same dimension vector; scales may differ.
    pub fn commensurable(&self, other: &Unit) -> bool {
        self.dim == other.dim
    }

    pub fn combine(&self, other: &Unit, op: UnitOp) -> Unit {
        match op {
            UnitOp::Mul => Unit {
                dim: self.dim.combine(&other.dim, false),
                scale: self.scale * other.scale,
                symbol: None,
            },
            UnitOp::Div => Unit {
                dim: self.dim.combine(&other.dim, true),
                scale: scale_ratio(self.scale, other.scale),
                symbol: None,
            },
        }
    }

    pub fn power(&self, n: Frac) -> Unit {
        Unit {
            dim: self.dim.pow(n),
            scale: self.scale.powf(n.as_f64()),
            symbol: None,
        }
    }

    /// Multiplier taking a magnitude expressed in `self` to one expressed in
    /// `to`. Requires commensurability.
    pub fn conversion_factor(&self, to: &Unit) -> Result<f64, Error> {
        if !self.commensurable(to) {
            return Err(RuntimeError::unit_mismatch(format!(
                "cannot convert {} to {}",
                self, to
            )));
        }
        Ok(scale_ratio(self.scale, to.scale))
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.symbol {
            Some(sym) => write!(f, "{sym}"),
            None => write!(f, "{}", self.dim.coherent_symbol()),
        }
    }
}

fn dim(kg: i64, a: i64, mol: i64, m: i64, s: i64, k: i64, cd: i64) -> Dim {
    Dim([
        Frac::int(kg),
        Frac::int(a),
        Frac::int(mol),
        Frac::int(m),
        Frac::int(s),
        Frac::int(k),
        Frac::int(cd),
    ])
}

/// Fixed symbol table mapping unit text to (dimension, scale). Constructed
/// explicitly and handed to the interpreter, so tests can supply their own
/// reduced tables.
#[derive(Debug, Clone)]
pub struct UnitTable {
    named: Vec<(&'static str, Dim, f64)>,
    prefixes: Vec<(&'static str, f64)>,
}

impl UnitTable {
    /// The standard SI table: base units, the usual derived symbols, and the
    /// full prefix ladder.
    pub fn si() -> UnitTable {
        use std::f64::consts::PI;
        let named = vec![
            // base units (gram carries the 1e-3 so `kg` composes as k + g)
            ("m", dim(0, 0, 0, 1, 0, 0, 0), 1.0),
            ("s", dim(0, 0, 0, 0, 1, 0, 0), 1.0),
            ("g", dim(1, 0, 0, 0, 0, 0, 0), 1e-3),
            ("A", dim(0, 1, 0, 0, 0, 0, 0), 1.0),
            ("K", dim(0, 0, 0, 0, 0, 1, 0), 1.0),
            ("mol", dim(0, 0, 1, 0, 0, 0, 0), 1.0),
            ("cd", dim(0, 0, 0, 0, 0, 0, 1), 1.0),
            // derived
            ("Hz", dim(0, 0, 0, 0, -1, 0, 0), 1.0),
            ("N", dim(1, 0, 0, 1, -2, 0, 0), 1.0),
            ("Pa", dim(1, 0, 0, -1, -2, 0, 0), 1.0),
            ("J", dim(1, 0, 0, 2, -2, 0, 0), 1.0),
            ("W", dim(1, 0, 0, 2, -3, 0, 0), 1.0),
            ("C", dim(0, 1, 0, 0, 1, 0, 0), 1.0),
            ("V", dim(1, -1, 0, 2, -3, 0, 0), 1.0),
            ("F", dim(-1, 2, 0, -2, 4, 0, 0), 1.0),
            ("Ω", dim(1, -2, 0, 2, -3, 0, 0), 1.0),
            ("ohm", dim(1, -2, 0, 2, -3, 0, 0), 1.0),
            ("S", dim(-1, 2, 0, -2, 3, 0, 0), 1.0),
            ("Wb", dim(1, -1, 0, 2, -2, 0, 0), 1.0),
            ("T", dim(1, -1, 0, 0, -2, 0, 0), 1.0),
            ("H", dim(1, -2, 0, 2, -2, 0, 0), 1.0),
            ("lm", dim(0, 0, 0, 0, 0, 0, 1), 1.0),
            ("lx", dim(0, 0, 0, -2, 0, 0, 1), 1.0),
            ("L", dim(0, 0, 0, 3, 0, 0, 0), 1e-3),
            // dimensionless scales
            ("rad", Dim::NONE, 1.0),
            ("sr", Dim::NONE, 1.0),
            ("deg", Dim::NONE, PI / 180.0),
            ("°", Dim::NONE, PI / 180.0),
        ];
        let prefixes = vec![
            // two-character prefix first so longest-match wins
            ("da", 1e1),
            ("Q", 1e30),
            ("R", 1e27),
            ("Y", 1e24),
            ("Z", 1e21),
            ("E", 1e18),
            ("P", 1e15),
            ("T", 1e12),
            ("G", 1e9),
            ("M", 1e6),
            ("k", 1e3),
            ("h", 1e2),
            ("d", 1e-1),
            ("c", 1e-2),
            ("m", 1e-3),
            ("µ", 1e-6),
            ("μ", 1e-6),
            ("u", 1e-6),
            ("n", 1e-9),
            ("p", 1e-12),
            ("f", 1e-15),
            ("a", 1e-18),
            ("z", 1e-21),
            ("y", 1e-24),
            ("r", 1e-27),
            ("q", 1e-30),
        ];
        UnitTable { named, prefixes }
    }

    pub fn empty() -> UnitTable {
        UnitTable {
            named: Vec::new(),
            prefixes: Vec::new(),
        }
    }

    pub fn with_unit(mut self, symbol: &'static str, dim: Dim, scale: f64) -> UnitTable {
        self.named.push((symbol, dim, scale));
        self
    }

    /// Resolves compound unit text: `.`-joined factors with at most one `/`
    /// splitting numerator from denominator, each factor an optionally
    /// prefixed symbol with an optional integer exponent (`N.m/s2`, `μm`).
    pub fn resolve(&self, text: &str) -> Result<Unit, Error> {
        if text.is_empty() {
            return Err(RuntimeError::UnknownUnit(String::new()).into());
        }
        let mut parts = text.splitn(2, '/');
        let numerator = parts.next().unwrap_or("");
        let denominator = parts.next();

        let mut unit = Unit::dimensionless();
        for factor in numerator.split('.') {
            let f = self.resolve_factor(text, factor)?;
            unit = unit.combine(&f, UnitOp::Mul);
        }
        if let Some(denominator) = denominator {
            for factor in denominator.split('.') {
                let f = self.resolve_factor(text, factor)?;
                unit = unit.combine(&f, UnitOp::Div);
            }
        }
        unit.symbol = Some(text.to_string());
        Ok(unit)
    }

    fn resolve_factor(&self, whole: &str, factor: &str) -> Result<Unit, Error> {
        let unknown = || Error::from(RuntimeError::UnknownUnit(whole.to_string()));
        if factor.is_empty() {
            return Err(unknown());
        }

        // trailing integer exponent, possibly negative
        let exp_at = factor
            .char_indices()
            .find(|&(i, c)| {
                c.is_ascii_digit() || (c == '-' && i > 0)
            })
            .map(|(i, _)| i);
        let (base, exponent) = match exp_at {
            Some(0) | None => (factor, 1),
            Some(i) => {
                let exp: i64 = factor[i..].parse().map_err(|_| unknown())?;
                (&factor[..i], exp)
            }
        };

        let (dim, scale) = self.lookup(base).ok_or_else(unknown)?;
        Ok(Unit {
            dim,
            scale,
            symbol: None,
        }
        .power(Frac::int(exponent)))
    }

    /// Exact named match first, so `m`, `mol` and `cd` resolve as units
    /// rather than prefixes; then prefix + named unit.
    fn lookup(&self, base: &str) -> Option<(Dim, f64)> {
        if let Some(&(_, dim, scale)) = self.named.iter().find(|(sym, ..)| *sym == base) {
            return Some((dim, scale));
        }
        for &(prefix, factor) in &self.prefixes {
            if let Some(rest) = base.strip_prefix(prefix) {
                if rest.is_empty() {
                    continue;
                }
                if let Some(&(_, dim, scale)) = self.named.iter().find(|(sym, ..)| *sym == rest) {
                    return Some((dim, factor * scale));
                }
            }
        }
        None
    }
}
