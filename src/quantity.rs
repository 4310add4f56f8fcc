use std::cmp::Ordering;

use miette::Error;

use crate::error::RuntimeError;
use crate::unit::{Frac, Unit, UnitOp, UnitTable, scale_ratio};

fn squared(x: f64) -> f64 {
    x * x
}

/// The unified numeric value: a (possibly complex) magnitude, one
/// uncertainty per channel, and a unit. Magnitudes are stored in the unit's
/// own scale (`5 km` keeps the 5). Uncertainties are standard deviations and
/// never negative. Immutable; every operation builds a new instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub re: f64,
    pub im: f64,
    pub sre: f64,
    pub sim: f64,
    pub unit: Unit,
    pub complex: bool,
}

impl Quantity {
    pub fn real(value: f64, unit: Unit) -> Quantity {
        Quantity {
            re: value,
            im: 0.0,
            sre: 0.0,
            sim: 0.0,
            unit,
            complex: false,
        }
    }

    pub fn dimensionless(value: f64) -> Quantity {
        Quantity::real(value, Unit::dimensionless())
    }

    pub fn imaginary(value: f64) -> Quantity {
        Quantity {
            re: 0.0,
            im: value,
            sre: 0.0,
            sim: 0.0,
            unit: Unit::dimensionless(),
            complex: true,
        }
    }

    /// A literal with its lexical suffix: empty for a bare number, `i`/`j`
    /// for an imaginary component, anything else resolved as unit text.
    pub fn from_literal(value: f64, suffix: &str, table: &UnitTable) -> Result<Quantity, Error> {
        match suffix {
            "" => Ok(Quantity::dimensionless(value)),
            "i" | "j" => Ok(Quantity::imaginary(value)),
            _ => Ok(Quantity::real(value, table.resolve(suffix)?)),
        }
    }

    /// Rescales into `to`'s unit. Signals `UnitMismatch` unless the units are
    /// commensurable.
    pub fn convert(&self, to: &Unit) -> Result<Quantity, Error> {
        let factor = self.unit.conversion_factor(to)?;
        Ok(Quantity {
            re: self.re * factor,
            im: self.im * factor,
            sre: self.sre * factor,
            sim: self.sim * factor,
            unit: to.clone(),
            complex: self.complex,
        })
    }

    pub fn checked_add(&self, rhs: &Quantity) -> Result<Quantity, Error> {
        self.add_sub(rhs, 1.0)
    }

    pub fn checked_sub(&self, rhs: &Quantity) -> Result<Quantity, Error> {
        self.add_sub(rhs, -1.0)
    }

    // result takes the left operand's unit; the right side is rescaled first
    fn add_sub(&self, rhs: &Quantity, sign: f64) -> Result<Quantity, Error> {
        if !self.unit.commensurable(&rhs.unit) {
            return Err(RuntimeError::unit_mismatch(format!(
                "cannot add {} and {}",
                self.unit, rhs.unit
            )));
        }
        let factor = scale_ratio(rhs.unit.scale, self.unit.scale);
        Ok(Quantity {
            re: self.re + sign * rhs.re * factor,
            im: self.im + sign * rhs.im * factor,
            sre: self.sre.hypot(rhs.sre * factor),
            sim: self.sim.hypot(rhs.sim * factor),
            unit: self.unit.clone(),
            complex: self.complex || rhs.complex,
        })
    }

    pub fn checked_mul(&self, rhs: &Quantity) -> Result<Quantity, Error> {
        let (a, b, c, d) = (self.re, self.im, rhs.re, rhs.im);
        let (va, vb) = (squared(self.sre), squared(self.sim));
        let (vc, vd) = (squared(rhs.sre), squared(rhs.sim));
        // (a + bi)(c + di) = (ac - bd) + (ad + bc)i; the Jacobian quadrature
        // below reduces to relative-error quadrature for real operands
        Ok(Quantity {
            re: a * c - b * d,
            im: a * d + b * c,
            sre: (c * c * va + d * d * vb + a * a * vc + b * b * vd).sqrt(),
            sim: (d * d * va + c * c * vb + b * b * vc + a * a * vd).sqrt(),
            unit: self.unit.combine(&rhs.unit, UnitOp::Mul),
            complex: self.complex || rhs.complex,
        })
    }

    pub fn checked_div(&self, rhs: &Quantity) -> Result<Quantity, Error> {
        let (a, b, c, d) = (self.re, self.im, rhs.re, rhs.im);
        let denom = c * c + d * d;
        if denom == 0.0 {
            return Err(RuntimeError::DivisionByZero.into());
        }
        let (va, vb) = (squared(self.sre), squared(self.sim));
        let (vc, vd) = (squared(rhs.sre), squared(rhs.sim));
        // (a + bi)/(c + di) = ((ac + bd) + (bc - ad)i) / (c^2 + d^2)
        let re = a * c + b * d;
        let im = b * c - a * d;
        let denom2 = denom * denom;
        let denom4 = denom2 * denom2;
        Ok(Quantity {
            re: re / denom,
            im: im / denom,
            sre: (c * c * va / denom2
                + d * d * vb / denom2
                + squared(a * denom - 2.0 * c * re) * vc / denom4
                + squared(b * denom - 2.0 * d * re) * vd / denom4)
                .sqrt(),
            sim: (d * d * va / denom2
                + c * c * vb / denom2
                + squared(b * denom - 2.0 * c * im) * vc / denom4
                + squared(a * denom - 2.0 * d * im) * vd / denom4)
                .sqrt(),
            unit: self.unit.combine(&rhs.unit, UnitOp::Div),
            complex: self.complex || rhs.complex,
        })
    }

    /// `x ^ n`. The exponent must be real and dimensionless and is treated
    /// as exact; a dimensioned base additionally needs a rational exponent
    /// so the unit's exponent vector stays representable.
    pub fn checked_pow(&self, exp: &Quantity) -> Result<Quantity, Error> {
        if exp.complex {
            return Err(RuntimeError::type_mismatch(
                "the exponent of '^' must be real",
            ));
        }
        if !exp.unit.is_dimensionless() {
            return Err(RuntimeError::unit_mismatch(
                "the exponent of '^' must be dimensionless",
            ));
        }
        let n = exp.re * exp.unit.scale;

        let unit = match Frac::approximate(n) {
            Some(frac) => self.unit.power(frac),
            None if self.unit.is_dimensionless() => Unit {
                scale: self.unit.scale.powf(n),
                ..Unit::dimensionless()
            },
            None => {
                return Err(RuntimeError::type_mismatch(format!(
                    "cannot raise a quantity in {} to the irrational power {n}",
                    self.unit
                )));
            }
        };

        // a fractional power of a negative real has no real result; it takes
        // the principal complex branch rather than producing NaN
        if self.complex || (self.re < 0.0 && n.fract() != 0.0) {
            let r = self.re.hypot(self.im);
            let theta = self.im.atan2(self.re);
            let mag = r.powf(n);
            let deriv = (n * r.powf(n - 1.0)).abs();
            Ok(Quantity {
                re: mag * (n * theta).cos(),
                im: mag * (n * theta).sin(),
                sre: deriv * self.sre,
                sim: deriv * self.sim,
                unit,
                complex: true,
            })
        } else {
            let deriv = (n * self.re.powf(n - 1.0)).abs();
            Ok(Quantity {
                re: self.re.powf(n),
                im: 0.0,
                sre: deriv * self.sre,
                sim: 0.0,
                unit,
                complex: false,
            })
        }
    }

    /// Unary minus: magnitude negated, uncertainty untouched.
    pub fn negate(&self) -> Quantity {
        Quantity {
            re: -self.re,
            im: -self.im,
            ..self.clone()
        }
    }

    /// The `±` operator: keeps the left magnitude and unit, replaces the
    /// uncertainty with `|u|` rescaled into the left unit. A complex right
    /// operand sets both channels.
    pub fn with_uncertainty(&self, u: &Quantity) -> Result<Quantity, Error> {
        if !self.unit.commensurable(&u.unit) {
            return Err(RuntimeError::unit_mismatch(format!(
                "uncertainty in {} attached to a quantity in {}",
                u.unit, self.unit
            )));
        }
        let factor = scale_ratio(u.unit.scale, self.unit.scale);
        Ok(Quantity {
            sre: (u.re * factor).abs(),
            sim: if u.complex { (u.im * factor).abs() } else { 0.0 },
            complex: self.complex || u.complex,
            ..self.clone()
        })
    }

    /// Orders rescaled real magnitudes, ignoring uncertainty. Complex
    /// operands cannot be ordered.
    pub fn compare(&self, rhs: &Quantity) -> Result<Ordering, Error> {
        if self.complex || rhs.complex {
            return Err(RuntimeError::InvalidComparison(
                "cannot compare complex quantities".into(),
            )
            .into());
        }
        if !self.unit.commensurable(&rhs.unit) {
            return Err(RuntimeError::unit_mismatch(format!(
                "cannot compare {} with {}",
                self.unit, rhs.unit
            )));
        }
        let factor = scale_ratio(rhs.unit.scale, self.unit.scale);
        self.re.partial_cmp(&(rhs.re * factor)).ok_or_else(|| {
            RuntimeError::InvalidComparison("comparison with a NaN magnitude".into()).into()
        })
    }

    // a dimensionless operand in coherent scale, for the transcendentals
    fn coherent_dimensionless(&self, name: &str) -> Result<(f64, f64, f64, f64), Error> {
        if !self.unit.is_dimensionless() {
            return Err(RuntimeError::unit_mismatch(format!(
                "{name} takes a dimensionless argument, got {}",
                self.unit
            )));
        }
        let k = self.unit.scale;
        Ok((self.re * k, self.im * k, self.sre * k, self.sim * k))
    }

    pub fn sin(&self) -> Result<Quantity, Error> {
        let (a, b, sa, sb) = self.coherent_dimensionless("sin")?;
        // sin(a + bi) = cosh(b)sin(a) + i sinh(b)cos(a)
        let (sina, cosa) = (a.sin(), a.cos());
        let (sinhb, coshb) = (b.sinh(), b.cosh());
        Ok(Quantity {
            re: coshb * sina,
            im: sinhb * cosa,
            sre: (squared(coshb * cosa) * squared(sa) + squared(sinhb * sina) * squared(sb)).sqrt(),
            sim: (squared(sinhb * sina) * squared(sa) + squared(coshb * cosa) * squared(sb)).sqrt(),
            unit: Unit::dimensionless(),
            complex: self.complex,
        })
    }

    pub fn cos(&self) -> Result<Quantity, Error> {
        let (a, b, sa, sb) = self.coherent_dimensionless("cos")?;
        // cos(a + bi) = cosh(b)cos(a) - i sinh(b)sin(a)
        let (sina, cosa) = (a.sin(), a.cos());
        let (sinhb, coshb) = (b.sinh(), b.cosh());
        Ok(Quantity {
            re: coshb * cosa,
            im: -sinhb * sina,
            sre: (squared(coshb * sina) * squared(sa) + squared(sinhb * cosa) * squared(sb)).sqrt(),
            sim: (squared(sinhb * cosa) * squared(sa) + squared(coshb * sina) * squared(sb)).sqrt(),
            unit: Unit::dimensionless(),
            complex: self.complex,
        })
    }

    pub fn exp(&self) -> Result<Quantity, Error> {
        let (a, b, sa, sb) = self.coherent_dimensionless("exp")?;
        // exp(a + bi) = e^a (cos b + i sin b)
        let ea = a.exp();
        let (re, im) = (ea * b.cos(), ea * b.sin());
        Ok(Quantity {
            re,
            im,
            sre: (squared(re) * squared(sa) + squared(im) * squared(sb)).sqrt(),
            sim: (squared(im) * squared(sa) + squared(re) * squared(sb)).sqrt(),
            unit: Unit::dimensionless(),
            complex: self.complex,
        })
    }

    /// Modulus: projects to a real quantity carrying the same unit.
    pub fn abs(&self) -> Quantity {
        if !self.complex {
            return Quantity {
                re: self.re.abs(),
                im: 0.0,
                sim: 0.0,
                ..self.clone()
            };
        }
        let r = self.re.hypot(self.im);
        let sre = if r == 0.0 {
            self.sre.hypot(self.sim)
        } else {
            ((squared(self.re) * squared(self.sre) + squared(self.im) * squared(self.sim)) / squared(r))
                .sqrt()
        };
        Quantity {
            re: r,
            im: 0.0,
            sre,
            sim: 0.0,
            unit: self.unit.clone(),
            complex: false,
        }
    }

    /// Phase angle in radians; dimensionless (the unit scale cancels in the
    /// ratio).
    pub fn arg(&self) -> Quantity {
        let r2 = squared(self.re) + squared(self.im);
        let (theta, sigma) = if r2 == 0.0 {
            (0.0, 0.0)
        } else {
            let v = (squared(self.im) * squared(self.sre) + squared(self.re) * squared(self.sim))
                / squared(r2);
            (self.im.atan2(self.re), v.sqrt())
        };
        Quantity {
            re: theta,
            im: 0.0,
            sre: sigma,
            sim: 0.0,
            unit: Unit::dimensionless(),
            complex: false,
        }
    }

    /// The uncertainty itself, as a zero-uncertainty quantity carrying this
    /// quantity's unit.
    pub fn sigma(&self) -> Quantity {
        Quantity {
            re: self.sre,
            im: self.sim,
            sre: 0.0,
            sim: 0.0,
            unit: self.unit.clone(),
            complex: self.complex,
        }
    }

    /// The magnitude alone, uncertainty stripped.
    pub fn value(&self) -> Quantity {
        Quantity {
            sre: 0.0,
            sim: 0.0,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() < tol, "{a} != {b} (tol {tol})");
    }

    fn q(re: f64, sigma: f64, unit: Unit) -> Quantity {
        Quantity {
            sre: sigma,
            ..Quantity::real(re, unit)
        }
    }

    #[test]
    fn additive_uncertainty_quadrature() {
        let table = UnitTable::si();
        let m = table.resolve("m").unwrap();
        let x = q(1.0, 1.0, m.clone());
        let y = q(2.0, 1.0, m);
        let z = x.checked_add(&y).unwrap();
        close(z.re, 3.0, 1e-12);
        close(z.sre, 2.0_f64.sqrt(), 1e-12);
    }

    #[test]
    fn addition_rescales_right_operand() {
        let table = UnitTable::si();
        let um = table.resolve("μm").unwrap();
        let nm = table.resolve("nm").unwrap();
        let a = q(5.0, 0.0, um.clone());
        let b = q(500.0, 0.0, nm);
        let z = a.checked_add(&b).unwrap();
        close(z.re, 5.5, 1e-12);
        assert_eq!(z.unit, um);
    }

    #[test]
    fn incommensurable_addition_fails() {
        let table = UnitTable::si();
        let a = q(1.0, 0.0, table.resolve("m").unwrap());
        let b = q(1.0, 0.0, table.resolve("s").unwrap());
        let err = a.checked_add(&b).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::UnitMismatch(_))
        ));
    }

    #[test]
    fn multiplicative_relative_quadrature() {
        let x = q(10.0, 0.1, Unit::dimensionless());
        let y = q(20.0, 0.4, Unit::dimensionless());
        let z = x.checked_mul(&y).unwrap();
        close(z.re, 200.0, 1e-12);
        // |z| * sqrt((0.1/10)^2 + (0.4/20)^2)
        let expect = 200.0 * (0.01_f64.powi(2) + 0.02_f64.powi(2)).sqrt();
        close(z.sre, expect, 1e-9);
    }

    #[test]
    fn zero_magnitude_falls_back_to_absolute_form() {
        let x = q(0.0, 0.5, Unit::dimensionless());
        let y = q(3.0, 0.2, Unit::dimensionless());
        let z = x.checked_mul(&y).unwrap();
        close(z.re, 0.0, 1e-12);
        // sqrt((y*sx)^2 + (x*sy)^2) with x = 0
        close(z.sre, 1.5, 1e-12);
    }

    #[test]
    fn product_combines_units() {
        let table = UnitTable::si();
        let n = q(2.0, 0.0, table.resolve("N").unwrap());
        let m = q(3.0, 0.0, table.resolve("m").unwrap());
        let j = n.checked_mul(&m).unwrap();
        assert_eq!(j.unit.dim, table.resolve("J").unwrap().dim);
    }

    #[test]
    fn division_by_zero_is_signalled() {
        let x = Quantity::dimensionless(1.0);
        let z = Quantity::dimensionless(0.0);
        let err = x.checked_div(&z).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::DivisionByZero)
        ));
    }

    #[test]
    fn parallel_resistors_scenario() {
        let table = UnitTable::si();
        let ohm = table.resolve("Ω").unwrap();
        let one = Quantity::dimensionless(1.0);
        let r1 = q(100.0, 1.0, ohm.clone());
        let r2 = q(50.0, 1.0, ohm);
        let total = one
            .checked_div(
                &one.checked_div(&r1)
                    .unwrap()
                    .checked_add(&one.checked_div(&r2).unwrap())
                    .unwrap(),
            )
            .unwrap();
        close(total.re, 100.0 / 3.0, 1e-9);
        // sqrt((R2^2 s1)^2 + (R1^2 s2)^2) / (R1 + R2)^2 = sqrt(17)/9
        close(total.sre, 17.0_f64.sqrt() / 9.0, 1e-9);
    }

    #[test]
    fn power_with_exact_exponent() {
        let table = UnitTable::si();
        let x = q(3.0, 0.1, table.resolve("m").unwrap());
        let z = x.checked_pow(&Quantity::dimensionless(2.0)).unwrap();
        close(z.re, 9.0, 1e-12);
        // sigma = |n x^(n-1)| sigma_x = 6 * 0.1
        close(z.sre, 0.6, 1e-12);
        assert_eq!(z.unit.dim, table.resolve("m2").unwrap().dim);
    }

    #[test]
    fn sqrt_of_area_has_length_dimension() {
        let table = UnitTable::si();
        let x = q(9.0, 0.0, table.resolve("m2").unwrap());
        let z = x.checked_pow(&Quantity::dimensionless(0.5)).unwrap();
        close(z.re, 3.0, 1e-12);
        assert_eq!(z.unit.dim, table.resolve("m").unwrap().dim);
    }

    #[test]
    fn dimensioned_base_rejects_irrational_exponent() {
        let table = UnitTable::si();
        let x = q(2.0, 0.0, table.resolve("m").unwrap());
        let err = x
            .checked_pow(&Quantity::dimensionless(std::f64::consts::PI))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::TypeMismatch(_))
        ));
    }

    #[test]
    fn prefix_rescaling_is_exact() {
        let table = UnitTable::si();
        let um = table.resolve("μm").unwrap();
        let nm = table.resolve("nm").unwrap();
        let a = Quantity::real(5.0, um)
            .with_uncertainty(&Quantity::real(1.0, nm.clone()))
            .unwrap();
        let in_nm = a.convert(&nm).unwrap();
        assert_eq!(in_nm.re, 5000.0);
        assert_eq!(in_nm.sre, 1.0);
    }

    #[test]
    fn fractional_power_of_a_negative_base_goes_complex() {
        let x = q(-8.0, 0.1, Unit::dimensionless());
        let z = x.checked_pow(&Quantity::dimensionless(0.5)).unwrap();
        assert!(z.complex);
        close(z.re, 0.0, 1e-12);
        close(z.im, 8.0_f64.sqrt(), 1e-12);
        // sigma via |n r^(n-1)|, finite rather than NaN
        close(z.sre, 0.5 / 8.0_f64.sqrt() * 0.1, 1e-12);
        // integral exponents of a negative base stay real
        let w = x.checked_pow(&Quantity::dimensionless(2.0)).unwrap();
        assert!(!w.complex);
        close(w.re, 64.0, 1e-12);
    }

    #[test]
    fn negation_preserves_uncertainty() {
        let x = q(-4.0, 0.7, Unit::dimensionless());
        let z = x.negate();
        close(z.re, 4.0, 1e-12);
        close(z.sre, 0.7, 1e-12);
        assert!(z.sre >= 0.0);
    }

    #[test]
    fn sigma_of_value_is_zero() {
        let x = q(12.0, 3.0, Unit::dimensionless());
        assert_eq!(x.value().sigma().re, 0.0);
        assert_eq!(x.sigma().re, 3.0);
        assert_eq!(x.sigma().sre, 0.0);
    }

    #[test]
    fn sigma_carries_the_unit() {
        let table = UnitTable::si();
        let ohm = table.resolve("Ω").unwrap();
        let x = q(100.0, 1.0, ohm.clone());
        let s = x.sigma();
        assert_eq!(s.unit, ohm);
        let threshold = q(0.1, 0.0, table.resolve("Ω").unwrap());
        assert_eq!(s.compare(&threshold).unwrap(), Ordering::Greater);
    }

    #[test]
    fn uncertainty_operator_rescales() {
        let table = UnitTable::si();
        let um = table.resolve("μm").unwrap();
        let nm = table.resolve("nm").unwrap();
        let a = Quantity::real(5.0, um)
            .with_uncertainty(&Quantity::real(1.0, nm))
            .unwrap();
        close(a.sre, 1e-3, 1e-15);
    }

    #[test]
    fn comparison_ignores_uncertainty_and_rescales() {
        let table = UnitTable::si();
        let km = q(1.0, 5.0, table.resolve("km").unwrap());
        let m = q(999.0, 0.0, table.resolve("m").unwrap());
        assert_eq!(km.compare(&m).unwrap(), Ordering::Greater);
    }

    #[test]
    fn complex_comparison_is_invalid() {
        let z = Quantity::imaginary(1.0);
        let err = z.compare(&Quantity::dimensionless(0.0)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::InvalidComparison(_))
        ));
    }

    #[test]
    fn complex_promotion_through_arithmetic() {
        let z = Quantity::dimensionless(1.0)
            .checked_add(&Quantity::imaginary(2.0))
            .unwrap();
        assert!(z.complex);
        close(z.im, 2.0, 1e-12);
        let w = z.checked_mul(&z).unwrap();
        // (1 + 2i)^2 = -3 + 4i
        close(w.re, -3.0, 1e-12);
        close(w.im, 4.0, 1e-12);
    }

    #[test]
    fn abs_and_arg_project_complex_values() {
        let z = Quantity {
            re: 3.0,
            im: 4.0,
            sre: 0.3,
            sim: 0.4,
            unit: Unit::dimensionless(),
            complex: true,
        };
        let r = z.abs();
        close(r.re, 5.0, 1e-12);
        assert!(!r.complex);
        // sqrt((a sa)^2 + (b sb)^2)/r
        close(r.sre, ((0.9f64 * 0.9) + (1.6 * 1.6)).sqrt() / 5.0, 1e-12);
        let theta = z.arg();
        close(theta.re, (4.0f64 / 3.0).atan(), 1e-12);
        assert!(theta.unit.is_dimensionless());
    }

    #[test]
    fn sin_requires_dimensionless() {
        let table = UnitTable::si();
        let x = q(1.0, 0.0, table.resolve("m").unwrap());
        assert!(x.sin().is_err());
    }

    #[test]
    fn degrees_fold_their_scale() {
        let table = UnitTable::si();
        let x = q(90.0, 0.0, table.resolve("deg").unwrap());
        let s = x.sin().unwrap();
        close(s.re, 1.0, 1e-12);
    }

    #[test]
    fn sin_propagates_derivative() {
        let x = q(0.0, 0.01, Unit::dimensionless());
        let s = x.sin().unwrap();
        // |cos(0)| * 0.01
        close(s.sre, 0.01, 1e-12);
        let c = x.cos().unwrap();
        // |sin(0)| * 0.01
        close(c.sre, 0.0, 1e-12);
    }

    #[test]
    fn exp_propagates_derivative() {
        let x = q(1.0, 0.1, Unit::dimensionless());
        let e = x.exp().unwrap();
        close(e.sre, 1.0_f64.exp() * 0.1, 1e-12);
    }
}
