//! Whole-program runs through the public interpreter API.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use tera::{Interpreter, Quantity, RuntimeError, Value};

fn run(source: &str) -> Value<'_> {
    Interpreter::new(None, source).run().unwrap()
}

fn run_err(source: &str) -> miette::Error {
    Interpreter::new(None, source).run().unwrap_err()
}

fn quantity<'a, 'de>(value: &'a Value<'de>) -> &'a Quantity {
    match value {
        Value::Quantity(q) => q,
        other => panic!("expected a quantity, got {}", other.kind()),
    }
}

#[derive(Clone, Default)]
struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn conversion_round_trip_preserves_the_value() {
    let v = run("x = 2.5km; x|mm||km|");
    let q = quantity(&v);
    assert!((q.re - 2.5).abs() < 1e-12);
    assert_eq!(q.to_string(), "2.5km");
}

#[test]
fn additive_quadrature_across_a_script() {
    let v = run("x = 3m ± 1m; y = 4m ± 1m; sigma(x + y)");
    let q = quantity(&v);
    assert!((q.re - 2.0_f64.sqrt()).abs() < 1e-12);
}

#[test]
fn negation_keeps_the_uncertainty() {
    assert_eq!(run("x = 10 ± 3; sigma(-x) == sigma(x)"), Value::Bool(true));
}

#[test]
fn sigma_compares_against_a_threshold() {
    assert_eq!(run("r = 100Ω ± 1Ω; sigma(r) > 0.1Ω"), Value::Bool(true));
    assert_eq!(run("r = 100Ω ± 0.01Ω; sigma(r) > 0.1Ω"), Value::Bool(false));
}

#[test]
fn parallel_resistor_report() {
    let sink = SharedSink::default();
    let source = r#"
        r1 = 100Ω ± 1Ω;
        r2 = 50Ω ± 1Ω;
        rtot = 1 / (1/r1 + 1/r2);
        print("Rtot = {rtot|Ω|}");
        rtot
    "#;
    let value = Interpreter::new(None, source)
        .with_sink(Box::new(sink.clone()))
        .run()
        .unwrap();
    let q = quantity(&value);
    assert!((q.re * q.unit.scale - 100.0 / 3.0).abs() < 1e-9);
    assert!((q.sre * q.unit.scale - 17.0_f64.sqrt() / 9.0).abs() < 1e-9);

    let output = String::from_utf8(sink.0.borrow().clone()).unwrap();
    assert!(output.starts_with("Rtot = (33.33"), "got {output:?}");
    assert!(output.ends_with(")|Ω|\n"), "got {output:?}");
}

#[test]
fn interferometry_script_with_matrices() {
    let source = r#"
        laser = 632.8nm ± 0.1nm;
        table = [
            "wavelength", laser;
            "doubled", laser * 2
        ];
        row = 2;
        table[row, 2]
    "#;
    let v = run(source);
    let q = quantity(&v);
    assert!((q.re * q.unit.scale - 2.0 * 632.8e-9).abs() < 1e-15);
}

#[test]
fn while_loops_accumulate() {
    let v = run("i = 0; a = 0; x = while i < 100 { i = i + 1; a = a + i; a }; x");
    assert_eq!(quantity(&v).re, 5050.0);
}

#[test]
fn guard_clauses_with_assert_and_error() {
    let err = run_err(r#"steps = 0; assert(steps > 0, "need at least one step"); 1/steps"#);
    assert!(matches!(
        err.downcast_ref::<RuntimeError>(),
        Some(RuntimeError::AssertionFailed(msg)) if msg == "need at least one step"
    ));

    let err = run_err(r#"if 1 > 0 { error("unsupported mode") } else { 0 }"#);
    assert!(matches!(
        err.downcast_ref::<RuntimeError>(),
        Some(RuntimeError::UserError(msg)) if msg == "unsupported mode"
    ));
}

#[test]
fn incommensurable_sum_aborts_the_statement() {
    let err = run_err("(1)|m| + (1)|s|");
    assert!(matches!(
        err.downcast_ref::<RuntimeError>(),
        Some(RuntimeError::UnitMismatch(_))
    ));
}

#[test]
fn host_reads_bindings_back() {
    let source = "a = 2; b = a ^ 10;";
    let mut interpreter = Interpreter::new(None, source);
    while let Some(result) = interpreter.next() {
        result.unwrap();
    }
    let bindings = interpreter.environment();
    let b = match bindings.get("b") {
        Some(Value::Quantity(q)) => q.re,
        other => panic!("unexpected binding {other:?}"),
    };
    assert_eq!(b, 1024.0);
}

#[test]
fn rendered_output_reparses_to_the_same_value() {
    let sources = [
        "5 ± 1",
        "x = 5μm ± 1nm; x|nm|",
        "(2 + 3i) * (1 + 1i)",
        "9.81|m/s2|",
        "[1, 2; 3, 4]",
    ];
    for source in sources {
        let first = run(source).to_string();
        let second = Interpreter::new(None, &first).run().unwrap().to_string();
        assert_eq!(first, second, "rendering of `{source}`");
    }
}
