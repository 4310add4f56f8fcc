use std::{borrow::Cow, collections::HashMap, fmt::Display, io::Write};

use miette::{Error, miette};

use crate::{
    builtins,
    error::RuntimeError,
    matrix::{Cell, Matrix},
    parse::{BinOp, Block, Expr, Parser, TemplatePart, UnOp},
    quantity::Quantity,
    unit::UnitTable,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Value<'de> {
    Quantity(Quantity),
    Matrix(Matrix),
    Text(Cow<'de, str>),
    Bool(bool),
    /// The unit value: what a statement-terminated block or an untaken `if`
    /// produces. Renders as nothing.
    Void,
}

impl Value<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Quantity(_) => "a quantity",
            Value::Matrix(_) => "a matrix",
            Value::Text(_) => "text",
            Value::Bool(_) => "a boolean",
            Value::Void => "the unit value",
        }
    }
}

impl Display for Value<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Quantity(q) => write!(f, "{q}"),
            Value::Matrix(m) => write!(f, "{m}"),
            Value::Text(t) => write!(f, "{t}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Void => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct Environment<'de> {
    stack: Stack<'de>,
}

impl<'de> Environment<'de> {
    /// Walks the scope chain outward.
    pub fn get(&self, name: &str) -> Option<&Value<'de>> {
        self.stack.iter().find_map(|frame| frame.get(name))
    }

    /// Rebinds in the nearest scope already holding `name`, else creates the
    /// binding in the current scope.
    pub fn assign(&mut self, name: &'de str, value: Value<'de>) {
        match self
            .stack
            .values
            .iter_mut()
            .rev()
            .find(|frame| frame.contains_key(name))
        {
            Some(frame) => {
                frame.insert(Cow::Borrowed(name), value);
            }
            None => {
                if let Some(frame) = self.stack.values.last_mut() {
                    frame.insert(Cow::Borrowed(name), value);
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct Stack<'de> {
    values: Vec<HashMap<Cow<'de, str>, Value<'de>>>,
}

impl Default for Stack<'_> {
    fn default() -> Self {
        Stack {
            values: vec![HashMap::new()],
        }
    }
}

impl<'de> Stack<'de> {
    pub fn push(&mut self) {
        self.values.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        self.values.pop();
    }

    pub fn iter(&self) -> impl Iterator<Item = &HashMap<Cow<'de, str>, Value<'de>>> {
        self.values.iter().rev()
    }
}

pub struct Interpreter<'de> {
    parser: Parser<'de>,
    environment: Environment<'de>,
    table: UnitTable,
    sink: Box<dyn Write>,
    last_terminated: bool,
}

impl<'de> Iterator for Interpreter<'de> {
    type Item = Result<Value<'de>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let statement = match self.parser.next_statement()? {
            Ok(statement) => statement,
            Err(e) => return Some(Err(e)),
        };
        self.last_terminated = statement.terminated;
        Some(self.eval_expression(&statement.expr))
    }
}

impl<'de> Interpreter<'de> {
    pub fn new(filename: Option<&'de str>, whole: &'de str) -> Self {
        Self {
            parser: Parser::new(filename, whole),
            environment: Environment::default(),
            table: UnitTable::si(),
            sink: Box::new(std::io::stdout()),
            last_terminated: true,
        }
    }

    /// Swaps the SI table for a custom one, for isolated tests.
    pub fn with_table(mut self, table: UnitTable) -> Self {
        self.table = table;
        self
    }

    /// Redirects `print`/`write` output.
    pub fn with_sink(mut self, sink: Box<dyn Write>) -> Self {
        self.sink = sink;
        self
    }

    /// The scope chain, for hosts reading bindings back after driving the
    /// statement iterator.
    pub fn environment(&self) -> &Environment<'de> {
        &self.environment
    }

    /// Runs to completion. The program's value is its final statement's
    /// value when no `;` closed it, else the unit value.
    pub fn run(mut self) -> Result<Value<'de>, Error> {
        let mut last = Value::Void;
        while let Some(value) = self.next() {
            last = if self.last_terminated {
                value?;
                Value::Void
            } else {
                value?
            };
        }
        Ok(last)
    }

    fn eval_expression(&mut self, expr: &Expr<'de>) -> Result<Value<'de>, Error> {
        Ok(match expr {
            Expr::Literal { value, suffix } => {
                Value::Quantity(Quantity::from_literal(*value, suffix, &self.table)?)
            }
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => {
                            let value = self.eval_expression(expr)?;
                            out.push_str(&value.to_string());
                        }
                    }
                }
                Value::Text(Cow::Owned(out))
            }
            Expr::Ident(name) => match self.environment.get(name) {
                Some(value) => value.clone(),
                None => {
                    return Err(miette!(
                        help = format!("assign it first: `{name} = …`"),
                        "undefined variable `{name}`",
                    ));
                }
            },
            Expr::Assign { name, value } => {
                let value = self.eval_expression(value)?;
                self.environment.assign(name, value.clone());
                value
            }
            Expr::Unary {
                op: UnOp::Neg,
                operand,
            } => match self.eval_expression(operand)? {
                Value::Quantity(q) => Value::Quantity(q.negate()),
                other => {
                    return Err(RuntimeError::type_mismatch(format!(
                        "unary `-` takes a quantity, got {}",
                        other.kind()
                    )));
                }
            },
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval_expression(lhs)?;
                let rhs = self.eval_expression(rhs)?;
                self.eval_binary(*op, lhs, rhs)?
            }
            Expr::Coerce { operand, unit } => {
                let unit = self.table.resolve(unit)?;
                match self.eval_expression(operand)? {
                    Value::Quantity(q) => {
                        // a plain dimensionless number takes the unit on;
                        // anything already carrying a unit is converted
                        if q.unit.is_dimensionless() && q.unit.symbol.is_none() {
                            let k = q.unit.scale;
                            Value::Quantity(Quantity {
                                re: q.re * k,
                                im: q.im * k,
                                sre: q.sre * k,
                                sim: q.sim * k,
                                unit,
                                complex: q.complex,
                            })
                        } else {
                            Value::Quantity(q.convert(&unit)?)
                        }
                    }
                    other => {
                        return Err(RuntimeError::type_mismatch(format!(
                            "cannot apply a unit to {}",
                            other.kind()
                        )));
                    }
                }
            }
            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expression(arg)?);
                }
                builtins::call(name, &mut *self.sink, &values)?
            }
            Expr::Block(block) => self.eval_block(block)?,
            Expr::If {
                condition,
                then_block,
                else_block,
            } => {
                if self.eval_condition(condition)? {
                    self.eval_block(then_block)?
                } else if let Some(else_block) = else_block {
                    self.eval_block(else_block)?
                } else {
                    Value::Void
                }
            }
            Expr::While { condition, body } => {
                let mut last = Value::Void;
                while self.eval_condition(condition)? {
                    last = self.eval_block(body)?;
                }
                last
            }
            Expr::MatrixLit(rows) => {
                let mut cells = Vec::with_capacity(rows.len());
                for (i, row) in rows.iter().enumerate() {
                    let mut out = Vec::with_capacity(row.len());
                    for expr in row {
                        out.push(self.eval_cell(expr, i)?);
                    }
                    cells.push(out);
                }
                if cells.len() == 1 {
                    // a single bracketed row is a column
                    Value::Matrix(Matrix::column(cells.remove(0)))
                } else {
                    Value::Matrix(Matrix::new(cells)?)
                }
            }
            Expr::Index { target, indices } => {
                let matrix = match self.eval_expression(target)? {
                    Value::Matrix(matrix) => matrix,
                    other => {
                        return Err(RuntimeError::type_mismatch(format!(
                            "indexing needs a matrix, got {}",
                            other.kind()
                        )));
                    }
                };
                let mut resolved = Vec::with_capacity(indices.len());
                for index in indices {
                    let value = self.eval_expression(index)?;
                    resolved.push(Self::integral_index(value)?);
                }
                let cell = match resolved[..] {
                    [i] => matrix.index_row(i)?,
                    [i, j] => matrix.index(i, j)?,
                    _ => unreachable!("the parser produces one or two indices"),
                };
                match cell {
                    Cell::Quantity(q) => Value::Quantity(q.clone()),
                    Cell::Text(t) => Value::Text(Cow::Owned(t.clone())),
                    Cell::Nested(m) => Value::Matrix(m.clone()),
                }
            }
        })
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        lhs: Value<'de>,
        rhs: Value<'de>,
    ) -> Result<Value<'de>, Error> {
        use std::cmp::Ordering;

        // equality is also meaningful on texts and booleans
        match (op, &lhs, &rhs) {
            (BinOp::EqualEqual, Value::Text(a), Value::Text(b)) => return Ok(Value::Bool(a == b)),
            (BinOp::BangEqual, Value::Text(a), Value::Text(b)) => return Ok(Value::Bool(a != b)),
            (BinOp::EqualEqual, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(a == b)),
            (BinOp::BangEqual, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(a != b)),
            _ => {}
        }

        let (Value::Quantity(x), Value::Quantity(y)) = (&lhs, &rhs) else {
            return Err(RuntimeError::type_mismatch(format!(
                "operands must be quantities, got {} and {}",
                lhs.kind(),
                rhs.kind()
            )));
        };

        Ok(match op {
            BinOp::Add => Value::Quantity(x.checked_add(y)?),
            BinOp::Sub => Value::Quantity(x.checked_sub(y)?),
            BinOp::Mul => Value::Quantity(x.checked_mul(y)?),
            BinOp::Div => Value::Quantity(x.checked_div(y)?),
            BinOp::Pow => Value::Quantity(x.checked_pow(y)?),
            BinOp::PlusMinus => Value::Quantity(x.with_uncertainty(y)?),
            BinOp::Less => Value::Bool(x.compare(y)? == Ordering::Less),
            BinOp::LessEqual => Value::Bool(x.compare(y)? != Ordering::Greater),
            BinOp::Greater => Value::Bool(x.compare(y)? == Ordering::Greater),
            BinOp::GreaterEqual => Value::Bool(x.compare(y)? != Ordering::Less),
            BinOp::EqualEqual => Value::Bool(x.compare(y)? == Ordering::Equal),
            BinOp::BangEqual => Value::Bool(x.compare(y)? != Ordering::Equal),
        })
    }

    fn eval_condition(&mut self, expr: &Expr<'de>) -> Result<bool, Error> {
        match self.eval_expression(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(RuntimeError::type_mismatch(format!(
                "a condition must be a comparison result, got {}",
                other.kind()
            ))),
        }
    }

    fn eval_block(&mut self, block: &Block<'de>) -> Result<Value<'de>, Error> {
        self.environment.stack.push();
        let result = self.eval_block_inner(block);
        self.environment.stack.pop();
        result
    }

    fn eval_block_inner(&mut self, block: &Block<'de>) -> Result<Value<'de>, Error> {
        for statement in &block.statements {
            self.eval_expression(statement)?;
        }
        match &block.tail {
            Some(tail) => self.eval_expression(tail),
            None => Ok(Value::Void),
        }
    }

    fn eval_cell(&mut self, expr: &Expr<'de>, row: usize) -> Result<Cell, Error> {
        Ok(match self.eval_expression(expr)? {
            Value::Quantity(q) => Cell::Quantity(q),
            Value::Text(t) => Cell::Text(t.into_owned()),
            Value::Matrix(m) => Cell::Nested(m),
            other => {
                return Err(RuntimeError::type_mismatch(format!(
                    "matrix cell in row {} must be a quantity, text or matrix, got {}",
                    row + 1,
                    other.kind()
                )));
            }
        })
    }

    // indices are real, dimensionless, whole-valued quantities
    fn integral_index(value: Value<'de>) -> Result<i64, Error> {
        let q = match value {
            Value::Quantity(q) => q,
            other => {
                return Err(RuntimeError::type_mismatch(format!(
                    "an index must be a quantity, got {}",
                    other.kind()
                )));
            }
        };
        if q.complex || !q.unit.is_dimensionless() {
            return Err(RuntimeError::type_mismatch(
                "an index must be a real dimensionless quantity",
            ));
        }
        let n = q.re * q.unit.scale;
        if n.fract() != 0.0 || n.abs() > i64::MAX as f64 {
            return Err(RuntimeError::type_mismatch(format!(
                "an index must be a whole number, got {n}"
            )));
        }
        Ok(n as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

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

    fn run(source: &str) -> Value<'_> {
        Interpreter::new(None, source).run().unwrap()
    }

    fn run_err(source: &str) -> Error {
        Interpreter::new(None, source).run().unwrap_err()
    }

    fn run_with_output(source: &str) -> (String, Result<Value<'_>, Error>) {
        let sink = SharedSink::default();
        let result = Interpreter::new(None, source)
            .with_sink(Box::new(sink.clone()))
            .run();
        let output = String::from_utf8(sink.0.borrow().clone()).unwrap();
        (output, result)
    }

    fn magnitude(value: &Value<'_>) -> f64 {
        match value {
            Value::Quantity(q) => q.re,
            other => panic!("expected a quantity, got {}", other.kind()),
        }
    }

    #[test]
    fn program_value_is_the_unterminated_tail() {
        assert_eq!(magnitude(&run("a = 1; a + 1")), 2.0);
        assert_eq!(run("a = 1; a + 1;"), Value::Void);
    }

    #[test]
    fn while_accumulation() {
        let v = run("i = 0; a = 0; x = while i < 100 { i = i + 1; a = a + i; a }; x");
        assert_eq!(magnitude(&v), 5050.0);
    }

    #[test]
    fn while_with_zero_iterations_is_void() {
        assert_eq!(run("x = while 1 < 0 { 2 }; x"), Value::Void);
    }

    #[test]
    fn if_else_selects_a_branch() {
        assert_eq!(magnitude(&run("if 1 < 2 { 10 } else { 20 }")), 10.0);
        assert_eq!(magnitude(&run("if 2 < 1 { 10 } else { 20 }")), 20.0);
        assert_eq!(run("if 2 < 1 { 10 }"), Value::Void);
    }

    #[test]
    fn bare_quantity_conditions_are_rejected() {
        let err = run_err("if 1 { 2 }");
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::TypeMismatch(_))
        ));
    }

    #[test]
    fn assignment_rebinds_the_outer_scope() {
        assert_eq!(magnitude(&run("x = 1; { x = 2; }; x")), 2.0);
        // a name first bound inside a block does not escape it
        assert!(run_err("{ y = 3; }; y").to_string().contains("undefined"));
    }

    #[test]
    fn unit_mismatch_in_addition() {
        let err = run_err("(1)|m| + (1)|s|");
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::UnitMismatch(_))
        ));
    }

    #[test]
    fn coercion_attaches_then_converts() {
        let v = run("(5)|km|");
        let Value::Quantity(q) = &v else { panic!() };
        assert_eq!(q.re, 5.0);
        assert_eq!(q.unit.scale, 1e3);

        let v = run("x = 5km; x|m|");
        assert_eq!(magnitude(&v), 5000.0);
    }

    #[test]
    fn prefix_rescaling_is_exact_in_scripts() {
        assert_eq!(run("1km == 1000m"), Value::Bool(true));
        assert_eq!(run("x = 5μm; x|nm| == 5000nm"), Value::Bool(true));
    }

    #[test]
    fn interpolation_with_coercion() {
        let v = run("a = 5μm ± 1nm; \"{a|nm|}\"");
        assert_eq!(v, Value::Text(Cow::Owned("(5000 ± 1)|nm|".to_string())));
    }

    #[test]
    fn uncertainty_operator_and_sigma() {
        let v = run("x = 100 ± 5; sigma(x)");
        assert_eq!(magnitude(&v), 5.0);
        assert_eq!(magnitude(&run("x = 100 ± 5; sigma(value(x))")), 0.0);
        // unary minus leaves the uncertainty alone
        assert_eq!(magnitude(&run("x = 100 ± 5; sigma(-x)")), 5.0);
    }

    #[test]
    fn parallel_resistor_script() {
        let v = run("r1 = 100Ω ± 1Ω; r2 = 50Ω ± 1Ω; 1/(1/r1 + 1/r2)");
        let Value::Quantity(q) = &v else { panic!() };
        assert!((q.re - 100.0 / 3.0).abs() < 1e-9);
        assert!((q.sre - 17.0_f64.sqrt() / 9.0).abs() < 1e-9);
    }

    #[test]
    fn complex_arithmetic_promotes() {
        let v = run("(1 + 2i) * (1 + 2i)");
        let Value::Quantity(q) = &v else { panic!() };
        assert!(q.complex);
        assert_eq!(q.re, -3.0);
        assert_eq!(q.im, 4.0);
    }

    #[test]
    fn power_of_a_dimensioned_base() {
        let v = run("((4)|m2|) ^ 0.5");
        let Value::Quantity(q) = &v else { panic!() };
        assert_eq!(q.re, 2.0);
        assert_eq!(q.unit.dim.coherent_symbol(), "m");
    }

    #[test]
    fn matrices_build_and_index() {
        assert_eq!(magnitude(&run("m = [10, 20, 30]; m[2]")), 20.0);
        assert_eq!(magnitude(&run("m = [10, 20, 30]; m[-1]")), 30.0);
        assert_eq!(magnitude(&run("m = [1, 2; 3, 4]; m[2, 1]")), 3.0);
        assert_eq!(
            run("m = [\"label\", 1; \"other\", 2]; m[1, 1]"),
            Value::Text(Cow::Owned("label".to_string()))
        );
    }

    #[test]
    fn ragged_matrix_is_rejected() {
        let err = run_err("[1, 2; 3]");
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::RaggedMatrix { .. })
        ));
    }

    #[test]
    fn fractional_index_is_rejected() {
        let err = run_err("m = [1, 2]; m[1.5]");
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::TypeMismatch(_))
        ));
    }

    #[test]
    fn print_appends_one_newline() {
        let (output, result) = run_with_output("print(\"total: \", 1 + 2); write(\"a\", \"b\")");
        result.unwrap();
        assert_eq!(output, "total: 3\nab");
    }

    #[test]
    fn assertion_failure_carries_the_message() {
        let err = run_err("assert(1 < 0, \"broken invariant\")");
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::AssertionFailed(msg)) if msg == "broken invariant"
        ));
        // a passing assertion is silent
        run("assert(1 < 2, \"fine\");");
    }

    #[test]
    fn user_errors_propagate() {
        let err = run_err("x = 1; error(\"gave up\"); x");
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::UserError(msg)) if msg == "gave up"
        ));
    }

    #[test]
    fn unknown_function_is_signalled() {
        let err = run_err("frobnicate(1)");
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::UndefinedFunction(name)) if name == "frobnicate"
        ));
    }

    #[test]
    fn text_equality() {
        assert_eq!(run("\"a\" == \"a\""), Value::Bool(true));
        assert_eq!(run("\"a\" != \"b\""), Value::Bool(true));
        let err = run_err("\"a\" == 1");
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::TypeMismatch(_))
        ));
    }

    #[test]
    fn degrees_in_trigonometry() {
        let v = run("sin(90deg)");
        assert!((magnitude(&v) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rendering_round_trips_through_the_parser() {
        for source in ["5 ± 1", "5km", "(5000 ± 1)|nm|", "3 + 2i", "(3 + 2i) ± (1 + 0.5i)"] {
            let first = run(source);
            let rendered = first.to_string();
            let second = Interpreter::new(None, &rendered).run().unwrap();
            assert_eq!(rendered, second.to_string(), "rendering of `{source}`");
        }
    }
}
