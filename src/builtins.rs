//! The built-in function table. Every callable name resolves here; programs
//! cannot define their own functions.

use std::io::Write;

use miette::{Error, IntoDiagnostic};

use crate::error::RuntimeError;
use crate::eval::Value;
use crate::quantity::Quantity;

type Builtin = for<'de> fn(&mut dyn Write, &[Value<'de>]) -> Result<Value<'de>, Error>;

pub fn call<'de>(
    name: &str,
    sink: &mut dyn Write,
    args: &[Value<'de>],
) -> Result<Value<'de>, Error> {
    let builtin: Builtin = match name {
        "sin" => sin,
        "cos" => cos,
        "exp" => exp,
        "abs" => abs,
        "arg" => arg,
        "sigma" => sigma,
        "value" => value,
        "print" => print,
        "write" => write,
        "assert" => assert,
        "error" => error,
        _ => return Err(RuntimeError::UndefinedFunction(name.to_string()).into()),
    };
    builtin(sink, args)
}

fn quantity_arg<'a, 'de>(name: &str, args: &'a [Value<'de>]) -> Result<&'a Quantity, Error> {
    match args {
        [Value::Quantity(q)] => Ok(q),
        [other] => Err(RuntimeError::type_mismatch(format!(
            "{name} takes a quantity, got {}",
            other.kind()
        ))),
        _ => Err(RuntimeError::type_mismatch(format!(
            "{name} takes exactly one argument, got {}",
            args.len()
        ))),
    }
}

fn sin<'de>(_: &mut dyn Write, args: &[Value<'de>]) -> Result<Value<'de>, Error> {
    Ok(Value::Quantity(quantity_arg("sin", args)?.sin()?))
}

fn cos<'de>(_: &mut dyn Write, args: &[Value<'de>]) -> Result<Value<'de>, Error> {
    Ok(Value::Quantity(quantity_arg("cos", args)?.cos()?))
}

fn exp<'de>(_: &mut dyn Write, args: &[Value<'de>]) -> Result<Value<'de>, Error> {
    Ok(Value::Quantity(quantity_arg("exp", args)?.exp()?))
}

fn abs<'de>(_: &mut dyn Write, args: &[Value<'de>]) -> Result<Value<'de>, Error> {
    Ok(Value::Quantity(quantity_arg("abs", args)?.abs()))
}

fn arg<'de>(_: &mut dyn Write, args: &[Value<'de>]) -> Result<Value<'de>, Error> {
    Ok(Value::Quantity(quantity_arg("arg", args)?.arg()))
}

fn sigma<'de>(_: &mut dyn Write, args: &[Value<'de>]) -> Result<Value<'de>, Error> {
    Ok(Value::Quantity(quantity_arg("sigma", args)?.sigma()))
}

fn value<'de>(_: &mut dyn Write, args: &[Value<'de>]) -> Result<Value<'de>, Error> {
    Ok(Value::Quantity(quantity_arg("value", args)?.value()))
}

/// Renders every argument to the sink, verbatim.
fn write<'de>(sink: &mut dyn Write, args: &[Value<'de>]) -> Result<Value<'de>, Error> {
    for arg in args {
        write!(sink, "{arg}").into_diagnostic()?;
    }
    Ok(Value::Void)
}

/// `write` plus exactly one trailing newline.
fn print<'de>(sink: &mut dyn Write, args: &[Value<'de>]) -> Result<Value<'de>, Error> {
    write(sink, args)?;
    writeln!(sink).into_diagnostic()?;
    Ok(Value::Void)
}

fn assert<'de>(_: &mut dyn Write, args: &[Value<'de>]) -> Result<Value<'de>, Error> {
    match args {
        [Value::Bool(true), Value::Text(_)] => Ok(Value::Void),
        [Value::Bool(false), Value::Text(msg)] => {
            Err(RuntimeError::AssertionFailed(msg.to_string()).into())
        }
        _ => Err(RuntimeError::type_mismatch(
            "assert takes a comparison result and a message",
        )),
    }
}

fn error<'de>(_: &mut dyn Write, args: &[Value<'de>]) -> Result<Value<'de>, Error> {
    match args {
        [Value::Text(msg)] => Err(RuntimeError::UserError(msg.to_string()).into()),
        _ => Err(RuntimeError::type_mismatch("error takes a message")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_sink() -> Vec<u8> {
        Vec::new()
    }

    #[test]
    fn unknown_names_are_signalled() {
        let err = call("tan", &mut no_sink(), &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::UndefinedFunction(name)) if name == "tan"
        ));
    }

    #[test]
    fn arity_is_checked() {
        let args = [
            Value::Quantity(Quantity::dimensionless(1.0)),
            Value::Quantity(Quantity::dimensionless(2.0)),
        ];
        let err = call("sin", &mut no_sink(), &args).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::TypeMismatch(_))
        ));
    }

    #[test]
    fn argument_kinds_are_checked() {
        let args = [Value::Bool(true)];
        let err = call("abs", &mut no_sink(), &args).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::TypeMismatch(_))
        ));
    }

    #[test]
    fn write_renders_to_the_sink() {
        let mut sink = no_sink();
        call(
            "write",
            &mut sink,
            &[
                Value::Quantity(Quantity::dimensionless(2.0)),
                Value::Text(" apples".into()),
            ],
        )
        .unwrap();
        assert_eq!(String::from_utf8(sink).unwrap(), "2 apples");
    }
}
