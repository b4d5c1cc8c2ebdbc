//! Pure helper functions available to every script.
//!
//! These never touch the host: conversions (`String`, `Number`, `parseInt`,
//! `parseFloat`), the Arduino math helpers (`map`, `constrain`, `abs`,
//! `min`, `max`) and the deterministic part of `Math`. `Math.random` is not
//! here; randomness belongs to the host.

use crate::interpreter::CallTarget;
use crate::value::Value;

/// `None` when `target` is not a builtin.
pub fn call(target: CallTarget<'_>, args: &[Value]) -> Option<Result<Value, String>> {
    match target.namespace {
        None => global(target.name, args),
        Some("Math") => math(target.name, args),
        Some(_) => None,
    }
}

fn arg(args: &[Value], index: usize) -> f64 {
    args.get(index).map(Value::to_number).unwrap_or(f64::NAN)
}

fn global(name: &str, args: &[Value]) -> Option<Result<Value, String>> {
    let value = match name {
        "String" => Value::Str(args.first().map(|v| v.to_string()).unwrap_or_default()),
        "Number" => Value::Number(args.first().map(Value::to_number).unwrap_or(0.0)),
        "Error" => Value::Str(args.first().map(|v| v.to_string()).unwrap_or_default()),
        "parseInt" => Value::Number(parse_leading(args, true)),
        "parseFloat" => Value::Number(parse_leading(args, false)),
        "isNaN" => Value::Bool(arg(args, 0).is_nan()),
        "abs" => Value::Number(arg(args, 0).abs()),
        "min" => Value::Number(arg(args, 0).min(arg(args, 1))),
        "max" => Value::Number(arg(args, 0).max(arg(args, 1))),
        "constrain" => {
            let (x, low, high) = (arg(args, 0), arg(args, 1), arg(args, 2));
            Value::Number(if x < low {
                low
            } else if x > high {
                high
            } else {
                x
            })
        }
        "map" => return Some(map_range(args)),
        _ => return None,
    };
    Some(Ok(value))
}

fn math(name: &str, args: &[Value]) -> Option<Result<Value, String>> {
    let x = arg(args, 0);
    let value = match name {
        "abs" => x.abs(),
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => (x + 0.5).floor(),
        "trunc" => x.trunc(),
        "sqrt" => x.sqrt(),
        "pow" => x.powf(arg(args, 1)),
        "min" => args.iter().map(Value::to_number).fold(f64::INFINITY, f64::min),
        "max" => args
            .iter()
            .map(Value::to_number)
            .fold(f64::NEG_INFINITY, f64::max),
        _ => return None,
    };
    Some(Ok(Value::Number(value)))
}

/// Arduino `map`, using truncating integer arithmetic.
fn map_range(args: &[Value]) -> Result<Value, String> {
    let [x, in_min, in_max, out_min, out_max] =
        [0, 1, 2, 3, 4].map(|i| arg(args, i).trunc());
    if in_max == in_min {
        return Err("map: input range is empty".to_string());
    }
    let scaled = ((x - in_min) * (out_max - out_min) / (in_max - in_min)).trunc();
    Ok(Value::Number(scaled + out_min))
}

fn parse_leading(args: &[Value], integer: bool) -> f64 {
    let text = args.first().map(|v| v.to_string()).unwrap_or_default();
    let text = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in text.char_indices() {
        let ok = c.is_ascii_digit()
            || (i == 0 && (c == '-' || c == '+'))
            || (!integer && c == '.' && !seen_dot);
        if !ok {
            break;
        }
        seen_dot |= c == '.';
        end = i + c.len_utf8();
    }
    text[..end].parse().unwrap_or(f64::NAN)
}
