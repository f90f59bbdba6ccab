//! `math.*` namespace: scalar helpers over current-bar values.
//!
//! NA propagates through every function via NaN arithmetic; a NaN result is
//! normalized back to NA by `Value::num`.

use crate::domain::error::BarscriptError;
use crate::domain::script::compiled::MathFunc;
use crate::domain::value::Value;

pub fn call(func: MathFunc, args: &[Value]) -> Result<Value, BarscriptError> {
    let nums: Vec<f64> = args.iter().map(|v| v.as_num()).collect();
    let arity = |n: usize| -> Result<(), BarscriptError> {
        if nums.len() == n {
            Ok(())
        } else {
            Err(BarscriptError::Runtime {
                reason: format!(
                    "math.{} expects {} argument(s), got {}",
                    func.name(),
                    n,
                    nums.len()
                ),
            })
        }
    };

    let out = match func {
        MathFunc::Abs => {
            arity(1)?;
            nums[0].abs()
        }
        MathFunc::Max => {
            if nums.is_empty() {
                return Err(BarscriptError::Runtime {
                    reason: "math.max expects at least 1 argument".to_string(),
                });
            }
            nums.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        }
        MathFunc::Min => {
            if nums.is_empty() {
                return Err(BarscriptError::Runtime {
                    reason: "math.min expects at least 1 argument".to_string(),
                });
            }
            nums.iter().copied().fold(f64::INFINITY, f64::min)
        }
        MathFunc::Pow => {
            arity(2)?;
            nums[0].powf(nums[1])
        }
        MathFunc::Sqrt => {
            arity(1)?;
            nums[0].sqrt()
        }
        MathFunc::Round => {
            arity(1)?;
            nums[0].round()
        }
        MathFunc::Floor => {
            arity(1)?;
            nums[0].floor()
        }
        MathFunc::Ceil => {
            arity(1)?;
            nums[0].ceil()
        }
        MathFunc::Sign => {
            arity(1)?;
            if nums[0] == 0.0 {
                0.0
            } else {
                nums[0].signum()
            }
        }
        MathFunc::Log => {
            arity(1)?;
            nums[0].ln()
        }
        MathFunc::Exp => {
            arity(1)?;
            nums[0].exp()
        }
        MathFunc::Avg => {
            if nums.is_empty() {
                return Err(BarscriptError::Runtime {
                    reason: "math.avg expects at least 1 argument".to_string(),
                });
            }
            nums.iter().sum::<f64>() / nums.len() as f64
        }
        MathFunc::Sum => nums.iter().sum::<f64>(),
    };

    // max/min over a NA operand is NA, not the other operand.
    if nums.iter().any(|n| n.is_nan()) {
        return Ok(Value::Na);
    }
    Ok(Value::num(out))
}
