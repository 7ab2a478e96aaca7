//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

//! Scalar bodies of the elementwise unary kernels.
//!
//! Each function returns the body of `fn unaryOperation(a: T) -> T`.

use half::f16;

use crate::gpu::shader::expr::{CmpOp, Expr, ScalarFn};
use crate::tensor::{DType, HasDType};

//--------------------------------------------------------------------------------------------------

fn a() -> Expr {
	Expr::input()
}

fn c(value: f64) -> Expr {
	Expr::c(value)
}

/// # Expression
///
///     a
pub fn linear() -> ScalarFn {
	ScalarFn::ret("linear", a())
}

/// # Expression
///
///     max(a, 0)
pub fn relu() -> ScalarFn {
	ScalarFn::ret("relu", a().max(c(0.0)))
}

/// # Expression
///
///     a < 0 ? 0 : min(6, a)
pub fn relu6() -> ScalarFn {
	ScalarFn::ret("relu6", Expr::select(CmpOp::Lt, a(), c(0.0), c(0.0), c(6.0).min(a())))
}

/// # Expression
///
///     a >= 0 ? a : exp(a) - 1
pub fn elu() -> ScalarFn {
	ScalarFn::ret("elu", Expr::select(CmpOp::Ge, a(), c(0.0), a(), a().exp() - c(1.0)))
}

/// # Expression
///
///     1 / (1 + exp(-1 * a))
pub fn sigmoid() -> ScalarFn {
	ScalarFn::ret("sigmoid", c(1.0) / (c(1.0) + (c(-1.0) * a()).exp()))
}

pub fn abs() -> ScalarFn {
	ScalarFn::ret("abs", a().abs())
}

pub fn square() -> ScalarFn {
	ScalarFn::ret("square", a() * a())
}

pub fn neg() -> ScalarFn {
	ScalarFn::ret("neg", -a())
}

/// # Expression
///
///     e2x = exp(-2 * abs(a))
///     sign(a) * (1 - e2x) / (1 + e2x)
pub fn tanh() -> ScalarFn {
	let e2x = Expr::local("e2x");
	ScalarFn::builder("tanh")
		.bind("e2x", (c(-2.0) * a().abs()).exp())
		.ret(a().sign() * (c(1.0) - e2x.clone()) / (c(1.0) + e2x))
}

pub fn exp() -> ScalarFn {
	ScalarFn::ret("exp", a().exp())
}

/// # Expression
///
///     a < 0 ? +inf : ln(a)
pub fn log() -> ScalarFn {
	ScalarFn::builder("log").return_if(CmpOp::Lt, a(), c(0.0), c(f64::INFINITY)).ret(a().ln())
}

/// Rounds the working value through `dtype`.
///
/// Used by the cast kernels, the conversion to the buffer type happens when the
/// result is stored.
pub fn round_to(dtype: DType) -> ScalarFn {
	ScalarFn::ret("round_to", a().round_to(dtype))
}

/// # Expression
///
///     f32(f16(a))
pub fn to_float16() -> ScalarFn {
	round_to(f16::dtype)
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use assert_approx_eq::assert_approx_eq;

	use super::*;

	#[test]
	fn test_eval() {
		let t = f32::dtype;
		assert_eq!(relu().eval(t, -3.0), 0.0);
		assert_eq!(relu().eval(t, 3.0), 3.0);
		assert_eq!(relu6().eval(t, -1.0), 0.0);
		assert_eq!(relu6().eval(t, 7.0), 6.0);
		assert_eq!(relu6().eval(t, 2.5), 2.5);
		assert_approx_eq!(elu().eval(t, -1.0), (-1.0_f64).exp() - 1.0, 1e-6);
		assert_eq!(elu().eval(t, 2.0), 2.0);
		assert_approx_eq!(sigmoid().eval(t, 0.0), 0.5, 1e-6);
		assert_approx_eq!(tanh().eval(t, 0.5), 0.5_f64.tanh(), 1e-6);
		assert_approx_eq!(tanh().eval(t, -2.0), (-2.0_f64).tanh(), 1e-6);
		assert_eq!(log().eval(t, -1.0), f64::INFINITY);
		assert_approx_eq!(log().eval(t, 2.0), 2.0_f64.ln(), 1e-6);
		assert_eq!(square().eval(t, -3.0), 9.0);
		assert_eq!(neg().eval(t, 3.0), -3.0);
		assert_eq!(abs().eval(t, -3.0), 3.0);
		assert_eq!(linear().eval(t, 1.25), 1.25);
		assert_approx_eq!(exp().eval(t, 1.0), std::f64::consts::E, 1e-6);
	}

	#[test]
	fn test_to_float16() {
		let f = to_float16();
		assert_eq!(f.render_body(f32::dtype, ""), vec!["return f32(f16(a));".to_string()]);
		assert_eq!(f.eval(f32::dtype, 1.0), 1.0);
		assert_eq!(f.eval(f32::dtype, 0.1), f16::from_f64(0.1).to_f64());
	}

	#[test]
	fn test_tanh_body() {
		let lines = tanh().render_body(f16::dtype, "");
		assert_eq!(lines[0], "let e2x = exp((f16(-2.0) * abs(a)));");
		assert_eq!(lines[1], "return ((sign(a) * (f16(1.0) - e2x)) / (f16(1.0) + e2x));");
	}

	#[test]
	fn test_ops_have_distinct_keys() {
		let ops = [
			linear(),
			relu(),
			relu6(),
			elu(),
			sigmoid(),
			abs(),
			square(),
			neg(),
			tanh(),
			exp(),
			log(),
			to_float16(),
			round_to(i32::dtype),
		];
		for (i, x) in ops.iter().enumerate() {
			for y in &ops[i + 1..] {
				assert_ne!(x.key(), y.key(), "{} vs {}", x.name(), y.name());
			}
		}
	}
}
